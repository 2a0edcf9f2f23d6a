//! Read-only commands: status, list, history, gate.

use anyhow::Result;
use uuid::Uuid;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::model::{Evidence, PivotCounts, RunStatus};

use super::{Context, print_json, read_json_arg};
use crate::Cli;

fn styled_status(status: RunStatus) -> console::StyledObject<&'static str> {
    let s = console::style(status.as_str());
    match status {
        RunStatus::Pending => s.dim(),
        RunStatus::Running => s.green(),
        RunStatus::Paused => s.yellow(),
        RunStatus::Completed => s.cyan(),
        RunStatus::Failed => s.red(),
    }
}

pub fn cmd_status(ctx: &Context, cli: &Cli, run_id: Uuid) -> Result<()> {
    let state = ctx.controller.status(run_id)?;
    if cli.json {
        return print_json(&state);
    }

    println!("{} {}", console::style("Run").bold(), state.run_id);
    println!("  project:   {}", state.project_id);
    println!(
        "  phase:     {} ({})",
        state.current_phase.number(),
        state.current_phase
    );
    println!("  status:    {}", styled_status(state.status));
    if let Some(checkpoint) = state.hitl_state {
        println!("  waiting:   {}", console::style(checkpoint).cyan());
    }
    if let Some(request_id) = state.pending_request_id {
        println!("  request:   {}", request_id);
    }
    println!(
        "  pivots:    segment {}, value {}, feature {}, strategic {}",
        state.pivots.segment, state.pivots.value, state.pivots.feature, state.pivots.strategic
    );
    println!("  round:     {}", state.current_round());
    if state.fit_iterations > 0 {
        println!("  fit iterations: {}", state.fit_iterations);
    }
    if let Some(verdict) = &state.last_verdict {
        println!(
            "  last gate: {} / {} / proceed={}",
            verdict.signal, verdict.recommendation, verdict.proceed
        );
    }
    if let Some(decision) = state.final_decision {
        println!("  decision:  {}", console::style(decision).bold());
    }
    if let Some(message) = &state.error_message {
        println!("  error:     {}", console::style(message).red());
    }
    println!("  version:   {}", state.version);
    Ok(())
}

pub fn cmd_list(ctx: &Context, cli: &Cli) -> Result<()> {
    let runs = ctx.controller.list()?;
    if cli.json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No validation runs.");
        return Ok(());
    }
    for run in &runs {
        println!(
            "  {}  {:<20} phase {}  {:<9} {}",
            run.run_id,
            run.project_id,
            run.current_phase.number(),
            styled_status(run.status),
            run.hitl_state.map(|c| c.as_str()).unwrap_or("")
        );
    }
    Ok(())
}

pub fn cmd_history(ctx: &Context, cli: &Cli, run_id: Uuid) -> Result<()> {
    let snapshots = ctx.controller.history(run_id)?;
    if cli.json {
        return print_json(&snapshots);
    }
    let Some(latest) = snapshots.last() else {
        println!("No history for run {}", run_id);
        return Ok(());
    };

    println!("{}", console::style("Transitions").bold().cyan());
    for t in &latest.state.history {
        let checkpoint = t.checkpoint.map(|c| format!(" [{}]", c)).unwrap_or_default();
        println!(
            "  {}  {} → {}  {}{}  {}",
            t.at.format("%Y-%m-%d %H:%M:%S"),
            t.from_phase.number(),
            t.to_phase.number(),
            t.status,
            checkpoint,
            console::style(&t.note).dim()
        );
    }
    println!();
    println!("{}", console::style("Saved versions").bold().cyan());
    for snap in &snapshots {
        println!(
            "  v{:<4} {}  {}  {}",
            snap.version,
            snap.saved_at.format("%Y-%m-%d %H:%M:%S"),
            &snap.checksum[..12.min(snap.checksum.len())],
            snap.state.status
        );
    }
    Ok(())
}

pub fn cmd_gate(
    project_dir: &std::path::Path,
    cli: &Cli,
    evidence: &str,
    pivots: Option<&str>,
) -> Result<()> {
    let config = GatekeeperConfig::new(project_dir.to_path_buf())?;
    let evidence: Evidence = read_json_arg(evidence, "evidence")?;
    let pivots: PivotCounts = match pivots {
        Some(arg) => read_json_arg(arg, "pivots")?,
        None => PivotCounts::default(),
    };

    let verdict = config.toml.gate().evaluate(&evidence, &pivots)?;
    if cli.json {
        return print_json(&verdict);
    }

    let proceed = if verdict.proceed {
        console::style("proceed").green().bold()
    } else {
        console::style("hold").red().bold()
    };
    println!("signal:         {}", verdict.signal);
    println!("recommendation: {}", verdict.recommendation);
    println!("decision:       {}", proceed);
    if verdict.limit_exhausted {
        println!(
            "{}",
            console::style("pivot limit exhausted, escalation required").yellow()
        );
    }
    if !verdict.rationale.is_empty() {
        println!("rationale:      {}", verdict.rationale);
    }
    Ok(())
}
