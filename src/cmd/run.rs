//! Run lifecycle commands: start, submit, record, evaluate, resume, kill.

use anyhow::Result;
use uuid::Uuid;

use gatekeeper::controller::{ExperimentInput, PhaseOutput, Step};
use gatekeeper::model::{ExperimentMetrics, Phase};

use super::{Context, print_json, read_json_arg};
use crate::Cli;

pub fn cmd_start(
    ctx: &Context,
    cli: &Cli,
    project: &str,
    user: &str,
    run_id: Option<Uuid>,
    input: Option<&str>,
) -> Result<()> {
    let input = match input {
        Some(arg) => read_json_arg(arg, "input")?,
        None => serde_json::json!({}),
    };
    let run_id = run_id.unwrap_or_else(Uuid::new_v4);
    let state = ctx.controller.start(run_id, project, user, input)?;

    if cli.json {
        return print_json(&state);
    }
    println!(
        "{} {}",
        console::style("Started run").green().bold(),
        state.run_id
    );
    println!(
        "  Phase {} ({}), submit a founders_brief to continue",
        state.current_phase.number(),
        state.current_phase
    );
    Ok(())
}

pub fn cmd_submit(
    ctx: &Context,
    cli: &Cli,
    run_id: Uuid,
    phase: Phase,
    task: &str,
    output: &str,
) -> Result<()> {
    let output: PhaseOutput = read_json_arg(output, "phase output")?;
    let step = ctx.controller.advance(run_id, phase, task, output)?;
    print_step(cli, run_id, &step)
}

pub fn cmd_record(
    ctx: &Context,
    cli: &Cli,
    run_id: Uuid,
    phase: Phase,
    metrics: &str,
    experiment_id: Option<Uuid>,
) -> Result<()> {
    let metrics: ExperimentMetrics = read_json_arg(metrics, "metrics")?;
    let experiment_id = experiment_id.unwrap_or_else(Uuid::new_v4);
    let task = format!("experiment:{}", experiment_id);
    let output = PhaseOutput::Experiment(ExperimentInput {
        experiment_id,
        metrics,
    });
    let step = ctx.controller.advance(run_id, phase, &task, output)?;
    print_step(cli, run_id, &step)
}

pub fn cmd_evaluate(ctx: &Context, cli: &Cli, run_id: Uuid, phase: Phase) -> Result<()> {
    let state = ctx.controller.status(run_id)?;
    let task = format!("evaluate:round-{}", state.current_round());
    let step = ctx
        .controller
        .advance(run_id, phase, &task, PhaseOutput::ExperimentsComplete)?;
    print_step(cli, run_id, &step)
}

pub fn cmd_resume(ctx: &Context, cli: &Cli, run_id: Uuid, reissue: bool) -> Result<()> {
    let step = if reissue {
        ctx.controller.reissue_checkpoint(run_id)?
    } else {
        let state = ctx.controller.status(run_id)?;
        let Some(request_id) = state.pending_request_id else {
            anyhow::bail!(
                "Run {} is {} with no pending checkpoint to resume",
                run_id,
                state.status
            );
        };
        ctx.controller.resume(run_id, request_id)?
    };
    print_step(cli, run_id, &step)
}

pub fn cmd_kill(ctx: &Context, cli: &Cli, run_id: Uuid, reason: &str) -> Result<()> {
    let step = ctx.controller.kill(run_id, reason)?;
    print_step(cli, run_id, &step)
}

pub fn print_step(cli: &Cli, run_id: Uuid, step: &Step) -> Result<()> {
    if cli.json {
        return print_json(step);
    }
    match step {
        Step::Stored { phase } => {
            println!("{} in phase {}", console::style("Stored").green(), phase);
        }
        Step::Recorded {
            experiment_id,
            duplicate,
        } => {
            if *duplicate {
                println!(
                    "Experiment {} {}",
                    experiment_id,
                    console::style("already recorded").dim()
                );
            } else {
                println!(
                    "{} experiment {}",
                    console::style("Recorded").green(),
                    experiment_id
                );
            }
        }
        Step::Duplicate => {
            println!("{}", console::style("Duplicate output, nothing changed").dim());
        }
        Step::Refine {
            phase,
            fit_iterations,
        } => {
            println!(
                "{} fit below threshold in {} (iteration {}), refine the canvas and reassess",
                console::style("Refine:").yellow().bold(),
                phase,
                fit_iterations
            );
        }
        Step::Paused {
            checkpoint,
            request_id,
        } => {
            println!(
                "{} at {}",
                console::style("Paused").yellow().bold(),
                console::style(checkpoint).cyan()
            );
            println!("  request: {}", request_id);
            println!("  resolve with: gatekeeper resolve {}", run_id);
        }
        Step::Advanced { from, to } => {
            println!(
                "{} {} → {}",
                console::style("Advanced").green().bold(),
                from,
                to
            );
        }
        Step::Pivoted { kind, to, attempt } => {
            println!(
                "{} {} pivot #{}, now in {}",
                console::style("Pivoted:").magenta().bold(),
                kind,
                attempt,
                to
            );
        }
        Step::Stayed { phase } => {
            println!("Staying in {} for another evidence round", phase);
        }
        Step::Completed { decision } => {
            println!(
                "{} final decision: {}",
                console::style("Completed").green().bold(),
                console::style(decision).bold()
            );
        }
        Step::Failed { message } => {
            println!("{} {}", console::style("Failed:").red().bold(), message);
        }
    }
    Ok(())
}
