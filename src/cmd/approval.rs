//! Checkpoint commands: `gatekeeper resolve` and `gatekeeper pending`.

use anyhow::Result;
use chrono::Utc;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use uuid::Uuid;

use gatekeeper::model::{ApprovalRequest, Decision, DecisionOutcome};

use super::run::print_step;
use super::{Context, print_json, read_json_arg};
use crate::Cli;

pub struct ResolveArgs<'a> {
    pub request: Option<Uuid>,
    pub decision: Option<&'a str>,
    pub option: Option<&'a str>,
    pub feedback: Option<&'a str>,
    pub modifications: Option<&'a str>,
    pub rationale: Option<&'a str>,
}

pub fn cmd_resolve(ctx: &Context, cli: &Cli, run_id: Uuid, args: ResolveArgs<'_>) -> Result<()> {
    let request_id = match args.request {
        Some(id) => id,
        None => {
            let state = ctx.controller.status(run_id)?;
            let Some(id) = state.pending_request_id else {
                anyhow::bail!("Run {} is {} with no pending checkpoint", run_id, state.status);
            };
            id
        }
    };

    let decision = match args.decision {
        Some(outcome) => {
            let outcome: DecisionOutcome = outcome.parse().map_err(anyhow::Error::msg)?;
            let modifications = args
                .modifications
                .map(|m| read_json_arg::<serde_json::Value>(m, "modifications"))
                .transpose()?;
            Decision {
                outcome,
                option: args.option.map(str::to_string),
                feedback: args.feedback.map(str::to_string),
                modifications,
            }
        }
        None => {
            let request = ctx.controller.broker().get(request_id)?;
            prompt_decision(&request)?
        }
    };

    let step = ctx.controller.resolve_checkpoint(
        run_id,
        request_id,
        decision,
        args.rationale.map(str::to_string),
    )?;
    print_step(cli, run_id, &step)
}

/// Ask for a decision interactively.
fn prompt_decision(request: &ApprovalRequest) -> Result<Decision> {
    println!();
    println!(
        "{} {} (phase {})",
        console::style("Checkpoint").bold(),
        console::style(request.checkpoint).cyan().bold(),
        request.phase
    );
    if !request.context.is_null() {
        println!("{}", serde_json::to_string_pretty(&request.context)?);
    }
    println!();

    let mut items: Vec<String> = if request.options.is_empty() {
        vec!["Approve".to_string()]
    } else {
        request
            .options
            .iter()
            .map(|o| format!("Approve: {}", o))
            .collect()
    };
    items.push("Reject".to_string());

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Decision")
        .items(&items)
        .default(0)
        .interact()?;

    if selection == items.len() - 1 {
        let feedback: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Feedback")
            .allow_empty(true)
            .interact_text()?;
        return Ok(Decision::reject(feedback));
    }

    let decision = Decision::approve();
    Ok(match request.options.get(selection) {
        Some(option) => decision.with_option(option.clone()),
        None => decision,
    })
}

pub fn cmd_pending(ctx: &Context, cli: &Cli) -> Result<()> {
    let pending = ctx.controller.pending()?;
    let policy = &ctx.config.toml.escalation;
    let now = Utc::now();

    if cli.json {
        let rows: Vec<_> = pending
            .iter()
            .map(|req| {
                serde_json::json!({
                    "request": req,
                    "escalation_tier": policy.tier_for_request(req, now),
                })
            })
            .collect();
        return print_json(&rows);
    }

    if pending.is_empty() {
        println!("No pending checkpoints.");
        return Ok(());
    }

    println!("{}", console::style("Pending checkpoints").bold().cyan());
    for req in &pending {
        let age = now - req.created_at;
        let tier = policy.tier_for_request(req, now);
        println!(
            "  {}  {:<28} phase {}  waiting {}m  escalation: {}",
            req.run_id,
            req.checkpoint.as_str(),
            req.phase.number(),
            age.num_minutes(),
            tier
        );
    }
    Ok(())
}
