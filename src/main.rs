use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use gatekeeper::model::Phase;

mod cmd;

#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(version, about = "Phase-gated startup validation with human checkpoints")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of styled text
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true, env = "GATEKEEPER_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .gatekeeper directory with a default configuration
    Init,
    /// Start a validation run at phase 0
    Start {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "cli")]
        user: String,
        /// Use this run id instead of generating one
        #[arg(long)]
        run_id: Option<Uuid>,
        /// Founder input as inline JSON or @path
        #[arg(long)]
        input: Option<String>,
    },
    /// Submit a phase output (JSON with a "kind" tag, inline or @path)
    Submit {
        run_id: Uuid,
        #[arg(long)]
        phase: Phase,
        #[arg(long, default_value = "submit")]
        task: String,
        #[arg(long)]
        output: String,
    },
    /// Record one experiment in the current round
    Record {
        run_id: Uuid,
        #[arg(long)]
        phase: Phase,
        /// Experiment metrics JSON with a "type" tag, inline or @path
        #[arg(long)]
        metrics: String,
        #[arg(long)]
        experiment_id: Option<Uuid>,
    },
    /// Mark the round complete and evaluate the phase gate
    Evaluate {
        run_id: Uuid,
        #[arg(long)]
        phase: Phase,
    },
    /// Resolve the pending checkpoint of a run
    Resolve {
        run_id: Uuid,
        /// Defaults to the run's pending request
        #[arg(long)]
        request: Option<Uuid>,
        /// approve, reject or modify; prompts when omitted
        #[arg(long)]
        decision: Option<String>,
        /// One of the checkpoint's options (e.g. segment, proceed)
        #[arg(long)]
        option: Option<String>,
        #[arg(long)]
        feedback: Option<String>,
        /// Replacement artifact JSON for modify, inline or @path
        #[arg(long)]
        modifications: Option<String>,
        #[arg(long)]
        rationale: Option<String>,
    },
    /// Re-drive a run whose checkpoint was resolved but not applied
    Resume {
        run_id: Uuid,
        /// Recreate a pending request lost between save and create
        #[arg(long)]
        reissue: bool,
    },
    /// Stop a run immediately
    Kill {
        run_id: Uuid,
        #[arg(long, default_value = "killed by operator")]
        reason: String,
    },
    /// Show the full state of a run
    Status { run_id: Uuid },
    /// List all runs
    List,
    /// List pending checkpoints and how long they have waited
    Pending,
    /// Show the transition log and saved versions of a run
    History { run_id: Uuid },
    /// Evaluate evidence against the configured gate without touching any run
    Gate {
        /// Evidence JSON with a "phase_kind" tag, inline or @path
        #[arg(long)]
        evidence: String,
        /// Pivot counters JSON, inline or @path
        #[arg(long)]
        pivots: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default gatekeeper.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Gate { evidence, pivots } => {
            cmd::cmd_gate(&project_dir, &cli, evidence, pivots.as_deref())?
        }
        command => {
            let ctx = cmd::Context::open(&project_dir, cli.verbose)?;
            match command {
                Commands::Start {
                    project,
                    user,
                    run_id,
                    input,
                } => cmd::cmd_start(&ctx, &cli, project, user, *run_id, input.as_deref())?,
                Commands::Submit {
                    run_id,
                    phase,
                    task,
                    output,
                } => cmd::cmd_submit(&ctx, &cli, *run_id, *phase, task, output)?,
                Commands::Record {
                    run_id,
                    phase,
                    metrics,
                    experiment_id,
                } => cmd::cmd_record(&ctx, &cli, *run_id, *phase, metrics, *experiment_id)?,
                Commands::Evaluate { run_id, phase } => {
                    cmd::cmd_evaluate(&ctx, &cli, *run_id, *phase)?
                }
                Commands::Resolve {
                    run_id,
                    request,
                    decision,
                    option,
                    feedback,
                    modifications,
                    rationale,
                } => cmd::cmd_resolve(
                    &ctx,
                    &cli,
                    *run_id,
                    cmd::ResolveArgs {
                        request: *request,
                        decision: decision.as_deref(),
                        option: option.as_deref(),
                        feedback: feedback.as_deref(),
                        modifications: modifications.as_deref(),
                        rationale: rationale.as_deref(),
                    },
                )?,
                Commands::Resume { run_id, reissue } => {
                    cmd::cmd_resume(&ctx, &cli, *run_id, *reissue)?
                }
                Commands::Kill { run_id, reason } => cmd::cmd_kill(&ctx, &cli, *run_id, reason)?,
                Commands::Status { run_id } => cmd::cmd_status(&ctx, &cli, *run_id)?,
                Commands::List => cmd::cmd_list(&ctx, &cli)?,
                Commands::Pending => cmd::cmd_pending(&ctx, &cli)?,
                Commands::History { run_id } => cmd::cmd_history(&ctx, &cli, *run_id)?,
                Commands::Init | Commands::Config { .. } | Commands::Gate { .. } => {}
            }
            ctx.flush_notifications().await;
        }
    }

    Ok(())
}
