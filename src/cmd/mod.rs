//! CLI command implementations.
//!
//! | Module     | Commands handled                                        |
//! |------------|---------------------------------------------------------|
//! | `project`  | `Init`                                                  |
//! | `run`      | `Start`, `Submit`, `Record`, `Evaluate`, `Resume`, `Kill` |
//! | `approval` | `Resolve`, `Pending`                                    |
//! | `inspect`  | `Status`, `List`, `History`, `Gate`                     |
//! | `config`   | `Config`                                                |

pub mod approval;
pub mod config;
pub mod inspect;
pub mod project;
pub mod run;

pub use approval::{ResolveArgs, cmd_pending, cmd_resolve};
pub use config::cmd_config;
pub use inspect::{cmd_gate, cmd_history, cmd_list, cmd_status};
pub use project::cmd_init;
pub use run::{cmd_evaluate, cmd_kill, cmd_record, cmd_resume, cmd_start, cmd_submit};

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::de::DeserializeOwned;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::controller::RunController;
use gatekeeper::events::{BufferedSink, FanoutSink, JsonlSink, TracingSink};
use gatekeeper::logging::{self, LoggingGuard};
use gatekeeper::notify::{CommandHook, Notifier, WebhookChannel};
use gatekeeper::store::SqliteStore;

/// Everything a run command needs: config, an open controller, and the
/// buffered events waiting for notification.
pub struct Context {
    pub config: GatekeeperConfig,
    pub controller: RunController<SqliteStore>,
    buffer: Arc<BufferedSink>,
    notifier: Notifier,
    _logging: LoggingGuard,
}

impl Context {
    pub fn open(project_dir: &Path, verbose: bool) -> Result<Self> {
        let config = GatekeeperConfig::new(project_dir.to_path_buf())?;
        if !config.is_initialized() {
            anyhow::bail!(
                "No .gatekeeper directory in {}. Run 'gatekeeper init' first.",
                config.project_dir.display()
            );
        }

        let logging = logging::init(&config.toml.logging, Some(&config.log_dir()), verbose)?;

        let db_path = config.database_path();
        let store = SqliteStore::new(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        let buffer = Arc::new(BufferedSink::new());
        let sink = FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(JsonlSink::new(config.events_file())))
            .with(buffer.clone());

        let controller = RunController::new(Arc::new(store), config.controller_settings())
            .with_policy(Arc::new(config.toml.auto_approve_policy()))
            .with_sink(Arc::new(sink));

        let mut notifier = Notifier::new();
        for hook in &config.toml.hooks {
            notifier.add_channel(Box::new(CommandHook::new(
                hook.clone(),
                config.project_dir.clone(),
            )));
        }
        if let Some(webhook) = &config.toml.webhook {
            notifier.add_channel(Box::new(WebhookChannel::new(webhook.clone())?));
        }

        Ok(Self {
            config,
            controller,
            buffer,
            notifier,
            _logging: logging,
        })
    }

    /// Push buffered events to hooks and the webhook. Failures are logged only.
    pub async fn flush_notifications(&self) {
        let events = self.buffer.drain();
        if events.is_empty() || self.notifier.is_empty() {
            return;
        }
        let reports = self.notifier.dispatch(&events).await;
        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            eprintln!(
                "{} {} of {} notifications failed (see logs)",
                console::style("warning:").yellow().bold(),
                failed,
                reports.len()
            );
        }
    }
}

/// Read a JSON argument: inline text, `@path`, or `-` for stdin.
pub fn read_json_arg<T: DeserializeOwned>(arg: &str, what: &str) -> Result<T> {
    let content = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .with_context(|| format!("Failed to read {} from stdin", what))?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} file: {}", what, path))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&content).with_context(|| format!("Invalid {} JSON", what))
}

/// Print a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
