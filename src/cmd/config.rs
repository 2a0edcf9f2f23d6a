//! Configuration view and validation commands: `gatekeeper config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use gatekeeper::config::{CONFIG_DIR, CONFIG_FILE, GatekeeperConfig, GatekeeperToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Gatekeeper Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No gatekeeper.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include env overrides.
            let config = GatekeeperConfig::new(project_dir.to_path_buf())?;
            let toml = &config.toml;

            println!("[storage]");
            println!("  database = \"{}\"", config.database_path().display());
            println!();
            println!("[gates]");
            println!("  fit_score = {}", toml.gates.fit_score);
            println!("  min_problem_resonance = {}", toml.gates.min_problem_resonance);
            println!("  max_zombie_ratio = {}", toml.gates.max_zombie_ratio);
            println!("  min_ltv_cac_ratio = {}", toml.gates.min_ltv_cac_ratio);
            println!();
            println!("[pivots]");
            println!("  segment = {}", toml.pivots.segment);
            println!("  value = {}", toml.pivots.value);
            println!("  feature = {}", toml.pivots.feature);
            println!("  strategic = {}", toml.pivots.strategic);
            println!("  fit_iterations = {}", toml.pivots.fit_iterations);
            println!();
            println!("[runs]");
            println!("  max_retries = {}", toml.runs.max_retries);
            println!();

            if !toml.hitl.auto_approve.is_empty() {
                println!("[hitl.auto_approve]");
                for rule in &toml.hitl.auto_approve {
                    match (rule.always, rule.max_spend) {
                        (true, _) => println!("  {} = always", rule.checkpoint),
                        (false, Some(max)) => {
                            println!("  {} when estimated_spend <= {}", rule.checkpoint, max)
                        }
                        (false, None) => println!("  {} = never", rule.checkpoint),
                    }
                }
                println!();
            }

            println!("[escalation]");
            println!("  email_after_mins = {}", toml.escalation.email_after_mins);
            println!("  sms_after_mins = {}", toml.escalation.sms_after_mins);
            println!("  backup_after_mins = {}", toml.escalation.backup_after_mins);
            println!();

            if !toml.hooks.is_empty() {
                println!("[[hooks]]");
                for hook in &toml.hooks {
                    println!(
                        "  \"{}\" (timeout {}s{})",
                        hook.command,
                        hook.timeout_secs,
                        hook.checkpoint
                            .as_ref()
                            .map(|c| format!(", checkpoint {}", c))
                            .unwrap_or_default()
                    );
                }
                println!();
            }

            if let Some(webhook) = &toml.webhook {
                println!("[webhook]");
                println!("  url = \"{}\"", webhook.url);
                println!("  timeout_secs = {}", webhook.timeout_secs);
                println!();
            }

            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  json = {}", toml.logging.json);
            println!("  file = {}", toml.logging.file);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No gatekeeper.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = GatekeeperToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("gatekeeper.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            GatekeeperToml::default().save(&config_path)?;

            println!("Created gatekeeper.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [gates] thresholds and [pivots] limits");
            println!("  - [[hitl.auto_approve]] rules per checkpoint");
            println!("  - [[hooks]] and [webhook] for notifications");
            println!();
        }
    }

    Ok(())
}
