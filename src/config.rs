//! Configuration read from `.gatekeeper/gatekeeper.toml`.
//!
//! Layering is file → environment → CLI. Every section is optional and falls
//! back to the built-in thresholds and limits.
//!
//! ```toml
//! [storage]
//! database = "gatekeeper.db"
//!
//! [gates]
//! fit_score = 70
//! min_problem_resonance = 0.3
//! max_zombie_ratio = 0.7
//! min_ltv_cac_ratio = 3.0
//!
//! [pivots]
//! segment = 3
//! value = 3
//! feature = 2
//! strategic = 2
//! fit_iterations = 3
//!
//! [runs]
//! max_retries = 3
//!
//! [[hitl.auto_approve]]
//! checkpoint = "approve_desirability_gate"
//! max_spend = 500.0
//!
//! [escalation]
//! email_after_mins = 15
//!
//! [[hooks]]
//! command = "./notify.sh"
//! events = ["checkpoint_reached"]
//! checkpoint = "approve_*_pivot"
//!
//! [webhook]
//! url = "https://example.com/gatekeeper"
//!
//! [logging]
//! level = "info"
//! json = false
//! file = true
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::ControllerSettings;
use crate::gate::{Gate, GateThresholds, PivotLimits};
use crate::hitl::{AutoApproveRule, ThresholdPolicy};
use crate::notify::{EscalationPolicy, HookConfig, WebhookConfig};

pub const CONFIG_DIR: &str = ".gatekeeper";
pub const CONFIG_FILE: &str = "gatekeeper.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Relative paths resolve against the `.gatekeeper` directory.
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("gatekeeper.db")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunsSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RunsSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitlSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve: Vec<AutoApproveRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when neither GATEKEEPER_LOG nor RUST_LOG is set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write a daily-rolling log under `.gatekeeper/logs`.
    #[serde(default)]
    pub file: bool,
}

fn default_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: false,
        }
    }
}

/// The complete gatekeeper.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub gates: GateThresholds,
    #[serde(default)]
    pub pivots: PivotLimits,
    #[serde(default)]
    pub runs: RunsSection,
    #[serde(default)]
    pub hitl: HitlSection,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl GatekeeperToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse gatekeeper.toml")
    }

    /// Returns defaults when the file does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize gatekeeper.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn gate(&self) -> Gate {
        Gate::new(self.gates, self.pivots)
    }

    pub fn auto_approve_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.hitl.auto_approve.clone())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.gates.fit_score > 100 {
            warnings.push(format!(
                "gates.fit_score {} is above 100 and can never pass",
                self.gates.fit_score
            ));
        }
        for (name, value) in [
            ("gates.min_problem_resonance", self.gates.min_problem_resonance),
            ("gates.max_zombie_ratio", self.gates.max_zombie_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                warnings.push(format!("{} {} is outside [0, 1]", name, value));
            }
        }
        if self.gates.min_ltv_cac_ratio < 0.0 {
            warnings.push("gates.min_ltv_cac_ratio is negative".to_string());
        }
        if self.pivots.strategic == 0 {
            warnings.push("pivots.strategic = 0 kills every run on its first weak ratio".to_string());
        }
        if self.pivots.fit_iterations == 0 {
            warnings.push("pivots.fit_iterations = 0 escalates every weak fit".to_string());
        }
        if self.runs.max_retries == 0 {
            warnings.push("runs.max_retries = 0 fails a run on its first transient error".to_string());
        }

        for rule in &self.hitl.auto_approve {
            if rule.checkpoint == crate::model::Checkpoint::ApprovePivotEscalation {
                warnings.push(
                    "hitl.auto_approve rule for approve_pivot_escalation is ignored".to_string(),
                );
            }
            if !rule.always && rule.max_spend.is_none() {
                warnings.push(format!(
                    "hitl.auto_approve rule for {} has neither max_spend nor always and never fires",
                    rule.checkpoint
                ));
            }
        }

        warnings.extend(self.escalation.validate());

        for hook in &self.hooks {
            if hook.command.trim().is_empty() {
                warnings.push("hooks entry has an empty command".to_string());
            }
            if hook.timeout_secs == 0 {
                warnings.push(format!("hook '{}' has timeout_secs = 0", hook.command));
            }
        }

        if let Some(webhook) = &self.webhook
            && !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://"))
        {
            warnings.push(format!("webhook.url '{}' is not an http(s) URL", webhook.url));
        }

        warnings
    }
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: GatekeeperToml,
}

impl GatekeeperConfig {
    /// Load `.gatekeeper/gatekeeper.toml` (if present), `.env`, and env overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let _ = dotenvy::from_path(project_dir.join(".env"));
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = GatekeeperToml::load_or_default(&config_dir)?;
        apply_env_overrides(&mut toml)?;
        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.config_dir.is_dir()
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        let db = &self.toml.storage.database;
        if db.is_absolute() {
            db.clone()
        } else {
            self.config_dir.join(db)
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn events_file(&self) -> PathBuf {
        self.config_dir.join("events.jsonl")
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            gate: self.toml.gate(),
            max_retries: self.toml.runs.max_retries,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn apply_env_overrides(toml: &mut GatekeeperToml) -> Result<()> {
    if let Ok(db) = std::env::var("GATEKEEPER_DB")
        && !db.is_empty()
    {
        toml.storage.database = PathBuf::from(db);
    }
    if let Ok(retries) = std::env::var("GATEKEEPER_MAX_RETRIES") {
        toml.runs.max_retries = retries
            .parse()
            .with_context(|| format!("Invalid GATEKEEPER_MAX_RETRIES '{}'", retries))?;
    }
    if let Ok(url) = std::env::var("GATEKEEPER_WEBHOOK_URL")
        && !url.is_empty()
    {
        match toml.webhook.as_mut() {
            Some(webhook) => webhook.url = url,
            None => {
                toml.webhook = Some(WebhookConfig {
                    url,
                    timeout_secs: 10,
                    events: Vec::new(),
                })
            }
        }
    }
    Ok(())
}
