//! `gatekeeper init`: create the `.gatekeeper/` directory of a project.
//!
//! ```text
//! .gatekeeper/
//! ├── gatekeeper.toml   # Thresholds, limits, hooks (defaults written on init)
//! ├── gatekeeper.db     # Run state, snapshots, approvals, experiments
//! ├── events.jsonl      # Append-only run event log
//! └── logs/             # Daily-rolling logs when [logging] file = true
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_DIR, CONFIG_FILE, GatekeeperToml};

#[derive(Debug)]
pub struct InitResult {
    pub config_dir: PathBuf,
    /// False when the directory already existed.
    pub created: bool,
}

/// Initialize a project. Existing files are never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let created = !config_dir.exists();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create directory: {}", config_dir.display()))?;
    ensure_directory_structure(&config_dir)?;
    Ok(InitResult {
        config_dir,
        created,
    })
}

fn ensure_directory_structure(config_dir: &Path) -> Result<()> {
    let logs_dir = config_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

    let config_file = config_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        GatekeeperToml::default().save(&config_file)?;
    }

    let events_file = config_dir.join("events.jsonl");
    if !events_file.exists() {
        std::fs::write(&events_file, "")
            .with_context(|| format!("Failed to create events log: {}", events_file.display()))?;
    }

    Ok(())
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(CONFIG_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_structure() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert_eq!(result.config_dir, dir.path().join(".gatekeeper"));
        assert!(result.config_dir.join("logs").is_dir());
        assert!(result.config_dir.join("events.jsonl").is_file());
        assert!(is_initialized(dir.path()));

        let toml = GatekeeperToml::load(&result.config_dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(toml, GatekeeperToml::default());
    }

    #[test]
    fn test_init_twice_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let first = init_project(dir.path()).unwrap();
        let config_file = first.config_dir.join(CONFIG_FILE);
        std::fs::write(&config_file, "[runs]\nmax_retries = 9\n").unwrap();

        let second = init_project(dir.path()).unwrap();
        assert!(!second.created);
        let toml = GatekeeperToml::load(&config_file).unwrap();
        assert_eq!(toml.runs.max_retries, 9);
    }

    #[test]
    fn test_is_initialized_false_for_new_project() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
    }
}
