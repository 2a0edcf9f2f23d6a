//! Command hooks: a shell command per event, event JSON on stdin.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::Channel;
use crate::events::{EventType, RunEvent};

/// One `[[hooks]]` entry in gatekeeper.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    pub command: String,
    /// Event types to fire on; empty means all.
    #[serde(default)]
    pub events: Vec<EventType>,
    /// Glob over checkpoint names, e.g. `approve_*_pivot`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    30
}

pub struct CommandHook {
    config: HookConfig,
    project_dir: PathBuf,
}

impl CommandHook {
    pub fn new(config: HookConfig, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
        }
    }

    fn working_dir(&self) -> PathBuf {
        match &self.config.working_dir {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.project_dir.join(p),
            None => self.project_dir.clone(),
        }
    }
}

#[async_trait]
impl Channel for CommandHook {
    fn name(&self) -> String {
        format!("hook:{}", self.config.command)
    }

    fn accepts(&self, event: &RunEvent) -> bool {
        if !self.config.events.is_empty() && !self.config.events.contains(&event.event_type) {
            return false;
        }
        match &self.config.checkpoint {
            None => true,
            Some(pattern) => event
                .checkpoint()
                .is_some_and(|c| pattern_matches(pattern, c.as_str())),
        }
    }

    async fn deliver(&self, event: &RunEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to serialize event")?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.config.command)
            .current_dir(self.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .env("GATEKEEPER_EVENT", event.event_type.as_str())
            .env("GATEKEEPER_RUN_ID", event.run_id.to_string())
            .env("GATEKEEPER_PHASE", event.phase.number().to_string())
            .env(
                "GATEKEEPER_CHECKPOINT",
                event.checkpoint().map(|c| c.as_str()).unwrap_or(""),
            )
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn hook command: {}", self.config.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .context("Failed to write event to hook stdin")?;
        }

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!("Hook timed out after {} seconds", self.config.timeout_secs)
        })?
        .context("Failed to wait for hook command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Hook exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    glob_match(&pattern, &name)
}

fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some(('?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, Phase};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn hook(command: &str) -> HookConfig {
        HookConfig {
            command: command.into(),
            events: vec![],
            checkpoint: None,
            timeout_secs: 5,
            working_dir: None,
        }
    }

    fn pivot_event() -> RunEvent {
        RunEvent::checkpoint_reached(
            Uuid::new_v4(),
            Phase::Desirability,
            Checkpoint::ApproveSegmentPivot,
            Uuid::new_v4(),
            &serde_json::json!({}),
        )
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("approve_*_pivot", "approve_segment_pivot"));
        assert!(pattern_matches("*", "approve_viability_gate"));
        assert!(pattern_matches("APPROVE_?ALUE_PIVOT", "approve_value_pivot"));
        assert!(!pattern_matches("approve_*_pivot", "approve_pivot_escalation"));
    }

    #[test]
    fn test_accepts_filters_by_event_and_checkpoint() {
        let mut config = hook("true");
        config.checkpoint = Some("approve_*_pivot".into());
        let channel = CommandHook::new(config, ".");
        assert!(channel.accepts(&pivot_event()));
        assert!(!channel.accepts(&RunEvent::phase_complete(
            Uuid::new_v4(),
            Phase::Onboarding,
            Phase::VpcDiscovery
        )));

        let mut only_errors = hook("true");
        only_errors.events = vec![EventType::Error];
        assert!(!CommandHook::new(only_errors, ".").accepts(&pivot_event()));
    }

    #[tokio::test]
    async fn test_hook_receives_event_on_stdin() {
        let dir = TempDir::new().unwrap();
        let channel = CommandHook::new(
            hook("cat > event.json && echo \"$GATEKEEPER_EVENT\" > kind.txt"),
            dir.path(),
        );
        channel.deliver(&pivot_event()).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("event.json")).unwrap();
        let event: RunEvent = serde_json::from_str(&written).unwrap();
        assert_eq!(event.checkpoint(), Some(Checkpoint::ApproveSegmentPivot));
        let kind = std::fs::read_to_string(dir.path().join("kind.txt")).unwrap();
        assert_eq!(kind.trim(), "checkpoint_reached");
    }

    #[tokio::test]
    async fn test_failing_hook_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let channel = CommandHook::new(hook("echo nope >&2; exit 3"), dir.path());
        let err = channel.deliver(&pivot_event()).await.unwrap_err();
        assert!(err.to_string().contains("code 3"));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_hook_timeout() {
        let dir = TempDir::new().unwrap();
        let mut config = hook("sleep 5");
        config.timeout_secs = 1;
        let err = CommandHook::new(config, dir.path())
            .deliver(&pivot_event())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
