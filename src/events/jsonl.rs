use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use super::{EventSink, RunEvent};

/// Appends one JSON line per event. An exclusive file lock keeps lines from
/// concurrent CLI processes intact.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event back, oldest first.
    pub fn read_all(&self) -> Result<Vec<RunEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        BufReader::new(file)
            .lines()
            .filter(|line| line.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true))
            .map(|line| {
                let line = line.context("Failed to read event line")?;
                serde_json::from_str(&line).context("Failed to parse event line")
            })
            .collect()
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &RunEvent) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        file.lock_exclusive().context("Failed to lock event log")?;
        let written = file.write_all(line.as_bytes());
        let unlocked = FileExt::unlock(&file);
        written.context("Failed to write event")?;
        unlocked.context("Failed to unlock event log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::model::Phase;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_appends_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path().join("nested").join("events.jsonl"));
        let run = Uuid::new_v4();
        sink.emit(&RunEvent::phase_complete(run, Phase::Onboarding, Phase::VpcDiscovery))
            .unwrap();
        sink.emit(&RunEvent::run_complete(run, Phase::Viability, "proceed"))
            .unwrap();

        let events = sink.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::RunComplete);
        assert_eq!(events[1].context["final_decision"], "proceed");
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path().join("events.jsonl"));
        assert!(sink.read_all().unwrap().is_empty());
    }
}
