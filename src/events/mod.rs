//! Outbound run events.
//!
//! The controller emits an event only after the state change it describes has
//! been saved. Sinks are synchronous and must not block for long; delivery to
//! slow channels goes through `BufferedSink` and the async notifier.

pub mod jsonl;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::model::{Checkpoint, Phase};

pub use jsonl::JsonlSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CheckpointReached,
    PhaseComplete,
    RunComplete,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckpointReached => "checkpoint_reached",
            Self::PhaseComplete => "phase_complete",
            Self::RunComplete => "run_complete",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub event_type: EventType,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl RunEvent {
    pub fn new(run_id: Uuid, event_type: EventType, phase: Phase, context: serde_json::Value) -> Self {
        Self {
            run_id,
            event_type,
            phase,
            timestamp: Utc::now(),
            context,
        }
    }

    pub fn checkpoint_reached(
        run_id: Uuid,
        phase: Phase,
        checkpoint: Checkpoint,
        request_id: Uuid,
        context: &serde_json::Value,
    ) -> Self {
        Self::new(
            run_id,
            EventType::CheckpointReached,
            phase,
            serde_json::json!({
                "checkpoint": checkpoint,
                "request_id": request_id,
                "details": context,
            }),
        )
    }

    pub fn phase_complete(run_id: Uuid, from: Phase, to: Phase) -> Self {
        Self::new(
            run_id,
            EventType::PhaseComplete,
            from,
            serde_json::json!({ "next_phase": to }),
        )
    }

    pub fn run_complete(run_id: Uuid, phase: Phase, decision: &str) -> Self {
        Self::new(
            run_id,
            EventType::RunComplete,
            phase,
            serde_json::json!({ "final_decision": decision }),
        )
    }

    pub fn error(run_id: Uuid, phase: Phase, message: &str) -> Self {
        Self::new(
            run_id,
            EventType::Error,
            phase,
            serde_json::json!({ "message": message }),
        )
    }

    /// The checkpoint named in a `checkpoint_reached` event.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.context
            .get("checkpoint")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent) -> anyhow::Result<()>;
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) -> anyhow::Result<()> {
        info!(
            run_id = %event.run_id,
            event_type = %event.event_type,
            phase = %event.phase,
            context = %event.context,
            "Run event"
        );
        Ok(())
    }
}

/// Collects events in memory until drained.
#[derive(Debug, Default)]
pub struct BufferedSink {
    events: Mutex<Vec<RunEvent>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for BufferedSink {
    fn emit(&self, event: &RunEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("event buffer lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Delivers to every inner sink; reports the first failure after trying all.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &RunEvent) -> anyhow::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &RunEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = RunEvent::checkpoint_reached(
            Uuid::new_v4(),
            Phase::Desirability,
            Checkpoint::ApproveSegmentPivot,
            Uuid::new_v4(),
            &serde_json::json!({"signal": "no_interest"}),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "checkpoint_reached");
        assert_eq!(json["phase"], 2);
        assert_eq!(json["context"]["checkpoint"], "approve_segment_pivot");
        assert_eq!(event.checkpoint(), Some(Checkpoint::ApproveSegmentPivot));
    }

    #[test]
    fn test_buffered_sink_drains() {
        let sink = BufferedSink::new();
        sink.emit(&RunEvent::phase_complete(
            Uuid::new_v4(),
            Phase::Onboarding,
            Phase::VpcDiscovery,
        ))
        .unwrap();
        assert_eq!(sink.len(), 1);
        let drained = sink.drain();
        assert_eq!(drained[0].event_type, EventType::PhaseComplete);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fanout_delivers_to_all_and_reports_failure() {
        let buffer = Arc::new(BufferedSink::new());
        let fanout = FanoutSink::new()
            .with(Arc::new(FailingSink))
            .with(buffer.clone());
        let result = fanout.emit(&RunEvent::error(Uuid::new_v4(), Phase::Viability, "boom"));
        assert!(result.is_err());
        assert_eq!(buffer.len(), 1);
    }
}
