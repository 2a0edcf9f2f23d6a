//! Delivery of run events to the outside world.
//!
//! The controller never waits on delivery: events land in a sink first and
//! the notifier pushes them to every configured channel concurrently.

pub mod escalation;
pub mod hooks;
pub mod webhook;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EventType, RunEvent};

pub use escalation::{EscalationPolicy, EscalationTier, escalation_tier};
pub use hooks::{CommandHook, HookConfig};
pub use webhook::{WebhookChannel, WebhookConfig};

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> String;

    /// Whether this channel wants the event at all.
    fn accepts(&self, _event: &RunEvent) -> bool {
        true
    }

    async fn deliver(&self, event: &RunEvent) -> anyhow::Result<()>;
}

/// Outcome of one event on one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub channel: String,
    pub run_id: Uuid,
    pub event_type: EventType,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default)]
pub struct Notifier {
    channels: Vec<Box<dyn Channel>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver every event to every accepting channel. Failures are reported,
    /// never raised.
    pub async fn dispatch(&self, events: &[RunEvent]) -> Vec<DeliveryReport> {
        let deliveries = events.iter().flat_map(|event| {
            self.channels
                .iter()
                .filter(move |channel| channel.accepts(event))
                .map(move |channel| async move {
                    let result = channel.deliver(event).await;
                    let name = channel.name();
                    match &result {
                        Ok(()) => debug!(channel = %name, run_id = %event.run_id, "Event delivered"),
                        Err(e) => warn!(
                            channel = %name,
                            run_id = %event.run_id,
                            event_type = %event.event_type,
                            error = %e,
                            "Event delivery failed"
                        ),
                    }
                    DeliveryReport {
                        channel: name,
                        run_id: event.run_id,
                        event_type: event.event_type,
                        error: result.err().map(|e| format!("{:#}", e)),
                    }
                })
        });
        join_all(deliveries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, Phase};
    use std::sync::Mutex;
    use std::sync::Arc;

    struct Recorder {
        seen: Arc<Mutex<Vec<EventType>>>,
        only: Option<EventType>,
    }

    #[async_trait]
    impl Channel for Recorder {
        fn name(&self) -> String {
            "recorder".into()
        }

        fn accepts(&self, event: &RunEvent) -> bool {
            self.only.is_none_or(|t| t == event.event_type)
        }

        async fn deliver(&self, event: &RunEvent) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Channel for Broken {
        fn name(&self) -> String {
            "broken".into()
        }

        async fn deliver(&self, _event: &RunEvent) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_dispatch_filters_and_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = Notifier::new();
        notifier.add_channel(Box::new(Recorder {
            seen: seen.clone(),
            only: Some(EventType::CheckpointReached),
        }));
        notifier.add_channel(Box::new(Broken));

        let run = Uuid::new_v4();
        let events = vec![
            RunEvent::checkpoint_reached(
                run,
                Phase::Feasibility,
                Checkpoint::ApproveFeaturePivot,
                Uuid::new_v4(),
                &serde_json::json!({}),
            ),
            RunEvent::phase_complete(run, Phase::Feasibility, Phase::Viability),
        ];
        let reports = notifier.dispatch(&events).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().filter(|r| !r.is_ok()).count(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![EventType::CheckpointReached]);
    }
}
