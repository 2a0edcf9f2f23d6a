use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Channel;
use crate::events::{EventType, RunEvent};

/// The `[webhook]` section of gatekeeper.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Event types to post; empty means all.
    #[serde(default)]
    pub events: Vec<EventType>,
}

fn default_timeout() -> u64 {
    10
}

/// POSTs each event as JSON.
pub struct WebhookChannel {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> String {
        format!("webhook:{}", self.config.url)
    }

    fn accepts(&self, event: &RunEvent) -> bool {
        self.config.events.is_empty() || self.config.events.contains(&event.event_type)
    }

    async fn deliver(&self, event: &RunEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.config.url)
            .header("X-Gatekeeper-Event", event.event_type.as_str())
            .json(event)
            .send()
            .await
            .with_context(|| format!("Failed to POST event to {}", self.config.url))?
            .error_for_status()
            .context("Webhook endpoint returned error status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use uuid::Uuid;

    #[test]
    fn test_config_defaults() {
        let config: WebhookConfig = toml::from_str(r#"url = "http://localhost:9/hook""#).unwrap();
        assert_eq!(config.timeout_secs, 10);
        assert!(config.events.is_empty());
    }

    #[test]
    fn test_accepts_filtered_events() {
        let channel = WebhookChannel::new(WebhookConfig {
            url: "http://localhost:9/hook".into(),
            timeout_secs: 1,
            events: vec![EventType::RunComplete],
        })
        .unwrap();
        let run = Uuid::new_v4();
        assert!(channel.accepts(&RunEvent::run_complete(run, Phase::Viability, "proceed")));
        assert!(!channel.accepts(&RunEvent::error(run, Phase::Viability, "boom")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let channel = WebhookChannel::new(WebhookConfig {
            url: "http://127.0.0.1:9/hook".into(),
            timeout_secs: 1,
            events: vec![],
        })
        .unwrap();
        let event = RunEvent::error(Uuid::new_v4(), Phase::Onboarding, "boom");
        assert!(channel.deliver(&event).await.is_err());
    }
}
