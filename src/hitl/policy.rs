//! Auto-approve policies evaluated when an approval request is created.

use serde::{Deserialize, Serialize};

use crate::model::{ApprovalRequest, Checkpoint};

pub trait AutoApprovePolicy: Send + Sync {
    /// Returns a rationale when the request may be approved without a human.
    fn auto_approve(&self, request: &ApprovalRequest) -> Option<String>;
}

/// Every checkpoint waits for a human.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAutoApprove;

impl AutoApprovePolicy for NeverAutoApprove {
    fn auto_approve(&self, _request: &ApprovalRequest) -> Option<String> {
        None
    }
}

/// One `[[hitl.auto_approve]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApproveRule {
    pub checkpoint: Checkpoint,
    /// Approve when the context's `estimated_spend` is at or below this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spend: Option<f64>,
    /// Approve unconditionally.
    #[serde(default)]
    pub always: bool,
}

/// Per-checkpoint rules. The terminal escalation decision is never automated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    #[serde(default)]
    pub rules: Vec<AutoApproveRule>,
}

impl ThresholdPolicy {
    pub fn new(rules: Vec<AutoApproveRule>) -> Self {
        Self { rules }
    }
}

impl AutoApprovePolicy for ThresholdPolicy {
    fn auto_approve(&self, request: &ApprovalRequest) -> Option<String> {
        if request.checkpoint == Checkpoint::ApprovePivotEscalation {
            return None;
        }
        let spend = request
            .context
            .get("estimated_spend")
            .and_then(|v| v.as_f64());

        self.rules
            .iter()
            .filter(|rule| rule.checkpoint == request.checkpoint)
            .find_map(|rule| {
                if rule.always {
                    return Some(format!("auto-approved: {} always allowed", rule.checkpoint));
                }
                match (rule.max_spend, spend) {
                    (Some(max), Some(spend)) if spend <= max => Some(format!(
                        "auto-approved: estimated spend {:.2} within {:.2}",
                        spend, max
                    )),
                    _ => None,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use uuid::Uuid;

    fn request(checkpoint: Checkpoint, context: serde_json::Value) -> ApprovalRequest {
        ApprovalRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            checkpoint,
            Phase::Desirability,
            context,
        )
    }

    #[test]
    fn test_never_policy() {
        let req = request(Checkpoint::ApproveDesirabilityGate, serde_json::json!({}));
        assert!(NeverAutoApprove.auto_approve(&req).is_none());
    }

    #[test]
    fn test_spend_threshold() {
        let policy = ThresholdPolicy::new(vec![AutoApproveRule {
            checkpoint: Checkpoint::ApproveDesirabilityGate,
            max_spend: Some(500.0),
            always: false,
        }]);
        let cheap = request(
            Checkpoint::ApproveDesirabilityGate,
            serde_json::json!({"estimated_spend": 120.0}),
        );
        assert!(policy.auto_approve(&cheap).is_some());

        let expensive = request(
            Checkpoint::ApproveDesirabilityGate,
            serde_json::json!({"estimated_spend": 900}),
        );
        assert!(policy.auto_approve(&expensive).is_none());

        let unknown_spend = request(Checkpoint::ApproveDesirabilityGate, serde_json::json!({}));
        assert!(policy.auto_approve(&unknown_spend).is_none());

        let other_checkpoint = request(
            Checkpoint::ApproveFeasibilityGate,
            serde_json::json!({"estimated_spend": 1.0}),
        );
        assert!(policy.auto_approve(&other_checkpoint).is_none());
    }

    #[test]
    fn test_escalation_is_never_automated() {
        let policy = ThresholdPolicy::new(vec![AutoApproveRule {
            checkpoint: Checkpoint::ApprovePivotEscalation,
            max_spend: None,
            always: true,
        }]);
        let req = request(Checkpoint::ApprovePivotEscalation, serde_json::json!({}));
        assert!(policy.auto_approve(&req).is_none());
    }

    #[test]
    fn test_rules_parse_from_toml() {
        let policy: ThresholdPolicy = toml::from_str(
            r#"
            [[rules]]
            checkpoint = "approve_founders_brief"
            always = true

            [[rules]]
            checkpoint = "approve_feasibility_gate"
            max_spend = 250.0
            "#,
        )
        .unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert!(policy.rules[0].always);
        assert_eq!(policy.rules[1].max_spend, Some(250.0));
    }
}
