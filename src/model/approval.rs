//! Approval requests raised at HITL checkpoints and the decisions that
//! resolve them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::phase::{Checkpoint, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
    /// Discarded because the run was killed while paused.
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Modified => "modified",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "modified" => Ok(Self::Modified),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid approval status: {}", s)),
        }
    }
}

/// The human (or policy) verdict on a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    /// Approved with changes carried in `Decision::modifications`.
    Modified,
}

impl DecisionOutcome {
    pub fn is_approval(self) -> bool {
        matches!(self, DecisionOutcome::Approved | DecisionOutcome::Modified)
    }

    pub fn status(self) -> ApprovalStatus {
        match self {
            DecisionOutcome::Approved => ApprovalStatus::Approved,
            DecisionOutcome::Rejected => ApprovalStatus::Rejected,
            DecisionOutcome::Modified => ApprovalStatus::Modified,
        }
    }
}

impl FromStr for DecisionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approved),
            "reject" | "rejected" => Ok(Self::Rejected),
            "modify" | "modified" => Ok(Self::Modified),
            _ => Err(format!(
                "Invalid decision '{}'. Valid values: approve, reject, modify",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    /// One of the checkpoint's offered options, when it offers any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Replacement payload for `modified` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<serde_json::Value>,
}

impl Decision {
    pub fn approve() -> Self {
        Self {
            outcome: DecisionOutcome::Approved,
            option: None,
            feedback: None,
            modifications: None,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            outcome: DecisionOutcome::Rejected,
            option: None,
            feedback: Some(feedback.into()),
            modifications: None,
        }
    }

    pub fn modify(modifications: serde_json::Value) -> Self {
        Self {
            outcome: DecisionOutcome::Modified,
            option: None,
            feedback: None,
            modifications: Some(modifications),
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.option = Some(option.into());
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Human,
    AutoPolicy,
    /// Closed by the controller, e.g. a kill while paused.
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub run_id: Uuid,
    pub checkpoint: Checkpoint,
    pub phase: Phase,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub options: Vec<String>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<ResolvedBy>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        id: Uuid,
        run_id: Uuid,
        checkpoint: Checkpoint,
        phase: Phase,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id,
            run_id,
            checkpoint,
            phase,
            context,
            options: checkpoint.options().iter().map(|o| o.to_string()).collect(),
            status: ApprovalStatus::Pending,
            decision: None,
            rationale: None,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Apply a resolution in memory. Persistence enforces exactly-once.
    pub fn resolve(&mut self, decision: Decision, rationale: Option<String>, by: ResolvedBy) {
        self.status = decision.outcome.status();
        self.decision = Some(decision);
        self.rationale = rationale;
        self.resolved_by = Some(by);
        self.resolved_at = Some(Utc::now());
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.status = ApprovalStatus::Cancelled;
        self.rationale = Some(reason.into());
        self.resolved_by = Some(ResolvedBy::System);
        self.resolved_at = Some(Utc::now());
    }
}
