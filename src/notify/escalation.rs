//! Reminder tiers for checkpoints that sit unanswered.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ApprovalRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTier {
    None,
    Email,
    Sms,
    BackupApprover,
}

impl EscalationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::BackupApprover => "backup_approver",
        }
    }
}

impl fmt::Display for EscalationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `[escalation]` section. Ages are minutes since the request was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    #[serde(default = "default_email_after")]
    pub email_after_mins: i64,
    #[serde(default = "default_sms_after")]
    pub sms_after_mins: i64,
    #[serde(default = "default_backup_after")]
    pub backup_after_mins: i64,
}

fn default_email_after() -> i64 {
    15
}

fn default_sms_after() -> i64 {
    24 * 60
}

fn default_backup_after() -> i64 {
    48 * 60
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            email_after_mins: default_email_after(),
            sms_after_mins: default_sms_after(),
            backup_after_mins: default_backup_after(),
        }
    }
}

impl EscalationPolicy {
    pub fn tier_for(&self, age: Duration) -> EscalationTier {
        let mins = age.num_minutes();
        if mins >= self.backup_after_mins {
            EscalationTier::BackupApprover
        } else if mins >= self.sms_after_mins {
            EscalationTier::Sms
        } else if mins >= self.email_after_mins {
            EscalationTier::Email
        } else {
            EscalationTier::None
        }
    }

    /// Tier due for a request at `now`. Resolved requests never escalate.
    pub fn tier_for_request(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> EscalationTier {
        if !request.is_pending() {
            return EscalationTier::None;
        }
        self.tier_for(now - request.created_at)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.email_after_mins < 0 {
            warnings.push("escalation.email_after_mins is negative".to_string());
        }
        if self.sms_after_mins < self.email_after_mins {
            warnings.push("escalation.sms_after_mins is earlier than email_after_mins".to_string());
        }
        if self.backup_after_mins < self.sms_after_mins {
            warnings.push("escalation.backup_after_mins is earlier than sms_after_mins".to_string());
        }
        warnings
    }
}

/// Tier due under the default policy.
pub fn escalation_tier(age: Duration) -> EscalationTier {
    EscalationPolicy::default().tier_for(age)
}
