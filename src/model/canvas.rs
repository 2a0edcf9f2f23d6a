//! Phase 0 and phase 1 artifacts: the founder's brief and the value
//! proposition canvas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Captured once during onboarding. Write-once after approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundersBrief {
    pub business_idea: String,
    pub problem_statement: String,
    #[serde(default)]
    pub target_customers: Vec<String>,
    #[serde(default)]
    pub solution_hypothesis: String,
    #[serde(default)]
    pub key_assumptions: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Set when `approve_founders_brief` passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl FoundersBrief {
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    /// Reject briefs missing the fields every later phase depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.business_idea.trim().is_empty() {
            return Err("founders brief has an empty business_idea".to_string());
        }
        if self.problem_statement.trim().is_empty() {
            return Err("founders brief has an empty problem_statement".to_string());
        }
        if self.approved_at.is_some() {
            return Err("founders brief cannot be submitted pre-approved".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub segment: String,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub pains: Vec<String>,
    #[serde(default)]
    pub gains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMap {
    #[serde(default)]
    pub products_services: Vec<String>,
    #[serde(default)]
    pub pain_relievers: Vec<String>,
    #[serde(default)]
    pub gain_creators: Vec<String>,
}

/// How well the value map answers the customer profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitAssessment {
    /// 0–100.
    pub fit_score: u8,
    #[serde(default)]
    pub notes: String,
}

/// Descriptive band for a fit score. The gate itself uses a single threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStrength {
    Weak,
    Moderate,
    Strong,
}

impl FitStrength {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => FitStrength::Strong,
            70..=79 => FitStrength::Moderate,
            _ => FitStrength::Weak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief() -> FoundersBrief {
        FoundersBrief {
            business_idea: "Invoice factoring for freelancers".into(),
            problem_statement: "Freelancers wait 60+ days to get paid".into(),
            target_customers: vec!["freelance designers".into()],
            solution_hypothesis: "Advance 90% of invoice value within a day".into(),
            key_assumptions: vec![],
            success_criteria: vec![],
            approved_at: None,
        }
    }

    #[test]
    fn test_brief_validation() {
        assert!(brief().validate().is_ok());

        let mut empty = brief();
        empty.business_idea = "  ".into();
        assert!(empty.validate().unwrap_err().contains("business_idea"));

        let mut preapproved = brief();
        preapproved.approved_at = Some(Utc::now());
        assert!(preapproved.validate().is_err());
    }

    #[test]
    fn test_brief_optional_fields_default() {
        let parsed: FoundersBrief = serde_json::from_str(
            r#"{"business_idea": "x", "problem_statement": "y"}"#,
        )
        .unwrap();
        assert!(parsed.target_customers.is_empty());
        assert!(!parsed.is_approved());
    }

    #[test]
    fn test_fit_strength_bands() {
        assert_eq!(FitStrength::from_score(69), FitStrength::Weak);
        assert_eq!(FitStrength::from_score(70), FitStrength::Moderate);
        assert_eq!(FitStrength::from_score(79), FitStrength::Moderate);
        assert_eq!(FitStrength::from_score(80), FitStrength::Strong);
        assert_eq!(FitStrength::from_score(100), FitStrength::Strong);
    }
}
