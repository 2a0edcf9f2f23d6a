//! Validation phases and the named checkpoints a run can pause at.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::pivot::PivotKind;

/// One of the five validation phases, persisted as its number (0–4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    /// Founder interview and brief capture.
    Onboarding,
    /// Customer profile, value map and fit assessment.
    VpcDiscovery,
    /// Does anyone want it?
    Desirability,
    /// Can it be built?
    Feasibility,
    /// Does it make money?
    Viability,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Onboarding,
            Phase::VpcDiscovery,
            Phase::Desirability,
            Phase::Feasibility,
            Phase::Viability,
        ]
    }

    pub fn number(self) -> u8 {
        match self {
            Phase::Onboarding => 0,
            Phase::VpcDiscovery => 1,
            Phase::Desirability => 2,
            Phase::Feasibility => 3,
            Phase::Viability => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Onboarding => "onboarding",
            Phase::VpcDiscovery => "vpc_discovery",
            Phase::Desirability => "desirability",
            Phase::Feasibility => "feasibility",
            Phase::Viability => "viability",
        }
    }

    /// The phase after this one, or `None` for the last phase.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Onboarding => Some(Phase::VpcDiscovery),
            Phase::VpcDiscovery => Some(Phase::Desirability),
            Phase::Desirability => Some(Phase::Feasibility),
            Phase::Feasibility => Some(Phase::Viability),
            Phase::Viability => None,
        }
    }

    /// The approval checkpoint that closes this phase.
    pub fn gate_checkpoint(self) -> Checkpoint {
        match self {
            Phase::Onboarding => Checkpoint::ApproveFoundersBrief,
            Phase::VpcDiscovery => Checkpoint::ApproveVpcCompletion,
            Phase::Desirability => Checkpoint::ApproveDesirabilityGate,
            Phase::Feasibility => Checkpoint::ApproveFeasibilityGate,
            Phase::Viability => Checkpoint::ApproveViabilityGate,
        }
    }

    /// Whether this phase is evaluated from ledger experiments.
    pub fn is_experimental(self) -> bool {
        matches!(
            self,
            Phase::Desirability | Phase::Feasibility | Phase::Viability
        )
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Phase::Onboarding),
            1 => Ok(Phase::VpcDiscovery),
            2 => Ok(Phase::Desirability),
            3 => Ok(Phase::Feasibility),
            4 => Ok(Phase::Viability),
            _ => Err(format!("Invalid phase: {} (expected 0-4)", value)),
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.number()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Phase::try_from(n);
        }
        Phase::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Invalid phase: {}", s))
    }
}

/// Named suspension points. A paused run's `hitl_state` holds one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    ApproveFoundersBrief,
    ApproveVpcCompletion,
    ApproveDesirabilityGate,
    ApproveFeasibilityGate,
    ApproveViabilityGate,
    ApproveSegmentPivot,
    ApproveValuePivot,
    ApproveFeaturePivot,
    ApproveStrategicPivot,
    /// Pivot budget exhausted; a human picks proceed, pivot or kill.
    ApprovePivotEscalation,
}

pub const STRATEGIC_PIVOT_OPTIONS: &[&str] = &["price_increase", "cost_reduction", "kill"];
pub const ESCALATION_OPTIONS: &[&str] = &["proceed", "pivot", "kill"];

impl Checkpoint {
    pub fn all() -> &'static [Checkpoint] {
        &[
            Checkpoint::ApproveFoundersBrief,
            Checkpoint::ApproveVpcCompletion,
            Checkpoint::ApproveDesirabilityGate,
            Checkpoint::ApproveFeasibilityGate,
            Checkpoint::ApproveViabilityGate,
            Checkpoint::ApproveSegmentPivot,
            Checkpoint::ApproveValuePivot,
            Checkpoint::ApproveFeaturePivot,
            Checkpoint::ApproveStrategicPivot,
            Checkpoint::ApprovePivotEscalation,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::ApproveFoundersBrief => "approve_founders_brief",
            Checkpoint::ApproveVpcCompletion => "approve_vpc_completion",
            Checkpoint::ApproveDesirabilityGate => "approve_desirability_gate",
            Checkpoint::ApproveFeasibilityGate => "approve_feasibility_gate",
            Checkpoint::ApproveViabilityGate => "approve_viability_gate",
            Checkpoint::ApproveSegmentPivot => "approve_segment_pivot",
            Checkpoint::ApproveValuePivot => "approve_value_pivot",
            Checkpoint::ApproveFeaturePivot => "approve_feature_pivot",
            Checkpoint::ApproveStrategicPivot => "approve_strategic_pivot",
            Checkpoint::ApprovePivotEscalation => "approve_pivot_escalation",
        }
    }

    /// Pivot-approval checkpoint for a pivot kind.
    pub fn for_pivot(kind: PivotKind) -> Checkpoint {
        match kind {
            PivotKind::Segment => Checkpoint::ApproveSegmentPivot,
            PivotKind::Value => Checkpoint::ApproveValuePivot,
            PivotKind::Feature => Checkpoint::ApproveFeaturePivot,
            PivotKind::Strategic => Checkpoint::ApproveStrategicPivot,
        }
    }

    /// The pivot this checkpoint approves, if it is a pivot checkpoint.
    pub fn pivot_kind(self) -> Option<PivotKind> {
        match self {
            Checkpoint::ApproveSegmentPivot => Some(PivotKind::Segment),
            Checkpoint::ApproveValuePivot => Some(PivotKind::Value),
            Checkpoint::ApproveFeaturePivot => Some(PivotKind::Feature),
            Checkpoint::ApproveStrategicPivot => Some(PivotKind::Strategic),
            _ => None,
        }
    }

    /// Choices a human may pick when resolving this checkpoint.
    pub fn options(self) -> &'static [&'static str] {
        match self {
            Checkpoint::ApproveStrategicPivot => STRATEGIC_PIVOT_OPTIONS,
            Checkpoint::ApprovePivotEscalation => ESCALATION_OPTIONS,
            _ => &[],
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Checkpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Checkpoint::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Invalid checkpoint: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_as_number() {
        let json = serde_json::to_string(&Phase::Feasibility).unwrap();
        assert_eq!(json, "3");
        let parsed: Phase = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, Phase::Desirability);
    }

    #[test]
    fn test_phase_out_of_range_rejected() {
        assert!(serde_json::from_str::<Phase>("5").is_err());
        assert!(Phase::try_from(9).is_err());
    }

    #[test]
    fn test_phase_from_str_accepts_number_and_name() {
        assert_eq!("1".parse::<Phase>().unwrap(), Phase::VpcDiscovery);
        assert_eq!("viability".parse::<Phase>().unwrap(), Phase::Viability);
        assert!("launch".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_ordering_and_next() {
        assert!(Phase::Onboarding < Phase::Viability);
        assert_eq!(Phase::Desirability.next(), Some(Phase::Feasibility));
        assert_eq!(Phase::Viability.next(), None);
    }

    #[test]
    fn test_checkpoint_string_roundtrip() {
        for checkpoint in Checkpoint::all() {
            let parsed: Checkpoint = checkpoint.as_str().parse().unwrap();
            assert_eq!(parsed, *checkpoint);
            let json = serde_json::to_string(checkpoint).unwrap();
            assert_eq!(json, format!("\"{}\"", checkpoint.as_str()));
        }
    }

    #[test]
    fn test_gate_checkpoints_per_phase() {
        assert_eq!(
            Phase::Onboarding.gate_checkpoint(),
            Checkpoint::ApproveFoundersBrief
        );
        assert_eq!(
            Phase::Viability.gate_checkpoint(),
            Checkpoint::ApproveViabilityGate
        );
    }

    #[test]
    fn test_pivot_checkpoint_mapping() {
        for kind in PivotKind::all() {
            assert_eq!(Checkpoint::for_pivot(*kind).pivot_kind(), Some(*kind));
        }
        assert_eq!(Checkpoint::ApproveFoundersBrief.pivot_kind(), None);
    }

    #[test]
    fn test_options_only_on_choice_checkpoints() {
        assert!(Checkpoint::ApproveFeasibilityGate.options().is_empty());
        assert!(
            Checkpoint::ApproveStrategicPivot
                .options()
                .contains(&"cost_reduction")
        );
        assert!(Checkpoint::ApprovePivotEscalation.options().contains(&"kill"));
    }
}
