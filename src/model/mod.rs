//! Domain types shared by every subsystem.

pub mod approval;
pub mod canvas;
pub mod evidence;
pub mod phase;
pub mod pivot;
pub mod state;

pub use approval::{ApprovalRequest, ApprovalStatus, Decision, DecisionOutcome, ResolvedBy};
pub use canvas::{CustomerProfile, FitAssessment, FitStrength, FoundersBrief, ValueMap};
pub use evidence::{
    CommitmentType, DesirabilityEvidence, Evidence, ExperimentMetrics, ExperimentResult,
    FeasibilityEvidence, FeasibilityStatus, GateVerdict, Signal, UnitEconomicsStatus,
    ViabilityEvidence,
};
pub use phase::{Checkpoint, ESCALATION_OPTIONS, Phase, STRATEGIC_PIVOT_OPTIONS};
pub use pivot::{PivotCounts, PivotKind, PivotRecommendation};
pub use state::{
    EvidenceRounds, FinalDecision, PhaseTransition, RunStatus, SCHEMA_VERSION, ValidationRunState,
};
