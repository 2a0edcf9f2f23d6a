//! The per-run aggregate persisted by the checkpoint store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::canvas::{CustomerProfile, FitAssessment, FoundersBrief, ValueMap};
use super::evidence::{DesirabilityEvidence, FeasibilityEvidence, GateVerdict, ViabilityEvidence};
use super::phase::{Checkpoint, Phase};
use super::pivot::PivotCounts;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// The terminal call on an idea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Proceed,
    Pivot,
    Kill,
}

impl FinalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Pivot => "pivot",
            Self::Kill => "kill",
        }
    }
}

impl fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the run's transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub at: DateTime<Utc>,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub note: String,
}

/// Current evidence round per experimental phase. Experiments are aggregated
/// per round so a pivot starts from a clean slate without deleting history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRounds {
    pub desirability: u32,
    pub feasibility: u32,
    pub viability: u32,
}

impl Default for EvidenceRounds {
    fn default() -> Self {
        Self {
            desirability: 1,
            feasibility: 1,
            viability: 1,
        }
    }
}

impl EvidenceRounds {
    /// Round for `phase`. Non-experimental phases always report round 1.
    pub fn get(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Desirability => self.desirability,
            Phase::Feasibility => self.feasibility,
            Phase::Viability => self.viability,
            Phase::Onboarding | Phase::VpcDiscovery => 1,
        }
    }

    pub fn bump(&mut self, phase: Phase) -> u32 {
        let slot = match phase {
            Phase::Desirability => &mut self.desirability,
            Phase::Feasibility => &mut self.feasibility,
            Phase::Viability => &mut self.viability,
            Phase::Onboarding | Phase::VpcDiscovery => return 1,
        };
        *slot += 1;
        *slot
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRunState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub current_phase: Phase,
    pub status: RunStatus,
    /// The checkpoint a paused run waits on.
    #[serde(default)]
    pub hitl_state: Option<Checkpoint>,
    #[serde(default)]
    pub pending_request_id: Option<Uuid>,
    #[serde(default)]
    pub input: serde_json::Value,

    #[serde(default)]
    pub founders_brief: Option<FoundersBrief>,
    #[serde(default)]
    pub customer_profile: Option<CustomerProfile>,
    #[serde(default)]
    pub value_map: Option<ValueMap>,
    #[serde(default)]
    pub fit_assessment: Option<FitAssessment>,

    #[serde(default)]
    pub desirability: Option<DesirabilityEvidence>,
    #[serde(default)]
    pub feasibility: Option<FeasibilityEvidence>,
    #[serde(default)]
    pub viability: Option<ViabilityEvidence>,
    #[serde(default)]
    pub last_verdict: Option<GateVerdict>,

    #[serde(default)]
    pub pivots: PivotCounts,
    #[serde(default)]
    pub rounds: EvidenceRounds,
    #[serde(default)]
    pub fit_iterations: u32,
    #[serde(default)]
    pub final_decision: Option<FinalDecision>,
    #[serde(default)]
    pub history: Vec<PhaseTransition>,

    /// sha-256 of the last applied phase output, for replay detection.
    #[serde(default)]
    pub last_output_digest: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_message: Option<String>,

    /// Optimistic concurrency token, bumped on every save.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl ValidationRunState {
    /// Fresh run at phase 0, running.
    pub fn new(
        run_id: Uuid,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let mut state = Self {
            schema_version: SCHEMA_VERSION,
            run_id,
            project_id: project_id.into(),
            user_id: user_id.into(),
            current_phase: Phase::Onboarding,
            status: RunStatus::Running,
            hitl_state: None,
            pending_request_id: None,
            input,
            founders_brief: None,
            customer_profile: None,
            value_map: None,
            fit_assessment: None,
            desirability: None,
            feasibility: None,
            viability: None,
            last_verdict: None,
            pivots: PivotCounts::default(),
            rounds: EvidenceRounds::default(),
            fit_iterations: 0,
            final_decision: None,
            history: Vec::new(),
            last_output_digest: None,
            retry_count: 0,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.record_transition(Phase::Onboarding, None, "run started");
        state
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }

    pub fn current_round(&self) -> u32 {
        self.rounds.get(self.current_phase)
    }

    /// Suspend at `checkpoint` waiting on `request_id`.
    pub fn pause(&mut self, checkpoint: Checkpoint, request_id: Uuid) {
        self.status = RunStatus::Paused;
        self.hitl_state = Some(checkpoint);
        self.pending_request_id = Some(request_id);
        let phase = self.current_phase;
        self.record_transition(phase, Some(checkpoint), "awaiting approval");
    }

    /// Leave the paused state, back to running in the current phase.
    pub fn clear_pause(&mut self) {
        self.status = RunStatus::Running;
        self.hitl_state = None;
        self.pending_request_id = None;
    }

    /// Move to `to`, recording the transition.
    pub fn move_to(&mut self, to: Phase, note: impl Into<String>) {
        self.record_transition(to, None, note);
        self.current_phase = to;
    }

    /// Finish the run with a terminal decision.
    pub fn complete(&mut self, decision: FinalDecision, note: impl Into<String>) {
        self.clear_pause();
        self.status = RunStatus::Completed;
        self.final_decision = Some(decision);
        let phase = self.current_phase;
        self.record_transition(phase, None, note);
    }

    /// Fail the run. Evidence and history are kept for postmortem.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.clear_pause();
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
        let phase = self.current_phase;
        let note = self.error_message.clone().unwrap_or_default();
        self.record_transition(phase, None, note);
    }

    pub fn record_transition(
        &mut self,
        to_phase: Phase,
        checkpoint: Option<Checkpoint>,
        note: impl Into<String>,
    ) {
        self.history.push(PhaseTransition {
            at: Utc::now(),
            from_phase: self.current_phase,
            to_phase,
            status: self.status,
            checkpoint,
            note: note.into(),
        });
    }
}
