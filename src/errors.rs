//! Typed error hierarchy for gatekeeper.
//!
//! One enum per subsystem:
//! - `StoreError` — checkpoint, approval and experiment persistence
//! - `GateError` — malformed evidence rejected by the gate evaluator
//! - `LedgerError` — evidence recording and aggregation
//! - `HitlError` — approval request lifecycle
//! - `ControllerError` — the run state machine, the surface callers see
//!
//! Structural errors (not found, stale decision, already resolved) always
//! surface to the caller. `ControllerError::TransientEvaluation` is the only
//! variant callers are expected to retry.

use thiserror::Error;
use uuid::Uuid;

use crate::model::{ApprovalStatus, Checkpoint, Phase, PivotKind, RunStatus};

/// Errors from the persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Run {run_id} not found")]
    NotFound { run_id: Uuid },

    #[error("Run {run_id} already exists")]
    AlreadyExists { run_id: Uuid },

    #[error("Version conflict for run {run_id}: expected {expected}, found {found}")]
    VersionConflict {
        run_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Approval request {id} not found")]
    RequestNotFound { id: Uuid },

    #[error("Approval request {id} is {status}, not pending")]
    RequestNotPending { id: Uuid, status: ApprovalStatus },

    #[error("Run {run_id} already has a pending approval request ({existing})")]
    PendingExists { run_id: Uuid, existing: Uuid },

    #[error("Experiment {experiment_id} already recorded with a different payload")]
    ConflictingExperiment { experiment_id: Uuid },

    #[error("Snapshot for run {run_id} failed integrity check: {message}")]
    Corrupt { run_id: Uuid, message: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Evidence the gate refuses to evaluate.
#[derive(Debug, Error, PartialEq)]
pub enum GateError {
    #[error("Malformed evidence: {field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Errors from the evidence ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient evidence for {phase} phase: {reason}")]
    InsufficientEvidence { phase: Phase, reason: String },

    #[error("Experiment kind '{kind}' cannot be recorded in the {phase} phase")]
    WrongPhase { phase: Phase, kind: &'static str },

    #[error("Invalid experiment metrics: {0}")]
    InvalidMetrics(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether retrying with more or corrected data may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::InsufficientEvidence { .. })
    }
}

/// Errors from the HITL broker.
#[derive(Debug, Error)]
pub enum HitlError {
    #[error("Approval request {id} not found")]
    NotFound { id: Uuid },

    #[error("Approval request {id} already resolved ({status})")]
    AlreadyResolved { id: Uuid, status: ApprovalStatus },

    #[error("Run {run_id} already has a pending approval request ({existing})")]
    AlreadyPending { run_id: Uuid, existing: Uuid },

    #[error("Option '{option}' is not offered by checkpoint {checkpoint}")]
    InvalidOption {
        checkpoint: Checkpoint,
        option: String,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for HitlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RequestNotFound { id } => HitlError::NotFound { id },
            StoreError::RequestNotPending { id, status } => {
                HitlError::AlreadyResolved { id, status }
            }
            StoreError::PendingExists { run_id, existing } => {
                HitlError::AlreadyPending { run_id, existing }
            }
            other => HitlError::Store(other),
        }
    }
}

/// Errors from the run controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Run {run_id} already started")]
    AlreadyStarted { run_id: Uuid },

    #[error("Run {run_id} not found")]
    NotFound { run_id: Uuid },

    #[error("Run {run_id} has no pending checkpoint (status: {status})")]
    NoPendingCheckpoint { run_id: Uuid, status: RunStatus },

    #[error("Stale decision for run {run_id}: {reason}")]
    StaleDecision { run_id: Uuid, reason: String },

    #[error("Approval request {request_id} is still pending")]
    CheckpointUnresolved { request_id: Uuid },

    #[error("Approval request {request_id} already resolved ({status})")]
    AlreadyResolved {
        request_id: Uuid,
        status: ApprovalStatus,
    },

    #[error("Invalid decision for {checkpoint}: {reason}")]
    InvalidDecision {
        checkpoint: Checkpoint,
        reason: String,
    },

    #[error("{kind} pivot limit of {limit} exhausted")]
    PivotLimitExhausted { kind: PivotKind, limit: u32 },

    #[error("Transient evaluation failure (attempt {attempt} of {max}): {message}")]
    TransientEvaluation {
        attempt: u32,
        max: u32,
        message: String,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Run {run_id} is paused at {checkpoint}")]
    RunPaused { run_id: Uuid, checkpoint: Checkpoint },

    #[error("Run {run_id} is terminal ({status})")]
    RunTerminal { run_id: Uuid, status: RunStatus },

    #[error("Output targets phase {got} but run is in phase {expected}")]
    PhaseMismatch { expected: Phase, got: Phase },

    #[error(transparent)]
    Hitl(HitlError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { run_id } => ControllerError::NotFound { run_id },
            StoreError::AlreadyExists { run_id } => ControllerError::AlreadyStarted { run_id },
            StoreError::VersionConflict {
                run_id,
                expected,
                found,
            } => ControllerError::InvariantViolation(format!(
                "concurrent write to run {run_id}: expected version {expected}, found {found}"
            )),
            StoreError::ConflictingExperiment { .. } => {
                ControllerError::InvariantViolation(err.to_string())
            }
            other => ControllerError::Store(other),
        }
    }
}

impl From<HitlError> for ControllerError {
    fn from(err: HitlError) -> Self {
        match err {
            HitlError::AlreadyResolved { id, status } => ControllerError::AlreadyResolved {
                request_id: id,
                status,
            },
            other => ControllerError::Hitl(other),
        }
    }
}

impl From<LedgerError> for ControllerError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(store) => store.into(),
            LedgerError::WrongPhase { .. } | LedgerError::InvalidMetrics(_) => {
                ControllerError::InvariantViolation(err.to_string())
            }
            other => ControllerError::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_controller_not_found() {
        let run_id = Uuid::new_v4();
        let err: ControllerError = StoreError::NotFound { run_id }.into();
        match err {
            ControllerError::NotFound { run_id: id } => assert_eq!(id, run_id),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn store_already_exists_maps_to_already_started() {
        let run_id = Uuid::new_v4();
        let err: ControllerError = StoreError::AlreadyExists { run_id }.into();
        assert!(matches!(err, ControllerError::AlreadyStarted { .. }));
    }

    #[test]
    fn version_conflict_is_an_invariant_violation() {
        let err: ControllerError = StoreError::VersionConflict {
            run_id: Uuid::new_v4(),
            expected: 3,
            found: 4,
        }
        .into();
        match err {
            ControllerError::InvariantViolation(msg) => {
                assert!(msg.contains("expected version 3"));
                assert!(msg.contains("found 4"));
            }
            other => panic!("Expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn request_not_pending_maps_to_already_resolved() {
        let id = Uuid::new_v4();
        let hitl: HitlError = StoreError::RequestNotPending {
            id,
            status: ApprovalStatus::Approved,
        }
        .into();
        assert!(matches!(hitl, HitlError::AlreadyResolved { .. }));

        let controller: ControllerError = hitl.into();
        match controller {
            ControllerError::AlreadyResolved { request_id, status } => {
                assert_eq!(request_id, id);
                assert_eq!(status, ApprovalStatus::Approved);
            }
            other => panic!("Expected AlreadyResolved, got {other:?}"),
        }
    }

    #[test]
    fn transient_ledger_errors_are_flagged() {
        let insufficient = LedgerError::InsufficientEvidence {
            phase: Phase::Desirability,
            reason: "no experiments".into(),
        };
        assert!(insufficient.is_transient());
        assert!(insufficient.to_string().contains("desirability"));

        let wrong = LedgerError::WrongPhase {
            phase: Phase::Viability,
            kind: "desirability",
        };
        assert!(!wrong.is_transient());
        assert!(!LedgerError::InvalidMetrics("negative cac".into()).is_transient());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::LockPoisoned);
        assert_std_error(&LedgerError::InvalidMetrics("x".into()));
        assert_std_error(&HitlError::NotFound { id: Uuid::nil() });
        assert_std_error(&ControllerError::InvariantViolation("x".into()));
    }
}
