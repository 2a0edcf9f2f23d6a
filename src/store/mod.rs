//! Durable persistence for run state, approval requests and ledger entries.
//!
//! Every backend implements the three traits below. `Backend` bundles them so
//! the controller can hold a single handle.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::model::{
    ApprovalRequest, Checkpoint, ExperimentResult, Phase, RunStatus, ValidationRunState,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Row returned by `CheckpointStore::list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub project_id: String,
    pub current_phase: Phase,
    pub status: RunStatus,
    pub hitl_state: Option<Checkpoint>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&ValidationRunState> for RunSummary {
    fn from(state: &ValidationRunState) -> Self {
        Self {
            run_id: state.run_id,
            project_id: state.project_id.clone(),
            current_phase: state.current_phase,
            status: state.status,
            hitl_state: state.hitl_state,
            version: state.version,
            updated_at: state.updated_at,
        }
    }
}

/// One saved version of a run, kept for postmortems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub checksum: String,
    pub saved_at: DateTime<Utc>,
    pub state: ValidationRunState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// Same experiment id and payload already recorded.
    Duplicate,
}

pub trait CheckpointStore: Send + Sync {
    /// Persist a new run. Fails with `AlreadyExists` if the id is taken.
    fn create(&self, state: &ValidationRunState) -> Result<(), StoreError>;

    fn load(&self, run_id: Uuid) -> Result<ValidationRunState, StoreError>;

    /// Replace the stored state if its version still equals
    /// `expected_version`. The caller sets `state.version` to the new value.
    fn save(&self, state: &ValidationRunState, expected_version: u64) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<RunSummary>, StoreError>;

    /// Every saved version of the run, oldest first.
    fn snapshots(&self, run_id: Uuid) -> Result<Vec<Snapshot>, StoreError>;
}

pub trait ApprovalStore: Send + Sync {
    /// Insert a request. A pending request fails with `PendingExists` when the
    /// run already has one.
    fn insert_request(&self, request: &ApprovalRequest) -> Result<(), StoreError>;

    fn get_request(&self, id: Uuid) -> Result<ApprovalRequest, StoreError>;

    /// Write a resolved or cancelled request, only if the stored copy is
    /// still pending.
    fn complete_request(&self, request: &ApprovalRequest) -> Result<(), StoreError>;

    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, StoreError>;

    fn requests_for_run(&self, run_id: Uuid) -> Result<Vec<ApprovalRequest>, StoreError>;
}

pub trait ExperimentStore: Send + Sync {
    /// Append an experiment. Replaying the same payload is a no-op; reusing
    /// an id for a different payload is `ConflictingExperiment`.
    fn append_experiment(&self, result: &ExperimentResult) -> Result<AppendOutcome, StoreError>;

    /// All experiments for a run and phase in recording order.
    fn experiments(&self, run_id: Uuid, phase: Phase)
    -> Result<Vec<ExperimentResult>, StoreError>;
}

pub trait Backend: CheckpointStore + ApprovalStore + ExperimentStore {}

impl<T: CheckpointStore + ApprovalStore + ExperimentStore> Backend for T {}

/// Hex sha-256 of a serialized state document.
pub fn checksum(document: &str) -> String {
    format!("{:x}", Sha256::digest(document.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = checksum("{\"run\":1}");
        assert_eq!(a.len(), 64);
        assert_eq!(a, checksum("{\"run\":1}"));
        assert_ne!(a, checksum("{\"run\":2}"));
    }
}
