use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use super::{
    AppendOutcome, ApprovalStore, CheckpointStore, ExperimentStore, RunSummary, Snapshot, checksum,
};
use crate::errors::StoreError;
use crate::model::{ApprovalRequest, ExperimentResult, Phase, ValidationRunState};

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, ValidationRunState>,
    snapshots: HashMap<Uuid, Vec<Snapshot>>,
    requests: HashMap<Uuid, ApprovalRequest>,
    /// Insertion order, so listings are stable.
    request_order: Vec<Uuid>,
    experiments: Vec<ExperimentResult>,
}

/// Process-local backend for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn snapshot(state: &ValidationRunState) -> Result<Snapshot, StoreError> {
    let document = serde_json::to_string(state)?;
    Ok(Snapshot {
        version: state.version,
        checksum: checksum(&document),
        saved_at: Utc::now(),
        state: state.clone(),
    })
}

impl CheckpointStore for MemoryStore {
    fn create(&self, state: &ValidationRunState) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.runs.contains_key(&state.run_id) {
            return Err(StoreError::AlreadyExists {
                run_id: state.run_id,
            });
        }
        let snap = snapshot(state)?;
        inner.runs.insert(state.run_id, state.clone());
        inner.snapshots.entry(state.run_id).or_default().push(snap);
        Ok(())
    }

    fn load(&self, run_id: Uuid) -> Result<ValidationRunState, StoreError> {
        self.lock()?
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::NotFound { run_id })
    }

    fn save(&self, state: &ValidationRunState, expected_version: u64) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let current = inner
            .runs
            .get(&state.run_id)
            .ok_or(StoreError::NotFound {
                run_id: state.run_id,
            })?
            .version;
        if current != expected_version {
            return Err(StoreError::VersionConflict {
                run_id: state.run_id,
                expected: expected_version,
                found: current,
            });
        }
        let snap = snapshot(state)?;
        inner.runs.insert(state.run_id, state.clone());
        inner.snapshots.entry(state.run_id).or_default().push(snap);
        Ok(())
    }

    fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let inner = self.lock()?;
        let mut runs: Vec<RunSummary> = inner.runs.values().map(RunSummary::from).collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs)
    }

    fn snapshots(&self, run_id: Uuid) -> Result<Vec<Snapshot>, StoreError> {
        let inner = self.lock()?;
        if !inner.runs.contains_key(&run_id) {
            return Err(StoreError::NotFound { run_id });
        }
        Ok(inner.snapshots.get(&run_id).cloned().unwrap_or_default())
    }
}

impl ApprovalStore for MemoryStore {
    fn insert_request(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if request.is_pending()
            && let Some(existing) = inner
                .requests
                .values()
                .find(|r| r.run_id == request.run_id && r.is_pending())
        {
            return Err(StoreError::PendingExists {
                run_id: request.run_id,
                existing: existing.id,
            });
        }
        inner.requests.insert(request.id, request.clone());
        inner.request_order.push(request.id);
        Ok(())
    }

    fn get_request(&self, id: Uuid) -> Result<ApprovalRequest, StoreError> {
        self.lock()?
            .requests
            .get(&id)
            .cloned()
            .ok_or(StoreError::RequestNotFound { id })
    }

    fn complete_request(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner
            .requests
            .get_mut(&request.id)
            .ok_or(StoreError::RequestNotFound { id: request.id })?;
        if !stored.is_pending() {
            return Err(StoreError::RequestNotPending {
                id: request.id,
                status: stored.status,
            });
        }
        *stored = request.clone();
        Ok(())
    }

    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .request_order
            .iter()
            .filter_map(|id| inner.requests.get(id))
            .filter(|r| r.is_pending())
            .cloned()
            .collect())
    }

    fn requests_for_run(&self, run_id: Uuid) -> Result<Vec<ApprovalRequest>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .request_order
            .iter()
            .filter_map(|id| inner.requests.get(id))
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }
}

impl ExperimentStore for MemoryStore {
    fn append_experiment(&self, result: &ExperimentResult) -> Result<AppendOutcome, StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .experiments
            .iter()
            .find(|e| e.experiment_id == result.experiment_id)
        {
            if existing.same_payload(result) {
                return Ok(AppendOutcome::Duplicate);
            }
            return Err(StoreError::ConflictingExperiment {
                experiment_id: result.experiment_id,
            });
        }
        inner.experiments.push(result.clone());
        Ok(AppendOutcome::Inserted)
    }

    fn experiments(
        &self,
        run_id: Uuid,
        phase: Phase,
    ) -> Result<Vec<ExperimentResult>, StoreError> {
        Ok(self
            .lock()?
            .experiments
            .iter()
            .filter(|e| e.run_id == run_id && e.phase == phase)
            .cloned()
            .collect())
    }
}
