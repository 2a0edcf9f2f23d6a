use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    AppendOutcome, ApprovalStore, CheckpointStore, ExperimentStore, RunSummary, Snapshot, checksum,
};
use crate::errors::StoreError;
use crate::model::{ApprovalRequest, ExperimentResult, Phase, ValidationRunState};

/// SQLite backend. One JSON `phase_state` document per run plus an
/// append-only snapshot table; every save is a single transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                current_phase INTEGER NOT NULL,
                status TEXT NOT NULL,
                hitl_state TEXT,
                version INTEGER NOT NULL,
                phase_state TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                phase_state TEXT NOT NULL,
                checksum TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                UNIQUE(run_id, version)
            );

            CREATE TABLE IF NOT EXISTS approval_requests (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                checkpoint TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS experiments (
                experiment_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                phase INTEGER NOT NULL,
                round INTEGER NOT NULL,
                body TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_snapshots_run ON run_snapshots(run_id, version);
            CREATE INDEX IF NOT EXISTS idx_requests_run ON approval_requests(run_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_one_pending
                ON approval_requests(run_id) WHERE status = 'pending';
            CREATE INDEX IF NOT EXISTS idx_experiments_run_phase ON experiments(run_id, phase, round);
            ",
        )?;
        debug!("SQLite checkpoint store ready");
        Ok(())
    }
}

fn decode_state(
    run_id: Uuid,
    document: &str,
    stored_checksum: &str,
) -> Result<ValidationRunState, StoreError> {
    let actual = checksum(document);
    if actual != stored_checksum {
        warn!(%run_id, "Checksum mismatch on stored run state");
        return Err(StoreError::Corrupt {
            run_id,
            message: format!("checksum {} does not match stored {}", actual, stored_checksum),
        });
    }
    Ok(serde_json::from_str(document)?)
}

fn parse_time(run_id: Uuid, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            run_id,
            message: format!("bad timestamp '{}': {}", raw, e),
        })
}

fn insert_snapshot(
    conn: &Connection,
    state: &ValidationRunState,
    document: &str,
    sum: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO run_snapshots (run_id, version, phase_state, checksum, saved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            state.run_id.to_string(),
            state.version as i64,
            document,
            sum,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

impl CheckpointStore for SqliteStore {
    fn create(&self, state: &ValidationRunState) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM runs WHERE run_id = ?1",
                params![state.run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists {
                run_id: state.run_id,
            });
        }

        let document = serde_json::to_string(state)?;
        let sum = checksum(&document);
        tx.execute(
            "INSERT INTO runs (run_id, project_id, user_id, current_phase, status, hitl_state,
                               version, phase_state, checksum, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                state.run_id.to_string(),
                state.project_id,
                state.user_id,
                state.current_phase.number(),
                state.status.as_str(),
                state.hitl_state.map(|c| c.as_str()),
                state.version as i64,
                document,
                sum,
                state.created_at.to_rfc3339(),
                state.updated_at.to_rfc3339(),
            ],
        )?;
        insert_snapshot(&tx, state, &document, &sum)?;
        tx.commit()?;
        Ok(())
    }

    fn load(&self, run_id: Uuid) -> Result<ValidationRunState, StoreError> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT phase_state, checksum FROM runs WHERE run_id = ?1",
                params![run_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (document, sum) = row.ok_or(StoreError::NotFound { run_id })?;
        decode_state(run_id, &document, &sum)
    }

    fn save(&self, state: &ValidationRunState, expected_version: u64) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM runs WHERE run_id = ?1",
                params![state.run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or(StoreError::NotFound {
            run_id: state.run_id,
        })? as u64;
        if current != expected_version {
            return Err(StoreError::VersionConflict {
                run_id: state.run_id,
                expected: expected_version,
                found: current,
            });
        }

        let document = serde_json::to_string(state)?;
        let sum = checksum(&document);
        tx.execute(
            "UPDATE runs SET current_phase = ?2, status = ?3, hitl_state = ?4, version = ?5,
                             phase_state = ?6, checksum = ?7, updated_at = ?8
             WHERE run_id = ?1 AND version = ?9",
            params![
                state.run_id.to_string(),
                state.current_phase.number(),
                state.status.as_str(),
                state.hitl_state.map(|c| c.as_str()),
                state.version as i64,
                document,
                sum,
                state.updated_at.to_rfc3339(),
                expected_version as i64,
            ],
        )?;
        insert_snapshot(&tx, state, &document, &sum)?;
        tx.commit()?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, phase_state, checksum FROM runs ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, document, sum)| -> Result<RunSummary, StoreError> {
                let run_id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt {
                    run_id: Uuid::nil(),
                    message: format!("bad run id '{}': {}", id, e),
                })?;
                let state = decode_state(run_id, &document, &sum)?;
                Ok(RunSummary::from(&state))
            })
            .collect()
    }

    fn snapshots(&self, run_id: Uuid) -> Result<Vec<Snapshot>, StoreError> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM runs WHERE run_id = ?1",
                params![run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound { run_id });
        }

        let mut stmt = conn.prepare(
            "SELECT version, phase_state, checksum, saved_at FROM run_snapshots
             WHERE run_id = ?1 ORDER BY version ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, document, sum, saved_at)| -> Result<Snapshot, StoreError> {
                Ok(Snapshot {
                    version: version as u64,
                    state: decode_state(run_id, &document, &sum)?,
                    checksum: sum,
                    saved_at: parse_time(run_id, &saved_at)?,
                })
            })
            .collect()
    }
}

fn decode_request(body: &str) -> Result<ApprovalRequest, StoreError> {
    Ok(serde_json::from_str(body)?)
}

impl ApprovalStore for SqliteStore {
    fn insert_request(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if request.is_pending() {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM approval_requests WHERE run_id = ?1 AND status = 'pending'",
                    params![request.run_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                return Err(StoreError::PendingExists {
                    run_id: request.run_id,
                    existing: Uuid::parse_str(&existing).unwrap_or_default(),
                });
            }
        }
        tx.execute(
            "INSERT INTO approval_requests (id, run_id, checkpoint, status, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id.to_string(),
                request.run_id.to_string(),
                request.checkpoint.as_str(),
                request.status.as_str(),
                serde_json::to_string(request)?,
                request.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_request(&self, id: Uuid) -> Result<ApprovalRequest, StoreError> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM approval_requests WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        decode_request(&body.ok_or(StoreError::RequestNotFound { id })?)
    }

    fn complete_request(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE approval_requests SET status = ?2, body = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![
                request.id.to_string(),
                request.status.as_str(),
                serde_json::to_string(request)?,
            ],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM approval_requests WHERE id = ?1",
                params![request.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            None => Err(StoreError::RequestNotFound { id: request.id }),
            Some(status) => Err(StoreError::RequestNotPending {
                id: request.id,
                status: status.parse().map_err(|e: String| StoreError::Corrupt {
                    run_id: request.run_id,
                    message: e,
                })?,
            }),
        }
    }

    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM approval_requests WHERE status = 'pending' ORDER BY created_at ASC",
        )?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| decode_request(b)).collect()
    }

    fn requests_for_run(&self, run_id: Uuid) -> Result<Vec<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM approval_requests WHERE run_id = ?1 ORDER BY created_at ASC",
        )?;
        let bodies = stmt
            .query_map(params![run_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| decode_request(b)).collect()
    }
}

impl ExperimentStore for SqliteStore {
    fn append_experiment(&self, result: &ExperimentResult) -> Result<AppendOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM experiments WHERE experiment_id = ?1",
                params![result.experiment_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(body) = existing {
            let stored: ExperimentResult = serde_json::from_str(&body)?;
            if stored.same_payload(result) {
                return Ok(AppendOutcome::Duplicate);
            }
            return Err(StoreError::ConflictingExperiment {
                experiment_id: result.experiment_id,
            });
        }

        tx.execute(
            "INSERT INTO experiments (experiment_id, run_id, phase, round, body, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.experiment_id.to_string(),
                result.run_id.to_string(),
                result.phase.number(),
                result.round,
                serde_json::to_string(result)?,
                result.recorded_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(AppendOutcome::Inserted)
    }

    fn experiments(
        &self,
        run_id: Uuid,
        phase: Phase,
    ) -> Result<Vec<ExperimentResult>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM experiments WHERE run_id = ?1 AND phase = ?2 ORDER BY rowid ASC",
        )?;
        let bodies = stmt
            .query_map(params![run_id.to_string(), phase.number()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, Decision, ExperimentMetrics, ResolvedBy, RunStatus};
    use tempfile::TempDir;

    fn run() -> ValidationRunState {
        ValidationRunState::new(
            Uuid::new_v4(),
            "proj",
            "user",
            serde_json::json!({"idea": "x"}),
        )
    }

    #[test]
    fn test_create_load_roundtrip() {
        let store = SqliteStore::new_in_memory().unwrap();
        let state = run();
        store.create(&state).unwrap();
        let loaded = store.load(state.run_id).unwrap();
        assert_eq!(loaded, state);
        assert!(matches!(
            store.create(&state),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_load_missing_run() {
        let store = SqliteStore::new_in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.load(id),
            Err(StoreError::NotFound { run_id }) if run_id == id
        ));
    }

    #[test]
    fn test_save_rejects_stale_version_and_keeps_snapshots() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut state = run();
        store.create(&state).unwrap();

        state.version = 1;
        state.status = RunStatus::Paused;
        store.save(&state, 0).unwrap();

        let mut stale = state.clone();
        stale.version = 1;
        assert!(matches!(
            store.save(&stale, 0),
            Err(StoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            })
        ));

        let snapshots = store.snapshots(state.run_id).unwrap();
        assert_eq!(
            snapshots.iter().map(|s| s.version).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(snapshots[1].state.status, RunStatus::Paused);
        assert_eq!(snapshots[1].checksum.len(), 64);
    }

    #[test]
    fn test_tampered_state_fails_checksum() {
        let store = SqliteStore::new_in_memory().unwrap();
        let state = run();
        store.create(&state).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE runs SET phase_state = replace(phase_state, 'proj', 'evil')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.load(state.run_id),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gatekeeper.db");
        let state = run();
        {
            let store = SqliteStore::new(&path).unwrap();
            store.create(&state).unwrap();
        }
        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.load(state.run_id).unwrap().run_id, state.run_id);
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn test_request_resolved_exactly_once() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut request = ApprovalRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Checkpoint::ApproveDesirabilityGate,
            Phase::Desirability,
            serde_json::json!({"signal": "strong_commitment"}),
        );
        store.insert_request(&request).unwrap();
        assert_eq!(store.pending_requests().unwrap().len(), 1);

        request.resolve(Decision::approve(), None, ResolvedBy::Human);
        store.complete_request(&request).unwrap();
        assert!(matches!(
            store.complete_request(&request),
            Err(StoreError::RequestNotPending { .. })
        ));
        assert!(store.pending_requests().unwrap().is_empty());
        assert_eq!(
            store.get_request(request.id).unwrap().decision,
            Some(Decision::approve())
        );
    }

    #[test]
    fn test_second_pending_request_rejected() {
        let store = SqliteStore::new_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        let first = ApprovalRequest::new(
            Uuid::new_v4(),
            run_id,
            Checkpoint::ApproveFeaturePivot,
            Phase::Feasibility,
            serde_json::Value::Null,
        );
        store.insert_request(&first).unwrap();
        let second = ApprovalRequest::new(
            Uuid::new_v4(),
            run_id,
            Checkpoint::ApprovePivotEscalation,
            Phase::Feasibility,
            serde_json::Value::Null,
        );
        assert!(matches!(
            store.insert_request(&second),
            Err(StoreError::PendingExists { .. })
        ));
    }

    #[test]
    fn test_experiments_ordered_and_deduplicated() {
        let store = SqliteStore::new_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        let mk = |cac: f64| ExperimentResult {
            experiment_id: Uuid::new_v4(),
            run_id,
            phase: Phase::Viability,
            round: 1,
            recorded_at: Utc::now(),
            metrics: ExperimentMetrics::Viability {
                customer_acquisition_cost: cac,
                lifetime_value: 100.0,
            },
        };
        let a = mk(10.0);
        let b = mk(20.0);
        store.append_experiment(&a).unwrap();
        store.append_experiment(&b).unwrap();
        assert_eq!(
            store.append_experiment(&a).unwrap(),
            AppendOutcome::Duplicate
        );

        let stored = store.experiments(run_id, Phase::Viability).unwrap();
        assert_eq!(
            stored.iter().map(|e| e.experiment_id).collect::<Vec<_>>(),
            vec![a.experiment_id, b.experiment_id]
        );
        assert!(store.experiments(run_id, Phase::Feasibility).unwrap().is_empty());
    }
}
