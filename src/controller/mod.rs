//! The run controller: owns each run's state and moves it between phases.
//!
//! Every mutation follows the same shape: load version `v`, change the state
//! in memory, save with `expected_version = v`, then emit events. A run is
//! only ever changed at a phase-output boundary or when an approval is
//! consumed.

mod advance;
mod resume;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ControllerError;
use crate::events::{EventSink, RunEvent, TracingSink};
use crate::gate::Gate;
use crate::hitl::{AutoApprovePolicy, HitlBroker};
use crate::ledger::EvidenceLedger;
use crate::model::{
    ApprovalRequest, Checkpoint, CustomerProfile, ExperimentMetrics, FinalDecision, FitAssessment,
    FoundersBrief, Phase, PivotKind, RunStatus, ValidationRunState, ValueMap,
};
use crate::store::{Backend, RunSummary, Snapshot};

pub use advance::output_digest;

/// What a controller call did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// An artifact was stored; the run keeps running in `phase`.
    Stored { phase: Phase },
    /// An experiment was appended to the ledger (or was already there).
    Recorded { experiment_id: Uuid, duplicate: bool },
    /// The output was the last one applied; nothing changed.
    Duplicate,
    /// Fit below threshold; refine the canvas and reassess.
    Refine { phase: Phase, fit_iterations: u32 },
    Paused {
        checkpoint: Checkpoint,
        request_id: Uuid,
    },
    Advanced { from: Phase, to: Phase },
    Pivoted {
        kind: PivotKind,
        to: Phase,
        attempt: u32,
    },
    /// A decision kept the run in its phase to gather more evidence.
    Stayed { phase: Phase },
    Completed { decision: FinalDecision },
    Failed { message: String },
}

/// An experiment submitted through `advance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInput {
    pub experiment_id: Uuid,
    pub metrics: ExperimentMetrics,
}

/// Output of a phase task. One canonical shape per artifact; anything else is
/// rejected at deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseOutput {
    FoundersBrief(FoundersBrief),
    CustomerProfile(CustomerProfile),
    ValueMap(ValueMap),
    FitAssessment(FitAssessment),
    Experiment(ExperimentInput),
    /// All experiments for the current round are in; evaluate the gate.
    ExperimentsComplete,
}

impl PhaseOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            PhaseOutput::FoundersBrief(_) => "founders_brief",
            PhaseOutput::CustomerProfile(_) => "customer_profile",
            PhaseOutput::ValueMap(_) => "value_map",
            PhaseOutput::FitAssessment(_) => "fit_assessment",
            PhaseOutput::Experiment(_) => "experiment",
            PhaseOutput::ExperimentsComplete => "experiments_complete",
        }
    }

    /// Whether this output belongs to `phase`.
    pub fn valid_for(&self, phase: Phase) -> bool {
        match self {
            PhaseOutput::FoundersBrief(_) => phase == Phase::Onboarding,
            PhaseOutput::CustomerProfile(_)
            | PhaseOutput::ValueMap(_)
            | PhaseOutput::FitAssessment(_) => phase == Phase::VpcDiscovery,
            PhaseOutput::Experiment(_) | PhaseOutput::ExperimentsComplete => {
                phase.is_experimental()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    pub gate: Gate,
    /// Transient evaluation failures tolerated before the run fails.
    pub max_retries: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            gate: Gate::default(),
            max_retries: 3,
        }
    }
}

pub struct RunController<S: Backend> {
    store: Arc<S>,
    broker: HitlBroker<S>,
    ledger: EvidenceLedger<S>,
    gate: Gate,
    max_retries: u32,
    sink: Arc<dyn EventSink>,
}

impl<S: Backend> RunController<S> {
    pub fn new(store: Arc<S>, settings: ControllerSettings) -> Self {
        Self {
            broker: HitlBroker::new(Arc::clone(&store)),
            ledger: EvidenceLedger::new(Arc::clone(&store)),
            store,
            gate: settings.gate,
            max_retries: settings.max_retries,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AutoApprovePolicy>) -> Self {
        self.broker = HitlBroker::with_policy(Arc::clone(&self.store), policy);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn broker(&self) -> &HitlBroker<S> {
        &self.broker
    }

    pub fn ledger(&self) -> &EvidenceLedger<S> {
        &self.ledger
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Create a run at phase 0.
    pub fn start(
        &self,
        run_id: Uuid,
        project_id: &str,
        user_id: &str,
        input: serde_json::Value,
    ) -> Result<ValidationRunState, ControllerError> {
        let state = ValidationRunState::new(run_id, project_id, user_id, input);
        self.store.create(&state)?;
        info!(%run_id, project_id, "Validation run started");
        Ok(state)
    }

    pub fn status(&self, run_id: Uuid) -> Result<ValidationRunState, ControllerError> {
        Ok(self.store.load(run_id)?)
    }

    pub fn list(&self) -> Result<Vec<RunSummary>, ControllerError> {
        Ok(self.store.list()?)
    }

    /// Every persisted version of the run, oldest first.
    pub fn history(&self, run_id: Uuid) -> Result<Vec<Snapshot>, ControllerError> {
        Ok(self.store.snapshots(run_id)?)
    }

    pub fn pending(&self) -> Result<Vec<ApprovalRequest>, ControllerError> {
        Ok(self.broker.pending()?)
    }

    pub fn requests(&self, run_id: Uuid) -> Result<Vec<ApprovalRequest>, ControllerError> {
        Ok(self.broker.for_run(run_id)?)
    }

    /// Stop a run at any boundary. Evidence and history are kept.
    pub fn kill(&self, run_id: Uuid, reason: &str) -> Result<Step, ControllerError> {
        let mut state = self.store.load(run_id)?;
        if state.is_terminal() {
            return Err(ControllerError::RunTerminal {
                run_id,
                status: state.status,
            });
        }

        let pending = state.pending_request_id;
        let message = format!("killed: {}", reason);
        state.final_decision = Some(FinalDecision::Kill);
        state.fail(message.clone());
        self.commit(&mut state)?;
        info!(%run_id, reason, "Validation run killed");

        if let Some(request_id) = pending
            && let Err(e) = self.broker.cancel(request_id, reason)
        {
            warn!(%run_id, %request_id, error = %e, "Could not cancel pending approval");
        }

        self.emit(RunEvent::run_complete(
            run_id,
            state.current_phase,
            FinalDecision::Kill.as_str(),
        ));
        Ok(Step::Failed { message })
    }

    /// Save `state` over the version it was loaded at.
    fn commit(&self, state: &mut ValidationRunState) -> Result<(), ControllerError> {
        let expected = state.version;
        state.version = expected + 1;
        state.updated_at = Utc::now();
        if let Err(e) = self.store.save(state, expected) {
            state.version = expected;
            warn!(run_id = %state.run_id, error = %e, "Failed to save run state");
            return Err(e.into());
        }
        Ok(())
    }

    fn emit(&self, event: RunEvent) {
        if let Err(e) = self.sink.emit(&event) {
            warn!(
                run_id = %event.run_id,
                event_type = %event.event_type,
                error = %e,
                "Event sink failed"
            );
        }
    }

    /// Suspend at `checkpoint`. The state is saved before the request exists,
    /// so a crash in between leaves a paused run that `reissue_checkpoint`
    /// can repair.
    fn pause(
        &self,
        state: &mut ValidationRunState,
        checkpoint: Checkpoint,
        mut context: serde_json::Value,
    ) -> Result<Step, ControllerError> {
        if let Some(spend) = state.input.get("estimated_spend")
            && let Some(obj) = context.as_object_mut()
        {
            obj.entry("estimated_spend").or_insert_with(|| spend.clone());
        }

        let request_id = Uuid::new_v4();
        state.pause(checkpoint, request_id);
        self.commit(state)?;

        let request = self.broker.create_with_id(
            request_id,
            state.run_id,
            checkpoint,
            state.current_phase,
            context.clone(),
        )?;
        info!(run_id = %state.run_id, %checkpoint, %request_id, "Run paused for approval");
        self.emit(RunEvent::checkpoint_reached(
            state.run_id,
            state.current_phase,
            checkpoint,
            request_id,
            &context,
        ));

        if !request.is_pending() {
            return self.resume(state.run_id, request_id);
        }
        Ok(Step::Paused {
            checkpoint,
            request_id,
        })
    }

    fn ensure_running(&self, state: &ValidationRunState) -> Result<(), ControllerError> {
        match state.status {
            RunStatus::Completed | RunStatus::Failed => Err(ControllerError::RunTerminal {
                run_id: state.run_id,
                status: state.status,
            }),
            RunStatus::Paused => Err(ControllerError::RunPaused {
                run_id: state.run_id,
                checkpoint: state
                    .hitl_state
                    .unwrap_or_else(|| state.current_phase.gate_checkpoint()),
            }),
            RunStatus::Pending | RunStatus::Running => Ok(()),
        }
    }
}
