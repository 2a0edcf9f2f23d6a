use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PhaseOutput, RunController, Step};
use crate::errors::ControllerError;
use crate::events::RunEvent;
use crate::model::{Checkpoint, Evidence, GateVerdict, Phase, ValidationRunState};
use crate::store::{AppendOutcome, Backend};

/// sha-256 over the phase, task name and canonical output JSON.
pub fn output_digest(
    phase: Phase,
    task_name: &str,
    output: &PhaseOutput,
) -> Result<String, ControllerError> {
    let canonical = serde_json::to_string(output)
        .map_err(|e| ControllerError::InvariantViolation(format!("unserializable output: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update([phase.number()]);
    hasher.update(task_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

impl<S: Backend> RunController<S> {
    /// Apply the output of a phase task. Also known as `submit_phase_output`.
    pub fn advance(
        &self,
        run_id: Uuid,
        phase: Phase,
        task_name: &str,
        output: PhaseOutput,
    ) -> Result<Step, ControllerError> {
        let mut state = self.store.load(run_id)?;

        let digest = output_digest(phase, task_name, &output)?;
        if state.last_output_digest.as_deref() == Some(digest.as_str()) {
            debug!(%run_id, task_name, "Replayed phase output ignored");
            return Ok(Step::Duplicate);
        }

        self.ensure_running(&state)?;

        if matches!(output, PhaseOutput::FoundersBrief(_))
            && state
                .founders_brief
                .as_ref()
                .is_some_and(|b| b.is_approved())
        {
            return Err(ControllerError::InvariantViolation(
                "founders brief is locked after approval".to_string(),
            ));
        }
        if phase != state.current_phase {
            return Err(ControllerError::PhaseMismatch {
                expected: state.current_phase,
                got: phase,
            });
        }
        if !output.valid_for(phase) {
            return Err(ControllerError::InvariantViolation(format!(
                "{} output is not valid in the {} phase",
                output.kind(),
                phase
            )));
        }

        info!(%run_id, %phase, task_name, kind = output.kind(), "Applying phase output");
        match output {
            PhaseOutput::FoundersBrief(brief) => {
                brief.validate().map_err(ControllerError::InvariantViolation)?;
                let context = serde_json::json!({ "founders_brief": &brief });
                state.founders_brief = Some(brief);
                state.last_output_digest = Some(digest);
                self.pause(&mut state, Checkpoint::ApproveFoundersBrief, context)
            }
            PhaseOutput::CustomerProfile(profile) => {
                state.customer_profile = Some(profile);
                state.last_output_digest = Some(digest);
                self.commit(&mut state)?;
                Ok(Step::Stored { phase })
            }
            PhaseOutput::ValueMap(map) => {
                state.value_map = Some(map);
                state.last_output_digest = Some(digest);
                self.commit(&mut state)?;
                Ok(Step::Stored { phase })
            }
            PhaseOutput::FitAssessment(fit) => self.apply_fit(&mut state, fit, digest),
            PhaseOutput::Experiment(input) => {
                let outcome = self.ledger.record(
                    run_id,
                    phase,
                    state.current_round(),
                    input.experiment_id,
                    input.metrics,
                )?;
                Ok(Step::Recorded {
                    experiment_id: input.experiment_id,
                    duplicate: outcome == AppendOutcome::Duplicate,
                })
            }
            PhaseOutput::ExperimentsComplete => self.evaluate_phase(&mut state, digest),
        }
    }

    fn apply_fit(
        &self,
        state: &mut ValidationRunState,
        fit: crate::model::FitAssessment,
        digest: String,
    ) -> Result<Step, ControllerError> {
        if state.customer_profile.is_none() || state.value_map.is_none() {
            return Err(ControllerError::InvariantViolation(
                "fit assessment requires a customer profile and a value map".to_string(),
            ));
        }
        if fit.fit_score > 100 {
            return Err(ControllerError::InvariantViolation(format!(
                "fit_score {} is outside 0-100",
                fit.fit_score
            )));
        }

        let verdict = self.gate.evaluate_fit(&fit, state.fit_iterations);
        state.fit_assessment = Some(fit);
        state.last_output_digest = Some(digest);
        let context = serde_json::json!({
            "fit_score": verdict.score,
            "strength": verdict.strength,
            "fit_iterations": state.fit_iterations,
        });

        if verdict.proceed {
            return self.pause(state, Checkpoint::ApproveVpcCompletion, context);
        }

        state.fit_iterations += 1;
        if verdict.limit_exhausted {
            warn!(
                run_id = %state.run_id,
                fit_iterations = state.fit_iterations,
                "Fit refinement budget exhausted; escalating"
            );
            let context = serde_json::json!({
                "reason": "fit_iterations_exhausted",
                "fit_score": verdict.score,
                "fit_iterations": state.fit_iterations,
                "limit": self.gate.limits.fit_iterations,
            });
            return self.pause(state, Checkpoint::ApprovePivotEscalation, context);
        }

        self.commit(state)?;
        info!(
            run_id = %state.run_id,
            fit_score = verdict.score,
            fit_iterations = state.fit_iterations,
            "Fit below threshold; refining"
        );
        Ok(Step::Refine {
            phase: Phase::VpcDiscovery,
            fit_iterations: state.fit_iterations,
        })
    }

    /// Aggregate the current round and route on the gate verdict.
    fn evaluate_phase(
        &self,
        state: &mut ValidationRunState,
        digest: String,
    ) -> Result<Step, ControllerError> {
        let phase = state.current_phase;
        let round = state.current_round();

        let mut evidence = match self.ledger.aggregate(state.run_id, phase, round) {
            Ok(evidence) => evidence,
            Err(e) if e.is_transient() => return self.transient_failure(state, e.to_string()),
            Err(e) => return Err(e.into()),
        };
        let verdict = match self.gate.evaluate(&evidence, &state.pivots) {
            Ok(verdict) => verdict,
            Err(e) => return self.transient_failure(state, e.to_string()),
        };

        evidence.set_signal(verdict.signal);
        state.retry_count = 0;
        state.last_output_digest = Some(digest);
        match &evidence {
            Evidence::Desirability(e) => state.desirability = Some(e.clone()),
            Evidence::Feasibility(e) => state.feasibility = Some(e.clone()),
            Evidence::Viability(e) => state.viability = Some(e.clone()),
        }
        state.last_verdict = Some(verdict.clone());

        let context = serde_json::json!({
            "evidence": &evidence,
            "verdict": &verdict,
            "round": round,
            "pivots": state.pivots,
        });
        let checkpoint = route(&verdict);
        info!(
            run_id = %state.run_id,
            %phase,
            signal = %verdict.signal,
            recommendation = %verdict.recommendation,
            %checkpoint,
            "Gate routed run"
        );
        self.pause(state, checkpoint, context)
    }

    /// Count a failed evaluation. Within budget the caller gets a retryable
    /// error; past it the run fails.
    fn transient_failure(
        &self,
        state: &mut ValidationRunState,
        message: String,
    ) -> Result<Step, ControllerError> {
        state.retry_count += 1;
        let attempt = state.retry_count;

        if attempt > self.max_retries {
            let failure = format!(
                "evaluation failed after {} attempts: {}",
                attempt, message
            );
            state.fail(failure.clone());
            self.commit(state)?;
            warn!(run_id = %state.run_id, attempt, "Run failed after exhausting retries");
            self.emit(RunEvent::error(state.run_id, state.current_phase, &failure));
            return Ok(Step::Failed { message: failure });
        }

        self.commit(state)?;
        warn!(
            run_id = %state.run_id,
            attempt,
            max = self.max_retries,
            %message,
            "Transient evaluation failure"
        );
        Err(ControllerError::TransientEvaluation {
            attempt,
            max: self.max_retries,
            message,
        })
    }
}

/// Checkpoint a verdict pauses at.
fn route(verdict: &GateVerdict) -> Checkpoint {
    if verdict.proceed {
        return verdict.phase.gate_checkpoint();
    }
    if verdict.needs_escalation() {
        return Checkpoint::ApprovePivotEscalation;
    }
    match verdict.recommendation.pivot_kind() {
        Some(kind) => Checkpoint::for_pivot(kind),
        None => Checkpoint::ApprovePivotEscalation,
    }
}
