use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{RunController, Step};
use crate::errors::{ControllerError, HitlError};
use crate::events::RunEvent;
use crate::model::{
    ApprovalStatus, Checkpoint, Decision, FinalDecision, FoundersBrief, Phase, PivotKind,
    RunStatus, ValidationRunState,
};
use crate::store::Backend;

/// What applying a decision did to the in-memory state.
enum Applied {
    Advanced { from: Phase, to: Phase },
    Completed(FinalDecision),
    Pivoted { kind: PivotKind, attempt: u32 },
    Stayed,
}

impl<S: Backend> RunController<S> {
    /// Record a decision for the run's pending checkpoint and consume it.
    pub fn resolve_checkpoint(
        &self,
        run_id: Uuid,
        request_id: Uuid,
        decision: Decision,
        rationale: Option<String>,
    ) -> Result<Step, ControllerError> {
        let state = self.store.load(run_id)?;
        self.check_pending(&state, request_id)?;
        let request = self.broker.get(request_id)?;
        if request.run_id != run_id {
            return Err(ControllerError::StaleDecision {
                run_id,
                reason: format!("request {} belongs to run {}", request_id, request.run_id),
            });
        }
        validate_decision(request.checkpoint, &decision)?;
        self.broker.resolve(request_id, decision, rationale)?;
        self.resume(run_id, request_id)
    }

    /// Consume a resolved approval request. Each decision is applied once: a
    /// second call finds the run no longer paused.
    pub fn resume(&self, run_id: Uuid, request_id: Uuid) -> Result<Step, ControllerError> {
        let mut state = self.store.load(run_id)?;
        self.check_pending(&state, request_id)?;

        let request = self.broker.get(request_id)?;
        if request.run_id != run_id || Some(request.checkpoint) != state.hitl_state {
            return Err(ControllerError::StaleDecision {
                run_id,
                reason: format!(
                    "request {} is for {} but the run waits on {}",
                    request_id,
                    request.checkpoint,
                    state
                        .hitl_state
                        .map(|c| c.as_str())
                        .unwrap_or("nothing")
                ),
            });
        }
        match request.status {
            ApprovalStatus::Pending => {
                return Err(ControllerError::CheckpointUnresolved { request_id });
            }
            ApprovalStatus::Cancelled => {
                return Err(ControllerError::StaleDecision {
                    run_id,
                    reason: format!("request {} was cancelled", request_id),
                });
            }
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Modified => {}
        }
        let decision = request.decision.clone().ok_or_else(|| {
            ControllerError::InvariantViolation(format!(
                "request {} is {} but carries no decision",
                request_id, request.status
            ))
        })?;

        let checkpoint = request.checkpoint;
        state.clear_pause();
        state.last_output_digest = None;
        info!(
            %run_id,
            %checkpoint,
            outcome = ?decision.outcome,
            option = decision.option.as_deref().unwrap_or(""),
            "Consuming approval decision"
        );

        let applied = match self.apply_decision(&mut state, checkpoint, &decision) {
            Ok(applied) => applied,
            Err(ControllerError::PivotLimitExhausted { kind, limit }) => {
                warn!(%run_id, %kind, limit, "Pivot limit exhausted; escalating");
                let context = serde_json::json!({
                    "reason": "pivot_limit_exhausted",
                    "pivot_kind": kind,
                    "limit": limit,
                    "pivots": state.pivots,
                });
                return self.pause(&mut state, Checkpoint::ApprovePivotEscalation, context);
            }
            Err(e) => return Err(e),
        };

        self.commit(&mut state)?;
        let step = match applied {
            Applied::Advanced { from, to } => {
                info!(%run_id, %from, %to, "Phase complete");
                self.emit(RunEvent::phase_complete(run_id, from, to));
                Step::Advanced { from, to }
            }
            Applied::Completed(decision) => {
                info!(%run_id, %decision, "Validation run complete");
                self.emit(RunEvent::run_complete(
                    run_id,
                    state.current_phase,
                    decision.as_str(),
                ));
                Step::Completed { decision }
            }
            Applied::Pivoted { kind, attempt } => {
                info!(%run_id, %kind, attempt, to = %state.current_phase, "Pivot applied");
                Step::Pivoted {
                    kind,
                    to: state.current_phase,
                    attempt,
                }
            }
            Applied::Stayed => Step::Stayed {
                phase: state.current_phase,
            },
        };
        Ok(step)
    }

    /// Repair a paused run whose approval request was never created, or hand
    /// back the outstanding request.
    pub fn reissue_checkpoint(&self, run_id: Uuid) -> Result<Step, ControllerError> {
        let state = self.store.load(run_id)?;
        let (Some(checkpoint), Some(request_id), RunStatus::Paused) =
            (state.hitl_state, state.pending_request_id, state.status)
        else {
            return Err(ControllerError::NoPendingCheckpoint {
                run_id,
                status: state.status,
            });
        };

        match self.broker.get(request_id) {
            Ok(request) if request.is_pending() => Ok(Step::Paused {
                checkpoint,
                request_id,
            }),
            Ok(_) => self.resume(run_id, request_id),
            Err(HitlError::NotFound { .. }) => {
                warn!(%run_id, %request_id, "Approval request missing; reissuing");
                let context = serde_json::json!({ "reissued": true });
                let request = self.broker.create_with_id(
                    request_id,
                    run_id,
                    checkpoint,
                    state.current_phase,
                    context.clone(),
                )?;
                self.emit(RunEvent::checkpoint_reached(
                    run_id,
                    state.current_phase,
                    checkpoint,
                    request_id,
                    &context,
                ));
                if !request.is_pending() {
                    return self.resume(run_id, request_id);
                }
                Ok(Step::Paused {
                    checkpoint,
                    request_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_pending(
        &self,
        state: &ValidationRunState,
        request_id: Uuid,
    ) -> Result<(), ControllerError> {
        if state.status != RunStatus::Paused {
            return Err(ControllerError::NoPendingCheckpoint {
                run_id: state.run_id,
                status: state.status,
            });
        }
        if state.pending_request_id != Some(request_id) {
            return Err(ControllerError::StaleDecision {
                run_id: state.run_id,
                reason: format!(
                    "run waits on request {}, not {}",
                    state
                        .pending_request_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    request_id
                ),
            });
        }
        Ok(())
    }

    fn apply_decision(
        &self,
        state: &mut ValidationRunState,
        checkpoint: Checkpoint,
        decision: &Decision,
    ) -> Result<Applied, ControllerError> {
        let approved = decision.outcome.is_approval();
        match checkpoint {
            Checkpoint::ApproveFoundersBrief => {
                if !approved {
                    state.founders_brief = None;
                    state.record_transition(Phase::Onboarding, Some(checkpoint), "brief rejected");
                    return Ok(Applied::Stayed);
                }
                if let Some(brief) = modified_brief(checkpoint, decision)? {
                    state.founders_brief = Some(brief);
                }
                let brief = state.founders_brief.as_mut().ok_or_else(|| {
                    ControllerError::InvariantViolation(
                        "no founders brief to approve".to_string(),
                    )
                })?;
                brief.approved_at = Some(Utc::now());
                Ok(advance_phase(state))
            }
            Checkpoint::ApproveVpcCompletion => {
                if !approved {
                    state.fit_assessment = None;
                    state.record_transition(Phase::VpcDiscovery, Some(checkpoint), "fit rejected");
                    return Ok(Applied::Stayed);
                }
                Ok(advance_phase(state))
            }
            Checkpoint::ApproveDesirabilityGate
            | Checkpoint::ApproveFeasibilityGate
            | Checkpoint::ApproveViabilityGate => {
                if !approved {
                    let phase = state.current_phase;
                    state.record_transition(phase, Some(checkpoint), "gate rejected");
                    return Ok(Applied::Stayed);
                }
                Ok(advance_phase(state))
            }
            Checkpoint::ApproveSegmentPivot
            | Checkpoint::ApproveValuePivot
            | Checkpoint::ApproveFeaturePivot
            | Checkpoint::ApproveStrategicPivot => {
                if !approved {
                    let phase = state.current_phase;
                    state.record_transition(phase, Some(checkpoint), "pivot rejected");
                    return Ok(Applied::Stayed);
                }
                if checkpoint == Checkpoint::ApproveStrategicPivot
                    && decision.option.as_deref() == Some("kill")
                {
                    state.complete(FinalDecision::Kill, "killed instead of strategic pivot");
                    return Ok(Applied::Completed(FinalDecision::Kill));
                }
                let kind = checkpoint.pivot_kind().ok_or_else(|| {
                    ControllerError::InvariantViolation(format!(
                        "{} is not a pivot checkpoint",
                        checkpoint
                    ))
                })?;
                self.apply_pivot(state, kind, decision.option.as_deref())
            }
            Checkpoint::ApprovePivotEscalation => {
                let option = if approved {
                    decision.option.as_deref()
                } else {
                    None
                };
                match option {
                    Some("proceed") => Ok(advance_phase(state)),
                    Some("pivot") => {
                        state.complete(FinalDecision::Pivot, "escalation: pivot");
                        Ok(Applied::Completed(FinalDecision::Pivot))
                    }
                    _ => {
                        state.complete(FinalDecision::Kill, "escalation: kill");
                        Ok(Applied::Completed(FinalDecision::Kill))
                    }
                }
            }
        }
    }

    /// Fails with `PivotLimitExhausted` when the budget for `kind` is spent;
    /// the caller turns that into an escalation.
    fn apply_pivot(
        &self,
        state: &mut ValidationRunState,
        kind: PivotKind,
        option: Option<&str>,
    ) -> Result<Applied, ControllerError> {
        let limit = self.gate.limits.limit(kind);
        if state.pivots.get(kind) >= limit {
            return Err(ControllerError::PivotLimitExhausted { kind, limit });
        }
        let attempt = state.pivots.increment(kind);

        match kind {
            PivotKind::Segment | PivotKind::Value => {
                if kind == PivotKind::Segment {
                    state.customer_profile = None;
                } else {
                    state.value_map = None;
                }
                state.fit_assessment = None;
                state.fit_iterations = 0;
                state.desirability = None;
                let round = state.rounds.bump(Phase::Desirability);
                state.move_to(
                    Phase::VpcDiscovery,
                    format!("{} pivot #{}, desirability round {}", kind, attempt, round),
                );
            }
            PivotKind::Feature => {
                state.feasibility = None;
                let round = state.rounds.bump(Phase::Feasibility);
                state.move_to(
                    Phase::Feasibility,
                    format!("feature pivot #{}, feasibility round {}", attempt, round),
                );
            }
            PivotKind::Strategic => {
                state.viability = None;
                let round = state.rounds.bump(Phase::Viability);
                state.move_to(
                    Phase::Viability,
                    format!(
                        "strategic pivot #{} ({}), viability round {}",
                        attempt,
                        option.unwrap_or("price_increase"),
                        round
                    ),
                );
            }
        }
        Ok(Applied::Pivoted { kind, attempt })
    }
}

/// Reject a decision that could never be applied, before it is recorded.
/// Only `approve_founders_brief` accepts `modifications`.
fn validate_decision(checkpoint: Checkpoint, decision: &Decision) -> Result<(), ControllerError> {
    if decision.modifications.is_some() && checkpoint != Checkpoint::ApproveFoundersBrief {
        return Err(ControllerError::InvalidDecision {
            checkpoint,
            reason: "this checkpoint takes no modifications".to_string(),
        });
    }
    if decision.outcome.is_approval() {
        modified_brief(checkpoint, decision)?;
    }
    Ok(())
}

fn modified_brief(
    checkpoint: Checkpoint,
    decision: &Decision,
) -> Result<Option<FoundersBrief>, ControllerError> {
    let Some(modifications) = &decision.modifications else {
        return Ok(None);
    };
    let invalid = |reason: String| ControllerError::InvalidDecision { checkpoint, reason };
    let brief: FoundersBrief = serde_json::from_value(modifications.clone())
        .map_err(|e| invalid(format!("modified founders brief is malformed: {e}")))?;
    brief.validate().map_err(invalid)?;
    Ok(Some(brief))
}

/// Move to the next phase, or finish with `proceed` after the last one.
fn advance_phase(state: &mut ValidationRunState) -> Applied {
    let from = state.current_phase;
    match from.next() {
        Some(to) => {
            state.move_to(to, format!("{} approved", from));
            Applied::Advanced { from, to }
        }
        None => {
            state.complete(FinalDecision::Proceed, "viability approved");
            Applied::Completed(FinalDecision::Proceed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::controller;
    use super::super::{PhaseOutput, Step};
    use super::*;
    use crate::store::CheckpointStore;
    use crate::model::{DecisionOutcome, FoundersBrief};

    fn brief(idea: &str) -> FoundersBrief {
        FoundersBrief {
            business_idea: idea.into(),
            problem_statement: "Dog owners can't find sitters last minute".into(),
            target_customers: vec![],
            solution_hypothesis: String::new(),
            key_assumptions: vec![],
            success_criteria: vec![],
            approved_at: None,
        }
    }

    fn paused_at_brief(
        c: &RunController<crate::store::MemoryStore>,
    ) -> (Uuid, Uuid) {
        let id = Uuid::new_v4();
        c.start(id, "p", "u", serde_json::json!({})).unwrap();
        let Step::Paused { request_id, .. } = c
            .advance(
                id,
                Phase::Onboarding,
                "interview",
                PhaseOutput::FoundersBrief(brief("On-demand dog sitting")),
            )
            .unwrap()
        else {
            panic!("Expected pause");
        };
        (id, request_id)
    }

    #[test]
    fn test_resume_without_pending_checkpoint() {
        let (c, _) = controller();
        let id = Uuid::new_v4();
        c.start(id, "p", "u", serde_json::json!({})).unwrap();
        assert!(matches!(
            c.resume(id, Uuid::new_v4()),
            Err(ControllerError::NoPendingCheckpoint {
                status: RunStatus::Running,
                ..
            })
        ));
    }

    #[test]
    fn test_resume_before_resolution() {
        let (c, _) = controller();
        let (id, request_id) = paused_at_brief(&c);
        assert!(matches!(
            c.resume(id, request_id),
            Err(ControllerError::CheckpointUnresolved { .. })
        ));
    }

    #[test]
    fn test_stale_request_id_does_not_mutate() {
        let (c, _) = controller();
        let (id, _) = paused_at_brief(&c);
        let before = c.status(id).unwrap();
        assert!(matches!(
            c.resolve_checkpoint(id, Uuid::new_v4(), Decision::approve(), None),
            Err(ControllerError::StaleDecision { .. })
        ));
        assert_eq!(c.status(id).unwrap(), before);
    }

    #[test]
    fn test_approve_brief_locks_and_advances() {
        let (c, sink) = controller();
        let (id, request_id) = paused_at_brief(&c);
        let step = c
            .resolve_checkpoint(id, request_id, Decision::approve(), Some("clear".into()))
            .unwrap();
        assert_eq!(
            step,
            Step::Advanced {
                from: Phase::Onboarding,
                to: Phase::VpcDiscovery
            }
        );
        let state = c.status(id).unwrap();
        assert!(state.founders_brief.unwrap().is_approved());
        assert!(sink.drain().iter().any(|e| e.event_type == crate::events::EventType::PhaseComplete));

        // Locked brief wins over the phase check.
        assert!(matches!(
            c.advance(
                id,
                Phase::Onboarding,
                "interview-2",
                PhaseOutput::FoundersBrief(brief("New idea"))
            ),
            Err(ControllerError::InvariantViolation(msg)) if msg.contains("locked")
        ));
    }

    #[test]
    fn test_second_resume_is_rejected() {
        let (c, _) = controller();
        let (id, request_id) = paused_at_brief(&c);
        c.resolve_checkpoint(id, request_id, Decision::approve(), None)
            .unwrap();
        let version = c.status(id).unwrap().version;
        assert!(matches!(
            c.resume(id, request_id),
            Err(ControllerError::NoPendingCheckpoint { .. })
        ));
        assert_eq!(c.status(id).unwrap().version, version);
    }

    #[test]
    fn test_modified_brief_replaces_before_lock() {
        let (c, _) = controller();
        let (id, request_id) = paused_at_brief(&c);
        let modified = serde_json::to_value(brief("Dog sitting marketplace")).unwrap();
        c.resolve_checkpoint(id, request_id, Decision::modify(modified), None)
            .unwrap();
        let brief = c.status(id).unwrap().founders_brief.unwrap();
        assert_eq!(brief.business_idea, "Dog sitting marketplace");
        assert!(brief.is_approved());
        assert_eq!(
            c.broker().get(request_id).unwrap().decision.unwrap().outcome,
            DecisionOutcome::Modified
        );
    }

    #[test]
    fn test_malformed_modification_leaves_request_pending() {
        let (c, _) = controller();
        let (id, request_id) = paused_at_brief(&c);
        let before = c.status(id).unwrap();

        let err = c
            .resolve_checkpoint(
                id,
                request_id,
                Decision::modify(serde_json::json!({"oops": 1})),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::InvalidDecision {
                checkpoint: Checkpoint::ApproveFoundersBrief,
                ..
            }
        ));
        assert!(c.broker().get(request_id).unwrap().is_pending());
        assert_eq!(c.status(id).unwrap(), before);

        let empty_idea = serde_json::to_value(brief("  ")).unwrap();
        assert!(matches!(
            c.resolve_checkpoint(id, request_id, Decision::modify(empty_idea), None),
            Err(ControllerError::InvalidDecision { .. })
        ));

        let step = c
            .resolve_checkpoint(id, request_id, Decision::approve(), None)
            .unwrap();
        assert!(matches!(step, Step::Advanced { .. }));
    }

    #[test]
    fn test_modifications_refused_outside_founders_brief() {
        let (c, _) = controller();
        let id = Uuid::new_v4();
        let mut state = c.start(id, "p", "u", serde_json::json!({})).unwrap();
        let request_id = Uuid::new_v4();
        state.current_phase = Phase::Desirability;
        state.pause(Checkpoint::ApproveDesirabilityGate, request_id);
        state.version = 1;
        c.store.save(&state, 0).unwrap();
        c.broker()
            .create_with_id(
                request_id,
                id,
                Checkpoint::ApproveDesirabilityGate,
                Phase::Desirability,
                serde_json::Value::Null,
            )
            .unwrap();

        assert!(matches!(
            c.resolve_checkpoint(
                id,
                request_id,
                Decision::modify(serde_json::json!({"zombie_ratio": 0.1})),
                None
            ),
            Err(ControllerError::InvalidDecision {
                checkpoint: Checkpoint::ApproveDesirabilityGate,
                ..
            })
        ));
        assert!(c.broker().get(request_id).unwrap().is_pending());
        assert_eq!(c.status(id).unwrap().status, RunStatus::Paused);
    }

    #[test]
    fn test_rejected_brief_is_cleared() {
        let (c, _) = controller();
        let (id, request_id) = paused_at_brief(&c);
        let step = c
            .resolve_checkpoint(id, request_id, Decision::reject("too vague"), None)
            .unwrap();
        assert_eq!(
            step,
            Step::Stayed {
                phase: Phase::Onboarding
            }
        );
        let state = c.status(id).unwrap();
        assert!(state.founders_brief.is_none());
        assert_eq!(state.status, RunStatus::Running);

        // The same brief can be resubmitted after a rejection.
        let again = c
            .advance(
                id,
                Phase::Onboarding,
                "interview",
                PhaseOutput::FoundersBrief(brief("On-demand dog sitting")),
            )
            .unwrap();
        assert!(matches!(again, Step::Paused { .. }));
    }

    #[test]
    fn test_escalation_defaults_to_kill() {
        let (c, _) = controller();
        let id = Uuid::new_v4();
        let mut state = c.start(id, "p", "u", serde_json::json!({})).unwrap();
        let request_id = Uuid::new_v4();
        state.current_phase = Phase::Feasibility;
        state.pause(Checkpoint::ApprovePivotEscalation, request_id);
        state.version = 1;
        c.store.save(&state, 0).unwrap();
        c.broker()
            .create_with_id(
                request_id,
                id,
                Checkpoint::ApprovePivotEscalation,
                Phase::Feasibility,
                serde_json::Value::Null,
            )
            .unwrap();

        let step = c
            .resolve_checkpoint(id, request_id, Decision::approve(), None)
            .unwrap();
        assert_eq!(
            step,
            Step::Completed {
                decision: FinalDecision::Kill
            }
        );
        assert_eq!(c.status(id).unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn test_reissue_recreates_missing_request() {
        let (c, _) = controller();
        let id = Uuid::new_v4();
        let mut state = c.start(id, "p", "u", serde_json::json!({})).unwrap();
        let request_id = Uuid::new_v4();
        state.founders_brief = Some(brief("Crash between save and request"));
        state.pause(Checkpoint::ApproveFoundersBrief, request_id);
        state.version = 1;
        c.store.save(&state, 0).unwrap();

        assert_eq!(
            c.reissue_checkpoint(id).unwrap(),
            Step::Paused {
                checkpoint: Checkpoint::ApproveFoundersBrief,
                request_id
            }
        );
        assert!(c.broker().get(request_id).unwrap().is_pending());
        assert!(c.reissue_checkpoint(id).is_ok());
    }
}
