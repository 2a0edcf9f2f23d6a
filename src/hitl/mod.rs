//! Human-in-the-loop broker: pending approval requests and their exactly-once
//! resolution.

pub mod policy;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::errors::HitlError;
use crate::model::{ApprovalRequest, Checkpoint, Decision, Phase, ResolvedBy};
use crate::store::ApprovalStore;

pub use policy::{AutoApprovePolicy, AutoApproveRule, NeverAutoApprove, ThresholdPolicy};

pub struct HitlBroker<S: ApprovalStore> {
    store: Arc<S>,
    policy: Arc<dyn AutoApprovePolicy>,
}

impl<S: ApprovalStore> Clone for HitlBroker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<S: ApprovalStore> HitlBroker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, Arc::new(NeverAutoApprove))
    }

    pub fn with_policy(store: Arc<S>, policy: Arc<dyn AutoApprovePolicy>) -> Self {
        Self { store, policy }
    }

    /// Open a request for `checkpoint`. When the auto-approve policy accepts
    /// it, the returned request is already resolved.
    pub fn create(
        &self,
        run_id: Uuid,
        checkpoint: Checkpoint,
        phase: Phase,
        context: serde_json::Value,
    ) -> Result<ApprovalRequest, HitlError> {
        self.create_with_id(Uuid::new_v4(), run_id, checkpoint, phase, context)
    }

    pub fn create_with_id(
        &self,
        id: Uuid,
        run_id: Uuid,
        checkpoint: Checkpoint,
        phase: Phase,
        context: serde_json::Value,
    ) -> Result<ApprovalRequest, HitlError> {
        let mut request = ApprovalRequest::new(id, run_id, checkpoint, phase, context);
        self.store.insert_request(&request)?;
        info!(%run_id, request_id = %id, %checkpoint, "Approval requested");

        if let Some(rationale) = self.policy.auto_approve(&request) {
            request.resolve(Decision::approve(), Some(rationale), ResolvedBy::AutoPolicy);
            self.store.complete_request(&request)?;
            info!(%run_id, request_id = %id, %checkpoint, "Approval auto-resolved by policy");
        }
        Ok(request)
    }

    /// Record a human decision. Fails with `AlreadyResolved` on the second
    /// call for the same request.
    pub fn resolve(
        &self,
        request_id: Uuid,
        decision: Decision,
        rationale: Option<String>,
    ) -> Result<ApprovalRequest, HitlError> {
        let mut request = self.store.get_request(request_id)?;
        if !request.is_pending() {
            return Err(HitlError::AlreadyResolved {
                id: request_id,
                status: request.status,
            });
        }
        if let Some(option) = &decision.option
            && !request.options.iter().any(|o| o == option)
        {
            return Err(HitlError::InvalidOption {
                checkpoint: request.checkpoint,
                option: option.clone(),
            });
        }

        request.resolve(decision, rationale, ResolvedBy::Human);
        self.store.complete_request(&request)?;
        info!(
            run_id = %request.run_id,
            %request_id,
            checkpoint = %request.checkpoint,
            status = %request.status,
            "Approval resolved"
        );
        Ok(request)
    }

    /// Withdraw a pending request, e.g. when its run is killed.
    pub fn cancel(&self, request_id: Uuid, reason: &str) -> Result<ApprovalRequest, HitlError> {
        let mut request = self.store.get_request(request_id)?;
        if !request.is_pending() {
            return Err(HitlError::AlreadyResolved {
                id: request_id,
                status: request.status,
            });
        }
        request.cancel(reason);
        self.store.complete_request(&request)?;
        info!(run_id = %request.run_id, %request_id, "Approval cancelled");
        Ok(request)
    }

    pub fn get(&self, request_id: Uuid) -> Result<ApprovalRequest, HitlError> {
        Ok(self.store.get_request(request_id)?)
    }

    pub fn pending(&self) -> Result<Vec<ApprovalRequest>, HitlError> {
        Ok(self.store.pending_requests()?)
    }

    pub fn for_run(&self, run_id: Uuid) -> Result<Vec<ApprovalRequest>, HitlError> {
        Ok(self.store.requests_for_run(run_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalStatus, DecisionOutcome};
    use crate::store::MemoryStore;

    fn broker() -> HitlBroker<MemoryStore> {
        HitlBroker::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_resolve_exactly_once() {
        let broker = broker();
        let req = broker
            .create(
                Uuid::new_v4(),
                Checkpoint::ApproveFeasibilityGate,
                Phase::Feasibility,
                serde_json::json!({}),
            )
            .unwrap();
        assert!(req.is_pending());

        let resolved = broker
            .resolve(req.id, Decision::approve(), Some("looks buildable".into()))
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_by, Some(ResolvedBy::Human));

        match broker.resolve(req.id, Decision::reject("changed my mind"), None) {
            Err(HitlError::AlreadyResolved { status, .. }) => {
                assert_eq!(status, ApprovalStatus::Approved)
            }
            other => panic!("Expected AlreadyResolved, got {other:?}"),
        }
    }

    #[test]
    fn test_one_pending_per_run() {
        let broker = broker();
        let run = Uuid::new_v4();
        broker
            .create(
                run,
                Checkpoint::ApproveFoundersBrief,
                Phase::Onboarding,
                serde_json::Value::Null,
            )
            .unwrap();
        assert!(matches!(
            broker.create(
                run,
                Checkpoint::ApproveVpcCompletion,
                Phase::VpcDiscovery,
                serde_json::Value::Null
            ),
            Err(HitlError::AlreadyPending { .. })
        ));
    }

    #[test]
    fn test_invalid_option_rejected() {
        let broker = broker();
        let req = broker
            .create(
                Uuid::new_v4(),
                Checkpoint::ApproveStrategicPivot,
                Phase::Viability,
                serde_json::Value::Null,
            )
            .unwrap();
        assert!(matches!(
            broker.resolve(req.id, Decision::approve().with_option("ipo"), None),
            Err(HitlError::InvalidOption { .. })
        ));
        assert!(broker.get(req.id).unwrap().is_pending());

        let ok = broker
            .resolve(
                req.id,
                Decision::approve().with_option("cost_reduction"),
                None,
            )
            .unwrap();
        assert_eq!(
            ok.decision.and_then(|d| d.option).as_deref(),
            Some("cost_reduction")
        );
    }

    #[test]
    fn test_auto_policy_resolves_on_create() {
        let policy = ThresholdPolicy::new(vec![AutoApproveRule {
            checkpoint: Checkpoint::ApproveDesirabilityGate,
            max_spend: Some(100.0),
            always: false,
        }]);
        let broker = HitlBroker::with_policy(Arc::new(MemoryStore::new()), Arc::new(policy));
        let req = broker
            .create(
                Uuid::new_v4(),
                Checkpoint::ApproveDesirabilityGate,
                Phase::Desirability,
                serde_json::json!({"estimated_spend": 40}),
            )
            .unwrap();
        assert_eq!(req.status, ApprovalStatus::Approved);
        assert_eq!(req.resolved_by, Some(ResolvedBy::AutoPolicy));
        assert_eq!(
            req.decision.map(|d| d.outcome),
            Some(DecisionOutcome::Approved)
        );
        assert!(broker.pending().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_closes_pending_request() {
        let broker = broker();
        let run = Uuid::new_v4();
        let req = broker
            .create(
                run,
                Checkpoint::ApproveValuePivot,
                Phase::Desirability,
                serde_json::Value::Null,
            )
            .unwrap();
        let cancelled = broker.cancel(req.id, "run killed").unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
        assert_eq!(cancelled.resolved_by, Some(ResolvedBy::System));
        assert!(broker.cancel(req.id, "again").is_err());
        assert_eq!(broker.for_run(run).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_request() {
        assert!(matches!(
            broker().get(Uuid::new_v4()),
            Err(HitlError::NotFound { .. })
        ));
    }
}
