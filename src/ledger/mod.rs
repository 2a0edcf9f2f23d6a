//! Append-only evidence ledger and the folds that turn experiments into phase
//! evidence.
//!
//! Aggregation never reads stored totals: every call recomputes from the
//! recorded experiments of one round, so the result can always be re-derived.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::model::{
    CommitmentType, DesirabilityEvidence, Evidence, ExperimentMetrics, ExperimentResult,
    FeasibilityEvidence, FeasibilityStatus, Phase, ViabilityEvidence,
};
use crate::store::{AppendOutcome, ExperimentStore};

pub struct EvidenceLedger<S: ExperimentStore> {
    store: Arc<S>,
}

impl<S: ExperimentStore> Clone for EvidenceLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ExperimentStore> EvidenceLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append one experiment to `phase` at `round`.
    pub fn record(
        &self,
        run_id: Uuid,
        phase: Phase,
        round: u32,
        experiment_id: Uuid,
        metrics: ExperimentMetrics,
    ) -> Result<AppendOutcome, LedgerError> {
        if metrics.phase() != phase {
            return Err(LedgerError::WrongPhase {
                phase,
                kind: metrics.kind(),
            });
        }
        metrics.validate().map_err(LedgerError::InvalidMetrics)?;

        let result = ExperimentResult {
            experiment_id,
            run_id,
            phase,
            round,
            recorded_at: Utc::now(),
            metrics,
        };
        let outcome = self.store.append_experiment(&result)?;
        match outcome {
            AppendOutcome::Inserted => {
                info!(%run_id, %experiment_id, %phase, round, "Experiment recorded")
            }
            AppendOutcome::Duplicate => {
                debug!(%run_id, %experiment_id, "Experiment replay ignored")
            }
        }
        Ok(outcome)
    }

    pub fn experiments(
        &self,
        run_id: Uuid,
        phase: Phase,
    ) -> Result<Vec<ExperimentResult>, LedgerError> {
        Ok(self.store.experiments(run_id, phase)?)
    }

    /// Recompute the phase evidence for one round from the full history.
    pub fn aggregate(&self, run_id: Uuid, phase: Phase, round: u32) -> Result<Evidence, LedgerError> {
        let experiments = self.store.experiments(run_id, phase)?;
        fold(phase, round, &experiments)
    }
}

/// Pure fold over recorded experiments. Entries from other rounds are ignored.
pub fn fold(
    phase: Phase,
    round: u32,
    experiments: &[ExperimentResult],
) -> Result<Evidence, LedgerError> {
    let in_round: Vec<&ExperimentMetrics> = experiments
        .iter()
        .filter(|e| e.phase == phase && e.round == round)
        .map(|e| &e.metrics)
        .collect();

    if in_round.is_empty() {
        return Err(LedgerError::InsufficientEvidence {
            phase,
            reason: format!("no experiments recorded in round {}", round),
        });
    }

    match phase {
        Phase::Desirability => fold_desirability(&in_round),
        Phase::Feasibility => Ok(fold_feasibility(&in_round)),
        Phase::Viability => fold_viability(&in_round),
        Phase::Onboarding | Phase::VpcDiscovery => Err(LedgerError::InsufficientEvidence {
            phase,
            reason: "phase is not evaluated from experiments".to_string(),
        }),
    }
}

fn fold_desirability(metrics: &[&ExperimentMetrics]) -> Result<Evidence, LedgerError> {
    // Summed in u128 so large u64 counts cannot overflow.
    let (mut impressions, mut clicks, mut signups, mut preorders) = (0u128, 0u128, 0u128, 0u128);
    for m in metrics {
        if let ExperimentMetrics::Desirability {
            impressions: i,
            clicks: c,
            signups: s,
            preorders: p,
        } = m
        {
            impressions += u128::from(*i);
            clicks += u128::from(*c);
            signups += u128::from(*s);
            preorders += u128::from(*p);
        }
    }

    if impressions == 0 {
        return Err(LedgerError::InsufficientEvidence {
            phase: Phase::Desirability,
            reason: "no impressions recorded".to_string(),
        });
    }
    if clicks == 0 {
        return Err(LedgerError::InsufficientEvidence {
            phase: Phase::Desirability,
            reason: "no clicks recorded; zombie ratio undefined".to_string(),
        });
    }

    let committed = (signups + preorders).min(clicks);
    let commitment_type = if preorders > 0 {
        CommitmentType::SkinInGame
    } else if signups > 0 {
        CommitmentType::Verbal
    } else {
        CommitmentType::None
    };

    Ok(Evidence::Desirability(DesirabilityEvidence {
        problem_resonance: clicks as f64 / impressions as f64,
        zombie_ratio: (clicks - committed) as f64 / clicks as f64,
        commitment_type,
        experiments: metrics.len(),
        signal: None,
    }))
}

fn fold_feasibility(metrics: &[&ExperimentMetrics]) -> Evidence {
    let mut status = FeasibilityStatus::Green;
    let mut blocked_components = Vec::new();
    for m in metrics {
        if let ExperimentMetrics::Feasibility {
            status: s,
            component,
        } = m
        {
            status = status.max(*s);
            if *s == FeasibilityStatus::RedImpossible
                && !component.is_empty()
                && !blocked_components.contains(component)
            {
                blocked_components.push(component.clone());
            }
        }
    }

    Evidence::Feasibility(FeasibilityEvidence {
        status,
        blocked_components,
        experiments: metrics.len(),
        signal: None,
    })
}

fn fold_viability(metrics: &[&ExperimentMetrics]) -> Result<Evidence, LedgerError> {
    let (mut cac, mut ltv) = (0.0f64, 0.0f64);
    for m in metrics {
        if let ExperimentMetrics::Viability {
            customer_acquisition_cost,
            lifetime_value,
        } = m
        {
            cac += customer_acquisition_cost;
            ltv += lifetime_value;
        }
    }

    if cac <= 0.0 {
        return Err(LedgerError::InsufficientEvidence {
            phase: Phase::Viability,
            reason: "total customer acquisition cost is zero".to_string(),
        });
    }

    Ok(Evidence::Viability(ViabilityEvidence {
        ltv_cac_ratio: ltv / cac,
        experiments: metrics.len(),
        unit_economics_status: None,
        signal: None,
    }))
}
