//! Experiment results recorded in the ledger and the evidence summaries the
//! gate evaluates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::phase::Phase;
use super::pivot::PivotRecommendation;

/// Outcome of a single feasibility probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeasibilityStatus {
    Green,
    OrangeConstrained,
    RedImpossible,
}

impl FeasibilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeasibilityStatus::Green => "green",
            FeasibilityStatus::OrangeConstrained => "orange_constrained",
            FeasibilityStatus::RedImpossible => "red_impossible",
        }
    }
}

/// Raw metrics of one experiment. The variant must match the phase it is
/// recorded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExperimentMetrics {
    Desirability {
        impressions: u64,
        clicks: u64,
        #[serde(default)]
        signups: u64,
        /// Deposits or pre-orders: skin in the game.
        #[serde(default)]
        preorders: u64,
    },
    Feasibility {
        status: FeasibilityStatus,
        #[serde(default)]
        component: String,
    },
    Viability {
        customer_acquisition_cost: f64,
        lifetime_value: f64,
    },
}

impl ExperimentMetrics {
    pub fn kind(&self) -> &'static str {
        match self {
            ExperimentMetrics::Desirability { .. } => "desirability",
            ExperimentMetrics::Feasibility { .. } => "feasibility",
            ExperimentMetrics::Viability { .. } => "viability",
        }
    }

    /// The phase whose ledger accepts this kind of experiment.
    pub fn phase(&self) -> Phase {
        match self {
            ExperimentMetrics::Desirability { .. } => Phase::Desirability,
            ExperimentMetrics::Feasibility { .. } => Phase::Feasibility,
            ExperimentMetrics::Viability { .. } => Phase::Viability,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ExperimentMetrics::Desirability {
                impressions, clicks, ..
            } => {
                if clicks > impressions {
                    return Err(format!(
                        "clicks ({}) exceed impressions ({})",
                        clicks, impressions
                    ));
                }
                Ok(())
            }
            ExperimentMetrics::Feasibility { .. } => Ok(()),
            ExperimentMetrics::Viability {
                customer_acquisition_cost,
                lifetime_value,
            } => {
                if !customer_acquisition_cost.is_finite() || *customer_acquisition_cost < 0.0 {
                    return Err(format!(
                        "customer_acquisition_cost must be a non-negative number, got {}",
                        customer_acquisition_cost
                    ));
                }
                if !lifetime_value.is_finite() || *lifetime_value < 0.0 {
                    return Err(format!(
                        "lifetime_value must be a non-negative number, got {}",
                        lifetime_value
                    ));
                }
                Ok(())
            }
        }
    }
}

/// One append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment_id: Uuid,
    pub run_id: Uuid,
    pub phase: Phase,
    /// Evidence round at recording time; a pivot starts a new round.
    pub round: u32,
    pub recorded_at: DateTime<Utc>,
    pub metrics: ExperimentMetrics,
}

impl ExperimentResult {
    /// Two entries describe the same experiment if everything but the
    /// recording timestamp matches.
    pub fn same_payload(&self, other: &ExperimentResult) -> bool {
        self.experiment_id == other.experiment_id
            && self.run_id == other.run_id
            && self.phase == other.phase
            && self.round == other.round
            && self.metrics == other.metrics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentType {
    None,
    Verbal,
    SkinInGame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesirabilityEvidence {
    /// Share of the reached audience that engaged with the problem.
    pub problem_resonance: f64,
    /// Share of the engaged audience that did not commit.
    pub zombie_ratio: f64,
    pub commitment_type: CommitmentType,
    #[serde(default)]
    pub experiments: usize,
    /// Set when the gate evaluates this evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityEvidence {
    pub status: FeasibilityStatus,
    #[serde(default)]
    pub blocked_components: Vec<String>,
    #[serde(default)]
    pub experiments: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitEconomicsStatus {
    Underwater,
    Profitable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViabilityEvidence {
    pub ltv_cac_ratio: f64,
    #[serde(default)]
    pub experiments: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_economics_status: Option<UnitEconomicsStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
}

impl ViabilityEvidence {
    pub fn classify(&self, min_ltv_cac_ratio: f64) -> UnitEconomicsStatus {
        if self.ltv_cac_ratio < min_ltv_cac_ratio {
            UnitEconomicsStatus::Underwater
        } else {
            UnitEconomicsStatus::Profitable
        }
    }
}

/// Canonical evidence shape, one variant per experimental phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase_kind", rename_all = "snake_case")]
pub enum Evidence {
    Desirability(DesirabilityEvidence),
    Feasibility(FeasibilityEvidence),
    Viability(ViabilityEvidence),
}

impl Evidence {
    pub fn phase(&self) -> Phase {
        match self {
            Evidence::Desirability(_) => Phase::Desirability,
            Evidence::Feasibility(_) => Phase::Feasibility,
            Evidence::Viability(_) => Phase::Viability,
        }
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            Evidence::Desirability(e) => e.signal,
            Evidence::Feasibility(e) => e.signal,
            Evidence::Viability(e) => e.signal,
        }
    }

    /// Stamp the gate's signal onto the evidence it was computed from.
    pub fn set_signal(&mut self, signal: Signal) {
        match self {
            Evidence::Desirability(e) => e.signal = Some(signal),
            Evidence::Feasibility(e) => e.signal = Some(signal),
            Evidence::Viability(e) => {
                e.signal = Some(signal);
                e.unit_economics_status = match signal {
                    Signal::Underwater => Some(UnitEconomicsStatus::Underwater),
                    Signal::Profitable => Some(UnitEconomicsStatus::Profitable),
                    _ => None,
                };
            }
        }
    }
}

/// Categorical verdict derived from thresholded metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    NoInterest,
    WeakInterest,
    StrongCommitment,
    Green,
    OrangeConstrained,
    RedImpossible,
    Underwater,
    Profitable,
    /// Fit assessment at or above threshold.
    FitConfirmed,
    /// Fit assessment below threshold.
    FitWeak,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::NoInterest => "no_interest",
            Signal::WeakInterest => "weak_interest",
            Signal::StrongCommitment => "strong_commitment",
            Signal::Green => "green",
            Signal::OrangeConstrained => "orange_constrained",
            Signal::RedImpossible => "red_impossible",
            Signal::Underwater => "underwater",
            Signal::Profitable => "profitable",
            Signal::FitConfirmed => "fit_confirmed",
            Signal::FitWeak => "fit_weak",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<FeasibilityStatus> for Signal {
    fn from(status: FeasibilityStatus) -> Self {
        match status {
            FeasibilityStatus::Green => Signal::Green,
            FeasibilityStatus::OrangeConstrained => Signal::OrangeConstrained,
            FeasibilityStatus::RedImpossible => Signal::RedImpossible,
        }
    }
}

impl From<UnitEconomicsStatus> for Signal {
    fn from(status: UnitEconomicsStatus) -> Self {
        match status {
            UnitEconomicsStatus::Underwater => Signal::Underwater,
            UnitEconomicsStatus::Profitable => Signal::Profitable,
        }
    }
}

/// Output of a gate evaluation: `(signal, pivot_recommendation, proceed)`
/// plus whether the recommended pivot has run out of attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub phase: Phase,
    pub signal: Signal,
    pub recommendation: PivotRecommendation,
    pub proceed: bool,
    #[serde(default)]
    pub limit_exhausted: bool,
    #[serde(default)]
    pub rationale: String,
}

impl GateVerdict {
    pub fn as_tuple(&self) -> (Signal, PivotRecommendation, bool) {
        (self.signal, self.recommendation, self.proceed)
    }

    /// Whether a human must make a terminal call instead of approving a pivot.
    pub fn needs_escalation(&self) -> bool {
        !self.proceed && (self.limit_exhausted || self.recommendation == PivotRecommendation::Kill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_tagged_by_type() {
        let metrics: ExperimentMetrics = serde_json::from_str(
            r#"{"type": "desirability", "impressions": 1000, "clicks": 400, "signups": 20}"#,
        )
        .unwrap();
        assert_eq!(metrics.phase(), Phase::Desirability);
        match metrics {
            ExperimentMetrics::Desirability { preorders, .. } => assert_eq!(preorders, 0),
            other => panic!("Expected desirability metrics, got {other:?}"),
        }
    }

    #[test]
    fn test_metrics_validation() {
        let bad_clicks = ExperimentMetrics::Desirability {
            impressions: 10,
            clicks: 11,
            signups: 0,
            preorders: 0,
        };
        assert!(bad_clicks.validate().is_err());

        let negative_cac = ExperimentMetrics::Viability {
            customer_acquisition_cost: -1.0,
            lifetime_value: 10.0,
        };
        assert!(negative_cac.validate().is_err());

        let nan_ltv = ExperimentMetrics::Viability {
            customer_acquisition_cost: 10.0,
            lifetime_value: f64::NAN,
        };
        assert!(nan_ltv.validate().is_err());
    }

    #[test]
    fn test_feasibility_status_orders_by_severity() {
        assert!(FeasibilityStatus::RedImpossible > FeasibilityStatus::OrangeConstrained);
        assert!(FeasibilityStatus::OrangeConstrained > FeasibilityStatus::Green);
    }

    #[test]
    fn test_unit_economics_threshold_is_exclusive() {
        let at = ViabilityEvidence {
            ltv_cac_ratio: 3.0,
            experiments: 1,
            unit_economics_status: None,
            signal: None,
        };
        assert_eq!(at.classify(3.0), UnitEconomicsStatus::Profitable);
        let below = ViabilityEvidence {
            ltv_cac_ratio: 1.2,
            experiments: 1,
            unit_economics_status: None,
            signal: None,
        };
        assert_eq!(below.classify(3.0), UnitEconomicsStatus::Underwater);
    }

    #[test]
    fn test_evidence_tagged_serialization() {
        let evidence = Evidence::Feasibility(FeasibilityEvidence {
            status: FeasibilityStatus::RedImpossible,
            blocked_components: vec!["realtime sync".into()],
            experiments: 2,
            signal: None,
        });
        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["phase_kind"], "feasibility");
        assert_eq!(json["status"], "red_impossible");
        assert!(json.get("signal").is_none());
    }

    #[test]
    fn test_set_signal_fills_unit_economics_status() {
        let mut evidence = Evidence::Viability(ViabilityEvidence {
            ltv_cac_ratio: 1.2,
            experiments: 1,
            unit_economics_status: None,
            signal: None,
        });
        evidence.set_signal(Signal::Underwater);
        assert_eq!(evidence.signal(), Some(Signal::Underwater));
        let Evidence::Viability(v) = &evidence else {
            panic!("Expected viability evidence");
        };
        assert_eq!(v.unit_economics_status, Some(UnitEconomicsStatus::Underwater));

        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["signal"], "underwater");
        assert_eq!(json["unit_economics_status"], "underwater");
    }
}
