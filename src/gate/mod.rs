//! Phase gate evaluation: evidence in, `(signal, recommendation, proceed)` out.
//!
//! Evaluation is pure. Pivot counters are passed in by the caller so the same
//! evidence and counters always produce the same verdict.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::GateError;
use crate::model::{
    DesirabilityEvidence, Evidence, FeasibilityEvidence, FeasibilityStatus, FitAssessment,
    FitStrength, GateVerdict, Phase, PivotCounts, PivotKind, PivotRecommendation, Signal,
    UnitEconomicsStatus, ViabilityEvidence,
};

/// Numeric boundaries used by the gates. The operators are fixed:
/// resonance fails strictly below its minimum, the zombie ratio fails at or
/// above its maximum, unit economics are underwater strictly below the
/// minimum ratio, and fit passes at or above its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    #[serde(default = "default_fit_score")]
    pub fit_score: u8,
    #[serde(default = "default_min_problem_resonance")]
    pub min_problem_resonance: f64,
    #[serde(default = "default_max_zombie_ratio")]
    pub max_zombie_ratio: f64,
    #[serde(default = "default_min_ltv_cac_ratio")]
    pub min_ltv_cac_ratio: f64,
}

fn default_fit_score() -> u8 {
    70
}

fn default_min_problem_resonance() -> f64 {
    0.3
}

fn default_max_zombie_ratio() -> f64 {
    0.7
}

fn default_min_ltv_cac_ratio() -> f64 {
    3.0
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            fit_score: default_fit_score(),
            min_problem_resonance: default_min_problem_resonance(),
            max_zombie_ratio: default_max_zombie_ratio(),
            min_ltv_cac_ratio: default_min_ltv_cac_ratio(),
        }
    }
}

/// Maximum pivots per kind, plus the VPC fit refinement budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotLimits {
    #[serde(default = "default_segment_limit")]
    pub segment: u32,
    #[serde(default = "default_value_limit")]
    pub value: u32,
    #[serde(default = "default_feature_limit")]
    pub feature: u32,
    #[serde(default = "default_strategic_limit")]
    pub strategic: u32,
    #[serde(default = "default_fit_iterations")]
    pub fit_iterations: u32,
}

fn default_segment_limit() -> u32 {
    3
}

fn default_value_limit() -> u32 {
    3
}

fn default_feature_limit() -> u32 {
    2
}

fn default_strategic_limit() -> u32 {
    2
}

fn default_fit_iterations() -> u32 {
    3
}

impl Default for PivotLimits {
    fn default() -> Self {
        Self {
            segment: default_segment_limit(),
            value: default_value_limit(),
            feature: default_feature_limit(),
            strategic: default_strategic_limit(),
            fit_iterations: default_fit_iterations(),
        }
    }
}

impl PivotLimits {
    pub fn limit(&self, kind: PivotKind) -> u32 {
        match kind {
            PivotKind::Segment => self.segment,
            PivotKind::Value => self.value,
            PivotKind::Feature => self.feature,
            PivotKind::Strategic => self.strategic,
        }
    }

    pub fn exhausted(&self, kind: PivotKind, counts: &PivotCounts) -> bool {
        counts.get(kind) >= self.limit(kind)
    }
}

/// Outcome of a VPC fit assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitVerdict {
    pub score: u8,
    pub strength: FitStrength,
    pub proceed: bool,
    /// The refinement budget is spent and a human must decide.
    pub limit_exhausted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub thresholds: GateThresholds,
    pub limits: PivotLimits,
}

impl Gate {
    pub fn new(thresholds: GateThresholds, limits: PivotLimits) -> Self {
        Self { thresholds, limits }
    }

    /// Evaluate phase evidence against the thresholds, taking the run's pivot
    /// counters into account.
    pub fn evaluate(
        &self,
        evidence: &Evidence,
        pivots: &PivotCounts,
    ) -> Result<GateVerdict, GateError> {
        let verdict = match evidence {
            Evidence::Desirability(e) => self.desirability(e, pivots)?,
            Evidence::Feasibility(e) => self.feasibility(e, pivots),
            Evidence::Viability(e) => self.viability(e, pivots)?,
        };
        debug!(
            phase = %verdict.phase,
            signal = %verdict.signal,
            recommendation = %verdict.recommendation,
            proceed = verdict.proceed,
            limit_exhausted = verdict.limit_exhausted,
            "Gate evaluated"
        );
        Ok(verdict)
    }

    /// `fit_iterations` is the number of failed fit assessments before this one.
    pub fn evaluate_fit(&self, fit: &FitAssessment, fit_iterations: u32) -> FitVerdict {
        let proceed = fit.fit_score >= self.thresholds.fit_score;
        FitVerdict {
            score: fit.fit_score,
            strength: FitStrength::from_score(fit.fit_score),
            proceed,
            limit_exhausted: !proceed && fit_iterations + 1 >= self.limits.fit_iterations,
        }
    }

    fn desirability(
        &self,
        e: &DesirabilityEvidence,
        pivots: &PivotCounts,
    ) -> Result<GateVerdict, GateError> {
        check_ratio("problem_resonance", e.problem_resonance)?;
        check_ratio("zombie_ratio", e.zombie_ratio)?;

        if e.problem_resonance < self.thresholds.min_problem_resonance {
            return Ok(self.pivot_verdict(
                Phase::Desirability,
                Signal::NoInterest,
                PivotKind::Segment,
                pivots,
                format!(
                    "problem resonance {:.2} below {:.2}",
                    e.problem_resonance, self.thresholds.min_problem_resonance
                ),
            ));
        }
        if e.zombie_ratio >= self.thresholds.max_zombie_ratio {
            return Ok(self.pivot_verdict(
                Phase::Desirability,
                Signal::WeakInterest,
                PivotKind::Value,
                pivots,
                format!(
                    "zombie ratio {:.2} at or above {:.2}",
                    e.zombie_ratio, self.thresholds.max_zombie_ratio
                ),
            ));
        }
        Ok(proceed_verdict(
            Phase::Desirability,
            Signal::StrongCommitment,
            format!(
                "resonance {:.2}, zombie ratio {:.2}",
                e.problem_resonance, e.zombie_ratio
            ),
        ))
    }

    fn feasibility(&self, e: &FeasibilityEvidence, pivots: &PivotCounts) -> GateVerdict {
        match e.status {
            FeasibilityStatus::RedImpossible => {
                let blocked = if e.blocked_components.is_empty() {
                    "unspecified components".to_string()
                } else {
                    e.blocked_components.join(", ")
                };
                self.pivot_verdict(
                    Phase::Feasibility,
                    Signal::RedImpossible,
                    PivotKind::Feature,
                    pivots,
                    format!("cannot build: {}", blocked),
                )
            }
            status => proceed_verdict(
                Phase::Feasibility,
                status.into(),
                format!("feasibility {}", status.as_str()),
            ),
        }
    }

    fn viability(
        &self,
        e: &ViabilityEvidence,
        pivots: &PivotCounts,
    ) -> Result<GateVerdict, GateError> {
        if !e.ltv_cac_ratio.is_finite() || e.ltv_cac_ratio < 0.0 {
            return Err(GateError::OutOfRange {
                field: "ltv_cac_ratio",
                value: e.ltv_cac_ratio,
                min: 0.0,
                max: f64::MAX,
            });
        }

        match e.classify(self.thresholds.min_ltv_cac_ratio) {
            UnitEconomicsStatus::Profitable => Ok(proceed_verdict(
                Phase::Viability,
                Signal::Profitable,
                format!("LTV:CAC {:.2}", e.ltv_cac_ratio),
            )),
            UnitEconomicsStatus::Underwater => {
                let rationale = format!(
                    "LTV:CAC {:.2} below {:.2}",
                    e.ltv_cac_ratio, self.thresholds.min_ltv_cac_ratio
                );
                if self.limits.exhausted(PivotKind::Strategic, pivots) {
                    return Ok(GateVerdict {
                        phase: Phase::Viability,
                        signal: Signal::Underwater,
                        recommendation: PivotRecommendation::Kill,
                        proceed: false,
                        limit_exhausted: true,
                        rationale: format!("{}; strategic pivots exhausted", rationale),
                    });
                }
                Ok(self.pivot_verdict(
                    Phase::Viability,
                    Signal::Underwater,
                    PivotKind::Strategic,
                    pivots,
                    rationale,
                ))
            }
        }
    }

    fn pivot_verdict(
        &self,
        phase: Phase,
        signal: Signal,
        kind: PivotKind,
        pivots: &PivotCounts,
        rationale: String,
    ) -> GateVerdict {
        let limit_exhausted = self.limits.exhausted(kind, pivots);
        let rationale = if limit_exhausted {
            format!(
                "{}; {} pivot limit of {} reached",
                rationale,
                kind,
                self.limits.limit(kind)
            )
        } else {
            rationale
        };
        GateVerdict {
            phase,
            signal,
            recommendation: kind.into(),
            proceed: false,
            limit_exhausted,
            rationale,
        }
    }
}

fn proceed_verdict(phase: Phase, signal: Signal, rationale: String) -> GateVerdict {
    GateVerdict {
        phase,
        signal,
        recommendation: PivotRecommendation::None,
        proceed: true,
        limit_exhausted: false,
        rationale,
    }
}

fn check_ratio(field: &'static str, value: f64) -> Result<(), GateError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(GateError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

/// Evaluate with default thresholds and no prior pivots.
pub fn gate(evidence: &Evidence) -> Result<GateVerdict, GateError> {
    Gate::default().evaluate(evidence, &PivotCounts::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommitmentType;

    fn desirability(resonance: f64, zombie: f64, commitment: CommitmentType) -> Evidence {
        Evidence::Desirability(DesirabilityEvidence {
            problem_resonance: resonance,
            zombie_ratio: zombie,
            commitment_type: commitment,
            experiments: 1,
            signal: None,
        })
    }

    fn feasibility(status: FeasibilityStatus) -> Evidence {
        Evidence::Feasibility(FeasibilityEvidence {
            status,
            blocked_components: vec!["offline sync".into()],
            experiments: 1,
            signal: None,
        })
    }

    fn viability(ratio: f64) -> Evidence {
        Evidence::Viability(ViabilityEvidence {
            ltv_cac_ratio: ratio,
            experiments: 1,
            unit_economics_status: None,
            signal: None,
        })
    }

    #[test]
    fn test_low_resonance_recommends_segment_pivot() {
        let verdict = gate(&desirability(0.15, 0.2, CommitmentType::Verbal)).unwrap();
        assert_eq!(
            verdict.as_tuple(),
            (Signal::NoInterest, PivotRecommendation::SegmentPivot, false)
        );
        assert!(!verdict.limit_exhausted);
    }

    #[test]
    fn test_zombie_ratio_recommends_value_pivot() {
        let verdict = gate(&desirability(0.45, 0.75, CommitmentType::Verbal)).unwrap();
        assert_eq!(
            verdict.as_tuple(),
            (Signal::WeakInterest, PivotRecommendation::ValuePivot, false)
        );
    }

    #[test]
    fn test_strong_commitment_proceeds() {
        let verdict = gate(&desirability(0.5, 0.15, CommitmentType::SkinInGame)).unwrap();
        assert_eq!(
            verdict.as_tuple(),
            (Signal::StrongCommitment, PivotRecommendation::None, true)
        );
    }

    #[test]
    fn test_desirability_boundaries() {
        // Resonance exactly at the minimum passes; zombie ratio exactly at the
        // maximum fails.
        let at_resonance = gate(&desirability(0.3, 0.1, CommitmentType::None)).unwrap();
        assert!(at_resonance.proceed);
        let at_zombie = gate(&desirability(0.5, 0.7, CommitmentType::None)).unwrap();
        assert_eq!(at_zombie.recommendation, PivotRecommendation::ValuePivot);
    }

    #[test]
    fn test_red_impossible_recommends_feature_pivot() {
        let verdict = gate(&feasibility(FeasibilityStatus::RedImpossible)).unwrap();
        assert_eq!(verdict.recommendation, PivotRecommendation::FeaturePivot);
        assert!(!verdict.proceed);
        assert!(verdict.rationale.contains("offline sync"));

        let orange = gate(&feasibility(FeasibilityStatus::OrangeConstrained)).unwrap();
        assert!(orange.proceed);
        assert_eq!(orange.signal, Signal::OrangeConstrained);
    }

    #[test]
    fn test_feature_pivot_limit_exhausted_escalates() {
        let pivots = PivotCounts {
            feature: 2,
            ..Default::default()
        };
        let verdict = Gate::default()
            .evaluate(&feasibility(FeasibilityStatus::RedImpossible), &pivots)
            .unwrap();
        assert_eq!(verdict.recommendation, PivotRecommendation::FeaturePivot);
        assert!(verdict.limit_exhausted);
        assert!(verdict.needs_escalation());
    }

    #[test]
    fn test_underwater_recommends_strategic_pivot_then_kill() {
        let first = gate(&viability(1.2)).unwrap();
        assert_eq!(
            first.as_tuple(),
            (Signal::Underwater, PivotRecommendation::StrategicPivot, false)
        );

        let pivots = PivotCounts {
            strategic: 2,
            ..Default::default()
        };
        let exhausted = Gate::default().evaluate(&viability(1.2), &pivots).unwrap();
        assert_eq!(exhausted.recommendation, PivotRecommendation::Kill);
        assert!(exhausted.needs_escalation());
    }

    #[test]
    fn test_ratio_at_minimum_is_profitable() {
        let verdict = gate(&viability(3.0)).unwrap();
        assert_eq!(
            verdict.as_tuple(),
            (Signal::Profitable, PivotRecommendation::None, true)
        );
    }

    #[test]
    fn test_out_of_range_evidence_rejected() {
        let err = gate(&desirability(1.4, 0.1, CommitmentType::None)).unwrap_err();
        assert!(matches!(
            err,
            GateError::OutOfRange {
                field: "problem_resonance",
                ..
            }
        ));
        assert!(gate(&desirability(0.5, f64::NAN, CommitmentType::None)).is_err());
        assert!(gate(&viability(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_gate_is_deterministic() {
        let evidence = desirability(0.42, 0.55, CommitmentType::Verbal);
        assert_eq!(gate(&evidence).unwrap(), gate(&evidence).unwrap());
    }

    #[test]
    fn test_fit_threshold_and_refinement_budget() {
        let gate = Gate::default();
        let strong = gate.evaluate_fit(
            &FitAssessment {
                fit_score: 70,
                notes: String::new(),
            },
            0,
        );
        assert!(strong.proceed);
        assert_eq!(strong.strength, FitStrength::Moderate);

        let weak = FitAssessment {
            fit_score: 55,
            notes: String::new(),
        };
        assert!(!gate.evaluate_fit(&weak, 0).limit_exhausted);
        assert!(!gate.evaluate_fit(&weak, 1).limit_exhausted);
        assert!(gate.evaluate_fit(&weak, 2).limit_exhausted);
    }

    #[test]
    fn test_thresholds_deserialize_with_defaults() {
        let thresholds: GateThresholds = toml::from_str("min_ltv_cac_ratio = 2.5").unwrap();
        assert_eq!(thresholds.min_ltv_cac_ratio, 2.5);
        assert_eq!(thresholds.fit_score, 70);
        let limits: PivotLimits = toml::from_str("feature = 4").unwrap();
        assert_eq!(limits.feature, 4);
        assert_eq!(limits.segment, 3);
    }
}
