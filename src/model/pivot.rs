//! Pivot kinds, recommendations and the per-run pivot counters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A backward or lateral move triggered by invalidating evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotKind {
    /// New customer segment, back to VPC discovery.
    Segment,
    /// Same segment, new value proposition.
    Value,
    /// Downgrade an impossible feature and retest feasibility.
    Feature,
    /// Price up or cost down; also called a price pivot.
    Strategic,
}

impl PivotKind {
    pub fn all() -> &'static [PivotKind] {
        &[
            PivotKind::Segment,
            PivotKind::Value,
            PivotKind::Feature,
            PivotKind::Strategic,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PivotKind::Segment => "segment",
            PivotKind::Value => "value",
            PivotKind::Feature => "feature",
            PivotKind::Strategic => "strategic",
        }
    }
}

impl fmt::Display for PivotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PivotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "segment" => Ok(PivotKind::Segment),
            "value" => Ok(PivotKind::Value),
            "feature" => Ok(PivotKind::Feature),
            "strategic" | "price" => Ok(PivotKind::Strategic),
            _ => Err(format!("Invalid pivot kind: {}", s)),
        }
    }
}

/// What the gate recommends at a phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotRecommendation {
    None,
    SegmentPivot,
    ValuePivot,
    FeaturePivot,
    StrategicPivot,
    Kill,
}

impl PivotRecommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            PivotRecommendation::None => "none",
            PivotRecommendation::SegmentPivot => "segment_pivot",
            PivotRecommendation::ValuePivot => "value_pivot",
            PivotRecommendation::FeaturePivot => "feature_pivot",
            PivotRecommendation::StrategicPivot => "strategic_pivot",
            PivotRecommendation::Kill => "kill",
        }
    }

    pub fn pivot_kind(self) -> Option<PivotKind> {
        match self {
            PivotRecommendation::SegmentPivot => Some(PivotKind::Segment),
            PivotRecommendation::ValuePivot => Some(PivotKind::Value),
            PivotRecommendation::FeaturePivot => Some(PivotKind::Feature),
            PivotRecommendation::StrategicPivot => Some(PivotKind::Strategic),
            PivotRecommendation::None | PivotRecommendation::Kill => None,
        }
    }
}

impl From<PivotKind> for PivotRecommendation {
    fn from(kind: PivotKind) -> Self {
        match kind {
            PivotKind::Segment => PivotRecommendation::SegmentPivot,
            PivotKind::Value => PivotRecommendation::ValuePivot,
            PivotKind::Feature => PivotRecommendation::FeaturePivot,
            PivotKind::Strategic => PivotRecommendation::StrategicPivot,
        }
    }
}

impl fmt::Display for PivotRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How many pivots of each kind a run has taken. Stored in run state so the
/// bound survives suspension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotCounts {
    #[serde(default)]
    pub segment: u32,
    #[serde(default)]
    pub value: u32,
    #[serde(default)]
    pub feature: u32,
    #[serde(default)]
    pub strategic: u32,
}

impl PivotCounts {
    pub fn get(&self, kind: PivotKind) -> u32 {
        match kind {
            PivotKind::Segment => self.segment,
            PivotKind::Value => self.value,
            PivotKind::Feature => self.feature,
            PivotKind::Strategic => self.strategic,
        }
    }

    /// Increment the counter and return the new attempt number.
    pub fn increment(&mut self, kind: PivotKind) -> u32 {
        let slot = match kind {
            PivotKind::Segment => &mut self.segment,
            PivotKind::Value => &mut self.value,
            PivotKind::Feature => &mut self.feature,
            PivotKind::Strategic => &mut self.strategic,
        };
        *slot += 1;
        *slot
    }

    pub fn total(&self) -> u32 {
        self.segment + self.value + self.feature + self.strategic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_returns_attempt_number() {
        let mut counts = PivotCounts::default();
        assert_eq!(counts.increment(PivotKind::Feature), 1);
        assert_eq!(counts.increment(PivotKind::Feature), 2);
        assert_eq!(counts.get(PivotKind::Feature), 2);
        assert_eq!(counts.get(PivotKind::Segment), 0);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_price_is_an_alias_for_strategic() {
        assert_eq!("price".parse::<PivotKind>().unwrap(), PivotKind::Strategic);
        assert!("lateral".parse::<PivotKind>().is_err());
    }

    #[test]
    fn test_recommendation_kind_mapping() {
        for kind in PivotKind::all() {
            let rec = PivotRecommendation::from(*kind);
            assert_eq!(rec.pivot_kind(), Some(*kind));
        }
        assert_eq!(PivotRecommendation::Kill.pivot_kind(), None);
    }

    #[test]
    fn test_counts_deserialize_with_missing_fields() {
        let counts: PivotCounts = serde_json::from_str(r#"{"segment": 2}"#).unwrap();
        assert_eq!(counts.segment, 2);
        assert_eq!(counts.strategic, 0);
    }
}
