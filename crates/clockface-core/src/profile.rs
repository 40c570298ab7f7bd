//! Named match profiles.
//!
//! A profile is the complete, immutable set of thresholds the scorer runs
//! with. Stricter profiles accept fewer impostors at the cost of rejecting
//! more legitimate employees under bad conditions; looser profiles do the
//! opposite. The numbers below are starting defaults and should be re-tuned
//! against labelled captures from the target cameras.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weights of the per-comparison metrics. Normalized before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub euclidean: f32,
    pub cosine: f32,
    pub pearson: f32,
}

impl MetricWeights {
    /// Weights scaled to sum to 1. Negative or non-finite weights count as 0;
    /// if nothing is left, all weight goes to Euclidean distance.
    pub fn normalized(&self) -> MetricWeights {
        let clean = |w: f32| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let (e, c, p) = (clean(self.euclidean), clean(self.cosine), clean(self.pearson));
        let total = e + c + p;
        if total <= 0.0 {
            return MetricWeights {
                euclidean: 1.0,
                cosine: 0.0,
                pearson: 0.0,
            };
        }
        MetricWeights {
            euclidean: e / total,
            cosine: c / total,
            pearson: p / total,
        }
    }
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            euclidean: 0.6,
            cosine: 0.3,
            pearson: 0.1,
        }
    }
}

/// Statistic used to turn the surviving comparison scores into a confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfidenceStat {
    /// Mean of the `k` best scores.
    TopKMean { k: usize },
    /// Nearest-rank percentile (0–100) of all scores.
    Percentile { p: f32 },
}

impl ConfidenceStat {
    /// Apply to scores sorted in descending order.
    pub fn apply(&self, sorted_desc: &[f32]) -> f32 {
        if sorted_desc.is_empty() {
            return 0.0;
        }
        match *self {
            ConfidenceStat::TopKMean { k } => {
                let k = k.clamp(1, sorted_desc.len());
                sorted_desc[..k].iter().sum::<f32>() / k as f32
            }
            ConfidenceStat::Percentile { p } => {
                let n = sorted_desc.len();
                // Nearest rank on the ascending order.
                let rank = (p.clamp(0.0, 100.0) * n as f32 / 100.0).ceil() as usize;
                let ascending_idx = rank.clamp(1, n) - 1;
                sorted_desc[n - 1 - ascending_idx]
            }
        }
    }
}

/// Preset names accepted in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileName {
    Strict,
    Balanced,
    Permissive,
}

impl ProfileName {
    pub fn profile(self) -> MatchProfile {
        match self {
            ProfileName::Strict => MatchProfile::strict(),
            ProfileName::Balanced => MatchProfile::balanced(),
            ProfileName::Permissive => MatchProfile::permissive(),
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileName::Strict => "strict",
            ProfileName::Balanced => "balanced",
            ProfileName::Permissive => "permissive",
        })
    }
}

impl FromStr for ProfileName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ProfileName::Strict),
            "balanced" => Ok(ProfileName::Balanced),
            "permissive" => Ok(ProfileName::Permissive),
            other => Err(format!(
                "unknown profile '{other}' (expected strict, balanced or permissive)"
            )),
        }
    }
}

/// All thresholds the match scorer needs, as one immutable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchProfile {
    pub name: String,
    /// Distance at or below which a comparison counts as high quality.
    pub base_tolerance: f32,
    /// Comparisons further than this are discarded as a different person.
    pub max_tolerance: f32,
    /// Confidence floor for a match.
    pub min_confidence: f32,
    /// Distinct enrollment photos that must produce a high-quality comparison.
    pub min_matches: usize,
    /// Smallest face side, in pixels, the extractor will embed.
    pub min_face_size: u32,
    /// Distance mapped to a Euclidean term of 0 (`1 - d / distance_scale`).
    pub distance_scale: f32,
    /// Landmark similarities below this are ignored when averaging.
    pub landmark_relevance: f32,
    /// Mean landmark similarity required when the veto is on.
    pub landmark_min_similarity: f32,
    /// Whether a poor landmark match vetoes the verdict on its own.
    pub landmark_veto: bool,
    /// Best distance below which the tight-match bonus applies.
    pub tight_distance: f32,
    /// Cap on the sum of bonuses.
    pub max_bonus: f32,
    /// Cap on the spread penalty.
    pub max_penalty: f32,
    pub weights: MetricWeights,
    pub confidence_stat: ConfidenceStat,
}

impl MatchProfile {
    /// Low false-accept rate; expects good captures.
    pub fn strict() -> Self {
        Self {
            name: ProfileName::Strict.to_string(),
            base_tolerance: 0.42,
            max_tolerance: 0.55,
            min_confidence: 0.75,
            min_matches: 3,
            min_face_size: 100,
            distance_scale: 1.0,
            landmark_relevance: 0.5,
            landmark_min_similarity: 0.9,
            landmark_veto: true,
            tight_distance: 0.25,
            max_bonus: 0.05,
            max_penalty: 0.05,
            weights: MetricWeights::default(),
            confidence_stat: ConfidenceStat::TopKMean { k: 5 },
        }
    }

    /// Default trade-off for attendance kiosks.
    pub fn balanced() -> Self {
        Self {
            name: ProfileName::Balanced.to_string(),
            base_tolerance: 0.5,
            max_tolerance: 0.6,
            min_confidence: 0.65,
            min_matches: 2,
            min_face_size: 80,
            distance_scale: 1.0,
            landmark_relevance: 0.5,
            landmark_min_similarity: 0.85,
            landmark_veto: false,
            tight_distance: 0.3,
            max_bonus: 0.05,
            max_penalty: 0.05,
            weights: MetricWeights::default(),
            confidence_stat: ConfidenceStat::Percentile { p: 60.0 },
        }
    }

    /// Low false-reject rate for poor cameras; accepts more impostor risk.
    pub fn permissive() -> Self {
        Self {
            name: ProfileName::Permissive.to_string(),
            base_tolerance: 0.55,
            max_tolerance: 0.65,
            min_confidence: 0.55,
            min_matches: 1,
            min_face_size: 60,
            distance_scale: 1.0,
            landmark_relevance: 0.4,
            landmark_min_similarity: 0.8,
            landmark_veto: false,
            tight_distance: 0.35,
            max_bonus: 0.05,
            max_penalty: 0.05,
            weights: MetricWeights::default(),
            confidence_stat: ConfidenceStat::Percentile { p: 60.0 },
        }
    }

    /// Reject internally inconsistent profiles (e.g. loaded from a config file).
    pub fn validate(&self) -> Result<(), String> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(format!("{name} must be within [0, 1], got {v}"))
            }
        };
        if self.base_tolerance.is_nan()
            || self.base_tolerance <= 0.0
            || self.base_tolerance > self.max_tolerance
        {
            return Err(format!(
                "base_tolerance ({}) must be positive and not exceed max_tolerance ({})",
                self.base_tolerance, self.max_tolerance
            ));
        }
        if self.distance_scale.is_nan() || self.distance_scale <= 0.0 {
            return Err(format!("distance_scale must be positive, got {}", self.distance_scale));
        }
        if self.min_matches == 0 {
            return Err("min_matches must be at least 1".into());
        }
        unit("min_confidence", self.min_confidence)?;
        unit("landmark_relevance", self.landmark_relevance)?;
        unit("landmark_min_similarity", self.landmark_min_similarity)?;
        unit("max_bonus", self.max_bonus)?;
        unit("max_penalty", self.max_penalty)?;
        if let ConfidenceStat::TopKMean { k: 0 } = self.confidence_stat {
            return Err("confidence_stat top-k needs k >= 1".into());
        }
        Ok(())
    }
}

impl Default for MatchProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid_and_ordered() {
        let strict = MatchProfile::strict();
        let balanced = MatchProfile::balanced();
        let permissive = MatchProfile::permissive();
        for p in [&strict, &balanced, &permissive] {
            p.validate().unwrap();
        }
        assert!(strict.max_tolerance < balanced.max_tolerance);
        assert!(balanced.max_tolerance < permissive.max_tolerance);
        assert!(strict.min_confidence > balanced.min_confidence);
        assert!(strict.min_matches > permissive.min_matches);
        assert!(strict.landmark_veto && !permissive.landmark_veto);
    }

    #[test]
    fn test_weights_normalized() {
        let w = MetricWeights {
            euclidean: 3.0,
            cosine: 1.0,
            pearson: f32::NAN,
        }
        .normalized();
        assert!((w.euclidean - 0.75).abs() < 1e-6);
        assert!((w.cosine - 0.25).abs() < 1e-6);
        assert_eq!(w.pearson, 0.0);

        let zero = MetricWeights {
            euclidean: 0.0,
            cosine: -1.0,
            pearson: 0.0,
        }
        .normalized();
        assert_eq!(zero.euclidean, 1.0);
    }

    #[test]
    fn test_top_k_mean() {
        let scores = [0.9, 0.8, 0.7, 0.1];
        let stat = ConfidenceStat::TopKMean { k: 3 };
        assert!((stat.apply(&scores) - 0.8).abs() < 1e-6);
        // k larger than the sample uses everything.
        assert!((ConfidenceStat::TopKMean { k: 10 }.apply(&scores) - 0.625).abs() < 1e-6);
        assert_eq!(stat.apply(&[]), 0.0);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let scores = [0.9, 0.8, 0.7, 0.6, 0.5];
        assert_eq!(ConfidenceStat::Percentile { p: 60.0 }.apply(&scores), 0.7);
        assert_eq!(ConfidenceStat::Percentile { p: 100.0 }.apply(&scores), 0.9);
        assert_eq!(ConfidenceStat::Percentile { p: 0.0 }.apply(&scores), 0.5);
    }

    #[test]
    fn test_validate_rejects_inverted_tolerances() {
        let p = MatchProfile {
            base_tolerance: 0.7,
            max_tolerance: 0.5,
            ..MatchProfile::balanced()
        };
        assert!(p.validate().is_err());
        let p = MatchProfile {
            min_matches: 0,
            ..MatchProfile::balanced()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_profile_name_parse() {
        assert_eq!("Strict".parse::<ProfileName>().unwrap(), ProfileName::Strict);
        assert_eq!(" balanced ".parse::<ProfileName>().unwrap(), ProfileName::Balanced);
        assert!("ultra-fast".parse::<ProfileName>().is_err());
        assert_eq!(ProfileName::Permissive.profile().name, "permissive");
    }

    #[test]
    fn test_profile_toml_roundtrip() {
        let text = toml::to_string(&MatchProfile::strict()).unwrap();
        let back: MatchProfile = toml::from_str(&text).unwrap();
        assert_eq!(back, MatchProfile::strict());
    }
}
