use std::collections::BTreeMap;

use crate::adm::config::ScoringConfig;
use crate::adm::types::{smoothstep, KpiType, RoundMetrics};

/// How the low- and high-arousal weight sets are blended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightCurve {
    Smoothstep { start: f64, end: f64 },
    /// Hard switch at `threshold`.
    Step { threshold: f64 },
}

impl WeightCurve {
    pub fn new(start: f64, end: f64, interpolation_enabled: bool) -> Self {
        if interpolation_enabled {
            Self::Smoothstep { start, end }
        } else {
            Self::Step {
                threshold: (start + end) / 2.0,
            }
        }
    }

    /// Blend factor toward the high-arousal set, in `[0, 1]`.
    pub fn blend(&self, arousal: f64) -> f64 {
        let a = arousal.clamp(0.0, 1.0);
        match *self {
            Self::Smoothstep { start, end } => smoothstep(start, end, a),
            Self::Step { threshold } => {
                if a >= threshold {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub overall: f64,
    pub kpis: BTreeMap<KpiType, f64>,
    pub weights: BTreeMap<KpiType, f64>,
}

pub struct PerformanceScorer {
    config: ScoringConfig,
    curve: WeightCurve,
}

impl PerformanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        let curve = WeightCurve::new(
            config.weight_transition_start,
            config.weight_transition_end,
            config.interpolation_enabled,
        );
        Self { config, curve }
    }

    pub fn normalize_kpis(&self, metrics: &RoundMetrics) -> BTreeMap<KpiType, f64> {
        let targets = metrics.actual_targets_to_find_in_round.max(1) as f64;
        let success = if metrics.task_success { 1.0 } else { 0.0 };
        let ratio = if metrics.tf_ttf_ratio.is_finite() {
            metrics.tf_ttf_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };

        BTreeMap::from([
            (KpiType::TaskSuccess, success),
            (KpiType::TfTtfRatio, ratio),
            (
                KpiType::ReactionTime,
                self.config.reaction_time.normalize(metrics.reaction_time),
            ),
            (
                KpiType::ResponseDuration,
                self.config
                    .response_duration_per_target
                    .normalize(metrics.response_duration / targets),
            ),
            (
                KpiType::TapAccuracy,
                self.config.tap_accuracy.normalize(metrics.average_tap_accuracy.max(0.0)),
            ),
        ])
    }

    pub fn weights_for(&self, arousal: f64) -> BTreeMap<KpiType, f64> {
        let s = self.curve.blend(arousal);
        let low = &self.config.low_arousal_weights;
        let high = &self.config.high_arousal_weights;
        let raw: Vec<(KpiType, f64)> = KpiType::ALL
            .iter()
            .map(|k| (*k, low.get(*k) * (1.0 - s) + high.get(*k) * s))
            .collect();

        // Misconfigured sets that do not sum to 1 would let the score escape [0, 1].
        let total: f64 = raw.iter().map(|(_, w)| w.max(0.0)).sum();
        if total <= f64::EPSILON {
            let even = 1.0 / KpiType::ALL.len() as f64;
            return KpiType::ALL.iter().map(|k| (*k, even)).collect();
        }
        raw.into_iter().map(|(k, w)| (k, w.max(0.0) / total)).collect()
    }

    pub fn score(&self, metrics: &RoundMetrics, arousal: f64) -> ScoreBreakdown {
        let kpis = self.normalize_kpis(metrics);
        let weights = self.weights_for(arousal);
        let overall = KpiType::ALL
            .iter()
            .map(|k| weights[k] * kpis[k])
            .sum::<f64>()
            .clamp(0.0, 1.0);

        tracing::debug!(
            overall,
            arousal,
            success = kpis[&KpiType::TaskSuccess],
            ratio = kpis[&KpiType::TfTtfRatio],
            "round scored"
        );

        ScoreBreakdown {
            overall,
            kpis,
            weights,
        }
    }
}

impl Default for PerformanceScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn perfect_round() -> RoundMetrics {
        RoundMetrics {
            task_success: true,
            tf_ttf_ratio: 1.0,
            reaction_time: 0.2,
            response_duration: 1.0,
            average_tap_accuracy: 0.0,
            actual_targets_to_find_in_round: 2,
        }
    }

    fn poor_round() -> RoundMetrics {
        RoundMetrics {
            task_success: false,
            tf_ttf_ratio: 0.0,
            reaction_time: 3.0,
            response_duration: 5.0,
            average_tap_accuracy: 500.0,
            actual_targets_to_find_in_round: 1,
        }
    }

    #[test]
    fn test_perfect_round_scores_one() {
        let scorer = PerformanceScorer::default();
        let result = scorer.score(&perfect_round(), 0.5);
        assert!((result.overall - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_poor_round_scores_zero() {
        let scorer = PerformanceScorer::default();
        let result = scorer.score(&poor_round(), 0.5);
        assert!(result.overall.abs() < 1e-9);
    }

    #[test]
    fn test_weights_outside_band_use_nearest_set() {
        let scorer = PerformanceScorer::default();
        let low = scorer.weights_for(0.1);
        let high = scorer.weights_for(0.95);
        assert!((low[&KpiType::TapAccuracy] - 0.10).abs() < 1e-9);
        assert!((high[&KpiType::TapAccuracy] - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_weights_blend_inside_band() {
        let scorer = PerformanceScorer::default();
        let mid = scorer.weights_for(0.70);
        let tap = mid[&KpiType::TapAccuracy];
        assert!(tap > 0.10 && tap < 0.35);
    }

    #[test]
    fn test_step_curve_switches_at_midpoint() {
        let config = ScoringConfig {
            interpolation_enabled: false,
            ..Default::default()
        };
        let scorer = PerformanceScorer::new(config);
        assert!((scorer.weights_for(0.69)[&KpiType::TapAccuracy] - 0.10).abs() < 1e-9);
        assert!((scorer.weights_for(0.71)[&KpiType::TapAccuracy] - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_response_duration_is_per_target() {
        let scorer = PerformanceScorer::default();
        let mut metrics = perfect_round();
        metrics.response_duration = 6.0;
        metrics.actual_targets_to_find_in_round = 1;
        let single = scorer.normalize_kpis(&metrics)[&KpiType::ResponseDuration];
        metrics.actual_targets_to_find_in_round = 4;
        let many = scorer.normalize_kpis(&metrics)[&KpiType::ResponseDuration];
        assert!(many > single);
    }

    proptest! {
        #[test]
        fn score_always_in_unit_interval(
            success in any::<bool>(),
            ratio in -1.0f64..2.0,
            rt in -1.0f64..10.0,
            duration in 0.0f64..30.0,
            tap in 0.0f64..1000.0,
            targets in 0u32..10,
            arousal in -0.5f64..1.5,
        ) {
            let scorer = PerformanceScorer::default();
            let metrics = RoundMetrics {
                task_success: success,
                tf_ttf_ratio: ratio,
                reaction_time: rt,
                response_duration: duration,
                average_tap_accuracy: tap,
                actual_targets_to_find_in_round: targets,
            };
            let result = scorer.score(&metrics, arousal);
            prop_assert!(result.overall >= 0.0 && result.overall <= 1.0);
        }
    }
}
