use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::adm::types::{DomType, KpiType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiBounds {
    pub best: f64,
    pub worst: f64,
}

impl KpiBounds {
    /// Maps `value` onto `[0, 1]` where `best` scores 1 and `worst` scores 0.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.worst - self.best;
        if span.abs() < f64::EPSILON || !value.is_finite() {
            return 0.0;
        }
        ((self.worst - value) / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiWeights {
    pub task_success: f64,
    pub tf_ttf_ratio: f64,
    pub reaction_time: f64,
    pub response_duration: f64,
    pub tap_accuracy: f64,
}

impl KpiWeights {
    pub fn get(&self, kpi: KpiType) -> f64 {
        match kpi {
            KpiType::TaskSuccess => self.task_success,
            KpiType::TfTtfRatio => self.tf_ttf_ratio,
            KpiType::ReactionTime => self.reaction_time,
            KpiType::ResponseDuration => self.response_duration,
            KpiType::TapAccuracy => self.tap_accuracy,
        }
    }

    pub fn total(&self) -> f64 {
        KpiType::ALL.iter().map(|k| self.get(*k)).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub reaction_time: KpiBounds,
    /// Seconds per target; the round duration is divided by the target count first.
    pub response_duration_per_target: KpiBounds,
    pub tap_accuracy: KpiBounds,
    pub low_arousal_weights: KpiWeights,
    pub high_arousal_weights: KpiWeights,
    pub weight_transition_start: f64,
    pub weight_transition_end: f64,
    pub interpolation_enabled: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            reaction_time: KpiBounds { best: 0.3, worst: 2.0 },
            response_duration_per_target: KpiBounds { best: 0.6, worst: 3.0 },
            tap_accuracy: KpiBounds { best: 0.0, worst: 120.0 },
            low_arousal_weights: KpiWeights {
                task_success: 0.30,
                tf_ttf_ratio: 0.30,
                reaction_time: 0.15,
                response_duration: 0.15,
                tap_accuracy: 0.10,
            },
            high_arousal_weights: KpiWeights {
                task_success: 0.25,
                tf_ttf_ratio: 0.20,
                reaction_time: 0.10,
                response_duration: 0.10,
                tap_accuracy: 0.35,
            },
            weight_transition_start: 0.55,
            weight_transition_end: 0.85,
            interpolation_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationThresholds {
    pub increase: f64,
    pub decrease: f64,
}

impl Default for AdaptationThresholds {
    fn default() -> Self {
        Self {
            increase: 0.65,
            decrease: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HysteresisConfig {
    pub enabled: bool,
    pub target_performance: f64,
    pub thresholds: AdaptationThresholds,
    pub hysteresis_dead_zone: f64,
    pub adaptation_signal_dead_zone: f64,
    pub outer_multiplier: f64,
    pub inner_multiplier: f64,
    pub min_stable_rounds_before_direction_change: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_performance: 0.5,
            thresholds: AdaptationThresholds::default(),
            hysteresis_dead_zone: 0.05,
            adaptation_signal_dead_zone: 0.02,
            outer_multiplier: 2.0,
            inner_multiplier: 1.0,
            min_stable_rounds_before_direction_change: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomSmoothing {
    pub hardening: f64,
    pub easing: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub low_arousal_priorities: BTreeMap<DomType, f64>,
    pub high_arousal_priorities: BTreeMap<DomType, f64>,
    pub priority_transition_start: f64,
    pub priority_transition_end: f64,
    pub interpolation_enabled: bool,
    pub smoothing: BTreeMap<DomType, DomSmoothing>,
    /// Budget spent per unit of global signal.
    pub budget_scale: f64,
    pub easing_midpoint: f64,
    /// Lower bound on how much global confidence can shrink the budget.
    pub confidence_floor: f64,
}

impl AllocationConfig {
    pub fn smoothing_for(&self, dom: DomType, hardening: bool) -> f64 {
        self.smoothing
            .get(&dom)
            .map(|s| if hardening { s.hardening } else { s.easing })
            .unwrap_or(if hardening { 0.4 } else { 0.6 })
            .clamp(0.0, 1.0)
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        let low_arousal_priorities = BTreeMap::from([
            (DomType::TargetCount, 5.0),
            (DomType::DiscriminatoryLoad, 4.0),
            (DomType::ResponseTime, 3.0),
            (DomType::MeanBallSpeed, 2.0),
            (DomType::BallSpeedSd, 1.0),
        ]);
        let high_arousal_priorities = BTreeMap::from([
            (DomType::MeanBallSpeed, 5.0),
            (DomType::BallSpeedSd, 4.0),
            (DomType::ResponseTime, 3.0),
            (DomType::TargetCount, 2.0),
            (DomType::DiscriminatoryLoad, 1.0),
        ]);
        let smoothing = BTreeMap::from([
            (DomType::TargetCount, DomSmoothing { hardening: 0.35, easing: 0.55 }),
            (DomType::ResponseTime, DomSmoothing { hardening: 0.40, easing: 0.60 }),
            (DomType::DiscriminatoryLoad, DomSmoothing { hardening: 0.40, easing: 0.60 }),
            (DomType::MeanBallSpeed, DomSmoothing { hardening: 0.45, easing: 0.65 }),
            (DomType::BallSpeedSd, DomSmoothing { hardening: 0.45, easing: 0.65 }),
        ]);
        Self {
            low_arousal_priorities,
            high_arousal_priorities,
            priority_transition_start: 0.55,
            priority_transition_end: 0.85,
            interpolation_enabled: true,
            smoothing,
            budget_scale: 1.0,
            easing_midpoint: 0.5,
            confidence_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub variance: f64,
    pub direction: f64,
    pub history: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            variance: 0.4,
            direction: 0.3,
            history: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingConfig {
    pub enabled: bool,
    pub dom_min_data_points_for_profiling: usize,
    pub pd_window: usize,
    pub kp: f64,
    pub kd: f64,
    pub max_signal_delta: f64,
    pub min_regression_slope: f64,
    pub regression_blend: f64,
    pub min_confidence: f64,
    pub confidence_weights: ConfidenceWeights,
    pub convergence_threshold: f64,
    pub exploration_after_converged_rounds: u32,
    pub exploration_nudge_factor: f64,
    pub boundary_margin: f64,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dom_min_data_points_for_profiling: 10,
            pd_window: 20,
            kp: 0.25,
            kd: 0.5,
            max_signal_delta: 0.15,
            min_regression_slope: 0.05,
            regression_blend: 0.5,
            min_confidence: 0.2,
            confidence_weights: ConfidenceWeights::default(),
            convergence_threshold: 0.01,
            exploration_after_converged_rounds: 6,
            exploration_nudge_factor: 0.04,
            boundary_margin: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_phases_enabled: bool,
    pub warmup_phase_proportion: f64,
    pub warmup_initial_difficulty_multiplier: f64,
    pub warmup_min_difficulty: f64,
    /// Per-minute decay constant of the arousal curve.
    pub arousal_decay_constant: f64,
    pub min_round_duration_secs: f64,
    pub max_round_duration_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_phases_enabled: true,
            warmup_phase_proportion: 0.15,
            warmup_initial_difficulty_multiplier: 0.7,
            warmup_min_difficulty: 0.3,
            arousal_decay_constant: 0.1,
            min_round_duration_secs: 6.0,
            max_round_duration_secs: 14.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub performance_history_window_size: usize,
    pub recency_half_life_secs: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            performance_history_window_size: 50,
            recency_half_life_secs: 7.0 * 24.0 * 3600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn lerp(&self, position: f64) -> f64 {
        self.min + (self.max - self.min) * position.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomRanges {
    pub target_count: ValueRange,
    pub response_time: ValueRange,
    pub discriminability_factor: ValueRange,
    pub mean_ball_speed: ValueRange,
    pub ball_speed_sd: ValueRange,
    /// Speed multiplier at arousal 0; arousal 1 uses the unscaled speed.
    pub low_arousal_speed_scale: f64,
}

impl DomRanges {
    pub fn range(&self, dom: DomType) -> &ValueRange {
        match dom {
            DomType::TargetCount => &self.target_count,
            DomType::ResponseTime => &self.response_time,
            DomType::DiscriminatoryLoad => &self.discriminability_factor,
            DomType::MeanBallSpeed => &self.mean_ball_speed,
            DomType::BallSpeedSd => &self.ball_speed_sd,
        }
    }
}

impl Default for DomRanges {
    fn default() -> Self {
        Self {
            target_count: ValueRange { min: 1.0, max: 7.0 },
            response_time: ValueRange { min: 1.5, max: 6.0 },
            discriminability_factor: ValueRange { min: 0.1, max: 1.0 },
            mean_ball_speed: ValueRange { min: 40.0, max: 260.0 },
            ball_speed_sd: ValueRange { min: 0.0, max: 80.0 },
            low_arousal_speed_scale: 0.75,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmConfig {
    pub scoring: ScoringConfig,
    pub hysteresis: HysteresisConfig,
    pub allocation: AllocationConfig,
    pub profiling: ProfilingConfig,
    pub session: SessionConfig,
    pub history: HistoryConfig,
    pub dom_ranges: DomRanges,
}

impl AdmConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ADM_HYSTERESIS_ENABLED") {
            config.hysteresis.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ADM_PROFILING_ENABLED") {
            config.profiling.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ADM_INTERPOLATION_ENABLED") {
            let enabled = val.parse().unwrap_or(true);
            config.scoring.interpolation_enabled = enabled;
            config.allocation.interpolation_enabled = enabled;
        }
        if let Ok(val) = std::env::var("ADM_SESSION_PHASES_ENABLED") {
            config.session.session_phases_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ADM_MIN_DATA_POINTS") {
            if let Ok(points) = val.parse::<usize>() {
                config.profiling.dom_min_data_points_for_profiling = points;
            }
        }

        config
    }
}
