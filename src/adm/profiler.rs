//! Per-DOM local PD control.
//!
//! Each DOM keeps its own buffer of (difficulty, performance) samples. Once a
//! DOM has enough of them it is steered from its own data; until then it
//! reports [`LocalAdjustment::InsufficientData`] and the controller routes it
//! through the global allocator instead.

use std::collections::BTreeMap;

use crate::adm::config::{DomSmoothing, ProfilingConfig};
use crate::adm::types::{
    least_squares_slope, population_variance, Confidence, DomPerformanceProfile, DomType,
    DOM_PROFILE_CAPACITY, MAX_UNIT_VARIANCE,
};

#[derive(Debug, Clone, PartialEq)]
pub enum LocalAdjustment {
    Disabled,
    InsufficientData { samples: usize, required: usize },
    Adjusted {
        desired: f64,
        confidence: Confidence,
        pd_output: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LocalFit {
    slope: f64,
    intercept: f64,
}

pub struct DomProfiler {
    config: ProfilingConfig,
    smoothing: BTreeMap<DomType, DomSmoothing>,
    target_performance: f64,
    profiles: BTreeMap<DomType, DomPerformanceProfile>,
    converged_rounds: BTreeMap<DomType, u32>,
    nudge_count: BTreeMap<DomType, u64>,
}

impl DomProfiler {
    pub fn new(
        config: ProfilingConfig,
        smoothing: BTreeMap<DomType, DomSmoothing>,
        target_performance: f64,
    ) -> Self {
        Self {
            config,
            smoothing,
            target_performance,
            profiles: DomType::ALL
                .iter()
                .map(|d| (*d, DomPerformanceProfile::new(*d)))
                .collect(),
            converged_rounds: BTreeMap::new(),
            nudge_count: BTreeMap::new(),
        }
    }

    /// Restores persisted buffers. Older snapshots without profiles, or with
    /// DOMs missing, get fresh empty buffers for the gaps.
    pub fn restore_profiles(&mut self, profiles: Option<Vec<DomPerformanceProfile>>) {
        let Some(profiles) = profiles else {
            tracing::info!("no persisted DOM profiles, starting with empty buffers");
            return;
        };
        for mut profile in profiles {
            while profile.samples.len() > DOM_PROFILE_CAPACITY {
                profile.samples.pop_front();
            }
            self.profiles.insert(profile.dom_type, profile);
        }
    }

    pub fn record_sample(&mut self, dom: DomType, value: f64, performance: f64) {
        self.profiles
            .entry(dom)
            .or_insert_with(|| DomPerformanceProfile::new(dom))
            .record(value, performance);
    }

    pub fn sample_count(&self, dom: DomType) -> usize {
        self.profiles.get(&dom).map(|p| p.len()).unwrap_or(0)
    }

    pub fn has_sufficient_data(&self, dom: DomType) -> bool {
        self.sample_count(dom) >= self.config.dom_min_data_points_for_profiling
    }

    pub fn profile(&self, dom: DomType) -> Option<&DomPerformanceProfile> {
        self.profiles.get(&dom)
    }

    pub fn profiles(&self) -> Vec<DomPerformanceProfile> {
        self.profiles.values().cloned().collect()
    }

    fn recent_samples(&self, dom: DomType) -> (Vec<f64>, Vec<f64>) {
        let window = self.config.pd_window.max(2);
        self.profiles
            .get(&dom)
            .map(|p| p.recent(window).map(|s| (s.value, s.performance)).unzip())
            .unwrap_or_default()
    }

    fn fit(values: &[f64], performances: &[f64]) -> Option<LocalFit> {
        if values.len() < 2 || values.len() != performances.len() {
            return None;
        }
        let n = values.len() as f64;
        let mean_x = values.iter().sum::<f64>() / n;
        let mean_y = performances.iter().sum::<f64>() / n;
        let var_x: f64 = values.iter().map(|x| (x - mean_x).powi(2)).sum();
        if var_x < 1e-9 {
            return None;
        }
        let cov: f64 = values
            .iter()
            .zip(performances)
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let slope = cov / var_x;
        Some(LocalFit {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn local_confidence(&self, dom: DomType, pd_output: f64) -> Confidence {
        let (_, performances) = self.recent_samples(dom);
        let required = self.config.dom_min_data_points_for_profiling.max(1);

        let variance = 1.0 - (population_variance(&performances) / MAX_UNIT_VARIANCE).min(1.0);
        let history = (self.sample_count(dom) as f64 / required as f64).min(1.0);

        let error = if performances.is_empty() {
            0.0
        } else {
            performances.iter().sum::<f64>() / performances.len() as f64 - self.target_performance
        };
        let direction = if pd_output.abs() < f64::EPSILON || error.abs() < f64::EPSILON {
            0.5
        } else if pd_output.signum() == error.signum() {
            1.0
        } else {
            0.0
        };

        let w = &self.config.confidence_weights;
        let weight_sum = (w.variance + w.direction + w.history).max(f64::EPSILON);
        let total =
            (w.variance * variance + w.direction * direction + w.history * history) / weight_sum;

        Confidence {
            total: total.clamp(0.0, 1.0),
            variance,
            direction,
            history,
        }
    }

    /// PD correction for `dom` from its own samples, given the round's admitted
    /// global signal. A zero signal yields `desired == current`.
    pub fn compute_local_adjustment(&self, dom: DomType, current: f64, signal: f64) -> LocalAdjustment {
        if !self.config.enabled {
            return LocalAdjustment::Disabled;
        }
        let samples = self.sample_count(dom);
        let required = self.config.dom_min_data_points_for_profiling;
        if samples < required {
            return LocalAdjustment::InsufficientData { samples, required };
        }

        let (values, performances) = self.recent_samples(dom);
        let trend = least_squares_slope(performances.iter().copied());
        let max_delta = self.config.max_signal_delta.abs();
        // a stable round (dead zone or held-back flip) leaves every DOM where it is
        let pd_output = if signal == 0.0 {
            0.0
        } else {
            (self.config.kp * signal + self.config.kd * trend).clamp(-max_delta, max_delta)
        };
        let confidence = self.local_confidence(dom, pd_output);

        let mut desired = current + pd_output;
        if let Some(fit) = Self::fit(&values, &performances) {
            if fit.slope < -self.config.min_regression_slope && pd_output != 0.0 {
                let local_target = ((self.target_performance - fit.intercept) / fit.slope).clamp(0.0, 1.0);
                // only follow the local model when it agrees with the PD direction
                if (local_target - current).signum() == pd_output.signum() {
                    let w = (self.config.regression_blend * confidence.total).clamp(0.0, 1.0);
                    desired = desired * (1.0 - w) + local_target * w;
                }
            }
        }

        LocalAdjustment::Adjusted {
            desired: desired.clamp(0.0, 1.0),
            confidence,
            pd_output,
        }
    }

    fn smoothing_for(&self, dom: DomType, hardening: bool) -> f64 {
        self.smoothing
            .get(&dom)
            .map(|s| if hardening { s.hardening } else { s.easing })
            .unwrap_or(if hardening { 0.4 } else { 0.6 })
            .clamp(0.0, 1.0)
    }

    /// Moves `dom` from `current` toward `desired` and returns the new difficulty.
    pub fn apply_modulation(
        &mut self,
        dom: DomType,
        current: f64,
        desired: f64,
        confidence: Confidence,
    ) -> f64 {
        let diff = desired - current;
        let smoothing = self.smoothing_for(dom, diff > 0.0);
        let max_delta = self.config.max_signal_delta.abs();
        let scale = confidence.total.max(self.config.min_confidence);
        let mut delta = (diff * smoothing * scale).clamp(-max_delta, max_delta);

        let converged = self.converged_rounds.entry(dom).or_insert(0);
        if diff.abs() < self.config.convergence_threshold {
            *converged = converged.saturating_add(1);
        } else {
            *converged = 0;
        }

        if self.config.enabled && *converged >= self.config.exploration_after_converged_rounds.max(1) {
            let nudges = self.nudge_count.entry(dom).or_insert(0);
            let margin = self.config.boundary_margin;
            let direction = if current < margin {
                1.0
            } else if current > 1.0 - margin {
                -1.0
            } else if *nudges % 2 == 0 {
                1.0
            } else {
                -1.0
            };
            let nudge = direction * self.config.exploration_nudge_factor.abs();
            tracing::debug!(dom = dom.as_str(), nudge, current, "exploration nudge");
            delta += nudge;
            *nudges = nudges.saturating_add(1);
            *converged = 0;
        }

        (current + delta).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adm::config::AllocationConfig;

    fn profiler(min_points: usize) -> DomProfiler {
        let config = ProfilingConfig {
            dom_min_data_points_for_profiling: min_points,
            ..Default::default()
        };
        DomProfiler::new(config, AllocationConfig::default().smoothing, 0.5)
    }

    #[test]
    fn test_insufficient_data_reported() {
        let mut p = profiler(8);
        for _ in 0..7 {
            p.record_sample(DomType::TargetCount, 0.5, 0.4);
        }
        assert_eq!(
            p.compute_local_adjustment(DomType::TargetCount, 0.5, -0.2),
            LocalAdjustment::InsufficientData {
                samples: 7,
                required: 8
            }
        );
        p.record_sample(DomType::TargetCount, 0.5, 0.4);
        assert!(matches!(
            p.compute_local_adjustment(DomType::TargetCount, 0.5, -0.2),
            LocalAdjustment::Adjusted { .. }
        ));
    }

    #[test]
    fn test_disabled_profiler() {
        let config = ProfilingConfig {
            enabled: false,
            ..Default::default()
        };
        let p = DomProfiler::new(config, AllocationConfig::default().smoothing, 0.5);
        assert_eq!(
            p.compute_local_adjustment(DomType::MeanBallSpeed, 0.5, 0.5),
            LocalAdjustment::Disabled
        );
    }

    #[test]
    fn test_pd_follows_signal_sign() {
        let mut p = profiler(4);
        for _ in 0..6 {
            p.record_sample(DomType::MeanBallSpeed, 0.5, 0.2);
        }
        match p.compute_local_adjustment(DomType::MeanBallSpeed, 0.5, -0.6) {
            LocalAdjustment::Adjusted { desired, pd_output, .. } => {
                assert!(pd_output < 0.0);
                assert!(desired < 0.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stable_signal_holds_despite_trend() {
        let mut p = profiler(3);
        for performance in [0.9, 0.6, 0.3, 0.1] {
            p.record_sample(DomType::TargetCount, 0.6, performance);
        }
        match p.compute_local_adjustment(DomType::TargetCount, 0.6, 0.0) {
            LocalAdjustment::Adjusted { desired, pd_output, .. } => {
                assert_eq!(pd_output, 0.0);
                assert_eq!(desired, 0.6);
            }
            other => panic!("unexpected {other:?}"),
        }
        let next = p.apply_modulation(DomType::TargetCount, 0.6, 0.6, Confidence::neutral());
        assert_eq!(next, 0.6);
    }

    #[test]
    fn test_pd_output_clamped() {
        let mut p = profiler(2);
        for i in 0..10 {
            p.record_sample(DomType::BallSpeedSd, 0.5, i as f64 / 10.0);
        }
        match p.compute_local_adjustment(DomType::BallSpeedSd, 0.5, 1.0) {
            LocalAdjustment::Adjusted { pd_output, .. } => {
                assert!(pd_output <= ProfilingConfig::default().max_signal_delta + 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_local_confidence_components() {
        let mut p = profiler(10);
        for _ in 0..5 {
            p.record_sample(DomType::TargetCount, 0.5, 0.8);
        }
        let conf = p.local_confidence(DomType::TargetCount, 0.1);
        assert!((conf.history - 0.5).abs() < 1e-9);
        assert!((conf.variance - 1.0).abs() < 1e-9);
        assert_eq!(conf.direction, 1.0);
        let disagree = p.local_confidence(DomType::TargetCount, -0.1);
        assert_eq!(disagree.direction, 0.0);
        assert!(disagree.total < conf.total);
    }

    #[test]
    fn test_modulation_is_bounded() {
        let mut p = profiler(1);
        let next = p.apply_modulation(DomType::TargetCount, 0.95, 5.0, Confidence::neutral());
        assert!(next <= 1.0);
        assert!(next - 0.95 <= ProfilingConfig::default().max_signal_delta + 1e-12);
    }

    #[test]
    fn test_hardening_and_easing_smoothing_differ() {
        let mut p = profiler(1);
        let conf = Confidence {
            total: 1.0,
            ..Confidence::neutral()
        };
        let up = p.apply_modulation(DomType::ResponseTime, 0.5, 0.6, conf) - 0.5;
        let down = 0.5 - p.apply_modulation(DomType::ResponseTime, 0.5, 0.4, conf);
        assert!(down > up);
    }

    #[test]
    fn test_nudge_after_convergence_moves_toward_center_near_bounds() {
        let mut p = profiler(1);
        let rounds = ProfilingConfig::default().exploration_after_converged_rounds;
        let mut position = 0.1;
        for _ in 0..rounds {
            position = p.apply_modulation(DomType::MeanBallSpeed, position, position, Confidence::neutral());
        }
        assert!(position > 0.1);
        assert_eq!(p.converged_rounds.get(&DomType::MeanBallSpeed), Some(&0));

        let mut high = 0.9;
        for _ in 0..rounds {
            high = p.apply_modulation(DomType::BallSpeedSd, high, high, Confidence::neutral());
        }
        assert!(high < 0.9);
    }

    #[test]
    fn test_nudge_alternates_by_parity_in_the_middle() {
        let mut p = profiler(1);
        let rounds = ProfilingConfig::default().exploration_after_converged_rounds;
        let mut nudges = Vec::new();
        for _ in 0..2 {
            let mut position = 0.5;
            for _ in 0..rounds {
                let next = p.apply_modulation(DomType::TargetCount, position, position, Confidence::neutral());
                if (next - position).abs() > 1e-12 {
                    nudges.push(next - position);
                }
                position = next;
            }
        }
        assert_eq!(nudges.len(), 2);
        assert!(nudges[0].signum() != nudges[1].signum());
    }

    #[test]
    fn test_restore_missing_profiles() {
        let mut p = profiler(5);
        p.restore_profiles(None);
        assert_eq!(p.profiles().len(), DomType::ALL.len());
        assert!(p.profiles().iter().all(|prof| prof.is_empty()));

        let mut partial = DomPerformanceProfile::new(DomType::TargetCount);
        partial.record(0.4, 0.6);
        p.restore_profiles(Some(vec![partial]));
        assert_eq!(p.sample_count(DomType::TargetCount), 1);
        assert_eq!(p.sample_count(DomType::BallSpeedSd), 0);
    }
}
