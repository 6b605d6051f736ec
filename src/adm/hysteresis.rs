use crate::adm::config::{AdaptationThresholds, HysteresisConfig};
use crate::adm::types::AdaptationDirection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationSignal {
    pub signal: f64,
    pub direction: AdaptationDirection,
}

impl AdaptationSignal {
    pub fn stable() -> Self {
        Self {
            signal: 0.0,
            direction: AdaptationDirection::Stable,
        }
    }
}

/// Turns a round score into an adaptation signal while resisting rapid reversals.
pub struct HysteresisGate {
    config: HysteresisConfig,
    last_direction: AdaptationDirection,
    direction_stable_count: u32,
}

impl HysteresisGate {
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            config,
            last_direction: AdaptationDirection::Stable,
            direction_stable_count: 0,
        }
    }

    pub fn restore(&mut self, last_direction: AdaptationDirection, direction_stable_count: u32) {
        self.last_direction = last_direction;
        self.direction_stable_count = direction_stable_count;
    }

    pub fn calculate_adaptation_signal_with_hysteresis(
        &self,
        score: f64,
        thresholds: &AdaptationThresholds,
        target: f64,
    ) -> AdaptationSignal {
        let distance_from_target = (score - target).abs();
        if !distance_from_target.is_finite() || distance_from_target < self.config.hysteresis_dead_zone {
            return AdaptationSignal::stable();
        }

        let crosses_outer = score >= thresholds.increase || score <= thresholds.decrease;
        let multiplier = if crosses_outer {
            self.config.outer_multiplier
        } else {
            self.config.inner_multiplier
        };
        let raw_signal = (score - target) * multiplier;

        if raw_signal.abs() < self.config.adaptation_signal_dead_zone {
            return AdaptationSignal::stable();
        }

        let signal = raw_signal.clamp(-1.0, 1.0);
        AdaptationSignal {
            signal,
            direction: AdaptationDirection::from_signal(signal),
        }
    }

    /// Applies the direction-change admission rule and advances the stable-round counter.
    pub fn admit(&mut self, candidate: AdaptationSignal) -> AdaptationSignal {
        let min_rounds = self.config.min_stable_rounds_before_direction_change;

        if candidate.direction == self.last_direction {
            self.direction_stable_count = self.direction_stable_count.saturating_add(1);
            return candidate;
        }

        if self.last_direction.is_opposite(candidate.direction)
            && self.direction_stable_count < min_rounds
        {
            tracing::debug!(
                held = self.last_direction.as_str(),
                rejected = candidate.direction.as_str(),
                stable_count = self.direction_stable_count,
                "direction flip suppressed"
            );
            self.direction_stable_count = self.direction_stable_count.saturating_add(1);
            return AdaptationSignal::stable();
        }

        self.last_direction = candidate.direction;
        self.direction_stable_count = 1;
        candidate
    }

    pub fn evaluate(&mut self, score: f64) -> AdaptationSignal {
        let candidate = self.calculate_adaptation_signal_with_hysteresis(
            score,
            &self.config.thresholds,
            self.config.target_performance,
        );
        self.admit(candidate)
    }

    pub fn last_direction(&self) -> AdaptationDirection {
        self.last_direction
    }

    pub fn direction_stable_count(&self) -> u32 {
        self.direction_stable_count
    }
}

/// Signal policy chosen once from configuration.
pub enum SignalPolicy {
    Hysteresis(HysteresisGate),
    Direct {
        target: f64,
        multiplier: f64,
        last_direction: AdaptationDirection,
        direction_stable_count: u32,
    },
}

impl SignalPolicy {
    pub fn from_config(config: &HysteresisConfig) -> Self {
        if config.enabled {
            Self::Hysteresis(HysteresisGate::new(config.clone()))
        } else {
            Self::Direct {
                target: config.target_performance,
                multiplier: config.outer_multiplier,
                last_direction: AdaptationDirection::Stable,
                direction_stable_count: 0,
            }
        }
    }

    pub fn evaluate(&mut self, score: f64) -> AdaptationSignal {
        match self {
            Self::Hysteresis(gate) => gate.evaluate(score),
            Self::Direct {
                target,
                multiplier,
                last_direction,
                direction_stable_count,
            } => {
                let signal = ((score - *target) * *multiplier).clamp(-1.0, 1.0);
                let signal = if signal.is_finite() { signal } else { 0.0 };
                let direction = AdaptationDirection::from_signal(signal);
                if direction == *last_direction {
                    *direction_stable_count = direction_stable_count.saturating_add(1);
                } else {
                    *last_direction = direction;
                    *direction_stable_count = 1;
                }
                AdaptationSignal { signal, direction }
            }
        }
    }

    pub fn restore(&mut self, direction: AdaptationDirection, count: u32) {
        match self {
            Self::Hysteresis(gate) => gate.restore(direction, count),
            Self::Direct {
                last_direction,
                direction_stable_count,
                ..
            } => {
                *last_direction = direction;
                *direction_stable_count = count;
            }
        }
    }

    pub fn last_direction(&self) -> AdaptationDirection {
        match self {
            Self::Hysteresis(gate) => gate.last_direction(),
            Self::Direct { last_direction, .. } => *last_direction,
        }
    }

    pub fn direction_stable_count(&self) -> u32 {
        match self {
            Self::Hysteresis(gate) => gate.direction_stable_count(),
            Self::Direct {
                direction_stable_count,
                ..
            } => *direction_stable_count,
        }
    }
}
