use std::time::Duration;

use crate::adm::config::SessionConfig;

pub struct SessionPhaseScaler {
    config: SessionConfig,
    warmup_rounds: u32,
    elapsed_warmup_rounds: u32,
}

impl SessionPhaseScaler {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            warmup_rounds: 0,
            elapsed_warmup_rounds: 0,
        }
    }

    /// Expected number of rounds over `session_duration`, assuming arousal decays
    /// exponentially from `initial_arousal` and calmer players take longer rounds.
    ///
    /// Round length is `a - b·e^(-ct)` with `a` the slowest round, `b` the span
    /// scaled by starting arousal and `c` the decay per second, so the count is
    /// the closed-form integral of its reciprocal over the session.
    pub fn estimate_expected_rounds(
        session_duration: Duration,
        config: &SessionConfig,
        initial_arousal: f64,
    ) -> u32 {
        let total_secs = session_duration.as_secs_f64();
        if total_secs <= 0.0 {
            return 0;
        }

        let a0 = initial_arousal.clamp(0.0, 1.0);
        let c = config.arousal_decay_constant.max(0.0) / 60.0;
        let min_round = config.min_round_duration_secs.max(0.1);
        let a = config.max_round_duration_secs.max(min_round);
        let b = (a - min_round) * a0;

        let rounds = if c < 1e-12 {
            total_secs / (a - b)
        } else {
            let decayed = -(-c * total_secs).exp_m1();
            total_secs / a + (b * decayed / (a - b)).ln_1p() / (a * c)
        };

        // float-to-int casts saturate, so absurd durations pin at u32::MAX
        rounds.floor().max(0.0) as u32
    }

    pub fn warmup_round_count(&self, expected_rounds: u32) -> u32 {
        if !self.config.session_phases_enabled || expected_rounds == 0 {
            return 0;
        }
        let proportion = self.config.warmup_phase_proportion.clamp(0.0, 1.0);
        ((expected_rounds as f64 * proportion).round() as u32).max(1)
    }

    /// Starts a new session and returns its warmup length.
    pub fn begin(&mut self, expected_rounds: u32) -> u32 {
        self.warmup_rounds = self.warmup_round_count(expected_rounds);
        self.elapsed_warmup_rounds = 0;
        self.warmup_rounds
    }

    pub fn in_warmup(&self) -> bool {
        self.elapsed_warmup_rounds < self.warmup_rounds
    }

    pub fn warmup_rounds(&self) -> u32 {
        self.warmup_rounds
    }

    pub fn elapsed_warmup_rounds(&self) -> u32 {
        self.elapsed_warmup_rounds
    }

    fn multiplier(&self) -> f64 {
        self.config.warmup_initial_difficulty_multiplier.clamp(0.0, 1.0)
    }

    /// Scaled opening position for a DOM whose full-scale position is `base`.
    pub fn initial_position(&self, base: f64) -> f64 {
        let base = base.clamp(0.0, 1.0);
        let floor = self.config.warmup_min_difficulty.min(base);
        (base * self.multiplier()).max(floor)
    }

    /// Fraction of full scale after `k` elapsed warmup rounds.
    pub fn ramp_scale(&self, k: u32) -> f64 {
        if self.warmup_rounds == 0 {
            return 1.0;
        }
        let m = self.multiplier();
        let progress = (k.min(self.warmup_rounds) as f64) / self.warmup_rounds as f64;
        m + (1.0 - m) * progress
    }

    /// Advances one warmup round and returns the scale increment to restore,
    /// or `None` once warmup is over.
    pub fn advance(&mut self) -> Option<f64> {
        if !self.in_warmup() {
            return None;
        }
        let before = self.ramp_scale(self.elapsed_warmup_rounds);
        self.elapsed_warmup_rounds += 1;
        Some(self.ramp_scale(self.elapsed_warmup_rounds) - before)
    }

    pub fn phases_enabled(&self) -> bool {
        self.config.session_phases_enabled
    }
}

impl Default for SessionPhaseScaler {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
