use std::collections::BTreeMap;
use std::time::Duration;

use crate::adm::allocation::PriorityBudgetAllocator;
use crate::adm::config::AdmConfig;
use crate::adm::error::AdmResult;
use crate::adm::history::HistoryTracker;
use crate::adm::hysteresis::{AdaptationSignal, SignalPolicy};
use crate::adm::persistence::PersistenceGateway;
use crate::adm::profiler::{DomProfiler, LocalAdjustment};
use crate::adm::scoring::PerformanceScorer;
use crate::adm::session::SessionPhaseScaler;
use crate::adm::types::*;

/// Closed-loop difficulty controller for a single player.
///
/// Owns every piece of mutable adaptation state. All mutation goes through
/// `&mut self`, so a round, an arousal update and a save can never interleave.
pub struct AdaptiveDifficultyManager {
    config: AdmConfig,
    user_id: String,
    gateway: Option<PersistenceGateway>,
    scorer: PerformanceScorer,
    history: HistoryTracker,
    policy: SignalPolicy,
    allocator: PriorityBudgetAllocator,
    profiler: DomProfiler,
    session: SessionPhaseScaler,
    positions: NormalizedPositions,
    arousal: f64,
    session_context: Option<SessionContext>,
    /// Full-scale positions captured when warmup scaled them down.
    warmup_base: BTreeMap<DomType, f64>,
    /// Set by a session too short to expect a single round.
    hold_next_round: bool,
    round_index: u64,
}

impl AdaptiveDifficultyManager {
    /// Builds a controller for `user_id`, restoring stored state when a gateway is
    /// given. Load failures are logged and the controller starts fresh.
    pub fn new(
        config: AdmConfig,
        user_id: impl Into<String>,
        gateway: Option<PersistenceGateway>,
        clear_past_session: bool,
    ) -> Self {
        let user_id = user_id.into();
        let target = config.hysteresis.target_performance;
        let mut manager = Self {
            scorer: PerformanceScorer::new(config.scoring.clone()),
            history: HistoryTracker::new(&config.history),
            policy: SignalPolicy::from_config(&config.hysteresis),
            allocator: PriorityBudgetAllocator::new(config.allocation.clone()),
            profiler: DomProfiler::new(
                config.profiling.clone(),
                config.allocation.smoothing.clone(),
                target,
            ),
            session: SessionPhaseScaler::new(config.session.clone()),
            positions: NormalizedPositions::default(),
            arousal: 0.5,
            session_context: None,
            warmup_base: BTreeMap::new(),
            hold_next_round: false,
            round_index: 0,
            user_id,
            gateway,
            config,
        };

        let Some(gateway) = manager.gateway.clone() else {
            return manager;
        };

        if clear_past_session {
            if let Err(err) = gateway.clear_state(&manager.user_id) {
                tracing::warn!(user_id = %manager.user_id, error = %err, "failed to clear past session");
            }
            return manager;
        }

        match gateway.load_state(&manager.user_id) {
            Ok(Some(state)) => manager.restore(state),
            Ok(None) => {
                tracing::info!(user_id = %manager.user_id, "no stored state, starting fresh");
            }
            Err(err) => {
                tracing::warn!(user_id = %manager.user_id, error = %err, "failed to load state, starting fresh");
            }
        }
        manager
    }

    /// Controller without persistence.
    pub fn ephemeral(config: AdmConfig) -> Self {
        Self::new(config, "ephemeral", None, false)
    }

    fn restore(&mut self, state: PersistedAdmState) {
        tracing::info!(
            user_id = %self.user_id,
            history = state.performance_history.len(),
            direction = state.last_adaptation_direction.as_str(),
            "restoring adaptive difficulty state"
        );
        self.history = HistoryTracker::from_entries(&self.config.history, state.performance_history);
        self.policy
            .restore(state.last_adaptation_direction, state.direction_stable_count);
        self.positions = state.normalized_positions.normalized();
        self.profiler.restore_profiles(state.dom_performance_profiles);
    }

    pub fn update_arousal(&mut self, level: f64) {
        if !level.is_finite() {
            tracing::warn!(level, "ignoring non-finite arousal");
            return;
        }
        self.arousal = level.clamp(0.0, 1.0);
    }

    /// Opens a session: estimates its length, sizes the warmup and scales every
    /// normalized position down to its warmup value.
    ///
    /// A session expected to hold no rounds at all skips adaptation on the next
    /// round; it is still scored and recorded.
    pub fn start_session(&mut self, duration: Duration, initial_arousal: f64) -> SessionContext {
        self.update_arousal(initial_arousal);
        let expected_rounds =
            SessionPhaseScaler::estimate_expected_rounds(duration, &self.config.session, self.arousal);
        let warmup_rounds = self.session.begin(expected_rounds);
        self.hold_next_round = expected_rounds == 0;

        self.warmup_base.clear();
        if warmup_rounds > 0 {
            for dom in DomType::ALL {
                let base = self.positions.get(dom);
                self.warmup_base.insert(dom, base);
                self.positions.set(dom, self.session.initial_position(base));
            }
        }

        let context = SessionContext {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now().timestamp_millis(),
            expected_rounds,
            warmup_rounds,
        };
        tracing::info!(
            user_id = %self.user_id,
            session_id = %context.session_id,
            expected_rounds,
            warmup_rounds,
            "session started"
        );
        self.session_context = Some(context.clone());
        context
    }

    /// Runs one round through the pipeline and returns what changed.
    pub fn record_identification_performance(&mut self, metrics: &RoundMetrics) -> RoundOutcome {
        let breakdown = self.scorer.score(metrics, self.arousal);
        let score = breakdown.overall;
        let now_ms = chrono::Utc::now().timestamp_millis();

        self.history.add_performance_entry(PerformanceHistoryEntry {
            timestamp: now_ms,
            overall_score: score,
            normalized_kpis: breakdown.kpis.clone(),
            arousal_level: self.arousal,
            current_dom_values: self.current_dom_values().to_map(),
            session_context: self.session_context.clone(),
        });
        for dom in DomType::ALL {
            self.profiler
                .record_sample(dom, self.positions.difficulty(dom), score);
        }

        if std::mem::take(&mut self.hold_next_round) {
            self.round_index += 1;
            tracing::debug!(round = self.round_index, score, "round held for degenerate session");
            let signal = AdaptationSignal::stable();
            return RoundOutcome {
                round_index: self.round_index,
                score,
                kpis: breakdown.kpis,
                signal: signal.signal,
                direction: signal.direction,
                confidence: self.global_confidence(signal, now_ms),
                routes: BTreeMap::new(),
                positions: self.positions.clone(),
                dom_values: self.current_dom_values(),
                in_warmup: false,
            };
        }

        let signal = self.policy.evaluate(score);
        let confidence = self.global_confidence(signal, now_ms);

        let mut routes = BTreeMap::new();
        let mut global_doms = Vec::new();
        for dom in DomType::ALL {
            let current = self.positions.difficulty(dom);
            match self.profiler.compute_local_adjustment(dom, current, signal.signal) {
                LocalAdjustment::Adjusted {
                    desired,
                    confidence: local,
                    ..
                } => {
                    let next = self.profiler.apply_modulation(dom, current, desired, local);
                    self.positions.set_difficulty(dom, next);
                    routes.insert(dom, AdaptationRoute::Local);
                }
                LocalAdjustment::InsufficientData { .. } | LocalAdjustment::Disabled => {
                    global_doms.push(dom);
                    routes.insert(dom, AdaptationRoute::Global);
                }
            }
        }

        if !global_doms.is_empty() && signal.signal != 0.0 {
            self.apply_global(signal.signal, confidence, &global_doms);
        }

        let in_warmup = self.session.in_warmup();
        if let Some(step) = self.session.advance() {
            for (dom, base) in &self.warmup_base {
                let p = self.positions.get(*dom);
                self.positions.set(*dom, p + base * step);
            }
        }

        self.round_index += 1;
        tracing::debug!(
            round = self.round_index,
            score,
            signal = signal.signal,
            direction = signal.direction.as_str(),
            confidence = confidence.total,
            global = global_doms.len(),
            in_warmup,
            "round adapted"
        );

        RoundOutcome {
            round_index: self.round_index,
            score,
            kpis: breakdown.kpis,
            signal: signal.signal,
            direction: signal.direction,
            confidence,
            routes,
            positions: self.positions.clone(),
            dom_values: self.current_dom_values(),
            in_warmup,
        }
    }

    fn apply_global(&mut self, signal: f64, confidence: Confidence, subset: &[DomType]) {
        let alloc = &self.config.allocation;
        let floor = alloc.confidence_floor.clamp(0.0, 1.0);
        let budget = signal * alloc.budget_scale * (floor + (1.0 - floor) * confidence.total);

        // the subset only spends its own share of the round's budget
        let share = if subset.len() == DomType::ALL.len() {
            budget
        } else {
            let shares =
                self.allocator
                    .distribute_adaptation_budget(budget, self.arousal, budget < 0.0, None);
            subset.iter().filter_map(|d| shares.get(d)).sum::<f64>()
        };

        let difficulties = self.positions.difficulties();
        let deltas = self.allocator.allocate(
            share,
            self.arousal,
            &difficulties,
            subset,
            self.config.profiling.max_signal_delta,
        );
        for (dom, delta) in deltas {
            let d = difficulties.get(&dom).copied().unwrap_or(0.5);
            self.positions.set_difficulty(dom, d + delta);
        }
    }

    fn global_confidence(&self, signal: AdaptationSignal, now_ms: i64) -> Confidence {
        let metrics = self.history.get_performance_metrics();
        let variance = 1.0 - (metrics.variance / MAX_UNIT_VARIANCE).min(1.0);

        let required = self.config.profiling.dom_min_data_points_for_profiling.max(1) as f64;
        let weight = self
            .history
            .effective_sample_weight(now_ms, self.config.history.recency_half_life_secs);
        let history = (weight / required).min(1.0);

        let direction = if signal.signal == 0.0 || metrics.trend.abs() < f64::EPSILON {
            0.5
        } else if signal.signal.signum() == metrics.trend.signum() {
            1.0
        } else {
            0.0
        };

        let w = &self.config.profiling.confidence_weights;
        let weight_sum = (w.variance + w.direction + w.history).max(f64::EPSILON);
        Confidence {
            total: ((w.variance * variance + w.direction * direction + w.history * history)
                / weight_sum)
                .clamp(0.0, 1.0),
            variance,
            direction,
            history,
        }
    }

    pub fn normalized_positions(&self) -> &NormalizedPositions {
        &self.positions
    }

    /// Concrete values for the render and physics collaborators.
    pub fn current_dom_values(&self) -> DomValues {
        let ranges = &self.config.dom_ranges;
        let low = ranges.low_arousal_speed_scale.clamp(0.0, 1.0);
        let speed_scale = low + (1.0 - low) * self.arousal;
        let value = |dom: DomType| ranges.range(dom).lerp(self.positions.get(dom));

        DomValues {
            target_count: value(DomType::TargetCount).round().max(1.0) as u32,
            response_time: value(DomType::ResponseTime),
            discriminability_factor: value(DomType::DiscriminatoryLoad),
            mean_ball_speed: value(DomType::MeanBallSpeed) * speed_scale,
            ball_speed_sd: value(DomType::BallSpeedSd) * speed_scale,
        }
    }

    pub fn snapshot(&self) -> PersistedAdmState {
        PersistedAdmState {
            version: PERSISTED_STATE_VERSION,
            performance_history: self.history.to_vec(),
            last_adaptation_direction: self.policy.last_direction(),
            direction_stable_count: self.policy.direction_stable_count(),
            normalized_positions: self.positions.clone(),
            dom_performance_profiles: Some(self.profiler.profiles()),
            saved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn save_state(&self) -> AdmResult<()> {
        match &self.gateway {
            Some(gateway) => gateway.save_state(&self.snapshot(), &self.user_id),
            None => Ok(()),
        }
    }

    /// Closes the current session, persists and returns the final snapshot.
    pub fn end_session(&mut self) -> AdmResult<PersistedAdmState> {
        let snapshot = self.snapshot();
        if let Some(gateway) = &self.gateway {
            gateway.save_state(&snapshot, &self.user_id)?;
        }
        if let Some(context) = self.session_context.take() {
            tracing::info!(
                user_id = %self.user_id,
                session_id = %context.session_id,
                rounds = self.round_index,
                "session ended"
            );
        }
        self.session.begin(0);
        self.warmup_base.clear();
        self.hold_next_round = false;
        Ok(snapshot)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &AdmConfig {
        &self.config
    }

    pub fn gateway(&self) -> Option<&PersistenceGateway> {
        self.gateway.as_ref()
    }

    pub fn arousal(&self) -> f64 {
        self.arousal
    }

    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    pub fn profiler(&self) -> &DomProfiler {
        &self.profiler
    }

    pub fn session_context(&self) -> Option<&SessionContext> {
        self.session_context.as_ref()
    }

    pub fn in_warmup(&self) -> bool {
        self.session.in_warmup()
    }

    pub fn round_index(&self) -> u64 {
        self.round_index
    }

    pub fn last_direction(&self) -> AdaptationDirection {
        self.policy.last_direction()
    }

    pub fn direction_stable_count(&self) -> u32 {
        self.policy.direction_stable_count()
    }
}
