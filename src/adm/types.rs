use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

pub const PERSISTED_STATE_VERSION: u32 = 2;
pub const DOM_PROFILE_CAPACITY: usize = 200;

/// Largest variance a series confined to `[0, 1]` can have.
pub(crate) const MAX_UNIT_VARIANCE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomType {
    TargetCount,
    ResponseTime,
    DiscriminatoryLoad,
    MeanBallSpeed,
    #[serde(rename = "ballSpeedSD")]
    BallSpeedSd,
}

impl DomType {
    pub const ALL: [DomType; 5] = [
        DomType::TargetCount,
        DomType::ResponseTime,
        DomType::DiscriminatoryLoad,
        DomType::MeanBallSpeed,
        DomType::BallSpeedSd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetCount => "targetCount",
            Self::ResponseTime => "responseTime",
            Self::DiscriminatoryLoad => "discriminatoryLoad",
            Self::MeanBallSpeed => "meanBallSpeed",
            Self::BallSpeedSd => "ballSpeedSD",
        }
    }

    /// Whether a larger concrete value makes a round harder.
    ///
    /// A longer response budget and a larger discriminability factor both
    /// make play easier, so those two run against the position axis.
    pub fn raises_difficulty(&self) -> bool {
        !matches!(self, Self::ResponseTime | Self::DiscriminatoryLoad)
    }

    pub fn difficulty_from_position(&self, position: f64) -> f64 {
        let p = position.clamp(0.0, 1.0);
        if self.raises_difficulty() {
            p
        } else {
            1.0 - p
        }
    }

    pub fn position_from_difficulty(&self, difficulty: f64) -> f64 {
        // the mapping is its own inverse
        self.difficulty_from_position(difficulty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KpiType {
    TaskSuccess,
    TfTtfRatio,
    ReactionTime,
    ResponseDuration,
    TapAccuracy,
}

impl KpiType {
    pub const ALL: [KpiType; 5] = [
        KpiType::TaskSuccess,
        KpiType::TfTtfRatio,
        KpiType::ReactionTime,
        KpiType::ResponseDuration,
        KpiType::TapAccuracy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskSuccess => "taskSuccess",
            Self::TfTtfRatio => "tfTtfRatio",
            Self::ReactionTime => "reactionTime",
            Self::ResponseDuration => "responseDuration",
            Self::TapAccuracy => "tapAccuracy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum AdaptationDirection {
    #[default]
    Stable,
    Increasing,
    Decreasing,
}

impl AdaptationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
        }
    }

    pub fn from_signal(signal: f64) -> Self {
        if signal > 0.0 {
            Self::Increasing
        } else if signal < 0.0 {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }

    pub fn is_opposite(&self, other: AdaptationDirection) -> bool {
        matches!(
            (self, other),
            (Self::Increasing, Self::Decreasing) | (Self::Decreasing, Self::Increasing)
        )
    }
}

/// Difficulty state keyed by DOM, each value in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPositions(BTreeMap<DomType, f64>);

impl NormalizedPositions {
    pub fn uniform(value: f64) -> Self {
        let v = value.clamp(0.0, 1.0);
        Self(DomType::ALL.iter().map(|d| (*d, v)).collect())
    }

    pub fn get(&self, dom: DomType) -> f64 {
        self.0.get(&dom).copied().unwrap_or(0.5)
    }

    pub fn set(&mut self, dom: DomType, value: f64) {
        let v = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.5 };
        self.0.insert(dom, v);
    }

    pub fn difficulty(&self, dom: DomType) -> f64 {
        dom.difficulty_from_position(self.get(dom))
    }

    pub fn set_difficulty(&mut self, dom: DomType, difficulty: f64) {
        self.set(dom, dom.position_from_difficulty(difficulty.clamp(0.0, 1.0)));
    }

    pub fn difficulties(&self) -> BTreeMap<DomType, f64> {
        DomType::ALL.iter().map(|d| (*d, self.difficulty(*d))).collect()
    }

    /// Fills any DOM missing from a deserialized map and re-clamps the rest.
    pub fn normalized(mut self) -> Self {
        for dom in DomType::ALL {
            let v = self.get(dom);
            self.set(dom, v);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (DomType, f64)> + '_ {
        self.0.iter().map(|(d, v)| (*d, *v))
    }
}

impl Default for NormalizedPositions {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub total: f64,
    pub variance: f64,
    pub direction: f64,
    pub history: f64,
}

impl Confidence {
    pub fn neutral() -> Self {
        Self {
            total: 0.5,
            variance: 0.5,
            direction: 0.5,
            history: 0.5,
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::neutral()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub started_at: i64,
    pub expected_rounds: u32,
    pub warmup_rounds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceHistoryEntry {
    pub timestamp: i64,
    pub overall_score: f64,
    pub normalized_kpis: BTreeMap<KpiType, f64>,
    pub arousal_level: f64,
    pub current_dom_values: BTreeMap<DomType, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_context: Option<SessionContext>,
}

/// One round's raw signals as reported by the game loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundMetrics {
    pub task_success: bool,
    pub tf_ttf_ratio: f64,
    pub reaction_time: f64,
    pub response_duration: f64,
    pub average_tap_accuracy: f64,
    pub actual_targets_to_find_in_round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSample {
    pub value: f64,
    pub performance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomPerformanceProfile {
    pub dom_type: DomType,
    #[serde(default)]
    pub samples: VecDeque<DomSample>,
}

impl DomPerformanceProfile {
    pub fn new(dom_type: DomType) -> Self {
        Self {
            dom_type,
            samples: VecDeque::with_capacity(DOM_PROFILE_CAPACITY),
        }
    }

    pub fn record(&mut self, value: f64, performance: f64) {
        self.samples.push_back(DomSample {
            value: value.clamp(0.0, 1.0),
            performance: performance.clamp(0.0, 1.0),
        });
        while self.samples.len() > DOM_PROFILE_CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn recent(&self, n: usize) -> impl Iterator<Item = &DomSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip)
    }
}

/// Concrete per-DOM values handed to the render/physics collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomValues {
    pub target_count: u32,
    pub response_time: f64,
    pub discriminability_factor: f64,
    pub mean_ball_speed: f64,
    pub ball_speed_sd: f64,
}

impl DomValues {
    pub fn get(&self, dom: DomType) -> f64 {
        match dom {
            DomType::TargetCount => self.target_count as f64,
            DomType::ResponseTime => self.response_time,
            DomType::DiscriminatoryLoad => self.discriminability_factor,
            DomType::MeanBallSpeed => self.mean_ball_speed,
            DomType::BallSpeedSd => self.ball_speed_sd,
        }
    }

    pub fn to_map(&self) -> BTreeMap<DomType, f64> {
        DomType::ALL.iter().map(|d| (*d, self.get(*d))).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptationRoute {
    /// Local PD control from the DOM's own samples.
    Local,
    /// Share of the global signal through the priority allocator.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    pub round_index: u64,
    pub score: f64,
    pub kpis: BTreeMap<KpiType, f64>,
    pub signal: f64,
    pub direction: AdaptationDirection,
    pub confidence: Confidence,
    pub routes: BTreeMap<DomType, AdaptationRoute>,
    pub positions: NormalizedPositions,
    pub dom_values: DomValues,
    pub in_warmup: bool,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAdmState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub performance_history: Vec<PerformanceHistoryEntry>,
    #[serde(default)]
    pub last_adaptation_direction: AdaptationDirection,
    #[serde(default)]
    pub direction_stable_count: u32,
    #[serde(default)]
    pub normalized_positions: NormalizedPositions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_performance_profiles: Option<Vec<DomPerformanceProfile>>,
    #[serde(default)]
    pub saved_at: i64,
}

impl Default for PersistedAdmState {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            performance_history: Vec::new(),
            last_adaptation_direction: AdaptationDirection::Stable,
            direction_stable_count: 0,
            normalized_positions: NormalizedPositions::default(),
            dom_performance_profiles: Some(
                DomType::ALL.iter().map(|d| DomPerformanceProfile::new(*d)).collect(),
            ),
            saved_at: 0,
        }
    }
}

pub(crate) fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub(crate) fn least_squares_slope<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let ys: Vec<f64> = values.into_iter().collect();
    if ys.len() < 2 {
        return 0.0;
    }

    let n = ys.len() as f64;
    let sum_x: f64 = (0..ys.len()).map(|i| i as f64).sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = ys.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..ys.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x.powi(2);
    if denominator.abs() < 1e-10 {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

pub(crate) fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64
}
