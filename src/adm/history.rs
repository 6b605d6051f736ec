use std::collections::VecDeque;

use crate::adm::config::HistoryConfig;
use crate::adm::types::{least_squares_slope, population_variance, PerformanceHistoryEntry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceMetrics {
    pub average: f64,
    pub trend: f64,
    pub variance: f64,
}

impl PerformanceMetrics {
    /// Neutral prior for an empty history.
    pub fn neutral() -> Self {
        Self {
            average: 0.5,
            trend: 0.0,
            variance: 0.0,
        }
    }
}

pub struct HistoryTracker {
    window_size: usize,
    entries: VecDeque<PerformanceHistoryEntry>,
}

impl HistoryTracker {
    pub fn new(config: &HistoryConfig) -> Self {
        let window_size = config.performance_history_window_size.max(1);
        Self {
            window_size,
            entries: VecDeque::with_capacity(window_size + 1),
        }
    }

    /// Restores persisted entries, keeping only the most recent window.
    pub fn from_entries(config: &HistoryConfig, entries: Vec<PerformanceHistoryEntry>) -> Self {
        let mut tracker = Self::new(config);
        tracker.entries = entries.into();
        tracker.trim_to_window();
        tracker
    }

    pub fn add_performance_entry(&mut self, entry: PerformanceHistoryEntry) {
        self.entries.push_back(entry);
        self.trim_to_window();
    }

    pub fn trim_to_window(&mut self) {
        while self.entries.len() > self.window_size {
            self.entries.pop_front();
        }
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        if self.entries.is_empty() {
            return PerformanceMetrics::neutral();
        }

        let scores: Vec<f64> = self.entries.iter().map(|e| e.overall_score).collect();
        let average = scores.iter().sum::<f64>() / scores.len() as f64;

        PerformanceMetrics {
            average,
            trend: least_squares_slope(scores.iter().copied()),
            variance: population_variance(&scores),
        }
    }

    /// Sum of per-entry weights `0.5^(age / half_life)`; old entries count for less
    /// but stay in the record.
    pub fn effective_sample_weight(&self, now_ms: i64, half_life_secs: f64) -> f64 {
        if half_life_secs <= 0.0 {
            return self.entries.len() as f64;
        }
        self.entries
            .iter()
            .map(|e| {
                let age_secs = ((now_ms - e.timestamp).max(0)) as f64 / 1000.0;
                0.5f64.powf(age_secs / half_life_secs)
            })
            .sum()
    }

    pub fn recent_scores(&self, n: usize) -> Vec<f64> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(|e| e.overall_score).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PerformanceHistoryEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<PerformanceHistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new(&HistoryConfig::default())
    }
}
