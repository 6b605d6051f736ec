#![allow(dead_code)]

use attention_adm::adm::{AdmConfig, RoundMetrics};

/// Every KPI at or past its worst bound; scores 0.
pub fn very_poor_round() -> RoundMetrics {
    RoundMetrics {
        task_success: false,
        tf_ttf_ratio: 0.0,
        reaction_time: 3.0,
        response_duration: 5.0,
        average_tap_accuracy: 500.0,
        actual_targets_to_find_in_round: 1,
    }
}

/// Every KPI at its best bound; scores 1.
pub fn perfect_round() -> RoundMetrics {
    RoundMetrics {
        task_success: true,
        tf_ttf_ratio: 1.0,
        reaction_time: 0.2,
        response_duration: 1.5,
        average_tap_accuracy: 0.0,
        actual_targets_to_find_in_round: 3,
    }
}

/// Lands close to the 0.5 target at low and mid arousal.
pub fn on_target_round() -> RoundMetrics {
    RoundMetrics {
        task_success: true,
        tf_ttf_ratio: 0.0,
        reaction_time: 1.15,
        response_duration: 5.4,
        average_tap_accuracy: 60.0,
        actual_targets_to_find_in_round: 3,
    }
}

pub fn config_with_min_points(points: usize) -> AdmConfig {
    let mut config = AdmConfig::default();
    config.profiling.dom_min_data_points_for_profiling = points;
    config
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} ± {tolerance}, got {actual}"
    );
}
