//! Priority-weighted spreading of a signed adaptation budget over DOMs.
//!
//! Hardening spends the budget in a single pass weighted by priority. Easing
//! first drains DOMs sitting above the midpoint (never pushing them below it),
//! redistributing what saturated DOMs cannot take, and only spills the true
//! remainder over every DOM by inverted priority.

use std::collections::BTreeMap;

use crate::adm::config::AllocationConfig;
use crate::adm::scoring::WeightCurve;
use crate::adm::types::DomType;

const BUDGET_EPSILON: f64 = 1e-12;

pub struct PriorityBudgetAllocator {
    config: AllocationConfig,
    curve: WeightCurve,
}

impl PriorityBudgetAllocator {
    pub fn new(config: AllocationConfig) -> Self {
        let curve = WeightCurve::new(
            config.priority_transition_start,
            config.priority_transition_end,
            config.interpolation_enabled,
        );
        Self { config, curve }
    }

    pub fn priority(&self, dom: DomType, arousal: f64) -> f64 {
        let s = self.curve.blend(arousal);
        let low = self.config.low_arousal_priorities.get(&dom).copied().unwrap_or(1.0);
        let high = self.config.high_arousal_priorities.get(&dom).copied().unwrap_or(1.0);
        (low * (1.0 - s) + high * s).max(0.0)
    }

    /// Priority weights for `subset`, optionally inverted as `(max + min) - p`.
    pub fn priority_weights(
        &self,
        arousal: f64,
        invert: bool,
        subset: &[DomType],
    ) -> BTreeMap<DomType, f64> {
        let raw: BTreeMap<DomType, f64> =
            subset.iter().map(|d| (*d, self.priority(*d, arousal))).collect();
        if !invert || raw.is_empty() {
            return raw;
        }

        let max = raw.values().copied().fold(f64::MIN, f64::max);
        let min = raw.values().copied().fold(f64::MAX, f64::min);
        raw.into_iter().map(|(d, p)| (d, (max + min) - p)).collect()
    }

    pub fn distribute_adaptation_budget(
        &self,
        total_budget: f64,
        arousal: f64,
        invert_priorities: bool,
        subset: Option<&[DomType]>,
    ) -> BTreeMap<DomType, f64> {
        let subset = subset.unwrap_or(&DomType::ALL[..]);
        let weights = self.priority_weights(arousal, invert_priorities, subset);
        Self::split_by_weight(total_budget, &weights)
    }

    fn split_by_weight(total: f64, weights: &BTreeMap<DomType, f64>) -> BTreeMap<DomType, f64> {
        if weights.is_empty() {
            return BTreeMap::new();
        }
        let weight_sum: f64 = weights.values().sum();
        if weight_sum <= BUDGET_EPSILON {
            let even = total / weights.len() as f64;
            return weights.keys().map(|d| (*d, even)).collect();
        }
        weights
            .iter()
            .map(|(d, w)| (*d, total * w / weight_sum))
            .collect()
    }

    /// Converts a signed budget into per-DOM difficulty deltas.
    ///
    /// `difficulties` holds the current difficulty of every DOM in `subset`.
    pub fn allocate(
        &self,
        total_budget: f64,
        arousal: f64,
        difficulties: &BTreeMap<DomType, f64>,
        subset: &[DomType],
        max_delta: f64,
    ) -> BTreeMap<DomType, f64> {
        let mut deltas: BTreeMap<DomType, f64> = subset.iter().map(|d| (*d, 0.0)).collect();
        if subset.is_empty() || total_budget.abs() <= BUDGET_EPSILON || !total_budget.is_finite() {
            return deltas;
        }

        if total_budget > 0.0 {
            let budgets = self.distribute_adaptation_budget(total_budget, arousal, false, Some(subset));
            for (dom, budget) in budgets {
                let delta = budget * self.config.smoothing_for(dom, true);
                deltas.insert(dom, delta);
            }
        } else {
            let spent = self.ease_two_pass(total_budget.abs(), arousal, difficulties, subset);
            for (dom, budget) in spent {
                let delta = -budget * self.config.smoothing_for(dom, false);
                deltas.insert(dom, delta);
            }
        }

        for (dom, delta) in deltas.iter_mut() {
            let current = difficulties.get(dom).copied().unwrap_or(0.5);
            let bounded = delta.clamp(-max_delta.abs(), max_delta.abs());
            *delta = (current + bounded).clamp(0.0, 1.0) - current;
        }
        deltas
    }

    /// Returns the easing budget (positive magnitudes) absorbed by each DOM.
    fn ease_two_pass(
        &self,
        magnitude: f64,
        arousal: f64,
        difficulties: &BTreeMap<DomType, f64>,
        subset: &[DomType],
    ) -> BTreeMap<DomType, f64> {
        let midpoint = self.config.easing_midpoint;
        let mut absorbed: BTreeMap<DomType, f64> = subset.iter().map(|d| (*d, 0.0)).collect();

        let mut capacity: BTreeMap<DomType, f64> = subset
            .iter()
            .filter_map(|d| {
                let headroom = difficulties.get(d).copied().unwrap_or(0.5) - midpoint;
                let easing = self.config.smoothing_for(*d, false);
                (headroom > 0.0 && easing > BUDGET_EPSILON).then(|| (*d, headroom / easing))
            })
            .collect();

        // Each round either spends the whole remainder or saturates at least one
        // DOM, so this runs at most once per above-midpoint DOM.
        let mut remaining = magnitude;
        while remaining > BUDGET_EPSILON && !capacity.is_empty() {
            let open: Vec<DomType> = capacity.keys().copied().collect();
            let shares = self.distribute_adaptation_budget(remaining, arousal, true, Some(open.as_slice()));
            for (dom, share) in shares {
                let Some(left) = capacity.get_mut(&dom) else {
                    continue;
                };
                let spend = share.min(*left).max(0.0);
                *absorbed.entry(dom).or_insert(0.0) += spend;
                *left -= spend;
                remaining -= spend;
                if *left <= BUDGET_EPSILON {
                    capacity.remove(&dom);
                }
            }
        }

        if remaining > BUDGET_EPSILON {
            tracing::trace!(remaining, "easing budget spills into second pass");
            let shares = self.distribute_adaptation_budget(remaining, arousal, true, Some(subset));
            for (dom, share) in shares {
                *absorbed.entry(dom).or_insert(0.0) += share;
            }
        }

        absorbed
    }
}

impl Default for PriorityBudgetAllocator {
    fn default() -> Self {
        Self::new(AllocationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uniform(value: f64) -> BTreeMap<DomType, f64> {
        DomType::ALL.iter().map(|d| (*d, value)).collect()
    }

    #[test]
    fn test_budget_sums_to_total() {
        let allocator = PriorityBudgetAllocator::default();
        let budgets = allocator.distribute_adaptation_budget(0.8, 0.3, false, None);
        let sum: f64 = budgets.values().sum();
        assert!((sum - 0.8).abs() < 1e-9);
        assert!(budgets[&DomType::TargetCount] > budgets[&DomType::BallSpeedSd]);
    }

    #[test]
    fn test_inverted_priorities_reverse_order() {
        let allocator = PriorityBudgetAllocator::default();
        let budgets = allocator.distribute_adaptation_budget(1.0, 0.3, true, None);
        assert!(budgets[&DomType::BallSpeedSd] > budgets[&DomType::TargetCount]);
    }

    #[test]
    fn test_high_arousal_table() {
        let allocator = PriorityBudgetAllocator::default();
        assert!((allocator.priority(DomType::MeanBallSpeed, 0.95) - 5.0).abs() < 1e-9);
        assert!((allocator.priority(DomType::MeanBallSpeed, 0.2) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_subset() {
        let allocator = PriorityBudgetAllocator::default();
        assert!(allocator
            .distribute_adaptation_budget(1.0, 0.5, false, Some(&[][..]))
            .is_empty());
    }

    #[test]
    fn test_hardening_raises_every_dom() {
        let allocator = PriorityBudgetAllocator::default();
        let deltas = allocator.allocate(0.5, 0.5, &uniform(0.5), &DomType::ALL, 0.15);
        assert!(deltas.values().all(|d| *d > 0.0));
    }

    #[test]
    fn test_first_pass_spills_past_capacity() {
        let allocator = PriorityBudgetAllocator::default();
        let mut difficulties = uniform(0.3);
        difficulties.insert(DomType::MeanBallSpeed, 0.52);
        let easing = allocator.config.smoothing_for(DomType::MeanBallSpeed, false);
        let capacity = 0.02 / easing;
        let budgets = allocator.ease_two_pass(0.05, 0.5, &difficulties, &DomType::ALL);
        let total: f64 = budgets.values().sum();
        assert!((total - 0.05).abs() < 1e-9);
        assert!(budgets[&DomType::MeanBallSpeed] > capacity);
        assert!(budgets[&DomType::BallSpeedSd] > 0.0);
    }

    #[test]
    fn test_small_easing_budget_stays_in_first_pass() {
        let allocator = PriorityBudgetAllocator::default();
        let mut difficulties = uniform(0.3);
        difficulties.insert(DomType::TargetCount, 0.9);
        let budgets = allocator.ease_two_pass(0.1, 0.5, &difficulties, &DomType::ALL);
        assert!((budgets[&DomType::TargetCount] - 0.1).abs() < 1e-9);
        assert_eq!(budgets[&DomType::BallSpeedSd], 0.0);
    }

    #[test]
    fn test_saturated_share_moves_to_dom_with_headroom() {
        let allocator = PriorityBudgetAllocator::default();
        let mut difficulties = uniform(0.3);
        difficulties.insert(DomType::TargetCount, 0.9);
        difficulties.insert(DomType::BallSpeedSd, 0.51);

        let budgets = allocator.ease_two_pass(0.1, 0.3, &difficulties, &DomType::ALL);
        let sd_capacity = 0.01 / allocator.config.smoothing_for(DomType::BallSpeedSd, false);
        assert!((budgets[&DomType::BallSpeedSd] - sd_capacity).abs() < 1e-9);
        assert!((budgets[&DomType::TargetCount] - (0.1 - sd_capacity)).abs() < 1e-9);
        for dom in [DomType::ResponseTime, DomType::DiscriminatoryLoad, DomType::MeanBallSpeed] {
            assert_eq!(budgets[&dom], 0.0);
        }

        let deltas = allocator.allocate(-0.1, 0.3, &difficulties, &DomType::ALL, 0.15);
        assert!(deltas[&DomType::TargetCount] < -0.04);
        assert!(difficulties[&DomType::BallSpeedSd] + deltas[&DomType::BallSpeedSd] >= 0.5 - 1e-9);
        for dom in [DomType::ResponseTime, DomType::DiscriminatoryLoad, DomType::MeanBallSpeed] {
            assert_eq!(deltas[&dom], 0.0);
        }
    }

    #[test]
    fn test_easing_lowers_every_dom_from_midpoint() {
        let allocator = PriorityBudgetAllocator::default();
        let deltas = allocator.allocate(-0.5, 0.5, &uniform(0.5), &DomType::ALL, 0.15);
        assert!(deltas.values().all(|d| *d < 0.0));
    }

    #[test]
    fn test_deltas_respect_bounds() {
        let allocator = PriorityBudgetAllocator::default();
        let deltas = allocator.allocate(-5.0, 0.5, &uniform(0.02), &DomType::ALL, 0.15);
        for d in deltas.values() {
            assert!(*d >= -0.02 - 1e-12);
        }
    }

    proptest! {
        #[test]
        fn distribution_conserves_budget(
            total in -2.0f64..2.0,
            arousal in 0.0f64..1.0,
            invert in any::<bool>(),
            mask in 1u8..32,
        ) {
            let allocator = PriorityBudgetAllocator::default();
            let subset: Vec<DomType> = DomType::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, d)| *d)
                .collect();
            let budgets = allocator.distribute_adaptation_budget(total, arousal, invert, Some(subset.as_slice()));
            let sum: f64 = budgets.values().sum();
            prop_assert!((sum - total).abs() < 1e-9);
            prop_assert_eq!(budgets.len(), subset.len());
        }

        #[test]
        fn allocation_keeps_difficulty_in_range(
            total in -3.0f64..3.0,
            start in 0.0f64..1.0,
            arousal in 0.0f64..1.0,
        ) {
            let allocator = PriorityBudgetAllocator::default();
            let difficulties = uniform(start);
            let deltas = allocator.allocate(total, arousal, &difficulties, &DomType::ALL, 0.15);
            for (dom, delta) in deltas {
                let next = difficulties[&dom] + delta;
                prop_assert!((-1e-12..=1.0 + 1e-12).contains(&next));
                prop_assert!(delta.abs() <= 0.15 + 1e-12);
            }
        }
    }
}
