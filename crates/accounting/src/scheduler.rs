//! Splitting a global budget across tasks or time windows.

use std::collections::BTreeMap;

use dplib_core::{validate, DpError, PrivacyBudget, Result};
use serde::{Deserialize, Serialize};

/// One slice of the global budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocated epsilon.
    pub epsilon: f64,
    /// Allocated delta.
    pub delta: f64,
}

impl Allocation {
    /// The allocation as a budget.
    pub fn to_budget(&self) -> Result<PrivacyBudget> {
        PrivacyBudget::new(self.epsilon, self.delta)
    }
}

/// Splits a fixed `(ε, δ)` total.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BudgetScheduler {
    total: PrivacyBudget,
}

impl BudgetScheduler {
    /// Scheduler over `(total_epsilon, total_delta)`.
    pub fn new(total_epsilon: f64, total_delta: f64) -> Result<Self> {
        Ok(Self {
            total: PrivacyBudget::new(total_epsilon, total_delta)?,
        })
    }

    /// Total being split.
    pub fn total(&self) -> PrivacyBudget {
        self.total
    }

    /// Equal split across distinct keys.
    ///
    /// The last key absorbs the rounding remainder so the shares sum to the
    /// total exactly when added in key order.
    pub fn allocate_uniform<K, I>(&self, keys: I) -> Result<BTreeMap<K, Allocation>>
    where
        K: Ord,
        I: IntoIterator<Item = K>,
    {
        let mut allocations: BTreeMap<K, Allocation> = keys
            .into_iter()
            .map(|k| (k, Allocation::default()))
            .collect();
        if allocations.is_empty() {
            return Err(DpError::invalid("items cannot be empty"));
        }
        let n = allocations.len() as f64;
        let share = Allocation {
            epsilon: self.total.epsilon() / n,
            delta: self.total.delta() / n,
        };
        let mut running = Allocation::default();
        let last = allocations.len() - 1;
        for (i, slot) in allocations.values_mut().enumerate() {
            *slot = if i == last {
                Allocation {
                    epsilon: self.total.epsilon() - running.epsilon,
                    delta: self.total.delta() - running.delta,
                }
            } else {
                share
            };
            running.epsilon += slot.epsilon;
            running.delta += slot.delta;
        }
        Ok(allocations)
    }

    /// Split in proportion to non-negative weights.
    pub fn allocate_proportional<K, I>(&self, weights: I) -> Result<BTreeMap<K, Allocation>>
    where
        K: Ord,
        I: IntoIterator<Item = (K, f64)>,
    {
        let weights: Vec<(K, f64)> = weights.into_iter().collect();
        if weights.is_empty() {
            return Err(DpError::invalid("weights cannot be empty"));
        }
        for (_, weight) in &weights {
            validate::finite_non_negative(*weight, "weight")?;
        }
        let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return Err(DpError::invalid("weights must sum to a positive value"));
        }
        Ok(weights
            .into_iter()
            .map(|(key, weight)| (key, self.share(weight / total_weight)))
            .collect())
    }

    /// Split across `window_count` ordered windows with geometric `decay`.
    ///
    /// `decay == 1` is uniform; `decay < 1` favours early windows.
    pub fn allocate_windows(&self, window_count: usize, decay: f64) -> Result<Vec<Allocation>> {
        if window_count == 0 {
            return Err(DpError::invalid("window_count must be positive"));
        }
        let decay = validate::positive(decay, "decay")?;
        if decay == 1.0 {
            return Ok(self.allocate_uniform(0..window_count)?.into_values().collect());
        }
        let weights: Vec<f64> = (0..window_count).map(|i| decay.powi(i as i32)).collect();
        let total_weight: f64 = weights.iter().sum();
        if !total_weight.is_finite() {
            return Err(DpError::numerical("window weights overflowed"));
        }
        Ok(weights
            .into_iter()
            .map(|w| self.share(w / total_weight))
            .collect())
    }

    /// Total minus the given allocations, floored at zero.
    pub fn remaining_after_allocation<'a, I>(&self, allocations: I) -> PrivacyBudget
    where
        I: IntoIterator<Item = &'a Allocation>,
    {
        let (epsilon, delta) = allocations
            .into_iter()
            .fold((0.0, 0.0), |(e, d), a| (e + a.epsilon, d + a.delta));
        let floor = |x: f64| if x.is_finite() { x.max(0.0) } else { 0.0 };
        PrivacyBudget::new(
            floor(self.total.epsilon() - epsilon),
            floor(self.total.delta() - delta).min(1.0),
        )
        .unwrap_or(PrivacyBudget::ZERO)
    }

    fn share(&self, ratio: f64) -> Allocation {
        Allocation {
            epsilon: self.total.epsilon() * ratio,
            delta: self.total.delta() * ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn uniform_rejects_empty() {
        let scheduler = BudgetScheduler::new(1.0, 1e-5).unwrap();
        assert!(scheduler.allocate_uniform(Vec::<String>::new()).is_err());
    }

    #[test]
    fn proportional_split() {
        let scheduler = BudgetScheduler::new(1.0, 0.0).unwrap();
        let shares = scheduler
            .allocate_proportional([("a", 1.0), ("b", 3.0)])
            .unwrap();
        assert!((shares["a"].epsilon - 0.25).abs() < 1e-12);
        assert!((shares["b"].epsilon - 0.75).abs() < 1e-12);
        assert!(scheduler.allocate_proportional([("a", -1.0), ("b", 2.0)]).is_err());
        assert!(scheduler.allocate_proportional([("a", 0.0)]).is_err());
        assert!(scheduler
            .allocate_proportional(Vec::<(&str, f64)>::new())
            .is_err());
    }

    #[test]
    fn windows_decay() {
        let scheduler = BudgetScheduler::new(1.0, 1e-5).unwrap();
        let windows = scheduler.allocate_windows(4, 0.5).unwrap();
        assert!(windows.windows(2).all(|w| w[0].epsilon > w[1].epsilon));
        let flat = scheduler.allocate_windows(4, 1.0).unwrap();
        assert!((flat[0].epsilon - 0.25).abs() < 1e-12);
        assert!(scheduler.allocate_windows(0, 0.5).is_err());
        assert!(scheduler.allocate_windows(3, 0.0).is_err());
    }

    #[test]
    fn remaining_floors_at_zero() {
        let scheduler = BudgetScheduler::new(1.0, 0.0).unwrap();
        let over = [Allocation { epsilon: 0.7, delta: 0.0 }, Allocation { epsilon: 0.6, delta: 0.0 }];
        assert!(scheduler.remaining_after_allocation(&over).is_zero());
        let half = [Allocation { epsilon: 0.5, delta: 0.0 }];
        assert!((scheduler.remaining_after_allocation(&half).epsilon() - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn uniform_sums_exactly(total in 0.001f64..100.0, n in 1usize..64) {
            let scheduler = BudgetScheduler::new(total, 0.0).unwrap();
            let shares = scheduler.allocate_uniform(0..n).unwrap();
            let sum: f64 = shares.values().map(|a| a.epsilon).sum();
            prop_assert_eq!(sum, total);
        }

        #[test]
        fn windows_sum_to_total(total in 0.001f64..100.0, n in 1usize..32, decay in 0.05f64..0.99) {
            let scheduler = BudgetScheduler::new(total, 0.0).unwrap();
            let sum: f64 = scheduler
                .allocate_windows(n, decay)
                .unwrap()
                .iter()
                .map(|a| a.epsilon)
                .sum();
            prop_assert!((sum - total).abs() < 1e-9);
        }
    }
}
