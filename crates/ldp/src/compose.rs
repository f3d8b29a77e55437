//! Linear composition over local usages.
//!
//! Local randomisers compose additively per user. Sequential and parallel
//! views share the same per-user sums and differ in which aggregate bounds
//! the release: the total for sequential, the worst user for parallel.

use std::collections::BTreeMap;

use dplib_core::{validate, Result};

use crate::usage::{LdpBudgetSummary, LocalPrivacyUsage};

/// Sum of non-negative epsilons.
pub fn compose_epsilon_sum<I>(epsilons: I) -> Result<f64>
where
    I: IntoIterator<Item = f64>,
{
    epsilons.into_iter().try_fold(0.0, |total, epsilon| {
        Ok(total + validate::finite_non_negative(epsilon, "epsilon")?)
    })
}

/// Sum of the epsilons of every usage.
pub fn compose_usages_sum(usages: &[LocalPrivacyUsage]) -> Result<f64> {
    compose_epsilon_sum(usages.iter().map(|u| u.epsilon))
}

/// Cumulative epsilon per user key.
pub fn per_user_epsilon(usages: &[LocalPrivacyUsage]) -> Result<BTreeMap<String, f64>> {
    let mut per_user = BTreeMap::new();
    for usage in usages {
        let epsilon = usage.validate()?;
        *per_user.entry(usage.user_key().to_string()).or_insert(0.0) += epsilon;
    }
    Ok(per_user)
}

/// Totals, per-user sums and the worst user.
pub fn summarize_budget(usages: &[LocalPrivacyUsage]) -> Result<LdpBudgetSummary> {
    let per_user = per_user_epsilon(usages)?;
    let total = compose_usages_sum(usages)?;
    Ok(LdpBudgetSummary::from_totals(total, per_user, usages.len()))
}

/// Sequential bound: the plain total.
pub fn sequential_composition(usages: &[LocalPrivacyUsage]) -> Result<f64> {
    compose_usages_sum(usages)
}

/// Sequential composition within each user.
pub fn sequential_compose_by_user(usages: &[LocalPrivacyUsage]) -> Result<BTreeMap<String, f64>> {
    per_user_epsilon(usages)
}

/// Parallel view across users; `max_user_epsilon` is the bound.
pub fn parallel_composition(usages: &[LocalPrivacyUsage]) -> Result<LdpBudgetSummary> {
    summarize_budget(usages)
}
