//! Closed-form composition bounds on bare numbers.
//!
//! These mirror the event-based helpers in [`crate::advanced`] and
//! [`crate::basic`] without any normalisation or metadata, and serve as
//! the reference values those helpers are checked against.

use std::collections::BTreeMap;

use dplib_core::{convert, validate, DpError, Result};

/// `(epsilon, delta)`.
pub type Pair = (f64, f64);

/// Basic sequential composition.
pub fn sequential_sum(epsilons: &[f64], deltas: &[f64]) -> Pair {
    (epsilons.iter().sum(), deltas.iter().sum())
}

/// Parallel composition over disjoint groups; empty input costs nothing.
pub fn parallel_max(groups: &[Pair]) -> Pair {
    groups
        .iter()
        .fold((0.0, 0.0), |(e, d), &(ge, gd)| (e.max(ge), d.max(gd)))
}

/// Dwork–Roth advanced composition for pure-DP events.
pub fn advanced_pure_dp_bound(epsilons: &[f64], delta_prime: f64) -> Result<Pair> {
    if !(delta_prime > 0.0) {
        return Err(DpError::invalid("delta_prime must be positive"));
    }
    let sum_sq: f64 = epsilons.iter().map(|e| e * e).sum();
    let root = if sum_sq > 0.0 {
        (2.0 * (1.0 / delta_prime).ln() * sum_sq).sqrt()
    } else {
        0.0
    };
    let linear: f64 = epsilons.iter().map(|e| e * e.exp_m1()).sum();
    Ok((root + linear, delta_prime))
}

/// DRV10 strong composition for `k` identical mechanisms.
pub fn drv10_strong_bound(epsilon: f64, delta: f64, k: u32, delta_hat: f64) -> Result<Pair> {
    if k == 0 {
        return Err(DpError::invalid("k must be positive"));
    }
    if !(delta_hat > 0.0) {
        return Err(DpError::invalid("delta_hat must be positive"));
    }
    let k = f64::from(k);
    let eps = (2.0 * k * (1.0 / delta_hat).ln()).sqrt() * epsilon + k * epsilon * epsilon.exp_m1();
    Ok((eps, k * delta + delta_hat))
}

/// Sum ρ values, then convert.
pub fn zcdp_bound(rhos: &[f64], target_delta: f64) -> Result<Pair> {
    let target_delta = validate::open_unit_interval(target_delta, "target_delta")?;
    let rho = validate::finite_non_negative(rhos.iter().sum(), "rho")?;
    if rho == 0.0 {
        return Ok((0.0, target_delta));
    }
    Ok((convert::zcdp_to_cdp(rho, target_delta)?, target_delta))
}

/// Sum RDP at a fixed order, then convert.
pub fn rdp_bound(rdp_epsilons: &[f64], order: f64, target_delta: f64) -> Result<Pair> {
    let order = validate::rdp_order(order)?;
    let target_delta = validate::open_unit_interval(target_delta, "target_delta")?;
    let total = validate::finite_non_negative(rdp_epsilons.iter().sum(), "rdp epsilon")?;
    Ok((convert::rdp_to_cdp(order, total, target_delta)?, target_delta))
}

/// Combine μ in L2, then convert.
pub fn gdp_bound(mus: &[f64], target_delta: f64) -> Result<Pair> {
    let target_delta = validate::open_unit_interval(target_delta, "target_delta")?;
    let mu = mus.iter().map(|m| m * m).sum::<f64>().sqrt();
    if mu == 0.0 {
        return Ok((0.0, target_delta));
    }
    Ok((convert::gdp_to_cdp(mu, target_delta)?, target_delta))
}

/// Strong and advanced bounds for one event list, keyed by strategy.
///
/// The strong path treats the first event as representative.
pub fn compare_composition_paths(
    epsilons: &[f64],
    deltas: &[f64],
    delta_hat: f64,
) -> Result<BTreeMap<&'static str, Pair>> {
    if epsilons.len() != deltas.len() {
        return Err(DpError::invalid("epsilons and deltas must align"));
    }
    let k = u32::try_from(epsilons.len())
        .map_err(|_| DpError::invalid("too many events"))?;
    let strong = drv10_strong_bound(
        epsilons.first().copied().unwrap_or(0.0),
        deltas.first().copied().unwrap_or(0.0),
        k,
        delta_hat,
    )?;
    let advanced = advanced_pure_dp_bound(epsilons, delta_hat)?;
    Ok(BTreeMap::from([("strong", strong), ("advanced", advanced)]))
}

/// True when `candidate` spends at least as much as `baseline` in both components.
pub fn is_non_decreasing(baseline: Pair, candidate: Pair) -> bool {
    candidate.0 >= baseline.0 && candidate.1 >= baseline.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advanced;
    use crate::composition::normalize_events;
    use proptest::prelude::*;

    #[test]
    fn parallel_max_of_nothing_is_zero() {
        assert_eq!(parallel_max(&[]), (0.0, 0.0));
        assert_eq!(parallel_max(&[(0.1, 1e-6), (0.3, 0.0)]), (0.3, 1e-6));
    }

    #[test]
    fn advanced_bound_without_loss_is_zero() {
        assert_eq!(advanced_pure_dp_bound(&[0.0, 0.0], 1e-6).unwrap(), (0.0, 1e-6));
        assert!(advanced_pure_dp_bound(&[0.1], 0.0).is_err());
    }

    #[test]
    fn compare_paths_requires_alignment() {
        assert!(compare_composition_paths(&[0.1], &[], 1e-6).is_err());
        let paths = compare_composition_paths(&[0.1, 0.1], &[0.0, 0.0], 1e-6).unwrap();
        assert!(paths.contains_key("strong"));
        assert!(paths.contains_key("advanced"));
    }

    #[test]
    fn helpers_agree_with_reference_bounds() {
        let events = normalize_events(vec![(0.1, 0.0), (0.3, 0.0)]).unwrap();
        let helper = advanced::advanced_composition(&events, 1e-6).unwrap();
        let (eps, delta) = advanced_pure_dp_bound(&[0.1, 0.3], 1e-6).unwrap();
        assert!((helper.epsilon - eps).abs() < 1e-12);
        assert!((helper.delta - delta).abs() < 1e-18);

        let helper = advanced::strong_composition(0.2, 1e-7, 5, 1e-6).unwrap();
        let (eps, delta) = drv10_strong_bound(0.2, 1e-7, 5, 1e-6).unwrap();
        assert!((helper.epsilon - eps).abs() < 1e-12);
        assert!((helper.delta - delta).abs() < 1e-18);

        let helper = advanced::rho_zcdp_composition(&[0.1, 0.2], 1e-5).unwrap();
        assert!((helper.epsilon - zcdp_bound(&[0.1, 0.2], 1e-5).unwrap().0).abs() < 1e-12);

        let helper = advanced::gdp_composition(&[0.3, 0.4], 1e-5).unwrap();
        assert!((helper.epsilon - gdp_bound(&[0.3, 0.4], 1e-5).unwrap().0).abs() < 1e-12);

        let helper = advanced::rdp_composition(&[0.2, 0.3], 8.0, 1e-5).unwrap();
        assert!((helper.epsilon - rdp_bound(&[0.2, 0.3], 8.0, 1e-5).unwrap().0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn adding_an_event_never_lowers_sequential_cost(
            eps in prop::collection::vec(0.0f64..2.0, 0..6),
            extra in 0.0f64..2.0,
        ) {
            let deltas = vec![0.0; eps.len()];
            let base = sequential_sum(&eps, &deltas);
            let mut more = eps.clone();
            more.push(extra);
            let grown = sequential_sum(&more, &vec![0.0; more.len()]);
            prop_assert!(is_non_decreasing(base, grown));
        }

        #[test]
        fn sequential_dominates_parallel(
            pairs in prop::collection::vec((0.0f64..2.0, 0.0f64..1e-4), 1..6),
        ) {
            let eps: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let del: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            prop_assert!(is_non_decreasing(parallel_max(&pairs), sequential_sum(&eps, &del)));
        }
    }
}
