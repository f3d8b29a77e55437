//! Rényi divergence of the Poisson-subsampled Gaussian mechanism.
//!
//! Integer orders use the exact binomial expansion of `A_α`; fractional
//! orders are bounded by the next integer order.

use dplib_core::{validate, DpError, Result};

/// Table of `ln(i!)` for `i = 0..=n`.
#[derive(Clone, Debug)]
pub struct LogFactorials(Vec<f64>);

impl LogFactorials {
    /// Table covering every integer up to `n`.
    pub fn up_to(n: usize) -> Self {
        let mut table = vec![0.0; n.saturating_add(1)];
        for i in 1..table.len() {
            table[i] = table[i - 1] + (i as f64).ln();
        }
        Self(table)
    }

    /// Table wide enough for the ceiling of every order.
    pub fn for_orders(orders: &[f64]) -> Self {
        Self::up_to(max_order_ceil(orders))
    }

    /// Largest `n` covered.
    pub fn max(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    fn log_binom(&self, n: usize, k: usize) -> f64 {
        self.0[n] - self.0[k] - self.0[n - k]
    }
}

/// RDP at `order` of one subsampled Gaussian step.
pub fn gaussian_rdp(order: f64, noise_multiplier: f64, sampling_rate: f64) -> Result<f64> {
    let order = validate::rdp_order(order)?;
    let table = LogFactorials::for_orders(&[order]);
    subsampled_gaussian(order, noise_multiplier, sampling_rate, &table)
}

/// RDP of one subsampled Gaussian step at each of `orders`.
pub fn gaussian_rdp_curve(orders: &[f64], noise_multiplier: f64, sampling_rate: f64) -> Result<Vec<f64>> {
    for &order in orders {
        validate::rdp_order(order)?;
    }
    let table = LogFactorials::for_orders(orders);
    orders
        .iter()
        .map(|&order| subsampled_gaussian(order, noise_multiplier, sampling_rate, &table))
        .collect()
}

/// RDP using a caller-provided factorial table.
pub fn subsampled_gaussian(order: f64, sigma: f64, q: f64, log_fact: &LogFactorials) -> Result<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(DpError::invalid("noise_multiplier must be positive"));
    }
    let q = validate::unit_interval(q, "sampling_rate")?;
    if q == 0.0 {
        return Ok(0.0);
    }
    if q == 1.0 {
        return Ok(order / (2.0 * sigma * sigma));
    }
    if is_integer(order) {
        let alpha = order.round() as usize;
        let log_a = log_a_term(q, sigma, alpha, log_fact)?;
        return Ok(log_a / (order - 1.0));
    }
    // RDP is non-decreasing in the order, so the next integer bounds it.
    subsampled_gaussian(order.ceil(), sigma, q, log_fact)
}

fn max_order_ceil(orders: &[f64]) -> usize {
    orders
        .iter()
        .copied()
        .filter(|&a| a.is_finite() && a > 1.0)
        .map(|a| a.ceil() as usize)
        .max()
        .unwrap_or(0)
        .max(2)
}

fn is_integer(x: f64) -> bool {
    (x - x.round()).abs() < 1e-12
}

/// `ln A_α` for integer α.
fn log_a_term(q: f64, sigma: f64, alpha: usize, log_fact: &LogFactorials) -> Result<f64> {
    if alpha > log_fact.max() {
        return Err(DpError::numerical(format!(
            "factorial table covers {} but order {alpha} was requested",
            log_fact.max()
        )));
    }
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let sigma_sq = sigma * sigma;
    let alpha_f = alpha as f64;

    let mut log_sum = f64::NEG_INFINITY;
    for j in 0..=alpha {
        let j_f = j as f64;
        let log_term = log_fact.log_binom(alpha, j)
            + j_f * log_q
            + (alpha_f - j_f) * log_1mq
            + j_f * (j_f - 1.0) / (2.0 * sigma_sq);
        log_sum = log_add_exp(log_sum, log_term);
    }
    Ok(log_sum)
}

/// Stable `ln(e^a + e^b)`.
fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_batch_is_plain_gaussian() {
        let rdp = gaussian_rdp(8.0, 2.0, 1.0).unwrap();
        assert!((rdp - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_rate_costs_nothing() {
        assert_eq!(gaussian_rdp(4.0, 1.0, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn subsampling_reduces_divergence() {
        let full = gaussian_rdp(4.0, 1.0, 1.0).unwrap();
        let sampled = gaussian_rdp(4.0, 1.0, 0.01).unwrap();
        assert!(sampled > 0.0);
        assert!(sampled < full);
    }

    #[test]
    fn fractional_orders_round_up() {
        let high = gaussian_rdp(5.0, 1.0, 0.05).unwrap();
        let mid = gaussian_rdp(4.5, 1.0, 0.05).unwrap();
        assert_eq!(mid, high);
        let at_two = gaussian_rdp(2.0, 1.0, 0.05).unwrap();
        let at_one_and_half = gaussian_rdp(1.5, 1.0, 0.05).unwrap();
        assert_eq!(at_one_and_half, at_two);
        assert!(at_one_and_half > 0.5 * at_two);
    }

    #[test]
    fn curve_rejects_bad_inputs() {
        assert!(gaussian_rdp_curve(&[2.0, 1.0], 1.0, 0.1).is_err());
        assert!(gaussian_rdp_curve(&[2.0], 0.0, 0.1).is_err());
        assert!(gaussian_rdp_curve(&[2.0], 1.0, 1.5).is_err());
    }

    #[test]
    fn short_table_is_an_error() {
        let table = LogFactorials::up_to(3);
        assert!(subsampled_gaussian(8.0, 1.0, 0.1, &table).is_err());
    }
}
