//! Conversions between privacy representations.
//!
//! Every function validates its domain and fails instead of producing NaN or
//! a negative bound.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::validate;
use crate::{DpError, Result};

/// ρ-zCDP to (ε, δ)-DP: `ε = ρ + 2·√(ρ·ln(1/δ))`.
pub fn zcdp_to_cdp(rho: f64, delta: f64) -> Result<f64> {
    let rho = validate::positive(rho, "rho")?;
    let delta = validate::open_unit_interval(delta, "delta")?;
    Ok(rho + 2.0 * (rho * (1.0 / delta).ln()).sqrt())
}

/// (ε, δ)-DP to ρ-zCDP, a loose upper bound: `ρ = (ε + ln(1/δ))² / (2·ln(1/δ))`.
pub fn cdp_to_zcdp(epsilon: f64, delta: f64) -> Result<f64> {
    let epsilon = validate::finite_non_negative(epsilon, "epsilon")?;
    let delta = validate::open_unit_interval(delta, "delta")?;
    let log_inv = (1.0 / delta).ln();
    let term = epsilon + log_inv;
    Ok(term * term / (2.0 * log_inv))
}

/// ρ-zCDP to (α, ε)-RDP: `ε = α·ρ`.
pub fn zcdp_to_rdp(rho: f64, order: f64) -> Result<f64> {
    let rho = validate::finite_non_negative(rho, "rho")?;
    let order = validate::rdp_order(order)?;
    Ok(order * rho)
}

/// (α, ε)-RDP to (ε', δ)-DP: `ε' = ε + ln(1/δ)/(α − 1)`.
pub fn rdp_to_cdp(order: f64, rdp_epsilon: f64, delta: f64) -> Result<f64> {
    let order = validate::rdp_order(order)?;
    let rdp_epsilon = validate::finite_non_negative(rdp_epsilon, "rdp epsilon")?;
    let delta = validate::open_unit_interval(delta, "delta")?;
    Ok(rdp_epsilon + (1.0 / delta).ln() / (order - 1.0))
}

/// μ-GDP to ρ-zCDP: `ρ = μ²/2`.
pub fn gdp_to_zcdp(mu: f64) -> Result<f64> {
    let mu = validate::positive(mu, "mu")?;
    Ok(0.5 * mu * mu)
}

/// μ-GDP to (ε, δ)-DP through the zCDP bridge.
pub fn gdp_to_cdp(mu: f64, delta: f64) -> Result<f64> {
    zcdp_to_cdp(gdp_to_zcdp(mu)?, delta)
}

/// ε-LDP to its central `(ε, 0)` view.
pub fn ldp_to_cdp(epsilon: f64) -> Result<(f64, f64)> {
    Ok((validate::finite_non_negative(epsilon, "epsilon")?, 0.0))
}

/// Exact δ(ε) of the μ-GDP trade-off curve:
/// `δ = Φ(−ε/μ + μ/2) − e^ε·Φ(−ε/μ − μ/2)`.
///
/// Tighter than [`gdp_to_cdp`] and useful as a cross-check.
pub fn gdp_delta_for_epsilon(mu: f64, epsilon: f64) -> Result<f64> {
    let mu = validate::positive(mu, "mu")?;
    let epsilon = validate::finite_non_negative(epsilon, "epsilon")?;
    let normal = Normal::new(0.0, 1.0).map_err(|e| DpError::numerical(e.to_string()))?;
    let delta = normal.cdf(-epsilon / mu + mu / 2.0)
        - epsilon.exp() * normal.cdf(-epsilon / mu - mu / 2.0);
    if !delta.is_finite() {
        return Err(DpError::numerical("gdp trade-off produced a non-finite delta"));
    }
    Ok(delta.clamp(0.0, 1.0))
}
