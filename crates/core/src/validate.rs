//! Numeric domain checks shared by every public operation.
//!
//! All privacy parameters must be finite. NaN and infinities are rejected
//! rather than propagated into cumulative totals.

use crate::{DpError, Result};

/// Require `value` to be finite and `>= 0`.
pub fn finite_non_negative(value: f64, label: &str) -> Result<f64> {
    if !value.is_finite() {
        return Err(DpError::invalid(format!("{label} must be finite")));
    }
    if value < 0.0 {
        return Err(DpError::invalid(format!("{label} must be non-negative")));
    }
    Ok(value)
}

/// Require `value` to be finite and `> 0`.
pub fn positive(value: f64, label: &str) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DpError::invalid(format!("{label} must be positive and finite")));
    }
    Ok(value)
}

/// Require `value` to lie in the closed interval `[0, 1]`.
pub fn unit_interval(value: f64, label: &str) -> Result<f64> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(DpError::invalid(format!("{label} must be in [0, 1]")));
    }
    Ok(value)
}

/// Require `value` to lie in the open interval `(0, 1)`.
pub fn open_unit_interval(value: f64, label: &str) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 || value >= 1.0 {
        return Err(DpError::invalid(format!("{label} must be in (0, 1)")));
    }
    Ok(value)
}

/// Require a Rényi order strictly greater than one.
pub fn rdp_order(order: f64) -> Result<f64> {
    if !order.is_finite() || order <= 1.0 {
        return Err(DpError::invalid("rdp order must be > 1"));
    }
    Ok(order)
}

/// Validate an `(epsilon, delta)` pair as used by budgets and events.
pub fn epsilon_delta(epsilon: f64, delta: f64) -> Result<(f64, f64)> {
    Ok((
        finite_non_negative(epsilon, "epsilon")?,
        unit_interval(delta, "delta")?,
    ))
}
