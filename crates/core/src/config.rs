//! Explicit accounting configuration.
//!
//! Every accountant takes one of these at construction; there is no
//! process-wide default that can change underneath a running accountant.

use serde::{Deserialize, Serialize};

use crate::validate;
use crate::{DpError, Result};

/// Fallback delta used when folding zCDP/RDP/GDP guarantees into a CDP view.
pub const DEFAULT_CONVERSION_DELTA: f64 = 1e-6;

/// Default alert thresholds for budget tracking.
pub const DEFAULT_ALERT_THRESHOLDS: [f64; 3] = [0.5, 0.8, 1.0];

/// Tunable knobs shared by accountants, trackers and schedulers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// Tolerance applied when comparing cumulative spend against a limit.
    pub slack: f64,
    /// Default `delta_prime` for advanced composition.
    pub delta_prime: f64,
    /// Default `delta_hat` for strong and optimal composition.
    pub delta_hat: f64,
    /// Default target delta for zCDP/RDP/GDP composition.
    pub target_delta: Option<f64>,
    /// Delta used when converting a non-CDP guarantee without an explicit target.
    pub conversion_delta: f64,
    /// Fractions of a scope budget at which alerts fire.
    pub alert_thresholds: Vec<f64>,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            slack: 1e-12,
            delta_prime: 1e-6,
            delta_hat: 1e-6,
            target_delta: None,
            conversion_delta: DEFAULT_CONVERSION_DELTA,
            alert_thresholds: DEFAULT_ALERT_THRESHOLDS.to_vec(),
        }
    }
}

impl AccountingConfig {
    /// Set the comparison slack.
    pub fn with_slack(mut self, slack: f64) -> Result<Self> {
        self.slack = validate::finite_non_negative(slack, "slack")?;
        Ok(self)
    }

    /// Set the default advanced-composition `delta_prime`.
    pub fn with_delta_prime(mut self, delta_prime: f64) -> Result<Self> {
        self.delta_prime = validate::open_unit_interval(delta_prime, "delta_prime")?;
        Ok(self)
    }

    /// Set the default strong-composition `delta_hat`.
    pub fn with_delta_hat(mut self, delta_hat: f64) -> Result<Self> {
        self.delta_hat = validate::open_unit_interval(delta_hat, "delta_hat")?;
        Ok(self)
    }

    /// Set the default conversion target delta.
    pub fn with_target_delta(mut self, target_delta: f64) -> Result<Self> {
        self.target_delta = Some(validate::open_unit_interval(
            target_delta,
            "target_delta",
        )?);
        Ok(self)
    }

    /// Set the fallback delta for CDP views.
    pub fn with_conversion_delta(mut self, delta: f64) -> Result<Self> {
        self.conversion_delta = validate::open_unit_interval(delta, "conversion_delta")?;
        Ok(self)
    }

    /// Set the alert thresholds (deduplicated and sorted).
    pub fn with_alert_thresholds(mut self, thresholds: Vec<f64>) -> Result<Self> {
        self.alert_thresholds = normalize_thresholds(&thresholds)?;
        Ok(self)
    }

    /// Check every field against its domain.
    pub fn validate(&self) -> Result<()> {
        validate::finite_non_negative(self.slack, "slack")?;
        validate::open_unit_interval(self.delta_prime, "delta_prime")?;
        validate::open_unit_interval(self.delta_hat, "delta_hat")?;
        if let Some(target) = self.target_delta {
            validate::open_unit_interval(target, "target_delta")?;
        }
        validate::open_unit_interval(self.conversion_delta, "conversion_delta")?;
        normalize_thresholds(&self.alert_thresholds)?;
        Ok(())
    }
}

/// Sort and deduplicate alert thresholds, rejecting non-positive values.
pub fn normalize_thresholds(thresholds: &[f64]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(thresholds.len());
    for &t in thresholds {
        if !t.is_finite() || t <= 0.0 {
            return Err(DpError::invalid(
                "thresholds must be positive floating point values",
            ));
        }
        out.push(t);
    }
    out.sort_by(f64::total_cmp);
    out.dedup();
    Ok(out)
}
