//! Accountant configuration types.
//!
//! Each config captures everything needed to build a fresh accountant, so
//! two accountants built from equal configs behave identically.

use dplib_core::{AccountingConfig, Result};

use crate::accountant::PrivacyAccountant;
use crate::cdp::{AccountingMethod, CdpPrivacyAccountant};
use crate::moments::{MomentAccountant, DEFAULT_ORDERS};
use crate::tracker::BudgetTracker;

/// Configuration for constructing an accountant with a fresh state.
pub trait AccountantConfig {
    /// Accountant type created by this config.
    type Accountant;

    /// Create a new accountant instance.
    fn create_accountant(&self) -> Result<Self::Accountant>;
}

/// Configuration for the core [`PrivacyAccountant`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoreAccountantConfig {
    /// Name used in logs and snapshots.
    pub name: Option<String>,
    /// Total epsilon; `None` means unbounded.
    pub total_epsilon: Option<f64>,
    /// Total delta; requires `total_epsilon`.
    pub total_delta: Option<f64>,
    /// Shared knobs.
    pub accounting: AccountingConfig,
}

impl CoreAccountantConfig {
    /// Bounded config.
    pub fn bounded(total_epsilon: f64, total_delta: f64) -> Self {
        Self {
            total_epsilon: Some(total_epsilon),
            total_delta: Some(total_delta),
            ..Self::default()
        }
    }

    /// Set the accountant name.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the shared knobs.
    pub fn with_accounting(mut self, accounting: AccountingConfig) -> Self {
        self.accounting = accounting;
        self
    }
}

impl AccountantConfig for CoreAccountantConfig {
    type Accountant = PrivacyAccountant;

    fn create_accountant(&self) -> Result<Self::Accountant> {
        let accountant = PrivacyAccountant::new(self.total_epsilon, self.total_delta)?
            .with_config(&self.accounting)?;
        Ok(match &self.name {
            Some(name) => accountant.with_name(name.clone()),
            None => accountant,
        })
    }
}

/// Configuration for the strategy-aware [`CdpPrivacyAccountant`].
#[derive(Clone, Debug, PartialEq)]
pub struct CdpAccountantConfig {
    /// Underlying ledger settings.
    pub core: CoreAccountantConfig,
    /// Strategy used when none is given per call.
    pub default_method: AccountingMethod,
}

impl Default for CdpAccountantConfig {
    fn default() -> Self {
        Self {
            core: CoreAccountantConfig::default(),
            default_method: AccountingMethod::Basic,
        }
    }
}

impl CdpAccountantConfig {
    /// Config with the given method over `core`.
    pub fn new(core: CoreAccountantConfig, default_method: AccountingMethod) -> Self {
        Self {
            core,
            default_method,
        }
    }
}

impl AccountantConfig for CdpAccountantConfig {
    type Accountant = CdpPrivacyAccountant;

    fn create_accountant(&self) -> Result<Self::Accountant> {
        CdpPrivacyAccountant::wrap(self.core.create_accountant()?, self.default_method)
            .with_config(self.core.accounting.clone())
    }
}

/// Configuration for the [`MomentAccountant`].
#[derive(Clone, Debug, PartialEq)]
pub struct MomentAccountantConfig {
    /// Rényi orders to track.
    pub orders: Vec<f64>,
}

impl Default for MomentAccountantConfig {
    fn default() -> Self {
        Self {
            orders: DEFAULT_ORDERS.to_vec(),
        }
    }
}

impl MomentAccountantConfig {
    /// Config with explicit orders.
    pub fn new(orders: Vec<f64>) -> Self {
        Self { orders }
    }
}

impl AccountantConfig for MomentAccountantConfig {
    type Accountant = MomentAccountant;

    fn create_accountant(&self) -> Result<Self::Accountant> {
        MomentAccountant::with_orders(self.orders.clone())
    }
}

/// Configuration for a [`BudgetTracker`] without an alert handler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackerConfig {
    /// Shared knobs; only `alert_thresholds` is used.
    pub accounting: AccountingConfig,
}

impl AccountantConfig for TrackerConfig {
    type Accountant = BudgetTracker;

    fn create_accountant(&self) -> Result<Self::Accountant> {
        BudgetTracker::with_thresholds(&self.accounting.alert_thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_config_builds_named_accountant() {
        let acc = CoreAccountantConfig::bounded(1.0, 1e-5)
            .with_name("ledger")
            .create_accountant()
            .unwrap();
        assert_eq!(acc.name(), "ledger");
        assert_eq!(acc.total_budget().map(|b| b.epsilon()), Some(1.0));
    }

    #[test]
    fn invalid_config_fails_to_build() {
        let config = CoreAccountantConfig {
            total_delta: Some(1e-5),
            ..CoreAccountantConfig::default()
        };
        assert!(config.create_accountant().is_err());
        assert!(MomentAccountantConfig::new(vec![0.5]).create_accountant().is_err());
    }

    #[test]
    fn cdp_and_tracker_configs() {
        let cdp = CdpAccountantConfig::new(CoreAccountantConfig::default(), AccountingMethod::Optimal)
            .create_accountant()
            .unwrap();
        assert_eq!(cdp.default_method(), AccountingMethod::Optimal);
        let tracker = TrackerConfig::default().create_accountant().unwrap();
        assert_eq!(tracker.thresholds(), &[0.5, 0.8, 1.0]);
        let moments = MomentAccountantConfig::default().create_accountant().unwrap();
        assert_eq!(moments.orders().len(), DEFAULT_ORDERS.len());
    }
}
