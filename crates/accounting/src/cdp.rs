//! Central-DP accountant with selectable composition strategies.

use std::fmt;
use std::str::FromStr;

use dplib_core::keys::MetadataKeys;
use dplib_core::{AccountingConfig, DpError, Metadata, PrivacyBudget, PrivacyEvent, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::accountant::{EventRequest, PrivacyAccountant};
use crate::advanced::{
    advanced_composition, gdp_composition, metadata_values, optimal_composition_fallback,
    rdp_composition, rho_zcdp_composition, strong_composition, uniform_cost,
};
use crate::composition::{
    max_reduce, normalize_events, CompositionResult, CompositionRule, EventInput,
    ParallelCompositionRule, SequentialCompositionRule,
};

/// Composition strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountingMethod {
    /// Sum ε and δ.
    Basic,
    /// Dwork–Roth advanced composition.
    Advanced,
    /// DRV10 strong composition; events must be identical.
    Strong,
    /// Fixed-order RDP read from `rdp_epsilon` metadata.
    Rdp,
    /// ρ-zCDP read from `rho` metadata.
    Zcdp,
    /// μ-GDP read from `mu` metadata.
    Gdp,
    /// Strong when homogeneous, advanced otherwise.
    Optimal,
}

impl AccountingMethod {
    /// Every method.
    pub const ALL: [Self; 7] = [
        Self::Basic,
        Self::Advanced,
        Self::Strong,
        Self::Rdp,
        Self::Zcdp,
        Self::Gdp,
        Self::Optimal,
    ];

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Strong => "strong",
            Self::Rdp => "rdp",
            Self::Zcdp => "zcdp",
            Self::Gdp => "gdp",
            Self::Optimal => "optimal",
        }
    }

    /// Parse a case-insensitive method name.
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
    }
}

impl fmt::Display for AccountingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountingMethod {
    type Err = DpError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == lowered)
            .ok_or_else(|| DpError::invalid(format!("unknown accounting method '{s}'")))
    }
}

/// Per-call knobs for [`CdpPrivacyAccountant::compose_with`].
///
/// Unset fields fall back to the accountant's [`AccountingConfig`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComposeOptions {
    delta_prime: Option<f64>,
    delta_hat: Option<f64>,
    k: Option<u32>,
    order: Option<f64>,
    target_delta: Option<f64>,
    rhos: Option<Vec<f64>>,
    rdp_epsilons: Option<Vec<f64>>,
    mus: Option<Vec<f64>>,
}

impl ComposeOptions {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// `delta_prime` for ADVANCED.
    pub fn delta_prime(mut self, value: f64) -> Self {
        self.delta_prime = Some(value);
        self
    }

    /// `delta_hat` for STRONG and OPTIMAL.
    pub fn delta_hat(mut self, value: f64) -> Self {
        self.delta_hat = Some(value);
        self
    }

    /// Repetition count for STRONG; defaults to the number of events.
    pub fn k(mut self, value: u32) -> Self {
        self.k = Some(value);
        self
    }

    /// Rényi order for RDP.
    pub fn order(mut self, value: f64) -> Self {
        self.order = Some(value);
        self
    }

    /// Target delta for RDP, ZCDP and GDP.
    pub fn target_delta(mut self, value: f64) -> Self {
        self.target_delta = Some(value);
        self
    }

    /// Explicit ρ values instead of event metadata.
    pub fn rhos(mut self, values: Vec<f64>) -> Self {
        self.rhos = Some(values);
        self
    }

    /// Explicit RDP values instead of event metadata.
    pub fn rdp_epsilons(mut self, values: Vec<f64>) -> Self {
        self.rdp_epsilons = Some(values);
        self
    }

    /// Explicit μ values instead of event metadata.
    pub fn mus(mut self, values: Vec<f64>) -> Self {
        self.mus = Some(values);
        self
    }
}

/// Strategy-aware accountant over a core [`PrivacyAccountant`].
#[derive(Clone, Debug)]
pub struct CdpPrivacyAccountant {
    accountant: PrivacyAccountant,
    default_method: AccountingMethod,
    config: AccountingConfig,
    keys: MetadataKeys,
}

impl CdpPrivacyAccountant {
    /// Unbounded accountant using `default_method`.
    pub fn new(default_method: AccountingMethod) -> Self {
        Self::wrap(PrivacyAccountant::unbounded(), default_method)
    }

    /// Bounded accountant using `default_method`.
    pub fn bounded(total_epsilon: f64, total_delta: f64, default_method: AccountingMethod) -> Result<Self> {
        Ok(Self::wrap(
            PrivacyAccountant::bounded(total_epsilon, total_delta)?,
            default_method,
        ))
    }

    /// Wrap an existing core accountant.
    pub fn wrap(accountant: PrivacyAccountant, default_method: AccountingMethod) -> Self {
        Self {
            accountant,
            default_method,
            config: AccountingConfig::default(),
            keys: MetadataKeys::default(),
        }
    }

    /// Use `config` for defaults and for the wrapped accountant.
    pub fn with_config(mut self, config: AccountingConfig) -> Result<Self> {
        self.accountant = self.accountant.with_config(&config)?;
        self.config = config;
        Ok(self)
    }

    /// Rename the wrapped accountant.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.accountant = self.accountant.with_name(name);
        self
    }

    /// Default strategy.
    pub fn default_method(&self) -> AccountingMethod {
        self.default_method
    }

    /// Configuration in effect.
    pub fn config(&self) -> &AccountingConfig {
        &self.config
    }

    /// Wrapped ledger.
    pub fn accountant(&self) -> &PrivacyAccountant {
        &self.accountant
    }

    /// Cumulative spend.
    pub fn spent(&self) -> PrivacyBudget {
        self.accountant.spent()
    }

    /// Budget left; `None` when unbounded.
    pub fn remaining(&self) -> Option<PrivacyBudget> {
        self.accountant.remaining()
    }

    /// Recorded events.
    pub fn events(&self) -> &[PrivacyEvent] {
        self.accountant.events()
    }

    /// Record a single event directly on the ledger.
    pub fn add_event(&mut self, event: PrivacyEvent) -> Result<PrivacyEvent> {
        self.accountant.record_event(event)
    }

    /// Compose with the default method and no overrides.
    pub fn compose<I, T>(&self, events: I) -> Result<CompositionResult>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventInput>,
    {
        self.compose_with(events, None, &ComposeOptions::default())
    }

    /// Compose with an optional method override and per-call options.
    pub fn compose_with<I, T>(
        &self,
        events: I,
        method: Option<AccountingMethod>,
        options: &ComposeOptions,
    ) -> Result<CompositionResult>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventInput>,
    {
        let events = normalize_events(events)?;
        self.compose_events(&events, method.unwrap_or(self.default_method), options)
    }

    fn target_delta(&self, options: &ComposeOptions, method: AccountingMethod) -> Result<f64> {
        options
            .target_delta
            .or(self.config.target_delta)
            .ok_or_else(|| DpError::invalid(format!("{method} composition requires target_delta")))
    }

    fn values_or_metadata(
        &self,
        explicit: &Option<Vec<f64>>,
        events: &[PrivacyEvent],
        candidates: &[&str],
    ) -> Result<Vec<f64>> {
        match explicit {
            Some(values) => Ok(values.clone()),
            None => metadata_values(events, candidates),
        }
    }

    /// Compose already-normalised events with `method`.
    pub fn compose_events(
        &self,
        events: &[PrivacyEvent],
        method: AccountingMethod,
        options: &ComposeOptions,
    ) -> Result<CompositionResult> {
        let delta_hat = options.delta_hat.unwrap_or(self.config.delta_hat);
        match method {
            AccountingMethod::Basic => SequentialCompositionRule::new().apply(events),
            AccountingMethod::Advanced => advanced_composition(
                events,
                options.delta_prime.unwrap_or(self.config.delta_prime),
            ),
            AccountingMethod::Optimal => optimal_composition_fallback(events, delta_hat),
            AccountingMethod::Strong => {
                let (epsilon, delta) = uniform_cost(events).ok_or_else(|| {
                    DpError::invalid("strong composition requires uniform epsilon/delta")
                })?;
                let k = match options.k {
                    Some(k) => k,
                    None => u32::try_from(events.len())
                        .map_err(|_| DpError::invalid("too many events for strong composition"))?,
                };
                strong_composition(epsilon, delta, k, delta_hat)
            }
            AccountingMethod::Rdp => {
                let order = options
                    .order
                    .ok_or_else(|| DpError::invalid("rdp composition requires an order"))?;
                let target_delta = self.target_delta(options, method)?;
                let values = self.values_or_metadata(&options.rdp_epsilons, events, &self.keys.rdp_epsilon)?;
                rdp_composition(&values, order, target_delta)
            }
            AccountingMethod::Zcdp => {
                let target_delta = self.target_delta(options, method)?;
                let values = self.values_or_metadata(&options.rhos, events, &self.keys.rho)?;
                rho_zcdp_composition(&values, target_delta)
            }
            AccountingMethod::Gdp => {
                let target_delta = self.target_delta(options, method)?;
                let values = self.values_or_metadata(&options.mus, events, &self.keys.mu)?;
                gdp_composition(&values, target_delta)
            }
        }
    }

    /// Compose and record the result as one ledger event.
    ///
    /// The composition detail is stored under `metadata.composition` unless
    /// the caller already set that key. A composed delta above 1 is rejected
    /// rather than clamped.
    pub fn add_composed_event<I, T>(
        &mut self,
        events: I,
        method: Option<AccountingMethod>,
        options: &ComposeOptions,
        description: Option<String>,
        metadata: Metadata,
    ) -> Result<CompositionResult>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventInput>,
    {
        let result = self.compose_with(events, method, options)?;
        if result.delta > 1.0 {
            warn!(delta = result.delta, "composed delta exceeds 1");
            return Err(DpError::invalid(format!(
                "composed delta {} exceeds 1; the guarantee is vacuous",
                result.delta
            )));
        }
        let mut metadata = metadata;
        metadata
            .entry("composition")
            .or_insert_with(|| result.to_value());
        let mut request = EventRequest::new(result.epsilon, result.delta).with_metadata(metadata);
        if let Some(description) = description {
            request = request.with_description(description);
        }
        self.accountant.record(request)?;
        debug!(
            method = %method.unwrap_or(self.default_method),
            epsilon = result.epsilon,
            delta = result.delta,
            "composed event recorded"
        );
        Ok(result)
    }

    /// Group events, compose each group with `inner_method`, then take the max.
    pub fn compose_parallel<I, T, F>(
        &self,
        events: I,
        group_key: F,
        inner_method: Option<AccountingMethod>,
        options: &ComposeOptions,
    ) -> Result<CompositionResult>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventInput>,
        F: Fn(&PrivacyEvent, usize) -> String + 'static,
    {
        let events = normalize_events(events)?;
        let inner = inner_method.unwrap_or(self.default_method);
        let groups = ParallelCompositionRule::new()
            .with_group_key(group_key)
            .group(&events);
        let results = groups
            .iter()
            .map(|(_, group)| self.compose_events(group, inner, options))
            .collect::<Result<Vec<_>>>()?;
        let mut result = max_reduce(&results);
        result.detail.insert("rule".into(), json!("parallel"));
        result.detail.insert("aggregator".into(), json!("max"));
        result.detail.insert("inner_method".into(), json!(inner.as_str()));
        result.detail.insert("groups".into(), json!(results.len()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_meta(epsilon: f64, key: &str, value: f64) -> PrivacyEvent {
        let mut meta = Metadata::new();
        meta.insert(key.into(), json!(value));
        PrivacyEvent::new(epsilon, 0.0).unwrap().with_metadata(meta)
    }

    #[test]
    fn parses_method_names() {
        assert_eq!("STRONG".parse::<AccountingMethod>().unwrap(), AccountingMethod::Strong);
        assert_eq!(AccountingMethod::from_name("zcdp").unwrap(), AccountingMethod::Zcdp);
        assert!("pld".parse::<AccountingMethod>().unwrap_err().is_validation());
    }

    #[test]
    fn strong_matches_direct_formula() {
        let acc = CdpPrivacyAccountant::new(AccountingMethod::Strong);
        let result = acc.compose(vec![(0.2, 1e-6); 3]).unwrap();
        let direct = strong_composition(0.2, 1e-6, 3, 1e-6).unwrap();
        assert_eq!(result.epsilon, direct.epsilon);
        assert_eq!(result.delta, direct.delta);
    }

    #[test]
    fn strong_rejects_mixed_events() {
        let acc = CdpPrivacyAccountant::new(AccountingMethod::Strong);
        let err = acc
            .compose(vec![(0.2, 1e-6), (0.2, 1e-6), (0.3, 1e-6)])
            .unwrap_err();
        assert!(err.is_validation());
        assert!(acc.compose(Vec::<(f64, f64)>::new()).is_err());
    }

    #[test]
    fn zcdp_reads_metadata_or_explicit_values() {
        let acc = CdpPrivacyAccountant::new(AccountingMethod::Zcdp);
        let events = vec![with_meta(0.1, "rho", 0.05), with_meta(0.1, "rho", 0.05)];
        let options = ComposeOptions::new().target_delta(1e-5);
        let from_meta = acc.compose_with(events.clone(), None, &options).unwrap();
        let direct = rho_zcdp_composition(&[0.05, 0.05], 1e-5).unwrap();
        assert_eq!(from_meta.epsilon, direct.epsilon);

        let explicit = acc
            .compose_with(events, None, &options.clone().rhos(vec![0.2]))
            .unwrap();
        assert_eq!(explicit.detail("rho"), Some(&json!(0.2)));
    }

    #[test]
    fn alternative_models_need_targets_and_keys() {
        let acc = CdpPrivacyAccountant::new(AccountingMethod::Gdp);
        let events = vec![with_meta(0.1, "mu", 0.5)];
        assert!(acc.compose(events.clone()).is_err());

        let options = ComposeOptions::new().target_delta(1e-5);
        assert!(acc
            .compose_with(vec![with_meta(0.1, "rho", 0.1)], None, &options)
            .is_err());
        assert!(acc.compose_with(events.clone(), None, &options).is_ok());
        assert!(acc
            .compose_with(events, Some(AccountingMethod::Rdp), &options)
            .is_err());
    }

    #[test]
    fn config_target_delta_is_the_fallback() {
        let config = AccountingConfig::default().with_target_delta(1e-5).unwrap();
        let acc = CdpPrivacyAccountant::new(AccountingMethod::Rdp)
            .with_config(config)
            .unwrap();
        let events = vec![with_meta(0.1, "rdp_epsilon", 0.3)];
        let result = acc
            .compose_with(events, None, &ComposeOptions::new().order(8.0))
            .unwrap();
        assert_eq!(result.delta, 1e-5);
    }

    #[test]
    fn composed_events_hit_the_ledger() {
        let mut acc = CdpPrivacyAccountant::bounded(1.0, 1e-5, AccountingMethod::Basic).unwrap();
        let result = acc
            .add_composed_event(
                vec![(0.2, 1e-6), (0.3, 1e-6)],
                None,
                &ComposeOptions::default(),
                Some("batch".into()),
                Metadata::new(),
            )
            .unwrap();
        assert!((acc.spent().epsilon() - result.epsilon).abs() < 1e-12);
        assert_eq!(acc.events().len(), 1);
        assert_eq!(acc.events()[0].description(), Some("batch"));
        assert!(acc.events()[0].metadata().contains_key("composition"));

        let err = acc
            .add_composed_event(
                vec![(0.6, 0.0)],
                None,
                &ComposeOptions::default(),
                None,
                Metadata::new(),
            )
            .unwrap_err();
        assert!(err.is_budget_exceeded());
        assert_eq!(acc.events().len(), 1);
    }

    #[test]
    fn vacuous_composed_delta_is_rejected() {
        let mut acc = CdpPrivacyAccountant::new(AccountingMethod::Basic);
        let err = acc
            .add_composed_event(
                vec![(0.1, 0.6), (0.1, 0.6)],
                None,
                &ComposeOptions::default(),
                None,
                Metadata::new(),
            )
            .unwrap_err();
        assert!(err.is_validation());
        assert!(acc.events().is_empty());
        assert!(acc.spent().is_zero());
    }

    #[test]
    fn parallel_takes_max_over_groups() {
        let acc = CdpPrivacyAccountant::new(AccountingMethod::Basic);
        let events = vec![(0.1, 0.0, "a"), (0.2, 0.0, "a"), (0.25, 0.0, "b")];
        let result = acc
            .compose_parallel(
                events,
                |e, _| e.description().unwrap_or_default().to_string(),
                None,
                &ComposeOptions::default(),
            )
            .unwrap();
        assert!((result.epsilon - 0.3).abs() < 1e-12);
        assert_eq!(result.detail("groups"), Some(&json!(2)));
        assert_eq!(result.detail("inner_method"), Some(&json!("basic")));
    }
}
