//! Per-scope budgets with threshold alerts.
//!
//! A [`BudgetTracker`] owns one [`PrivacyAccountant`] per [`TrackedScope`]
//! (a task, user, session, ...). After every successful spend the scope's
//! usage ratio is compared against the configured thresholds and each
//! threshold fires a [`BudgetAlert`] at most once.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use dplib_core::config::{normalize_thresholds, DEFAULT_ALERT_THRESHOLDS};
use dplib_core::{
    validate, DpError, Metadata, ModelSpec, PrivacyBudget, PrivacyEvent, PrivacyGuarantee, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::accountant::{AccountantSnapshot, EventRequest, PrivacyAccountant};

/// Logical budget namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ScopeRepr")]
pub struct TrackedScope {
    kind: String,
    identifier: String,
}

#[derive(Deserialize)]
struct ScopeRepr {
    kind: String,
    identifier: String,
}

impl TryFrom<ScopeRepr> for TrackedScope {
    type Error = DpError;

    fn try_from(raw: ScopeRepr) -> Result<Self> {
        Self::new(raw.kind, raw.identifier)
    }
}

impl TrackedScope {
    /// Scope with non-empty `kind` and `identifier`.
    pub fn new<K: Into<String>, I: Into<String>>(kind: K, identifier: I) -> Result<Self> {
        let (kind, identifier) = (kind.into(), identifier.into());
        if kind.is_empty() {
            return Err(DpError::invalid("scope kind must be a non-empty string"));
        }
        if identifier.is_empty() {
            return Err(DpError::invalid("scope identifier must be a non-empty string"));
        }
        Ok(Self { kind, identifier })
    }

    /// Scope kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Scope identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for TrackedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.identifier)
    }
}

/// Emitted when a scope first crosses a threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// Scope that crossed.
    pub scope: TrackedScope,
    /// Threshold crossed.
    pub threshold: f64,
    /// Usage ratio at the time.
    pub ratio: f64,
    /// Spend at the time.
    pub spent: PrivacyBudget,
    /// Budget left at the time.
    pub remaining: Option<PrivacyBudget>,
    /// Human-readable summary.
    pub message: String,
    /// Extra context.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Alert callback.
pub type AlertHandler = Box<dyn FnMut(&BudgetAlert)>;

/// Optional extras for [`BudgetTracker::spend_with`].
#[derive(Clone, Debug, Default)]
pub struct SpendOptions {
    /// Free-text description.
    pub description: Option<String>,
    /// Event metadata.
    pub metadata: Metadata,
    /// Model specs to fold into the event.
    pub model_specs: Vec<ModelSpec>,
    /// Guarantees to fold into the event.
    pub guarantees: Vec<PrivacyGuarantee>,
    /// Delta for folding non-CDP guarantees.
    pub target_delta: Option<f64>,
}

struct ScopeState {
    accountant: PrivacyAccountant,
    triggered: BTreeSet<u64>,
}

/// Multi-scope budget tracker.
pub struct BudgetTracker {
    thresholds: Vec<f64>,
    handler: Option<AlertHandler>,
    scopes: HashMap<TrackedScope, ScopeState>,
    order: Vec<TrackedScope>,
    alerts: Vec<BudgetAlert>,
}

impl fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("thresholds", &self.thresholds)
            .field("scopes", &self.order)
            .field("alerts", &self.alerts.len())
            .finish()
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_ALERT_THRESHOLDS.to_vec(),
            handler: None,
            scopes: HashMap::new(),
            order: Vec::new(),
            alerts: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ScopeEntry {
    scope: TrackedScope,
    accountant: AccountantSnapshot,
    triggered_thresholds: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct TrackerSnapshot {
    thresholds: Vec<f64>,
    #[serde(default)]
    alerts: Vec<BudgetAlert>,
    #[serde(default)]
    scopes: Vec<ScopeEntry>,
}

impl BudgetTracker {
    /// Tracker with the default thresholds `0.5, 0.8, 1.0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker with custom thresholds; deduplicated, sorted, each positive.
    pub fn with_thresholds(thresholds: &[f64]) -> Result<Self> {
        Ok(Self {
            thresholds: normalize_thresholds(thresholds)?,
            ..Self::default()
        })
    }

    /// Install the alert callback.
    pub fn with_alert_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&BudgetAlert) + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Normalised thresholds.
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Register (or replace) a scope backed by a fresh accountant named `kind:identifier`.
    pub fn register_scope(
        &mut self,
        kind: &str,
        identifier: &str,
        total_epsilon: f64,
        total_delta: f64,
        slack: f64,
    ) -> Result<TrackedScope> {
        let scope = TrackedScope::new(kind, identifier)?;
        let accountant = PrivacyAccountant::bounded(total_epsilon, total_delta)?
            .with_name(scope.to_string())
            .with_slack(slack)?;
        if !self.scopes.contains_key(&scope) {
            self.order.push(scope.clone());
        }
        self.scopes.insert(
            scope.clone(),
            ScopeState {
                accountant,
                triggered: BTreeSet::new(),
            },
        );
        debug!(scope = %scope, total_epsilon, total_delta, "scope registered");
        Ok(scope)
    }

    /// Registered scopes in registration order.
    pub fn scopes(&self) -> &[TrackedScope] {
        &self.order
    }

    fn state(&self, scope: &TrackedScope) -> Result<&ScopeState> {
        self.scopes
            .get(scope)
            .ok_or_else(|| DpError::scope_not_registered(scope.kind(), scope.identifier()))
    }

    /// Accountant behind `scope`.
    pub fn accountant(&self, scope: &TrackedScope) -> Result<&PrivacyAccountant> {
        Ok(&self.state(scope)?.accountant)
    }

    /// Spend recorded against `scope`.
    pub fn spent(&self, scope: &TrackedScope) -> Result<PrivacyBudget> {
        Ok(self.accountant(scope)?.spent())
    }

    /// Budget left in `scope`.
    pub fn remaining(&self, scope: &TrackedScope) -> Result<Option<PrivacyBudget>> {
        Ok(self.accountant(scope)?.remaining())
    }

    /// Every alert emitted so far.
    pub fn alerts(&self) -> &[BudgetAlert] {
        &self.alerts
    }

    /// Record a plain spend.
    pub fn spend(&mut self, scope: &TrackedScope, epsilon: f64, delta: f64) -> Result<PrivacyEvent> {
        self.spend_with(scope, epsilon, delta, SpendOptions::default())
    }

    /// Record a spend with description, metadata or guarantees to fold.
    pub fn spend_with(
        &mut self,
        scope: &TrackedScope,
        epsilon: f64,
        delta: f64,
        options: SpendOptions,
    ) -> Result<PrivacyEvent> {
        let state = self
            .scopes
            .get_mut(scope)
            .ok_or_else(|| DpError::scope_not_registered(scope.kind(), scope.identifier()))?;
        let mut request = EventRequest::new(epsilon, delta)
            .with_metadata(options.metadata)
            .with_model_specs(options.model_specs)
            .with_guarantees(options.guarantees)
            .with_target_delta(options.target_delta);
        if let Some(description) = options.description {
            request = request.with_description(description);
        }
        let event = state.accountant.record(request)?;
        self.evaluate_alerts(scope);
        Ok(event)
    }

    fn evaluate_alerts(&mut self, scope: &TrackedScope) {
        let Some(state) = self.scopes.get_mut(scope) else {
            return;
        };
        let Some(total) = state.accountant.total_budget() else {
            return;
        };
        if total.is_zero() {
            return;
        }
        let spent = state.accountant.spent();
        let ratio = usage_ratio(spent, total);
        for &threshold in &self.thresholds {
            if ratio < threshold || !state.triggered.insert(threshold.to_bits()) {
                continue;
            }
            let alert = BudgetAlert {
                scope: scope.clone(),
                threshold,
                ratio,
                spent,
                remaining: state.accountant.remaining(),
                message: format!("{scope} reached {ratio:.2} of budget (threshold {threshold})"),
                metadata: Metadata::new(),
            };
            info!(scope = %scope, threshold, ratio, "budget threshold crossed");
            if let Some(handler) = self.handler.as_mut() {
                handler(&alert);
            }
            self.alerts.push(alert);
        }
    }

    /// JSON snapshot of thresholds, alert history and every scope.
    pub fn serialize(&self) -> Result<Value> {
        let scopes = self
            .order
            .iter()
            .filter_map(|scope| self.scopes.get(scope).map(|state| (scope, state)))
            .map(|(scope, state)| ScopeEntry {
                scope: scope.clone(),
                accountant: state.accountant.snapshot(),
                triggered_thresholds: state.triggered.iter().map(|&b| f64::from_bits(b)).collect(),
            })
            .collect();
        Ok(serde_json::to_value(TrackerSnapshot {
            thresholds: self.thresholds.clone(),
            alerts: self.alerts.clone(),
            scopes,
        })?)
    }

    /// Rebuild from [`Self::serialize`] output; callbacks are not data, so pass one again.
    pub fn deserialize(value: &Value, handler: Option<AlertHandler>) -> Result<Self> {
        let snapshot = TrackerSnapshot::deserialize(value)?;
        let mut tracker = Self::with_thresholds(&snapshot.thresholds)
            .map_err(|e| DpError::serialization(e.to_string()))?;
        tracker.handler = handler;
        tracker.alerts = snapshot.alerts;
        for entry in snapshot.scopes {
            let accountant = PrivacyAccountant::from_snapshot(entry.accountant)?;
            let triggered = entry
                .triggered_thresholds
                .into_iter()
                .map(|t| validate::positive(t, "threshold").map(f64::to_bits))
                .collect::<Result<BTreeSet<_>>>()
                .map_err(|e| DpError::serialization(e.to_string()))?;
            if !tracker.scopes.contains_key(&entry.scope) {
                tracker.order.push(entry.scope.clone());
            }
            tracker
                .scopes
                .insert(entry.scope, ScopeState { accountant, triggered });
        }
        Ok(tracker)
    }
}

/// `max(spent.ε / total.ε, spent.δ / total.δ)`, ignoring zero components.
pub fn usage_ratio(spent: PrivacyBudget, total: PrivacyBudget) -> f64 {
    let eps = if total.epsilon() > 0.0 {
        spent.epsilon() / total.epsilon()
    } else {
        0.0
    };
    let delta = if total.delta() > 0.0 {
        spent.delta() / total.delta()
    } else {
        0.0
    };
    eps.max(delta)
}
