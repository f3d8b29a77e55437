//! Cumulative `(ε, δ)` ledger with an optional hard budget.
//!
//! [`PrivacyAccountant`] is append-only: each accepted request becomes a
//! [`PrivacyEvent`] and bumps the running spend. Requests that would take
//! the spend over `total + slack` are rejected with
//! [`DpError::BudgetExceeded`] and leave the ledger untouched.
//!
//! A request may also carry richer guarantees ([`ModelSpec`]s or
//! [`PrivacyGuarantee`]s). Those are folded to `(ε, δ)` and the charge is
//! the component-wise maximum of the explicit amount and every folded view.

use dplib_core::config::DEFAULT_CONVERSION_DELTA;
use dplib_core::{
    validate, AccountingConfig, DpError, Metadata, ModelSpec, PrivacyBudget, PrivacyEvent,
    PrivacyGuarantee, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

const DEFAULT_NAME: &str = "PrivacyAccountant";
const DEFAULT_SLACK: f64 = 1e-12;

/// Metadata key holding folded guarantee reports.
pub const PRIVACY_REPORTS_KEY: &str = "privacy";

/// One spend request, optionally described by richer privacy models.
#[derive(Clone, Debug, Default)]
pub struct EventRequest {
    epsilon: f64,
    delta: f64,
    description: Option<String>,
    metadata: Metadata,
    model_specs: Vec<ModelSpec>,
    guarantees: Vec<PrivacyGuarantee>,
    target_delta: Option<f64>,
}

impl EventRequest {
    /// Request charging `(epsilon, delta)`.
    pub fn new(epsilon: f64, delta: f64) -> Self {
        Self {
            epsilon,
            delta,
            ..Self::default()
        }
    }

    /// Attach a description.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Describe the spend with a model spec.
    pub fn with_model_spec(mut self, spec: ModelSpec) -> Self {
        self.model_specs.push(spec);
        self
    }

    /// Describe the spend with several model specs.
    pub fn with_model_specs<I: IntoIterator<Item = ModelSpec>>(mut self, specs: I) -> Self {
        self.model_specs.extend(specs);
        self
    }

    /// Describe the spend with a full guarantee.
    pub fn with_guarantee(mut self, guarantee: PrivacyGuarantee) -> Self {
        self.guarantees.push(guarantee);
        self
    }

    /// Describe the spend with several guarantees.
    pub fn with_guarantees<I: IntoIterator<Item = PrivacyGuarantee>>(mut self, guarantees: I) -> Self {
        self.guarantees.extend(guarantees);
        self
    }

    /// Delta used when folding zCDP, RDP and GDP guarantees.
    pub fn with_target_delta(mut self, target_delta: Option<f64>) -> Self {
        self.target_delta = target_delta;
        self
    }

    /// Fold the request into the event it would record.
    ///
    /// `default_delta` applies when the request carries no target delta.
    pub fn into_event(self, default_delta: f64) -> Result<PrivacyEvent> {
        let explicit = PrivacyBudget::new(self.epsilon, self.delta)?;
        let mut metadata = self.metadata;
        let guarantees: Vec<PrivacyGuarantee> = self
            .model_specs
            .into_iter()
            .map(PrivacyGuarantee::new)
            .chain(self.guarantees)
            .collect();

        if guarantees.is_empty() {
            return Ok(PrivacyEvent::new(explicit.epsilon(), explicit.delta())?
                .with_optional_description(self.description)
                .with_metadata(metadata));
        }

        let delta = Some(self.target_delta.unwrap_or(default_delta));
        let reports = guarantees
            .iter()
            .map(|g| g.to_folded_report(delta, None))
            .collect::<Result<Vec<_>>>()?;
        let charge = reports
            .iter()
            .filter_map(|r| r.cdp_equivalent)
            .fold(explicit, PrivacyBudget::max);
        let first = &reports[0];
        let (model, cdp_equivalent) = (first.model, first.cdp_equivalent);
        metadata.insert(PRIVACY_REPORTS_KEY.into(), serde_json::to_value(&reports)?);

        Ok(PrivacyEvent::new(charge.epsilon(), charge.delta())?
            .with_optional_description(self.description)
            .with_metadata(metadata)
            .with_model(model, cdp_equivalent))
    }
}

/// Append-only `(ε, δ)` ledger.
#[derive(Clone, Debug)]
pub struct PrivacyAccountant {
    name: String,
    total: Option<PrivacyBudget>,
    slack: f64,
    conversion_delta: f64,
    events: Vec<PrivacyEvent>,
    spent: PrivacyBudget,
}

/// Serialized form of a [`PrivacyAccountant`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountantSnapshot {
    /// Accountant name.
    pub name: String,
    /// Total budget, `None` when unbounded.
    pub total_budget: Option<PrivacyBudget>,
    /// Cumulative spend.
    pub spent: PrivacyBudget,
    /// Full event history.
    pub events: Vec<PrivacyEvent>,
    /// Comparison tolerance.
    pub slack: f64,
    /// Fallback delta for folding guarantees.
    #[serde(default = "default_conversion_delta")]
    pub conversion_delta: f64,
}

fn default_conversion_delta() -> f64 {
    DEFAULT_CONVERSION_DELTA
}

impl Default for PrivacyAccountant {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl PrivacyAccountant {
    /// Accountant with an optional total budget.
    ///
    /// `total_delta` defaults to zero when only `total_epsilon` is given and
    /// may not be set on its own.
    pub fn new(total_epsilon: Option<f64>, total_delta: Option<f64>) -> Result<Self> {
        let total = match (total_epsilon, total_delta) {
            (None, Some(_)) => {
                return Err(DpError::invalid(
                    "delta budget requires an epsilon budget as well",
                ))
            }
            (None, None) => None,
            (Some(eps), delta) => Some(PrivacyBudget::new(eps, delta.unwrap_or(0.0))?),
        };
        Ok(Self {
            total,
            ..Self::unbounded()
        })
    }

    /// Accountant with a hard `(ε, δ)` budget.
    pub fn bounded(total_epsilon: f64, total_delta: f64) -> Result<Self> {
        Self::new(Some(total_epsilon), Some(total_delta))
    }

    /// Accountant without any budget.
    pub fn unbounded() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            total: None,
            slack: DEFAULT_SLACK,
            conversion_delta: DEFAULT_CONVERSION_DELTA,
            events: Vec::new(),
            spent: PrivacyBudget::ZERO,
        }
    }

    /// Take slack and conversion delta from `config`.
    pub fn with_config(mut self, config: &AccountingConfig) -> Result<Self> {
        config.validate()?;
        self.slack = config.slack;
        self.conversion_delta = config.conversion_delta;
        Ok(self)
    }

    /// Rename the accountant.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Set the comparison tolerance.
    pub fn with_slack(mut self, slack: f64) -> Result<Self> {
        self.slack = validate::finite_non_negative(slack, "slack")?;
        Ok(self)
    }

    /// Name used in logs and snapshots.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Comparison tolerance.
    pub fn slack(&self) -> f64 {
        self.slack
    }

    /// Total budget, `None` when unbounded.
    pub fn total_budget(&self) -> Option<PrivacyBudget> {
        self.total
    }

    /// Cumulative spend.
    pub fn spent(&self) -> PrivacyBudget {
        self.spent
    }

    /// Budget left, floored at zero; `None` when unbounded.
    pub fn remaining(&self) -> Option<PrivacyBudget> {
        self.total.map(|total| total - self.spent)
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> &[PrivacyEvent] {
        &self.events
    }

    /// Whether `(epsilon, delta)` could be recorded now. Invalid input yields `false`.
    pub fn can_allocate(&self, epsilon: f64, delta: f64) -> bool {
        match PrivacyBudget::new(epsilon, delta) {
            Ok(request) => self.fits(request),
            Err(_) => false,
        }
    }

    fn fits(&self, request: PrivacyBudget) -> bool {
        match self.total {
            None => true,
            Some(total) => (self.spent + request).fits_within(&total, self.slack),
        }
    }

    fn ensure_within_budget(&self, request: PrivacyBudget) -> Result<()> {
        if self.fits(request) {
            return Ok(());
        }
        let remaining = self.remaining().unwrap_or(PrivacyBudget::ZERO);
        warn!(
            accountant = %self.name,
            epsilon = request.epsilon(),
            delta = request.delta(),
            "privacy budget exceeded"
        );
        Err(DpError::budget_exceeded(
            format!("{}: requested {request} while remaining {remaining}", self.name),
            request.epsilon(),
            request.delta(),
        ))
    }

    /// Record a plain `(epsilon, delta)` spend.
    pub fn add_event(&mut self, epsilon: f64, delta: f64) -> Result<PrivacyEvent> {
        self.record(EventRequest::new(epsilon, delta))
    }

    /// Fold and record a request.
    pub fn record(&mut self, request: EventRequest) -> Result<PrivacyEvent> {
        let event = request.into_event(self.conversion_delta)?;
        self.record_event(event)
    }

    /// Record an already-built event.
    pub fn record_event(&mut self, event: PrivacyEvent) -> Result<PrivacyEvent> {
        let request = PrivacyBudget::new(event.epsilon(), event.delta())?;
        self.ensure_within_budget(request)?;
        self.spent = self.spent + request;
        self.events.push(event.clone());
        debug!(
            accountant = %self.name,
            epsilon = request.epsilon(),
            delta = request.delta(),
            "privacy event recorded"
        );
        Ok(event)
    }

    /// Record each `(epsilon, delta)` pair in turn.
    ///
    /// Stops at the first rejected pair; earlier pairs stay recorded.
    pub fn extend<I: IntoIterator<Item = (f64, f64)>>(&mut self, pairs: I) -> Result<()> {
        for (epsilon, delta) in pairs {
            self.add_event(epsilon, delta)?;
        }
        Ok(())
    }

    /// Clear history and spend; the total budget is kept.
    pub fn reset(&mut self) {
        self.events.clear();
        self.spent = PrivacyBudget::ZERO;
        info!(accountant = %self.name, "accountant reset");
    }

    /// Typed snapshot.
    pub fn snapshot(&self) -> AccountantSnapshot {
        AccountantSnapshot {
            name: self.name.clone(),
            total_budget: self.total,
            spent: self.spent,
            events: self.events.clone(),
            slack: self.slack,
            conversion_delta: self.conversion_delta,
        }
    }

    /// JSON snapshot with name, total budget, spend, events and slack.
    pub fn serialize(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    /// Rebuild from [`Self::serialize`] output.
    pub fn deserialize(value: &Value) -> Result<Self> {
        Self::from_snapshot(AccountantSnapshot::deserialize(value)?)
    }

    /// Rebuild from a typed snapshot.
    pub fn from_snapshot(snapshot: AccountantSnapshot) -> Result<Self> {
        let as_serialization = |e: DpError| DpError::serialization(e.to_string());
        let slack = validate::finite_non_negative(snapshot.slack, "slack").map_err(as_serialization)?;
        let conversion_delta =
            validate::open_unit_interval(snapshot.conversion_delta, "conversion_delta")
                .map_err(as_serialization)?;
        for event in &snapshot.events {
            validate::epsilon_delta(event.epsilon(), event.delta()).map_err(as_serialization)?;
        }
        Ok(Self {
            name: snapshot.name,
            total: snapshot.total_budget,
            slack,
            conversion_delta,
            events: snapshot.events,
            spent: snapshot.spent,
        })
    }
}
