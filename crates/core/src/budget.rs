//! Privacy budgets and recorded privacy events.

use std::fmt;
use std::ops::{Add, Sub};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::PrivacyModel;
use crate::validate;
use crate::{DpError, Result};

/// Loosely-typed metadata attached to events and usages.
pub type Metadata = serde_json::Map<String, Value>;

/// An `(epsilon, delta)` pair.
///
/// Subtraction floors each component at zero, so a budget never goes negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BudgetRepr")]
pub struct PrivacyBudget {
    epsilon: f64,
    delta: f64,
}

#[derive(Deserialize)]
struct BudgetRepr {
    #[serde(default)]
    epsilon: f64,
    #[serde(default)]
    delta: f64,
}

impl TryFrom<BudgetRepr> for PrivacyBudget {
    type Error = DpError;

    fn try_from(raw: BudgetRepr) -> Result<Self> {
        // Cumulative totals may legitimately carry delta above one.
        Ok(Self {
            epsilon: validate::finite_non_negative(raw.epsilon, "epsilon")?,
            delta: validate::finite_non_negative(raw.delta, "delta")?,
        })
    }
}

impl PrivacyBudget {
    /// The empty budget.
    pub const ZERO: Self = Self {
        epsilon: 0.0,
        delta: 0.0,
    };

    /// Create a validated budget.
    pub fn new(epsilon: f64, delta: f64) -> Result<Self> {
        let (epsilon, delta) = validate::epsilon_delta(epsilon, delta)?;
        Ok(Self { epsilon, delta })
    }

    /// Pure-DP budget with zero delta.
    pub fn pure(epsilon: f64) -> Result<Self> {
        Self::new(epsilon, 0.0)
    }

    /// Epsilon component.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Delta component.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Whether both components are zero.
    pub fn is_zero(&self) -> bool {
        self.epsilon == 0.0 && self.delta == 0.0
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self {
            epsilon: self.epsilon.max(other.epsilon),
            delta: self.delta.max(other.delta),
        }
    }

    /// Whether `self` fits under `limit` with the given tolerance on both components.
    pub fn fits_within(&self, limit: &Self, slack: f64) -> bool {
        self.epsilon <= limit.epsilon + slack && self.delta <= limit.delta + slack
    }
}

impl Add for PrivacyBudget {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            epsilon: self.epsilon + rhs.epsilon,
            delta: self.delta + rhs.delta,
        }
    }
}

impl Sub for PrivacyBudget {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            epsilon: (self.epsilon - rhs.epsilon).max(0.0),
            delta: (self.delta - rhs.delta).max(0.0),
        }
    }
}

impl std::iter::Sum for PrivacyBudget {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for PrivacyBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(eps={}, delta={})", self.epsilon, self.delta)
    }
}

/// A single recorded privacy expenditure.
///
/// Events are built once and then only read. The optional `model` and
/// `cdp_equivalent` fields are populated when the expenditure was described
/// by a richer privacy model than plain `(epsilon, delta)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyEvent {
    epsilon: f64,
    delta: f64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<PrivacyModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cdp_equivalent: Option<PrivacyBudget>,
}

impl PrivacyEvent {
    /// Create an event stamped with the current time.
    pub fn new(epsilon: f64, delta: f64) -> Result<Self> {
        let (epsilon, delta) = validate::epsilon_delta(epsilon, delta)?;
        Ok(Self {
            epsilon,
            delta,
            description: None,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            model: None,
            cdp_equivalent: None,
        })
    }

    /// Attach a description.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an optional description.
    pub fn with_optional_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record the privacy model that produced this event and its CDP view.
    pub fn with_model(mut self, model: PrivacyModel, cdp_equivalent: Option<PrivacyBudget>) -> Self {
        self.model = Some(model);
        self.cdp_equivalent = cdp_equivalent;
        self
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Epsilon charged by this event.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Delta charged by this event.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// The charged amount as a budget.
    pub fn budget(&self) -> PrivacyBudget {
        PrivacyBudget {
            epsilon: self.epsilon,
            delta: self.delta,
        }
    }

    /// Optional free-text description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Attached metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Model the event was expressed in, if any.
    pub fn model(&self) -> Option<PrivacyModel> {
        self.model
    }

    /// CDP view of the richer model, if any.
    pub fn cdp_equivalent(&self) -> Option<PrivacyBudget> {
        self.cdp_equivalent
    }

    /// Whether two events charge the same `(epsilon, delta)`.
    pub fn same_cost(&self, other: &Self) -> bool {
        self.epsilon == other.epsilon && self.delta == other.delta
    }

    /// JSON view of the event.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild an event from [`PrivacyEvent::to_value`] output.
    pub fn from_value(value: &Value) -> Result<Self> {
        let event: Self = serde_json::from_value(value.clone())?;
        validate::epsilon_delta(event.epsilon, event.delta)
            .map_err(|e| DpError::serialization(e.to_string()))?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn budget_rejects_out_of_domain() {
        assert!(PrivacyBudget::new(-0.1, 0.0).is_err());
        assert!(PrivacyBudget::new(0.1, 1.5).is_err());
        assert!(PrivacyBudget::new(f64::NAN, 0.0).is_err());
        assert!(PrivacyBudget::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn budget_deserialize_rejects_negative() {
        let err = serde_json::from_value::<PrivacyBudget>(json!({"epsilon": -1.0, "delta": 0.0}));
        assert!(err.is_err());
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut meta = Metadata::new();
        meta.insert("query".into(), json!("count"));
        let event = PrivacyEvent::new(0.25, 1e-7)
            .unwrap()
            .with_description("count query")
            .with_metadata(meta)
            .with_model(PrivacyModel::Zcdp, PrivacyBudget::new(0.3, 1e-6).ok());
        let restored = PrivacyEvent::from_value(&event.to_value().unwrap()).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn event_without_model_omits_fields() {
        let event = PrivacyEvent::new(0.1, 0.0).unwrap();
        let value = event.to_value().unwrap();
        assert!(value.get("model").is_none());
        assert!(value.get("cdp_equivalent").is_none());
    }

    proptest! {
        #[test]
        fn subtraction_never_negative(
            a in 0.0f64..10.0, b in 0.0f64..1.0, c in 0.0f64..10.0, d in 0.0f64..1.0,
        ) {
            let lhs = PrivacyBudget::new(a, b).unwrap();
            let rhs = PrivacyBudget::new(c, d).unwrap();
            let diff = lhs - rhs;
            prop_assert!(diff.epsilon() >= 0.0);
            prop_assert!(diff.delta() >= 0.0);
        }

        #[test]
        fn addition_is_componentwise(
            a in 0.0f64..10.0, b in 0.0f64..0.5, c in 0.0f64..10.0, d in 0.0f64..0.5,
        ) {
            let sum = PrivacyBudget::new(a, b).unwrap() + PrivacyBudget::new(c, d).unwrap();
            prop_assert_eq!(sum.epsilon(), a + c);
            prop_assert_eq!(sum.delta(), b + d);
        }
    }
}
