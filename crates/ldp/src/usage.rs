//! Local privacy usage records and ledger summaries.

use std::collections::BTreeMap;

use dplib_core::{validate, Metadata, Result};
use serde::{Deserialize, Serialize};

/// Bucket used for usages that carry no user identifier.
pub const ANONYMOUS_USER_KEY: &str = "<anonymous>";

/// One local randomisation performed on behalf of a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalPrivacyUsage {
    /// User the usage is charged to; `None` is bucketed as anonymous.
    pub user_id: Option<String>,
    /// Local epsilon spent.
    pub epsilon: f64,
    /// Collection round, if the client flow is round based.
    #[serde(default)]
    pub round_id: Option<u64>,
    /// Free-form context such as `delta` or `mechanism`.
    #[serde(default)]
    pub metadata: Metadata,
}

impl LocalPrivacyUsage {
    /// Anonymous usage of `epsilon`.
    pub fn new(epsilon: f64) -> Self {
        Self {
            user_id: None,
            epsilon,
            round_id: None,
            metadata: Metadata::new(),
        }
    }

    /// Usage of `epsilon` charged to `user_id`.
    pub fn for_user<S: Into<String>>(user_id: S, epsilon: f64) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new(epsilon)
        }
    }

    /// Tag with a collection round.
    pub fn with_round(mut self, round_id: u64) -> Self {
        self.round_id = Some(round_id);
        self
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Ledger key for this usage.
    pub fn user_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(ANONYMOUS_USER_KEY)
    }

    /// Check that the epsilon is a finite non-negative number.
    pub fn validate(&self) -> Result<f64> {
        validate::finite_non_negative(self.epsilon, "epsilon")
    }
}

/// Aggregate view of a local ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LdpBudgetSummary {
    /// Sum over every recorded usage.
    pub total_epsilon: f64,
    /// Cumulative epsilon per user key.
    pub per_user_epsilon: BTreeMap<String, f64>,
    /// Largest per-user total, zero when empty.
    pub max_user_epsilon: f64,
    /// Number of recorded usages.
    pub n_events: usize,
}

impl LdpBudgetSummary {
    /// Build a summary from a running total and per-user totals.
    pub fn from_totals(
        total_epsilon: f64,
        per_user_epsilon: BTreeMap<String, f64>,
        n_events: usize,
    ) -> Self {
        let max_user_epsilon = per_user_epsilon.values().copied().fold(0.0, f64::max);
        Self {
            total_epsilon,
            per_user_epsilon,
            max_user_epsilon,
            n_events,
        }
    }
}
