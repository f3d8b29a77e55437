//! Error types for privacy accounting operations.

/// Errors that can occur while validating, composing or recording privacy loss.
#[derive(Debug, thiserror::Error)]
pub enum DpError {
    /// Malformed or out-of-domain input. Raised before any state is touched.
    #[error("invalid parameter: {msg}")]
    InvalidParameters {
        /// Human-readable error description.
        msg: String,
    },

    /// A well-formed request would push cumulative spend past a configured limit.
    #[error("privacy budget exceeded: {msg} (requested eps={requested_epsilon:.4}, delta={requested_delta:.2e})")]
    BudgetExceeded {
        /// Human-readable error description.
        msg: String,
        /// Epsilon of the rejected request.
        requested_epsilon: f64,
        /// Delta of the rejected request.
        requested_delta: f64,
    },

    /// An operation was invoked before the step it depends on.
    #[error("not calibrated: {msg}")]
    NotCalibrated {
        /// Human-readable error description.
        msg: String,
    },

    /// Spend was recorded against a scope the tracker does not know.
    #[error("scope {kind}:{identifier} is not registered")]
    ScopeNotRegistered {
        /// Scope kind.
        kind: String,
        /// Scope identifier.
        identifier: String,
    },

    /// A persisted payload could not be decoded.
    #[error("malformed serialized state: {msg}")]
    Serialization {
        /// Human-readable error description.
        msg: String,
    },

    /// Numerical computation error.
    #[error("numerical error: {msg}")]
    NumericalError {
        /// Human-readable error description.
        msg: String,
    },
}

/// Result type for privacy accounting operations.
pub type Result<T> = std::result::Result<T, DpError>;

impl DpError {
    /// Create an invalid parameter error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameters { msg: msg.into() }
    }

    /// Create a budget exceeded error for the rejected `(epsilon, delta)` request.
    pub fn budget_exceeded<S: Into<String>>(msg: S, epsilon: f64, delta: f64) -> Self {
        Self::BudgetExceeded {
            msg: msg.into(),
            requested_epsilon: epsilon,
            requested_delta: delta,
        }
    }

    /// Create a not-calibrated error.
    pub fn not_calibrated<S: Into<String>>(msg: S) -> Self {
        Self::NotCalibrated { msg: msg.into() }
    }

    /// Create a scope-not-registered error.
    pub fn scope_not_registered<K: Into<String>, I: Into<String>>(kind: K, identifier: I) -> Self {
        Self::ScopeNotRegistered {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization { msg: msg.into() }
    }

    /// Create a numerical error.
    pub fn numerical<S: Into<String>>(msg: S) -> Self {
        Self::NumericalError { msg: msg.into() }
    }

    /// Whether this is a parameter validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidParameters { .. })
    }

    /// Whether this is a budget exceeded error.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

impl From<serde_json::Error> for DpError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
