//! Core differential privacy value types.
//!
//! This crate provides the pieces every accountant builds on: budgets and
//! events, the privacy model registry with its conversions, guarantees,
//! configuration, and calibrated noise mechanisms.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod config;
pub mod convert;
pub mod error;
pub mod guarantee;
pub mod keys;
pub mod mechanism;
pub mod model;
pub mod validate;

pub use budget::{Metadata, PrivacyBudget, PrivacyEvent};
pub use config::{AccountingConfig, DEFAULT_ALERT_THRESHOLDS, DEFAULT_CONVERSION_DELTA};
pub use convert::{
    cdp_to_zcdp, gdp_delta_for_epsilon, gdp_to_cdp, gdp_to_zcdp, ldp_to_cdp, rdp_to_cdp,
    zcdp_to_cdp, zcdp_to_rdp,
};
pub use error::{DpError, Result};
pub use guarantee::{GuaranteeReport, PrivacyGuarantee};
pub use keys::MetadataKeys;
pub use mechanism::{
    GaussianMechanism, GeometricMechanism, LaplaceMechanism, Mechanism, MechanismSnapshot,
};
pub use model::{
    ensure_supported_model, mechanism_default_model, mechanism_supports, registry_snapshot,
    MechanismType, ModelSpec, PrivacyModel, RegistrySnapshot,
};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        ensure_supported_model, AccountingConfig, DpError, GaussianMechanism, GeometricMechanism,
        LaplaceMechanism, Mechanism, MechanismType, Metadata, MetadataKeys, ModelSpec,
        PrivacyBudget, PrivacyEvent, PrivacyGuarantee, PrivacyModel, Result,
    };
}
