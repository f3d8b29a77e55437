//! Facade crate re-exporting stable APIs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use dplib_accounting as accounting;
pub use dplib_core as core;
pub use dplib_ldp as ldp;

pub use accounting::{
    advanced_composition, gdp_composition, normalize_events, optimal_composition_fallback,
    rdp_composition, rho_zcdp_composition, sequential_composition, shuffle_amplification,
    strong_composition, subsampling_amplification, AccountantConfig, AccountantSnapshot,
    AccountingMethod, Allocation, BudgetAlert, BudgetScheduler, BudgetTracker,
    CdpAccountantConfig, CdpPrivacyAccountant, ComposeOptions, CompositionResult,
    CompositionRule, CoreAccountantConfig, EventInput, EventRequest, MomentAccountant,
    MomentAccountantConfig, ParallelCompositionRule, PrivacyAccountant, SpendOptions,
    TrackedScope, TrackerConfig,
};
pub use core::prelude as core_prelude;
pub use core::{
    AccountingConfig, DpError, Metadata, MetadataKeys, ModelSpec, PrivacyBudget, PrivacyEvent,
    PrivacyGuarantee, PrivacyModel, Result,
};
pub use ldp::{
    default_ldp_to_cdp_mapper, normalize_cdp_event, CdpSink, LdpBudgetSummary,
    LdpPrivacyAccountant, LdpToCdpEvent, LocalPrivacyUsage,
};

/// Convenience prelude covering accounting and local bridging.
pub mod prelude {
    pub use dplib_accounting::prelude::*;
    pub use dplib_core::prelude::*;
    pub use dplib_ldp::prelude::*;
}
