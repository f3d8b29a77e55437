//! Composition and privacy accounting.
//!
//! Composition rules turn sequences of [`dplib_core::PrivacyEvent`]s into a
//! single cost; accountants keep running ledgers of those costs against a
//! budget.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accountant;
pub mod accountants;
pub mod advanced;
pub mod basic;
pub mod cdp;
pub mod composition;
pub mod moments;
pub mod rdp;
pub mod scheduler;
pub mod theorems;
pub mod tracker;

pub use accountant::{AccountantSnapshot, EventRequest, PrivacyAccountant, PRIVACY_REPORTS_KEY};
pub use accountants::{
    AccountantConfig, CdpAccountantConfig, CoreAccountantConfig, MomentAccountantConfig,
    TrackerConfig,
};
pub use advanced::{
    advanced_composition, gdp_composition, optimal_composition_fallback, rdp_composition,
    rho_zcdp_composition, shuffle_amplification, strong_composition, subsampling_amplification,
    AdvancedCompositionRule, RhoZcdpCompositionRule,
};
pub use basic::{
    group_privacy, linear_addition, parallel_composition, post_processing, repeated_mechanism,
    sequential_composition,
};
pub use cdp::{AccountingMethod, CdpPrivacyAccountant, ComposeOptions};
pub use composition::{
    normalize_event, normalize_events, CompositionResult, CompositionRule, EventInput,
    HigherOrderCompositionRule, ParallelCompositionRule, SequentialCompositionRule,
};
pub use moments::{MomentAccountant, DEFAULT_ORDERS};
pub use scheduler::{Allocation, BudgetScheduler};
pub use tracker::{AlertHandler, BudgetAlert, BudgetTracker, SpendOptions, TrackedScope};

/// Common imports for privacy accounting.
pub mod prelude {
    pub use crate::{
        advanced_composition, normalize_events, sequential_composition, strong_composition,
        AccountantConfig, AccountingMethod, Allocation, BudgetAlert, BudgetScheduler,
        BudgetTracker, CdpPrivacyAccountant, ComposeOptions, CompositionResult, CompositionRule,
        EventRequest, MomentAccountant, ParallelCompositionRule, PrivacyAccountant,
        SequentialCompositionRule, TrackedScope,
    };
}
