//! Local differential privacy accounting.
//!
//! Local usages compose linearly per user. [`LdpPrivacyAccountant`] enforces
//! per-user and global caps and can forward every accepted usage into a
//! central ledger, tagged with its `ldp_context` provenance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accountant;
pub mod compose;
pub mod mapping;
pub mod usage;

pub use accountant::{CdpSink, LdpPrivacyAccountant};
pub use compose::{
    compose_epsilon_sum, compose_usages_sum, parallel_composition, per_user_epsilon,
    sequential_compose_by_user, sequential_composition, summarize_budget,
};
pub use mapping::{
    default_ldp_to_cdp_mapper, mapper_by_name, normalize_cdp_event, LdpToCdpEvent,
    LdpToCdpMapper, LDP_CONTEXT_KEY,
};
pub use usage::{LdpBudgetSummary, LocalPrivacyUsage, ANONYMOUS_USER_KEY};

/// Common imports for local accounting.
pub mod prelude {
    pub use crate::{
        default_ldp_to_cdp_mapper, normalize_cdp_event, summarize_budget, CdpSink,
        LdpBudgetSummary, LdpPrivacyAccountant, LdpToCdpEvent, LocalPrivacyUsage,
    };
}
