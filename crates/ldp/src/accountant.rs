//! Per-user local budget enforcement with an optional central bridge.

use std::collections::BTreeMap;
use std::fmt;

use dplib_accounting::{CdpPrivacyAccountant, PrivacyAccountant};
use dplib_core::{keys, validate, DpError, MetadataKeys, PrivacyEvent, Result};
use tracing::{debug, info, warn};

use crate::mapping::{default_ldp_to_cdp_mapper, normalize_cdp_event, LdpToCdpEvent, LdpToCdpMapper};
use crate::usage::{LdpBudgetSummary, LocalPrivacyUsage, ANONYMOUS_USER_KEY};

/// Central ledger that accepts forwarded local events.
pub trait CdpSink {
    /// Record `event`, or fail without recording anything.
    fn forward(&mut self, event: PrivacyEvent) -> Result<()>;
}

impl CdpSink for PrivacyAccountant {
    fn forward(&mut self, event: PrivacyEvent) -> Result<()> {
        self.record_event(event).map(drop)
    }
}

impl CdpSink for CdpPrivacyAccountant {
    fn forward(&mut self, event: PrivacyEvent) -> Result<()> {
        self.add_event(event).map(drop)
    }
}

impl<S: CdpSink + ?Sized> CdpSink for &mut S {
    fn forward(&mut self, event: PrivacyEvent) -> Result<()> {
        (**self).forward(event)
    }
}

impl<S: CdpSink + ?Sized> CdpSink for Box<S> {
    fn forward(&mut self, event: PrivacyEvent) -> Result<()> {
        (**self).forward(event)
    }
}

/// Local ledger with optional per-user and global epsilon caps.
///
/// When a central ledger is attached, each usage is mapped, stamped with
/// its `ldp_context` and forwarded before the local totals move. A usage
/// rejected on either side leaves both ledgers unchanged.
pub struct LdpPrivacyAccountant<S = PrivacyAccountant> {
    per_user_limit: Option<f64>,
    global_limit: Option<f64>,
    per_user: BTreeMap<String, f64>,
    total: f64,
    n_events: usize,
    sink: Option<S>,
    mapper: LdpToCdpMapper,
}

impl LdpPrivacyAccountant {
    /// Unlimited accountant with no central ledger attached.
    pub fn new() -> Self {
        Self {
            per_user_limit: None,
            global_limit: None,
            per_user: BTreeMap::new(),
            total: 0.0,
            n_events: 0,
            sink: None,
            mapper: Box::new(default_ldp_to_cdp_mapper),
        }
    }
}

impl Default for LdpPrivacyAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CdpSink> LdpPrivacyAccountant<S> {
    /// Attach a central ledger.
    pub fn with_cdp_accountant<T: CdpSink>(self, sink: T) -> LdpPrivacyAccountant<T> {
        LdpPrivacyAccountant {
            per_user_limit: self.per_user_limit,
            global_limit: self.global_limit,
            per_user: self.per_user,
            total: self.total,
            n_events: self.n_events,
            sink: Some(sink),
            mapper: self.mapper,
        }
    }

    /// Cap each user's cumulative epsilon.
    pub fn with_per_user_limit(mut self, limit: f64) -> Result<Self> {
        self.per_user_limit = Some(validate::finite_non_negative(limit, "per_user_epsilon_limit")?);
        Ok(self)
    }

    /// Cap the epsilon summed over all users.
    pub fn with_global_limit(mut self, limit: f64) -> Result<Self> {
        self.global_limit = Some(validate::finite_non_negative(limit, "global_epsilon_limit")?);
        Ok(self)
    }

    /// Replace the usage-to-event mapper.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&LocalPrivacyUsage) -> Result<LdpToCdpEvent> + 'static,
    {
        self.mapper = Box::new(mapper);
        self
    }

    /// Per-user cap, if any.
    pub fn per_user_limit(&self) -> Option<f64> {
        self.per_user_limit
    }

    /// Global cap, if any.
    pub fn global_limit(&self) -> Option<f64> {
        self.global_limit
    }

    /// Attached central ledger.
    pub fn cdp_accountant(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Mutable access to the attached central ledger.
    pub fn cdp_accountant_mut(&mut self) -> Option<&mut S> {
        self.sink.as_mut()
    }

    /// Detach and return the central ledger.
    pub fn into_cdp_accountant(self) -> Option<S> {
        self.sink
    }

    /// Charge one usage.
    pub fn add_usage(&mut self, usage: &LocalPrivacyUsage) -> Result<()> {
        let epsilon = usage.validate()?;
        if let Some(delta) = keys::extract_f64(&usage.metadata, &MetadataKeys::default().delta)? {
            validate::finite_non_negative(delta, "delta")?;
        }
        let user_key = usage.user_key();
        let user_next = self.get_user_spent(Some(user_key)) + epsilon;
        let total_next = self.total + epsilon;
        if self.per_user_limit.is_some_and(|limit| user_next > limit) {
            warn!(user = user_key, epsilon, "per-user epsilon limit exceeded");
            return Err(DpError::budget_exceeded(
                format!("user {user_key} exceeds per-user epsilon limit"),
                epsilon,
                0.0,
            ));
        }
        if self.global_limit.is_some_and(|limit| total_next > limit) {
            warn!(user = user_key, epsilon, "global epsilon limit exceeded");
            return Err(DpError::budget_exceeded(
                "global epsilon limit exceeded",
                epsilon,
                0.0,
            ));
        }
        self.forward(usage)?;
        self.per_user.insert(user_key.to_string(), user_next);
        self.total = total_next;
        self.n_events += 1;
        debug!(user = user_key, epsilon, total = self.total, "local usage recorded");
        Ok(())
    }

    /// Charge usages in order, stopping at the first failure.
    ///
    /// Usages before the failing one stay recorded.
    pub fn add_usages<'a, I>(&mut self, usages: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a LocalPrivacyUsage>,
    {
        for usage in usages {
            self.add_usage(usage)?;
        }
        Ok(())
    }

    /// Cumulative epsilon for `user_id`; `None` reads the anonymous bucket.
    pub fn get_user_spent(&self, user_id: Option<&str>) -> f64 {
        self.per_user
            .get(user_id.unwrap_or(ANONYMOUS_USER_KEY))
            .copied()
            .unwrap_or(0.0)
    }

    /// Epsilon summed over every user.
    pub fn get_total_spent(&self) -> f64 {
        self.total
    }

    /// Snapshot of the local ledger.
    pub fn summarize(&self) -> LdpBudgetSummary {
        LdpBudgetSummary::from_totals(self.total, self.per_user.clone(), self.n_events)
    }

    /// Clear local totals. Limits, mapper and central ledger are kept.
    pub fn reset(&mut self) {
        self.per_user.clear();
        self.total = 0.0;
        self.n_events = 0;
        info!("local ledger reset");
    }

    fn forward(&mut self, usage: &LocalPrivacyUsage) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let mapped = (self.mapper)(usage)?;
        let event = normalize_cdp_event(usage, mapped)?.into_privacy_event()?;
        sink.forward(event)
    }
}

impl<S: fmt::Debug> fmt::Debug for LdpPrivacyAccountant<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdpPrivacyAccountant")
            .field("per_user_limit", &self.per_user_limit)
            .field("global_limit", &self.global_limit)
            .field("per_user", &self.per_user)
            .field("total", &self.total)
            .field("n_events", &self.n_events)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dplib_core::Metadata;
    use serde_json::{json, Value};

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<PrivacyEvent>,
        reject: bool,
    }

    impl CdpSink for Recorder {
        fn forward(&mut self, event: PrivacyEvent) -> Result<()> {
            if self.reject {
                return Err(DpError::budget_exceeded("central ledger full", event.epsilon(), event.delta()));
            }
            self.events.push(event);
            Ok(())
        }
    }

    fn meta(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn per_user_limit_rejects_without_partial_update() {
        let mut acc = LdpPrivacyAccountant::new().with_per_user_limit(0.5).unwrap();
        acc.add_usage(&LocalPrivacyUsage::for_user("u1", 0.3)).unwrap();
        let err = acc.add_usage(&LocalPrivacyUsage::for_user("u1", 0.3)).unwrap_err();
        assert!(err.is_budget_exceeded());
        assert_eq!(acc.get_user_spent(Some("u1")), 0.3);
        assert_eq!(acc.get_total_spent(), 0.3);
        acc.add_usage(&LocalPrivacyUsage::for_user("u2", 0.3)).unwrap();
        assert_eq!(acc.summarize().n_events, 2);
    }

    #[test]
    fn global_limit_spans_users() {
        let mut acc = LdpPrivacyAccountant::new().with_global_limit(1.0).unwrap();
        acc.add_usages(&[
            LocalPrivacyUsage::for_user("a", 0.5),
            LocalPrivacyUsage::new(0.5),
        ])
        .unwrap();
        assert!(acc.add_usage(&LocalPrivacyUsage::for_user("b", 0.1)).unwrap_err().is_budget_exceeded());
        assert_eq!(acc.get_user_spent(None), 0.5);
        assert_eq!(acc.get_total_spent(), 1.0);
    }

    #[test]
    fn invalid_usage_is_rejected() {
        let mut acc = LdpPrivacyAccountant::new();
        assert!(acc.add_usage(&LocalPrivacyUsage::new(-0.1)).unwrap_err().is_validation());
        let negative_delta = LocalPrivacyUsage::new(0.1).with_metadata(meta(json!({"ldp_delta": -1.0})));
        assert!(acc.add_usage(&negative_delta).unwrap_err().is_validation());
        assert_eq!(acc.get_total_spent(), 0.0);
        assert!(LdpPrivacyAccountant::new().with_per_user_limit(-1.0).is_err());
        assert!(LdpPrivacyAccountant::new().with_global_limit(f64::NAN).is_err());
    }

    #[test]
    fn forwards_with_context() {
        let mut acc = LdpPrivacyAccountant::new().with_cdp_accountant(Recorder::default());
        let usage = LocalPrivacyUsage::for_user("u1", 0.4)
            .with_metadata(meta(json!({"delta": 1e-6, "mechanism": "grr"})));
        acc.add_usage(&usage).unwrap();
        let recorded = &acc.cdp_accountant().unwrap().events;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].epsilon(), 0.4);
        assert_eq!(recorded[0].delta(), 1e-6);
        assert_eq!(recorded[0].metadata()["ldp_context"]["mechanism"], json!("grr"));
        assert_eq!(recorded[0].metadata()["ldp_context"]["user_id"], json!("u1"));
    }

    #[test]
    fn central_rejection_leaves_local_ledger_untouched() {
        let sink = Recorder {
            reject: true,
            ..Recorder::default()
        };
        let mut acc = LdpPrivacyAccountant::new().with_cdp_accountant(sink);
        assert!(acc.add_usage(&LocalPrivacyUsage::for_user("u1", 0.2)).is_err());
        assert_eq!(acc.get_total_spent(), 0.0);
        assert_eq!(acc.summarize(), LdpBudgetSummary::default());
    }

    #[test]
    fn custom_mapper_is_used() {
        let mut acc = LdpPrivacyAccountant::new()
            .with_mapper(|usage| {
                let mut event = default_ldp_to_cdp_mapper(usage)?;
                event.epsilon *= 2.0;
                Ok(event)
            })
            .with_cdp_accountant(PrivacyAccountant::unbounded());
        acc.add_usage(&LocalPrivacyUsage::for_user("u1", 0.25)).unwrap();
        assert_eq!(acc.get_total_spent(), 0.25);
        assert_eq!(acc.cdp_accountant().unwrap().spent().epsilon(), 0.5);
    }

    #[test]
    fn reset_keeps_limits_and_ledger() {
        let mut central = PrivacyAccountant::bounded(1.0, 1e-5).unwrap();
        {
            let mut acc = LdpPrivacyAccountant::new()
                .with_per_user_limit(0.5)
                .unwrap()
                .with_cdp_accountant(&mut central);
            acc.add_usage(&LocalPrivacyUsage::for_user("u1", 0.4)).unwrap();
            acc.reset();
            assert_eq!(acc.get_total_spent(), 0.0);
            assert_eq!(acc.per_user_limit(), Some(0.5));
            assert!(acc.cdp_accountant().is_some());
            acc.add_usage(&LocalPrivacyUsage::for_user("u1", 0.4)).unwrap();
        }
        assert_eq!(central.events().len(), 2);
        assert!((central.spent().epsilon() - 0.8).abs() < 1e-12);
    }
}
