//! Composition rules over sequences of privacy events.
//!
//! Rules accept loosely-shaped inputs ([`EventInput`]) and normalise them
//! through [`normalize_events`] before any arithmetic runs, so every formula
//! sees validated [`PrivacyEvent`]s.

use std::collections::HashMap;
use std::ops::Add;

use dplib_core::keys;
use dplib_core::{DpError, Metadata, PrivacyBudget, PrivacyEvent, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Any of the shapes an event may arrive in.
#[derive(Clone, Debug, PartialEq)]
pub enum EventInput {
    /// An already-built event.
    Event(PrivacyEvent),
    /// `(epsilon, delta)`.
    Pair(f64, f64),
    /// `(epsilon, delta, description)`.
    Described(f64, f64, String),
    /// A mapping with an `epsilon` key and optional `delta`, `description`, `metadata`.
    Record(Metadata),
}

impl From<PrivacyEvent> for EventInput {
    fn from(event: PrivacyEvent) -> Self {
        Self::Event(event)
    }
}

impl From<&PrivacyEvent> for EventInput {
    fn from(event: &PrivacyEvent) -> Self {
        Self::Event(event.clone())
    }
}

impl From<(f64, f64)> for EventInput {
    fn from((epsilon, delta): (f64, f64)) -> Self {
        Self::Pair(epsilon, delta)
    }
}

impl From<(f64, f64, &str)> for EventInput {
    fn from((epsilon, delta, description): (f64, f64, &str)) -> Self {
        Self::Described(epsilon, delta, description.to_string())
    }
}

impl From<(f64, f64, String)> for EventInput {
    fn from((epsilon, delta, description): (f64, f64, String)) -> Self {
        Self::Described(epsilon, delta, description)
    }
}

impl From<Metadata> for EventInput {
    fn from(record: Metadata) -> Self {
        Self::Record(record)
    }
}

/// Convert one input into a validated event.
pub fn normalize_event(input: impl Into<EventInput>) -> Result<PrivacyEvent> {
    match input.into() {
        EventInput::Event(event) => {
            // Events may have been deserialized from untrusted payloads.
            PrivacyEvent::new(event.epsilon(), event.delta())?;
            Ok(event)
        }
        EventInput::Pair(epsilon, delta) => PrivacyEvent::new(epsilon, delta),
        EventInput::Described(epsilon, delta, description) => {
            Ok(PrivacyEvent::new(epsilon, delta)?.with_description(description))
        }
        EventInput::Record(record) => {
            let epsilon = keys::extract_f64(&record, &["epsilon"])?
                .ok_or_else(|| DpError::invalid("event record is missing 'epsilon'"))?;
            let delta = keys::extract_f64(&record, &["delta"])?.unwrap_or(0.0);
            let description = keys::extract_string(&record, &["description"])?;
            let metadata = match record.get("metadata") {
                None | Some(Value::Null) => Metadata::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => return Err(DpError::invalid("event 'metadata' must be a mapping")),
            };
            Ok(PrivacyEvent::new(epsilon, delta)?
                .with_optional_description(description)
                .with_metadata(metadata))
        }
    }
}

/// Normalise a batch of inputs, failing on the first malformed one.
pub fn normalize_events<I, T>(events: I) -> Result<Vec<PrivacyEvent>>
where
    I: IntoIterator<Item = T>,
    T: Into<EventInput>,
{
    events.into_iter().map(normalize_event).collect()
}

/// Outcome of a composition rule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionResult {
    /// Composed epsilon.
    pub epsilon: f64,
    /// Composed delta.
    pub delta: f64,
    /// Rule-specific diagnostics.
    #[serde(default)]
    pub detail: Metadata,
}

impl CompositionResult {
    /// Result with explicit detail.
    pub fn new(epsilon: f64, delta: f64, detail: Metadata) -> Self {
        Self {
            epsilon,
            delta,
            detail,
        }
    }

    /// Zero cost with the given detail.
    pub fn zero(detail: Metadata) -> Self {
        Self::new(0.0, 0.0, detail)
    }

    /// Composed cost as a budget; a composed delta above 1 is an error.
    pub fn budget(&self) -> Result<PrivacyBudget> {
        PrivacyBudget::new(self.epsilon, self.delta)
    }

    /// Read a detail field.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.detail.get(key)
    }

    /// JSON view.
    pub fn to_value(&self) -> Value {
        json!({
            "epsilon": self.epsilon,
            "delta": self.delta,
            "detail": Value::Object(self.detail.clone()),
        })
    }
}

impl Add for CompositionResult {
    type Output = Self;

    /// Sums the costs; right-hand detail keys win.
    fn add(self, rhs: Self) -> Self {
        let mut detail = self.detail;
        detail.extend(rhs.detail);
        Self::new(self.epsilon + rhs.epsilon, self.delta + rhs.delta, detail)
    }
}

/// Build a detail map from `(key, value)` pairs.
pub fn detail<const N: usize>(pairs: [(&str, Value); N]) -> Metadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// A composition theorem over a finite sequence of events.
pub trait CompositionRule {
    /// Name reported in result details.
    fn name(&self) -> &str;

    /// Compose already-normalised events.
    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult>;

    /// Normalise `events` and compose them.
    fn compose<I, T>(&self, events: I) -> Result<CompositionResult>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventInput>,
        Self: Sized,
    {
        let normalized = normalize_events(events)?;
        self.apply(&normalized)
    }
}

impl<R: CompositionRule + ?Sized> CompositionRule for Box<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult> {
        (**self).apply(events)
    }
}

/// Basic composition: epsilons and deltas add up.
#[derive(Clone, Debug)]
pub struct SequentialCompositionRule {
    name: String,
}

impl Default for SequentialCompositionRule {
    fn default() -> Self {
        Self::named("sequential")
    }
}

impl SequentialCompositionRule {
    /// Rule reporting the default name `sequential`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule reporting a custom name.
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

impl CompositionRule for SequentialCompositionRule {
    fn name(&self) -> &str {
        &self.name
    }

    /// An empty sequence composes to zero with `count = 0`.
    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult> {
        let epsilon = events.iter().map(PrivacyEvent::epsilon).sum();
        let delta = events.iter().map(PrivacyEvent::delta).sum();
        Ok(CompositionResult::new(
            epsilon,
            delta,
            detail([("rule", json!(self.name)), ("count", json!(events.len()))]),
        ))
    }
}

/// Maps an event and its position to a group label.
pub type GroupKey = Box<dyn Fn(&PrivacyEvent, usize) -> String>;

/// Folds per-group results into one.
pub type Reducer = Box<dyn Fn(&[CompositionResult]) -> Result<CompositionResult>>;

/// Parallel composition over disjoint groups.
///
/// Events are grouped by `group_key` (default: every event alone), each
/// group is composed with the inner rule, and the group results are folded
/// by the reducer (default: component-wise max).
pub struct ParallelCompositionRule {
    name: String,
    group_key: GroupKey,
    inner_rule: Box<dyn CompositionRule>,
    aggregator: String,
    reducer: Reducer,
}

impl Default for ParallelCompositionRule {
    fn default() -> Self {
        Self {
            name: "parallel".to_string(),
            group_key: Box::new(|_, index| index.to_string()),
            inner_rule: Box::new(SequentialCompositionRule::named("parallel_group_sequential")),
            aggregator: "max".to_string(),
            reducer: Box::new(|results| Ok(max_reduce(results))),
        }
    }
}

impl ParallelCompositionRule {
    /// Rule with default grouping, inner rule and reducer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Group events by the given key function.
    pub fn with_group_key<F>(mut self, group_key: F) -> Self
    where
        F: Fn(&PrivacyEvent, usize) -> String + 'static,
    {
        self.group_key = Box::new(group_key);
        self
    }

    /// Compose each group with `rule`.
    pub fn with_inner_rule<R: CompositionRule + 'static>(mut self, rule: R) -> Self {
        self.inner_rule = Box::new(rule);
        self
    }

    /// Fold group results with a named reducer.
    pub fn with_reducer<S, F>(mut self, aggregator: S, reducer: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[CompositionResult]) -> Result<CompositionResult> + 'static,
    {
        self.aggregator = aggregator.into();
        self.reducer = Box::new(reducer);
        self
    }

    /// Split events into groups, preserving first-appearance order.
    pub fn group(&self, events: &[PrivacyEvent]) -> Vec<(String, Vec<PrivacyEvent>)> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<PrivacyEvent>)> = Vec::new();
        for (i, event) in events.iter().enumerate() {
            let key = (self.group_key)(event, i);
            match index.get(&key) {
                Some(&slot) => groups[slot].1.push(event.clone()),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![event.clone()]));
                }
            }
        }
        groups
    }
}

impl CompositionRule for ParallelCompositionRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult> {
        if events.is_empty() {
            return Ok(CompositionResult::zero(detail([
                ("rule", json!(self.name)),
                ("aggregator", json!(self.aggregator)),
                ("groups", json!(0)),
            ])));
        }
        let group_results = self
            .group(events)
            .iter()
            .map(|(_, group)| self.inner_rule.apply(group))
            .collect::<Result<Vec<_>>>()?;
        let mut result = (self.reducer)(&group_results)?;
        result
            .detail
            .entry("rule")
            .or_insert_with(|| json!(self.name));
        result
            .detail
            .insert("aggregator".into(), json!(self.aggregator));
        result
            .detail
            .insert("groups".into(), json!(group_results.len()));
        Ok(result)
    }
}

/// Component-wise max over group results, with a per-group breakdown.
pub fn max_reduce(results: &[CompositionResult]) -> CompositionResult {
    let epsilon = results.iter().map(|r| r.epsilon).fold(0.0, f64::max);
    let delta = results.iter().map(|r| r.delta).fold(0.0, f64::max);
    let per_group: Vec<Value> = results
        .iter()
        .map(|r| json!({"epsilon": r.epsilon, "delta": r.delta}))
        .collect();
    CompositionResult::new(epsilon, delta, detail([("per_group", json!(per_group))]))
}

/// Scale a base rule's result by a repetition count.
///
/// Expresses "this composition, run `order` times" without enumerating the
/// repeated events.
pub struct HigherOrderCompositionRule {
    name: String,
    order: u32,
    base_rule: Box<dyn CompositionRule>,
}

impl HigherOrderCompositionRule {
    /// Rule with a sequential base.
    pub fn new(order: u32) -> Result<Self> {
        Self::with_base_rule(order, SequentialCompositionRule::named("higher_order_base"))
    }

    /// Rule with a custom base.
    pub fn with_base_rule<R: CompositionRule + 'static>(order: u32, base_rule: R) -> Result<Self> {
        if order == 0 {
            return Err(DpError::invalid("order must be positive"));
        }
        Ok(Self {
            name: "higher_order".to_string(),
            order,
            base_rule: Box::new(base_rule),
        })
    }

    /// Repetition count.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Compose with a per-call repetition count.
    pub fn apply_with_order(&self, events: &[PrivacyEvent], order: u32) -> Result<CompositionResult> {
        if order == 0 {
            return Err(DpError::invalid("order must be positive"));
        }
        let base = self.base_rule.apply(events)?;
        let scale = f64::from(order);
        Ok(CompositionResult::new(
            base.epsilon * scale,
            base.delta * scale,
            detail([
                ("rule", json!(self.name)),
                ("order", json!(order)),
                ("base", base.to_value()),
                ("count", json!(events.len())),
            ]),
        ))
    }
}

impl CompositionRule for HigherOrderCompositionRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult> {
        self.apply_with_order(events, self.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn normalizes_every_input_shape() {
        let events = normalize_events(vec![
            EventInput::from((0.1, 1e-6)),
            EventInput::from((0.2, 0.0, "described")),
            EventInput::from(record(json!({"epsilon": 0.3, "metadata": {"rho": 0.01}}))),
            EventInput::from(PrivacyEvent::new(0.4, 0.0).unwrap()),
        ])
        .unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1].description(), Some("described"));
        assert_eq!(events[2].delta(), 0.0);
        assert_eq!(events[2].metadata()["rho"], json!(0.01));
    }

    #[test]
    fn record_without_epsilon_fails() {
        let err = normalize_event(record(json!({"delta": 1e-6}))).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn negative_inputs_fail() {
        assert!(normalize_event((-0.1, 0.0)).is_err());
        assert!(normalize_event((0.1, -1e-6)).is_err());
        assert!(normalize_event((f64::NAN, 0.0)).is_err());
    }

    #[test]
    fn sequential_sums_and_counts() {
        let result = SequentialCompositionRule::new()
            .compose(vec![(0.1, 1e-6), (0.2, 2e-6)])
            .unwrap();
        assert!((result.epsilon - 0.3).abs() < 1e-12);
        assert!((result.delta - 3e-6).abs() < 1e-18);
        assert_eq!(result.detail("rule"), Some(&json!("sequential")));
        assert_eq!(result.detail("count"), Some(&json!(2)));
    }

    #[test]
    fn sequential_empty_is_zero() {
        let result = SequentialCompositionRule::new()
            .compose(Vec::<(f64, f64)>::new())
            .unwrap();
        assert_eq!(result.epsilon, 0.0);
        assert_eq!(result.detail("count"), Some(&json!(0)));
    }

    #[test]
    fn parallel_defaults_to_max_over_singletons() {
        let result = ParallelCompositionRule::new()
            .compose(vec![(0.1, 1e-6), (0.5, 0.0), (0.3, 2e-6)])
            .unwrap();
        assert_eq!(result.epsilon, 0.5);
        assert_eq!(result.delta, 2e-6);
        assert_eq!(result.detail("groups"), Some(&json!(3)));
        assert_eq!(result.detail("aggregator"), Some(&json!("max")));
    }

    #[test]
    fn parallel_groups_by_key() {
        let rule = ParallelCompositionRule::new().with_group_key(|event, _| {
            event
                .description()
                .unwrap_or("none")
                .to_string()
        });
        let result = rule
            .compose(vec![(0.1, 0.0, "a"), (0.2, 0.0, "a"), (0.25, 0.0, "b")])
            .unwrap();
        assert!((result.epsilon - 0.3).abs() < 1e-12);
        assert_eq!(result.detail("groups"), Some(&json!(2)));
    }

    #[test]
    fn parallel_custom_reducer() {
        let rule = ParallelCompositionRule::new().with_reducer("sum", |results| {
            Ok(results
                .iter()
                .cloned()
                .fold(CompositionResult::default(), |acc, r| acc + r))
        });
        let result = rule.compose(vec![(0.1, 0.0), (0.2, 0.0)]).unwrap();
        assert!((result.epsilon - 0.3).abs() < 1e-12);
        assert_eq!(result.detail("aggregator"), Some(&json!("sum")));
    }

    #[test]
    fn parallel_empty_reports_zero_groups() {
        let result = ParallelCompositionRule::new()
            .compose(Vec::<(f64, f64)>::new())
            .unwrap();
        assert_eq!(result.epsilon, 0.0);
        assert_eq!(result.detail("groups"), Some(&json!(0)));
    }

    #[test]
    fn higher_order_scales_base() {
        let rule = HigherOrderCompositionRule::new(3).unwrap();
        let result = rule.compose(vec![(0.1, 1e-6)]).unwrap();
        assert!((result.epsilon - 0.3).abs() < 1e-12);
        assert!((result.delta - 3e-6).abs() < 1e-18);
        assert_eq!(result.detail("order"), Some(&json!(3)));
        assert!(HigherOrderCompositionRule::new(0).is_err());
    }

    #[test]
    fn budget_rejects_vacuous_delta() {
        let ok = CompositionResult::zero(Metadata::new()).budget().unwrap();
        assert!(ok.is_zero());

        let vacuous = CompositionResult::new(0.2, 1.2, Metadata::new());
        assert!(vacuous.budget().unwrap_err().is_validation());
    }

    proptest! {
        #[test]
        fn sequential_is_order_invariant_and_associative(
            eps in prop::collection::vec(0.0f64..2.0, 3..8),
            dl in prop::collection::vec(0.0f64..1e-4, 3..8),
        ) {
            let n = eps.len().min(dl.len());
            let pairs: Vec<(f64, f64)> = eps[..n].iter().copied().zip(dl[..n].iter().copied()).collect();
            let rule = SequentialCompositionRule::new();
            let forward = rule.compose(pairs.clone()).unwrap();
            let mut reversed = pairs.clone();
            reversed.reverse();
            let backward = rule.compose(reversed).unwrap();
            prop_assert!((forward.epsilon - backward.epsilon).abs() < 1e-9);
            prop_assert!((forward.delta - backward.delta).abs() < 1e-12);

            let head = rule.compose(pairs[..2].to_vec()).unwrap();
            let mut nested = vec![(head.epsilon, head.delta)];
            nested.extend_from_slice(&pairs[2..]);
            let regrouped = rule.compose(nested).unwrap();
            prop_assert!((forward.epsilon - regrouped.epsilon).abs() < 1e-9);
            prop_assert!((forward.delta - regrouped.delta).abs() < 1e-12);
        }
    }
}
