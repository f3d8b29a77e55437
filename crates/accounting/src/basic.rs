//! Basic composition helpers.

use dplib_core::{DpError, PrivacyEvent, Result};
use serde_json::{json, Value};

use crate::composition::{
    detail, normalize_event, CompositionResult, CompositionRule, EventInput,
    ParallelCompositionRule, SequentialCompositionRule,
};

/// Add epsilons and deltas component-wise.
pub fn linear_addition<E, D>(epsilons: E, deltas: D) -> CompositionResult
where
    E: IntoIterator<Item = f64>,
    D: IntoIterator<Item = f64>,
{
    CompositionResult::new(
        epsilons.into_iter().sum(),
        deltas.into_iter().sum(),
        detail([("rule", json!("linear"))]),
    )
}

/// Sequential composition of heterogeneous events.
pub fn sequential_composition<I, T>(events: I) -> Result<CompositionResult>
where
    I: IntoIterator<Item = T>,
    T: Into<EventInput>,
{
    SequentialCompositionRule::new().compose(events)
}

/// Parallel composition with every event in its own group.
pub fn parallel_composition<I, T>(events: I) -> Result<CompositionResult>
where
    I: IntoIterator<Item = T>,
    T: Into<EventInput>,
{
    ParallelCompositionRule::new().compose(events)
}

/// The same mechanism run `repetitions` times, scaled linearly.
pub fn repeated_mechanism(epsilon: f64, delta: f64, repetitions: u32) -> Result<CompositionResult> {
    if repetitions == 0 {
        return Err(DpError::invalid("repetitions must be positive"));
    }
    let event = PrivacyEvent::new(epsilon, delta)?;
    let mut result = linear_addition(
        std::iter::repeat(event.epsilon()).take(repetitions as usize),
        std::iter::repeat(event.delta()).take(repetitions as usize),
    );
    result
        .detail
        .insert("repetitions".into(), json!(repetitions));
    Ok(result)
}

/// Re-emit an event unchanged, marked as post-processed.
///
/// Post-processing never increases privacy loss; the mark lands under
/// `metadata.composition.post_processing`.
pub fn post_processing(event: impl Into<EventInput>) -> Result<PrivacyEvent> {
    let event = normalize_event(event)?;
    let mut metadata = event.metadata().clone();
    let composition = metadata
        .entry("composition")
        .or_insert_with(|| Value::Object(Default::default()));
    match composition {
        Value::Object(map) => {
            map.insert("post_processing".into(), Value::Bool(true));
        }
        _ => {
            return Err(DpError::invalid(
                "event metadata 'composition' must be a mapping",
            ))
        }
    }
    Ok(event.with_metadata(metadata))
}

/// Lift an `(ε, δ)` guarantee to groups of `group_size` individuals.
///
/// `ε·k` and `δ·Σ_{i<k} e^{iε}`; pure DP keeps δ at zero.
pub fn group_privacy(event: impl Into<EventInput>, group_size: u32) -> Result<CompositionResult> {
    if group_size == 0 {
        return Err(DpError::invalid("group_size must be positive"));
    }
    let event = normalize_event(event)?;
    let k = f64::from(group_size);
    let epsilon = event.epsilon() * k;
    let delta = if event.delta() == 0.0 {
        0.0
    } else {
        let factor: f64 = (0..group_size)
            .map(|i| (event.epsilon() * f64::from(i)).exp())
            .sum();
        event.delta() * factor
    };
    Ok(CompositionResult::new(
        epsilon,
        delta,
        detail([
            ("rule", json!("group_privacy")),
            ("group_size", json!(group_size)),
        ]),
    ))
}
