//! Advanced composition, alternative-model composition and amplification.
//!
//! Each function transcribes one closed-form theorem:
//!
//! - Dwork–Roth advanced composition for heterogeneous events,
//! - Dwork–Rothblum–Vadhan strong composition for `k` identical events,
//! - additive composition of ρ-zCDP, fixed-order RDP and μ-GDP (in L2),
//! - amplification by Poisson subsampling and by shuffling.

use dplib_core::keys;
use dplib_core::validate;
use dplib_core::{convert, DpError, PrivacyEvent, Result};
use serde_json::json;

use crate::composition::{
    detail, normalize_event, CompositionResult, CompositionRule, EventInput,
};

/// Dwork–Roth bound for heterogeneous events.
///
/// `ε = √(2·ln(1/δ')·Σεᵢ²) + Σεᵢ(e^{εᵢ} − 1)`, `δ = δ' + Σδᵢ`.
pub fn advanced_composition(events: &[PrivacyEvent], delta_prime: f64) -> Result<CompositionResult> {
    let delta_prime = validate::open_unit_interval(delta_prime, "delta_prime")?;
    if events.is_empty() {
        return Ok(CompositionResult::zero(detail([
            ("rule", json!("advanced")),
            ("count", json!(0)),
        ])));
    }
    let sum_sq: f64 = events.iter().map(|e| e.epsilon() * e.epsilon()).sum();
    let tail: f64 = events
        .iter()
        .map(|e| e.epsilon() * e.epsilon().exp_m1())
        .sum();
    let epsilon = (2.0 * (1.0 / delta_prime).ln() * sum_sq).sqrt() + tail;
    let delta = delta_prime + events.iter().map(PrivacyEvent::delta).sum::<f64>();
    finite(epsilon, "advanced composition")?;
    Ok(CompositionResult::new(
        epsilon,
        delta,
        detail([
            ("rule", json!("advanced")),
            ("delta_prime", json!(delta_prime)),
            ("count", json!(events.len())),
            ("sum_sq", json!(sum_sq)),
            ("eps_l2_sq", json!(sum_sq)),
        ]),
    ))
}

/// Dwork–Rothblum–Vadhan strong composition of `k` identical `(ε, δ)` events.
///
/// `ε' = ε·√(2k·ln(1/δ̂)) + k·ε(e^ε − 1)`, `δ' = k·δ + δ̂`.
pub fn strong_composition(epsilon: f64, delta: f64, k: u32, delta_hat: f64) -> Result<CompositionResult> {
    let (epsilon, delta) = validate::epsilon_delta(epsilon, delta)?;
    let delta_hat = validate::open_unit_interval(delta_hat, "delta_hat")?;
    if k == 0 {
        return Err(DpError::invalid("k must be positive"));
    }
    let k_f = f64::from(k);
    let eps_prime = epsilon * (2.0 * k_f * (1.0 / delta_hat).ln()).sqrt()
        + k_f * epsilon * epsilon.exp_m1();
    let delta_total = k_f * delta + delta_hat;
    finite(eps_prime, "strong composition")?;
    Ok(CompositionResult::new(
        eps_prime,
        delta_total,
        detail([
            ("rule", json!("strong")),
            ("k", json!(k)),
            ("delta_hat", json!(delta_hat)),
        ]),
    ))
}

/// Sum ρ-zCDP values and convert at `target_delta`.
pub fn rho_zcdp_composition(rhos: &[f64], target_delta: f64) -> Result<CompositionResult> {
    let target_delta = validate::open_unit_interval(target_delta, "target_delta")?;
    for &rho in rhos {
        validate::finite_non_negative(rho, "rho")?;
    }
    let rho_total: f64 = rhos.iter().sum();
    let details = detail([
        ("rule", json!("rho-zcdp")),
        ("rho", json!(rho_total)),
        ("delta", json!(target_delta)),
    ]);
    if rho_total == 0.0 {
        return Ok(CompositionResult::zero(details));
    }
    let epsilon = convert::zcdp_to_cdp(rho_total, target_delta)?;
    Ok(CompositionResult::new(epsilon, target_delta, details))
}

/// Sum RDP values at one fixed order and convert at `target_delta`.
pub fn rdp_composition(rdp_epsilons: &[f64], order: f64, target_delta: f64) -> Result<CompositionResult> {
    let order = validate::rdp_order(order)?;
    let target_delta = validate::open_unit_interval(target_delta, "target_delta")?;
    for &value in rdp_epsilons {
        validate::finite_non_negative(value, "rdp epsilon")?;
    }
    let rdp_total: f64 = rdp_epsilons.iter().sum();
    let epsilon = convert::rdp_to_cdp(order, rdp_total, target_delta)?;
    Ok(CompositionResult::new(
        epsilon,
        target_delta,
        detail([
            ("rule", json!("rdp")),
            ("order", json!(order)),
            ("rdp_epsilon", json!(rdp_total)),
            ("delta", json!(target_delta)),
        ]),
    ))
}

/// Combine μ-GDP values in quadrature and convert at `target_delta`.
pub fn gdp_composition(mus: &[f64], target_delta: f64) -> Result<CompositionResult> {
    let target_delta = validate::open_unit_interval(target_delta, "target_delta")?;
    for &mu in mus {
        validate::finite_non_negative(mu, "mu")?;
    }
    let mu_total = mus.iter().map(|mu| mu * mu).sum::<f64>().sqrt();
    let details = detail([
        ("rule", json!("gdp")),
        ("mu", json!(mu_total)),
        ("delta", json!(target_delta)),
    ]);
    if mu_total == 0.0 {
        return Ok(CompositionResult::zero(details));
    }
    let epsilon = convert::gdp_to_cdp(mu_total, target_delta)?;
    Ok(CompositionResult::new(epsilon, target_delta, details))
}

/// Amplification by Poisson subsampling at rate `q ∈ (0, 1]`.
///
/// `ε' = ln(1 + q(e^ε − 1))`, `δ' = q·δ`. Large `ε` is evaluated as
/// `ε + ln(1 + (1 − q)(e^{−ε} − 1))` so the result stays finite.
pub fn subsampling_amplification(
    event: impl Into<EventInput>,
    sampling_rate: f64,
) -> Result<CompositionResult> {
    let event = normalize_event(event)?;
    if !sampling_rate.is_finite() || sampling_rate <= 0.0 || sampling_rate > 1.0 {
        return Err(DpError::invalid("sampling_rate must be in (0, 1]"));
    }
    let eps = event.epsilon();
    let epsilon = if sampling_rate == 1.0 {
        eps
    } else if eps <= 1.0 {
        (sampling_rate * eps.exp_m1()).ln_1p()
    } else {
        eps + ((1.0 - sampling_rate) * (-eps).exp_m1()).ln_1p()
    };
    finite(epsilon, "subsampling amplification")?;
    Ok(CompositionResult::new(
        epsilon,
        sampling_rate * event.delta(),
        detail([
            ("rule", json!("subsampling")),
            ("sampling_rate", json!(sampling_rate)),
        ]),
    ))
}

/// Amplification by shuffling `n` reports: `ε/√n`, `δ/√n`.
pub fn shuffle_amplification(event: impl Into<EventInput>, n: u64) -> Result<CompositionResult> {
    let event = normalize_event(event)?;
    if n == 0 {
        return Err(DpError::invalid("population size must be positive"));
    }
    let root = (n as f64).sqrt();
    Ok(CompositionResult::new(
        event.epsilon() / root,
        event.delta() / root,
        detail([("rule", json!("shuffle")), ("n", json!(n))]),
    ))
}

/// The shared `(ε, δ)` when every event costs the same, else `None`.
pub fn uniform_cost(events: &[PrivacyEvent]) -> Option<(f64, f64)> {
    let first = events.first()?;
    events
        .iter()
        .all(|e| e.same_cost(first))
        .then(|| (first.epsilon(), first.delta()))
}

/// Strong composition for homogeneous events, advanced otherwise.
///
/// The advanced branch uses `delta_hat` as its `delta_prime`.
pub fn optimal_composition_fallback(events: &[PrivacyEvent], delta_hat: f64) -> Result<CompositionResult> {
    let delta_hat = validate::open_unit_interval(delta_hat, "delta_hat")?;
    if events.is_empty() {
        return Ok(CompositionResult::zero(detail([
            ("rule", json!("optimal_fallback")),
            ("note", json!("no events")),
        ])));
    }
    let (mut result, strategy) = match uniform_cost(events) {
        Some((epsilon, delta)) => {
            let k = u32::try_from(events.len())
                .map_err(|_| DpError::invalid("too many events for strong composition"))?;
            (strong_composition(epsilon, delta, k, delta_hat)?, "strong")
        }
        None => (advanced_composition(events, delta_hat)?, "advanced"),
    };
    result
        .detail
        .insert("rule".into(), json!("optimal_fallback"));
    result.detail.insert("strategy".into(), json!(strategy));
    Ok(result)
}

/// Read one numeric metadata field from every event, failing when any is absent.
pub fn metadata_values(events: &[PrivacyEvent], candidates: &[&str]) -> Result<Vec<f64>> {
    events
        .iter()
        .map(|event| {
            keys::extract_f64(event.metadata(), candidates)?.ok_or_else(|| {
                DpError::invalid(format!(
                    "missing '{}' in event metadata",
                    candidates.join("|")
                ))
            })
        })
        .collect()
}

fn finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DpError::numerical(format!("{what} overflowed")))
    }
}

/// [`advanced_composition`] as a rule.
#[derive(Clone, Debug)]
pub struct AdvancedCompositionRule {
    delta_prime: f64,
}

impl AdvancedCompositionRule {
    /// Rule with a fixed `delta_prime`.
    pub fn new(delta_prime: f64) -> Result<Self> {
        Ok(Self {
            delta_prime: validate::open_unit_interval(delta_prime, "delta_prime")?,
        })
    }

    /// Compose with a per-call `delta_prime` override.
    pub fn apply_with(&self, events: &[PrivacyEvent], delta_prime: Option<f64>) -> Result<CompositionResult> {
        advanced_composition(events, delta_prime.unwrap_or(self.delta_prime))
    }
}

impl CompositionRule for AdvancedCompositionRule {
    fn name(&self) -> &str {
        "advanced"
    }

    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult> {
        self.apply_with(events, None)
    }
}

/// ρ-zCDP composition reading `rho` from each event's metadata.
#[derive(Clone, Debug)]
pub struct RhoZcdpCompositionRule {
    target_delta: f64,
    rho_keys: Vec<&'static str>,
}

impl RhoZcdpCompositionRule {
    /// Rule converting at a fixed `target_delta`.
    pub fn new(target_delta: f64) -> Result<Self> {
        Ok(Self {
            target_delta: validate::open_unit_interval(target_delta, "target_delta")?,
            rho_keys: keys::MetadataKeys::default().rho,
        })
    }

    /// Compose with a per-call `target_delta` override.
    pub fn apply_with(&self, events: &[PrivacyEvent], target_delta: Option<f64>) -> Result<CompositionResult> {
        let rhos = metadata_values(events, &self.rho_keys)?;
        rho_zcdp_composition(&rhos, target_delta.unwrap_or(self.target_delta))
    }
}

impl CompositionRule for RhoZcdpCompositionRule {
    fn name(&self) -> &str {
        "rho-zcdp"
    }

    fn apply(&self, events: &[PrivacyEvent]) -> Result<CompositionResult> {
        self.apply_with(events, None)
    }
}
