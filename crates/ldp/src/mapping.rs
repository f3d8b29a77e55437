//! Mapping local usages onto central ledger events.
//!
//! A mapper turns a [`LocalPrivacyUsage`] into an [`LdpToCdpEvent`];
//! [`normalize_cdp_event`] then stamps the provenance context every forwarded
//! event carries under [`LDP_CONTEXT_KEY`].

use dplib_core::{keys, validate, Metadata, MetadataKeys, PrivacyEvent, PrivacyModel, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::usage::LocalPrivacyUsage;

/// Metadata key holding the provenance of a forwarded event.
pub const LDP_CONTEXT_KEY: &str = "ldp_context";

/// Description used when neither the usage nor the mapper provides one.
pub const DEFAULT_DESCRIPTION: &str = "LDP-local-event";

/// Central-side view of one local usage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LdpToCdpEvent {
    /// Epsilon to charge.
    pub epsilon: f64,
    /// Delta to charge.
    #[serde(default)]
    pub delta: f64,
    /// Event description.
    #[serde(default)]
    pub description: Option<String>,
    /// Metadata forwarded with the event.
    #[serde(default)]
    pub metadata: Metadata,
    /// Mechanism identifier, if known.
    #[serde(default)]
    pub mechanism: Option<String>,
    /// Mechanism parameters.
    #[serde(default)]
    pub parameters: Metadata,
}

impl LdpToCdpEvent {
    /// Build the ledger event.
    ///
    /// The event is tagged with the local model; its central equivalent is
    /// the charged `(ε, δ)`.
    pub fn into_privacy_event(self) -> Result<PrivacyEvent> {
        let event = PrivacyEvent::new(self.epsilon, self.delta)?;
        let budget = event.budget();
        Ok(event
            .with_description(
                self.description
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            )
            .with_metadata(self.metadata)
            .with_model(PrivacyModel::Ldp, Some(budget)))
    }
}

/// Pluggable usage-to-event mapping.
pub type LdpToCdpMapper = Box<dyn Fn(&LocalPrivacyUsage) -> Result<LdpToCdpEvent>>;

/// Mapper registered under `name`; only `"default"` is built in.
pub fn mapper_by_name(name: &str) -> Option<LdpToCdpMapper> {
    match name {
        "default" => Some(Box::new(default_ldp_to_cdp_mapper)),
        _ => None,
    }
}

/// Read delta, mechanism and parameters from the usage metadata.
///
/// Keys are searched through the [`MetadataKeys`] alias lists. A missing
/// delta is `0`.
pub fn default_ldp_to_cdp_mapper(usage: &LocalPrivacyUsage) -> Result<LdpToCdpEvent> {
    let aliases = MetadataKeys::default();
    let metadata = usage.metadata.clone();
    let delta = match keys::extract_f64(&metadata, &aliases.delta)? {
        Some(delta) => validate::finite_non_negative(delta, "delta")?,
        None => 0.0,
    };
    let mechanism = keys::extract_string(&metadata, &aliases.mechanism)?;
    let parameters = normalize_parameters(keys::extract_first(&metadata, &aliases.mechanism_params));
    let description = metadata
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    Ok(LdpToCdpEvent {
        epsilon: usage.validate()?,
        delta,
        description,
        metadata,
        mechanism,
        parameters,
    })
}

/// Attach `ldp_context` to a mapped event.
///
/// Fields already present in an existing context are kept. The context
/// always carries `user_id`, `source` and `delta`; `round_id`, `mechanism`
/// and `mechanism_params` are added when known.
pub fn normalize_cdp_event(usage: &LocalPrivacyUsage, event: LdpToCdpEvent) -> Result<LdpToCdpEvent> {
    let delta = validate::finite_non_negative(event.delta, "delta")?;
    let mut metadata = event.metadata;
    let mut context = match metadata.remove(LDP_CONTEXT_KEY) {
        Some(Value::Object(context)) => context,
        _ => Metadata::new(),
    };
    let mut set_default = |key: &str, value: Value| {
        context.entry(key).or_insert(value);
    };
    set_default("user_id", json!(usage.user_key()));
    if let Some(round_id) = usage.round_id {
        set_default("round_id", json!(round_id));
    }
    set_default("source", json!("ldp"));
    if let Some(mechanism) = &event.mechanism {
        set_default("mechanism", json!(mechanism));
    }
    if !event.parameters.is_empty() {
        set_default("mechanism_params", Value::Object(event.parameters.clone()));
    }
    set_default("delta", json!(delta));
    metadata.insert(LDP_CONTEXT_KEY.to_string(), Value::Object(context));
    Ok(LdpToCdpEvent {
        epsilon: validate::finite_non_negative(event.epsilon, "epsilon")?,
        delta,
        description: event
            .description
            .or_else(|| Some(DEFAULT_DESCRIPTION.to_string())),
        metadata,
        mechanism: event.mechanism,
        parameters: event.parameters,
    })
}

fn normalize_parameters(parameters: Option<&Value>) -> Metadata {
    match parameters {
        None | Some(Value::Null) => Metadata::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut wrapped = Metadata::new();
            wrapped.insert("value".to_string(), other.clone());
            wrapped
        }
    }
}
