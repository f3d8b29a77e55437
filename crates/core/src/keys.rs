//! Metadata key aliases.
//!
//! Loosely-typed metadata is read through ordered candidate lists: the first
//! key present wins. The lists are data, so callers can swap in their own.

use serde_json::Value;

use crate::budget::Metadata;
use crate::{DpError, Result};

/// Ordered candidate keys for every metadata field the accountants read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataKeys {
    /// Delta of a forwarded local event.
    pub delta: Vec<&'static str>,
    /// Mechanism name.
    pub mechanism: Vec<&'static str>,
    /// Mechanism parameters.
    pub mechanism_params: Vec<&'static str>,
    /// zCDP rho.
    pub rho: Vec<&'static str>,
    /// RDP epsilon at a fixed order.
    pub rdp_epsilon: Vec<&'static str>,
    /// GDP mu.
    pub mu: Vec<&'static str>,
}

impl Default for MetadataKeys {
    fn default() -> Self {
        Self {
            delta: vec!["delta", "cdp_delta", "ldp_delta"],
            mechanism: vec!["mechanism", "mechanism_id", "mechanism_name"],
            mechanism_params: vec!["mechanism_params", "parameters", "mechanism_parameters"],
            rho: vec!["rho"],
            rdp_epsilon: vec!["rdp_epsilon"],
            mu: vec!["mu"],
        }
    }
}

/// Return the value under the first candidate key present in `metadata`.
pub fn extract_first<'a>(metadata: &'a Metadata, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| metadata.get(*key))
}

/// Like [`extract_first`], but require the value to be a finite number.
///
/// Returns `Ok(None)` when no candidate key is present.
pub fn extract_f64(metadata: &Metadata, keys: &[&str]) -> Result<Option<f64>> {
    match extract_first(metadata, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let number = value.as_f64().ok_or_else(|| {
                DpError::invalid(format!("metadata '{}' must be numeric", keys.join("|")))
            })?;
            if !number.is_finite() {
                return Err(DpError::invalid(format!(
                    "metadata '{}' must be finite",
                    keys.join("|")
                )));
            }
            Ok(Some(number))
        }
    }
}

/// Read a string value under the first candidate key.
///
/// Non-string scalars are rendered to text; nested values are rejected.
pub fn extract_string(metadata: &Metadata, keys: &[&str]) -> Result<Option<String>> {
    match extract_first(metadata, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(DpError::invalid(format!(
            "metadata '{}' must be a scalar",
            keys.join("|")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn first_present_key_wins() {
        let keys = MetadataKeys::default();
        let m = meta(json!({"ldp_delta": 1e-3, "cdp_delta": 1e-4}));
        assert_eq!(extract_f64(&m, &keys.delta).unwrap(), Some(1e-4));
    }

    #[test]
    fn missing_keys_yield_none() {
        let keys = MetadataKeys::default();
        let m = meta(json!({"other": 1}));
        assert_eq!(extract_f64(&m, &keys.delta).unwrap(), None);
        assert_eq!(extract_string(&m, &keys.mechanism).unwrap(), None);
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let m = meta(json!({"rho": "high"}));
        assert!(extract_f64(&m, &["rho"]).is_err());
    }
}
