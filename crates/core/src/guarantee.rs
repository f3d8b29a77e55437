//! Privacy guarantees for audit and reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::{Metadata, PrivacyBudget};
use crate::model::{ensure_supported_model, MechanismType, ModelSpec, PrivacyModel};
use crate::Result;

/// A [`ModelSpec`] together with the mechanism that delivers it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyGuarantee {
    /// Model parameters.
    #[serde(flatten)]
    pub spec: ModelSpec,
    /// Mechanism providing the guarantee, if known.
    #[serde(default)]
    pub mechanism: Option<MechanismType>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Reference to the proof or theorem backing the guarantee.
    #[serde(default)]
    pub proof: Option<String>,
    /// Extra metadata carried into reports.
    #[serde(default)]
    pub meta: Metadata,
}

/// Structured report for logs and audit sinks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuaranteeReport {
    /// Mechanism, if known.
    pub mechanism: Option<MechanismType>,
    /// Model the guarantee was stated in.
    pub model: PrivacyModel,
    /// Named numeric parameters.
    pub parameters: BTreeMap<String, f64>,
    /// `name=value` pairs joined with commas.
    pub summary: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Proof reference.
    pub proof: Option<String>,
    /// Extra metadata.
    pub meta: Metadata,
    /// `(ε, δ)` view of the guarantee, when it was folded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_equivalent: Option<PrivacyBudget>,
}

impl PrivacyGuarantee {
    /// Wrap a spec with no mechanism attached.
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            mechanism: None,
            description: None,
            proof: None,
            meta: Metadata::new(),
        }
    }

    /// Build from a spec, checking the mechanism supports its model.
    pub fn from_model_spec(spec: ModelSpec, mechanism: Option<MechanismType>) -> Result<Self> {
        let spec = spec.validate()?;
        if let Some(mechanism) = mechanism {
            ensure_supported_model(mechanism, spec.model())?;
        }
        Ok(Self {
            mechanism,
            ..Self::new(spec)
        })
    }

    /// Attach the delivering mechanism.
    pub fn with_mechanism(mut self, mechanism: MechanismType) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    /// Attach a description.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a proof reference.
    pub fn with_proof<S: Into<String>>(mut self, proof: S) -> Self {
        self.proof = Some(proof.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_meta<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Model of the underlying spec.
    pub fn model(&self) -> PrivacyModel {
        self.spec.model()
    }

    /// Check the parameters and the mechanism/model pairing.
    pub fn validate(&self) -> Result<&Self> {
        self.spec.validate()?;
        if let Some(mechanism) = self.mechanism {
            ensure_supported_model(mechanism, self.spec.model())?;
        }
        Ok(self)
    }

    /// Fold into an `(ε, δ)` guarantee, keeping description, proof and meta.
    pub fn as_cdp_view(&self, delta: Option<f64>, rdp_order: Option<f64>) -> Result<Self> {
        Ok(Self {
            spec: self.spec.as_cdp(delta, rdp_order)?,
            mechanism: self.mechanism,
            description: self.description.clone(),
            proof: self.proof.clone(),
            meta: self.meta.clone(),
        })
    }

    /// Plain snapshot including the parameter map.
    pub fn to_dict(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "parameters".into(),
                serde_json::to_value(self.spec.to_parameters())?,
            );
        }
        Ok(value)
    }

    /// Validated report payload.
    pub fn to_report(&self) -> Result<GuaranteeReport> {
        self.validate()?;
        let parameters: BTreeMap<String, f64> = self
            .spec
            .to_parameters()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let summary = parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(GuaranteeReport {
            mechanism: self.mechanism,
            model: self.spec.model(),
            parameters,
            summary,
            description: self.description.clone(),
            proof: self.proof.clone(),
            meta: self.meta.clone(),
            cdp_equivalent: None,
        })
    }

    /// Report carrying the `(ε, δ)` view computed at `delta`.
    pub fn to_folded_report(
        &self,
        delta: Option<f64>,
        rdp_order: Option<f64>,
    ) -> Result<GuaranteeReport> {
        let mut report = self.to_report()?;
        report.cdp_equivalent = Some(self.spec.cdp_budget(delta, rdp_order)?);
        Ok(report)
    }
}

impl From<ModelSpec> for PrivacyGuarantee {
    fn from(spec: ModelSpec) -> Self {
        Self::new(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unsupported_pairing_is_rejected() {
        let spec = ModelSpec::approx_dp(1.0, 1e-6).unwrap();
        assert!(PrivacyGuarantee::from_model_spec(spec, Some(MechanismType::Grr)).is_err());
        let g = PrivacyGuarantee::new(spec).with_mechanism(MechanismType::Oue);
        assert!(g.validate().is_err());
    }

    #[test]
    fn cdp_view_keeps_context() {
        let g = PrivacyGuarantee::from_model_spec(
            ModelSpec::zcdp(0.2).unwrap(),
            Some(MechanismType::Gaussian),
        )
        .unwrap()
        .with_description("gaussian sum")
        .with_proof("Bun-Steinke 2016");
        let view = g.as_cdp_view(Some(1e-6), None).unwrap();
        assert_eq!(view.model(), PrivacyModel::Cdp);
        assert_eq!(view.description.as_deref(), Some("gaussian sum"));
        assert_eq!(view.mechanism, Some(MechanismType::Gaussian));
    }

    #[test]
    fn report_summary_lists_parameters() {
        let g = PrivacyGuarantee::new(ModelSpec::rdp(4.0, 0.5).unwrap());
        let report = g.to_report().unwrap();
        assert_eq!(report.summary, "alpha=4, epsilon=0.5");
        assert_eq!(report.model, PrivacyModel::Rdp);
        assert!(report.cdp_equivalent.is_none());

        let folded = g.to_folded_report(Some(1e-5), None).unwrap();
        assert_eq!(folded.cdp_equivalent.map(|b| b.delta()), Some(1e-5));
    }

    #[test]
    fn dict_round_trips() {
        let g = PrivacyGuarantee::new(ModelSpec::gdp(0.8).unwrap())
            .with_mechanism(MechanismType::Gaussian)
            .with_meta("dataset", json!("census"));
        let value = g.to_dict().unwrap();
        assert_eq!(value["model"], "gdp");
        assert_eq!(value["parameters"]["mu"], 0.8);
        let back: PrivacyGuarantee = serde_json::from_value(value).unwrap();
        assert_eq!(back, g);
    }
}
