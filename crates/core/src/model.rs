//! Privacy model and mechanism registry.
//!
//! [`PrivacyModel`] names each privacy representation, [`MechanismType`]
//! names each mechanism, and a static support matrix records which models a
//! mechanism can be analysed under. [`ModelSpec`] carries the numeric
//! parameters of one model and folds itself into an `(ε, δ)` view.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::budget::PrivacyBudget;
use crate::config::DEFAULT_CONVERSION_DELTA;
use crate::convert;
use crate::validate;
use crate::{DpError, Result};

/// Supported privacy models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyModel {
    /// (ε, δ)-DP.
    Cdp,
    /// (ε, 0)-DP.
    PureDp,
    /// Local ε-DP.
    Ldp,
    /// ρ-zCDP.
    Zcdp,
    /// (α, ε)-RDP.
    Rdp,
    /// μ-GDP.
    Gdp,
}

impl PrivacyModel {
    /// Every model, in registry order.
    pub const ALL: [PrivacyModel; 6] = [
        Self::Cdp,
        Self::PureDp,
        Self::Ldp,
        Self::Zcdp,
        Self::Rdp,
        Self::Gdp,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cdp => "cdp",
            Self::PureDp => "pure_dp",
            Self::Ldp => "ldp",
            Self::Zcdp => "zcdp",
            Self::Rdp => "rdp",
            Self::Gdp => "gdp",
        }
    }
}

impl fmt::Display for PrivacyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyModel {
    type Err = DpError;

    fn from_str(name: &str) -> Result<Self> {
        let lowered = name.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == lowered)
            .ok_or_else(|| DpError::invalid(format!("unknown privacy model '{name}'")))
    }
}

/// Supported mechanism identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismType {
    /// Laplace mechanism.
    Laplace,
    /// Gaussian mechanism.
    Gaussian,
    /// Exponential mechanism.
    Exponential,
    /// Two-sided geometric mechanism.
    Geometric,
    /// Staircase mechanism.
    Staircase,
    /// Vector-valued mechanism.
    Vector,
    /// Generalized randomized response.
    Grr,
    /// Optimized unary encoding.
    Oue,
    /// Optimized local hashing.
    Olh,
    /// RAPPOR.
    Rappor,
    /// Generic unary randomizer.
    UnaryRandomizer,
    /// Local Laplace perturbation.
    LocalLaplace,
    /// Local Gaussian perturbation.
    LocalGaussian,
    /// Piecewise mechanism.
    Piecewise,
    /// Duchi et al. mechanism.
    Duchi,
}

impl MechanismType {
    /// Every mechanism, in registry order.
    pub const ALL: [MechanismType; 15] = [
        Self::Laplace,
        Self::Gaussian,
        Self::Exponential,
        Self::Geometric,
        Self::Staircase,
        Self::Vector,
        Self::Grr,
        Self::Oue,
        Self::Olh,
        Self::Rappor,
        Self::UnaryRandomizer,
        Self::LocalLaplace,
        Self::LocalGaussian,
        Self::Piecewise,
        Self::Duchi,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Laplace => "laplace",
            Self::Gaussian => "gaussian",
            Self::Exponential => "exponential",
            Self::Geometric => "geometric",
            Self::Staircase => "staircase",
            Self::Vector => "vector",
            Self::Grr => "grr",
            Self::Oue => "oue",
            Self::Olh => "olh",
            Self::Rappor => "rappor",
            Self::UnaryRandomizer => "unary_randomizer",
            Self::LocalLaplace => "local_laplace",
            Self::LocalGaussian => "local_gaussian",
            Self::Piecewise => "piecewise",
            Self::Duchi => "duchi",
        }
    }

    /// The model the mechanism delivers under its usual calibration.
    pub fn default_model(&self) -> PrivacyModel {
        match self {
            Self::Laplace | Self::Exponential | Self::Geometric | Self::Staircase => {
                PrivacyModel::PureDp
            }
            Self::Gaussian | Self::Vector => PrivacyModel::Cdp,
            _ => PrivacyModel::Ldp,
        }
    }

    /// Every model the mechanism can be analysed under.
    pub fn supported_models(&self) -> &'static [PrivacyModel] {
        use PrivacyModel::*;
        match self {
            Self::Laplace | Self::Exponential | Self::Geometric | Self::Staircase => {
                &[PureDp, Cdp]
            }
            Self::Gaussian => &[Cdp, Zcdp, Rdp, Gdp],
            Self::Vector => &[Cdp],
            _ => &[Ldp],
        }
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MechanismType {
    type Err = DpError;

    fn from_str(name: &str) -> Result<Self> {
        let normalized = name.to_ascii_lowercase().replace(' ', "_");
        let canonical = match normalized.as_str() {
            "unary" | "unary_encoding" | "ue" => "unary_randomizer",
            "laplace_local" => "local_laplace",
            "gaussian_local" => "local_gaussian",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == canonical)
            .ok_or_else(|| DpError::invalid(format!("unknown mechanism '{name}'")))
    }
}

/// Canonical model delivered by `mechanism`.
pub fn mechanism_default_model(mechanism: MechanismType) -> PrivacyModel {
    mechanism.default_model()
}

/// Whether `mechanism` can be analysed under `model`.
pub fn mechanism_supports(mechanism: MechanismType, model: PrivacyModel) -> bool {
    mechanism.supported_models().contains(&model)
}

/// Fail unless `mechanism` can be analysed under `model`.
pub fn ensure_supported_model(mechanism: MechanismType, model: PrivacyModel) -> Result<()> {
    if mechanism_supports(mechanism, model) {
        return Ok(());
    }
    let supported: Vec<&str> = mechanism
        .supported_models()
        .iter()
        .map(PrivacyModel::as_str)
        .collect();
    Err(DpError::invalid(format!(
        "mechanism '{mechanism}' supports models [{}] but got '{model}'",
        supported.join(", ")
    )))
}

/// Names of every registered model and mechanism.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Model names.
    pub privacy_models: Vec<&'static str>,
    /// Mechanism names.
    pub mechanisms: Vec<&'static str>,
}

/// Snapshot of the registry for tooling and documentation.
pub fn registry_snapshot() -> RegistrySnapshot {
    RegistrySnapshot {
        privacy_models: PrivacyModel::ALL.iter().map(PrivacyModel::as_str).collect(),
        mechanisms: MechanismType::ALL.iter().map(MechanismType::as_str).collect(),
    }
}

/// Parameters of one privacy model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelSpec {
    /// (ε, 0)-DP.
    PureDp {
        /// Privacy loss.
        epsilon: f64,
    },
    /// (ε, δ)-DP.
    #[serde(rename = "cdp")]
    ApproxDp {
        /// Privacy loss.
        epsilon: f64,
        /// Failure probability.
        delta: f64,
    },
    /// ρ-zCDP.
    Zcdp {
        /// Concentration parameter.
        rho: f64,
    },
    /// (α, ε)-RDP.
    Rdp {
        /// Rényi order.
        alpha: f64,
        /// Rényi divergence bound at `alpha`.
        epsilon: f64,
    },
    /// μ-GDP.
    Gdp {
        /// Gaussian trade-off parameter.
        mu: f64,
    },
    /// Local ε-DP.
    Ldp {
        /// Local privacy loss.
        epsilon: f64,
    },
}

impl ModelSpec {
    /// Validated pure-DP spec.
    pub fn pure_dp(epsilon: f64) -> Result<Self> {
        Self::PureDp { epsilon }.validate()
    }

    /// Validated approximate-DP spec.
    pub fn approx_dp(epsilon: f64, delta: f64) -> Result<Self> {
        Self::ApproxDp { epsilon, delta }.validate()
    }

    /// Validated zCDP spec.
    pub fn zcdp(rho: f64) -> Result<Self> {
        Self::Zcdp { rho }.validate()
    }

    /// Validated RDP spec.
    pub fn rdp(alpha: f64, epsilon: f64) -> Result<Self> {
        Self::Rdp { alpha, epsilon }.validate()
    }

    /// Validated GDP spec.
    pub fn gdp(mu: f64) -> Result<Self> {
        Self::Gdp { mu }.validate()
    }

    /// Validated LDP spec.
    pub fn ldp(epsilon: f64) -> Result<Self> {
        Self::Ldp { epsilon }.validate()
    }

    /// The model this spec describes.
    pub fn model(&self) -> PrivacyModel {
        match self {
            Self::PureDp { .. } => PrivacyModel::PureDp,
            Self::ApproxDp { .. } => PrivacyModel::Cdp,
            Self::Zcdp { .. } => PrivacyModel::Zcdp,
            Self::Rdp { .. } => PrivacyModel::Rdp,
            Self::Gdp { .. } => PrivacyModel::Gdp,
            Self::Ldp { .. } => PrivacyModel::Ldp,
        }
    }

    /// Check every parameter against its model's domain.
    pub fn validate(self) -> Result<Self> {
        match self {
            Self::PureDp { epsilon } | Self::Ldp { epsilon } => {
                validate::finite_non_negative(epsilon, "epsilon")?;
            }
            Self::ApproxDp { epsilon, delta } => {
                validate::finite_non_negative(epsilon, "epsilon")?;
                if !delta.is_finite() || !(0.0..1.0).contains(&delta) {
                    return Err(DpError::invalid("delta must be in [0, 1)"));
                }
            }
            Self::Zcdp { rho } => {
                validate::finite_non_negative(rho, "rho")?;
            }
            Self::Rdp { alpha, epsilon } => {
                validate::rdp_order(alpha)?;
                validate::finite_non_negative(epsilon, "rdp epsilon")?;
            }
            Self::Gdp { mu } => {
                validate::positive(mu, "mu")?;
            }
        }
        Ok(self)
    }

    /// Compact `(model, parameters...)` form.
    pub fn to_tuple(&self) -> (PrivacyModel, Vec<f64>) {
        let values = match *self {
            Self::PureDp { epsilon } | Self::Ldp { epsilon } => vec![epsilon],
            Self::ApproxDp { epsilon, delta } => vec![epsilon, delta],
            Self::Zcdp { rho } => vec![rho],
            Self::Rdp { alpha, epsilon } => vec![alpha, epsilon],
            Self::Gdp { mu } => vec![mu],
        };
        (self.model(), values)
    }

    /// Named numeric parameters present on this spec.
    pub fn to_parameters(&self) -> BTreeMap<&'static str, f64> {
        let mut params = BTreeMap::new();
        match *self {
            Self::PureDp { epsilon } | Self::Ldp { epsilon } => {
                params.insert("epsilon", epsilon);
            }
            Self::ApproxDp { epsilon, delta } => {
                params.insert("epsilon", epsilon);
                params.insert("delta", delta);
            }
            Self::Zcdp { rho } => {
                params.insert("rho", rho);
            }
            Self::Rdp { alpha, epsilon } => {
                params.insert("alpha", alpha);
                params.insert("epsilon", epsilon);
            }
            Self::Gdp { mu } => {
                params.insert("mu", mu);
            }
        }
        params
    }

    /// Fold this spec into an approximate-DP spec.
    ///
    /// `delta` is the target for zCDP/RDP/GDP conversions and defaults to
    /// [`DEFAULT_CONVERSION_DELTA`]. `rdp_order` overrides the RDP spec's own
    /// order.
    pub fn as_cdp(&self, delta: Option<f64>, rdp_order: Option<f64>) -> Result<Self> {
        let spec = self.validate()?;
        let target = delta.unwrap_or(DEFAULT_CONVERSION_DELTA);
        match spec {
            Self::ApproxDp { .. } => Ok(spec),
            Self::PureDp { epsilon } | Self::Ldp { epsilon } => {
                let (epsilon, delta) = convert::ldp_to_cdp(epsilon)?;
                Ok(Self::ApproxDp { epsilon, delta })
            }
            Self::Zcdp { rho } => {
                validate::open_unit_interval(target, "target delta")?;
                let epsilon = if rho == 0.0 {
                    0.0
                } else {
                    convert::zcdp_to_cdp(rho, target)?
                };
                Ok(Self::ApproxDp {
                    epsilon,
                    delta: target,
                })
            }
            Self::Rdp { alpha, epsilon } => {
                let order = rdp_order.unwrap_or(alpha);
                let epsilon = convert::rdp_to_cdp(order, epsilon, target)?;
                Ok(Self::ApproxDp {
                    epsilon,
                    delta: target,
                })
            }
            Self::Gdp { mu } => Ok(Self::ApproxDp {
                epsilon: convert::gdp_to_cdp(mu, target)?,
                delta: target,
            }),
        }
    }

    /// The `(ε, δ)` budget of the CDP view.
    pub fn cdp_budget(&self, delta: Option<f64>, rdp_order: Option<f64>) -> Result<PrivacyBudget> {
        match self.as_cdp(delta, rdp_order)? {
            Self::ApproxDp { epsilon, delta } => PrivacyBudget::new(epsilon, delta),
            other => Err(DpError::numerical(format!(
                "conversion of {} did not yield a cdp spec",
                other.model()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_round_trip() {
        for model in PrivacyModel::ALL {
            assert_eq!(model.as_str().parse::<PrivacyModel>().unwrap(), model);
        }
        assert_eq!("ZCDP".parse::<PrivacyModel>().unwrap(), PrivacyModel::Zcdp);
        assert!("fancy".parse::<PrivacyModel>().is_err());
    }

    #[test]
    fn mechanism_aliases() {
        assert_eq!("ue".parse::<MechanismType>().unwrap(), MechanismType::UnaryRandomizer);
        assert_eq!(
            "Unary Encoding".parse::<MechanismType>().unwrap(),
            MechanismType::UnaryRandomizer
        );
        assert_eq!("laplace_local".parse::<MechanismType>().unwrap(), MechanismType::LocalLaplace);
        assert_eq!(
            "gaussian_local".parse::<MechanismType>().unwrap(),
            MechanismType::LocalGaussian
        );
        assert!("nope".parse::<MechanismType>().is_err());
    }

    #[test]
    fn support_matrix() {
        assert!(ensure_supported_model(MechanismType::Grr, PrivacyModel::Ldp).is_ok());
        assert!(ensure_supported_model(MechanismType::Grr, PrivacyModel::Cdp).is_err());
        assert!(mechanism_supports(MechanismType::Gaussian, PrivacyModel::Rdp));
        assert!(!mechanism_supports(MechanismType::Laplace, PrivacyModel::Zcdp));
        assert_eq!(
            mechanism_default_model(MechanismType::Laplace),
            PrivacyModel::PureDp
        );
    }

    #[test]
    fn snapshot_lists_everything() {
        let snap = registry_snapshot();
        assert_eq!(snap.privacy_models.len(), PrivacyModel::ALL.len());
        assert!(snap.mechanisms.contains(&"duchi"));
    }

    #[test]
    fn spec_validation() {
        assert!(ModelSpec::rdp(1.0, 0.1).is_err());
        assert!(ModelSpec::gdp(0.0).is_err());
        assert!(ModelSpec::approx_dp(0.1, 1.0).is_err());
        assert!(ModelSpec::zcdp(0.0).is_ok());
    }

    #[test]
    fn spec_serializes_with_model_tag() {
        let spec = ModelSpec::approx_dp(0.5, 1e-6).unwrap();
        let value = serde_json::to_value(spec).unwrap();
        assert_eq!(value["model"], "cdp");
        let back: ModelSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn as_cdp_conversions() {
        let pure = ModelSpec::pure_dp(0.7).unwrap().as_cdp(None, None).unwrap();
        assert_eq!(pure, ModelSpec::ApproxDp { epsilon: 0.7, delta: 0.0 });

        let z = ModelSpec::zcdp(0.5).unwrap().cdp_budget(Some(1e-5), None).unwrap();
        assert_eq!(z.epsilon(), convert::zcdp_to_cdp(0.5, 1e-5).unwrap());
        assert_eq!(z.delta(), 1e-5);

        let r = ModelSpec::rdp(8.0, 0.5).unwrap();
        let at_own = r.cdp_budget(Some(1e-5), None).unwrap();
        let at_other = r.cdp_budget(Some(1e-5), Some(16.0)).unwrap();
        assert!(at_other.epsilon() < at_own.epsilon());

        let g = ModelSpec::gdp(1.0).unwrap().cdp_budget(None, None).unwrap();
        assert_eq!(g.delta(), DEFAULT_CONVERSION_DELTA);
    }

    #[test]
    fn parameters_and_tuple() {
        let spec = ModelSpec::rdp(4.0, 0.2).unwrap();
        let params = spec.to_parameters();
        assert_eq!(params.get("alpha"), Some(&4.0));
        assert_eq!(params.get("epsilon"), Some(&0.2));
        assert_eq!(spec.to_tuple(), (PrivacyModel::Rdp, vec![4.0, 0.2]));
    }
}
