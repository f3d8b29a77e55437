//! Noise mechanisms, seen through the narrow interface the accountants need.
//!
//! A mechanism is configured with its privacy parameters, calibrated against
//! a sensitivity, and only then able to randomise values. Accountants only
//! ever look at [`Mechanism::guarantee`].

use rand::Rng;
use rand_distr::{Distribution, Exp, Geometric, Normal};
use serde::{Deserialize, Serialize};

use crate::guarantee::PrivacyGuarantee;
use crate::model::{MechanismType, ModelSpec};
use crate::validate;
use crate::{DpError, Result};

/// Calibrate-then-randomise lifecycle shared by all mechanisms.
pub trait Mechanism {
    /// Registry identity of the mechanism.
    fn mechanism_type(&self) -> MechanismType;

    /// Derive the noise parameters for the given sensitivity.
    fn calibrate(&mut self, sensitivity: f64) -> Result<()>;

    /// Whether [`Mechanism::calibrate`] has succeeded.
    fn is_calibrated(&self) -> bool;

    /// Perturb a single value. Fails with `NotCalibrated` before calibration.
    fn randomise<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> Result<f64>;

    /// Snapshot of the configuration.
    fn serialize(&self) -> MechanismSnapshot;

    /// Privacy guarantee delivered by one invocation.
    fn guarantee(&self) -> Result<PrivacyGuarantee>;
}

/// Serialized view of a mechanism.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MechanismSnapshot {
    /// Registry identity.
    pub mechanism: MechanismType,
    /// Privacy loss.
    pub epsilon: f64,
    /// Failure probability.
    pub delta: f64,
    /// Calibrated sensitivity, if any.
    pub sensitivity: Option<f64>,
    /// Calibrated noise parameter (Laplace scale, Gaussian sigma, geometric p).
    pub noise_parameter: Option<f64>,
    /// Whether the mechanism is calibrated.
    pub calibrated: bool,
}

fn require_calibrated(param: Option<f64>) -> Result<f64> {
    param.ok_or_else(|| DpError::not_calibrated("mechanism not calibrated; call calibrate() first"))
}

/// Laplace mechanism, `b = Δ/ε`.
#[derive(Clone, Debug)]
pub struct LaplaceMechanism {
    epsilon: f64,
    sensitivity: Option<f64>,
    scale: Option<f64>,
}

impl LaplaceMechanism {
    /// Create an uncalibrated Laplace mechanism.
    pub fn new(epsilon: f64) -> Result<Self> {
        Ok(Self {
            epsilon: validate::positive(epsilon, "epsilon")?,
            sensitivity: None,
            scale: None,
        })
    }

    /// Calibrated scale `b`.
    pub fn scale(&self) -> Option<f64> {
        self.scale
    }
}

impl Mechanism for LaplaceMechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::Laplace
    }

    fn calibrate(&mut self, sensitivity: f64) -> Result<()> {
        let sensitivity = validate::positive(sensitivity, "sensitivity")?;
        self.sensitivity = Some(sensitivity);
        self.scale = Some(sensitivity / self.epsilon);
        tracing::debug!(epsilon = self.epsilon, sensitivity, "laplace mechanism calibrated");
        Ok(())
    }

    fn is_calibrated(&self) -> bool {
        self.scale.is_some()
    }

    fn randomise<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> Result<f64> {
        let scale = require_calibrated(self.scale)?;
        // Laplace(b) is the difference of two Exp(1/b) draws.
        let dist = Exp::new(1.0 / scale).map_err(|e| DpError::numerical(e.to_string()))?;
        Ok(value + dist.sample(rng) - dist.sample(rng))
    }

    fn serialize(&self) -> MechanismSnapshot {
        MechanismSnapshot {
            mechanism: self.mechanism_type(),
            epsilon: self.epsilon,
            delta: 0.0,
            sensitivity: self.sensitivity,
            noise_parameter: self.scale,
            calibrated: self.is_calibrated(),
        }
    }

    fn guarantee(&self) -> Result<PrivacyGuarantee> {
        PrivacyGuarantee::from_model_spec(ModelSpec::pure_dp(self.epsilon)?, Some(self.mechanism_type()))
    }
}

/// Classic Gaussian mechanism, `σ = Δ·√(2·ln(1.25/δ))/ε`.
#[derive(Clone, Debug)]
pub struct GaussianMechanism {
    epsilon: f64,
    delta: f64,
    sensitivity: Option<f64>,
    sigma: Option<f64>,
}

impl GaussianMechanism {
    /// Create an uncalibrated Gaussian mechanism.
    pub fn new(epsilon: f64, delta: f64) -> Result<Self> {
        Ok(Self {
            epsilon: validate::positive(epsilon, "epsilon")?,
            delta: validate::open_unit_interval(delta, "delta")?,
            sensitivity: None,
            sigma: None,
        })
    }

    /// Calibrated standard deviation.
    pub fn sigma(&self) -> Option<f64> {
        self.sigma
    }
}

impl Mechanism for GaussianMechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::Gaussian
    }

    fn calibrate(&mut self, sensitivity: f64) -> Result<()> {
        let sensitivity = validate::positive(sensitivity, "sensitivity")?;
        let sigma = sensitivity * (2.0 * (1.25 / self.delta).ln()).sqrt() / self.epsilon;
        self.sensitivity = Some(sensitivity);
        self.sigma = Some(sigma);
        tracing::debug!(epsilon = self.epsilon, delta = self.delta, sigma, "gaussian mechanism calibrated");
        Ok(())
    }

    fn is_calibrated(&self) -> bool {
        self.sigma.is_some()
    }

    fn randomise<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> Result<f64> {
        let sigma = require_calibrated(self.sigma)?;
        let dist = Normal::new(0.0, sigma).map_err(|e| DpError::numerical(e.to_string()))?;
        Ok(value + dist.sample(rng))
    }

    fn serialize(&self) -> MechanismSnapshot {
        MechanismSnapshot {
            mechanism: self.mechanism_type(),
            epsilon: self.epsilon,
            delta: self.delta,
            sensitivity: self.sensitivity,
            noise_parameter: self.sigma,
            calibrated: self.is_calibrated(),
        }
    }

    fn guarantee(&self) -> Result<PrivacyGuarantee> {
        PrivacyGuarantee::from_model_spec(
            ModelSpec::approx_dp(self.epsilon, self.delta)?,
            Some(self.mechanism_type()),
        )
    }
}

/// Two-sided geometric mechanism for integer queries, `p = 1 − e^{−ε/Δ}`.
#[derive(Clone, Debug)]
pub struct GeometricMechanism {
    epsilon: f64,
    sensitivity: Option<f64>,
    p: Option<f64>,
}

impl GeometricMechanism {
    /// Create an uncalibrated geometric mechanism.
    pub fn new(epsilon: f64) -> Result<Self> {
        Ok(Self {
            epsilon: validate::positive(epsilon, "epsilon")?,
            sensitivity: None,
            p: None,
        })
    }

    /// Calibrated success probability.
    pub fn p(&self) -> Option<f64> {
        self.p
    }
}

impl Mechanism for GeometricMechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::Geometric
    }

    fn calibrate(&mut self, sensitivity: f64) -> Result<()> {
        let sensitivity = validate::positive(sensitivity, "sensitivity")?;
        let p = 1.0 - (-self.epsilon / sensitivity).exp();
        if !(p > 0.0 && p <= 1.0) {
            return Err(DpError::numerical("geometric parameter underflowed"));
        }
        self.sensitivity = Some(sensitivity);
        self.p = Some(p);
        tracing::debug!(epsilon = self.epsilon, sensitivity, p, "geometric mechanism calibrated");
        Ok(())
    }

    fn is_calibrated(&self) -> bool {
        self.p.is_some()
    }

    /// Rounds `value` to the nearest integer before adding noise.
    fn randomise<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> Result<f64> {
        let p = require_calibrated(self.p)?;
        let dist = Geometric::new(p).map_err(|e| DpError::numerical(e.to_string()))?;
        let noise = dist.sample(rng) as f64 - dist.sample(rng) as f64;
        Ok(value.round() + noise)
    }

    fn serialize(&self) -> MechanismSnapshot {
        MechanismSnapshot {
            mechanism: self.mechanism_type(),
            epsilon: self.epsilon,
            delta: 0.0,
            sensitivity: self.sensitivity,
            noise_parameter: self.p,
            calibrated: self.is_calibrated(),
        }
    }

    fn guarantee(&self) -> Result<PrivacyGuarantee> {
        PrivacyGuarantee::from_model_spec(ModelSpec::pure_dp(self.epsilon)?, Some(self.mechanism_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrivacyModel;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn randomise_requires_calibration() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mech = LaplaceMechanism::new(1.0).unwrap();
        let err = mech.randomise(3.0, &mut rng).unwrap_err();
        assert!(matches!(err, DpError::NotCalibrated { .. }));
    }

    #[test]
    fn calibration_formulas() {
        let mut lap = LaplaceMechanism::new(0.5).unwrap();
        lap.calibrate(2.0).unwrap();
        assert_eq!(lap.scale(), Some(4.0));

        let mut gauss = GaussianMechanism::new(1.0, 1e-5).unwrap();
        gauss.calibrate(1.0).unwrap();
        let expected = (2.0 * (1.25f64 / 1e-5).ln()).sqrt();
        assert!((gauss.sigma().unwrap() - expected).abs() < 1e-12);

        let mut geo = GeometricMechanism::new(1.0).unwrap();
        geo.calibrate(1.0).unwrap();
        assert!((geo.p().unwrap() - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(LaplaceMechanism::new(0.0).is_err());
        assert!(GaussianMechanism::new(1.0, 0.0).is_err());
        let mut lap = LaplaceMechanism::new(1.0).unwrap();
        assert!(lap.calibrate(-1.0).is_err());
        assert!(!lap.is_calibrated());
    }

    #[test]
    fn laplace_is_deterministic_under_seed() {
        let mut lap = LaplaceMechanism::new(1.0).unwrap();
        lap.calibrate(1.0).unwrap();
        let mut a = ChaCha8Rng::seed_from_u64(42);
        let mut b = ChaCha8Rng::seed_from_u64(42);
        assert_eq!(
            lap.randomise(10.0, &mut a).unwrap(),
            lap.randomise(10.0, &mut b).unwrap()
        );
    }

    #[test]
    fn gaussian_noise_statistics() {
        let mut gauss = GaussianMechanism::new(1.0, 1e-5).unwrap();
        gauss.calibrate(1.0).unwrap();
        let sigma = gauss.sigma().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let n = 10_000;
        let samples: Vec<f64> = (0..n)
            .map(|_| gauss.randomise(0.0, &mut rng).unwrap())
            .collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.2 * sigma);
        assert!((var.sqrt() / sigma - 1.0).abs() < 0.05);
    }

    #[test]
    fn geometric_outputs_integers() {
        let mut geo = GeometricMechanism::new(0.5).unwrap();
        geo.calibrate(1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let out = geo.randomise(4.4, &mut rng).unwrap();
            assert_eq!(out, out.round());
        }
    }

    #[test]
    fn guarantees_and_snapshots() {
        let mut gauss = GaussianMechanism::new(0.8, 1e-6).unwrap();
        assert!(!gauss.serialize().calibrated);
        gauss.calibrate(1.0).unwrap();
        let snap = gauss.serialize();
        assert!(snap.calibrated);
        assert_eq!(snap.noise_parameter, gauss.sigma());
        assert_eq!(gauss.guarantee().unwrap().model(), PrivacyModel::Cdp);
        assert_eq!(
            LaplaceMechanism::new(1.0).unwrap().guarantee().unwrap().model(),
            PrivacyModel::PureDp
        );
    }
}
