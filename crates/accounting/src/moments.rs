//! Moments accountant over a fixed set of Rényi orders.

use dplib_core::{convert, validate, DpError, PrivacyBudget, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::rdp;

/// Two orders closer than this are the same order.
const ORDER_TOLERANCE: f64 = 1e-12;

/// Orders tracked when none are given.
pub const DEFAULT_ORDERS: [f64; 7] = [1.5, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];

/// Cumulative RDP per order, converted to the tightest `(ε, δ)` on demand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MomentSnapshot", into = "MomentSnapshot")]
pub struct MomentAccountant {
    orders: Vec<f64>,
    rdp: Vec<f64>,
}

/// Serialized form of a [`MomentAccountant`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MomentSnapshot {
    /// Tracked orders.
    pub orders: Vec<f64>,
    /// Cumulative RDP, aligned with `orders`.
    pub rdp: Vec<f64>,
}

impl Default for MomentAccountant {
    fn default() -> Self {
        Self {
            orders: DEFAULT_ORDERS.to_vec(),
            rdp: vec![0.0; DEFAULT_ORDERS.len()],
        }
    }
}

impl MomentAccountant {
    /// Accountant over [`DEFAULT_ORDERS`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Accountant over custom orders; each must exceed 1 and appear once.
    ///
    /// An empty list is accepted, but [`Self::get_epsilon`] then fails.
    pub fn with_orders(orders: Vec<f64>) -> Result<Self> {
        for (i, &order) in orders.iter().enumerate() {
            validate::rdp_order(order)?;
            if orders[..i].iter().any(|&a| (a - order).abs() < ORDER_TOLERANCE) {
                return Err(DpError::invalid(format!("order {order} listed more than once")));
            }
        }
        let rdp = vec![0.0; orders.len()];
        Ok(Self { orders, rdp })
    }

    /// Tracked orders.
    pub fn orders(&self) -> &[f64] {
        &self.orders
    }

    fn slot(&self, order: f64) -> Result<usize> {
        self.orders
            .iter()
            .position(|&a| (a - order).abs() < ORDER_TOLERANCE)
            .ok_or_else(|| DpError::invalid(format!("order {order} not tracked by accountant")))
    }

    /// Accumulate `epsilon` at one tracked order.
    pub fn add_rdp(&mut self, order: f64, epsilon: f64) -> Result<()> {
        let slot = self.slot(order)?;
        let epsilon = validate::finite_non_negative(epsilon, "epsilon")?;
        self.rdp[slot] += epsilon;
        Ok(())
    }

    /// Add one step of `(order, epsilon)` contributions.
    ///
    /// The step is checked in full before anything is accumulated.
    pub fn add_step(&mut self, step: &[(f64, f64)]) -> Result<()> {
        let updates = step
            .iter()
            .map(|&(order, eps)| Ok((self.slot(order)?, validate::finite_non_negative(eps, "epsilon")?)))
            .collect::<Result<Vec<_>>>()?;
        for (slot, eps) in updates {
            self.rdp[slot] += eps;
        }
        Ok(())
    }

    /// Add several steps in order.
    pub fn add_steps<'a, I>(&mut self, steps: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a [(f64, f64)]>,
    {
        for step in steps {
            self.add_step(step)?;
        }
        Ok(())
    }

    /// Add one Poisson-subsampled Gaussian step at every tracked order.
    pub fn add_gaussian_step(&mut self, noise_multiplier: f64, sampling_rate: f64) -> Result<()> {
        self.add_gaussian_steps(noise_multiplier, sampling_rate, 1)
    }

    /// Add `count` identical subsampled Gaussian steps.
    pub fn add_gaussian_steps(&mut self, noise_multiplier: f64, sampling_rate: f64, count: u32) -> Result<()> {
        let curve = rdp::gaussian_rdp_curve(&self.orders, noise_multiplier, sampling_rate)?;
        let scale = f64::from(count);
        for (total, step) in self.rdp.iter_mut().zip(curve) {
            *total += step * scale;
        }
        debug!(noise_multiplier, sampling_rate, count, "gaussian steps added");
        Ok(())
    }

    /// Snapshot of cumulative RDP as `(order, epsilon)`.
    pub fn rdp(&self) -> Vec<(f64, f64)> {
        self.orders
            .iter()
            .copied()
            .zip(self.rdp.iter().copied())
            .collect()
    }

    /// Tightest `ε` at `delta ∈ (0, 1)` over the tracked orders.
    pub fn get_epsilon(&self, delta: f64) -> Result<f64> {
        self.best_order(delta).map(|(_, eps)| eps)
    }

    /// Order achieving the tightest bound at `delta`, with its `ε`.
    pub fn best_order(&self, delta: f64) -> Result<(f64, f64)> {
        let delta = validate::open_unit_interval(delta, "delta")?;
        let mut best: Option<(f64, f64)> = None;
        for (&order, &rdp) in self.orders.iter().zip(&self.rdp) {
            let eps = convert::rdp_to_cdp(order, rdp, delta)?;
            if best.map_or(true, |(_, b)| eps < b) {
                best = Some((order, eps));
            }
        }
        best.ok_or_else(|| DpError::invalid("no RDP orders tracked; cannot compute epsilon"))
    }

    /// `(ε, δ)` spent at `delta`.
    pub fn spent(&self, delta: f64) -> Result<PrivacyBudget> {
        PrivacyBudget::new(self.get_epsilon(delta)?, delta)
    }

    /// Zero every order.
    pub fn reset(&mut self) {
        self.rdp.fill(0.0);
    }

    /// JSON snapshot.
    pub fn serialize(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild from [`Self::serialize`] output.
    pub fn deserialize(value: &Value) -> Result<Self> {
        MomentSnapshot::deserialize(value)?.try_into()
    }
}

impl TryFrom<MomentSnapshot> for MomentAccountant {
    type Error = DpError;

    fn try_from(snapshot: MomentSnapshot) -> Result<Self> {
        if snapshot.orders.len() != snapshot.rdp.len() {
            return Err(DpError::serialization("orders and rdp lengths differ"));
        }
        let mut accountant = Self::with_orders(snapshot.orders)?;
        for (slot, eps) in snapshot.rdp.into_iter().enumerate() {
            accountant.rdp[slot] = validate::finite_non_negative(eps, "rdp")?;
        }
        Ok(accountant)
    }
}

impl From<MomentAccountant> for MomentSnapshot {
    fn from(accountant: MomentAccountant) -> Self {
        Self {
            orders: accountant.orders,
            rdp: accountant.rdp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_untracked_order() {
        let mut acc = MomentAccountant::new();
        assert!(acc.add_rdp(3.0, 0.1).is_err());
        assert!(acc.add_rdp(2.0, -0.1).is_err());
        assert!(MomentAccountant::with_orders(vec![1.0]).is_err());
    }

    #[test]
    fn epsilon_is_minimum_over_orders() {
        let mut acc = MomentAccountant::with_orders(vec![2.0, 8.0]).unwrap();
        acc.add_step(&[(2.0, 0.1), (8.0, 0.5)]).unwrap();
        let at_two = convert::rdp_to_cdp(2.0, 0.1, 1e-5).unwrap();
        let at_eight = convert::rdp_to_cdp(8.0, 0.5, 1e-5).unwrap();
        assert_eq!(acc.get_epsilon(1e-5).unwrap(), at_two.min(at_eight));
        let (order, _) = acc.best_order(1e-5).unwrap();
        assert_eq!(order, if at_two < at_eight { 2.0 } else { 8.0 });
    }

    #[test]
    fn duplicate_orders_are_rejected() {
        assert!(MomentAccountant::with_orders(vec![2.0, 2.0]).unwrap_err().is_validation());
        assert!(MomentAccountant::with_orders(vec![2.0, 4.0, 2.0 + 1e-13]).is_err());
        let snapshot = serde_json::json!({"orders": [2.0, 2.0], "rdp": [5.0, 0.0]});
        assert!(MomentAccountant::deserialize(&snapshot).is_err());

        let mut acc = MomentAccountant::with_orders(vec![2.0]).unwrap();
        acc.add_rdp(2.0, 5.0).unwrap();
        let expected = convert::rdp_to_cdp(2.0, 5.0, 1e-5).unwrap();
        assert_eq!(acc.get_epsilon(1e-5).unwrap(), expected);
    }

    #[test]
    fn empty_orders_fail_on_query() {
        let acc = MomentAccountant::with_orders(Vec::new()).unwrap();
        assert!(acc.get_epsilon(1e-5).is_err());
    }

    #[test]
    fn bad_step_is_atomic() {
        let mut acc = MomentAccountant::new();
        assert!(acc.add_step(&[(2.0, 0.1), (3.0, 0.1)]).is_err());
        assert!(acc.rdp().iter().all(|&(_, eps)| eps == 0.0));
    }

    #[test]
    fn gaussian_steps_accumulate() {
        let mut one = MomentAccountant::new();
        let mut many = MomentAccountant::new();
        for _ in 0..10 {
            one.add_gaussian_step(1.1, 0.01).unwrap();
        }
        many.add_gaussian_steps(1.1, 0.01, 10).unwrap();
        let a = one.get_epsilon(1e-5).unwrap();
        let b = many.get_epsilon(1e-5).unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn reset_and_round_trip() {
        let mut acc = MomentAccountant::new();
        acc.add_steps([&[(2.0, 0.1)][..], &[(4.0, 0.2)][..]]).unwrap();
        let restored = MomentAccountant::deserialize(&acc.serialize().unwrap()).unwrap();
        assert_eq!(restored, acc);
        acc.reset();
        assert!(acc.rdp().iter().all(|&(_, eps)| eps == 0.0));
    }
}
