//! Finite difference derivatives.

use super::{DiffResult, Derivatives, Differentiator};

/// First-order differences: central averages of neighbouring forward
/// differences inside, forward/backward at the ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstOrderDifference;

/// Second-order differences: central inside, second-order one-sided
/// stencils at the ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecondOrderDifference;

pub(crate) fn first_order(x: &[f64], dt: f64) -> Vec<f64> {
    let n = x.len();
    let diffs: Vec<f64> = x.windows(2).map(|w| (w[1] - w[0]) / dt).collect();
    let mut out = Vec::with_capacity(n);
    out.push(diffs[0]);
    for i in 1..n - 1 {
        out.push(0.5 * (diffs[i - 1] + diffs[i]));
    }
    out.push(diffs[n - 2]);
    out
}

pub(crate) fn second_order(x: &[f64], dt: f64) -> Vec<f64> {
    let n = x.len();
    let mut out = Vec::with_capacity(n);
    out.push((-3.0 * x[0] + 4.0 * x[1] - x[2]) / (2.0 * dt));
    for i in 1..n - 1 {
        out.push((x[i + 1] - x[i - 1]) / (2.0 * dt));
    }
    out.push((3.0 * x[n - 1] - 4.0 * x[n - 2] + x[n - 3]) / (2.0 * dt));
    out
}

impl Differentiator for FirstOrderDifference {
    fn name(&self) -> &str {
        "first-order"
    }

    fn min_len(&self) -> usize {
        2
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        let velocity = first_order(positions, dt);
        let acceleration = first_order(&velocity, dt);
        Ok(Derivatives {
            smoothed: positions.to_vec(),
            velocity,
            acceleration,
        })
    }
}

impl Differentiator for SecondOrderDifference {
    fn name(&self) -> &str {
        "second-order"
    }

    fn min_len(&self) -> usize {
        3
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        let velocity = second_order(positions, dt);
        let acceleration = second_order(&velocity, dt);
        Ok(Derivatives {
            smoothed: positions.to_vec(),
            velocity,
            acceleration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_series::*;
    use super::super::{differentiate, DiffError};
    use super::*;

    #[test]
    fn first_order_is_exact_for_lines() {
        let x = constant_acceleration(10, 0.5, 3.0, 4.0, 0.0);
        let out = differentiate(&FirstOrderDifference, &x, 0.5).unwrap();
        assert!(out.velocity.iter().all(|v| (v - 4.0).abs() < 1e-12));
        assert!(out.acceleration.iter().all(|a| a.abs() < 1e-12));
        assert_eq!(out.smoothed, x);
    }

    #[test]
    fn second_order_is_exact_for_parabolas() {
        let dt = 0.1;
        let x = constant_acceleration(20, dt, 0.0, 1.0, 6.0);
        let out = differentiate(&SecondOrderDifference, &x, dt).unwrap();
        for (i, v) in out.velocity.iter().enumerate() {
            assert!((v - (1.0 + 6.0 * i as f64 * dt)).abs() < 1e-9, "v[{}] = {}", i, v);
        }
        assert!(out.acceleration.iter().all(|a| (a - 6.0).abs() < 1e-6));
    }

    #[test]
    fn minimum_lengths() {
        assert!(differentiate(&FirstOrderDifference, &[1.0, 2.0], 1.0).is_ok());
        assert!(matches!(
            differentiate(&SecondOrderDifference, &[1.0, 2.0], 1.0),
            Err(DiffError::TooShort { required: 3, .. })
        ));
    }
}
