//! Global Chebyshev basis fit with a smoothness penalty.
//!
//! The series is modelled as `x(s) = sum a_k T_k(s)` with `s` spanning
//! `[-1, 1]` over the samples. Coefficients minimise
//! `mean (x_fit - x)^2 + gamma * mean (x_fit'')^2` (curvature in `s`
//! units). The normal equations are solved by Jacobi-preconditioned
//! conjugate gradient with an iteration cap.

use nalgebra::{DMatrix, DVector};

use super::{DiffError, DiffResult, Derivatives, Differentiator};
use crate::error::ConfigurationError;

const DEFAULT_MAX_ITERATIONS: usize = 500;
const RELATIVE_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct ChebyshevFit {
    n_basis: usize,
    gamma: f64,
    max_iterations: usize,
}

impl ChebyshevFit {
    pub fn new(n_basis: usize, gamma: f64) -> Result<Self, ConfigurationError> {
        if n_basis < 3 {
            return Err(ConfigurationError::invalid_parameter(
                "basis-fit",
                format!("n_basis must be at least 3, got {}", n_basis),
            ));
        }
        if !(gamma >= 0.0) || !gamma.is_finite() {
            return Err(ConfigurationError::invalid_parameter(
                "basis-fit",
                format!("gamma must be non-negative, got {}", gamma),
            ));
        }
        Ok(Self {
            n_basis,
            gamma,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Iteration cap for the solver; 0 keeps the default.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        if max_iterations > 0 {
            self.max_iterations = max_iterations;
        }
        self
    }
}

/// `T_k(s)`, `T_k'(s)` and `T_k''(s)` for `k < count`.
fn chebyshev_row(s: f64, count: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut t = vec![0.0; count];
    let mut d1 = vec![0.0; count];
    let mut d2 = vec![0.0; count];
    t[0] = 1.0;
    if count > 1 {
        t[1] = s;
        d1[1] = 1.0;
    }
    for k in 1..count.saturating_sub(1) {
        t[k + 1] = 2.0 * s * t[k] - t[k - 1];
        d1[k + 1] = 2.0 * t[k] + 2.0 * s * d1[k] - d1[k - 1];
        d2[k + 1] = 4.0 * d1[k] + 2.0 * s * d2[k] - d2[k - 1];
    }
    (t, d1, d2)
}

/// Jacobi-preconditioned conjugate gradient for a symmetric positive
/// definite system. Returns the solution and the iterations used, or
/// `None` when the cap is reached first.
pub(crate) fn conjugate_gradient(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    max_iterations: usize,
    tolerance: f64,
) -> Option<(DVector<f64>, usize)> {
    let n = b.len();
    let b_norm = b.norm();
    let mut x = DVector::<f64>::zeros(n);
    if b_norm == 0.0 {
        return Some((x, 0));
    }
    let inv_diag = DVector::from_fn(n, |i, _| {
        let d = a[(i, i)];
        if d > 0.0 {
            1.0 / d
        } else {
            1.0
        }
    });

    let mut r = b.clone();
    let mut z = r.component_mul(&inv_diag);
    let mut p = z.clone();
    let mut rz = r.dot(&z);
    for iteration in 1..=max_iterations {
        let ap = a * &p;
        let denom = p.dot(&ap);
        if denom <= 0.0 || !denom.is_finite() {
            return None;
        }
        let alpha = rz / denom;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);
        if r.norm() <= tolerance * b_norm {
            return Some((x, iteration));
        }
        z = r.component_mul(&inv_diag);
        let rz_next = r.dot(&z);
        let beta = rz_next / rz;
        p = &z + beta * &p;
        rz = rz_next;
    }
    None
}

impl Differentiator for ChebyshevFit {
    fn name(&self) -> &str {
        "basis-fit"
    }

    fn min_len(&self) -> usize {
        self.n_basis
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        let n = positions.len();
        let k = self.n_basis;
        let s_of = |i: usize| 2.0 * i as f64 / (n - 1) as f64 - 1.0;

        let mut basis = DMatrix::<f64>::zeros(n, k);
        let mut basis_d1 = DMatrix::<f64>::zeros(n, k);
        let mut basis_d2 = DMatrix::<f64>::zeros(n, k);
        for i in 0..n {
            let (t, d1, d2) = chebyshev_row(s_of(i), k);
            for j in 0..k {
                basis[(i, j)] = t[j];
                basis_d1[(i, j)] = d1[j];
                basis_d2[(i, j)] = d2[j];
            }
        }

        let scale = 1.0 / n as f64;
        let system = (basis.transpose() * &basis + self.gamma * (basis_d2.transpose() * &basis_d2)) * scale;
        let rhs = basis.transpose() * DVector::from_column_slice(positions) * scale;

        let (coeffs, iterations) =
            conjugate_gradient(&system, &rhs, self.max_iterations, RELATIVE_TOLERANCE)
                .ok_or_else(|| DiffError::not_converged(self.name(), self.max_iterations))?;
        tracing::trace!("[Differentiation] basis-fit converged in {} iterations", iterations);

        // ds/dt for the mapping of sample times onto [-1, 1].
        let ds_dt = 2.0 / ((n - 1) as f64 * dt);
        let smoothed = &basis * &coeffs;
        let velocity = (&basis_d1 * &coeffs) * ds_dt;
        let acceleration = (&basis_d2 * &coeffs) * (ds_dt * ds_dt);

        Ok(Derivatives {
            smoothed: smoothed.iter().copied().collect(),
            velocity: velocity.iter().copied().collect(),
            acceleration: acceleration.iter().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_series::*;
    use super::super::differentiate;
    use super::*;

    #[test]
    fn chebyshev_recurrence_matches_closed_forms() {
        let s = 0.3;
        let (t, d1, d2) = chebyshev_row(s, 4);
        // T3 = 4s^3 - 3s, T3' = 12s^2 - 3, T3'' = 24s
        assert!((t[3] - (4.0 * s * s * s - 3.0 * s)).abs() < 1e-12);
        assert!((d1[3] - (12.0 * s * s - 3.0)).abs() < 1e-12);
        assert!((d2[3] - 24.0 * s).abs() < 1e-12);
        assert_eq!(d2[1], 0.0);
        assert!((d2[2] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn conjugate_gradient_solves_small_system() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let (x, iterations) = conjugate_gradient(&a, &b, 50, 1e-12).unwrap();
        assert!((&a * &x - &b).norm() < 1e-10);
        assert!(iterations <= 10);
    }

    #[test]
    fn constant_acceleration_is_recovered() {
        let dt = 0.02;
        let x = constant_acceleration(100, dt, 1.0, 3.0, -2.0);
        let fit = ChebyshevFit::new(6, 1e-9).unwrap();
        let out = differentiate(&fit, &x, dt).unwrap();
        assert!(max_abs_error(&out.velocity, |i| 3.0 - 2.0 * i as f64 * dt, 0..100) < 1e-3);
        assert!(max_abs_error(&out.acceleration, |_| -2.0, 5..95) < 1e-2);
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let dt = 0.01;
        let x = sine(200, dt, 2.0, 1.3);
        let fit = ChebyshevFit::new(20, 1e-6).unwrap().with_max_iterations(1);
        assert!(matches!(
            differentiate(&fit, &x, dt),
            Err(DiffError::NotConverged { iterations: 1, .. })
        ));
    }
}
