//! Total-variation regularized velocity.
//!
//! Finds positions `u` minimising
//! `|u - x|^2 + (gamma / dt) * sum |u[k+2] - 2 u[k+1] + u[k]|`,
//! i.e. a fit whose velocity has small total variation (piecewise constant
//! velocity). The L1 term is handled by iteratively reweighted least
//! squares; each step solves a pentadiagonal system exactly.

use super::finite::second_order;
use super::{DiffError, DiffResult, Derivatives, Differentiator};
use crate::error::ConfigurationError;

const DEFAULT_MAX_ITERATIONS: usize = 500;
const RELATIVE_TOLERANCE: f64 = 1e-6;
/// Upper bound on the reweighting factor; keeps the band factorization
/// well conditioned where the curvature vanishes.
const MAX_WEIGHT: f64 = 1e8;

#[derive(Debug, Clone, Copy)]
pub struct TotalVariation {
    gamma: f64,
    max_iterations: usize,
}

impl TotalVariation {
    pub fn new(gamma: f64) -> Result<Self, ConfigurationError> {
        if !(gamma > 0.0) || !gamma.is_finite() {
            return Err(ConfigurationError::invalid_parameter(
                "total-variation",
                format!("gamma must be positive, got {}", gamma),
            ));
        }
        Ok(Self {
            gamma,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    /// IRLS iteration cap; 0 keeps the default.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        if max_iterations > 0 {
            self.max_iterations = max_iterations;
        }
        self
    }
}

/// Symmetric positive definite matrix with half-bandwidth 2, stored as
/// `band[i][d] = A[i][i - d]`.
struct Pentadiagonal {
    band: Vec<[f64; 3]>,
}

impl Pentadiagonal {
    fn identity(n: usize) -> Self {
        Self {
            band: vec![[1.0, 0.0, 0.0]; n],
        }
    }

    fn add(&mut self, row: usize, col: usize, value: f64) {
        let (i, j) = if row >= col { (row, col) } else { (col, row) };
        self.band[i][i - j] += value;
    }

    /// Banded Cholesky solve; `None` if the matrix is not positive definite.
    fn solve(&self, rhs: &[f64]) -> Option<Vec<f64>> {
        let n = self.band.len();
        let mut l = vec![[0.0f64; 3]; n];
        for i in 0..n {
            for d in (0..=2.min(i)).rev() {
                let j = i - d;
                let mut sum = self.band[i][d];
                // Shared columns k < j within both bands.
                for k in i.saturating_sub(2)..j {
                    sum -= l[i][i - k] * l[j][j - k];
                }
                if d == 0 {
                    if !(sum > 0.0) {
                        return None;
                    }
                    l[i][0] = sum.sqrt();
                } else {
                    l[i][d] = sum / l[j][0];
                }
            }
        }

        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = rhs[i];
            for d in 1..=2.min(i) {
                sum -= l[i][d] * y[i - d];
            }
            y[i] = sum / l[i][0];
        }
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = y[i];
            for d in 1..=2 {
                if i + d < n {
                    sum -= l[i + d][d] * x[i + d];
                }
            }
            x[i] = sum / l[i][0];
        }
        Some(x)
    }
}

fn second_differences(u: &[f64]) -> Vec<f64> {
    u.windows(3).map(|w| w[2] - 2.0 * w[1] + w[0]).collect()
}

impl Differentiator for TotalVariation {
    fn name(&self) -> &str {
        "total-variation"
    }

    fn min_len(&self) -> usize {
        3
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];
        let n = positions.len();
        let weight = self.gamma / dt;
        let data_curvature = second_differences(positions);
        let typical =
            data_curvature.iter().map(|v| v.abs()).sum::<f64>() / data_curvature.len() as f64;
        let epsilon = 1e-4 * typical;

        let mut u = positions.to_vec();
        let mut converged = false;
        for iteration in 1..=self.max_iterations {
            let curvature = second_differences(&u);
            let mut system = Pentadiagonal::identity(n);
            // Solved for the correction d = u - x so rounding in the
            // heavily weighted terms cannot leak into straight segments.
            let mut rhs = vec![0.0; n];
            for (k, c) in curvature.iter().enumerate() {
                // Majorizer of |c| at the current iterate: c^2 / (2 |c0|).
                let w = (0.5 * weight / (c * c + epsilon * epsilon).sqrt()).min(MAX_WEIGHT);
                for a in 0..3 {
                    rhs[k + a] -= w * STENCIL[a] * data_curvature[k];
                    for b in 0..=a {
                        system.add(k + a, k + b, w * STENCIL[a] * STENCIL[b]);
                    }
                }
            }
            let correction = system
                .solve(&rhs)
                .ok_or_else(|| DiffError::singular(self.name()))?;
            let next: Vec<f64> = positions
                .iter()
                .zip(&correction)
                .map(|(x, d)| x + d)
                .collect();

            let change = next
                .iter()
                .zip(&u)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
            u = next;
            if change <= RELATIVE_TOLERANCE * (norm + 1e-12) {
                tracing::trace!(
                    "[Differentiation] total-variation converged in {} iterations",
                    iteration
                );
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(DiffError::not_converged(self.name(), self.max_iterations));
        }

        let velocity = second_order(&u, dt);
        let acceleration = second_order(&velocity, dt);
        Ok(Derivatives {
            smoothed: u,
            velocity,
            acceleration,
        })
    }
}
