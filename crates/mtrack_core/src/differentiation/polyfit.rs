//! Sliding-window polynomial fit.
//!
//! Around every sample a polynomial of `degree` is fitted by weighted least
//! squares (tricube weights centred on the sample) and differentiated at the
//! sample. Windows are shifted inwards at the ends. Each window system is
//! solved through its normal equations.

use nalgebra::{DMatrix, DVector};

use super::{DiffError, DiffResult, Derivatives, Differentiator};
use crate::error::ConfigurationError;

#[derive(Debug, Clone, Copy)]
pub struct PolynomialFit {
    degree: usize,
    window: usize,
}

impl PolynomialFit {
    pub fn new(degree: usize, window: usize) -> Result<Self, ConfigurationError> {
        if degree < 2 {
            return Err(ConfigurationError::invalid_parameter(
                "polynomial-fit",
                format!("degree must be at least 2, got {}", degree),
            ));
        }
        if window < degree + 1 {
            return Err(ConfigurationError::invalid_parameter(
                "polynomial-fit",
                format!("window {} must be at least degree + 1 ({})", window, degree + 1),
            ));
        }
        Ok(Self { degree, window })
    }

    fn solve_at(&self, positions: &[f64], centre: usize) -> DiffResult<(f64, f64, f64)> {
        let n = positions.len();
        let start = centre.saturating_sub(self.window / 2).min(n - self.window);
        let terms = self.degree + 1;
        let farthest = (centre - start).max(start + self.window - 1 - centre);
        let reach = farthest as f64 + 1.0;

        let mut normal = DMatrix::<f64>::zeros(terms, terms);
        let mut rhs = DVector::<f64>::zeros(terms);
        for (j, &x) in positions[start..start + self.window].iter().enumerate() {
            let t = (start + j) as f64 - centre as f64;
            let u = t.abs() / reach;
            let w = (1.0 - u * u * u).powi(3);
            let powers: Vec<f64> = (0..terms).map(|k| t.powi(k as i32)).collect();
            for a in 0..terms {
                rhs[a] += w * powers[a] * x;
                for b in 0..terms {
                    normal[(a, b)] += w * powers[a] * powers[b];
                }
            }
        }

        let coeffs = normal
            .cholesky()
            .ok_or_else(|| DiffError::singular("polynomial-fit"))?
            .solve(&rhs);
        Ok((coeffs[0], coeffs[1], 2.0 * coeffs[2]))
    }
}

impl Differentiator for PolynomialFit {
    fn name(&self) -> &str {
        "polynomial-fit"
    }

    fn min_len(&self) -> usize {
        self.window
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        let n = positions.len();
        let mut out = Derivatives {
            smoothed: Vec::with_capacity(n),
            velocity: Vec::with_capacity(n),
            acceleration: Vec::with_capacity(n),
        };
        for i in 0..n {
            let (value, d1, d2) = self.solve_at(positions, i)?;
            out.smoothed.push(value);
            out.velocity.push(d1 / dt);
            out.acceleration.push(d2 / (dt * dt));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_series::*;
    use super::super::differentiate;
    use super::*;

    #[test]
    fn quadratic_is_recovered_everywhere() {
        let dt = 0.05;
        let x = constant_acceleration(40, dt, -3.0, 2.0, 1.5);
        let out = differentiate(&PolynomialFit::new(2, 9).unwrap(), &x, dt).unwrap();
        assert!(max_abs_error(&out.velocity, |i| 2.0 + 1.5 * i as f64 * dt, 0..40) < 1e-7);
        assert!(max_abs_error(&out.acceleration, |_| 1.5, 0..40) < 1e-5);
    }

    #[test]
    fn cubic_motion_with_higher_degree() {
        let dt = 0.1;
        let x: Vec<f64> = (0..30).map(|i| (i as f64 * dt).powi(3)).collect();
        let out = differentiate(&PolynomialFit::new(3, 7).unwrap(), &x, dt).unwrap();
        let expected = |i: usize| 3.0 * (i as f64 * dt).powi(2);
        assert!(max_abs_error(&out.velocity, expected, 0..30) < 1e-7);
    }

    #[test]
    fn rejects_low_degree_and_small_window() {
        assert!(PolynomialFit::new(1, 9).is_err());
        assert!(PolynomialFit::new(3, 3).is_err());
    }
}
