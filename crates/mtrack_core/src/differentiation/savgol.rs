//! Savitzky-Golay derivatives.
//!
//! A polynomial of `order` is least-squares fitted to every window of
//! `window` samples and differentiated analytically. The fit is a fixed
//! linear filter, computed once. Near the ends the first/last full window
//! is fitted and evaluated off-centre, so no padding is needed.

use nalgebra::DMatrix;

use super::{DiffResult, Derivatives, Differentiator};
use crate::error::ConfigurationError;

/// Savitzky-Golay filter.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    order: usize,
    window: usize,
    smoothing: usize,
    /// Rows map a window of samples to polynomial coefficients, with the
    /// abscissa in samples relative to the window centre.
    coefficients: DMatrix<f64>,
}

impl SavitzkyGolay {
    /// `smoothing` is the width of a centred moving average applied to the
    /// derivatives afterwards; 0 or 1 disables it.
    pub fn new(order: usize, window: usize, smoothing: usize) -> Result<Self, ConfigurationError> {
        let invalid = ConfigurationError::InvalidSavitzkyGolay { order, window };
        if order < 2 || window % 2 == 0 || window < order + 1 {
            return Err(invalid);
        }

        let half = (window / 2) as f64;
        let vandermonde = DMatrix::from_fn(window, order + 1, |r, c| (r as f64 - half).powi(c as i32));
        let normal = vandermonde.transpose() * &vandermonde;
        let inverse = normal.try_inverse().ok_or(invalid)?;
        let coefficients = inverse * vandermonde.transpose();

        Ok(Self {
            order,
            window,
            smoothing,
            coefficients,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn fit(&self, samples: &[f64]) -> Vec<f64> {
        (0..=self.order)
            .map(|k| {
                self.coefficients
                    .row(k)
                    .iter()
                    .zip(samples)
                    .map(|(c, s)| c * s)
                    .sum()
            })
            .collect()
    }
}

/// Value, first and second derivative of `sum c_k t^k` at `t`.
fn evaluate(coeffs: &[f64], t: f64) -> (f64, f64, f64) {
    let mut value = 0.0;
    let mut d1 = 0.0;
    let mut d2 = 0.0;
    for (k, c) in coeffs.iter().enumerate() {
        let k = k as i32;
        value += c * t.powi(k);
        if k >= 1 {
            d1 += c * k as f64 * t.powi(k - 1);
        }
        if k >= 2 {
            d2 += c * (k * (k - 1)) as f64 * t.powi(k - 2);
        }
    }
    (value, d1, d2)
}

/// Centred moving average; the window shrinks symmetrically at the ends so
/// straight lines pass unchanged.
pub(crate) fn moving_average(values: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 {
        return values.to_vec();
    }
    let half = width / 2;
    let n = values.len();
    (0..n)
        .map(|i| {
            let h = half.min(i).min(n - 1 - i);
            let slice = &values[i - h..=i + h];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

impl Differentiator for SavitzkyGolay {
    fn name(&self) -> &str {
        "savitzky-golay"
    }

    fn min_len(&self) -> usize {
        self.window
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        let n = positions.len();
        let half = self.window / 2;
        let mut smoothed = Vec::with_capacity(n);
        let mut velocity = Vec::with_capacity(n);
        let mut acceleration = Vec::with_capacity(n);

        // Interior windows are centred; the ends reuse the first/last fit.
        let head = self.fit(&positions[..self.window]);
        let tail = self.fit(&positions[n - self.window..]);
        for i in 0..n {
            let (value, d1, d2) = if i < half {
                evaluate(&head, i as f64 - half as f64)
            } else if i + half >= n {
                evaluate(&tail, (i + half + 1 - n) as f64)
            } else {
                let c = self.fit(&positions[i - half..=i + half]);
                (c[0], c[1], 2.0 * c[2])
            };
            smoothed.push(value);
            velocity.push(d1 / dt);
            acceleration.push(d2 / (dt * dt));
        }

        Ok(Derivatives {
            smoothed,
            velocity: moving_average(&velocity, self.smoothing),
            acceleration: moving_average(&acceleration, self.smoothing),
        })
    }
}
