//! Spectral (FFT) derivatives with a low-pass cutoff.
//!
//! The straight line through the end points is removed first so the
//! residual starts and ends at zero; its odd extension is then periodic and
//! smooth enough for an FFT derivative. The line's slope is added back to
//! the velocity.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::{DiffResult, Derivatives, Differentiator};
use crate::error::ConfigurationError;

/// FFT derivative keeping frequencies up to `cutoff` x Nyquist.
#[derive(Debug, Clone, Copy)]
pub struct SpectralDerivative {
    cutoff: f64,
}

impl SpectralDerivative {
    pub fn new(cutoff: f64) -> Result<Self, ConfigurationError> {
        if !(cutoff > 0.0 && cutoff <= 1.0) {
            return Err(ConfigurationError::invalid_parameter(
                "spectral",
                format!("high_freq_cutoff must be in (0, 1], got {}", cutoff),
            ));
        }
        Ok(Self { cutoff })
    }
}

impl Differentiator for SpectralDerivative {
    fn name(&self) -> &str {
        "spectral"
    }

    fn min_len(&self) -> usize {
        3
    }

    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        let n = positions.len();
        let first = positions[0];
        let slope = (positions[n - 1] - first) / (n - 1) as f64;
        let residual: Vec<f64> = positions
            .iter()
            .enumerate()
            .map(|(i, x)| x - first - slope * i as f64)
            .collect();

        // Odd extension: r0..r(n-1), -r(n-2)..-r1.
        let period = 2 * n - 2;
        let mut spectrum: Vec<Complex<f64>> = residual
            .iter()
            .copied()
            .chain(residual[1..n - 1].iter().rev().map(|r| -r))
            .map(|r| Complex::new(r, 0.0))
            .collect();

        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(period).process(&mut spectrum);

        let keep = (self.cutoff * (period / 2) as f64).floor() as usize;
        let omega = |k: usize| -> f64 {
            let signed = if k <= period / 2 { k as f64 } else { k as f64 - period as f64 };
            2.0 * PI * signed / (period as f64 * dt)
        };
        let mut smooth = vec![Complex::new(0.0, 0.0); period];
        let mut first_derivative = smooth.clone();
        let mut second_derivative = smooth.clone();
        for k in 0..period {
            let distance = k.min(period - k);
            if distance > keep {
                continue;
            }
            let w = omega(k);
            smooth[k] = spectrum[k];
            // The Nyquist bin has no well-defined sign for odd derivatives.
            if !(period % 2 == 0 && k == period / 2) {
                first_derivative[k] = spectrum[k] * Complex::new(0.0, w);
            }
            second_derivative[k] = spectrum[k] * (-w * w);
        }

        let inverse = planner.plan_fft_inverse(period);
        let scale = 1.0 / period as f64;
        let back = |mut buffer: Vec<Complex<f64>>| -> Vec<f64> {
            inverse.process(&mut buffer);
            buffer[..n].iter().map(|c| c.re * scale).collect()
        };
        let smoothed_residual = back(smooth);
        let velocity_residual = back(first_derivative);
        let acceleration = back(second_derivative);

        let smoothed = smoothed_residual
            .iter()
            .enumerate()
            .map(|(i, r)| r + first + slope * i as f64)
            .collect();
        let velocity = velocity_residual.iter().map(|v| v + slope / dt).collect();

        Ok(Derivatives {
            smoothed,
            velocity,
            acceleration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_series::*;
    use super::super::differentiate;
    use super::*;

    #[test]
    fn sine_derivatives_inside_the_series() {
        let dt = 0.01;
        let (amp, freq) = (3.0, 2.0);
        let x = sine(500, dt, amp, freq);
        let out = differentiate(&SpectralDerivative::new(0.5).unwrap(), &x, dt).unwrap();
        let omega = 2.0 * PI * freq;
        let v_err = max_abs_error(&out.velocity, |i| amp * omega * (omega * i as f64 * dt).cos(), 50..450);
        assert!(v_err < 0.05 * amp * omega, "velocity error {}", v_err);
    }

    #[test]
    fn straight_line_is_exact() {
        let x = constant_acceleration(40, 0.1, 5.0, -2.0, 0.0);
        let out = differentiate(&SpectralDerivative::new(1.0).unwrap(), &x, 0.1).unwrap();
        assert!(out.velocity.iter().all(|v| (v + 2.0).abs() < 1e-9));
        assert!(out.acceleration.iter().all(|a| a.abs() < 1e-9));
        assert!(max_abs_error(&out.smoothed, |i| x[i], 0..40) < 1e-9);
    }

    #[test]
    fn cutoff_must_be_a_fraction() {
        assert!(SpectralDerivative::new(0.0).is_err());
        assert!(SpectralDerivative::new(1.5).is_err());
    }
}
