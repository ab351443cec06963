//! Parameter search for the parametrised methods.
//!
//! Every candidate on a fixed per-method grid is run on the series and
//! scored by `rmse(smoothed - x) + gamma * mean |dv|`, where `gamma` is
//! derived from a cutoff frequency and the sample interval. A higher
//! cutoff lowers `gamma` and favours following the data; a lower one
//! favours smooth velocity.

use rayon::prelude::*;

use super::{differentiate, DiffAlgorithm, DiffError, DiffResult, Derivatives};

/// Outcome of the search.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedChoice {
    /// Resolved parameters of the winner, in `param_names` order.
    pub params: Vec<f64>,
    pub cost: f64,
    pub derivatives: Derivatives,
}

/// Smoothness weight for a cutoff frequency (Hz) and sample interval (s).
pub fn tv_gamma(cutoff_hz: f64, dt: f64) -> f64 {
    (-1.6 * cutoff_hz.ln() - 0.71 * dt.ln() - 5.1).exp()
}

fn logspace(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    if count < 2 {
        return vec![lo];
    }
    let (a, b) = (lo.log10(), hi.log10());
    (0..count)
        .map(|i| 10f64.powf(a + (b - a) * i as f64 / (count - 1) as f64))
        .collect()
}

/// Candidate parameter sets for a series of `len` samples. Empty for
/// methods without parameters and for series too short for any candidate.
pub fn search_grid(algorithm: DiffAlgorithm, len: usize) -> Vec<Vec<f64>> {
    match algorithm {
        DiffAlgorithm::FirstOrder | DiffAlgorithm::SecondOrder => Vec::new(),
        DiffAlgorithm::SavitzkyGolay => {
            let mut grid = Vec::new();
            for order in 2..=4usize {
                for window in (5..=len.min(61)).step_by(2) {
                    if window > order {
                        grid.push(vec![order as f64, window as f64, 1.0]);
                    }
                }
            }
            grid
        }
        DiffAlgorithm::Spectral => {
            if len < 3 {
                return Vec::new();
            }
            logspace(0.02, 1.0, 20).into_iter().map(|c| vec![c]).collect()
        }
        DiffAlgorithm::PolynomialFit => {
            let mut grid = Vec::new();
            for degree in 2..=3usize {
                for window in (5..=len.min(61)).step_by(4) {
                    if window > degree {
                        grid.push(vec![degree as f64, window as f64]);
                    }
                }
            }
            grid
        }
        DiffAlgorithm::BasisFit => {
            let gammas = logspace(1e-8, 1e-1, 8);
            [5usize, 8, 12, 16, 20, 25, 30]
                .into_iter()
                .filter(|&k| k <= len)
                .flat_map(|k| gammas.iter().map(move |&g| vec![k as f64, g, 0.0]))
                .collect()
        }
        DiffAlgorithm::TotalVariation => {
            if len < 3 {
                return Vec::new();
            }
            logspace(1e-4, 1e2, 7).into_iter().map(|g| vec![g, 0.0]).collect()
        }
    }
}

/// Score of one candidate; lower is better.
pub(crate) fn cost(positions: &[f64], derivatives: &Derivatives, gamma: f64) -> f64 {
    let n = positions.len() as f64;
    let rmse = (positions
        .iter()
        .zip(&derivatives.smoothed)
        .map(|(x, s)| (s - x) * (s - x))
        .sum::<f64>()
        / n)
        .sqrt();
    let v = &derivatives.velocity;
    let variation = if v.len() > 1 {
        v.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (v.len() - 1) as f64
    } else {
        0.0
    };
    rmse + gamma * variation
}

fn evaluate(algorithm: DiffAlgorithm, params: &[f64], positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
    let method = algorithm.create(params)?;
    differentiate(method.as_ref(), positions, dt)
}

/// Search the grid and return the cheapest candidate. Candidates that fail
/// are skipped; if all fail, the last failure is returned. Without any
/// candidate the default parameters are used.
pub(crate) fn optimize(
    algorithm: DiffAlgorithm,
    positions: &[f64],
    dt: f64,
    cutoff_hz: f64,
) -> DiffResult<OptimizedChoice> {
    if !(dt > 0.0) || !dt.is_finite() {
        return Err(DiffError::InvalidInterval(dt));
    }
    let gamma = tv_gamma(cutoff_hz, dt);
    let grid = search_grid(algorithm, positions.len());
    if grid.is_empty() {
        let params = algorithm.default_params().to_vec();
        let derivatives = evaluate(algorithm, &params, positions, dt)?;
        return Ok(OptimizedChoice {
            cost: cost(positions, &derivatives, gamma),
            params,
            derivatives,
        });
    }

    let outcomes: Vec<DiffResult<Derivatives>> = grid
        .par_iter()
        .map(|params| evaluate(algorithm, params, positions, dt))
        .collect();

    let mut best: Option<OptimizedChoice> = None;
    let mut last_error = None;
    for (params, outcome) in grid.into_iter().zip(outcomes) {
        match outcome {
            Ok(derivatives) => {
                let score = cost(positions, &derivatives, gamma);
                if best.as_ref().map_or(true, |b| score < b.cost) {
                    best = Some(OptimizedChoice {
                        params,
                        cost: score,
                        derivatives,
                    });
                }
            }
            Err(e) => {
                tracing::trace!(
                    "[Differentiation] {} candidate {:?} skipped: {}",
                    algorithm,
                    params,
                    e
                );
                last_error = Some(e);
            }
        }
    }
    match (best, last_error) {
        (Some(choice), _) => Ok(choice),
        (None, Some(e)) => Err(e),
        (None, None) => Err(DiffError::too_short(algorithm.name(), positions.len(), 3)),
    }
}
