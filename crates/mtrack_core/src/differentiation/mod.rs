//! Velocity and acceleration from position series.
//!
//! This module defines the `Differentiator` trait, the closed
//! [`DiffAlgorithm`] registry and [`DiffSpec`], which turns user input
//! (algorithm name, positional parameters, named options, optimize flag)
//! into a configured method.
//!
//! Every method is a pure function of `(positions, sample_interval)` and is
//! applied to each axis separately. Methods work in pixel space; unit
//! scaling happens afterwards.
//!
//! # Methods
//!
//! ```text
//! first-order, second-order  -> finite differences (finite.rs)
//! savitzky-golay             -> local polynomial filter (savgol.rs)
//! spectral                   -> FFT derivative with low-pass (spectral.rs)
//! polynomial-fit             -> weighted sliding least squares (polyfit.rs)
//! basis-fit                  -> Chebyshev basis, conjugate gradient (chebyshev.rs)
//! total-variation            -> TV-regularized velocity, IRLS (total_variation.rs)
//! ```

mod chebyshev;
mod finite;
mod optimize;
mod polyfit;
mod savgol;
mod spectral;
mod total_variation;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chebyshev::ChebyshevFit;
pub use finite::{FirstOrderDifference, SecondOrderDifference};
pub use optimize::{search_grid, tv_gamma, OptimizedChoice};
pub use polyfit::PolynomialFit;
pub use savgol::SavitzkyGolay;
pub use spectral::SpectralDerivative;
pub use total_variation::TotalVariation;

use crate::error::ConfigurationError;

/// Errors raised while differentiating one series.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiffError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Not enough samples for the method.
    #[error("{method} needs at least {required} samples, got {len}")]
    TooShort {
        method: String,
        len: usize,
        required: usize,
    },

    /// An iterative solver hit its iteration cap.
    #[error("{method} did not converge within {iterations} iterations")]
    NotConverged { method: String, iterations: usize },

    /// A least-squares system could not be solved.
    #[error("{method}: singular system")]
    Singular { method: String },

    #[error("{method} produced non-finite values")]
    NonFinite { method: String },

    #[error("Invalid sample interval {0}")]
    InvalidInterval(f64),
}

impl DiffError {
    pub fn too_short(method: &str, len: usize, required: usize) -> Self {
        Self::TooShort {
            method: method.to_string(),
            len,
            required,
        }
    }

    pub fn not_converged(method: &str, iterations: usize) -> Self {
        Self::NotConverged {
            method: method.to_string(),
            iterations,
        }
    }

    pub fn singular(method: &str) -> Self {
        Self::Singular {
            method: method.to_string(),
        }
    }
}

/// Result type for differentiation.
pub type DiffResult<T> = Result<T, DiffError>;

/// Output of one method on one axis.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Derivatives {
    /// Position as reconstructed by the method (the input for plain
    /// finite differences).
    pub smoothed: Vec<f64>,
    pub velocity: Vec<f64>,
    pub acceleration: Vec<f64>,
}

impl Derivatives {
    fn is_finite(&self) -> bool {
        self.smoothed
            .iter()
            .chain(&self.velocity)
            .chain(&self.acceleration)
            .all(|v| v.is_finite())
    }
}

/// Trait for differentiation methods.
pub trait Differentiator: Send + Sync {
    /// Name of this method.
    fn name(&self) -> &str;

    /// Minimum series length the method accepts.
    fn min_len(&self) -> usize;

    /// Differentiate a uniformly sampled series.
    ///
    /// Called through [`differentiate`], which checks the interval, the
    /// length and the output.
    fn compute(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives>;
}

/// Run a method with the shared checks.
pub fn differentiate(
    method: &dyn Differentiator,
    positions: &[f64],
    dt: f64,
) -> DiffResult<Derivatives> {
    if !(dt > 0.0) || !dt.is_finite() {
        return Err(DiffError::InvalidInterval(dt));
    }
    if positions.len() < method.min_len() {
        return Err(DiffError::too_short(method.name(), positions.len(), method.min_len()));
    }
    let out = method.compute(positions, dt)?;
    if !out.is_finite() {
        return Err(DiffError::NonFinite {
            method: method.name().to_string(),
        });
    }
    Ok(out)
}

/// Closed set of differentiation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffAlgorithm {
    FirstOrder,
    SecondOrder,
    #[default]
    SavitzkyGolay,
    Spectral,
    PolynomialFit,
    BasisFit,
    TotalVariation,
}

impl DiffAlgorithm {
    pub const ALL: [DiffAlgorithm; 7] = [
        DiffAlgorithm::FirstOrder,
        DiffAlgorithm::SecondOrder,
        DiffAlgorithm::SavitzkyGolay,
        DiffAlgorithm::Spectral,
        DiffAlgorithm::PolynomialFit,
        DiffAlgorithm::BasisFit,
        DiffAlgorithm::TotalVariation,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            DiffAlgorithm::FirstOrder => "first-order",
            DiffAlgorithm::SecondOrder => "second-order",
            DiffAlgorithm::SavitzkyGolay => "savitzky-golay",
            DiffAlgorithm::Spectral => "spectral",
            DiffAlgorithm::PolynomialFit => "polynomial-fit",
            DiffAlgorithm::BasisFit => "basis-fit",
            DiffAlgorithm::TotalVariation => "total-variation",
        }
    }

    /// Accepted spellings besides the canonical name, already normalized
    /// (lowercase, words joined by `-`).
    fn aliases(self) -> &'static [&'static str] {
        match self {
            DiffAlgorithm::FirstOrder => &["first-order-finite-difference", "fd1"],
            DiffAlgorithm::SecondOrder => &["second-order-finite-difference", "fd2"],
            DiffAlgorithm::SavitzkyGolay => &["savgol", "savgoldiff", "savitzky-golay-filter"],
            DiffAlgorithm::Spectral => &["spectraldiff", "spectral-derivative"],
            DiffAlgorithm::PolynomialFit => &["polydiff", "polynomial"],
            DiffAlgorithm::BasisFit => &["chebyshev", "chebydiff", "chebyshev-basis-fit"],
            DiffAlgorithm::TotalVariation => &["tv", "tvrdiff", "total-variation-regularization"],
        }
    }

    /// Ordered parameter names; positional parameters map onto these.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            DiffAlgorithm::FirstOrder | DiffAlgorithm::SecondOrder => &[],
            DiffAlgorithm::SavitzkyGolay => &["order", "window", "smoothing"],
            DiffAlgorithm::Spectral => &["high_freq_cutoff"],
            DiffAlgorithm::PolynomialFit => &["degree", "window"],
            DiffAlgorithm::BasisFit => &["n_basis", "gamma", "max_iterations"],
            DiffAlgorithm::TotalVariation => &["gamma", "max_iterations"],
        }
    }

    /// Default value of every parameter, in `param_names` order.
    pub fn default_params(self) -> &'static [f64] {
        match self {
            DiffAlgorithm::FirstOrder | DiffAlgorithm::SecondOrder => &[],
            DiffAlgorithm::SavitzkyGolay => &[3.0, 15.0, 1.0],
            DiffAlgorithm::Spectral => &[0.5],
            DiffAlgorithm::PolynomialFit => &[2.0, 11.0],
            DiffAlgorithm::BasisFit => &[12.0, 1e-4, 500.0],
            DiffAlgorithm::TotalVariation => &[1e-2, 500.0],
        }
    }

    /// Whether the optimize flag has anything to tune.
    pub fn is_parametrised(self) -> bool {
        !self.param_names().is_empty()
    }

    /// Look a method up by name or alias (case, spaces and underscores
    /// are ignored).
    pub fn from_name(name: &str) -> Option<Self> {
        let key = normalize(name);
        Self::ALL
            .into_iter()
            .find(|a| a.name() == key || a.aliases().contains(&key.as_str()))
    }

    /// Get a list of available method names.
    pub fn available() -> Vec<&'static str> {
        Self::ALL.iter().map(|a| a.name()).collect()
    }

    /// Construct the method with fully resolved parameters.
    pub fn create(self, params: &[f64]) -> Result<Box<dyn Differentiator>, ConfigurationError> {
        let method = self.name();
        let param = |i: usize| params.get(i).copied().unwrap_or(self.default_params()[i]);
        let count = |i: usize| as_count(method, self.param_names()[i], param(i));

        let created: Box<dyn Differentiator> = match self {
            DiffAlgorithm::FirstOrder => Box::new(FirstOrderDifference),
            DiffAlgorithm::SecondOrder => Box::new(SecondOrderDifference),
            DiffAlgorithm::SavitzkyGolay => {
                Box::new(SavitzkyGolay::new(count(0)?, count(1)?, count(2)?)?)
            }
            DiffAlgorithm::Spectral => Box::new(SpectralDerivative::new(param(0))?),
            DiffAlgorithm::PolynomialFit => Box::new(PolynomialFit::new(count(0)?, count(1)?)?),
            DiffAlgorithm::BasisFit => {
                Box::new(ChebyshevFit::new(count(0)?, param(1))?.with_max_iterations(count(2)?))
            }
            DiffAlgorithm::TotalVariation => {
                Box::new(TotalVariation::new(param(0))?.with_max_iterations(count(1)?))
            }
        };
        Ok(created)
    }
}

impl fmt::Display for DiffAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiffAlgorithm {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            ConfigurationError::unknown_algorithm("differentiation", s, &Self::available())
        })
    }
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .split(|c: char| c == ' ' || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// A parameter that must be a non-negative whole number.
fn as_count(method: &str, name: &str, value: f64) -> Result<usize, ConfigurationError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(ConfigurationError::invalid_parameter(
            method,
            format!("{} must be a whole number, got {}", name, value),
        ))
    }
}

/// Default optimization cutoff frequency in Hz.
pub const DEFAULT_CUTOFF_HZ: f64 = 1.0;

/// Differentiation request: method, parameters and optimization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffSpec {
    pub algorithm: DiffAlgorithm,
    /// Positional parameters in `param_names` order.
    pub params: Vec<f64>,
    /// Named parameters; override positional values for the same key.
    pub options: BTreeMap<String, f64>,
    /// Pick parameters by grid search instead of using `params`.
    pub optimize: bool,
    /// Cutoff frequency (Hz) used to weigh smoothness during optimization.
    pub cutoff_hz: f64,
}

impl Default for DiffSpec {
    fn default() -> Self {
        Self {
            algorithm: DiffAlgorithm::default(),
            params: Vec::new(),
            options: BTreeMap::new(),
            optimize: false,
            cutoff_hz: DEFAULT_CUTOFF_HZ,
        }
    }
}

impl DiffSpec {
    pub fn new(algorithm: DiffAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    /// Build a spec from command-line style input.
    ///
    /// `params` is a comma list (`"3,15,1"`); with `optimize` a single value
    /// is the cutoff frequency instead. `options` is a JSON object of named
    /// numeric parameters.
    pub fn parse(
        algorithm: &str,
        params: Option<&str>,
        options: Option<&str>,
        optimize: bool,
    ) -> Result<Self, ConfigurationError> {
        let algorithm: DiffAlgorithm = algorithm.parse()?;
        let mut spec = Self::new(algorithm);
        spec.optimize = optimize && algorithm.is_parametrised();

        let values = match params {
            Some(text) if !text.trim().is_empty() => parse_param_list(algorithm.name(), text)?,
            _ => Vec::new(),
        };
        if spec.optimize {
            match values.as_slice() {
                [] => {}
                [cutoff] => spec.cutoff_hz = *cutoff,
                _ => {
                    return Err(ConfigurationError::invalid_parameter(
                        algorithm.name(),
                        "with optimization the only parameter is the cutoff frequency",
                    ))
                }
            }
        } else {
            spec.params = values;
        }

        if let Some(json) = options.filter(|s| !s.trim().is_empty()) {
            spec.options = parse_options(algorithm.name(), json)?;
        }
        spec.validate()?;
        Ok(spec)
    }

    /// Check parameter counts, option keys and the cutoff.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.resolved_params().map(|_| ())?;
        if self.optimize && !(self.cutoff_hz > 0.0 && self.cutoff_hz.is_finite()) {
            return Err(ConfigurationError::invalid_parameter(
                self.algorithm.name(),
                format!("cutoff frequency must be positive, got {}", self.cutoff_hz),
            ));
        }
        Ok(())
    }

    /// Defaults, overridden by positional values, overridden by options.
    pub fn resolved_params(&self) -> Result<Vec<f64>, ConfigurationError> {
        let method = self.algorithm.name();
        let names = self.algorithm.param_names();
        if self.params.len() > names.len() {
            return Err(ConfigurationError::invalid_parameter(
                method,
                format!(
                    "expected at most {} parameter(s) ({}), got {}",
                    names.len(),
                    names.join(", "),
                    self.params.len()
                ),
            ));
        }
        let mut resolved = self.algorithm.default_params().to_vec();
        resolved[..self.params.len()].copy_from_slice(&self.params);
        for (key, value) in &self.options {
            let index = names.iter().position(|n| n == key).ok_or_else(|| {
                ConfigurationError::UnknownOption {
                    method: method.to_string(),
                    key: key.clone(),
                    expected: if names.is_empty() {
                        "none".to_string()
                    } else {
                        names.join(", ")
                    },
                }
            })?;
            resolved[index] = *value;
        }
        Ok(resolved)
    }

    /// Method with the resolved (not optimized) parameters.
    pub fn build(&self) -> Result<Box<dyn Differentiator>, ConfigurationError> {
        self.algorithm.create(&self.resolved_params()?)
    }

    /// Differentiate one axis.
    pub fn differentiate(&self, positions: &[f64], dt: f64) -> DiffResult<Derivatives> {
        if self.optimize && self.algorithm.is_parametrised() {
            let choice = optimize::optimize(self.algorithm, positions, dt, self.cutoff_hz)?;
            tracing::debug!(
                "[Differentiation] {} optimized parameters {:?} (cost {:.4})",
                self.algorithm,
                choice.params,
                choice.cost
            );
            return Ok(choice.derivatives);
        }
        let method = self.build()?;
        differentiate(method.as_ref(), positions, dt)
    }

    /// Short description for logs and summaries.
    pub fn describe(&self) -> String {
        if self.optimize {
            return format!("{} (optimized, cutoff {} Hz)", self.algorithm, self.cutoff_hz);
        }
        match self.resolved_params() {
            Ok(params) if !params.is_empty() => {
                let pairs: Vec<String> = self
                    .algorithm
                    .param_names()
                    .iter()
                    .zip(&params)
                    .map(|(n, v)| format!("{}={}", n, v))
                    .collect();
                format!("{} ({})", self.algorithm, pairs.join(", "))
            }
            _ => self.algorithm.to_string(),
        }
    }
}

fn parse_param_list(method: &str, text: &str) -> Result<Vec<f64>, ConfigurationError> {
    text.split(',')
        .map(|p| {
            let p = p.trim();
            p.parse::<f64>().map_err(|_| {
                ConfigurationError::invalid_parameter(method, format!("'{}' is not a number", p))
            })
        })
        .collect()
}

fn parse_options(method: &str, json: &str) -> Result<BTreeMap<String, f64>, ConfigurationError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
        ConfigurationError::invalid_parameter(method, format!("options are not valid JSON: {}", e))
    })?;
    let object = value.as_object().ok_or_else(|| {
        ConfigurationError::invalid_parameter(method, "options must be a JSON object")
    })?;
    object
        .iter()
        .map(|(key, v)| {
            let number = v.as_f64().ok_or_else(|| {
                ConfigurationError::invalid_parameter(
                    method,
                    format!("option '{}' must be a number", key),
                )
            })?;
            Ok((key.clone(), number))
        })
        .collect()
}

/// Both axes of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisDerivatives {
    pub x: Derivatives,
    pub y: Derivatives,
}

/// Differentiate the x and y series of one trajectory.
pub fn differentiate_xy(
    spec: &DiffSpec,
    xs: &[f64],
    ys: &[f64],
    dt: f64,
) -> DiffResult<AxisDerivatives> {
    Ok(AxisDerivatives {
        x: spec.differentiate(xs, dt)?,
        y: spec.differentiate(ys, dt)?,
    })
}
