//! Crate-level error types.
//!
//! Errors carry context that chains through layers:
//! Run → Video → Object → Detail
//!
//! Module-specific errors (`FrameError`, `TrackingError`, `MatchError`,
//! `DiffError`, `SettingsError`, `ConfigError`) live next to the code that raises them and convert into
//! the aggregate [`Error`].

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::differentiation::DiffError;
use crate::matching::MatchError;
use crate::models::SettingsError;
use crate::orchestrator::{MatchRunError, PipelineError};
use crate::tracking::TrackingError;
use crate::video::FrameError;

/// Invalid user-supplied configuration, reported before any processing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A physical unit was requested but the settings carry no ruler.
    #[error("Unit '{unit}' requires a ruler in the settings document")]
    UnitRequiresRuler { unit: String },

    /// Ruler endpoints are the same pixel, so no scale can be derived.
    #[error("Ruler endpoints coincide")]
    DegenerateRuler,

    /// Ruler real-world length is zero, negative or not finite.
    #[error("Ruler length must be positive, got {0} mm")]
    InvalidRulerLength(f64),

    /// Unknown output unit name.
    #[error("Unknown unit '{0}' (expected pix, mm or m)")]
    UnknownUnit(String),

    /// Algorithm name not present in the registry for its family.
    #[error("Unsupported {family} algorithm '{name}' (available: {available})")]
    UnknownAlgorithm {
        family: &'static str,
        name: String,
        available: String,
    },

    /// Savitzky-Golay window/order combination cannot be fitted.
    #[error(
        "Invalid Savitzky-Golay configuration: window {window} must be odd and at least \
         polynomial order + 1 ({order} + 1), and order must be at least 2"
    )]
    InvalidSavitzkyGolay { order: usize, window: usize },

    /// A method parameter is out of range or malformed.
    #[error("Invalid parameter for {method}: {message}")]
    InvalidParameter { method: String, message: String },

    /// An option key does not name a parameter of the method.
    #[error("Unknown option '{key}' for {method} (expected one of: {expected})")]
    UnknownOption {
        method: String,
        key: String,
        expected: String,
    },

    /// Size tracking requested for an object without a rectangle.
    #[error("Object '{0}' needs a rectangle for size tracking")]
    SizeTrackingNeedsRectangle(String),

    /// The section does not fit the video.
    #[error("Section [{start}, {stop}] is outside the video (frame count {frame_count})")]
    SectionOutOfRange {
        start: u32,
        stop: u32,
        frame_count: u32,
    },

    /// The frame rate could not be determined and no override was given.
    #[error("Cannot detect FPS; specify an FPS override")]
    UnknownFps,

    /// The settings document failed validation.
    #[error("Malformed settings document: {0}")]
    Settings(String),

    /// Generic configuration problem.
    #[error("{0}")]
    Other(String),
}

impl ConfigurationError {
    /// Create an unknown-algorithm error listing the registry contents.
    pub fn unknown_algorithm(
        family: &'static str,
        name: impl Into<String>,
        available: &[&str],
    ) -> Self {
        Self::UnknownAlgorithm {
            family,
            name: name.into(),
            available: available.join(", "),
        }
    }

    /// Create an invalid-parameter error.
    pub fn invalid_parameter(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            method: method.into(),
            message: message.into(),
        }
    }
}

/// Aggregate error for library entry points.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Frame source error: {0}")]
    FrameSource(#[from] FrameError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchError),

    #[error("Differentiation failed: {0}")]
    Differentiation(#[from] DiffError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Config file error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    MatchRun(#[from] MatchRunError),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type for library entry points.
pub type Result<T> = std::result::Result<T, Error>;
