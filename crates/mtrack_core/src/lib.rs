//! MotionTracker Core - backend logic for motion tracking and analysis
//!
//! This crate contains all processing logic with zero UI dependencies:
//! - Object tracking across video frames (`tracking`)
//! - Region matching between videos of one experiment (`matching`)
//! - Velocity/acceleration estimation from position series (`differentiation`)
//! - Pixel to physical unit conversion (`calibration`)
//! - Batch and match runs over many videos (`orchestrator`)
//!
//! Front ends such as the `motiontracker` CLI drive it through `orchestrator`.

pub mod calibration;
pub mod config;
pub mod differentiation;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod matching;
pub mod models;
pub mod orchestrator;
pub mod tracking;
pub mod video;

pub use error::{ConfigurationError, Error, Result};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
