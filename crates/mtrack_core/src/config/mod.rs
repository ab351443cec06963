//! Configuration management for MotionTracker.
//!
//! This module provides:
//! - TOML-based defaults for tracking, matching, differentiation and output
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Defaults for every missing key on load
//!
//! Command-line flags override these values per run.
//!
//! # Example
//!
//! ```no_run
//! use mtrack_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new("motiontracker.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Default tracker: {}", config.settings().tracking.tracker);
//!
//! config.settings_mut().output.flip_y = false;
//! config.update_section(ConfigSection::Output).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ConfigSection, DifferentiationSettings, LoggingSettings, OutputSettings, ProcessingSettings,
    Settings, TrackingSettings,
};
