//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Each section can be updated independently for atomic section-level updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::Unit;
use crate::differentiation::{DiffAlgorithm, DiffSpec, DEFAULT_CUTOFF_HZ};
use crate::error::ConfigurationError;
use crate::logging::LogLevel;
use crate::matching::MatchConfig;
use crate::tracking::{TrackerKind, TrackingOptions, DEFAULT_POINT_BOX};

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Tracker defaults.
    #[serde(default)]
    pub tracking: TrackingSettings,

    /// Region matcher defaults.
    #[serde(default)]
    pub matching: MatchConfig,

    /// Differentiation defaults.
    #[serde(default)]
    pub differentiation: DifferentiationSettings,

    /// CSV output.
    #[serde(default)]
    pub output: OutputSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Worker pool.
    #[serde(default)]
    pub processing: ProcessingSettings,
}

/// Tracking defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Tracker algorithm name.
    #[serde(default)]
    pub tracker: TrackerKind,

    /// Record box width/height per frame.
    #[serde(default)]
    pub size_tracking: bool,

    /// Edge length of the box seeded around point-only objects (pixels).
    #[serde(default = "default_point_box")]
    pub point_box: f64,
}

fn default_point_box() -> f64 {
    DEFAULT_POINT_BOX
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tracker: TrackerKind::default(),
            size_tracking: false,
            point_box: default_point_box(),
        }
    }
}

impl TrackingSettings {
    pub fn to_options(&self) -> TrackingOptions {
        TrackingOptions {
            tracker: self.tracker,
            size_tracking: self.size_tracking,
            point_box: self.point_box,
        }
    }
}

/// Differentiation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentiationSettings {
    /// Method name or alias.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Positional parameters; empty uses the method defaults.
    #[serde(default)]
    pub params: Vec<f64>,

    /// Pick parameters by grid search.
    #[serde(default)]
    pub optimize: bool,

    /// Cutoff frequency (Hz) for the search.
    #[serde(default = "default_cutoff_hz")]
    pub cutoff_hz: f64,

    /// Named parameters; override positional values.
    #[serde(default)]
    pub options: BTreeMap<String, f64>,
}

fn default_algorithm() -> String {
    DiffAlgorithm::default().name().to_string()
}

fn default_cutoff_hz() -> f64 {
    DEFAULT_CUTOFF_HZ
}

impl Default for DifferentiationSettings {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            params: Vec::new(),
            optimize: false,
            cutoff_hz: default_cutoff_hz(),
            options: BTreeMap::new(),
        }
    }
}

impl DifferentiationSettings {
    /// Resolve into a validated request.
    pub fn to_spec(&self) -> Result<DiffSpec, ConfigurationError> {
        let algorithm: DiffAlgorithm = self.algorithm.parse()?;
        let spec = DiffSpec {
            algorithm,
            params: if self.optimize { Vec::new() } else { self.params.clone() },
            options: self.options.clone(),
            optimize: self.optimize && algorithm.is_parametrised(),
            cutoff_hz: self.cutoff_hz,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// CSV output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Unit of positions and derivatives.
    #[serde(default)]
    pub unit: Unit,

    /// Negate Y so that up is positive.
    #[serde(default = "default_true")]
    pub flip_y: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            unit: Unit::default(),
            flip_y: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is not set.
    #[serde(default)]
    pub level: LogLevel,

    /// Directory for per-run log files; empty disables them.
    #[serde(default)]
    pub log_dir: String,

    /// File receiving a copy of all tracing output; empty disables it.
    #[serde(default)]
    pub log_file: String,

    /// Number of recent lines kept for error summaries.
    #[serde(default = "default_error_tail")]
    pub error_tail: usize,

    /// Prefix run log lines with a timestamp.
    #[serde(default = "default_true")]
    pub show_timestamps: bool,
}

fn default_error_tail() -> usize {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            log_dir: String::new(),
            log_file: String::new(),
            error_tail: default_error_tail(),
            show_timestamps: true,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Parallel videos; 0 uses all cores.
    #[serde(default)]
    pub workers: usize,
}

/// Identifies a config section for targeted updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Tracking,
    Matching,
    Differentiation,
    Output,
    Logging,
    Processing,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 6] = [
        ConfigSection::Tracking,
        ConfigSection::Matching,
        ConfigSection::Differentiation,
        ConfigSection::Output,
        ConfigSection::Logging,
        ConfigSection::Processing,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Tracking => "tracking",
            ConfigSection::Matching => "matching",
            ConfigSection::Differentiation => "differentiation",
            ConfigSection::Output => "output",
            ConfigSection::Logging => "logging",
            ConfigSection::Processing => "processing",
        }
    }

    /// Comment written above the table.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Tracking => "Object tracker defaults",
            ConfigSection::Matching => "Region matching between videos",
            ConfigSection::Differentiation => "Velocity/acceleration estimation",
            ConfigSection::Output => "CSV output",
            ConfigSection::Logging => "Logging configuration",
            ConfigSection::Processing => "Parallel processing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchMethod;

    #[test]
    fn default_settings_serialize() {
        let settings = Settings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("[tracking]"));
        assert!(toml_str.contains("[differentiation]"));
        assert!(toml_str.contains("[output]"));
    }

    #[test]
    fn missing_keys_get_defaults() {
        let settings: Settings = toml::from_str(
            "[tracking]\ntracker = \"KCF\"\n\n[matching]\nmethod = \"template\"\n",
        )
        .unwrap();
        assert_eq!(settings.tracking.tracker, TrackerKind::Kcf);
        assert_eq!(settings.tracking.point_box, DEFAULT_POINT_BOX);
        assert_eq!(settings.matching.method, MatchMethod::Template);
        assert_eq!(settings.matching.threshold, 0.7);
        assert!(settings.output.flip_y);
    }

    #[test]
    fn differentiation_settings_resolve_aliases() {
        let settings = DifferentiationSettings {
            algorithm: "savgol".to_string(),
            params: vec![2.0, 9.0],
            ..Default::default()
        };
        let spec = settings.to_spec().unwrap();
        assert_eq!(spec.algorithm, DiffAlgorithm::SavitzkyGolay);
        assert_eq!(spec.resolved_params().unwrap(), vec![2.0, 9.0, 1.0]);

        let bad = DifferentiationSettings {
            algorithm: "kalman".to_string(),
            ..Default::default()
        };
        assert!(bad.to_spec().is_err());
    }

    #[test]
    fn section_names_are_unique() {
        let mut names: Vec<_> = ConfigSection::ALL.iter().map(|s| s.table_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ConfigSection::ALL.len());
    }
}
