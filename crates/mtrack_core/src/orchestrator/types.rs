//! Core types for the per-video pipeline.

use std::path::{Path, PathBuf};

use crate::calibration::{Calibration, Unit};
use crate::config::Settings;
use crate::differentiation::{AxisDerivatives, DiffSpec};
use crate::error::ConfigurationError;
use crate::logging::RunLogger;
use crate::models::{Section, SettingsDocument};
use crate::tracking::{SectionRun, TrackingOptions};
use crate::video::{FrameResult, FrameSource, VideoOpener};

use super::pipeline::CancelHandle;

/// Options shared by every video of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub tracking: TrackingOptions,
    /// Frame rate used instead of the video's own.
    pub fps_override: Option<f64>,
    pub diff: DiffSpec,
    pub unit: Unit,
    /// Negate Y so that up is positive.
    pub flip_y: bool,
    /// Parallel videos; 0 uses all cores.
    pub workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            tracking: TrackingOptions::default(),
            fps_override: None,
            diff: DiffSpec::default(),
            unit: Unit::Pix,
            flip_y: true,
            workers: 0,
        }
    }
}

impl BatchOptions {
    /// Options from the config file defaults.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigurationError> {
        Ok(Self {
            tracking: settings.tracking.to_options(),
            fps_override: None,
            diff: settings.differentiation.to_spec()?,
            unit: settings.output.unit,
            flip_y: settings.output.flip_y,
            workers: settings.processing.workers,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(fps) = self.fps_override {
            if !(fps > 0.0) || !fps.is_finite() {
                return Err(ConfigurationError::Other(format!(
                    "FPS override must be positive, got {}",
                    fps
                )));
            }
        }
        if !(self.tracking.point_box >= 4.0) {
            return Err(ConfigurationError::Other(format!(
                "point box must be at least 4 pixels, got {}",
                self.tracking.point_box
            )));
        }
        self.diff.validate()
    }
}

/// Read-only context passed to pipeline steps for one video.
pub struct Context<'a> {
    pub video: &'a Path,
    /// File name for log messages.
    pub video_name: String,
    pub options: &'a BatchOptions,
    pub logger: &'a RunLogger,
    pub cancel: &'a CancelHandle,
    opener: &'a dyn VideoOpener,
}

impl<'a> Context<'a> {
    pub fn new(
        video: &'a Path,
        options: &'a BatchOptions,
        logger: &'a RunLogger,
        cancel: &'a CancelHandle,
        opener: &'a dyn VideoOpener,
    ) -> Self {
        let video_name = video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| video.display().to_string());
        Self {
            video,
            video_name,
            options,
            logger,
            cancel,
            opener,
        }
    }

    pub fn open_video(&self) -> FrameResult<Box<dyn FrameSource>> {
        self.opener.open(self.video)
    }
}

/// Derivatives of one object, or why they are missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDerivatives {
    pub object_name: String,
    pub result: Result<AxisDerivatives, String>,
}

/// Mutable state that accumulates results from the steps of one video.
#[derive(Default)]
pub struct VideoState {
    pub document: Option<SettingsDocument>,
    pub calibration: Option<Calibration>,
    pub source: Option<Box<dyn FrameSource>>,
    pub fps: f64,
    pub section: Option<Section>,
    pub run: Option<SectionRun>,
    /// One entry per object, in declaration order.
    pub derivatives: Vec<ObjectDerivatives>,
    pub output_path: Option<PathBuf>,
}

impl VideoState {
    /// Tracking stopped early because of cancellation.
    pub fn is_incomplete(&self) -> bool {
        self.run.as_ref().map_or(false, |run| run.cancelled)
    }

    /// `"<object>: <reason>"` for every object without output.
    pub fn object_failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if let Some(run) = &self.run {
            for trajectory in &run.trajectories {
                if let Some(reason) = &trajectory.failure {
                    failures.push(format!("{}: {}", trajectory.object_name, reason));
                }
            }
        }
        for entry in &self.derivatives {
            if let Err(reason) = &entry.result {
                let tracked_failure = failures
                    .iter()
                    .any(|f| f.starts_with(&format!("{}: ", entry.object_name)));
                if !tracked_failure {
                    failures.push(format!("{}: {}", entry.object_name, reason));
                }
            }
        }
        failures
    }
}

/// Outcome of executing a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    /// Step had nothing to do; the pipeline continues.
    Skipped(String),
    /// Nothing more to do for this video; the pipeline stops without error.
    Halt(String),
}
