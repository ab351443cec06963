//! Error types for the per-video pipeline.
//!
//! Errors carry context that chains through layers:
//! Video → Step → Operation → Detail

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::ConfigurationError;
use crate::models::SettingsError;
use crate::tracking::TrackingError;
use crate::video::FrameError;

/// Pipeline error with video context.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A step failed during execution.
    #[error("Video '{video}' failed at step '{step_name}': {source}")]
    StepFailed {
        video: String,
        step_name: String,
        #[source]
        source: StepError,
    },
}

impl PipelineError {
    pub fn step_failed(
        video: impl Into<String>,
        step_name: impl Into<String>,
        source: StepError,
    ) -> Self {
        Self::StepFailed {
            video: video.into(),
            step_name: step_name.into(),
            source,
        }
    }

    /// The underlying step error.
    pub fn step_error(&self) -> &StepError {
        match self {
            Self::StepFailed { source, .. } => source,
        }
    }
}

/// Error from a pipeline step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Input validation failed: {0}")]
    InvalidInput(String),

    #[error("Output validation failed: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    FrameSource(#[from] FrameError),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::InvalidOutput(message.into())
    }

    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the error happened before any frame was processed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Settings(_))
    }
}

impl From<TrackingError> for StepError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::Frame(e) => Self::FrameSource(e),
            TrackingError::Configuration(e) => Self::Configuration(e),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Errors that stop a match run before any target is processed.
#[derive(Error, Debug)]
pub enum MatchRunError {
    #[error("Reference video not found: {0}")]
    ReferenceNotFound(PathBuf),

    #[error("No settings file for reference video: {0}")]
    NoReferenceSettings(PathBuf),

    #[error("No objects defined in reference settings")]
    NoObjects,

    #[error("Cannot read frame {frame} from {path}: {source}")]
    ReferenceFrame {
        path: PathBuf,
        frame: u32,
        #[source]
        source: FrameError,
    },

    #[error("No target videos found")]
    NoTargets,
}

/// Result type for step operations.
pub type StepResult<T> = Result<T, StepError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_chains_context() {
        let step_err = StepError::invalid_input("no objects");
        let err = PipelineError::step_failed("clip01.mp4", "Prepare", step_err);
        let msg = err.to_string();
        assert!(msg.contains("clip01.mp4"));
        assert!(msg.contains("Prepare"));
        assert!(msg.contains("no objects"));
    }

    #[test]
    fn tracking_errors_keep_their_category() {
        let err: StepError = TrackingError::Configuration(ConfigurationError::UnknownFps).into();
        assert!(err.is_configuration());
        let err: StepError = TrackingError::Frame(FrameError::FfmpegNotFound).into();
        assert!(matches!(err, StepError::FrameSource(_)));
    }
}
