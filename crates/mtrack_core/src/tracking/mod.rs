//! Single-object visual tracking.
//!
//! This module defines the `TrackerAlgorithm` trait, the closed
//! [`TrackerKind`] registry of algorithm names, and the per-object
//! [`ObjectTracker`] state machine that drives an algorithm over a section
//! of a video.
//!
//! # Engines
//!
//! ```text
//! MOSSE, KCF, CSRT      -> correlation filter (correlation.rs)
//! BOOSTING, MIL         -> NCC template search (template.rs)
//! MEDIANFLOW, TLD       -> median flow (flow.rs)
//! ```

mod correlation;
mod flow;
mod object;
mod runner;
mod template;

use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use correlation::{CorrelationFilter, CorrelationVariant};
pub use flow::MedianFlow;
pub use object::{ObjectTracker, TrackerState};
pub use runner::{track_section, SectionRun};
pub use template::TemplateSearch;

use crate::error::ConfigurationError;
use crate::models::Rect;
use crate::video::FrameError;

/// Default edge length of the box seeded around a point-only object.
pub const DEFAULT_POINT_BOX: f64 = 20.0;

/// Errors raised while tracking.
#[derive(Error, Debug)]
pub enum TrackingError {
    /// The algorithm could not be initialized on the first frame.
    #[error("{tracker} failed to initialize: {reason}")]
    InitFailed { tracker: String, reason: String },

    /// The frame source failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Invalid tracking configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl TrackingError {
    pub fn init_failed(tracker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InitFailed {
            tracker: tracker.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for tracking operations.
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Outcome of one tracker update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackUpdate {
    pub bbox: Rect,
    pub success: bool,
    /// Engine-specific confidence (PSR, NCC score or surviving point ratio).
    pub confidence: f64,
}

impl TrackUpdate {
    pub fn success(bbox: Rect, confidence: f64) -> Self {
        Self {
            bbox,
            success: true,
            confidence,
        }
    }

    pub fn failure(previous: Rect, confidence: f64) -> Self {
        Self {
            bbox: previous,
            success: false,
            confidence,
        }
    }
}

/// Trait for single-object tracking algorithms.
///
/// Implementations are constructed fresh per object per run, initialized
/// once on the first frame, then updated frame by frame.
pub trait TrackerAlgorithm: Send {
    /// Name of the algorithm.
    fn name(&self) -> &str;

    /// Learn the target appearance from the first frame.
    fn init(&mut self, frame: &GrayImage, bbox: Rect) -> TrackingResult<()>;

    /// Locate the target in the next frame given its previous box.
    fn update(&mut self, frame: &GrayImage, previous: Rect) -> TrackUpdate;

    /// Confine searches to a region of the frame.
    fn set_search_bounds(&mut self, _bounds: Option<Rect>) {}
}

/// Closed set of tracker names accepted in settings and on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackerKind {
    #[default]
    Csrt,
    Boosting,
    Mil,
    Kcf,
    Tld,
    MedianFlow,
    Mosse,
}

impl TrackerKind {
    /// All trackers in registry order.
    pub const ALL: [TrackerKind; 7] = [
        TrackerKind::Csrt,
        TrackerKind::Boosting,
        TrackerKind::Mil,
        TrackerKind::Kcf,
        TrackerKind::Tld,
        TrackerKind::MedianFlow,
        TrackerKind::Mosse,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            TrackerKind::Csrt => "CSRT",
            TrackerKind::Boosting => "BOOSTING",
            TrackerKind::Mil => "MIL",
            TrackerKind::Kcf => "KCF",
            TrackerKind::Tld => "TLD",
            TrackerKind::MedianFlow => "MEDIANFLOW",
            TrackerKind::Mosse => "MOSSE",
        }
    }

    /// Look up a tracker by name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        let wanted = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::unknown_algorithm("tracker", wanted, &Self::available()))
    }

    /// Names of all available trackers.
    pub fn available() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.name()).collect()
    }

    /// Construct a fresh algorithm instance.
    pub fn create(self) -> Box<dyn TrackerAlgorithm> {
        match self {
            TrackerKind::Mosse => Box::new(CorrelationFilter::new(CorrelationVariant::Mosse)),
            TrackerKind::Kcf => Box::new(CorrelationFilter::new(CorrelationVariant::Kcf)),
            TrackerKind::Csrt => Box::new(CorrelationFilter::new(CorrelationVariant::Csrt)),
            TrackerKind::Boosting => Box::new(TemplateSearch::boosting()),
            TrackerKind::Mil => Box::new(TemplateSearch::mil()),
            TrackerKind::MedianFlow => Box::new(MedianFlow::new()),
            TrackerKind::Tld => Box::new(MedianFlow::with_validation()),
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackerKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Options shared by all objects of a tracking run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingOptions {
    pub tracker: TrackerKind,
    /// Record box width/height per sample.
    pub size_tracking: bool,
    /// Edge length of the box seeded around point-only objects.
    pub point_box: f64,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            tracker: TrackerKind::default(),
            size_tracking: false,
            point_box: DEFAULT_POINT_BOX,
        }
    }
}

/// Box must contain at least this many pixels per side to initialize.
pub(crate) const MIN_BOX_SIDE: f64 = 4.0;

/// Validate a seed box against the frame.
pub(crate) fn check_init_box(tracker: &str, frame: &GrayImage, bbox: Rect) -> TrackingResult<()> {
    if bbox.width < MIN_BOX_SIDE || bbox.height < MIN_BOX_SIDE {
        return Err(TrackingError::init_failed(
            tracker,
            format!("box {}x{} is too small", bbox.width, bbox.height),
        ));
    }
    let (w, h) = frame.dimensions();
    let frame_rect = Rect::new(0.0, 0.0, w as f64, h as f64);
    if !frame_rect.contains(&bbox.center()) {
        return Err(TrackingError::init_failed(
            tracker,
            "box centre lies outside the frame",
        ));
    }
    Ok(())
}
