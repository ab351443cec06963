//! Tracking output series.

use serde::{Deserialize, Serialize};

use super::geometry::Point;

/// Per-sample tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    Tracked,
    Lost,
}

impl TrackingState {
    pub fn is_tracked(self) -> bool {
        self == TrackingState::Tracked
    }
}

/// One frame of a tracked object's trajectory (pixel space).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub frame_index: u32,
    pub time_secs: f64,
    pub x: f64,
    pub y: f64,
    /// Box width/height, recorded in size-tracking mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<(f64, f64)>,
    pub state: TrackingState,
}

impl TrajectorySample {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Full trajectory of one object over a section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub object_name: String,
    pub samples: Vec<TrajectorySample>,
    /// Set when the object could not be tracked at all (e.g. the source
    /// failed or the tracker could not initialize).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Trajectory {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            samples: Vec::new(),
            failure: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.x).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.y).collect()
    }

    pub fn lost_count(&self) -> usize {
        self.samples.iter().filter(|s| !s.state.is_tracked()).count()
    }

    /// Index of the first lost sample, if tracking was ever lost.
    pub fn first_loss(&self) -> Option<usize> {
        self.samples.iter().position(|s| !s.state.is_tracked())
    }
}

/// Calibrated kinematic values at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KinematicSample {
    pub time_secs: f64,
    pub position: Point,
    pub velocity: Point,
    pub acceleration: Point,
}
