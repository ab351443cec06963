//! Per-object tracking state machine.
//!
//! ```text
//! Initialized -> Tracking -> {Tracking, Lost} -> Finished
//!      \______________\__________\___________-> Failed
//! ```
//!
//! Loss is terminal for the run: positions (and sizes) are held at their
//! last tracked values until the section ends.

use image::GrayImage;

use super::{TrackerAlgorithm, TrackingOptions};
use crate::error::ConfigurationError;
use crate::models::{
    Point, Rect, Roi, TrackedObject, Trajectory, TrajectorySample, TrackingState,
};

/// Lifecycle state of an [`ObjectTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Initialized,
    Tracking,
    Lost,
    Finished,
    Failed,
}

/// Drives one tracking algorithm over the frames of a section.
pub struct ObjectTracker {
    object_name: String,
    algorithm: Box<dyn TrackerAlgorithm>,
    state: TrackerState,
    bbox: Rect,
    seed_size: (f64, f64),
    /// Marked point relative to the box centre at seed size.
    point_offset: Option<(f64, f64)>,
    roi: Option<Rect>,
    size_tracking: bool,
    position: Point,
    size: (f64, f64),
    samples: Vec<TrajectorySample>,
    failure: Option<String>,
}

impl ObjectTracker {
    /// Set up a tracker for one object.
    ///
    /// The seed box is the object's rectangle, or a square of
    /// `options.point_box` pixels centred on its point.
    pub fn new(
        object: &TrackedObject,
        options: &TrackingOptions,
        roi: Option<&Roi>,
    ) -> Result<Self, ConfigurationError> {
        if options.size_tracking && object.rectangle.is_none() {
            return Err(ConfigurationError::SizeTrackingNeedsRectangle(object.name.clone()));
        }
        let bbox = match (object.rectangle, object.point) {
            (Some(rect), _) => rect,
            (None, Some(point)) => Rect::from_center(point, options.point_box, options.point_box),
            (None, None) => {
                return Err(ConfigurationError::Settings(format!(
                    "object '{}' has neither a point nor a rectangle",
                    object.name
                )))
            }
        };
        let centre = bbox.center();
        let point_offset = object.point.map(|p| (p.x - centre.x, p.y - centre.y));

        let mut algorithm = options.tracker.create();
        let roi = roi.map(Roi::to_rect);
        algorithm.set_search_bounds(roi);

        let mut tracker = Self {
            object_name: object.name.clone(),
            algorithm,
            state: TrackerState::Initialized,
            bbox,
            seed_size: (bbox.width, bbox.height),
            point_offset,
            roi,
            size_tracking: options.size_tracking,
            position: Point::default(),
            size: (bbox.width, bbox.height),
            samples: Vec::new(),
            failure: None,
        };
        tracker.position = tracker.reported_position(&bbox);
        Ok(tracker)
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    /// Current box.
    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    /// Position reported for a box: the top-left corner when size-tracking,
    /// otherwise the carried point or the box centre.
    fn reported_position(&self, bbox: &Rect) -> Point {
        if self.size_tracking {
            return Point::new(bbox.x, bbox.y);
        }
        let centre = bbox.center();
        match self.point_offset {
            Some((ox, oy)) => {
                let sx = bbox.width / self.seed_size.0;
                let sy = bbox.height / self.seed_size.1;
                Point::new(centre.x + ox * sx, centre.y + oy * sy)
            }
            None => centre,
        }
    }

    fn push(&mut self, frame_index: u32, time_secs: f64, state: TrackingState) {
        self.samples.push(TrajectorySample {
            frame_index,
            time_secs,
            x: self.position.x,
            y: self.position.y,
            size: self.size_tracking.then_some(self.size),
            state,
        });
    }

    fn inside_roi(&self, bbox: &Rect) -> bool {
        self.roi.map_or(true, |roi| roi.contains(&bbox.center()))
    }

    /// Feed the next frame of the section.
    pub fn process(&mut self, frame_index: u32, time_secs: f64, image: &GrayImage) {
        match self.state {
            TrackerState::Initialized => {
                if let Err(e) = self.algorithm.init(image, self.bbox) {
                    tracing::warn!("[Tracker] '{}': {}", self.object_name, e);
                    self.fail(e.to_string());
                    return;
                }
                self.state = TrackerState::Tracking;
                self.push(frame_index, time_secs, TrackingState::Tracked);
            }
            TrackerState::Tracking => {
                let update = self.algorithm.update(image, self.bbox);
                if update.success && self.inside_roi(&update.bbox) {
                    self.bbox = update.bbox;
                    self.position = self.reported_position(&update.bbox);
                    self.size = (update.bbox.width, update.bbox.height);
                    self.push(frame_index, time_secs, TrackingState::Tracked);
                } else {
                    tracing::warn!(
                        "[Tracker] '{}' lost at frame {} (confidence {:.3})",
                        self.object_name,
                        frame_index,
                        update.confidence
                    );
                    self.state = TrackerState::Lost;
                    self.push(frame_index, time_secs, TrackingState::Lost);
                }
            }
            TrackerState::Lost => self.push(frame_index, time_secs, TrackingState::Lost),
            TrackerState::Finished | TrackerState::Failed => {}
        }
    }

    /// Mark the object as failed (unrecoverable source error or bad seed).
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = TrackerState::Failed;
        self.failure = Some(reason.into());
    }

    /// Close the run and hand out the trajectory.
    pub fn finish(mut self) -> Trajectory {
        if self.state != TrackerState::Failed {
            self.state = TrackerState::Finished;
        }
        Trajectory {
            object_name: self.object_name,
            samples: self.samples,
            failure: self.failure,
        }
    }
}
