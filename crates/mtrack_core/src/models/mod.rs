//! Shared data model: settings documents, geometry, trajectories and
//! match results.

mod document;
mod geometry;
mod match_result;
mod trajectory;

pub use document::{
    sidecar_path, Ruler, Section, SettingsDocument, SettingsDraft, SettingsError,
    SettingsResult, TrackedObject, SETTINGS_SUFFIX, SETTINGS_VERSION,
};
pub use geometry::{Point, Rect, Roi};
pub use match_result::{MatchResult, MatchStrategyKind};
pub use trajectory::{KinematicSample, Trajectory, TrajectorySample, TrackingState};
