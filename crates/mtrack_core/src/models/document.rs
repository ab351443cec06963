//! Per-video settings documents.
//!
//! Two types model the document lifecycle:
//! - [`SettingsDraft`] mirrors the JSON on disk and is freely constructed,
//!   e.g. by the region matcher when producing settings for a new video.
//! - [`SettingsDocument`] is the validated, read-only view consumed by
//!   tracking. It can only be obtained through validation.
//!
//! Documents live next to their video as `<video file>.motiontracker.json`.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::geometry::{Point, Rect, Roi};
use crate::error::ConfigurationError;

/// The only settings document version currently defined.
pub const SETTINGS_VERSION: u32 = 1;

/// Suffix appended to a video's file name to locate its settings.
pub const SETTINGS_SUFFIX: &str = ".motiontracker.json";

/// Errors while reading, validating or writing settings documents.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write settings '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported settings version {0} (expected {SETTINGS_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

impl SettingsError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

impl From<SettingsError> for ConfigurationError {
    fn from(err: SettingsError) -> Self {
        ConfigurationError::Settings(err.to_string())
    }
}

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Path of the settings sidecar for a video.
pub fn sidecar_path(video: &Path) -> PathBuf {
    let mut name = OsString::from(video.as_os_str());
    name.push(SETTINGS_SUFFIX);
    PathBuf::from(name)
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

/// A user-marked object to track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rectangle: Option<Rect>,
    #[serde(default = "default_true")]
    pub rectangle_visible: bool,
}

impl TrackedObject {
    /// Object marked by a rectangle only.
    pub fn with_rectangle(name: impl Into<String>, rectangle: Rect) -> Self {
        Self {
            name: name.into(),
            point: None,
            rectangle: Some(rectangle),
            rectangle_visible: true,
        }
    }

    /// Object marked by a point only.
    pub fn with_point(name: impl Into<String>, point: Point) -> Self {
        Self {
            name: name.into(),
            point: Some(point),
            rectangle: None,
            rectangle_visible: false,
        }
    }

    fn validate(&self) -> SettingsResult<()> {
        if self.name.trim().is_empty() {
            return Err(SettingsError::invalid("object with empty name"));
        }
        if self.point.is_none() && self.rectangle.is_none() {
            return Err(SettingsError::invalid(format!(
                "object '{}' has neither a point nor a rectangle",
                self.name
            )));
        }
        if let Some(rect) = &self.rectangle {
            if rect.is_empty() {
                return Err(SettingsError::invalid(format!(
                    "object '{}' has an empty rectangle",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Two-point calibration reference mapped to a physical length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ruler {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    /// Physical length between the endpoints in millimetres.
    pub mm: f64,
}

impl Ruler {
    pub fn new(start: Point, end: Point, mm: f64) -> Self {
        Self {
            x0: start.x,
            y0: start.y,
            x1: end.x,
            y1: end.y,
            mm,
        }
    }

    /// Length of the ruler in pixels.
    pub fn pixel_length(&self) -> f64 {
        Point::new(self.x0, self.y0).distance(&Point::new(self.x1, self.y1))
    }

    /// Check the ruler defines a usable scale.
    pub fn validate(&self) -> SettingsResult<()> {
        if !(self.pixel_length() > 0.0) {
            return Err(SettingsError::invalid("ruler endpoints coincide"));
        }
        if !(self.mm > 0.0) || !self.mm.is_finite() {
            return Err(SettingsError::invalid(format!(
                "ruler length must be positive, got {}",
                self.mm
            )));
        }
        Ok(())
    }
}

/// Inclusive frame range selected for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub start: u32,
    pub stop: u32,
}

impl Section {
    pub fn new(start: u32, stop: u32) -> Self {
        Self { start, stop }
    }

    /// Number of frames in the section.
    pub fn len(&self) -> usize {
        (self.stop - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Resolve an optional section against a video's frame count.
    ///
    /// A missing section covers the whole video.
    pub fn resolve(section: Option<Section>, frame_count: u32) -> Result<Section, ConfigurationError> {
        let section = match section {
            Some(s) => s,
            None if frame_count > 0 => Section::new(0, frame_count - 1),
            None => {
                return Err(ConfigurationError::SectionOutOfRange {
                    start: 0,
                    stop: 0,
                    frame_count,
                })
            }
        };
        if section.start > section.stop || section.stop >= frame_count {
            return Err(ConfigurationError::SectionOutOfRange {
                start: section.start,
                stop: section.stop,
                frame_count,
            });
        }
        Ok(section)
    }
}

/// Settings document as stored on disk (unvalidated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDraft {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub objects: Vec<TrackedObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruler: Option<Ruler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,
}

impl SettingsDraft {
    /// Empty draft at the current version.
    pub fn new() -> Self {
        Self {
            version: SETTINGS_VERSION,
            objects: Vec::new(),
            ruler: None,
            section: None,
            roi: None,
        }
    }

    /// Draft for a new video carrying the given objects and the
    /// experiment-wide fields (ruler, section, ROI) of a reference document.
    pub fn derived_from(reference: &SettingsDocument, objects: Vec<TrackedObject>) -> Self {
        Self {
            version: SETTINGS_VERSION,
            objects,
            ruler: reference.ruler,
            section: reference.section,
            roi: reference.roi,
        }
    }

    /// Parse a draft from JSON text.
    pub fn from_json(content: &str) -> SettingsResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Pretty JSON representation.
    pub fn to_json(&self) -> SettingsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate into a read-only document.
    pub fn validate(self) -> SettingsResult<SettingsDocument> {
        SettingsDocument::try_from(self)
    }

    /// Write atomically (temp file in the same directory, then rename).
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        let content = self.to_json()?;
        let temp_path = path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            {
                let mut file = fs::File::create(&temp_path)?;
                file.write_all(content.as_bytes())?;
                file.sync_all()?;
            }
            fs::rename(&temp_path, path)
        };
        write().map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for SettingsDraft {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated, read-only settings document.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsDocument {
    objects: Vec<TrackedObject>,
    ruler: Option<Ruler>,
    section: Option<Section>,
    roi: Option<Roi>,
}

impl SettingsDocument {
    /// Load and validate a document from a JSON file.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        SettingsDraft::from_json(&content)?.validate()
    }

    /// Load the sidecar document of a video.
    pub fn load_for_video(video: &Path) -> SettingsResult<Self> {
        Self::load(&sidecar_path(video))
    }

    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn object(&self, name: &str) -> Option<&TrackedObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn ruler(&self) -> Option<&Ruler> {
        self.ruler.as_ref()
    }

    pub fn section(&self) -> Option<Section> {
        self.section
    }

    pub fn roi(&self) -> Option<&Roi> {
        self.roi.as_ref()
    }

    /// Copy back into an editable draft.
    pub fn to_draft(&self) -> SettingsDraft {
        SettingsDraft {
            version: SETTINGS_VERSION,
            objects: self.objects.clone(),
            ruler: self.ruler,
            section: self.section,
            roi: self.roi,
        }
    }
}

impl TryFrom<SettingsDraft> for SettingsDocument {
    type Error = SettingsError;

    fn try_from(draft: SettingsDraft) -> SettingsResult<Self> {
        if draft.version != SETTINGS_VERSION {
            return Err(SettingsError::UnsupportedVersion(draft.version));
        }
        if draft.objects.is_empty() {
            return Err(SettingsError::invalid("no objects defined"));
        }

        let mut names = HashSet::new();
        for object in &draft.objects {
            object.validate()?;
            if !names.insert(object.name.as_str()) {
                return Err(SettingsError::invalid(format!(
                    "duplicate object name '{}'",
                    object.name
                )));
            }
        }

        if let Some(ruler) = &draft.ruler {
            ruler.validate()?;
        }
        if let Some(section) = &draft.section {
            if section.start > section.stop {
                return Err(SettingsError::invalid(format!(
                    "section start {} is after stop {}",
                    section.start, section.stop
                )));
            }
        }
        if let Some(roi) = &draft.roi {
            if roi.to_rect().is_empty() {
                return Err(SettingsError::invalid("ROI has zero area"));
            }
        }

        Ok(Self {
            objects: draft.objects,
            ruler: draft.ruler,
            section: draft.section,
            roi: draft.roi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "version": 1,
        "objects": [
            {"name": "ball", "point": [15, 25], "rectangle": [10, 20, 20, 20], "rectangle_visible": true},
            {"name": "marker", "point": [100.5, 40.0]}
        ],
        "ruler": {"x0": 0, "y0": 0, "x1": 100, "y1": 0, "mm": 50},
        "section": {"start": 5, "stop": 50},
        "roi": [0, 0, 320, 240]
    }"#;

    #[test]
    fn parses_and_validates_sample() {
        let doc = SettingsDraft::from_json(SAMPLE).unwrap().validate().unwrap();
        assert_eq!(doc.objects().len(), 2);
        assert_eq!(doc.objects()[0].rectangle, Some(Rect::new(10.0, 20.0, 20.0, 20.0)));
        assert!(doc.objects()[1].rectangle.is_none());
        assert_eq!(doc.section(), Some(Section::new(5, 50)));
        assert_eq!(doc.ruler().unwrap().pixel_length(), 100.0);
    }

    #[test]
    fn rejects_unknown_version() {
        let json = SAMPLE.replace("\"version\": 1", "\"version\": 2");
        let err = SettingsDraft::from_json(&json).unwrap().validate().unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedVersion(2)));
    }

    #[test]
    fn rejects_zero_length_ruler() {
        let mut draft = SettingsDraft::from_json(SAMPLE).unwrap();
        draft.ruler = Some(Ruler::new(Point::new(5.0, 5.0), Point::new(5.0, 5.0), 10.0));
        assert!(draft.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names_and_empty_objects() {
        let mut draft = SettingsDraft::from_json(SAMPLE).unwrap();
        draft.objects[1].name = "ball".to_string();
        assert!(draft.clone().validate().is_err());

        draft.objects.clear();
        assert!(draft.validate().is_err());
    }

    #[test]
    fn rejects_object_without_geometry() {
        let mut draft = SettingsDraft::from_json(SAMPLE).unwrap();
        draft.objects[1].point = None;
        assert!(draft.validate().is_err());
    }

    #[test]
    fn section_resolves_against_frame_count() {
        assert_eq!(Section::resolve(None, 100).unwrap(), Section::new(0, 99));
        assert_eq!(
            Section::resolve(Some(Section::new(10, 20)), 100).unwrap().len(),
            11
        );
        assert!(Section::resolve(Some(Section::new(10, 100)), 100).is_err());
        assert!(Section::resolve(None, 0).is_err());
    }

    #[test]
    fn sidecar_appends_suffix() {
        let path = sidecar_path(Path::new("/data/run1.mp4"));
        assert_eq!(path, PathBuf::from("/data/run1.mp4.motiontracker.json"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("clip.avi");
        let draft = SettingsDraft::from_json(SAMPLE).unwrap();
        draft.save(&sidecar_path(&video)).unwrap();

        let loaded = SettingsDocument::load_for_video(&video).unwrap();
        assert_eq!(loaded.to_draft(), draft);
        assert!(!dir.path().join("clip.avi.motiontracker.json.tmp").exists());
    }

    #[test]
    fn derived_draft_copies_experiment_fields() {
        let reference = SettingsDraft::from_json(SAMPLE).unwrap().validate().unwrap();
        let objects = vec![TrackedObject::with_point("ball", Point::new(1.0, 2.0))];
        let derived = SettingsDraft::derived_from(&reference, objects);
        assert_eq!(derived.ruler, reference.ruler().copied());
        assert_eq!(derived.section, reference.section());
        assert_eq!(derived.roi, reference.roi().copied());
        assert_eq!(derived.objects.len(), 1);
    }
}
