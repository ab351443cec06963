//! Region matching between videos of one experiment.
//!
//! Locates the objects of a reference settings document inside a frame of
//! another video. Two strategies are available behind the
//! [`MatchStrategy`] trait:
//! - template matching (zero-mean NCC of the reference patch)
//! - feature matching (ORB-style keypoints, RANSAC homography)
//!
//! `auto` runs template matching first and only falls back to feature
//! matching when the template score stays below the threshold.

mod features;
mod homography;
mod template;

use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use features::{
    ratio_matches, BriefDescriptor, Feature, FeatureMatcher, KeyPoint, OrbExtractor,
    RATIO_TEST, REPROJECTION_THRESHOLD,
};
pub use homography::{estimate_dlt, ransac, Homography, RansacFit, MIN_DETERMINANT};
pub use template::TemplateMatcher;

use crate::error::ConfigurationError;
use crate::models::{
    MatchResult, MatchStrategyKind, Point, Rect, SettingsDocument, SettingsDraft, TrackedObject,
};
use crate::tracking::DEFAULT_POINT_BOX;

/// Default acceptance threshold for both strategies.
pub const DEFAULT_THRESHOLD: f64 = 0.7;
/// Default number of keypoints kept per image.
pub const DEFAULT_MAX_FEATURES: usize = 500;

/// Why a strategy produced no usable candidate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    /// The reference region does not overlap the frame.
    #[error("Region lies outside the frame")]
    RegionOutsideFrame,

    /// The search area is smaller than the reference patch.
    #[error("Search area is smaller than the reference patch")]
    SearchAreaTooSmall,

    /// The reference patch has no intensity variation.
    #[error("Reference patch has no texture")]
    FlatTemplate,

    #[error("Too few keypoints (reference {reference}, target {target})")]
    TooFewKeypoints { reference: usize, target: usize },

    #[error("Too few ratio-tested matches ({0})")]
    TooFewMatches(usize),

    #[error("Too few RANSAC inliers ({0})")]
    TooFewInliers(usize),

    #[error("Degenerate homography")]
    DegenerateHomography,
}

/// Which strategies a matcher may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Template,
    Feature,
    #[default]
    Auto,
}

impl MatchMethod {
    pub const ALL: [MatchMethod; 3] = [MatchMethod::Template, MatchMethod::Feature, MatchMethod::Auto];

    pub fn name(self) -> &'static str {
        match self {
            MatchMethod::Template => "template",
            MatchMethod::Feature => "feature",
            MatchMethod::Auto => "auto",
        }
    }

    /// Get a list of available method names.
    pub fn available() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.name()).collect()
    }

    fn uses_template(self) -> bool {
        matches!(self, MatchMethod::Template | MatchMethod::Auto)
    }

    fn uses_feature(self) -> bool {
        matches!(self, MatchMethod::Feature | MatchMethod::Auto)
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatchMethod {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.name() == lower)
            .ok_or_else(|| ConfigurationError::unknown_algorithm("match", s, &Self::available()))
    }
}

/// Matcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub method: MatchMethod,
    /// Minimum score (template) or inlier fraction (feature) to accept.
    pub threshold: f64,
    /// Pixels added around the reference region when collecting keypoints.
    pub feature_margin: f64,
    pub max_features: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            method: MatchMethod::Auto,
            threshold: DEFAULT_THRESHOLD,
            feature_margin: 0.0,
            max_features: DEFAULT_MAX_FEATURES,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigurationError::invalid_parameter(
                "match",
                format!("threshold {} must be within [0, 1]", self.threshold),
            ));
        }
        if self.max_features < 4 {
            return Err(ConfigurationError::invalid_parameter(
                "match",
                "max_features must be at least 4",
            ));
        }
        if !(self.feature_margin >= 0.0) {
            return Err(ConfigurationError::invalid_parameter(
                "match",
                "feature_margin must be non-negative",
            ));
        }
        Ok(())
    }
}

/// One object to locate.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub reference: &'a GrayImage,
    pub target: &'a GrayImage,
    /// Object region in the reference frame.
    pub region: Rect,
    /// Marked point carried along with the region.
    pub point: Option<Point>,
    /// Target search area (the ROI).
    pub search_region: Option<Rect>,
}

/// Best location found by a strategy, before thresholding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub rectangle: Rect,
    pub point: Option<Point>,
    pub score: f64,
}

/// Trait for region matching strategies.
pub trait MatchStrategy: Send + Sync {
    fn kind(&self) -> MatchStrategyKind;

    /// Locate the requested region in the target frame.
    fn locate(&self, request: &MatchRequest<'_>) -> Result<Candidate, MatchError>;
}

/// Matches of every object of a reference document in one target frame.
#[derive(Debug, Clone)]
pub struct DocumentMatch {
    /// One result per reference object, in declaration order.
    pub results: Vec<MatchResult>,
    /// Objects that matched, ready for a new settings document.
    pub matched: Vec<TrackedObject>,
}

impl DocumentMatch {
    pub fn all_matched(&self) -> bool {
        !self.results.is_empty() && self.matched.len() == self.results.len()
    }

    pub fn any_matched(&self) -> bool {
        !self.matched.is_empty()
    }

    /// Settings draft for the target, `None` when nothing matched.
    pub fn to_draft(&self, reference: &SettingsDocument) -> Option<SettingsDraft> {
        self.any_matched()
            .then(|| SettingsDraft::derived_from(reference, self.matched.clone()))
    }
}

/// Region matcher with template and feature strategies.
pub struct RegionMatcher {
    config: MatchConfig,
    template: Box<dyn MatchStrategy>,
    feature: Box<dyn MatchStrategy>,
}

impl RegionMatcher {
    pub fn new(config: MatchConfig) -> Result<Self, ConfigurationError> {
        let feature = FeatureMatcher::new(config.max_features, config.feature_margin);
        Self::with_strategies(config, Box::new(TemplateMatcher::new()), Box::new(feature))
    }

    /// Matcher with custom strategies.
    pub fn with_strategies(
        config: MatchConfig,
        template: Box<dyn MatchStrategy>,
        feature: Box<dyn MatchStrategy>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            template,
            feature,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Locate one object; returns the result and the relocated object.
    ///
    /// Point-only objects are matched through a square box around the
    /// point and stay point-only.
    pub fn match_object(
        &self,
        object: &TrackedObject,
        reference: &GrayImage,
        target: &GrayImage,
        search_region: Option<Rect>,
    ) -> (MatchResult, Option<TrackedObject>) {
        let region = match (object.rectangle, object.point) {
            (Some(rect), _) => rect,
            (None, Some(p)) => Rect::from_center(p, DEFAULT_POINT_BOX, DEFAULT_POINT_BOX),
            (None, None) => return (MatchResult::rejected(&object.name, 0.0), None),
        };
        let request = MatchRequest {
            reference,
            target,
            region,
            point: object.point,
            search_region,
        };
        let threshold = self.config.threshold;
        let method = self.config.method;

        let mut template_score = None;
        let mut accepted = None;

        if method.uses_template() {
            match self.template.locate(&request) {
                Ok(candidate) => {
                    template_score = Some(candidate.score.max(0.0));
                    if candidate.score >= threshold {
                        accepted = Some((candidate, MatchStrategyKind::Template));
                    }
                }
                Err(e) => {
                    tracing::debug!("[Matcher] '{}': template matching failed: {}", object.name, e)
                }
            }
        }

        let mut feature_score = None;
        if accepted.is_none() && method.uses_feature() {
            match self.feature.locate(&request) {
                Ok(candidate) => {
                    feature_score = Some(candidate.score);
                    if candidate.score >= threshold {
                        accepted = Some((candidate, MatchStrategyKind::Feature));
                    }
                }
                Err(e) => {
                    tracing::debug!("[Matcher] '{}': feature matching failed: {}", object.name, e)
                }
            }
        }

        let Some((candidate, kind)) = accepted else {
            let best = template_score.or(feature_score).unwrap_or(0.0);
            tracing::warn!(
                "[Matcher] '{}': no match (best score {:.3}, threshold {:.3})",
                object.name,
                best,
                threshold
            );
            return (MatchResult::rejected(&object.name, best), None);
        };

        let rectangle = object.rectangle.map(|_| candidate.rectangle);
        let matched = TrackedObject {
            name: object.name.clone(),
            point: candidate.point,
            rectangle,
            rectangle_visible: object.rectangle_visible,
        };
        tracing::info!(
            "[Matcher] '{}': matched at ({:.1}, {:.1}) conf={:.3} [{}]",
            object.name,
            candidate.rectangle.x,
            candidate.rectangle.y,
            candidate.score,
            kind.name()
        );
        let result = MatchResult {
            object_name: object.name.clone(),
            matched_point: candidate.point,
            matched_rectangle: rectangle,
            confidence: candidate.score.max(0.0),
            method_used: Some(kind),
        };
        (result, Some(matched))
    }

    /// Locate every object of `document` in `target`.
    ///
    /// Objects are independent and matched in parallel against the shared
    /// frames; results keep declaration order.
    pub fn match_document(
        &self,
        document: &SettingsDocument,
        reference: &GrayImage,
        target: &GrayImage,
    ) -> DocumentMatch {
        let search_region = document.roi().map(|roi| roi.to_rect());
        let outcomes: Vec<(MatchResult, Option<TrackedObject>)> = document
            .objects()
            .par_iter()
            .map(|object| self.match_object(object, reference, target, search_region))
            .collect();

        let mut results = Vec::with_capacity(outcomes.len());
        let mut matched = Vec::new();
        for (result, object) in outcomes {
            results.push(result);
            matched.extend(object);
        }
        DocumentMatch { results, matched }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Roi, Ruler, Section};
    use crate::tracking::test_support::{scene, texture};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        kind: MatchStrategyKind,
        score: f64,
        calls: Arc<AtomicUsize>,
    }

    impl MatchStrategy for Counting {
        fn kind(&self) -> MatchStrategyKind {
            self.kind
        }

        fn locate(&self, request: &MatchRequest<'_>) -> Result<Candidate, MatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Candidate {
                rectangle: request.region.translated(5.0, 0.0),
                point: request.point,
                score: self.score,
            })
        }
    }

    fn counting_matcher(
        method: MatchMethod,
        template_score: f64,
        feature_score: f64,
    ) -> (RegionMatcher, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let template_calls = Arc::new(AtomicUsize::new(0));
        let feature_calls = Arc::new(AtomicUsize::new(0));
        let matcher = RegionMatcher::with_strategies(
            MatchConfig {
                method,
                ..MatchConfig::default()
            },
            Box::new(Counting {
                kind: MatchStrategyKind::Template,
                score: template_score,
                calls: template_calls.clone(),
            }),
            Box::new(Counting {
                kind: MatchStrategyKind::Feature,
                score: feature_score,
                calls: feature_calls.clone(),
            }),
        )
        .unwrap();
        (matcher, template_calls, feature_calls)
    }

    fn blank() -> GrayImage {
        GrayImage::new(50, 50)
    }

    fn boxed(name: &str) -> TrackedObject {
        TrackedObject::with_rectangle(name, Rect::new(10.0, 10.0, 10.0, 10.0))
    }

    #[test]
    fn auto_skips_feature_matching_after_template_success() {
        let (matcher, template_calls, feature_calls) = counting_matcher(MatchMethod::Auto, 0.9, 0.9);
        let (result, object) = matcher.match_object(&boxed("a"), &blank(), &blank(), None);
        assert_eq!(result.method_used, Some(MatchStrategyKind::Template));
        assert!(object.is_some());
        assert_eq!(template_calls.load(Ordering::SeqCst), 1);
        assert_eq!(feature_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn auto_falls_back_to_features_below_threshold() {
        let (matcher, template_calls, feature_calls) = counting_matcher(MatchMethod::Auto, 0.4, 0.8);
        let (result, _) = matcher.match_object(&boxed("a"), &blank(), &blank(), None);
        assert_eq!(result.method_used, Some(MatchStrategyKind::Feature));
        assert_eq!(result.confidence, 0.8);
        assert_eq!(template_calls.load(Ordering::SeqCst), 1);
        assert_eq!(feature_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejection_reports_best_template_score() {
        let (matcher, _, _) = counting_matcher(MatchMethod::Auto, 0.4, 0.3);
        let (result, object) = matcher.match_object(&boxed("a"), &blank(), &blank(), None);
        assert!(!result.is_match());
        assert!(object.is_none());
        assert_eq!(result.confidence, 0.4);
        assert_eq!(result.method_used, None);
    }

    #[test]
    fn template_only_never_calls_features() {
        let (matcher, _, feature_calls) = counting_matcher(MatchMethod::Template, 0.1, 0.9);
        let (result, _) = matcher.match_object(&boxed("a"), &blank(), &blank(), None);
        assert!(!result.is_match());
        assert_eq!(feature_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn point_only_object_stays_point_only() {
        let (matcher, _, _) = counting_matcher(MatchMethod::Auto, 0.95, 0.0);
        let object = TrackedObject::with_point("p", Point::new(25.0, 25.0));
        let (result, matched) = matcher.match_object(&object, &blank(), &blank(), None);
        let matched = matched.unwrap();
        assert!(matched.rectangle.is_none());
        assert_eq!(matched.point, Some(Point::new(25.0, 25.0)));
        assert!(result.matched_rectangle.is_none());
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("AUTO".parse::<MatchMethod>().unwrap(), MatchMethod::Auto);
        assert_eq!(" feature ".parse::<MatchMethod>().unwrap(), MatchMethod::Feature);
        assert!("sift".parse::<MatchMethod>().is_err());
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let config = MatchConfig {
            threshold: 1.5,
            ..MatchConfig::default()
        };
        assert!(RegionMatcher::new(config).is_err());
    }

    #[test]
    fn document_match_copies_experiment_fields() {
        let a = texture(20, 20, 1);
        let b = texture(24, 16, 2);
        let mut reference = scene(160, 120, &a, 20, 20);
        image::imageops::replace(&mut reference, &b, 100, 70);
        let mut target = scene(160, 120, &a, 32, 25);
        image::imageops::replace(&mut target, &b, 90, 80);

        let mut draft = SettingsDraft::new();
        draft.objects = vec![
            TrackedObject::with_rectangle("a", Rect::new(20.0, 20.0, 20.0, 20.0)),
            TrackedObject::with_rectangle("b", Rect::new(100.0, 70.0, 24.0, 16.0)),
        ];
        draft.ruler = Some(Ruler::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 50.0));
        draft.section = Some(Section::new(2, 40));
        draft.roi = Some(Roi::new(0.0, 0.0, 160.0, 120.0));
        let document = draft.validate().unwrap();

        let matcher = RegionMatcher::new(MatchConfig::default()).unwrap();
        let outcome = matcher.match_document(&document, &reference, &target);
        assert!(outcome.all_matched());
        assert_eq!(outcome.results[0].object_name, "a");
        assert_eq!(outcome.matched[0].rectangle, Some(Rect::new(32.0, 25.0, 20.0, 20.0)));
        assert_eq!(outcome.matched[1].rectangle, Some(Rect::new(90.0, 80.0, 24.0, 16.0)));

        let new_document = outcome.to_draft(&document).unwrap().validate().unwrap();
        assert_eq!(new_document.ruler(), document.ruler());
        assert_eq!(new_document.section(), document.section());
        assert_eq!(new_document.roi(), document.roi());
    }
}
