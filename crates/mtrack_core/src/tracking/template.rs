//! Template search trackers (BOOSTING, MIL).
//!
//! Both keep an appearance template of the target and search a window
//! around the previous box with zero-mean normalized cross-correlation.
//! They differ in search radius, model update rate and acceptance score.

use image::GrayImage;

use super::{check_init_box, TrackUpdate, TrackerAlgorithm, TrackingResult};
use crate::imaging::{sample_patch, zncc_map, Plane};
use crate::models::Rect;

/// Largest template side in samples; larger boxes are searched downscaled.
const MAX_TEMPLATE_SIDE: f64 = 32.0;
/// Fixed extra search margin in pixels.
const SEARCH_SLACK: f64 = 4.0;

/// NCC template search tracker.
pub struct TemplateSearch {
    name: &'static str,
    /// Search margin per side, relative to the box size.
    search_factor: f64,
    update_rate: f64,
    min_score: f64,
    bounds: Option<Rect>,
    template: Option<Plane>,
    /// Samples per pixel.
    grid_scale: f64,
}

impl TemplateSearch {
    /// Narrow search with a slowly adapting template.
    pub fn boosting() -> Self {
        Self::with_params("BOOSTING", 0.5, 0.05, 0.5)
    }

    /// Wide search with a faster adapting template.
    pub fn mil() -> Self {
        Self::with_params("MIL", 1.0, 0.15, 0.4)
    }

    fn with_params(name: &'static str, search_factor: f64, update_rate: f64, min_score: f64) -> Self {
        Self {
            name,
            search_factor,
            update_rate,
            min_score,
            bounds: None,
            template: None,
            grid_scale: 1.0,
        }
    }

    fn sample_box(&self, frame: &GrayImage, bbox: &Rect, template: &Plane) -> Plane {
        let centre = bbox.center();
        sample_patch(
            frame,
            centre.x,
            centre.y,
            bbox.width,
            bbox.height,
            template.width(),
            template.height(),
        )
    }
}

impl TrackerAlgorithm for TemplateSearch {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, frame: &GrayImage, bbox: Rect) -> TrackingResult<()> {
        check_init_box(self.name, frame, bbox)?;
        self.grid_scale = (MAX_TEMPLATE_SIDE / bbox.width.max(bbox.height)).min(1.0);
        let tw = ((bbox.width * self.grid_scale).round() as usize).max(2);
        let th = ((bbox.height * self.grid_scale).round() as usize).max(2);
        let centre = bbox.center();
        self.template = Some(sample_patch(frame, centre.x, centre.y, bbox.width, bbox.height, tw, th));
        Ok(())
    }

    fn update(&mut self, frame: &GrayImage, previous: Rect) -> TrackUpdate {
        let Some(template) = self.template.as_ref() else {
            return TrackUpdate::failure(previous, 0.0);
        };

        let (fw, fh) = frame.dimensions();
        let mut region = previous.inflated(
            previous.width * self.search_factor + SEARCH_SLACK,
            previous.height * self.search_factor + SEARCH_SLACK,
        );
        let limits = self
            .bounds
            .and_then(|b| b.intersect(&Rect::new(0.0, 0.0, fw as f64, fh as f64)))
            .unwrap_or(Rect::new(0.0, 0.0, fw as f64, fh as f64));
        region = match region.intersect(&limits) {
            Some(r) => r,
            None => return TrackUpdate::failure(previous, 0.0),
        };

        let s = self.grid_scale;
        let sw = (region.width * s).floor() as usize;
        let sh = (region.height * s).floor() as usize;
        if sw < template.width() || sh < template.height() {
            return TrackUpdate::failure(previous, 0.0);
        }
        // Step exactly 1/s so template and search samples share a grid.
        let src_w = sw as f64 / s;
        let src_h = sh as f64 / s;
        let search = sample_patch(frame, region.x + src_w / 2.0, region.y + src_h / 2.0, src_w, src_h, sw, sh);

        let Some(scores) = zncc_map(&search, template) else {
            return TrackUpdate::failure(previous, 0.0);
        };
        let Some((px, py, score)) = scores.argmax() else {
            return TrackUpdate::failure(previous, 0.0);
        };
        if score < self.min_score {
            return TrackUpdate::failure(previous, score.max(0.0));
        }

        let (rx, ry) = scores.refine_peak(px, py);
        let bbox = Rect::new(
            region.x + rx / s,
            region.y + ry / s,
            previous.width,
            previous.height,
        );

        let current = self.sample_box(frame, &bbox, template);
        if let Some(template) = self.template.as_mut() {
            template.blend(&current, self.update_rate);
        }
        TrackUpdate::success(bbox, score)
    }

    fn set_search_bounds(&mut self, bounds: Option<Rect>) {
        self.bounds = bounds;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn boosting_fails_when_target_leaves_search_window() {
        let object = texture(20, 20, 12);
        let first = scene(200, 100, &object, 20, 40);
        let jumped = scene(200, 100, &object, 150, 40);

        let mut tracker = TemplateSearch::boosting();
        let bbox = object_rect(&object, 20, 40);
        tracker.init(&first, bbox).unwrap();
        assert!(!tracker.update(&jumped, bbox).success);
    }

    #[test]
    fn mil_reaches_further_than_boosting() {
        let object = texture(20, 20, 12);
        let first = scene(200, 100, &object, 40, 40);
        let moved = scene(200, 100, &object, 58, 40);
        let bbox = object_rect(&object, 40, 40);

        let mut boosting = TemplateSearch::boosting();
        boosting.init(&first, bbox).unwrap();
        let mut mil = TemplateSearch::mil();
        mil.init(&first, bbox).unwrap();

        let update = mil.update(&moved, bbox);
        assert!(update.success);
        assert!((update.bbox.x - 58.0).abs() < 0.5);
        assert!(!boosting.update(&moved, bbox).success);
    }

    #[test]
    fn search_bounds_confine_the_search() {
        let object = texture(16, 16, 3);
        let first = scene(120, 120, &object, 40, 40);
        let moved = scene(120, 120, &object, 60, 40);
        let bbox = object_rect(&object, 40, 40);

        let mut tracker = TemplateSearch::mil();
        tracker.set_search_bounds(Some(Rect::new(0.0, 0.0, 70.0, 120.0)));
        tracker.init(&first, bbox).unwrap();
        assert!(!tracker.update(&moved, bbox).success);
    }
}
