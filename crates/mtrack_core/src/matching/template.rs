//! Template matching strategy (zero-mean normalized cross-correlation).

use image::imageops::crop_imm;
use image::GrayImage;

use super::{Candidate, MatchError, MatchRequest, MatchStrategy};
use crate::imaging::{zncc_map, Plane};
use crate::models::{MatchStrategyKind, Point, Rect};

/// Slides the reference patch over the target (or its ROI) and keeps the
/// best-scoring location.
///
/// The matched rectangle keeps the reference size; a marked point keeps its
/// offset from the rectangle corner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMatcher;

impl TemplateMatcher {
    pub fn new() -> Self {
        Self
    }
}

fn crop_plane(image: &GrayImage, (x, y, w, h): (u32, u32, u32, u32)) -> Plane {
    Plane::from_gray(&crop_imm(image, x, y, w, h).to_image())
}

impl MatchStrategy for TemplateMatcher {
    fn kind(&self) -> MatchStrategyKind {
        MatchStrategyKind::Template
    }

    fn locate(&self, request: &MatchRequest<'_>) -> Result<Candidate, MatchError> {
        let (rw, rh) = request.reference.dimensions();
        let patch_bounds = request
            .region
            .to_pixel_bounds(rw, rh)
            .ok_or(MatchError::RegionOutsideFrame)?;
        let template = crop_plane(request.reference, patch_bounds);

        let (tw, th) = request.target.dimensions();
        let frame = Rect::new(0.0, 0.0, tw as f64, th as f64);
        let search_rect = match request.search_region {
            Some(roi) => roi.intersect(&frame).ok_or(MatchError::RegionOutsideFrame)?,
            None => frame,
        };
        let search_bounds = search_rect
            .to_pixel_bounds(tw, th)
            .ok_or(MatchError::RegionOutsideFrame)?;
        if search_bounds.2 < patch_bounds.2 || search_bounds.3 < patch_bounds.3 {
            return Err(MatchError::SearchAreaTooSmall);
        }
        let search = crop_plane(request.target, search_bounds);

        let scores = zncc_map(&search, &template).ok_or(MatchError::FlatTemplate)?;
        let (mx, my, score) = scores.argmax().ok_or(MatchError::FlatTemplate)?;

        // Shift from the reference patch corner to the matched corner.
        let dx = (search_bounds.0 as usize + mx) as f64 - patch_bounds.0 as f64;
        let dy = (search_bounds.1 as usize + my) as f64 - patch_bounds.1 as f64;

        Ok(Candidate {
            rectangle: request.region.translated(dx, dy),
            point: request.point.map(|p| Point::new(p.x + dx, p.y + dy)),
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::test_support::{scene, texture};

    #[test]
    fn verbatim_patch_scores_one_at_its_location() {
        let frame = texture(120, 90, 5);
        let region = Rect::new(30.0, 20.0, 24.0, 18.0);
        let request = MatchRequest {
            reference: &frame,
            target: &frame,
            region,
            point: Some(Point::new(40.0, 25.0)),
            search_region: None,
        };
        let candidate = TemplateMatcher.locate(&request).unwrap();
        assert!((candidate.score - 1.0).abs() < 1e-6);
        assert_eq!(candidate.rectangle, region);
        assert_eq!(candidate.point, Some(Point::new(40.0, 25.0)));
    }

    #[test]
    fn shifted_object_keeps_size_and_point_offset() {
        let object = texture(20, 20, 12);
        let reference = scene(140, 100, &object, 30, 30);
        let target = scene(140, 100, &object, 71, 52);
        let request = MatchRequest {
            reference: &reference,
            target: &target,
            region: Rect::new(30.0, 30.0, 20.0, 20.0),
            point: Some(Point::new(35.0, 44.0)),
            search_region: None,
        };
        let candidate = TemplateMatcher.locate(&request).unwrap();
        assert_eq!(candidate.rectangle, Rect::new(71.0, 52.0, 20.0, 20.0));
        assert_eq!(candidate.point, Some(Point::new(76.0, 66.0)));
        assert!(candidate.score > 0.99);
    }

    #[test]
    fn search_is_confined_to_roi() {
        let object = texture(16, 16, 31);
        let reference = scene(160, 80, &object, 10, 30);
        // Two copies in the target; the ROI only covers the right one.
        let mut target = scene(160, 80, &object, 20, 30);
        image::imageops::replace(&mut target, &object, 120, 40);
        let request = MatchRequest {
            reference: &reference,
            target: &target,
            region: Rect::new(10.0, 30.0, 16.0, 16.0),
            point: None,
            search_region: Some(Rect::new(90.0, 0.0, 70.0, 80.0)),
        };
        let candidate = TemplateMatcher.locate(&request).unwrap();
        assert_eq!(candidate.rectangle, Rect::new(120.0, 40.0, 16.0, 16.0));
    }

    #[test]
    fn flat_template_is_rejected() {
        let reference = GrayImage::from_pixel(60, 60, image::Luma([100]));
        let target = texture(60, 60, 2);
        let request = MatchRequest {
            reference: &reference,
            target: &target,
            region: Rect::new(10.0, 10.0, 12.0, 12.0),
            point: None,
            search_region: None,
        };
        assert!(matches!(
            TemplateMatcher.locate(&request),
            Err(MatchError::FlatTemplate)
        ));
    }

    #[test]
    fn region_outside_reference_is_rejected() {
        let frame = texture(40, 40, 2);
        let request = MatchRequest {
            reference: &frame,
            target: &frame,
            region: Rect::new(100.0, 100.0, 10.0, 10.0),
            point: None,
            search_region: None,
        };
        assert!(matches!(
            TemplateMatcher.locate(&request),
            Err(MatchError::RegionOutsideFrame)
        ));
    }
}
