//! ORB-style keypoints and binary descriptors.
//!
//! FAST-9 corners on a small scale pyramid, oriented by the intensity
//! centroid, described by a steered 256-bit BRIEF test pattern sampled on a
//! smoothed image. Descriptors are compared by Hamming distance.

use std::f64::consts::PI;

use image::imageops::{resize, FilterType};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::homography::ransac;
use super::{Candidate, MatchError, MatchRequest, MatchStrategy};
use crate::models::{MatchStrategyKind, Point, Rect};

const PYRAMID_LEVELS: usize = 4;
const SCALE_FACTOR: f64 = 1.2;
const FAST_THRESHOLD: u8 = 20;
/// Radius of the orientation patch.
const ORIENTATION_RADIUS: i32 = 15;
/// Keypoints closer than this to the level border are dropped so rotated
/// test pairs stay inside the image.
const BORDER: u32 = 22;
/// Cell size (level pixels) for spatial non-maximum suppression.
const NMS_CELL: u32 = 4;
const PATTERN_SEED: u64 = 0x0b_1e55;
const PATTERN_SIGMA: f64 = 31.0 / 5.0;
const PATTERN_CLIP: f64 = 15.0;
const BLUR_SIGMA: f32 = 2.0;

/// Lowe ratio for nearest-neighbour matching.
pub const RATIO_TEST: f64 = 0.75;
/// RANSAC reprojection threshold in pixels.
pub const REPROJECTION_THRESHOLD: f64 = 5.0;
const RANSAC_ITERATIONS: usize = 2000;
const MIN_CORRESPONDENCES: usize = 4;

/// A detected keypoint in level-0 coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub position: Point,
    /// Orientation in radians.
    pub angle: f64,
    pub level: usize,
    pub score: f32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BriefDescriptor(pub [u64; 4]);

impl BriefDescriptor {
    pub fn hamming(&self, other: &BriefDescriptor) -> u32 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A keypoint with its descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Feature {
    pub keypoint: KeyPoint,
    pub descriptor: BriefDescriptor,
}

/// Keypoint detector and descriptor extractor.
pub struct OrbExtractor {
    max_features: usize,
    pattern: Vec<[(f64, f64); 2]>,
}

impl OrbExtractor {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            pattern: brief_pattern(),
        }
    }

    /// Detect and describe features, keeping only those inside `region`
    /// (level-0 coordinates) when given.
    pub fn extract(&self, image: &GrayImage, region: Option<Rect>) -> Vec<Feature> {
        let mut features = Vec::new();
        let (w0, h0) = image.dimensions();

        for level in 0..PYRAMID_LEVELS {
            let scale = SCALE_FACTOR.powi(level as i32);
            let lw = (w0 as f64 / scale).round() as u32;
            let lh = (h0 as f64 / scale).round() as u32;
            if lw <= 2 * BORDER || lh <= 2 * BORDER {
                break;
            }
            let level_image = if level == 0 {
                image.clone()
            } else {
                resize(image, lw, lh, FilterType::Triangle)
            };
            let smoothed = gaussian_blur_f32(&level_image, BLUR_SIGMA);

            let mut corners = corners_fast9(&level_image, FAST_THRESHOLD);
            corners.retain(|c| {
                c.x >= BORDER && c.y >= BORDER && c.x < lw - BORDER && c.y < lh - BORDER
            });
            corners.sort_by(|a, b| b.score.total_cmp(&a.score));

            // Strongest corner per cell.
            let cols = lw / NMS_CELL + 1;
            let mut occupied = vec![false; (cols * (lh / NMS_CELL + 1)) as usize];
            for corner in corners {
                let cell = ((corner.y / NMS_CELL) * cols + corner.x / NMS_CELL) as usize;
                if occupied[cell] {
                    continue;
                }
                occupied[cell] = true;

                let position = Point::new(
                    (corner.x as f64 + 0.5) * scale,
                    (corner.y as f64 + 0.5) * scale,
                );
                if let Some(r) = &region {
                    if !r.contains(&position) {
                        continue;
                    }
                }
                let angle = intensity_centroid_angle(&level_image, corner.x, corner.y);
                let descriptor = self.describe(&smoothed, corner.x, corner.y, angle);
                features.push(Feature {
                    keypoint: KeyPoint {
                        position,
                        angle,
                        level,
                        score: corner.score,
                    },
                    descriptor,
                });
            }
        }

        features.sort_by(|a, b| b.keypoint.score.total_cmp(&a.keypoint.score));
        features.truncate(self.max_features);
        features
    }

    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f64) -> BriefDescriptor {
        let (sin, cos) = angle.sin_cos();
        let (w, h) = smoothed.dimensions();
        let at = |dx: f64, dy: f64| -> u8 {
            let rx = (dx * cos - dy * sin).round() as i64 + x as i64;
            let ry = (dx * sin + dy * cos).round() as i64 + y as i64;
            let rx = rx.clamp(0, w as i64 - 1) as u32;
            let ry = ry.clamp(0, h as i64 - 1) as u32;
            smoothed.get_pixel(rx, ry)[0]
        };
        let mut bits = [0u64; 4];
        for (i, [a, b]) in self.pattern.iter().enumerate() {
            if at(a.0, a.1) < at(b.0, b.1) {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        BriefDescriptor(bits)
    }
}

/// Orientation from the intensity centroid of a disc around the corner.
fn intensity_centroid_angle(image: &GrayImage, x: u32, y: u32) -> f64 {
    let (w, h) = image.dimensions();
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let px = x as i64 + dx as i64;
            let py = y as i64 + dy as i64;
            if px < 0 || py < 0 || px >= w as i64 || py >= h as i64 {
                continue;
            }
            let v = image.get_pixel(px as u32, py as u32)[0] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }
    m01.atan2(m10)
}

/// Fixed pseudo-random test pairs, isotropic Gaussian around the keypoint.
fn brief_pattern() -> Vec<[(f64, f64); 2]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut gaussian = move || -> f64 {
        // Box-Muller
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        (z * PATTERN_SIGMA).clamp(-PATTERN_CLIP, PATTERN_CLIP)
    };
    (0..256)
        .map(|_| [(gaussian(), gaussian()), (gaussian(), gaussian())])
        .collect()
}

/// Index pairs `(reference, target)` passing the nearest-neighbour ratio
/// test.
pub fn ratio_matches(reference: &[Feature], target: &[Feature], ratio: f64) -> Vec<(usize, usize)> {
    let mut matches = Vec::new();
    if target.len() < 2 {
        return matches;
    }
    for (i, r) in reference.iter().enumerate() {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (j, t) in target.iter().enumerate() {
            let d = r.descriptor.hamming(&t.descriptor);
            if d < best.0 {
                second = best.0;
                best = (d, j);
            } else if d < second {
                second = d;
            }
        }
        if (best.0 as f64) < ratio * second as f64 {
            matches.push((i, best.1));
        }
    }
    matches
}

/// Feature matching strategy: keypoints in the reference region and the
/// target frame, ratio-tested matches, RANSAC homography.
///
/// Confidence is the inlier fraction of the ratio-tested matches.
pub struct FeatureMatcher {
    extractor: OrbExtractor,
    margin: f64,
}

impl FeatureMatcher {
    /// `margin` widens the reference region on every side before keypoints
    /// are collected.
    pub fn new(max_features: usize, margin: f64) -> Self {
        Self {
            extractor: OrbExtractor::new(max_features),
            margin: margin.max(0.0),
        }
    }
}

impl MatchStrategy for FeatureMatcher {
    fn kind(&self) -> MatchStrategyKind {
        MatchStrategyKind::Feature
    }

    fn locate(&self, request: &MatchRequest<'_>) -> Result<Candidate, MatchError> {
        let region = request.region.inflated(self.margin, self.margin);
        let reference = self.extractor.extract(request.reference, Some(region));
        let target = self.extractor.extract(request.target, request.search_region);
        if reference.len() < MIN_CORRESPONDENCES || target.len() < MIN_CORRESPONDENCES {
            return Err(MatchError::TooFewKeypoints {
                reference: reference.len(),
                target: target.len(),
            });
        }

        let matches = ratio_matches(&reference, &target, RATIO_TEST);
        if matches.len() < MIN_CORRESPONDENCES {
            return Err(MatchError::TooFewMatches(matches.len()));
        }
        let (src, dst): (Vec<Point>, Vec<Point>) = matches
            .iter()
            .map(|&(r, t)| (reference[r].keypoint.position, target[t].keypoint.position))
            .unzip();

        let fit = ransac(&src, &dst, REPROJECTION_THRESHOLD, RANSAC_ITERATIONS)
            .ok_or(MatchError::TooFewInliers(0))?;
        let inliers = fit.inlier_count();
        if inliers < MIN_CORRESPONDENCES {
            return Err(MatchError::TooFewInliers(inliers));
        }
        if fit.homography.is_degenerate() {
            return Err(MatchError::DegenerateHomography);
        }

        let corners = request
            .region
            .corners()
            .iter()
            .map(|c| fit.homography.project(c))
            .collect::<Option<Vec<_>>>()
            .ok_or(MatchError::DegenerateHomography)?;
        let rectangle = Rect::bounding(&corners).ok_or(MatchError::DegenerateHomography)?;
        let point = match request.point {
            Some(p) => Some(
                fit.homography
                    .project(&p)
                    .ok_or(MatchError::DegenerateHomography)?,
            ),
            None => None,
        };

        tracing::debug!(
            "[Matcher] Feature match: {} keypoints, {} matches, {} inliers",
            reference.len(),
            matches.len(),
            inliers
        );

        Ok(Candidate {
            rectangle,
            point,
            score: inliers as f64 / matches.len() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::test_support::{scene, texture};
    use imageproc::geometric_transformations::{warp, Interpolation, Projection};

    #[test]
    fn hamming_counts_differing_bits() {
        let a = BriefDescriptor([0, 0, 0, 0]);
        let b = BriefDescriptor([0b1011, 0, u64::MAX, 1]);
        assert_eq!(a.hamming(&b), 3 + 64 + 1);
        assert_eq!(b.hamming(&b), 0);
    }

    #[test]
    fn pattern_is_deterministic_and_clipped() {
        let p1 = brief_pattern();
        let p2 = brief_pattern();
        assert_eq!(p1, p2);
        assert_eq!(p1.len(), 256);
        assert!(p1
            .iter()
            .flat_map(|pair| pair.iter())
            .all(|(x, y)| x.abs() <= PATTERN_CLIP && y.abs() <= PATTERN_CLIP));
    }

    #[test]
    fn flat_image_has_no_features() {
        let flat = GrayImage::from_pixel(120, 120, image::Luma([77]));
        assert!(OrbExtractor::new(500).extract(&flat, None).is_empty());
    }

    #[test]
    fn textured_image_matches_itself() {
        let img = texture(160, 120, 44);
        let extractor = OrbExtractor::new(500);
        let features = extractor.extract(&img, None);
        assert!(features.len() > 20);
        assert!(features.len() <= 500);

        let matches = ratio_matches(&features, &features, 0.75);
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|(i, j)| i == j));
    }

    #[test]
    fn region_filter_limits_keypoints() {
        let img = texture(160, 120, 45);
        let region = Rect::new(40.0, 30.0, 50.0, 40.0);
        let features = OrbExtractor::new(500).extract(&img, Some(region));
        assert!(features.iter().all(|f| region.contains(&f.keypoint.position)));
    }

    #[test]
    fn rotated_and_translated_frame_maps_rectangle_corners() {
        let object = texture(64, 64, 77);
        let reference = scene(220, 180, &object, 60, 50);

        let angle: f32 = 0.12;
        let (sin, cos) = angle.sin_cos();
        let matrix = [cos, -sin, 18.0, sin, cos, 6.0, 0.0, 0.0, 1.0];
        let projection = Projection::from_matrix(matrix).unwrap();
        let target = warp(&reference, &projection, Interpolation::Bilinear, image::Luma([128]));

        let region = Rect::new(60.0, 50.0, 64.0, 64.0);
        let request = MatchRequest {
            reference: &reference,
            target: &target,
            region,
            point: Some(Point::new(92.0, 82.0)),
            search_region: None,
        };
        let candidate = FeatureMatcher::new(500, 0.0).locate(&request).unwrap();
        assert!(candidate.score > 0.3, "confidence {}", candidate.score);

        let truth = |p: Point| {
            let (x, y) = (p.x as f32, p.y as f32);
            Point::new(
                (cos * x - sin * y + 18.0) as f64,
                (sin * x + cos * y + 6.0) as f64,
            )
        };
        let expected = Rect::bounding(&region.corners().map(truth)).unwrap();
        for (got, want) in candidate.rectangle.corners().iter().zip(expected.corners()) {
            assert!(got.distance(&want) < 3.0, "{:?} vs {:?}", got, want);
        }
        let point = candidate.point.unwrap();
        assert!(point.distance(&truth(Point::new(92.0, 82.0))) < 2.0);
    }

    #[test]
    fn flat_frames_have_too_few_keypoints() {
        let flat = GrayImage::from_pixel(120, 120, image::Luma([90]));
        let request = MatchRequest {
            reference: &flat,
            target: &flat,
            region: Rect::new(30.0, 30.0, 40.0, 40.0),
            point: None,
            search_region: None,
        };
        assert!(matches!(
            FeatureMatcher::new(500, 0.0).locate(&request),
            Err(MatchError::TooFewKeypoints { reference: 0, target: 0 })
        ));
    }
}
