//! Median flow tracker (MEDIANFLOW, TLD).
//!
//! A grid of points inside the box is tracked between consecutive frames
//! with pyramidal Lucas-Kanade. Points are tracked forward and back; only
//! points with low forward-backward error and high patch similarity vote.
//! The box moves by the median displacement and scales by the median
//! change of pairwise point distances.
//!
//! TLD additionally validates every update against the appearance learned
//! on the first frame.

use image::GrayImage;

use super::{check_init_box, TrackUpdate, TrackerAlgorithm, TrackingResult};
use crate::imaging::{zncc, Plane};
use crate::models::{Point, Rect};

const GRID_POINTS: usize = 10;
const PYRAMID_LEVELS: usize = 3;
const LK_HALF_WINDOW: i32 = 5;
const LK_MAX_ITERATIONS: usize = 20;
const LK_EPSILON: f64 = 0.01;
/// Minimum eigenvalue-like measure of the structure tensor.
const LK_MIN_DETERMINANT: f64 = 1e-3;
const NCC_PATCH: usize = 10;
const MAX_MEDIAN_FB_ERROR: f64 = 10.0;
const MIN_SURVIVING_POINTS: usize = 4;
const VALIDATION_PATCH: usize = 16;
const VALIDATION_MIN_NCC: f64 = 0.5;

/// One pyramid level with precomputed gradients.
struct Level {
    image: Plane,
    gx: Plane,
    gy: Plane,
}

fn build_pyramid(frame: &GrayImage) -> Vec<Level> {
    let mut levels = Vec::with_capacity(PYRAMID_LEVELS);
    let mut image = Plane::from_gray(frame);
    for level in 0..PYRAMID_LEVELS {
        if level > 0 {
            image = image.downsample();
        }
        let (gx, gy) = image.gradients();
        levels.push(Level {
            image: image.clone(),
            gx,
            gy,
        });
    }
    levels
}

/// Track one point from `prev` to `next`; `None` when the solve breaks down
/// or the point leaves the image.
fn lucas_kanade(prev: &[Level], next: &[Level], point: Point) -> Option<Point> {
    let mut guess = (0.0f64, 0.0f64);
    for level in (0..prev.len()).rev() {
        let factor = (1u32 << level) as f64;
        // Index coordinates at this level.
        let px = point.x / factor - 0.5;
        let py = point.y / factor - 0.5;
        let (p, n) = (&prev[level], &next[level]);

        let mut gxx = 0.0;
        let mut gxy = 0.0;
        let mut gyy = 0.0;
        let mut samples = Vec::with_capacity(((2 * LK_HALF_WINDOW + 1) as usize).pow(2));
        for wy in -LK_HALF_WINDOW..=LK_HALF_WINDOW {
            for wx in -LK_HALF_WINDOW..=LK_HALF_WINDOW {
                let x = px + wx as f64;
                let y = py + wy as f64;
                let ix = p.gx.sample(x, y);
                let iy = p.gy.sample(x, y);
                gxx += ix * ix;
                gxy += ix * iy;
                gyy += iy * iy;
                samples.push((x, y, p.image.sample(x, y), ix, iy));
            }
        }
        let det = gxx * gyy - gxy * gxy;
        if det < LK_MIN_DETERMINANT * samples.len() as f64 {
            return None;
        }

        let mut d = guess;
        for _ in 0..LK_MAX_ITERATIONS {
            let mut bx = 0.0;
            let mut by = 0.0;
            for &(x, y, value, ix, iy) in &samples {
                let diff = value - n.image.sample(x + d.0, y + d.1);
                bx += diff * ix;
                by += diff * iy;
            }
            let vx = (gyy * bx - gxy * by) / det;
            let vy = (gxx * by - gxy * bx) / det;
            d.0 += vx;
            d.1 += vy;
            if vx * vx + vy * vy < LK_EPSILON * LK_EPSILON {
                break;
            }
        }
        if !d.0.is_finite() || !d.1.is_finite() {
            return None;
        }
        guess = if level > 0 { (2.0 * d.0, 2.0 * d.1) } else { d };
    }

    let result = Point::new(point.x + guess.0, point.y + guess.1);
    let width = prev[0].image.width() as f64;
    let height = prev[0].image.height() as f64;
    (result.x >= 0.0 && result.x <= width && result.y >= 0.0 && result.y <= height).then_some(result)
}

/// Square patch of `size` samples centred on a point (pixel-area coords).
fn patch_around(plane: &Plane, centre: Point, size: usize) -> Plane {
    let half = size as f64 / 2.0;
    Plane::from_fn(size, size, |i, j| {
        plane.sample(
            centre.x - half + i as f64,
            centre.y - half + j as f64,
        )
    })
}

/// Patch covering a box, resampled to `size x size`.
fn box_patch(plane: &Plane, bbox: &Rect, size: usize) -> Plane {
    let sx = bbox.width / size as f64;
    let sy = bbox.height / size as f64;
    Plane::from_fn(size, size, |i, j| {
        plane.sample(
            bbox.x + (i as f64 + 0.5) * sx - 0.5,
            bbox.y + (j as f64 + 0.5) * sy - 0.5,
        )
    })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    })
}

/// Median flow tracker.
pub struct MedianFlow {
    name: &'static str,
    previous: Option<Vec<Level>>,
    /// Appearance on the first frame, present for TLD.
    reference: Option<Plane>,
    validate: bool,
}

impl MedianFlow {
    pub fn new() -> Self {
        Self {
            name: "MEDIANFLOW",
            previous: None,
            reference: None,
            validate: false,
        }
    }

    /// Median flow whose updates must resemble the initial appearance.
    pub fn with_validation() -> Self {
        Self {
            name: "TLD",
            validate: true,
            ..Self::new()
        }
    }

    fn grid(bbox: &Rect) -> Vec<Point> {
        let mut points = Vec::with_capacity(GRID_POINTS * GRID_POINTS);
        for j in 0..GRID_POINTS {
            for i in 0..GRID_POINTS {
                points.push(Point::new(
                    bbox.x + (i as f64 + 0.5) * bbox.width / GRID_POINTS as f64,
                    bbox.y + (j as f64 + 0.5) * bbox.height / GRID_POINTS as f64,
                ));
            }
        }
        points
    }

    fn estimate(&self, prev: &[Level], next: &[Level], previous: Rect) -> TrackUpdate {
        let points = Self::grid(&previous);
        let total = points.len();

        // (start, end, fb error, ncc)
        let mut tracks = Vec::with_capacity(total);
        for p in points {
            let Some(q) = lucas_kanade(prev, next, p) else {
                continue;
            };
            let Some(back) = lucas_kanade(next, prev, q) else {
                continue;
            };
            let fb = p.distance(&back);
            let ncc = zncc(
                &patch_around(&prev[0].image, p, NCC_PATCH),
                &patch_around(&next[0].image, q, NCC_PATCH),
            );
            tracks.push((p, q, fb, ncc));
        }

        if tracks.len() < MIN_SURVIVING_POINTS {
            return TrackUpdate::failure(previous, 0.0);
        }
        let mut fbs: Vec<f64> = tracks.iter().map(|t| t.2).collect();
        let mut nccs: Vec<f64> = tracks.iter().map(|t| t.3).collect();
        let (Some(median_fb), Some(median_ncc)) = (median(&mut fbs), median(&mut nccs)) else {
            return TrackUpdate::failure(previous, 0.0);
        };
        if median_fb > MAX_MEDIAN_FB_ERROR {
            return TrackUpdate::failure(previous, 0.0);
        }

        let kept: Vec<_> = tracks
            .into_iter()
            .filter(|t| t.2 <= median_fb && t.3 >= median_ncc)
            .collect();
        let confidence = kept.len() as f64 / total as f64;
        if kept.len() < MIN_SURVIVING_POINTS {
            return TrackUpdate::failure(previous, confidence);
        }

        let mut dxs: Vec<f64> = kept.iter().map(|t| t.1.x - t.0.x).collect();
        let mut dys: Vec<f64> = kept.iter().map(|t| t.1.y - t.0.y).collect();
        let mut ratios = Vec::new();
        for a in 0..kept.len() {
            for b in (a + 1)..kept.len() {
                let before = kept[a].0.distance(&kept[b].0);
                if before > 1e-6 {
                    ratios.push(kept[a].1.distance(&kept[b].1) / before);
                }
            }
        }
        let dx = median(&mut dxs).unwrap_or(0.0);
        let dy = median(&mut dys).unwrap_or(0.0);
        let scale = median(&mut ratios).unwrap_or(1.0).clamp(0.5, 2.0);

        let centre = previous.center();
        let bbox = Rect::from_center(
            Point::new(centre.x + dx, centre.y + dy),
            previous.width * scale,
            previous.height * scale,
        );
        TrackUpdate::success(bbox, confidence)
    }
}

impl Default for MedianFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerAlgorithm for MedianFlow {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, frame: &GrayImage, bbox: Rect) -> TrackingResult<()> {
        check_init_box(self.name, frame, bbox)?;
        let pyramid = build_pyramid(frame);
        if self.validate {
            self.reference = Some(box_patch(&pyramid[0].image, &bbox, VALIDATION_PATCH));
        }
        self.previous = Some(pyramid);
        Ok(())
    }

    fn update(&mut self, frame: &GrayImage, previous: Rect) -> TrackUpdate {
        let next = build_pyramid(frame);
        let Some(prev) = self.previous.replace(next) else {
            return TrackUpdate::failure(previous, 0.0);
        };
        let Some(next) = self.previous.as_ref() else {
            return TrackUpdate::failure(previous, 0.0);
        };

        let update = self.estimate(&prev, next, previous);
        if !update.success {
            return update;
        }

        if let Some(reference) = &self.reference {
            let similarity = zncc(reference, &box_patch(&next[0].image, &update.bbox, VALIDATION_PATCH));
            if similarity < VALIDATION_MIN_NCC {
                tracing::trace!("[Tracker] TLD validation rejected update (ncc {:.3})", similarity);
                return TrackUpdate::failure(previous, similarity.max(0.0));
            }
        }
        update
    }
}
