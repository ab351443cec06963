//! Planar homography estimation (normalized DLT + RANSAC).

use nalgebra::{Matrix3, SMatrix, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::models::Point;

/// Determinant magnitude below which a homography is considered degenerate.
pub const MIN_DETERMINANT: f64 = 1e-6;
const RANSAC_CONFIDENCE: f64 = 0.995;
const RANSAC_SEED: u64 = 0x5eed_4a7c;

/// 3x3 projective transform mapping reference to target coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// Map a point; `None` when it projects to infinity.
    pub fn project(&self, p: &Point) -> Option<Point> {
        let v = self.0 * Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < 1e-12 {
            return None;
        }
        let q = Point::new(v.x / v.z, v.y / v.z);
        (q.x.is_finite() && q.y.is_finite()).then_some(q)
    }

    /// Determinant after scaling so that `h[2][2] == 1` where possible.
    pub fn normalized_determinant(&self) -> f64 {
        let h22 = self.0[(2, 2)];
        let m = if h22.abs() > 1e-12 { self.0 / h22 } else { self.0 };
        m.determinant()
    }

    pub fn is_degenerate(&self) -> bool {
        let det = self.normalized_determinant();
        !det.is_finite() || det.abs() < MIN_DETERMINANT || self.0.iter().any(|v| !v.is_finite())
    }

    fn reprojection_error(&self, src: &Point, dst: &Point) -> f64 {
        self.project(src).map_or(f64::INFINITY, |q| q.distance(dst))
    }
}

/// Similarity transform moving the centroid to the origin and the mean
/// distance to sqrt(2).
fn normalizing_transform(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply(t: &Matrix3<f64>, p: &Point) -> Point {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point::new(v.x / v.z, v.y / v.z)
}

/// Least-squares homography from at least four correspondences.
pub fn estimate_dlt(src: &[Point], dst: &[Point]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    let ts = normalizing_transform(src)?;
    let td = normalizing_transform(dst)?;

    // Accumulate A^T A directly instead of forming the 2n x 9 matrix.
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let s = apply(&ts, s);
        let d = apply(&td, d);
        let rows = [
            [-s.x, -s.y, -1.0, 0.0, 0.0, 0.0, d.x * s.x, d.x * s.y, d.x],
            [0.0, 0.0, 0.0, -s.x, -s.y, -1.0, d.y * s.x, d.y * s.y, d.y],
        ];
        for row in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_index, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_index);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let td_inv = td.try_inverse()?;
    let mut m = td_inv * hn * ts;
    let h22 = m[(2, 2)];
    if h22.abs() > 1e-12 {
        m /= h22;
    }
    let homography = Homography(m);
    (!homography.is_degenerate()).then_some(homography)
}

/// True when three of the four points are (nearly) collinear.
fn has_collinear_triplet(points: &[Point; 4]) -> bool {
    const TRIPLETS: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLETS.iter().any(|&(a, b, c)| {
        let (pa, pb, pc) = (points[a], points[b], points[c]);
        let area = (pb.x - pa.x) * (pc.y - pa.y) - (pb.y - pa.y) * (pc.x - pa.x);
        area.abs() < 1e-3
    })
}

/// RANSAC estimate.
#[derive(Debug, Clone)]
pub struct RansacFit {
    pub homography: Homography,
    pub inliers: Vec<bool>,
}

impl RansacFit {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// Robust homography estimate with a fixed seed.
///
/// Returns `None` when no model gathers at least four inliers.
pub fn ransac(src: &[Point], dst: &[Point], threshold: f64, max_iterations: usize) -> Option<RansacFit> {
    let n = src.len();
    if n != dst.len() || n < 4 {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
    let inliers_of = |h: &Homography| -> Vec<bool> {
        src.iter()
            .zip(dst)
            .map(|(s, d)| h.reprojection_error(s, d) < threshold)
            .collect()
    };

    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut required = max_iterations;
    let mut iteration = 0;
    while iteration < required.min(max_iterations) {
        iteration += 1;
        let idx = sample(&mut rng, n, 4).into_vec();
        let s4 = [src[idx[0]], src[idx[1]], src[idx[2]], src[idx[3]]];
        let d4 = [dst[idx[0]], dst[idx[1]], dst[idx[2]], dst[idx[3]]];
        if has_collinear_triplet(&s4) || has_collinear_triplet(&d4) {
            continue;
        }
        let Some(h) = estimate_dlt(&s4, &d4) else {
            continue;
        };
        let mask = inliers_of(&h);
        let count = mask.iter().filter(|&&b| b).count();
        if best.as_ref().map_or(true, |b| count > b.2) {
            let ratio = count as f64 / n as f64;
            let outlier_free = ratio.powi(4);
            if outlier_free >= 1.0 - 1e-12 {
                required = iteration;
            } else if outlier_free > 0.0 {
                let k = (1.0 - RANSAC_CONFIDENCE).ln() / (1.0 - outlier_free).ln();
                if k.is_finite() {
                    required = (k.ceil() as usize).max(1);
                }
            }
            best = Some((h, mask, count));
        }
    }

    let (h, mask, count) = best?;
    if count < 4 {
        return None;
    }

    // Refit on all inliers; keep the refit only if it does not lose support.
    let (s_in, d_in): (Vec<Point>, Vec<Point>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|((s, d), _)| (*s, *d))
        .unzip();
    if let Some(refit) = estimate_dlt(&s_in, &d_in) {
        let refit_mask = inliers_of(&refit);
        if refit_mask.iter().filter(|&&b| b).count() >= count {
            return Some(RansacFit {
                homography: refit,
                inliers: refit_mask,
            });
        }
    }
    Some(RansacFit {
        homography: h,
        inliers: mask,
    })
}
