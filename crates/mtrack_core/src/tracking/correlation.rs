//! Correlation filter trackers (MOSSE, KCF, CSRT).
//!
//! All three learn a filter in the Fourier domain over a padded window
//! around the target and locate the target as the peak of the filter
//! response on the next frame:
//! - MOSSE: linear filter on log-normalized intensities
//! - KCF: kernel ridge regression with a Gaussian kernel
//! - CSRT: KCF with a spatial reliability mask and a 3-scale search
//!
//! Failure is reported when the peak-to-sidelobe ratio drops below the
//! variant's threshold.

use image::GrayImage;
use rustfft::num_complex::Complex;

use super::{check_init_box, TrackUpdate, TrackerAlgorithm, TrackingResult};
use crate::imaging::{gaussian_peak, hann_window, sample_patch, Fft2, Plane};
use crate::models::Rect;

/// Context around the target, relative to its size.
const PADDING: f64 = 1.5;
/// Largest side of the working grid in samples.
const MAX_GRID_SIDE: f64 = 64.0;
/// Half-size of the area around the peak excluded from the sidelobe.
const SIDELOBE_EXCLUSION: usize = 5;
const CSRT_SCALES: [f64; 3] = [0.97, 1.0, 1.03];
const SCALE_PENALTY: f64 = 0.95;
/// Weight of the context outside the target box in the CSRT mask.
const MASK_BACKGROUND: f64 = 0.25;

/// Which correlation filter flavour to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationVariant {
    Mosse,
    Kcf,
    Csrt,
}

impl CorrelationVariant {
    fn name(self) -> &'static str {
        match self {
            CorrelationVariant::Mosse => "MOSSE",
            CorrelationVariant::Kcf => "KCF",
            CorrelationVariant::Csrt => "CSRT",
        }
    }

    fn learning_rate(self) -> f64 {
        match self {
            CorrelationVariant::Mosse => 0.125,
            CorrelationVariant::Kcf | CorrelationVariant::Csrt => 0.075,
        }
    }

    fn psr_threshold(self) -> f64 {
        match self {
            CorrelationVariant::Mosse => 5.0,
            CorrelationVariant::Kcf | CorrelationVariant::Csrt => 4.0,
        }
    }
}

/// Learned filter state, set up on `init`.
struct Model {
    fft: Fft2,
    window: Plane,
    mask: Option<Plane>,
    label_f: Vec<Complex<f64>>,
    /// Padded window size in pixels at scale 1.
    window_size: (f64, f64),
    /// Target size at scale 1.
    target_size: (f64, f64),
    scale: f64,
    // MOSSE
    numerator: Vec<Complex<f64>>,
    denominator: Vec<Complex<f64>>,
    regularization: f64,
    // KCF / CSRT
    template: Plane,
    alpha_f: Vec<Complex<f64>>,
}

/// Correlation filter tracker.
pub struct CorrelationFilter {
    variant: CorrelationVariant,
    model: Option<Model>,
}

impl CorrelationFilter {
    pub fn new(variant: CorrelationVariant) -> Self {
        Self {
            variant,
            model: None,
        }
    }

    fn preprocess(&self, raw: Plane, window: &Plane) -> Plane {
        let mut plane = raw;
        if self.variant == CorrelationVariant::Mosse {
            for v in plane.data_mut() {
                *v = (*v + 1.0).ln();
            }
        }
        let (mean, std) = plane.mean_std();
        for v in plane.data_mut() {
            *v = if std > 1e-6 { (*v - mean) / std } else { 0.0 };
        }
        plane.multiply(window);
        plane
    }

    fn extract(&self, model: &Model, frame: &GrayImage, cx: f64, cy: f64, scale: f64) -> Plane {
        let raw = sample_patch(
            frame,
            cx,
            cy,
            model.window_size.0 * scale,
            model.window_size.1 * scale,
            model.fft.width(),
            model.fft.height(),
        );
        self.preprocess(raw, &model.window)
    }

    /// Train (or blend into) the filter from a feature patch.
    fn train(&self, model: &mut Model, features: &Plane, rate: f64) {
        match self.variant {
            CorrelationVariant::Mosse => {
                let xf = model.fft.forward(features);
                for i in 0..xf.len() {
                    let num = model.label_f[i] * xf[i].conj();
                    let den = xf[i] * xf[i].conj();
                    model.numerator[i] = model.numerator[i] * (1.0 - rate) + num * rate;
                    model.denominator[i] = model.denominator[i] * (1.0 - rate) + den * rate;
                }
            }
            CorrelationVariant::Kcf | CorrelationVariant::Csrt => {
                let mut x = features.clone();
                if let Some(mask) = &model.mask {
                    x.multiply(mask);
                }
                let kxx = gaussian_correlation(&model.fft, &x, &x);
                let kf = model.fft.forward(&kxx);
                for i in 0..kf.len() {
                    let alpha = model.label_f[i] / (kf[i] + KCF_LAMBDA);
                    model.alpha_f[i] = model.alpha_f[i] * (1.0 - rate) + alpha * rate;
                }
                model.template.blend(&x, rate);
            }
        }
    }

    fn respond(&self, model: &Model, z: &Plane) -> Plane {
        match self.variant {
            CorrelationVariant::Mosse => {
                let zf = model.fft.forward(z);
                let product = zf
                    .iter()
                    .zip(model.numerator.iter().zip(&model.denominator))
                    .map(|(z, (n, d))| *z * (*n / (*d + model.regularization)))
                    .collect();
                model.fft.inverse_real(product)
            }
            CorrelationVariant::Kcf | CorrelationVariant::Csrt => {
                let kxz = gaussian_correlation(&model.fft, &model.template, z);
                let kf = model.fft.forward(&kxz);
                let product = kf.iter().zip(&model.alpha_f).map(|(k, a)| *k * *a).collect();
                model.fft.inverse_real(product)
            }
        }
    }
}

const KCF_LAMBDA: f64 = 1e-4;
const KCF_SIGMA: f64 = 0.5;

/// Gaussian kernel correlation of `x` with every cyclic shift of `z`.
fn gaussian_correlation(fft: &Fft2, x: &Plane, z: &Plane) -> Plane {
    let xf = fft.forward(x);
    let zf = fft.forward(z);
    let cross = xf.iter().zip(&zf).map(|(a, b)| a.conj() * *b).collect();
    let c = fft.inverse_real(cross);
    let xx: f64 = x.data().iter().map(|v| v * v).sum();
    let zz: f64 = z.data().iter().map(|v| v * v).sum();
    let n = x.len() as f64;
    let mut k = c;
    for v in k.data_mut() {
        let d = ((xx + zz - 2.0 * *v) / n).max(0.0);
        *v = (-d / (KCF_SIGMA * KCF_SIGMA)).exp();
    }
    k
}

/// Peak-to-sidelobe ratio around a peak.
fn peak_to_sidelobe(response: &Plane, px: usize, py: usize, peak: f64) -> f64 {
    let mut sum = 0.0;
    let mut sq = 0.0;
    let mut count = 0usize;
    for y in 0..response.height() {
        for x in 0..response.width() {
            if x.abs_diff(px) <= SIDELOBE_EXCLUSION && y.abs_diff(py) <= SIDELOBE_EXCLUSION {
                continue;
            }
            let v = response.get(x, y);
            sum += v;
            sq += v * v;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    let std = (sq / count as f64 - mean * mean).max(0.0).sqrt();
    if std < 1e-12 {
        return 0.0;
    }
    (peak - mean) / std
}

impl TrackerAlgorithm for CorrelationFilter {
    fn name(&self) -> &str {
        self.variant.name()
    }

    fn init(&mut self, frame: &GrayImage, bbox: Rect) -> TrackingResult<()> {
        check_init_box(self.name(), frame, bbox)?;

        let window_size = (bbox.width * (1.0 + PADDING), bbox.height * (1.0 + PADDING));
        let grid_scale = (MAX_GRID_SIDE / window_size.0.max(window_size.1)).min(1.0);
        let gw = ((window_size.0 * grid_scale).round() as usize).max(8);
        let gh = ((window_size.1 * grid_scale).round() as usize).max(8);

        let fft = Fft2::new(gw, gh);
        let sigma = (0.1 * (bbox.width * bbox.height).sqrt() * grid_scale).max(1.0);
        let label_f = fft.forward(&gaussian_peak(gw, gh, sigma));

        let mask = (self.variant == CorrelationVariant::Csrt).then(|| {
            let tw = gw as f64 / (1.0 + PADDING);
            let th = gh as f64 / (1.0 + PADDING);
            let x0 = (gw as f64 - tw) / 2.0;
            let y0 = (gh as f64 - th) / 2.0;
            Plane::from_fn(gw, gh, |x, y| {
                let (fx, fy) = (x as f64 + 0.5, y as f64 + 0.5);
                if fx >= x0 && fx <= x0 + tw && fy >= y0 && fy <= y0 + th {
                    1.0
                } else {
                    MASK_BACKGROUND
                }
            })
        });

        let zero = vec![Complex::new(0.0, 0.0); gw * gh];
        let mut model = Model {
            window: hann_window(gw, gh),
            fft,
            mask,
            label_f,
            window_size,
            target_size: (bbox.width, bbox.height),
            scale: 1.0,
            numerator: zero.clone(),
            denominator: zero.clone(),
            regularization: 0.0,
            template: Plane::new(gw, gh),
            alpha_f: zero,
        };

        let centre = bbox.center();
        let features = self.extract(&model, frame, centre.x, centre.y, 1.0);
        self.train(&mut model, &features, 1.0);
        if self.variant == CorrelationVariant::Mosse {
            let mean_power = model.denominator.iter().map(|d| d.re).sum::<f64>()
                / model.denominator.len() as f64;
            model.regularization = 0.01 * mean_power.max(1e-9);
        }

        tracing::trace!(
            "[Tracker] {} initialized: grid {}x{}, sigma {:.2}",
            self.name(),
            gw,
            gh,
            sigma
        );
        self.model = Some(model);
        Ok(())
    }

    fn update(&mut self, frame: &GrayImage, previous: Rect) -> TrackUpdate {
        let Some(mut model) = self.model.take() else {
            return TrackUpdate::failure(previous, 0.0);
        };

        let centre = previous.center();
        let scales: &[f64] = if self.variant == CorrelationVariant::Csrt {
            &CSRT_SCALES
        } else {
            &[1.0]
        };

        // (weighted peak, raw peak, peak x, peak y, scale factor, psr)
        let mut best: Option<(f64, f64, f64, f64, f64, f64)> = None;
        for &factor in scales {
            let z = self.extract(&model, frame, centre.x, centre.y, model.scale * factor);
            let response = self.respond(&model, &z);
            let Some((px, py, peak)) = response.argmax() else {
                continue;
            };
            let weighted = if factor == 1.0 { peak } else { peak * SCALE_PENALTY };
            if best.map_or(true, |b| weighted > b.0) {
                let (rx, ry) = response.refine_peak(px, py);
                let psr = peak_to_sidelobe(&response, px, py, peak);
                best = Some((weighted, peak, rx, ry, factor, psr));
            }
        }

        let Some((_, _, rx, ry, factor, psr)) = best else {
            self.model = Some(model);
            return TrackUpdate::failure(previous, 0.0);
        };
        if !psr.is_finite() || psr < self.variant.psr_threshold() {
            self.model = Some(model);
            return TrackUpdate::failure(previous, psr.max(0.0));
        }

        let scale = (model.scale * factor).clamp(0.2, 5.0);
        let px_per_cell = model.window_size.0 * scale / model.fft.width() as f64;
        let py_per_cell = model.window_size.1 * scale / model.fft.height() as f64;
        let dx = (rx - (model.fft.width() / 2) as f64) * px_per_cell;
        let dy = (ry - (model.fft.height() / 2) as f64) * py_per_cell;
        let new_centre_x = centre.x + dx;
        let new_centre_y = centre.y + dy;
        model.scale = scale;

        let features = self.extract(&model, frame, new_centre_x, new_centre_y, scale);
        let rate = self.variant.learning_rate();
        self.train(&mut model, &features, rate);

        let bbox = Rect::new(
            new_centre_x - model.target_size.0 * scale / 2.0,
            new_centre_y - model.target_size.1 * scale / 2.0,
            model.target_size.0 * scale,
            model.target_size.1 * scale,
        );
        self.model = Some(model);
        TrackUpdate::success(bbox, psr)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn psr_of_flat_response_is_zero() {
        let flat = Plane::from_fn(20, 20, |_, _| 1.0);
        assert_eq!(peak_to_sidelobe(&flat, 10, 10, 1.0), 0.0);
    }

    #[test]
    fn mosse_reports_failure_when_object_vanishes() {
        let object = texture(20, 20, 9);
        let first = scene(120, 120, &object, 50, 50);
        let empty = GrayImage::from_pixel(120, 120, image::Luma([128]));

        let mut tracker = CorrelationFilter::new(CorrelationVariant::Mosse);
        let bbox = object_rect(&object, 50, 50);
        tracker.init(&first, bbox).unwrap();
        let update = tracker.update(&empty, bbox);
        assert!(!update.success);
        assert_eq!(update.bbox, bbox);
    }

    #[test]
    fn kcf_is_deterministic() {
        let object = texture(20, 20, 4);
        let frames = moving_scene(5, (120, 100), &object, (30, 30), (2, 1));
        let run = || {
            let mut tracker = CorrelationFilter::new(CorrelationVariant::Kcf);
            let mut bbox = object_rect(&object, 30, 30);
            tracker.init(&frames[0], bbox).unwrap();
            for frame in &frames[1..] {
                bbox = tracker.update(frame, bbox).bbox;
            }
            bbox
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn csrt_keeps_scale_on_rigid_motion() {
        let object = texture(24, 24, 2);
        let frames = moving_scene(6, (140, 120), &object, (30, 40), (2, 2));
        let mut tracker = CorrelationFilter::new(CorrelationVariant::Csrt);
        let mut bbox = object_rect(&object, 30, 40);
        tracker.init(&frames[0], bbox).unwrap();
        for frame in &frames[1..] {
            bbox = tracker.update(frame, bbox).bbox;
        }
        assert!((bbox.width - 24.0).abs() < 3.0, "width drifted to {}", bbox.width);
    }
}
