//! Image primitives shared by the trackers and the region matcher.
//!
//! Works on [`Plane`], a dense single-channel `f64` raster. Coordinates follow
//! the pixel-area convention: pixel `(u, v)` covers `[u, u+1) x [v, v+1)`, so
//! its centre sits at `(u + 0.5, v + 0.5)`.

use std::sync::Arc;

use image::GrayImage;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Dense single-channel floating point image.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        let (w, h) = image.dimensions();
        Self {
            width: w as usize,
            height: h as usize,
            data: image.as_raw().iter().map(|&v| v as f64).collect(),
        }
    }

    /// Build a plane by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        self.data[y * self.width + x] = value;
    }

    /// Bilinear sample at index coordinates, clamping at the border.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;
        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// Mean and population standard deviation.
    pub fn mean_std(&self) -> (f64, f64) {
        let mean = self.mean();
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        let var = self.data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.data.len() as f64;
        (mean, var.sqrt())
    }

    /// Element-wise product with another plane of the same size.
    pub fn multiply(&mut self, other: &Plane) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a *= b;
        }
    }

    /// Blend towards `other`: `self = (1 - rate) * self + rate * other`.
    pub fn blend(&mut self, other: &Plane, rate: f64) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a = (1.0 - rate) * *a + rate * b;
        }
    }

    /// Half-resolution plane (2x2 box average).
    pub fn downsample(&self) -> Plane {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        Plane::from_fn(w, h, |x, y| {
            let sx = (2 * x).min(self.width - 1);
            let sy = (2 * y).min(self.height - 1);
            let sx1 = (sx + 1).min(self.width - 1);
            let sy1 = (sy + 1).min(self.height - 1);
            0.25 * (self.get(sx, sy) + self.get(sx1, sy) + self.get(sx, sy1) + self.get(sx1, sy1))
        })
    }

    /// Central-difference gradients `(gx, gy)`.
    pub fn gradients(&self) -> (Plane, Plane) {
        let w = self.width;
        let h = self.height;
        let gx = Plane::from_fn(w, h, |x, y| {
            let l = self.get(x.saturating_sub(1), y);
            let r = self.get((x + 1).min(w - 1), y);
            0.5 * (r - l)
        });
        let gy = Plane::from_fn(w, h, |x, y| {
            let t = self.get(x, y.saturating_sub(1));
            let b = self.get(x, (y + 1).min(h - 1));
            0.5 * (b - t)
        });
        (gx, gy)
    }

    /// Location and value of the maximum.
    pub fn argmax(&self) -> Option<(usize, usize, f64)> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, &v)| (i % self.width, i / self.width, v))
    }

    /// Sub-pixel refinement of a peak by fitting parabolas along each axis.
    pub fn refine_peak(&self, x: usize, y: usize) -> (f64, f64) {
        let dx = if x > 0 && x + 1 < self.width {
            parabolic_offset(self.get(x - 1, y), self.get(x, y), self.get(x + 1, y))
        } else {
            0.0
        };
        let dy = if y > 0 && y + 1 < self.height {
            parabolic_offset(self.get(x, y - 1), self.get(x, y), self.get(x, y + 1))
        } else {
            0.0
        };
        (x as f64 + dx, y as f64 + dy)
    }

    /// Sub-plane copy; the region must lie inside the plane.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Plane {
        Plane::from_fn(width, height, |i, j| self.get(x + i, y + j))
    }
}

/// Offset of a parabola's vertex through three samples, in `[-0.5, 0.5]`.
pub fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Bilinear sample of an 8-bit image at index coordinates, clamping at the
/// border.
pub fn sample_gray(image: &GrayImage, x: f64, y: f64) -> f64 {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let x = x.clamp(0.0, (w - 1) as f64);
    let y = y.clamp(0.0, (h - 1) as f64);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let p = |px: u32, py: u32| image.get_pixel(px, py)[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resample the `src_w x src_h` area centred on `(cx, cy)` to an
/// `out_w x out_h` plane.
pub fn sample_patch(
    image: &GrayImage,
    cx: f64,
    cy: f64,
    src_w: f64,
    src_h: f64,
    out_w: usize,
    out_h: usize,
) -> Plane {
    let step_x = src_w / out_w as f64;
    let step_y = src_h / out_h as f64;
    let x0 = cx - src_w / 2.0;
    let y0 = cy - src_h / 2.0;
    Plane::from_fn(out_w, out_h, |i, j| {
        let x = x0 + (i as f64 + 0.5) * step_x - 0.5;
        let y = y0 + (j as f64 + 0.5) * step_y - 0.5;
        sample_gray(image, x, y)
    })
}

/// Separable 2D Hann window.
pub fn hann_window(width: usize, height: usize) -> Plane {
    let hann = |n: usize, len: usize| {
        if len <= 1 {
            1.0
        } else {
            0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / (len - 1) as f64).cos()
        }
    };
    Plane::from_fn(width, height, |x, y| hann(x, width) * hann(y, height))
}

/// Gaussian peak of standard deviation `sigma` centred at `(width/2, height/2)`.
pub fn gaussian_peak(width: usize, height: usize, sigma: f64) -> Plane {
    let cx = (width / 2) as f64;
    let cy = (height / 2) as f64;
    let s2 = 2.0 * sigma * sigma;
    Plane::from_fn(width, height, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        (-(dx * dx + dy * dy) / s2).exp()
    })
}

/// 2D FFT of fixed size built from row and column 1D transforms.
pub struct Fft2 {
    width: usize,
    height: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2 {
    pub fn new(width: usize, height: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            width,
            height,
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Forward transform of a real plane (zero-padded when smaller).
    pub fn forward(&self, plane: &Plane) -> Vec<Complex<f64>> {
        let mut buf = vec![Complex::new(0.0, 0.0); self.width * self.height];
        for y in 0..plane.height().min(self.height) {
            for x in 0..plane.width().min(self.width) {
                buf[y * self.width + x] = Complex::new(plane.get(x, y), 0.0);
            }
        }
        self.transform(&mut buf, true);
        buf
    }

    /// Inverse transform, returning the normalized real part.
    pub fn inverse_real(&self, mut spectrum: Vec<Complex<f64>>) -> Plane {
        self.transform(&mut spectrum, false);
        let n = (self.width * self.height) as f64;
        let data = spectrum.into_iter().map(|c| c.re / n).collect();
        Plane {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn transform(&self, buf: &mut [Complex<f64>], forward: bool) {
        let (row, col) = if forward {
            (&self.row_forward, &self.col_forward)
        } else {
            (&self.row_inverse, &self.col_inverse)
        };
        for chunk in buf.chunks_exact_mut(self.width) {
            row.process(chunk);
        }
        let mut column = vec![Complex::new(0.0, 0.0); self.height];
        for x in 0..self.width {
            for y in 0..self.height {
                column[y] = buf[y * self.width + x];
            }
            col.process(&mut column);
            for y in 0..self.height {
                buf[y * self.width + x] = column[y];
            }
        }
    }
}

/// Summed-area tables of values and squared values.
pub struct IntegralImage {
    width: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl IntegralImage {
    pub fn new(plane: &Plane) -> Self {
        let w = plane.width() + 1;
        let h = plane.height() + 1;
        let mut sum = vec![0.0; w * h];
        let mut sq_sum = vec![0.0; w * h];
        for y in 0..plane.height() {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..plane.width() {
                let v = plane.get(x, y);
                row += v;
                row_sq += v * v;
                sum[(y + 1) * w + x + 1] = sum[y * w + x + 1] + row;
                sq_sum[(y + 1) * w + x + 1] = sq_sum[y * w + x + 1] + row_sq;
            }
        }
        Self {
            width: w,
            sum,
            sq_sum,
        }
    }

    /// Sum and sum of squares over `[x, x+w) x [y, y+h)`.
    pub fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let idx = |xx: usize, yy: usize| yy * self.width + xx;
        let a = idx(x, y);
        let b = idx(x + w, y);
        let c = idx(x, y + h);
        let d = idx(x + w, y + h);
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq_sum[d] - self.sq_sum[b] - self.sq_sum[c] + self.sq_sum[a],
        )
    }
}

/// Zero-mean normalized cross-correlation of `template` at every valid
/// offset inside `search`.
///
/// Scores lie in `[-1, 1]`; windows with no variance score 0. Returns `None`
/// when the template does not fit or has no variance.
pub fn zncc_map(search: &Plane, template: &Plane) -> Option<Plane> {
    let (sw, sh) = (search.width(), search.height());
    let (tw, th) = (template.width(), template.height());
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return None;
    }

    let (t_mean, _) = template.mean_std();
    let centred = Plane::from_fn(tw, th, |x, y| template.get(x, y) - t_mean);
    let t_energy: f64 = centred.data().iter().map(|v| v * v).sum();
    if t_energy <= 1e-9 {
        return None;
    }

    let fft = Fft2::new(sw, sh);
    let search_f = fft.forward(search);
    let template_f = fft.forward(&centred);
    let product = search_f
        .iter()
        .zip(&template_f)
        .map(|(s, t)| *s * t.conj())
        .collect();
    let correlation = fft.inverse_real(product);

    let integral = IntegralImage::new(search);
    let n = (tw * th) as f64;
    let out_w = sw - tw + 1;
    let out_h = sh - th + 1;
    let t_norm = t_energy.sqrt();
    Some(Plane::from_fn(out_w, out_h, |x, y| {
        let (s, sq) = integral.window(x, y, tw, th);
        let var = sq - s * s / n;
        // Flat windows and FFT round-off near zero variance.
        if var <= 1e-6 * n {
            return 0.0;
        }
        (correlation.get(x, y) / (t_norm * var.sqrt())).clamp(-1.0, 1.0)
    }))
}

/// Direct zero-mean NCC of two equally sized planes.
pub fn zncc(a: &Plane, b: &Plane) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (ma, _) = a.mean_std();
    let (mb, _) = b.mean_std();
    let mut num = 0.0;
    let mut ea = 0.0;
    let mut eb = 0.0;
    for (x, y) in a.data().iter().zip(b.data()) {
        let dx = x - ma;
        let dy = y - mb;
        num += dx * dy;
        ea += dx * dx;
        eb += dy * dy;
    }
    if ea <= 1e-12 || eb <= 1e-12 {
        return 0.0;
    }
    num / (ea * eb).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(w: usize, h: usize, seed: u64) -> Plane {
        let mut rng = StdRng::seed_from_u64(seed);
        Plane::from_fn(w, h, |_, _| rng.gen_range(0.0..255.0))
    }

    #[test]
    fn bilinear_sampling_interpolates() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([100]));
        assert!((sample_gray(&img, 0.5, 0.0) - 50.0).abs() < 1e-9);
        assert!((sample_gray(&img, -3.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((sample_gray(&img, 9.0, 0.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn fft_round_trip() {
        let plane = noise(12, 7, 1);
        let fft = Fft2::new(12, 7);
        let back = fft.inverse_real(fft.forward(&plane));
        for (a, b) in plane.data().iter().zip(back.data()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn zncc_map_finds_embedded_template() {
        let search = noise(40, 30, 7);
        let template = search.crop(13, 9, 8, 6);
        let map = zncc_map(&search, &template).unwrap();
        let (x, y, score) = map.argmax().unwrap();
        assert_eq!((x, y), (13, 9));
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zncc_map_rejects_flat_template() {
        let search = noise(20, 20, 3);
        let flat = Plane::from_fn(5, 5, |_, _| 10.0);
        assert!(zncc_map(&search, &flat).is_none());
    }

    #[test]
    fn integral_window_sums() {
        let plane = Plane::from_fn(4, 3, |x, y| (x + y) as f64);
        let integral = IntegralImage::new(&plane);
        let (s, sq) = integral.window(1, 1, 2, 2);
        // values: (2, 3, 3, 4)
        assert_eq!(s, 12.0);
        assert_eq!(sq, 38.0);
    }

    #[test]
    fn parabolic_peak_refinement() {
        let plane = Plane::from_fn(5, 1, |x, _| -((x as f64 - 2.3).powi(2)));
        let (x, _) = plane.refine_peak(2, 0);
        assert!((x - 2.3).abs() < 1e-9);
    }

    #[test]
    fn direct_zncc_matches_identity() {
        let a = noise(6, 6, 11);
        assert!((zncc(&a, &a) - 1.0).abs() < 1e-12);
        let inverted = Plane::from_fn(6, 6, |x, y| 255.0 - a.get(x, y));
        assert!((zncc(&a, &inverted) + 1.0).abs() < 1e-12);
    }
}
