//! Pixel-space geometry primitives.
//!
//! Points and rectangles serialize as flat JSON arrays (`[x, y]` and
//! `[x, y, w, h]`) to match the settings document layout.

use serde::{Deserialize, Serialize};

/// A 2D pixel coordinate (also used for x/y components of derived quantities).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Component-wise scaling.
    pub fn scaled(&self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }
}

impl From<[f64; 2]> for Point {
    fn from(v: [f64; 2]) -> Self {
        Point::new(v[0], v[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Axis-aligned rectangle: top-left corner plus size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle of the given size centred on `center`.
    pub fn from_center(center: Point, width: f64, height: f64) -> Self {
        Self::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            width,
            height,
        )
    }

    /// Smallest rectangle containing all points.
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Corners in order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grow (or shrink, for negative values) each side by the given margin.
    pub fn inflated(&self, margin_x: f64, margin_y: f64) -> Rect {
        Rect::new(
            self.x - margin_x,
            self.y - margin_y,
            self.width + 2.0 * margin_x,
            self.height + 2.0 * margin_y,
        )
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Intersection with another rectangle, `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Integer pixel bounds `(x, y, w, h)` clipped to an image of the given size.
    pub fn to_pixel_bounds(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let frame = Rect::new(0.0, 0.0, image_width as f64, image_height as f64);
        let clipped = self.intersect(&frame)?;
        let x0 = clipped.x.round().max(0.0) as u32;
        let y0 = clipped.y.round().max(0.0) as u32;
        let x1 = (clipped.right().round() as u32).min(image_width);
        let y1 = (clipped.bottom().round() as u32).min(image_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

impl From<[f64; 4]> for Rect {
    fn from(v: [f64; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [f64; 4] {
    fn from(r: Rect) -> Self {
        [r.x, r.y, r.width, r.height]
    }
}

/// Region of interest given by two corners `(x0, y0, x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Roi {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Roi {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Normalized rectangle (corner order independent).
    pub fn to_rect(&self) -> Rect {
        let (x0, x1) = (self.x0.min(self.x1), self.x0.max(self.x1));
        let (y0, y1) = (self.y0.min(self.y1), self.y0.max(self.y1));
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn contains(&self, p: &Point) -> bool {
        self.to_rect().contains(p)
    }
}

impl From<[f64; 4]> for Roi {
    fn from(v: [f64; 4]) -> Self {
        Roi::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Roi> for [f64; 4] {
    fn from(r: Roi) -> Self {
        [r.x0, r.y0, r.x1, r.y1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_serializes_as_array() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        let json = serde_json::to_string(&rect).unwrap();
        assert_eq!(json, "[10.0,20.0,30.0,40.0]");

        let parsed: Rect = serde_json::from_str("[1, 2, 3, 4]").unwrap();
        assert_eq!(parsed, Rect::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn rect_center_round_trips_through_from_center() {
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        let c = rect.center();
        assert_eq!(c, Point::new(20.0, 20.0));
        assert_eq!(Rect::from_center(c, 20.0, 20.0), rect);
    }

    #[test]
    fn intersect_handles_disjoint() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 5.0, 5.0);
        assert!(a.intersect(&b).is_none());
        let c = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersect(&c), Some(Rect::new(5.0, 5.0, 5.0, 5.0)));
    }

    #[test]
    fn pixel_bounds_are_clipped() {
        let rect = Rect::new(-5.0, 90.0, 20.0, 20.0);
        assert_eq!(rect.to_pixel_bounds(100, 100), Some((0, 90, 15, 10)));
        assert!(Rect::new(200.0, 0.0, 5.0, 5.0).to_pixel_bounds(100, 100).is_none());
    }

    #[test]
    fn roi_normalizes_corner_order() {
        let roi = Roi::new(50.0, 60.0, 10.0, 20.0);
        assert_eq!(roi.to_rect(), Rect::new(10.0, 20.0, 40.0, 40.0));
        assert!(roi.contains(&Point::new(30.0, 30.0)));
    }
}
