//! Pixel to physical unit conversion.
//!
//! The ruler defines an isotropic scale: `pixels_per_mm = |p1 - p0| / mm`.
//! Everything upstream works in pixels; scaling is the last linear step
//! before output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::models::{Point, Ruler};

/// Output unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Pix,
    Mm,
    M,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Pix => "pix",
            Unit::Mm => "mm",
            Unit::M => "m",
        }
    }

    /// Whether this unit needs a ruler to be computed.
    pub fn requires_ruler(self) -> bool {
        !matches!(self, Unit::Pix)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pix" | "px" | "pixel" | "pixels" => Ok(Unit::Pix),
            "mm" => Ok(Unit::Mm),
            "m" => Ok(Unit::M),
            other => Err(ConfigurationError::UnknownUnit(other.to_string())),
        }
    }
}

/// Linear scale from pixels to the selected unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    unit: Unit,
    units_per_pixel: f64,
}

impl Calibration {
    /// Build a calibration, validating unit/ruler compatibility.
    pub fn new(unit: Unit, ruler: Option<&Ruler>) -> Result<Self, ConfigurationError> {
        let units_per_pixel = match unit {
            Unit::Pix => 1.0,
            Unit::Mm | Unit::M => {
                let ruler = ruler.ok_or_else(|| ConfigurationError::UnitRequiresRuler {
                    unit: unit.to_string(),
                })?;
                let mm_per_pixel = 1.0 / pixels_per_mm(ruler)?;
                if unit == Unit::M {
                    mm_per_pixel / 1000.0
                } else {
                    mm_per_pixel
                }
            }
        };
        Ok(Self {
            unit,
            units_per_pixel,
        })
    }

    /// Identity calibration.
    pub fn pixels() -> Self {
        Self {
            unit: Unit::Pix,
            units_per_pixel: 1.0,
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn units_per_pixel(&self) -> f64 {
        self.units_per_pixel
    }

    /// Scale a pixel-space quantity (distance, velocity or acceleration).
    pub fn apply(&self, value: f64) -> f64 {
        value * self.units_per_pixel
    }

    pub fn apply_point(&self, p: Point) -> Point {
        p.scaled(self.units_per_pixel)
    }
}

/// Pixels per millimetre of a ruler.
pub fn pixels_per_mm(ruler: &Ruler) -> Result<f64, ConfigurationError> {
    let length = ruler.pixel_length();
    if !(length > 0.0) {
        return Err(ConfigurationError::DegenerateRuler);
    }
    if !(ruler.mm > 0.0) || !ruler.mm.is_finite() {
        return Err(ConfigurationError::InvalidRulerLength(ruler.mm));
    }
    Ok(length / ruler.mm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruler(px: f64, mm: f64) -> Ruler {
        Ruler::new(Point::new(0.0, 0.0), Point::new(px * 0.6, px * 0.8), mm)
    }

    #[test]
    fn pix_is_identity_without_ruler() {
        let cal = Calibration::new(Unit::Pix, None).unwrap();
        assert_eq!(cal.apply(12.5), 12.5);
    }

    #[test]
    fn physical_units_require_ruler() {
        let err = Calibration::new(Unit::Mm, None).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnitRequiresRuler { .. }));
        assert!(Calibration::new(Unit::M, None).is_err());
    }

    #[test]
    fn mm_and_m_scales() {
        // 200 px span for 50 mm -> 4 px per mm.
        let r = ruler(200.0, 50.0);
        assert!((pixels_per_mm(&r).unwrap() - 4.0).abs() < 1e-12);

        let mm = Calibration::new(Unit::Mm, Some(&r)).unwrap();
        let m = Calibration::new(Unit::M, Some(&r)).unwrap();
        assert!((mm.apply(100.0) - 25.0).abs() < 1e-12);
        assert!((m.apply(100.0) - mm.apply(100.0) / 1000.0).abs() < 1e-15);
    }

    #[test]
    fn zero_length_ruler_rejected() {
        let r = Ruler::new(Point::new(3.0, 3.0), Point::new(3.0, 3.0), 10.0);
        assert_eq!(pixels_per_mm(&r), Err(ConfigurationError::DegenerateRuler));
        assert_eq!(
            Calibration::new(Unit::Mm, Some(&r)).unwrap_err(),
            ConfigurationError::DegenerateRuler
        );
    }

    #[test]
    fn non_positive_ruler_length_rejected() {
        let r = ruler(100.0, 0.0);
        assert_eq!(pixels_per_mm(&r), Err(ConfigurationError::InvalidRulerLength(0.0)));
    }

    #[test]
    fn unit_parsing() {
        assert_eq!("MM".parse::<Unit>().unwrap(), Unit::Mm);
        assert_eq!("pix".parse::<Unit>().unwrap(), Unit::Pix);
        assert!("inch".parse::<Unit>().is_err());
        assert_eq!(Unit::M.to_string(), "m");
    }
}
