//! Pixel indices, axis calibration and polar coordinates.
//!
//! Two coordinate spaces appear throughout the crate and are kept apart by type:
//!
//! - **Pixel space**: integer array indices, represented by [`PixelIndex`].
//!   `x` is the column, `y` is the row.
//! - **Calibrated space**: physical coordinates (e.g. 1/nm in a diffraction
//!   pattern), represented by [`Vector2`]. Produced from pixel space by
//!   [`pixels_to_dim`] using one [`Dim`] lookup vector per axis.
//!
//! [`to_polar`] works in whichever space its inputs share; the center must be
//! expressed in the same space as the points.

use crate::error::{ensure_center, Error, Result};
use crate::Vector2;

/// Calibration descriptor for one image axis.
///
/// `values[i]` is the physical coordinate of pixel index `i` along the axis.
/// `dims[0]` always describes the x (column) axis and `dims[1]` the y (row) axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Dim {
    /// Calibrated coordinate for every pixel index, ordered like the axis.
    pub values: Vec<f64>,
    /// Human-readable axis name.
    pub name: String,
    /// Unit string.
    pub unit: String,
}

impl Dim {
    pub fn new(values: Vec<f64>, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            values,
            name: name.into(),
            unit: unit.into(),
        }
    }

    /// Identity calibration: pixel index `i` maps to `i as f64`.
    pub fn from_pixels(len: usize, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self::new((0..len).map(|i| i as f64).collect(), name, unit)
    }

    /// Linear calibration `offset + i * step`.
    pub fn linear(
        len: usize,
        offset: f64,
        step: f64,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self::new(
            (0..len).map(|i| offset + i as f64 * step).collect(),
            name,
            unit,
        )
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Absolute spacing between the first two samples, or `None` for axes
    /// shorter than two pixels.
    pub fn spacing(&self) -> Option<f64> {
        match self.values.as_slice() {
            [a, b, ..] => Some((b - a).abs()),
            _ => None,
        }
    }
}

/// Check that at least two non-empty axis descriptors are present.
pub(crate) fn validate_dims(dims: &[Dim]) -> Result<()> {
    if dims.len() < 2 {
        return Err(Error::TooFewDims {
            expected: 2,
            actual: dims.len(),
        });
    }
    for (axis, dim) in dims.iter().enumerate().take(2) {
        if dim.is_empty() {
            return Err(Error::EmptyDim { axis });
        }
    }
    Ok(())
}

/// Integer pixel position; `x` is the column index and `y` the row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelIndex {
    pub x: usize,
    pub y: usize,
}

impl PixelIndex {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// The same position as a floating-point point in pixel units.
    pub fn to_point(self) -> Vector2 {
        Vector2::new(self.x as f64, self.y as f64)
    }
}

impl From<(usize, usize)> for PixelIndex {
    fn from((x, y): (usize, usize)) -> Self {
        Self { x, y }
    }
}

/// Convert pixel indices into calibrated coordinates.
///
/// Each point's `x` index is looked up in `dims[0]` and its `y` index in
/// `dims[1]`. An index past the end of its lookup vector is an error, never
/// clamped.
pub fn pixels_to_dim(points: &[PixelIndex], dims: &[Dim]) -> Result<Vec<Vector2>> {
    validate_dims(dims)?;
    let (xs, ys) = (&dims[0].values, &dims[1].values);

    points
        .iter()
        .map(|p| {
            let x = xs.get(p.x).ok_or(Error::IndexOutOfBounds {
                axis: 0,
                index: p.x,
                len: xs.len(),
            })?;
            let y = ys.get(p.y).ok_or(Error::IndexOutOfBounds {
                axis: 1,
                index: p.y,
                len: ys.len(),
            })?;
            Ok(Vector2::new(*x, *y))
        })
        .collect()
}

/// Convert a single pixel index; the one-point form of [`pixels_to_dim`].
pub fn pixel_to_dim(point: PixelIndex, dims: &[Dim]) -> Result<Vector2> {
    pixels_to_dim(&[point], dims).map(|v| v[0])
}

/// A point in polar form about some center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarPoint {
    /// Distance from the center, always ≥ 0.
    pub radius: f64,
    /// `atan2(y - cy, x - cx)`, in (-π, π].
    pub angle: f64,
}

impl PolarPoint {
    pub fn new(radius: f64, angle: f64) -> Self {
        Self { radius, angle }
    }

    /// Back to Cartesian coordinates about `center`.
    pub fn to_cartesian(&self, center: &Vector2) -> Vector2 {
        Vector2::new(
            center.x + self.radius * self.angle.cos(),
            center.y + self.radius * self.angle.sin(),
        )
    }
}

/// Polar form of one point about `center`.
#[inline]
pub(crate) fn polar_of(p: &Vector2, center: &Vector2) -> PolarPoint {
    let dx = p.x - center.x;
    let dy = p.y - center.y;
    PolarPoint {
        radius: dx.hypot(dy),
        angle: dy.atan2(dx),
    }
}

/// Convert points to `(radius, angle)` about `center`.
///
/// `radius = hypot(x - cx, y - cy)`, `angle = atan2(y - cy, x - cx)`.
pub fn to_polar(points: &[Vector2], center: &Vector2) -> Result<Vec<PolarPoint>> {
    ensure_center(center)?;
    Ok(points.iter().map(|p| polar_of(p, center)).collect())
}
