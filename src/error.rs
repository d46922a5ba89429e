//! Input-validation errors.
//!
//! Every public operation validates its inputs before doing any work and
//! returns one of these on failure. Solver non-convergence is *not* an error:
//! it is reported through [`SolverStatus`](crate::lsq::SolverStatus) on the
//! returned estimate.

use thiserror::Error;

/// Errors raised when shape, length or value invariants are violated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Image is empty")]
    EmptyImage,

    #[error("Shape mismatch: {what} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Expected at least {expected} dimension descriptors, got {actual}")]
    TooFewDims { expected: usize, actual: usize },

    #[error("Dimension descriptor {axis} has no calibration values")]
    EmptyDim { axis: usize },

    #[error("Pixel index {index} out of bounds for axis {axis} of length {len}")]
    IndexOutOfBounds { axis: usize, index: usize, len: usize },

    #[error("Center ({x}, {y}) is not finite")]
    CenterNotFinite { x: f64, y: f64 },

    #[error("{name} must be finite, got {value}")]
    NonFiniteScalar { name: &'static str, value: f64 },

    #[error("{name} is NaN")]
    NotANumber { name: &'static str },

    #[error("{name} must be positive, got {value}")]
    NonPositiveScalar { name: &'static str, value: f64 },

    #[error("At least one distortion order is required")]
    NoOrders,

    #[error("Distortion order must be at least 1, got {0}")]
    InvalidOrder(u32),

    #[error("Distortion parameter vector has length {actual}, expected {expected} for {orders} orders")]
    DistortionLength {
        orders: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Parameter vector has length {actual}, the selected functions take {expected}")]
    ParameterCount { expected: usize, actual: usize },

    #[error("Unknown fit function: {0:?}")]
    UnknownFunction(String),

    #[error("At least one fit function is required")]
    NoFunctions,

    #[error("{what} needs at least {required} points, got {actual}")]
    TooFewPoints {
        what: &'static str,
        required: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reject NaN and infinite scalars.
pub(crate) fn ensure_finite(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::NonFiniteScalar { name, value })
    }
}

/// Reject NaN but allow infinite bounds.
pub(crate) fn ensure_not_nan(name: &'static str, value: f64) -> Result<f64> {
    if value.is_nan() {
        Err(Error::NotANumber { name })
    } else {
        Ok(value)
    }
}

/// Reject non-finite, zero and negative scalars.
pub(crate) fn ensure_positive(name: &'static str, value: f64) -> Result<f64> {
    ensure_finite(name, value)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(Error::NonPositiveScalar { name, value })
    }
}

pub(crate) fn ensure_center(center: &crate::Vector2) -> Result<()> {
    if center.x.is_finite() && center.y.is_finite() {
        Ok(())
    } else {
        Err(Error::CenterNotFinite {
            x: center.x,
            y: center.y,
        })
    }
}
