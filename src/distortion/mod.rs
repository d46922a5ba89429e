//! Periodic radial distortion of diffraction rings.
//!
//! A distorted ring of mean radius `R` is modelled as
//!
//! ```text
//! r(θ) = R · Π_i d(θ; α_i, β_i, n_i)
//! d(θ; α, β, n) = (1 − β²) / sqrt(1 + β² − 2β·cos(n·(θ + α)))
//! ```
//!
//! Each factor is a relative multiplier (exactly 1 when β = 0). Order `n = 2`
//! is elliptical distortion, higher orders are higher harmonics; `α` is the
//! orientation and `β` the magnitude.
//!
//! # Usage
//!
//! 1. Select the points of one ring with [`filter_ring`].
//! 2. Refine the ring center with [`optimize_center`].
//! 3. Fit the distortion terms with [`optimize_distortion`] on the points in
//!    polar form about that center.
//! 4. Pass the resulting [`DistortionModel`] to
//!    [`calc_polar_field`](crate::radial_profile::calc_polar_field) to build a
//!    distortion-corrected radius field.

pub mod fit;
pub mod ring;

pub use fit::{optimize_center, optimize_distortion};
pub use ring::filter_ring;

use crate::error::{Error, Result};

/// Single-order distortion factor `d(θ; α, β, n)`.
#[inline]
pub fn distortion_factor(theta: f64, alpha: f64, beta: f64, order: u32) -> f64 {
    let b2 = beta * beta;
    (1.0 - b2) / (1.0 + b2 - 2.0 * beta * (order as f64 * (theta + alpha)).cos()).sqrt()
}

/// One periodic distortion term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionTerm {
    /// Harmonic order `n` (2 = elliptical).
    pub order: u32,
    /// Phase offset `α` in radians.
    pub alpha: f64,
    /// Magnitude `β`, nominally in [0, 1).
    pub beta: f64,
}

impl DistortionTerm {
    pub fn factor(&self, theta: f64) -> f64 {
        distortion_factor(theta, self.alpha, self.beta, self.order)
    }
}

/// Ring radius plus an ordered list of distortion terms.
///
/// The flat representation `[R, α₁, β₁, α₂, β₂, …]` paired with the list of
/// orders is what the optimiser works on; this type keeps the two aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct DistortionModel {
    /// Mean undistorted radius `R`.
    pub radius: f64,
    /// Terms in the order they were requested.
    pub terms: Vec<DistortionTerm>,
}

impl DistortionModel {
    /// An undistorted ring.
    pub fn circle(radius: f64) -> Self {
        Self {
            radius,
            terms: Vec::new(),
        }
    }

    /// Build from a list of orders and the flat parameter vector
    /// `[R, α₁, β₁, …]`, which must have length `2 * orders.len() + 1`.
    pub fn from_flat(orders: &[u32], params: &[f64]) -> Result<Self> {
        validate_orders(orders)?;
        let expected = 2 * orders.len() + 1;
        if params.len() != expected {
            return Err(Error::DistortionLength {
                orders: orders.len(),
                expected,
                actual: params.len(),
            });
        }
        let terms = orders
            .iter()
            .zip(params[1..].chunks_exact(2))
            .map(|(&order, ab)| DistortionTerm {
                order,
                alpha: ab[0],
                beta: ab[1],
            })
            .collect();
        Ok(Self {
            radius: params[0],
            terms,
        })
    }

    /// Flat parameter vector `[R, α₁, β₁, …]`.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(2 * self.terms.len() + 1);
        out.push(self.radius);
        for t in &self.terms {
            out.push(t.alpha);
            out.push(t.beta);
        }
        out
    }

    pub fn orders(&self) -> Vec<u32> {
        self.terms.iter().map(|t| t.order).collect()
    }

    /// Product of all term factors at angle `theta`.
    pub fn factor(&self, theta: f64) -> f64 {
        self.terms.iter().map(|t| t.factor(theta)).product()
    }

    /// Modelled ring radius at angle `theta`.
    pub fn radius_at(&self, theta: f64) -> f64 {
        self.radius * self.factor(theta)
    }

    /// Remove the distortion from an observed radius at angle `theta`.
    pub fn correct(&self, radius: f64, theta: f64) -> f64 {
        radius / self.factor(theta)
    }
}

pub(crate) fn validate_orders(orders: &[u32]) -> Result<()> {
    if orders.is_empty() {
        return Err(Error::NoOrders);
    }
    if let Some(&bad) = orders.iter().find(|&&n| n == 0) {
        return Err(Error::InvalidOrder(bad));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_factor_is_one_without_beta() {
        for i in 0..16 {
            let theta = -PI + i as f64 * PI / 8.0;
            assert!((distortion_factor(theta, 0.3, 0.0, 2) - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn test_factor_extremes() {
        // cos term = 1 at θ = -α: maximum (1 - β²)/(1 - β) = 1 + β
        let beta = 0.2;
        let alpha = 0.4;
        let max = distortion_factor(-alpha, alpha, beta, 2);
        assert!((max - (1.0 + beta)).abs() < 1e-12);
        // Quarter period later cos = -1: minimum 1 - β
        let min = distortion_factor(-alpha + PI / 2.0, alpha, beta, 2);
        assert!((min - (1.0 - beta)).abs() < 1e-12);
    }

    #[test]
    fn test_factor_periodicity() {
        let (alpha, beta) = (0.1, 0.05);
        for n in 1..5u32 {
            let period = 2.0 * PI / n as f64;
            let a = distortion_factor(0.7, alpha, beta, n);
            let b = distortion_factor(0.7 + period, alpha, beta, n);
            assert!((a - b).abs() < 1e-12, "order {} not periodic", n);
        }
    }

    #[test]
    fn test_flat_roundtrip() {
        let model = DistortionModel::from_flat(&[2, 3], &[10.0, 0.1, 0.02, -0.3, 0.01]).unwrap();
        assert_eq!(model.orders(), vec![2, 3]);
        assert_eq!(model.terms[1].alpha, -0.3);
        assert_eq!(model.to_flat(), vec![10.0, 0.1, 0.02, -0.3, 0.01]);
    }

    #[test]
    fn test_flat_length_checked() {
        let err = DistortionModel::from_flat(&[2, 3], &[10.0, 0.1, 0.02]).unwrap_err();
        assert_eq!(
            err,
            Error::DistortionLength {
                orders: 2,
                expected: 5,
                actual: 3
            }
        );
        assert_eq!(DistortionModel::from_flat(&[], &[1.0]), Err(Error::NoOrders));
        assert_eq!(
            DistortionModel::from_flat(&[2, 0], &[1.0, 0.0, 0.0, 0.0, 0.0]),
            Err(Error::InvalidOrder(0))
        );
    }

    #[test]
    fn test_correct_inverts_radius_at() {
        let model = DistortionModel::from_flat(&[2, 4], &[5.0, 0.3, 0.05, 1.1, 0.02]).unwrap();
        for i in 0..12 {
            let theta = -PI + i as f64 * PI / 6.0 + 0.01;
            let r = model.radius_at(theta);
            assert!((model.correct(r, theta) - 5.0).abs() < 1e-12);
        }
        assert_eq!(DistortionModel::circle(3.0).radius_at(1.0), 3.0);
    }
}
