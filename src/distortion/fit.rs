//! Ring center and distortion fitting.
//!
//! Both fits are nonlinear least-squares problems solved with
//! [`least_squares`](crate::lsq::least_squares). A solve that does not reach a
//! success status is logged as a warning and its best estimate is returned
//! anyway; the status travels with the estimate in [`Fitted`].

use nalgebra::DVector;
use tracing::debug;

use crate::coords::{polar_of, PolarPoint};
use crate::error::{ensure_center, Error, Result};
use crate::lsq::{least_squares, Fitted, LsqConfig};
use crate::Vector2;

use super::{distortion_factor, validate_orders, DistortionModel, DistortionTerm};

/// Seed for `α` and `β` of every single-order fit.
const ALPHA_BETA_SEED: (f64, f64) = (0.1, 0.1);

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    values.sum::<f64>() / n as f64
}

/// Refine a ring center so that the point radii spread as little as possible
/// around their mean.
///
/// Residual for candidate center `c`: `|pᵢ − c| − mean_j |p_j − c|`.
/// Needs at least 3 points; points and center must share a coordinate space.
pub fn optimize_center(
    points: &[Vector2],
    center_init: &Vector2,
    max_evals: usize,
) -> Result<Fitted<Vector2>> {
    ensure_center(center_init)?;
    if points.len() < 3 {
        return Err(Error::TooFewPoints {
            what: "optimize_center",
            required: 3,
            actual: points.len(),
        });
    }

    let residuals = |p: &[f64]| {
        let c = Vector2::new(p[0], p[1]);
        let radii: Vec<f64> = points.iter().map(|q| polar_of(q, &c).radius).collect();
        let m = mean(radii.iter().copied());
        DVector::from_iterator(radii.len(), radii.iter().map(|r| r - m))
    };

    let solution = least_squares(
        residuals,
        &[center_init.x, center_init.y],
        &LsqConfig::with_max_evals(max_evals),
    );
    solution.warn_unless_success("optimize_center");

    let fitted = solution.into_fitted(|p| Vector2::new(p[0], p[1]));
    debug!(
        "optimize_center: ({:.6}, {:.6}) -> ({:.6}, {:.6}) from {} points, {:?}",
        center_init.x,
        center_init.y,
        fitted.value.x,
        fitted.value.y,
        points.len(),
        fitted.status
    );
    Ok(fitted)
}

/// `observed − R·Π d(θ; αᵢ, βᵢ, nᵢ)` for the flat parameters `[R, α₁, β₁, …]`.
fn distortion_residuals(
    radii: &[f64],
    angles: &[f64],
    orders: &[u32],
    params: &[f64],
) -> DVector<f64> {
    DVector::from_iterator(
        radii.len(),
        radii.iter().zip(angles).map(|(&r, &theta)| {
            let factor: f64 = orders
                .iter()
                .zip(params[1..].chunks_exact(2))
                .map(|(&n, ab)| distortion_factor(theta, ab[0], ab[1], n))
                .product();
            r - params[0] * factor
        }),
    )
}

/// Fit a multi-order distortion model to ring points in polar form.
///
/// The fit runs in two stages:
///
/// 1. Orders are visited in the sequence given. Each order gets a
///    single-order fit `(R, α, β)` seeded at `(mean radius, 0.1, 0.1)` on a
///    working copy of the radii from which the corrections of all previously
///    visited orders have been divided out. The result therefore depends on
///    the order of `orders`: put the dominant distortion (usually 2) first.
/// 2. A joint fit over all orders on the original radii, seeded with
///    `R = mean radius` and the `(α, β)` pairs from stage 1.
///
/// Returns the joint-fit model; its terms are in the same sequence as `orders`.
pub fn optimize_distortion(
    points: &[PolarPoint],
    orders: &[u32],
    max_evals: usize,
) -> Result<Fitted<DistortionModel>> {
    validate_orders(orders)?;
    let required = 2 * orders.len() + 1;
    if points.len() < required {
        return Err(Error::TooFewPoints {
            what: "optimize_distortion",
            required,
            actual: points.len(),
        });
    }

    let config = LsqConfig::with_max_evals(max_evals);
    let radii: Vec<f64> = points.iter().map(|p| p.radius).collect();
    let angles: Vec<f64> = points.iter().map(|p| p.angle).collect();

    // ── Stage 1: sequential single-order fits with deflation ──
    let mut working = radii.clone();
    let mut seeds: Vec<(f64, f64)> = Vec::with_capacity(orders.len());
    for &order in orders {
        let x0 = [
            mean(working.iter().copied()),
            ALPHA_BETA_SEED.0,
            ALPHA_BETA_SEED.1,
        ];
        let single = [order];
        let solution = least_squares(
            |p| distortion_residuals(&working, &angles, &single, p),
            &x0,
            &config,
        );
        solution.warn_unless_success("optimize_distortion (single order)");

        let (alpha, beta) = (solution.params[1], solution.params[2]);
        debug!(
            "optimize_distortion: order {} alone -> R={:.6}, alpha={:.4}, beta={:.5}, {:?}",
            order, solution.params[0], alpha, beta, solution.status
        );

        for (r, &theta) in working.iter_mut().zip(&angles) {
            *r /= distortion_factor(theta, alpha, beta, order);
        }
        seeds.push((alpha, beta));
    }

    // ── Stage 2: joint refinement on the original radii ──
    let mut x0 = Vec::with_capacity(required);
    x0.push(mean(radii.iter().copied()));
    for &(alpha, beta) in &seeds {
        x0.push(alpha);
        x0.push(beta);
    }

    let solution = least_squares(
        |p| distortion_residuals(&radii, &angles, orders, p),
        &x0,
        &config,
    );
    solution.warn_unless_success("optimize_distortion (joint)");

    let fitted = solution.into_fitted(|p| DistortionModel {
        radius: p[0],
        terms: orders
            .iter()
            .zip(p.as_slice()[1..].chunks_exact(2))
            .map(|(&order, ab)| DistortionTerm {
                order,
                alpha: ab[0],
                beta: ab[1],
            })
            .collect(),
    });

    debug!(
        "optimize_distortion: orders {:?} -> {:?}, cost {:.3e}, {:?}",
        orders,
        fitted.value.to_flat(),
        fitted.cost,
        fitted.status
    );
    Ok(fitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::to_polar;
    use crate::lsq::SolverStatus;
    use std::f64::consts::PI;

    fn circle(center: Vector2, radius: f64, n: usize) -> Vec<Vector2> {
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                center + Vector2::new(radius * t.cos(), radius * t.sin())
            })
            .collect()
    }

    fn distorted_ring(model: &DistortionModel, n: usize) -> Vec<PolarPoint> {
        (0..n)
            .map(|i| {
                let theta = -PI + 2.0 * PI * (i as f64 + 0.5) / n as f64;
                PolarPoint::new(model.radius_at(theta), theta)
            })
            .collect()
    }

    /// Map `(α, β)` to a canonical form: β ≥ 0 and α in [0, 2π/n).
    fn canonical(order: u32, alpha: f64, beta: f64) -> (f64, f64) {
        let period = 2.0 * PI / order as f64;
        let (alpha, beta) = if beta < 0.0 {
            (alpha + period / 2.0, -beta)
        } else {
            (alpha, beta)
        };
        (alpha.rem_euclid(period), beta)
    }

    fn rms(model: &DistortionModel, points: &[PolarPoint]) -> f64 {
        let ss: f64 = points
            .iter()
            .map(|p| (p.radius - model.radius_at(p.angle)).powi(2))
            .sum();
        (ss / points.len() as f64).sqrt()
    }

    #[test]
    fn test_optimize_center_perfect_circle() {
        let truth = Vector2::new(12.5, -7.25);
        let points = circle(truth, 30.0, 72);
        for seed in [Vector2::new(10.0, -5.0), Vector2::new(18.0, -1.0), truth] {
            let fit = optimize_center(&points, &seed, 1000).unwrap();
            assert!(fit.converged(), "status {:?}", fit.status);
            assert!(
                (fit.value - truth).norm() < 1e-6,
                "center {:?} from seed {:?}",
                fit.value,
                seed
            );
        }
    }

    #[test]
    fn test_optimize_center_partial_arc() {
        // Only a quarter of the ring is visible
        let truth = Vector2::new(100.0, 80.0);
        let points: Vec<Vector2> = circle(truth, 45.0, 200).into_iter().take(50).collect();
        let fit = optimize_center(&points, &Vector2::new(97.0, 83.0), 1000).unwrap();
        assert!((fit.value - truth).norm() < 1e-4, "center {:?}", fit.value);
    }

    #[test]
    fn test_optimize_center_budget_still_returns_estimate() {
        let truth = Vector2::new(0.0, 0.0);
        let points = circle(truth, 5.0, 20);
        let seed = Vector2::new(1.0, 1.0);
        let fit = optimize_center(&points, &seed, 3).unwrap();
        assert_eq!(fit.status, SolverStatus::MaxEvaluations);
        assert!(fit.value.x.is_finite() && fit.value.y.is_finite());
    }

    #[test]
    fn test_optimize_center_invalid_input() {
        let points = circle(Vector2::new(0.0, 0.0), 5.0, 2);
        assert!(matches!(
            optimize_center(&points, &Vector2::new(0.0, 0.0), 100),
            Err(Error::TooFewPoints { required: 3, actual: 2, .. })
        ));
        let points = circle(Vector2::new(0.0, 0.0), 5.0, 10);
        assert!(matches!(
            optimize_center(&points, &Vector2::new(f64::NAN, 0.0), 100),
            Err(Error::CenterNotFinite { .. })
        ));
    }

    #[test]
    fn test_optimize_distortion_recovers_ellipse() {
        let truth = DistortionModel::from_flat(&[2], &[50.0, 0.3, 0.05]).unwrap();
        let points = distorted_ring(&truth, 180);

        let fit = optimize_distortion(&points, &[2], 1000).unwrap();
        assert!(fit.converged(), "status {:?}", fit.status);
        let term = fit.value.terms[0];
        assert_eq!(term.order, 2);
        assert!((fit.value.radius - 50.0).abs() < 1e-6, "R = {}", fit.value.radius);

        let (alpha, beta) = canonical(2, term.alpha, term.beta);
        assert!((alpha - 0.3).abs() < 1e-6, "alpha = {}", alpha);
        assert!((beta - 0.05).abs() < 1e-6, "beta = {}", beta);
        assert!(rms(&fit.value, &points) < 1e-6);
    }

    #[test]
    fn test_optimize_distortion_wrong_order_leaves_residual() {
        let truth = DistortionModel::from_flat(&[2], &[50.0, 0.3, 0.05]).unwrap();
        let points = distorted_ring(&truth, 180);

        let fit = optimize_distortion(&points, &[3], 1000).unwrap();
        let residual = rms(&fit.value, &points);
        // The n=2 modulation has an amplitude of about R·β = 2.5
        assert!(residual > 0.5, "wrong order fitted too well: rms {}", residual);
    }

    #[test]
    fn test_optimize_distortion_two_orders() {
        let truth = DistortionModel::from_flat(&[2, 3], &[80.0, 0.2, 0.04, -0.5, 0.01]).unwrap();
        let points = distorted_ring(&truth, 360);

        let fit = optimize_distortion(&points, &[2, 3], 1000).unwrap();
        assert_eq!(fit.value.orders(), vec![2, 3]);
        assert!(rms(&fit.value, &points) < 1e-5, "rms {}", rms(&fit.value, &points));
        assert!((fit.value.radius - 80.0).abs() < 1e-4);
        let (_, beta2) = canonical(2, fit.value.terms[0].alpha, fit.value.terms[0].beta);
        let (_, beta3) = canonical(3, fit.value.terms[1].alpha, fit.value.terms[1].beta);
        assert!((beta2 - 0.04).abs() < 1e-4, "beta2 = {}", beta2);
        assert!((beta3 - 0.01).abs() < 1e-4, "beta3 = {}", beta3);
    }

    #[test]
    fn test_optimize_distortion_order_sequence() {
        // Two-order ring fitted with the orders in either sequence
        let truth = DistortionModel::from_flat(&[2, 3], &[80.0, 0.2, 0.04, -0.5, 0.01]).unwrap();
        let points = distorted_ring(&truth, 240);

        let forward = optimize_distortion(&points, &[2, 3], 2000).unwrap();
        let reversed = optimize_distortion(&points, &[3, 2], 2000).unwrap();
        assert_eq!(forward.value.orders(), vec![2, 3]);
        assert_eq!(reversed.value.orders(), vec![3, 2]);

        for fit in [&forward, &reversed] {
            let err = rms(&fit.value, &points);
            assert!(err < 1e-4, "orders {:?}: rms {}", fit.value.orders(), err);
            assert!((fit.value.radius - 80.0).abs() < 1e-4);
            for term in &fit.value.terms {
                let want = truth.terms.iter().find(|t| t.order == term.order).unwrap();
                let (a, b) = canonical(term.order, term.alpha, term.beta);
                let (wa, wb) = canonical(want.order, want.alpha, want.beta);
                assert!((b - wb).abs() < 1e-4, "order {}: beta {} vs {}", term.order, b, wb);
                assert!((a - wa).abs() < 1e-2, "order {}: alpha {} vs {}", term.order, a, wa);
            }
        }
    }

    #[test]
    fn test_center_then_distortion_on_circle() {
        let truth = Vector2::new(-3.0, 4.0);
        let points = circle(truth, 12.0, 90);
        let center = optimize_center(&points, &Vector2::new(-2.0, 3.0), 1000).unwrap();
        let polar = to_polar(&points, &center.value).unwrap();
        let fit = optimize_distortion(&polar, &[2], 1000).unwrap();
        assert!((fit.value.radius - 12.0).abs() < 1e-5);
        assert!(fit.value.terms[0].beta.abs() < 1e-5, "beta = {}", fit.value.terms[0].beta);
    }

    #[test]
    fn test_optimize_distortion_invalid_input() {
        let points = vec![PolarPoint::new(1.0, 0.0); 10];
        assert!(matches!(
            optimize_distortion(&points, &[], 100),
            Err(Error::NoOrders)
        ));
        assert!(matches!(
            optimize_distortion(&points[..4], &[2, 3], 100),
            Err(Error::TooFewPoints { required: 5, actual: 4, .. })
        ));
    }
}
