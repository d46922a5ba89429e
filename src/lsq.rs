//! Levenberg-Marquardt nonlinear least squares.
//!
//! Minimises `½·Σ rᵢ(p)²` for a caller-supplied residual function. The
//! Jacobian is approximated by forward differences, so callers only provide
//! residuals. Every call of the residual function (including the ones used for
//! the Jacobian) counts against [`LsqConfig::max_evals`].
//!
//! The solver never fails: it returns the best parameters found together with a
//! [`SolverStatus`]. Callers decide whether a non-success status matters; the
//! fitting routines in this crate log a warning and carry on.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LsqConfig {
    /// Maximum number of residual-function evaluations. Default 1000.
    pub max_evals: usize,
    /// Relative reduction of the cost below which the fit is converged. Default 1e-10.
    pub ftol: f64,
    /// Relative step size below which the fit is converged. Default 1e-10.
    pub xtol: f64,
    /// Largest cosine between residual vector and any Jacobian column at which
    /// the fit counts as converged. Default 1e-10.
    pub gtol: f64,
    /// Initial damping parameter. Default 1e-3.
    pub initial_lambda: f64,
    /// Factor to increase lambda on a rejected step. Default 10.
    pub lambda_up: f64,
    /// Factor to decrease lambda on an accepted step. Default 0.1.
    pub lambda_down: f64,
}

impl Default for LsqConfig {
    fn default() -> Self {
        Self {
            max_evals: 1000,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

impl LsqConfig {
    pub fn with_max_evals(max_evals: usize) -> Self {
        Self {
            max_evals,
            ..Default::default()
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// The cost stopped decreasing by more than `ftol` (relative), or reached zero.
    CostConverged,
    /// The parameter step fell below `xtol` (relative).
    StepConverged,
    /// The residual vector became orthogonal to the Jacobian columns (`gtol`).
    GradientConverged,
    /// The evaluation budget ran out before convergence.
    MaxEvaluations,
    /// No downhill step could be found even with very strong damping.
    Stalled,
    /// The residuals at the starting point are NaN or infinite.
    NonFinite,
}

impl SolverStatus {
    /// `true` for the statuses accepted as a successful fit.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            SolverStatus::CostConverged
                | SolverStatus::StepConverged
                | SolverStatus::GradientConverged
        )
    }
}

/// Raw solver output.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Best parameters found.
    pub params: DVector<f64>,
    /// `½·Σ rᵢ²` at `params`.
    pub cost: f64,
    pub status: SolverStatus,
    /// Number of residual-function evaluations used.
    pub evaluations: usize,
}

impl Solution {
    /// Log a warning when the solver did not report success.
    pub fn warn_unless_success(&self, what: &str) {
        if !self.status.is_success() {
            warn!(
                "{}: least squares did not converge ({:?} after {} evaluations, cost {:.3e}); using best estimate",
                what, self.status, self.evaluations, self.cost
            );
        }
    }

    /// Wrap a value derived from the parameters together with the solver status.
    pub fn into_fitted<T>(self, f: impl FnOnce(&DVector<f64>) -> T) -> Fitted<T> {
        Fitted {
            value: f(&self.params),
            cost: self.cost,
            status: self.status,
            evaluations: self.evaluations,
        }
    }
}

/// An optimiser estimate with the status signal of the solve that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fitted<T> {
    pub value: T,
    /// `½·Σ rᵢ²` at the estimate.
    pub cost: f64,
    pub status: SolverStatus,
    pub evaluations: usize,
}

impl<T> Fitted<T> {
    pub fn converged(&self) -> bool {
        self.status.is_success()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fitted<U> {
        Fitted {
            value: f(self.value),
            cost: self.cost,
            status: self.status,
            evaluations: self.evaluations,
        }
    }
}

const MAX_LAMBDA: f64 = 1e16;
const MIN_LAMBDA: f64 = 1e-12;

#[inline]
fn half_sq_norm(r: &DVector<f64>) -> f64 {
    0.5 * r.norm_squared()
}

/// Forward-difference Jacobian of `f` at `x`, given `r = f(x)`.
fn jacobian<F>(f: &F, x: &DVector<f64>, r: &DVector<f64>, evaluations: &mut usize) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let eps = f64::EPSILON.sqrt();
    let mut jac = DMatrix::zeros(r.len(), x.len());
    let mut xh = x.clone();
    for j in 0..x.len() {
        let mut h = eps * x[j].abs();
        if h == 0.0 {
            h = eps;
        }
        xh[j] = x[j] + h;
        let rh = f(xh.as_slice());
        *evaluations += 1;
        jac.set_column(j, &((rh - r) / h));
        xh[j] = x[j];
    }
    jac
}

/// Largest cosine between the residual vector and a Jacobian column.
///
/// A NaN anywhere yields infinity so that it never reads as converged.
fn gradient_cosine(jac: &DMatrix<f64>, grad: &DVector<f64>, r_norm: f64) -> f64 {
    if !r_norm.is_finite() || jac.iter().chain(grad.iter()).any(|v| v.is_nan()) {
        return f64::INFINITY;
    }
    jac.column_iter()
        .zip(grad.iter())
        .map(|(col, g)| {
            let cn = col.norm();
            if cn > 0.0 {
                g.abs() / (cn * r_norm)
            } else {
                0.0
            }
        })
        .fold(0.0, f64::max)
}

/// Minimise the sum of squares of `residuals(p)` starting from `x0`.
///
/// # Arguments
///
/// * `residuals` - maps a parameter slice to the residual vector; its length
///   must not depend on the parameters
/// * `x0` - initial guess
/// * `config` - tolerances and evaluation budget
pub fn least_squares<F>(residuals: F, x0: &[f64], config: &LsqConfig) -> Solution
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let n = x0.len();
    let mut x = DVector::from_column_slice(x0);
    let mut r = residuals(x.as_slice());
    let mut evaluations = 1;
    let mut cost = half_sq_norm(&r);
    let mut lambda = config.initial_lambda;

    let status = 'outer: loop {
        if !cost.is_finite() {
            break SolverStatus::NonFinite;
        }
        if cost == 0.0 {
            break SolverStatus::CostConverged;
        }
        if evaluations + n > config.max_evals {
            break SolverStatus::MaxEvaluations;
        }

        let jac = jacobian(&residuals, &x, &r, &mut evaluations);
        let grad = jac.tr_mul(&r);
        if gradient_cosine(&jac, &grad, r.norm()) <= config.gtol {
            break SolverStatus::GradientConverged;
        }
        let jtj = jac.tr_mul(&jac);

        loop {
            if evaluations >= config.max_evals {
                break 'outer SolverStatus::MaxEvaluations;
            }

            // Marquardt scaling: damp each parameter relative to its own curvature
            let mut damped = jtj.clone();
            for i in 0..n {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-300);
            }

            let Some(delta) = damped.cholesky().map(|c| -c.solve(&grad)) else {
                lambda *= config.lambda_up;
                if lambda > MAX_LAMBDA {
                    break 'outer SolverStatus::Stalled;
                }
                continue;
            };

            let x_new = &x + &delta;
            let r_new = residuals(x_new.as_slice());
            evaluations += 1;
            let cost_new = half_sq_norm(&r_new);

            let step_small = delta.norm() <= config.xtol * (x.norm() + config.xtol);

            if cost_new.is_finite() && cost_new < cost {
                let reduction = cost - cost_new;
                x = x_new;
                r = r_new;
                cost = cost_new;
                lambda = (lambda * config.lambda_down).max(MIN_LAMBDA);

                if reduction <= config.ftol * (cost + reduction) {
                    break 'outer SolverStatus::CostConverged;
                }
                if step_small {
                    break 'outer SolverStatus::StepConverged;
                }
                break;
            }

            if step_small {
                break 'outer SolverStatus::StepConverged;
            }
            lambda *= config.lambda_up;
            if lambda > MAX_LAMBDA {
                break 'outer SolverStatus::Stalled;
            }
        }
    };

    debug!(
        "least_squares: {} params, {} residuals, status {:?}, cost {:.3e}, {} evaluations",
        n,
        r.len(),
        status,
        cost,
        evaluations
    );

    Solution {
        params: x,
        cost,
        status,
        evaluations,
    }
}
