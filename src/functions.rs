//! Named 1D model functions and a driver that fits sums of them.
//!
//! Each [`FitFunction`] takes a fixed number of parameters. A model is a list
//! of functions plus one flat parameter vector; the vector is sliced into
//! consecutive chunks, one per function, in list order:
//!
//! ```text
//! funcs  = [Const, PowLaw]
//! params = [A₀,    A₁, n₁]
//! model(x) = A₀ + A₁·xⁿ¹
//! ```
//!
//! | name     | params          | value                                   |
//! |----------|-----------------|-----------------------------------------|
//! | `const`  | `A`             | `A`                                     |
//! | `powlaw` | `A, n`          | `A·xⁿ`                                  |
//! | `voigt`  | `A, μ, σ, γ`    | `A·Re[w(z)] / (σ√(2π))`, `z = (x−μ+iγ)/(σ√2)` |

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lsq::{least_squares, Fitted, LsqConfig};

/// Closed set of model functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitFunction {
    /// Constant offset.
    Const,
    /// Power law `A·xⁿ`.
    PowLaw,
    /// Voigt peak: Gaussian of width σ convolved with a Lorentzian of half-width γ.
    Voigt,
}

/// Registry entry.
struct RegistryEntry {
    kind: FitFunction,
    name: &'static str,
    param_count: usize,
    eval: fn(f64, &[f64]) -> f64,
}

static REGISTRY: [RegistryEntry; 3] = [
    RegistryEntry {
        kind: FitFunction::Const,
        name: "const",
        param_count: 1,
        eval: const_fn,
    },
    RegistryEntry {
        kind: FitFunction::PowLaw,
        name: "powlaw",
        param_count: 2,
        eval: powlaw,
    },
    RegistryEntry {
        kind: FitFunction::Voigt,
        name: "voigt",
        param_count: 4,
        eval: voigt_params,
    },
];

impl FitFunction {
    pub const ALL: [FitFunction; 3] = [FitFunction::Const, FitFunction::PowLaw, FitFunction::Voigt];

    fn entry(self) -> &'static RegistryEntry {
        match self {
            FitFunction::Const => &REGISTRY[0],
            FitFunction::PowLaw => &REGISTRY[1],
            FitFunction::Voigt => &REGISTRY[2],
        }
    }

    /// Registry key, as used by settings files.
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Number of parameters this function consumes.
    pub fn param_count(self) -> usize {
        self.entry().param_count
    }

    /// Evaluate at `x`. `params` must hold exactly [`param_count`](Self::param_count) values.
    pub fn evaluate(self, x: f64, params: &[f64]) -> f64 {
        debug_assert_eq!(params.len(), self.param_count());
        (self.entry().eval)(x, params)
    }
}

impl fmt::Display for FitFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FitFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        REGISTRY
            .iter()
            .find(|entry| entry.name == s)
            .map(|entry| entry.kind)
            .ok_or_else(|| Error::UnknownFunction(s.to_string()))
    }
}

/// Parse a list of registry keys.
pub fn parse_functions<S: AsRef<str>>(names: &[S]) -> Result<Vec<FitFunction>> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// Total parameter count of a function list.
pub fn param_count(funcs: &[FitFunction]) -> usize {
    funcs.iter().map(|f| f.param_count()).sum()
}

fn check_param_count(funcs: &[FitFunction], params: &[f64]) -> Result<()> {
    if funcs.is_empty() {
        return Err(Error::NoFunctions);
    }
    let expected = param_count(funcs);
    if params.len() != expected {
        return Err(Error::ParameterCount {
            expected,
            actual: params.len(),
        });
    }
    Ok(())
}

// ── Model functions ──────────────────────────────────────────────────────

fn const_fn(_x: f64, p: &[f64]) -> f64 {
    p[0]
}

fn powlaw(x: f64, p: &[f64]) -> f64 {
    p[0] * x.powf(p[1])
}

fn voigt_params(x: f64, p: &[f64]) -> f64 {
    voigt(x, p[0], p[1], p[2], p[3])
}

/// Faddeeva function `w(z) = exp(−z²)·erfc(−iz)` for `Im z ≥ 0`.
///
/// Humlíček's rational approximation (region W4), relative accuracy about
/// 1e-4 over the whole upper half-plane.
pub fn faddeeva(z: Complex64) -> Complex64 {
    let (x, y) = (z.re, z.im);
    let t = Complex64::new(y, -x);
    let s = x.abs() + y;

    if s >= 15.0 {
        t * 0.5641896 / (0.5 + t * t)
    } else if s >= 5.5 {
        let u = t * t;
        t * (1.410474 + u * 0.5641896) / (0.75 + u * (3.0 + u))
    } else if y >= 0.195 * x.abs() - 0.176 {
        let num = 16.4955 + t * (20.20933 + t * (11.96482 + t * (3.778987 + t * 0.5642236)));
        let den = 16.4955
            + t * (38.82363 + t * (39.27121 + t * (21.69274 + t * (6.699398 + t))));
        num / den
    } else {
        let u = t * t;
        let num = 36183.31
            - u * (3321.9905 - u * (1540.787 - u * (219.0313 - u * (35.76683 - u * (1.320522 - u * 0.56419)))));
        let den = 32066.6
            - u * (24322.84
                - u * (9022.228 - u * (2186.181 - u * (364.2191 - u * (61.57037 - u * (1.841439 - u))))));
        u.exp() - t * num / den
    }
}

/// Voigt profile with integral `amplitude`.
///
/// Widths enter through their magnitude, so the sign of `sigma` and `gamma`
/// is irrelevant. A zero `sigma` yields NaN.
pub fn voigt(x: f64, amplitude: f64, mu: f64, sigma: f64, gamma: f64) -> f64 {
    let sigma = sigma.abs();
    let scale = sigma * std::f64::consts::SQRT_2;
    let z = Complex64::new((x - mu) / scale, gamma.abs() / scale);
    amplitude * faddeeva(z).re / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

// ── Summation and fitting ───────────────────────────────────────────────

fn sum_into(x: &[f64], funcs: &[FitFunction], params: &[f64], out: &mut [f64]) {
    out.iter_mut().for_each(|v| *v = 0.0);
    let mut offset = 0;
    for f in funcs {
        let n = f.param_count();
        let p = &params[offset..offset + n];
        for (o, &xi) in out.iter_mut().zip(x) {
            *o += f.evaluate(xi, p);
        }
        offset += n;
    }
}

/// Evaluate the sum of `funcs` at every `x`.
///
/// `params` is sliced into consecutive chunks of each function's parameter
/// count, in list order, and must have exactly the total length.
pub fn sum_functions(x: &[f64], funcs: &[FitFunction], params: &[f64]) -> Result<Vec<f64>> {
    check_param_count(funcs, params)?;
    let mut out = vec![0.0; x.len()];
    sum_into(x, funcs, params, &mut out);
    Ok(out)
}

/// Least-squares fit of a sum of functions to `(x, y)`.
///
/// Minimises `y − sum_functions(x, funcs, p)` starting from `init_guess`.
/// A solve that does not converge is logged with `warn!` and its best
/// estimate returned; check [`Fitted::status`] for strict success.
pub fn fit(
    x: &[f64],
    y: &[f64],
    funcs: &[FitFunction],
    init_guess: &[f64],
    max_evals: usize,
) -> Result<Fitted<Vec<f64>>> {
    check_param_count(funcs, init_guess)?;
    if x.len() != y.len() {
        return Err(Error::ShapeMismatch {
            what: "fit y",
            expected: (x.len(), 1),
            actual: (y.len(), 1),
        });
    }
    if x.is_empty() {
        return Err(Error::TooFewPoints {
            what: "fit",
            required: 1,
            actual: 0,
        });
    }

    let residuals = |p: &[f64]| {
        let mut model = vec![0.0; x.len()];
        sum_into(x, funcs, p, &mut model);
        DVector::from_iterator(y.len(), y.iter().zip(&model).map(|(yi, mi)| yi - mi))
    };

    let solution = least_squares(residuals, init_guess, &LsqConfig::with_max_evals(max_evals));
    solution.warn_unless_success("fit");

    let fitted = solution.into_fitted(|p| p.as_slice().to_vec());
    debug!(
        "fit [{}]: params {:?}, cost {:.3e}, {:?} after {} evaluations",
        funcs
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(", "),
        fitted.value,
        fitted.cost,
        fitted.status,
        fitted.evaluations
    );
    Ok(fitted)
}
