//! Single-frame ring diffraction evaluation.
//!
//! [`run_single_image`] chains the whole calibration for one image:
//!
//! 1. Detect local maxima ([`local_max`]) and calibrate them ([`pixels_to_dim`]).
//! 2. Keep the points of one ring ([`filter_ring`]).
//! 3. Refine the center ([`optimize_center`]) and fit the distortion
//!    ([`optimize_distortion`]) on the points in polar form.
//! 4. Build the distortion-corrected polar field and reduce the image to a
//!    radial profile.
//! 5. Optionally fit a background on anchor points, subtract it, and fit peak
//!    functions in a radius window.
//!
//! Every invocation is independent: looping over the frames of a stack,
//! possibly in parallel, is up to the caller.

use std::fmt;

use tracing::debug;

use crate::coords::{pixels_to_dim, to_polar, validate_dims, Dim, PixelIndex};
use crate::distortion::{
    filter_ring, optimize_center, optimize_distortion, validate_orders, DistortionModel,
};
use crate::error::{ensure_center, ensure_finite, ensure_not_nan, ensure_positive, Error, Result};
use crate::functions::{fit, param_count, sum_functions, FitFunction};
use crate::local_max::local_max;
use crate::lsq::Fitted;
use crate::radial_profile::{calc_polar_field, calc_radial_profile, RadialProfile};
use crate::{Image, Vector2};

/// Settings for [`run_single_image`].
///
/// Lengths and positions are in calibrated units (the units of the [`Dim`]s)
/// unless stated otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RingDiffConfig {
    /// Local-maximum neighbourhood radius in pixels. Default 2.
    pub lmax_radius: usize,
    /// Required excess of a maximum over its neighbourhood minimum. Default 0.
    pub lmax_threshold: f64,
    /// Initial ring center. Also the center of `ring_band`.
    pub center_init: Vector2,
    /// Open radius interval `(r_min, r_max)` about `center_init` selecting
    /// the ring points. Default: whole image.
    pub ring_band: (f64, f64),
    /// Distortion orders, fitted in this sequence. Default `[2]`.
    pub orders: Vec<u32>,
    /// Evaluation budget of every least-squares fit. Default 1000.
    pub max_evals: usize,
    /// Radial profile extent. None = largest radius in the polar field.
    pub rad_rmax: Option<f64>,
    /// Radial profile bin spacing. None = x-axis pixel spacing / 10.
    pub rad_dr: Option<f64>,
    /// Radial profile smoothing width. None = x-axis pixel spacing.
    pub rad_sigma: Option<f64>,
    /// Pixel mask for the radial profile (nonzero = keep). None = keep all.
    pub mask: Option<Image>,
    /// Background model. Default `[Const, PowLaw]`.
    pub back_funcs: Vec<FitFunction>,
    /// Radii at which the profile is taken to be pure background.
    /// Empty = no background subtraction.
    pub back_anchors: Vec<f64>,
    /// Half-width of the window around each anchor.
    pub back_anchor_width: f64,
    /// Initial background parameters, one per `back_funcs` parameter.
    pub back_init: Vec<f64>,
    /// Peak model fitted to the background-subtracted profile.
    /// Empty = no peak fit.
    pub fit_funcs: Vec<FitFunction>,
    /// Initial peak parameters, one per `fit_funcs` parameter.
    pub fit_init: Vec<f64>,
    /// Closed radius window of the peak fit.
    pub fit_range: (f64, f64),
}

impl Default for RingDiffConfig {
    fn default() -> Self {
        Self {
            lmax_radius: 2,
            lmax_threshold: 0.0,
            center_init: Vector2::new(0.0, 0.0),
            ring_band: (0.0, f64::INFINITY),
            orders: vec![2],
            max_evals: 1000,
            rad_rmax: None,
            rad_dr: None,
            rad_sigma: None,
            mask: None,
            back_funcs: vec![FitFunction::Const, FitFunction::PowLaw],
            back_anchors: Vec::new(),
            back_anchor_width: 0.0,
            back_init: vec![0.0, 1.0, -1.0],
            fit_funcs: Vec::new(),
            fit_init: Vec::new(),
            fit_range: (0.0, f64::INFINITY),
        }
    }
}

impl RingDiffConfig {
    /// Check every setting before any computation.
    pub fn validate(&self) -> Result<()> {
        ensure_finite("lmax_threshold", self.lmax_threshold)?;
        ensure_center(&self.center_init)?;
        ensure_not_nan("ring_band.0", self.ring_band.0)?;
        ensure_not_nan("ring_band.1", self.ring_band.1)?;
        validate_orders(&self.orders)?;

        if let Some(r) = self.rad_rmax {
            ensure_positive("rad_rmax", r)?;
        }
        if let Some(dr) = self.rad_dr {
            ensure_positive("rad_dr", dr)?;
        }
        if let Some(s) = self.rad_sigma {
            ensure_finite("rad_sigma", s)?;
            if s < 0.0 {
                return Err(Error::NonPositiveScalar {
                    name: "rad_sigma",
                    value: s,
                });
            }
        }

        if !self.back_anchors.is_empty() {
            check_model(&self.back_funcs, &self.back_init)?;
            ensure_positive("back_anchor_width", self.back_anchor_width)?;
            for &a in &self.back_anchors {
                ensure_finite("back_anchors", a)?;
            }
        }
        if !self.fit_funcs.is_empty() {
            check_model(&self.fit_funcs, &self.fit_init)?;
            ensure_not_nan("fit_range.0", self.fit_range.0)?;
            ensure_not_nan("fit_range.1", self.fit_range.1)?;
        }
        Ok(())
    }
}

fn check_model(funcs: &[FitFunction], init: &[f64]) -> Result<()> {
    if funcs.is_empty() {
        return Err(Error::NoFunctions);
    }
    let expected = param_count(funcs);
    if init.len() != expected {
        return Err(Error::ParameterCount {
            expected,
            actual: init.len(),
        });
    }
    Ok(())
}

/// Profile samples near the background anchors.
///
/// Returns the finite `(radius, intensity)` pairs lying within `width` of at
/// least one anchor, each bin at most once, in increasing radius.
pub fn background_support(
    profile: &RadialProfile,
    anchors: &[f64],
    width: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    ensure_positive("width", width)?;
    for &a in anchors {
        ensure_finite("anchor", a)?;
    }
    let (radius, intensity) = profile.finite_points();
    Ok(radius
        .iter()
        .zip(&intensity)
        .filter(|&(&r, _)| anchors.iter().any(|a| (r - a).abs() <= width))
        .map(|(&r, &v)| (r, v))
        .unzip())
}

/// Pipeline stage that ran out of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStage {
    /// No local maximum passed the threshold.
    LocalMax,
    /// No detected point lies inside the ring band.
    RingFilter,
    /// The ring band kept fewer points than the center and distortion fits need.
    TooFewRingPoints,
    /// Fewer finite profile bins near the anchors than background parameters.
    BackgroundSupport,
    /// Fewer finite profile bins in `fit_range` than peak parameters.
    PeakWindow,
}

impl fmt::Display for DetectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionStage::LocalMax => f.write_str("local maximum detection"),
            DetectionStage::RingFilter => f.write_str("ring filtering"),
            DetectionStage::TooFewRingPoints => f.write_str("ring fitting"),
            DetectionStage::BackgroundSupport => f.write_str("background support selection"),
            DetectionStage::PeakWindow => f.write_str("peak window selection"),
        }
    }
}

/// Everything computed for one frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Detected maxima, pixel space.
    pub pixels: Vec<PixelIndex>,
    /// Ring points, calibrated space.
    pub ring_points: Vec<Vector2>,
    pub center: Fitted<Vector2>,
    pub distortion: Fitted<DistortionModel>,
    /// Radial profile of the distortion-corrected image.
    pub profile: RadialProfile,
    /// `profile` minus the fitted background (equal to `profile` without anchors).
    pub subtracted: RadialProfile,
    /// Background parameters, when anchors were configured.
    pub background: Option<Fitted<Vec<f64>>>,
    /// Peak parameters, when peak functions were configured.
    pub peaks: Option<Fitted<Vec<f64>>>,
}

/// Result of [`run_single_image`].
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    Complete(Box<FrameResult>),
    /// A stage had too few points to continue; the rest was skipped.
    NoPoints { stage: DetectionStage },
}

impl FrameOutcome {
    pub fn complete(self) -> Option<FrameResult> {
        match self {
            FrameOutcome::Complete(r) => Some(*r),
            FrameOutcome::NoPoints { .. } => None,
        }
    }
}

fn x_spacing(dims: &[Dim]) -> Result<f64> {
    dims[0].spacing().ok_or(Error::TooFewPoints {
        what: "x-axis calibration",
        required: 2,
        actual: dims[0].len(),
    })
}

/// Evaluate one diffraction image.
///
/// `image` is indexed `(row, col)` and must have shape
/// `(dims[1].len(), dims[0].len())`. Invalid settings fail before any work.
/// A stage left with too few points to fit (including none at all) returns
/// [`FrameOutcome::NoPoints`] naming that stage.
pub fn run_single_image(
    image: &Image,
    dims: &[Dim],
    config: &RingDiffConfig,
) -> Result<FrameOutcome> {
    config.validate()?;
    validate_dims(dims)?;
    let expected = (dims[1].len(), dims[0].len());
    if image.shape() != expected {
        return Err(Error::ShapeMismatch {
            what: "image",
            expected,
            actual: image.shape(),
        });
    }

    // ── Ring points ──
    let Some(pixels) = local_max(image, config.lmax_radius, config.lmax_threshold)? else {
        debug!("run_single_image: no local maxima");
        return Ok(FrameOutcome::NoPoints {
            stage: DetectionStage::LocalMax,
        });
    };
    let points = pixels_to_dim(&pixels, dims)?;
    let Some(ring_points) = filter_ring(&points, &config.center_init, config.ring_band)? else {
        debug!("run_single_image: no points in ring band {:?}", config.ring_band);
        return Ok(FrameOutcome::NoPoints {
            stage: DetectionStage::RingFilter,
        });
    };

    // ── Center and distortion ──
    let required = (2 * config.orders.len() + 1).max(3);
    if ring_points.len() < required {
        debug!(
            "run_single_image: {} ring points, {} needed",
            ring_points.len(),
            required
        );
        return Ok(FrameOutcome::NoPoints {
            stage: DetectionStage::TooFewRingPoints,
        });
    }
    let center = optimize_center(&ring_points, &config.center_init, config.max_evals)?;
    let polar = to_polar(&ring_points, &center.value)?;
    let distortion = optimize_distortion(&polar, &config.orders, config.max_evals)?;
    debug!(
        "run_single_image: {} maxima, {} ring points, center ({:.4}, {:.4}), R {:.4}",
        pixels.len(),
        ring_points.len(),
        center.value.x,
        center.value.y,
        distortion.value.radius
    );

    // ── Radial profile ──
    let field = calc_polar_field(&center.value, dims, Some(&distortion.value))?;
    let r_max = match config.rad_rmax {
        Some(r) => r,
        None => field
            .radius
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .fold(0.0, f64::max),
    };
    let dr = match config.rad_dr {
        Some(dr) => dr,
        None => x_spacing(dims)? / 10.0,
    };
    let r_sigma = match config.rad_sigma {
        Some(s) => s,
        None => x_spacing(dims)?,
    };
    let profile = calc_radial_profile(
        image,
        &field.radius,
        r_max,
        dr,
        r_sigma,
        config.mask.as_ref(),
    )?;

    // ── Background ──
    let (background, subtracted) = if config.back_anchors.is_empty() {
        (None, profile.clone())
    } else {
        let (x, y) = background_support(&profile, &config.back_anchors, config.back_anchor_width)?;
        if x.len() < param_count(&config.back_funcs) {
            debug!("run_single_image: {} background samples", x.len());
            return Ok(FrameOutcome::NoPoints {
                stage: DetectionStage::BackgroundSupport,
            });
        }
        let back = fit(&x, &y, &config.back_funcs, &config.back_init, config.max_evals)?;
        let curve = sum_functions(&profile.radius, &config.back_funcs, &back.value)?;
        let subtracted = profile.subtract(&curve)?;
        debug!(
            "run_single_image: background from {} samples, params {:?}",
            x.len(),
            back.value
        );
        (Some(back), subtracted)
    };

    // ── Peaks ──
    let peaks = if config.fit_funcs.is_empty() {
        None
    } else {
        let (x, y) = subtracted
            .window(config.fit_range.0, config.fit_range.1)
            .finite_points();
        if x.len() < param_count(&config.fit_funcs) {
            debug!("run_single_image: {} samples in peak window", x.len());
            return Ok(FrameOutcome::NoPoints {
                stage: DetectionStage::PeakWindow,
            });
        }
        Some(fit(&x, &y, &config.fit_funcs, &config.fit_init, config.max_evals)?)
    };

    Ok(FrameOutcome::Complete(Box::new(FrameResult {
        pixels,
        ring_points,
        center,
        distortion,
        profile,
        subtracted,
        background,
        peaks,
    })))
}
