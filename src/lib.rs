//! # ringdiff
//!
//! Calibration of **electron ring-diffraction patterns**.
//!
//! Given a diffraction image showing concentric rings, `ringdiff` finds the
//! points of a ring, refines the ring center, fits periodic (elliptical and
//! higher-order) distortion, and reduces the image to a distortion-corrected
//! radial intensity profile on which background and peak functions are fitted.
//!
//! ## Example
//!
//! ```no_run
//! use ringdiff::{
//!     run_single_image, Dim, FitFunction, FrameOutcome, Image, RingDiffConfig, Vector2,
//! };
//!
//! let image: Image = Image::zeros(1024, 1024); // load your pattern here
//! let dims = vec![
//!     Dim::linear(1024, -5.12, 0.01, "x", "1/nm"),
//!     Dim::linear(1024, -5.12, 0.01, "y", "1/nm"),
//! ];
//!
//! let config = RingDiffConfig {
//!     lmax_radius: 4,
//!     lmax_threshold: 200.0,
//!     center_init: Vector2::new(0.0, 0.0),
//!     ring_band: (2.0, 2.6),
//!     orders: vec![2, 3],
//!     back_anchors: vec![1.0, 3.5, 4.5],
//!     back_anchor_width: 0.05,
//!     back_init: vec![10.0, 100.0, -1.0],
//!     fit_funcs: vec![FitFunction::Voigt],
//!     fit_init: vec![50.0, 2.3, 0.02, 0.02],
//!     fit_range: (2.0, 2.6),
//!     ..Default::default()
//! };
//!
//! match run_single_image(&image, &dims, &config).unwrap() {
//!     FrameOutcome::Complete(result) => {
//!         println!("center: {:?}", result.center.value);
//!         println!("distortion: {:?}", result.distortion.value);
//!         if let Some(peaks) = &result.peaks {
//!             println!("peak: {:?} (converged: {})", peaks.value, peaks.converged());
//!         }
//!     }
//!     FrameOutcome::NoPoints { stage } => println!("nothing found during {stage}"),
//! }
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Point detection**: pixels equal to the maximum of their disk neighbourhood
//!    and exceeding its minimum by a threshold ([`local_max`])
//! 2. **Ring selection**: points within a radius band about an initial center
//!    ([`filter_ring`])
//! 3. **Center refinement**: minimise the spread of point radii
//!    ([`optimize_center`])
//! 4. **Distortion fit**: sequential single-order fits with deflation, then a
//!    joint fit of all orders ([`optimize_distortion`])
//! 5. **Radial profile**: Gaussian kernel-density estimate of the mean intensity
//!    versus corrected radius ([`calc_radial_profile`])
//! 6. **Model fitting**: sums of named functions ([`FitFunction`]) for
//!    background and peaks ([`fit`])
//!
//! All nonlinear fits report a [`SolverStatus`] next to their estimate;
//! non-convergence is logged through `tracing` and never turned into an error.

pub mod coords;
pub mod distortion;
pub mod error;
pub mod functions;
#[cfg(feature = "image")]
pub mod image_io;
pub mod local_max;
pub mod lsq;
pub mod pipeline;
pub mod radial_profile;

pub use coords::{pixel_to_dim, pixels_to_dim, to_polar, Dim, PixelIndex, PolarPoint};
pub use distortion::{
    distortion_factor, filter_ring, optimize_center, optimize_distortion, DistortionModel,
    DistortionTerm,
};
pub use error::{Error, Result};
pub use functions::{fit, sum_functions, voigt, FitFunction};
pub use local_max::local_max;
pub use lsq::{Fitted, SolverStatus};
pub use pipeline::{
    background_support, run_single_image, DetectionStage, FrameOutcome, FrameResult,
    RingDiffConfig,
};
pub use radial_profile::{calc_polar_field, calc_radial_profile, PolarField, RadialProfile};

// Commonly used types
pub type Vector2 = nalgebra::Vector2<f64>;
/// 2D intensity array or per-pixel field, indexed `(row, col)`.
pub type Image = nalgebra::DMatrix<f64>;
