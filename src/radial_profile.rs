//! Polar coordinate fields and radial intensity profiles.
//!
//! [`calc_polar_field`] assigns every pixel a radius and angle about the ring
//! center, in calibrated units, optionally with the ring distortion divided
//! out. [`calc_radial_profile`] then reduces an image to mean intensity versus
//! radius with a Gaussian kernel-density estimate:
//!
//! 1. Pixels are binned at `round(r / dr)` on the grid `0, dr, 2dr, … < r_max`.
//! 2. A weighted (intensity) and an unweighted (count) histogram are built.
//! 3. Both are smoothed with the same 1D Gaussian of width `r_sigma / dr` bins.
//! 4. The smoothed sums are divided by the smoothed counts.
//!
//! Dividing smoothed histograms avoids the banding a plain binned mean shows
//! when `dr` is finer than the pixel grid. Bins with no contributing pixel in
//! reach of the kernel come out as NaN.

use tracing::debug;

use crate::coords::{validate_dims, Dim};
use crate::distortion::DistortionModel;
use crate::error::{ensure_center, ensure_finite, ensure_positive, Error, Result};
use crate::{Image, Vector2};

/// Kernel half-width in standard deviations.
const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// Per-pixel polar coordinates of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarField {
    /// Distance from the center, distortion-corrected if a model was given.
    pub radius: Image,
    /// `atan2(y − cy, x − cx)`.
    pub angle: Image,
}

/// Build per-pixel radius and angle fields about `center`.
///
/// The mesh follows `dims`: column `j` sits at `x = dims[0].values[j]` and row
/// `i` at `y = dims[1].values[i]`, so the fields have shape
/// `(dims[1].len(), dims[0].len())`. `center` is in the same calibrated units.
///
/// When `distortion` is given, each radius is divided by the model's
/// distortion factor at that pixel's angle, mapping a distorted ring onto a
/// circle of radius `R`.
pub fn calc_polar_field(
    center: &Vector2,
    dims: &[Dim],
    distortion: Option<&DistortionModel>,
) -> Result<PolarField> {
    ensure_center(center)?;
    validate_dims(dims)?;

    let xs = &dims[0].values;
    let ys = &dims[1].values;

    let angle = Image::from_fn(ys.len(), xs.len(), |i, j| {
        (ys[i] - center.y).atan2(xs[j] - center.x)
    });
    let radius = Image::from_fn(ys.len(), xs.len(), |i, j| {
        let r = (xs[j] - center.x).hypot(ys[i] - center.y);
        match distortion {
            Some(model) => model.correct(r, angle[(i, j)]),
            None => r,
        }
    });

    Ok(PolarField { radius, angle })
}

/// Mean intensity versus radius.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialProfile {
    /// Bin positions `0, dr, 2dr, …`, increasing.
    pub radius: Vec<f64>,
    /// Estimated mean intensity at each radius; NaN where no data contributed.
    pub intensity: Vec<f64>,
}

impl RadialProfile {
    pub fn len(&self) -> usize {
        self.radius.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radius.is_empty()
    }

    /// `(radius, intensity)` pairs with NaN bins dropped.
    pub fn finite_points(&self) -> (Vec<f64>, Vec<f64>) {
        self.radius
            .iter()
            .zip(&self.intensity)
            .filter(|(r, v)| r.is_finite() && v.is_finite())
            .map(|(&r, &v)| (r, v))
            .unzip()
    }

    /// Profile restricted to `r_min ≤ r ≤ r_max`.
    pub fn window(&self, r_min: f64, r_max: f64) -> RadialProfile {
        let (radius, intensity) = self
            .radius
            .iter()
            .zip(&self.intensity)
            .filter(|&(&r, _)| r >= r_min && r <= r_max)
            .map(|(&r, &v)| (r, v))
            .unzip();
        RadialProfile { radius, intensity }
    }

    /// Profile minus a curve sampled at the same radii.
    pub fn subtract(&self, curve: &[f64]) -> Result<RadialProfile> {
        if curve.len() != self.len() {
            return Err(Error::ShapeMismatch {
                what: "subtracted curve",
                expected: (self.len(), 1),
                actual: (curve.len(), 1),
            });
        }
        Ok(RadialProfile {
            radius: self.radius.clone(),
            intensity: self
                .intensity
                .iter()
                .zip(curve)
                .map(|(v, c)| v - c)
                .collect(),
        })
    }
}

/// Normalised Gaussian kernel of the given width in samples.
fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-0.5 * x * x / (sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Mirror an out-of-range index back into `[0, len)` (`d c b a | a b c d`).
#[inline]
fn reflect_index(idx: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut i = idx.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// 1D Gaussian smoothing with mirrored boundaries.
fn gaussian_filter_1d(input: &[f64], sigma: f64) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return Vec::new();
    }
    let kernel = gaussian_kernel_1d(sigma);
    let radius = (kernel.len() / 2) as isize;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * input[reflect_index(i as isize + k as isize - radius, n)])
                .sum()
        })
        .collect()
}

/// Reduce an image to a radial intensity profile.
///
/// # Arguments
///
/// * `image` - intensities, same shape as `radius_field`
/// * `radius_field` - per-pixel radius, usually [`PolarField::radius`]
/// * `r_max` - profile extent (exclusive)
/// * `dr` - bin spacing, in the units of `radius_field`
/// * `r_sigma` - kernel width in the same units; 0 disables smoothing
/// * `mask` - optional per-pixel weights: nonzero keeps the pixel, zero drops it
///
/// A fully masked image yields an all-NaN profile rather than an error.
pub fn calc_radial_profile(
    image: &Image,
    radius_field: &Image,
    r_max: f64,
    dr: f64,
    r_sigma: f64,
    mask: Option<&Image>,
) -> Result<RadialProfile> {
    if image.is_empty() {
        return Err(Error::EmptyImage);
    }
    if radius_field.shape() != image.shape() {
        return Err(Error::ShapeMismatch {
            what: "radius field",
            expected: image.shape(),
            actual: radius_field.shape(),
        });
    }
    if let Some(mask) = mask {
        if mask.shape() != image.shape() {
            return Err(Error::ShapeMismatch {
                what: "mask",
                expected: image.shape(),
                actual: mask.shape(),
            });
        }
    }
    ensure_positive("r_max", r_max)?;
    ensure_positive("dr", dr)?;
    ensure_finite("r_sigma", r_sigma)?;
    if r_sigma < 0.0 {
        return Err(Error::NonPositiveScalar {
            name: "r_sigma",
            value: r_sigma,
        });
    }

    let n_bins = (r_max / dr).ceil() as usize;
    let radius: Vec<f64> = (0..n_bins).map(|k| k as f64 * dr).collect();

    let mut signal = vec![0.0; n_bins];
    let mut count = vec![0.0; n_bins];
    let mut used = 0usize;
    for (idx, (&r, &value)) in radius_field.iter().zip(image.iter()).enumerate() {
        if !r.is_finite() || r < 0.0 {
            continue;
        }
        if mask.is_some_and(|m| m[idx] == 0.0) {
            continue;
        }
        let bin = (r / dr).round() as usize;
        if bin >= n_bins {
            continue;
        }
        signal[bin] += value;
        count[bin] += 1.0;
        used += 1;
    }

    let sigma_bins = r_sigma / dr;
    let signal = gaussian_filter_1d(&signal, sigma_bins);
    let count = gaussian_filter_1d(&count, sigma_bins);

    // Bins the kernel never reached are 0/0 and become NaN.
    let intensity: Vec<f64> = signal.iter().zip(&count).map(|(s, c)| s / c).collect();

    debug!(
        "calc_radial_profile: {} bins of {} up to {}, sigma {} bins, {}/{} pixels used",
        n_bins,
        dr,
        r_max,
        sigma_bins,
        used,
        image.len()
    );

    Ok(RadialProfile { radius, intensity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn pixel_dims(cols: usize, rows: usize) -> Vec<Dim> {
        vec![Dim::from_pixels(cols, "x", "px"), Dim::from_pixels(rows, "y", "px")]
    }

    #[test]
    fn test_kernel_normalised() {
        for sigma in [0.5, 1.0, 3.7] {
            let k = gaussian_kernel_1d(sigma);
            assert_eq!(k.len() % 2, 1);
            assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            // Symmetric with the peak in the middle
            let mid = k.len() / 2;
            assert!(k.iter().all(|&v| v <= k[mid]));
            assert!((k[0] - k[k.len() - 1]).abs() < 1e-15);
        }
        assert_eq!(gaussian_kernel_1d(0.0), vec![1.0]);
    }

    #[test]
    fn test_filter_preserves_constant_and_sum() {
        let flat = vec![2.5; 17];
        for v in gaussian_filter_1d(&flat, 2.0) {
            assert!((v - 2.5).abs() < 1e-12);
        }
        let mut spike = vec![0.0; 41];
        spike[20] = 1.0;
        let out = gaussian_filter_1d(&spike, 2.0);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((out[19] - out[21]).abs() < 1e-15);
    }

    #[test]
    fn test_polar_field_shape_and_values() {
        let dims = pixel_dims(7, 5);
        let field = calc_polar_field(&Vector2::new(3.0, 2.0), &dims, None).unwrap();
        assert_eq!(field.radius.shape(), (5, 7));
        assert_eq!(field.radius[(2, 3)], 0.0);
        assert!((field.radius[(2, 6)] - 3.0).abs() < 1e-12);
        assert!((field.radius[(0, 3)] - 2.0).abs() < 1e-12);
        assert!((field.angle[(4, 3)] - PI / 2.0).abs() < 1e-12);
        assert!((field.angle[(2, 0)] - PI).abs() < 1e-12);
    }

    #[test]
    fn test_polar_field_uses_calibration() {
        let dims = vec![
            Dim::linear(4, -1.5, 1.0, "x", "1/nm"),
            Dim::linear(4, -0.15, 0.1, "y", "1/nm"),
        ];
        let field = calc_polar_field(&Vector2::new(0.0, 0.0), &dims, None).unwrap();
        let expected = (1.5f64).hypot(0.15);
        assert!((field.radius[(0, 0)] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_polar_field_distortion_correction() {
        let model = DistortionModel::from_flat(&[2], &[10.0, 0.2, 0.1]).unwrap();
        let dims = pixel_dims(41, 41);
        let center = Vector2::new(20.0, 20.0);
        let plain = calc_polar_field(&center, &dims, None).unwrap();
        let corrected = calc_polar_field(&center, &dims, Some(&model)).unwrap();
        for i in 0..41 {
            for j in 0..41 {
                let theta = plain.angle[(i, j)];
                let expected = plain.radius[(i, j)] / model.factor(theta);
                assert!((corrected.radius[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_polar_field_invalid_dims() {
        let dims = vec![Dim::from_pixels(4, "x", "px")];
        assert!(matches!(
            calc_polar_field(&Vector2::new(0.0, 0.0), &dims, None),
            Err(Error::TooFewDims { .. })
        ));
        let dims = vec![Dim::from_pixels(4, "x", "px"), Dim::from_pixels(0, "y", "px")];
        assert!(matches!(
            calc_polar_field(&Vector2::new(0.0, 0.0), &dims, None),
            Err(Error::EmptyDim { axis: 1 })
        ));
    }

    #[test]
    fn test_profile_of_ring_image() {
        let n = 81;
        let center = Vector2::new(40.0, 40.0);
        let field = calc_polar_field(&center, &pixel_dims(n, n), None).unwrap();
        // Intensity equal to the radius itself
        let image = field.radius.clone();
        let profile = calc_radial_profile(&image, &field.radius, 30.0, 0.5, 1.0, None).unwrap();
        assert_eq!(profile.len(), 60);
        assert_eq!(profile.radius[3], 1.5);
        for (r, v) in profile.radius.iter().zip(&profile.intensity) {
            if *r >= 5.0 && *r <= 25.0 {
                assert!((v - r).abs() < 0.3, "at r={} got {}", r, v);
            }
        }
    }

    #[test]
    fn test_profile_constant_image() {
        let n = 31;
        let field = calc_polar_field(&Vector2::new(15.0, 15.0), &pixel_dims(n, n), None).unwrap();
        let image = Image::from_element(n, n, 7.0);
        let profile = calc_radial_profile(&image, &field.radius, 15.0, 0.25, 0.5, None).unwrap();
        for v in &profile.intensity {
            assert!((v - 7.0).abs() < 1e-9, "got {}", v);
        }
    }

    #[test]
    fn test_fully_masked_profile_is_nan() {
        let n = 21;
        let field = calc_polar_field(&Vector2::new(10.0, 10.0), &pixel_dims(n, n), None).unwrap();
        let image = Image::from_element(n, n, 1.0);
        let mask = Image::zeros(n, n);
        let profile =
            calc_radial_profile(&image, &field.radius, 10.0, 0.5, 1.0, Some(&mask)).unwrap();
        assert!(!profile.is_empty());
        assert!(profile.intensity.iter().all(|v| v.is_nan()));
        assert_eq!(profile.finite_points().0.len(), 0);
    }

    #[test]
    fn test_partial_mask_excludes_pixels() {
        let n = 41;
        let field = calc_polar_field(&Vector2::new(20.0, 20.0), &pixel_dims(n, n), None).unwrap();
        // Left half bright, right half dark; mask keeps only the left half
        let image = Image::from_fn(n, n, |_, j| if j < 20 { 10.0 } else { 0.0 });
        let mask = Image::from_fn(n, n, |_, j| if j < 20 { 1.0 } else { 0.0 });
        let profile =
            calc_radial_profile(&image, &field.radius, 15.0, 0.5, 0.5, Some(&mask)).unwrap();
        for (r, v) in profile.radius.iter().zip(&profile.intensity) {
            if *r >= 2.0 {
                assert!((v - 10.0).abs() < 1e-9, "at r={} got {}", r, v);
            }
        }
    }

    #[test]
    fn test_profile_invalid_input() {
        let image = Image::zeros(4, 4);
        let field = Image::zeros(4, 5);
        assert!(matches!(
            calc_radial_profile(&image, &field, 2.0, 0.1, 0.1, None),
            Err(Error::ShapeMismatch { what: "radius field", .. })
        ));
        let field = Image::zeros(4, 4);
        let mask = Image::zeros(3, 4);
        assert!(matches!(
            calc_radial_profile(&image, &field, 2.0, 0.1, 0.1, Some(&mask)),
            Err(Error::ShapeMismatch { what: "mask", .. })
        ));
        assert!(matches!(
            calc_radial_profile(&image, &field, 2.0, 0.0, 0.1, None),
            Err(Error::NonPositiveScalar { name: "dr", .. })
        ));
        assert!(matches!(
            calc_radial_profile(&image, &field, f64::NAN, 0.1, 0.1, None),
            Err(Error::NonFiniteScalar { name: "r_max", .. })
        ));
        assert!(matches!(
            calc_radial_profile(&image, &field, 2.0, 0.1, -1.0, None),
            Err(Error::NonPositiveScalar { name: "r_sigma", .. })
        ));
    }

    #[test]
    fn test_profile_helpers() {
        let profile = RadialProfile {
            radius: vec![0.0, 1.0, 2.0, 3.0],
            intensity: vec![f64::NAN, 4.0, 5.0, 6.0],
        };
        let (r, v) = profile.finite_points();
        assert_eq!(r, vec![1.0, 2.0, 3.0]);
        assert_eq!(v, vec![4.0, 5.0, 6.0]);

        let w = profile.window(1.0, 2.0);
        assert_eq!(w.radius, vec![1.0, 2.0]);

        let s = profile.subtract(&[1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(s.intensity[1..], [3.0, 4.0, 5.0]);
        assert!(profile.subtract(&[1.0]).is_err());
    }
}
