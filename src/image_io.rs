//! Loading diffraction images from common file formats.
//!
//! Only available with the `image` feature. Detector formats (SER, EMD, …)
//! are out of scope; convert them first or fill a [`DMatrix`] directly.

use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::DMatrix;

/// Load an image file as a grayscale intensity matrix indexed `(row, col)`.
///
/// Integer pixels keep their raw values (0–255 or 0–65535); color images are
/// reduced with Rec. 709 luma weights.
pub fn load_grayscale(path: impl AsRef<Path>) -> Result<DMatrix<f64>> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("Failed to open image {}", path.display()))?;
    let (width, height) = (img.width() as usize, img.height() as usize);
    anyhow::ensure!(width > 0 && height > 0, "Image {} is empty", path.display());

    let gray = to_grayscale_f64(&img);
    Ok(DMatrix::from_row_slice(height, width, &gray))
}

/// Row-major grayscale values.
fn to_grayscale_f64(img: &image::DynamicImage) -> Vec<f64> {
    use image::DynamicImage;

    fn luma(r: f64, g: f64, b: f64) -> f64 {
        0.2126 * r + 0.7152 * g + 0.0722 * b
    }

    match img {
        DynamicImage::ImageLuma8(g) => g.as_raw().iter().map(|&v| v as f64).collect(),
        DynamicImage::ImageLuma16(g) => g.as_raw().iter().map(|&v| v as f64).collect(),
        DynamicImage::ImageLumaA8(g) => g.pixels().map(|p| p.0[0] as f64).collect(),
        DynamicImage::ImageLumaA16(g) => g.pixels().map(|p| p.0[0] as f64).collect(),
        DynamicImage::ImageRgb8(rgb) => rgb
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                luma(r as f64, g as f64, b as f64)
            })
            .collect(),
        DynamicImage::ImageRgb16(rgb) => rgb
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                luma(r as f64, g as f64, b as f64)
            })
            .collect(),
        DynamicImage::ImageRgb32F(rgb) => rgb
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                luma(r as f64, g as f64, b as f64)
            })
            .collect(),
        DynamicImage::ImageRgba16(rgba) => rgba
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                luma(r as f64, g as f64, b as f64)
            })
            .collect(),
        DynamicImage::ImageRgba32F(rgba) => rgba
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                luma(r as f64, g as f64, b as f64)
            })
            .collect(),
        // 8-bit RGBA and future variants
        _ => img
            .to_rgb8()
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                luma(r as f64, g as f64, b as f64)
            })
            .collect(),
    }
}
