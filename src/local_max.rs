//! Local-maximum detection of diffraction-ring points.
//!
//! A pixel is a local maximum when it equals the maximum of its disk-shaped
//! neighbourhood *and* exceeds the neighbourhood minimum by more than a
//! threshold. The max/min filters are grey-scale dilation and erosion with a
//! disk footprint `dx² + dy² ≤ r²`; pixels outside the image are mirrored
//! back in (`d c b a | a b c d`).

use tracing::debug;

use crate::coords::PixelIndex;
use crate::error::{ensure_finite, Error, Result};
use crate::Image;

/// Disk footprint as a list of `(drow, dcol)` offsets.
fn disk_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let mut offsets = Vec::with_capacity((2 * radius + 1).pow(2));
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r2 {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

/// Mirror an out-of-range index back into `[0, len)`.
#[inline]
fn reflect_index(idx: isize, len: usize) -> usize {
    let n = len as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    let mut i = idx.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Grey-scale dilation and erosion with the same footprint, in one pass.
fn max_min_filter(image: &Image, offsets: &[(isize, isize)]) -> (Image, Image) {
    let (rows, cols) = image.shape();
    let mut max_img = Image::zeros(rows, cols);
    let mut min_img = Image::zeros(rows, cols);

    for col in 0..cols {
        for row in 0..rows {
            let mut hi = f64::NEG_INFINITY;
            let mut lo = f64::INFINITY;
            for &(dy, dx) in offsets {
                let r = reflect_index(row as isize + dy, rows);
                let c = reflect_index(col as isize + dx, cols);
                let v = image[(r, c)];
                hi = hi.max(v);
                lo = lo.min(v);
            }
            max_img[(row, col)] = hi;
            min_img[(row, col)] = lo;
        }
    }

    (max_img, min_img)
}

/// Find local intensity maxima.
///
/// Returns the selected pixels in row-major scan order, as `(x, y)` =
/// `(column, row)`. Returns `Ok(None)` when nothing qualifies; an empty
/// detection is a normal outcome, not an error.
///
/// # Arguments
///
/// * `image` - 2D intensity array, indexed `(row, col)`
/// * `radius` - radius of the disk-shaped neighbourhood in pixels
/// * `threshold` - required excess of a maximum over its neighbourhood minimum
pub fn local_max(image: &Image, radius: usize, threshold: f64) -> Result<Option<Vec<PixelIndex>>> {
    if image.is_empty() {
        return Err(Error::EmptyImage);
    }
    ensure_finite("threshold", threshold)?;

    let offsets = disk_offsets(radius);
    let (max_img, min_img) = max_min_filter(image, &offsets);

    let (rows, cols) = image.shape();
    let mut points = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let v = image[(row, col)];
            if v == max_img[(row, col)] && v - min_img[(row, col)] > threshold {
                points.push(PixelIndex::new(col, row));
            }
        }
    }

    debug!(
        "local_max: {} points in {}x{} image (r={}, threshold={})",
        points.len(),
        rows,
        cols,
        radius,
        threshold
    );

    if points.is_empty() {
        Ok(None)
    } else {
        Ok(Some(points))
    }
}
