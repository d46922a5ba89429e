//! Selection of the points belonging to a single diffraction ring.

use tracing::debug;

use crate::coords::polar_of;
use crate::error::{ensure_center, ensure_not_nan, Result};
use crate::Vector2;

/// Keep the points whose distance from `center` lies strictly inside
/// `(r_min, r_max)`.
///
/// Returns `Ok(None)` when no point qualifies, which includes every band with
/// `r_min >= r_max`. Either bound may be infinite; `r_max = f64::INFINITY`
/// leaves the band open outwards. Points and center must be in the same
/// coordinate space.
pub fn filter_ring(
    points: &[Vector2],
    center: &Vector2,
    (r_min, r_max): (f64, f64),
) -> Result<Option<Vec<Vector2>>> {
    ensure_center(center)?;
    ensure_not_nan("r_min", r_min)?;
    ensure_not_nan("r_max", r_max)?;

    let kept: Vec<Vector2> = points
        .iter()
        .filter(|p| {
            let r = polar_of(p, center).radius;
            r > r_min && r < r_max
        })
        .copied()
        .collect();

    debug!(
        "filter_ring: kept {}/{} points in ({}, {})",
        kept.len(),
        points.len(),
        r_min,
        r_max
    );

    if kept.is_empty() {
        Ok(None)
    } else {
        Ok(Some(kept))
    }
}
