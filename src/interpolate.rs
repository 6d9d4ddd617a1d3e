//! Linear interpolation between two coordinates.
//!
//! Markers move in a straight line in lat/lng space; no road network or
//! great-circle path is followed.

use geo::Coord;

use crate::LatLng;

/// Clamp an animation fraction to [0, 1]. NaN is treated as 0.
pub fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Interpolate between `start` and `target`.
///
/// `fraction` is clamped to [0, 1], so the result never overshoots either end.
///
/// # Example
/// ```
/// use transit_live::{interpolate, LatLng};
///
/// let mid = interpolate(LatLng::new(0.0, 0.0), LatLng::new(1.0, 2.0), 0.5);
/// assert_eq!(mid, LatLng::new(0.5, 1.0));
/// ```
pub fn interpolate(start: LatLng, target: LatLng, fraction: f64) -> LatLng {
    let t = clamp_fraction(fraction);
    if t >= 1.0 {
        return target;
    }
    let a: Coord = start.into();
    let b: Coord = target.into();
    (a + (b - a) * t).into()
}
