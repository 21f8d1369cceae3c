//! Numeric helpers shared by the engine and scripts.

/// Rounds to two decimal places, half away from zero.
///
/// Equivalent to `round(x * 100) / 100` on doubles. Applying it to an
/// already-rounded value returns the same value.
#[inline]
pub fn round_currency(x: f64) -> f64 {
    round_to(x, 2)
}

/// Rounds to `places` decimal places, half away from zero.
#[inline]
pub fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}
