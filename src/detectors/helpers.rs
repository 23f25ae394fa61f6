//! Common thresholds and comparison helpers shared across detector modules.

// ============================================================
// CPR PROXIMITY THRESHOLDS
// ============================================================

/// Proximity band as a fraction of the prior day's range (1%).
pub const PROXIMITY_RANGE_FACTOR: f64 = 0.01;
/// Absolute floor for the proximity band (10 pips on a 4-decimal quote).
/// Keeps the band meaningful on quiet days.
pub const PROXIMITY_FLOOR: f64 = 0.0010;

// ============================================================
// HELPER FUNCTIONS
// ============================================================

/// Proximity threshold for a prior-day range: `max(factor * range, floor)`.
#[inline]
pub fn proximity_threshold_f(range: f64, factor: f64, floor: f64) -> f64 {
    (range * factor).max(floor)
}

/// Like [`proximity_threshold_f`] with [`PROXIMITY_RANGE_FACTOR`] and [`PROXIMITY_FLOOR`].
#[inline]
pub fn proximity_threshold(range: f64) -> f64 {
    proximity_threshold_f(range, PROXIMITY_RANGE_FACTOR, PROXIMITY_FLOOR)
}

/// `price` lies within `threshold` of `level` (inclusive).
#[inline]
pub fn is_near(price: f64, level: f64, threshold: f64) -> bool {
    (price - level).abs() <= threshold
}
