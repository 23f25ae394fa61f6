//! Two-bar engulfing detectors
//!
//! This is the wide "body reaches past the prior open" form used by the alert
//! rules, not the TA-Lib CDLENGULFING definition: the current candle must open
//! at or beyond the prior close, open beyond the prior open, and close beyond
//! the prior open in the opposite direction.

use crate::{Direction, OHLCV};

// ============================================================
// ENGULFING PATTERNS
// ============================================================

/// Bullish engulfing:
/// `curr.open <= prev.close && curr.open < prev.open && curr.close > prev.open`
#[inline]
pub fn is_bullish_engulfing<T: OHLCV>(prev: &T, curr: &T) -> bool {
    curr.open() <= prev.close() && curr.open() < prev.open() && curr.close() > prev.open()
}

/// Bearish engulfing:
/// `curr.open >= prev.close && curr.open > prev.open && curr.close < prev.open`
#[inline]
pub fn is_bearish_engulfing<T: OHLCV>(prev: &T, curr: &T) -> bool {
    curr.open() >= prev.close() && curr.open() > prev.open() && curr.close() < prev.open()
}

/// Engulfing direction of `curr` over `prev`, bullish checked first.
///
/// The two predicates cannot both hold (they disagree on `curr.open` vs
/// `prev.open`), so the order only matters for readability.
pub fn engulfing<T: OHLCV>(prev: &T, curr: &T) -> Option<Direction> {
    if is_bullish_engulfing(prev, curr) {
        Some(Direction::Bullish)
    } else if is_bearish_engulfing(prev, curr) {
        Some(Direction::Bearish)
    } else {
        None
    }
}

/// Engulfing predicate for a given direction.
#[inline]
pub fn is_engulfing<T: OHLCV>(direction: Direction, prev: &T, curr: &T) -> bool {
    match direction {
        Direction::Bullish => is_bullish_engulfing(prev, curr),
        Direction::Bearish => is_bearish_engulfing(prev, curr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    #[test]
    fn test_bullish_engulfing() {
        let prev = Candle::closed(1.1060, 1.1070, 1.1030, 1.1040);
        let curr = Candle::closed(1.1035, 1.1080, 1.1030, 1.1075);
        assert!(is_bullish_engulfing(&prev, &curr));
        assert_eq!(engulfing(&prev, &curr), Some(Direction::Bullish));
    }

    #[test]
    fn test_bearish_engulfing() {
        let prev = Candle::closed(1.1040, 1.1065, 1.1035, 1.1060);
        let curr = Candle::closed(1.1065, 1.1070, 1.1020, 1.1030);
        assert!(is_bearish_engulfing(&prev, &curr));
        assert_eq!(engulfing(&prev, &curr), Some(Direction::Bearish));
    }

    #[test]
    fn test_open_equal_to_prev_close_still_counts() {
        // curr.open == prev.close is allowed on both sides
        let prev = Candle::closed(1.1060, 1.1070, 1.1030, 1.1040);
        let curr = Candle::closed(1.1040, 1.1080, 1.1035, 1.1070);
        assert!(is_bullish_engulfing(&prev, &curr));
    }

    #[test]
    fn test_close_only_past_prev_open_not_prev_close() {
        // Looser than the textbook form: closing above prev.open is enough even
        // when prev was bullish and its close sits higher still.
        let prev = Candle::closed(1.1000, 1.1100, 1.0990, 1.1090);
        let curr = Candle::closed(1.0995, 1.1020, 1.0990, 1.1010);
        assert!(is_bullish_engulfing(&prev, &curr));
    }

    #[test]
    fn test_inside_bar_is_not_engulfing() {
        let prev = Candle::closed(1.1000, 1.1100, 1.0900, 1.1080);
        let curr = Candle::closed(1.1050, 1.1070, 1.1020, 1.1030);
        assert_eq!(engulfing(&prev, &curr), None);
    }

    #[test]
    fn test_is_engulfing_by_direction() {
        let prev = Candle::closed(1.1060, 1.1070, 1.1030, 1.1040);
        let curr = Candle::closed(1.1035, 1.1080, 1.1030, 1.1075);
        assert!(is_engulfing(Direction::Bullish, &prev, &curr));
        assert!(!is_engulfing(Direction::Bearish, &prev, &curr));
    }
}
