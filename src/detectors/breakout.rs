//! Daily range body breakout
//!
//! A candle breaks out only when its whole real body clears the reference
//! level; wicks poking through do not count.

use crate::{Direction, OHLCVExt, OHLCV};

/// Body breakout of `candle` against the prior day's `prev_high` / `prev_low`.
///
/// - Bullish when `body_low > prev_high`
/// - Bearish when `body_high < prev_low`
pub fn body_breakout<T: OHLCV>(candle: &T, prev_high: f64, prev_low: f64) -> Option<Direction> {
    if candle.body_low() > prev_high {
        Some(Direction::Bullish)
    } else if candle.body_high() < prev_low {
        Some(Direction::Bearish)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    #[test]
    fn test_body_above_prev_high() {
        let c = Candle::closed(1.1050, 1.1090, 1.1030, 1.1080);
        assert_eq!(body_breakout(&c, 1.1040, 1.0900), Some(Direction::Bullish));
    }

    #[test]
    fn test_body_overlapping_prev_high() {
        let c = Candle::closed(1.1040, 1.1060, 1.1010, 1.1020);
        assert_eq!(body_breakout(&c, 1.1040, 1.0900), None);
    }

    #[test]
    fn test_wick_only_is_not_a_breakout() {
        // high pierces 1.1040 but the body stays below it
        let c = Candle::closed(1.1020, 1.1070, 1.1010, 1.1035);
        assert_eq!(body_breakout(&c, 1.1040, 1.0900), None);
    }

    #[test]
    fn test_body_below_prev_low() {
        let c = Candle::closed(1.0890, 1.0910, 1.0850, 1.0860);
        assert_eq!(body_breakout(&c, 1.1040, 1.0900), Some(Direction::Bearish));
    }
}
