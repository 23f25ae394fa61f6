//! Central pivot range (CPR) levels and CPR-conditioned engulfing.
//!
//! Levels come from exactly one fully closed daily candle:
//!
//! - `pivot = (H + L + C) / 3`
//! - `bc    = (H + L) / 2`
//! - `tc    = 2 * pivot - bc`
//!
//! They are recomputed on every evaluation; the prior day changes daily.

use super::{
    engulfing::is_engulfing,
    helpers::{is_near, proximity_threshold_f, PROXIMITY_FLOOR, PROXIMITY_RANGE_FACTOR},
};
use crate::{Direction, OHLCV};

// ============================================================
// LEVELS
// ============================================================

/// Pivot, bottom-central and top-central levels of one daily candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CprLevels {
    pub pivot: f64,
    pub bc: f64,
    pub tc: f64,
    /// Prior day's high/low, kept for the proximity band
    pub high: f64,
    pub low: f64,
}

impl CprLevels {
    /// Derive levels from the prior day's candle.
    pub fn from_daily<T: OHLCV>(day: &T) -> Self {
        let (h, l, c) = (day.high(), day.low(), day.close());
        let pivot = (h + l + c) / 3.0;
        let bc = (h + l) / 2.0;
        let tc = 2.0 * pivot - bc;
        Self {
            pivot,
            bc,
            tc,
            high: h,
            low: l,
        }
    }

    /// Prior day's high - low
    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Proximity band with default factor and floor.
    pub fn threshold(&self) -> f64 {
        self.threshold_f(PROXIMITY_RANGE_FACTOR, PROXIMITY_FLOOR)
    }

    pub fn threshold_f(&self, factor: f64, floor: f64) -> f64 {
        proximity_threshold_f(self.range(), factor, floor)
    }

    #[inline]
    pub fn level(&self, which: CprLevel) -> f64 {
        match which {
            CprLevel::Tc => self.tc,
            CprLevel::Bc => self.bc,
        }
    }
}

/// Which central level a price is compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CprLevel {
    Tc,
    Bc,
}

impl CprLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CprLevel::Tc => "TC",
            CprLevel::Bc => "BC",
        }
    }
}

// ============================================================
// POLICY
// ============================================================

/// Which {pattern x level} combinations count as a CPR signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CprPolicy {
    /// All four combinations, first match wins, in the order
    /// bearish@TC, bullish@TC, bullish@BC, bearish@BC.
    #[default]
    FirstMatch,
    /// Bearish only near TC (resistance), bullish only near BC (support).
    Conventional,
}

impl CprPolicy {
    /// Combinations in checking order.
    pub fn combinations(self) -> &'static [(Direction, CprLevel)] {
        const FIRST_MATCH: [(Direction, CprLevel); 4] = [
            (Direction::Bearish, CprLevel::Tc),
            (Direction::Bullish, CprLevel::Tc),
            (Direction::Bullish, CprLevel::Bc),
            (Direction::Bearish, CprLevel::Bc),
        ];
        const CONVENTIONAL: [(Direction, CprLevel); 2] = [
            (Direction::Bearish, CprLevel::Tc),
            (Direction::Bullish, CprLevel::Bc),
        ];
        match self {
            CprPolicy::FirstMatch => &FIRST_MATCH,
            CprPolicy::Conventional => &CONVENTIONAL,
        }
    }
}

// ============================================================
// CPR-CONDITIONED ENGULFING
// ============================================================

/// An engulfing candle that closed near a CPR level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CprTouch {
    pub direction: Direction,
    pub level: CprLevel,
    pub level_value: f64,
}

/// First combination of `policy` for which `curr` engulfs `prev` and
/// `curr.close` lies within `threshold` of the level.
pub fn cpr_engulfing<T: OHLCV>(
    levels: &CprLevels,
    threshold: f64,
    prev: &T,
    curr: &T,
    policy: CprPolicy,
) -> Option<CprTouch> {
    policy
        .combinations()
        .iter()
        .copied()
        .find(|&(direction, level)| {
            is_engulfing(direction, prev, curr)
                && is_near(curr.close(), levels.level(level), threshold)
        })
        .map(|(direction, level)| CprTouch {
            direction,
            level,
            level_value: levels.level(level),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    const EPS: f64 = 1e-9;

    fn wide_day() -> CprLevels {
        CprLevels::from_daily(&Candle::closed(1.1500, 1.3000, 1.1000, 1.2600))
    }

    fn touch(
        levels: &CprLevels,
        prev: &Candle,
        curr: &Candle,
        policy: CprPolicy,
    ) -> Option<CprTouch> {
        cpr_engulfing(levels, levels.threshold(), prev, curr, policy)
    }

    #[test]
    fn test_degenerate_levels() {
        let levels = CprLevels::from_daily(&Candle::closed(1.1500, 1.2000, 1.1000, 1.1500));
        assert!((levels.pivot - 1.1500).abs() < EPS);
        assert!((levels.bc - 1.1500).abs() < EPS);
        assert!((levels.tc - 1.1500).abs() < EPS);
    }

    #[test]
    fn test_levels_with_high_close() {
        let levels = CprLevels::from_daily(&Candle::closed(1.1500, 1.3000, 1.1000, 1.2600));
        assert!((levels.pivot - 1.2200).abs() < EPS);
        assert!((levels.bc - 1.2000).abs() < EPS);
        assert!((levels.tc - 1.2400).abs() < EPS);
        assert!((levels.threshold() - 0.0020).abs() < EPS);
    }

    #[test]
    fn test_bullish_near_bc() {
        // bc = 1.2000, threshold = 0.0020
        let levels = wide_day();
        let prev = Candle::closed(1.2000, 1.2010, 1.1970, 1.1980);
        let curr = Candle::closed(1.1975, 1.2020, 1.1970, 1.2010);
        let found = touch(&levels, &prev, &curr, CprPolicy::FirstMatch).expect("near BC");
        assert_eq!(found.direction, Direction::Bullish);
        assert_eq!(found.level, CprLevel::Bc);
        assert!((found.level_value - 1.2000).abs() < EPS);
    }

    #[test]
    fn test_far_from_levels() {
        let levels = wide_day();
        let prev = Candle::closed(1.1500, 1.1510, 1.1470, 1.1480);
        let curr = Candle::closed(1.1475, 1.1520, 1.1470, 1.1510);
        assert!(touch(&levels, &prev, &curr, CprPolicy::FirstMatch).is_none());
    }

    #[test]
    fn test_bullish_near_tc_depends_on_policy() {
        // tc = 1.2400
        let levels = wide_day();
        let prev = Candle::closed(1.2400, 1.2410, 1.2370, 1.2380);
        let curr = Candle::closed(1.2375, 1.2420, 1.2370, 1.2405);

        let found = touch(&levels, &prev, &curr, CprPolicy::FirstMatch).expect("bullish at TC");
        assert_eq!((found.direction, found.level), (Direction::Bullish, CprLevel::Tc));

        assert!(touch(&levels, &prev, &curr, CprPolicy::Conventional).is_none());
    }

    #[test]
    fn test_degenerate_range_first_match_prefers_tc() {
        // tc == bc, so a bullish engulfing near both reports TC first
        let levels = CprLevels::from_daily(&Candle::closed(1.1500, 1.2000, 1.1000, 1.1500));
        let prev = Candle::closed(1.1505, 1.1510, 1.1480, 1.1490);
        let curr = Candle::closed(1.1485, 1.1512, 1.1480, 1.1507);
        let first = touch(&levels, &prev, &curr, CprPolicy::FirstMatch).unwrap();
        assert_eq!(first.level, CprLevel::Tc);
        let conventional = touch(&levels, &prev, &curr, CprPolicy::Conventional).unwrap();
        assert_eq!(conventional.level, CprLevel::Bc);
    }

    #[test]
    fn test_policy_serde() {
        let p: CprPolicy = serde_json::from_str("\"conventional\"").unwrap();
        assert_eq!(p, CprPolicy::Conventional);
        assert_eq!(CprPolicy::default(), CprPolicy::FirstMatch);
    }
}
