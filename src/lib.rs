//! # pivotwatch
//!
//! Candle-close signal monitor: polls completed OHLC candles for a set of
//! instruments, evaluates engulfing reversals, proximity to the central pivot
//! range (CPR) and daily body breakouts, and emits at most one alert per
//! condition within a cooldown window.
//!
//! ## Quick Start
//!
//! ```rust
//! use pivotwatch::prelude::*;
//!
//! let prev = Candle::closed(1.1060, 1.1070, 1.1030, 1.1040);
//! let curr = Candle::closed(1.1035, 1.1080, 1.1030, 1.1075);
//!
//! assert!(is_bullish_engulfing(&prev, &curr));
//! assert!(!is_bearish_engulfing(&prev, &curr));
//!
//! let levels = CprLevels::from_daily(&Candle::closed(1.2000, 1.3000, 1.1000, 1.2600));
//! assert!((levels.bc - 1.2000).abs() < 1e-9);
//! ```

pub mod adapters;
pub mod breakout;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod detectors;
pub mod engine;
pub mod logging;
pub mod scheduler;
pub mod signal;
pub mod source;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub mod prelude {
    pub use crate::{
        // Stores
        breakout::{BreakoutEvent, BreakoutState, BreakoutTracker},
        clock::{Clock, ManualClock, SystemClock},
        // Configuration
        config::{Check, InstrumentConfig, MonitorConfig},
        dedup::{AlertDeduplicator, AlertKey, LevelKind},
        // Detectors
        detectors::*,
        engine::SignalEngine,
        scheduler::{until_next_boundary, Monitor, Shutdown},
        signal::{Signal, SignalKind},
        source::{completed_window, AlertSink, CandleSource},
        // Types
        Candle,
        Direction,
        // Errors
        Error,
        Granularity,
        OHLCVExt,
        Result,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while monitoring.
///
/// Too few completed candles is not an error; window fetches report it as `None`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("candle source failed for {instrument} {granularity}: {reason}")]
    Source {
        instrument: String,
        granularity: Granularity,
        reason: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failures that are absorbed and retried on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Source { .. } | Error::Timeout { .. } | Error::InvalidCandle { .. }
        )
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLC price trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
}

/// Extension trait with computed properties for OHLC data
pub trait OHLCVExt: OHLCV {
    /// Upper end of the real body: `max(open, close)`
    #[inline]
    fn body_high(&self) -> f64 {
        self.open().max(self.close())
    }

    /// Lower end of the real body: `min(open, close)`
    #[inline]
    fn body_low(&self) -> f64 {
        self.open().min(self.close())
    }

    /// Validate OHLC data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if self.high() < self.low() {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// CANDLE
// ============================================================

/// OHLC summary of one fixed interval as delivered by a [`source::CandleSource`].
///
/// Only `complete` candles are ever evaluated.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub timestamp: DateTime<Utc>,
    pub complete: bool,
}

impl Candle {
    pub fn new(
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        timestamp: DateTime<Utc>,
        complete: bool,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            timestamp,
            complete,
        }
    }

    /// Completed candle stamped at the Unix epoch. Handy when only prices matter.
    pub fn closed(open: f64, high: f64, low: f64, close: f64) -> Self {
        Self::new(open, high, low, close, DateTime::<Utc>::UNIX_EPOCH, true)
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }
}

// ============================================================
// DIRECTION / GRANULARITY
// ============================================================

/// Direction/bias of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "BULLISH",
            Direction::Bearish => "BEARISH",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle interval, named as the provider names them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Granularity {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D,
}

impl Granularity {
    /// Interval length in seconds
    pub const fn seconds(self) -> u64 {
        match self {
            Granularity::M1 => 60,
            Granularity::M5 => 5 * 60,
            Granularity::M15 => 15 * 60,
            Granularity::M30 => 30 * 60,
            Granularity::H1 => 60 * 60,
            Granularity::H4 => 4 * 60 * 60,
            Granularity::D => 24 * 60 * 60,
        }
    }

    pub fn period(self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::M1 => "M1",
            Granularity::M5 => "M5",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H4 => "H4",
            Granularity::D => "D",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// TESTS
// ============================================================
