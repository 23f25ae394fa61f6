//! Signal detectors
//!
//! Pure predicates over one or two completed candles. Nothing in here performs
//! I/O; callers fetch candles and decide what to do with a match.
//!
//! # Detectors
//!
//! - **Engulfing**: two-bar bullish/bearish engulfing (wide form)
//! - **CPR**: central pivot range levels, proximity band, CPR-conditioned engulfing
//! - **Breakout**: real-body breakout beyond the prior day's high/low

pub mod helpers;

pub mod breakout;
pub mod cpr;
pub mod engulfing;

// Re-export all detectors for convenience
pub use breakout::*;
pub use cpr::*;
pub use engulfing::*;
pub use helpers::*;
