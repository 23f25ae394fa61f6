//! Per-instrument daily breakout state.
//!
//! Each instrument carries the previous day's high/low and a one-shot flag.
//! The state is reseeded from the daily candles whenever the local date moves
//! on, so at most one breakout alert fires per instrument per calendar day.

use std::{collections::HashMap, sync::Arc};

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    clock::Clock,
    detectors::body_breakout,
    source::{completed_window, CandleSource},
    Candle, Direction, Granularity, Result,
};

/// Previous-day reference levels for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutState {
    pub prev_high: f64,
    pub prev_low: f64,
    /// Local date the levels were taken for
    pub as_of: NaiveDate,
    pub fired_today: bool,
}

impl BreakoutState {
    pub fn new(prev_high: f64, prev_low: f64, as_of: NaiveDate) -> Self {
        Self {
            prev_high,
            prev_low,
            as_of,
            fired_today: false,
        }
    }

    fn seeded_from(day: &Candle, as_of: NaiveDate) -> Self {
        Self::new(day.high, day.low, as_of)
    }
}

/// A candle whose body closed entirely beyond the previous day's range.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakoutEvent {
    pub instrument: String,
    pub timeframe: Granularity,
    pub direction: Direction,
    pub candle: Candle,
    /// Previous day's high for a breakout, low for a breakdown
    pub reference: f64,
}

/// Shared breakout store, one entry per instrument.
pub struct BreakoutTracker {
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, BreakoutState>>,
}

impl BreakoutTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Current state for `instrument`, if seeded.
    pub fn state(&self, instrument: &str) -> Option<BreakoutState> {
        self.states.lock().get(instrument).copied()
    }

    /// Install a state directly, bypassing the daily fetch.
    pub fn seed(&self, instrument: impl Into<String>, state: BreakoutState) {
        self.states.lock().insert(instrument.into(), state);
    }

    /// Evaluate the latest completed `timeframe` candle against the previous
    /// day's range.
    ///
    /// Returns `Ok(None)` when the instrument already fired today, when the
    /// daily or intraday window is insufficient, or when the body stays inside
    /// the range. A fired breakout is not re-evaluated until the local date
    /// changes.
    pub async fn check<S>(
        &self,
        source: &S,
        instrument: &str,
        timeframe: Granularity,
    ) -> Result<Option<BreakoutEvent>>
    where
        S: CandleSource + ?Sized,
    {
        let today = self.clock.today();

        let current = self.state(instrument).filter(|s| s.as_of == today);
        let state = match current {
            Some(state) => state,
            None => {
                let Some(days) = completed_window(source, instrument, Granularity::D, 2).await?
                else {
                    debug!(instrument, "not enough daily candles to seed breakout levels");
                    return Ok(None);
                };
                let Some(prior) = days.last() else {
                    return Ok(None);
                };
                let state = BreakoutState::seeded_from(prior, today);
                debug!(
                    instrument,
                    prev_high = state.prev_high,
                    prev_low = state.prev_low,
                    %today,
                    "breakout levels reseeded"
                );
                self.seed(instrument, state);
                state
            }
        };

        if state.fired_today {
            return Ok(None);
        }

        let Some(window) = completed_window(source, instrument, timeframe, 1).await? else {
            return Ok(None);
        };
        let Some(&candle) = window.last() else {
            return Ok(None);
        };

        let Some(direction) = body_breakout(&candle, state.prev_high, state.prev_low) else {
            return Ok(None);
        };

        // Another task may have fired or reseeded while we were fetching.
        {
            let mut states = self.states.lock();
            match states.get_mut(instrument) {
                Some(s) if s.as_of == state.as_of && !s.fired_today => s.fired_today = true,
                _ => return Ok(None),
            }
        }

        let reference = match direction {
            Direction::Bullish => state.prev_high,
            Direction::Bearish => state.prev_low,
        };
        Ok(Some(BreakoutEvent {
            instrument: instrument.to_string(),
            timeframe,
            direction,
            candle,
            reference,
        }))
    }
}

impl std::fmt::Debug for BreakoutTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakoutTracker")
            .field("instruments", &self.states.lock().len())
            .finish()
    }
}
