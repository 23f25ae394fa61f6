//! Time-windowed alert de-duplication.
//!
//! Every alert has an identity ([`AlertKey`]) and the deduplicator remembers
//! when each identity last fired. An identity is admitted again only once the
//! cooldown has elapsed. Clearing is coarse: the whole map is dropped either
//! on a lazy sweep once a full cooldown has passed since the previous sweep,
//! or when local time crosses midnight. All cooldowns restart together.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{clock::Clock, detectors::CprLevel, Direction, Granularity};

/// Reference cooldown: 30 minutes.
pub const DEFAULT_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(30 * 60);

// ============================================================
// ALERT KEY
// ============================================================

/// Level an alert refers to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKind {
    Tc,
    Bc,
    High,
    Low,
}

impl LevelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelKind::Tc => "TC",
            LevelKind::Bc => "BC",
            LevelKind::High => "HIGH",
            LevelKind::Low => "LOW",
        }
    }
}

impl From<CprLevel> for LevelKind {
    fn from(level: CprLevel) -> Self {
        match level {
            CprLevel::Tc => LevelKind::Tc,
            CprLevel::Bc => LevelKind::Bc,
        }
    }
}

/// Identity of an alert: `(instrument, timeframe, pattern, level?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub instrument: String,
    pub timeframe: Granularity,
    pub pattern: Direction,
    pub level: Option<LevelKind>,
}

impl AlertKey {
    pub fn new(
        instrument: impl Into<String>,
        timeframe: Granularity,
        pattern: Direction,
        level: Option<LevelKind>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
            pattern,
            level,
        }
    }
}

impl fmt::Display for AlertKey {
    /// `EUR_USD_M30_BULLISH_BC`, or `EUR_USD_M30_BULLISH_` without a level.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.instrument,
            self.timeframe,
            self.pattern,
            self.level.map(LevelKind::as_str).unwrap_or("")
        )
    }
}

// ============================================================
// DEDUPLICATOR
// ============================================================

#[derive(Debug)]
struct DedupState {
    fired: HashMap<AlertKey, DateTime<FixedOffset>>,
    last_sweep: DateTime<FixedOffset>,
    cleared_on: NaiveDate,
}

/// Shared cooldown store. Safe to use from every monitor task at once.
pub struct AlertDeduplicator {
    cooldown: TimeDelta,
    clock: Arc<dyn Clock>,
    state: Mutex<DedupState>,
}

impl AlertDeduplicator {
    pub fn new(cooldown: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            clock,
            state: Mutex::new(DedupState {
                fired: HashMap::new(),
                last_sweep: now,
                cleared_on: now.date_naive(),
            }),
        }
    }

    /// Lazy global sweep. Returns `true` if the map was cleared.
    pub fn sweep(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::sweep_locked(&mut state, now, self.cooldown)
    }

    /// `true` if `key` has not fired within the cooldown window.
    ///
    /// Runs the lazy sweep first.
    pub fn admit(&self, key: &AlertKey) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::sweep_locked(&mut state, now, self.cooldown);

        match state.fired.get(key) {
            Some(&last) if now - last < self.cooldown => {
                debug!(%key, last_fired = %last, "alert in cooldown");
                false
            }
            _ => true,
        }
    }

    /// Record that `key` fired now.
    pub fn record(&self, key: AlertKey) {
        let now = self.clock.now();
        self.state.lock().fired.insert(key, now);
    }

    /// Number of identities currently remembered
    pub fn len(&self) -> usize {
        self.state.lock().fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_locked(
        state: &mut DedupState,
        now: DateTime<FixedOffset>,
        cooldown: TimeDelta,
    ) -> bool {
        let new_day = now.date_naive() > state.cleared_on;
        let expired = now - state.last_sweep >= cooldown;
        if !(new_day || expired) {
            return false;
        }

        let entries = state.fired.len();
        state.fired.clear();
        state.last_sweep = now;
        if new_day {
            state.cleared_on = now.date_naive();
            info!(entries, "daily alert reset");
        } else if entries > 0 {
            info!(entries, "cleared expired alerts");
        }
        true
    }
}

impl fmt::Debug for AlertDeduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertDeduplicator")
            .field("cooldown", &self.cooldown)
            .field("entries", &self.len())
            .finish()
    }
}
