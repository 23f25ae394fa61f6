//! Detected, alertable conditions and their notification text.

use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::{
    dedup::{AlertKey, LevelKind},
    detectors::CprLevel,
    Direction, Granularity,
};

/// What fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalKind {
    /// Plain two-bar engulfing
    Engulfing,
    /// Engulfing whose close sits near a CPR level
    CprEngulfing { level: CprLevel, level_value: f64 },
    /// Real body beyond the prior day's high (bullish) or low (bearish)
    BodyBreakout { reference: f64 },
}

/// A condition detected on the latest completed candle of one
/// `(instrument, timeframe)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub instrument: String,
    pub timeframe: Granularity,
    pub direction: Direction,
    pub kind: SignalKind,
    /// Open/close of the candle that triggered the signal
    pub open: f64,
    pub close: f64,
    /// Local time of detection
    pub at: DateTime<FixedOffset>,
}

impl Signal {
    /// Dedup identity of this signal.
    pub fn key(&self) -> AlertKey {
        let level = match self.kind {
            SignalKind::Engulfing => None,
            SignalKind::CprEngulfing { level, .. } => Some(LevelKind::from(level)),
            SignalKind::BodyBreakout { .. } => Some(match self.direction {
                Direction::Bullish => LevelKind::High,
                Direction::Bearish => LevelKind::Low,
            }),
        };
        AlertKey::new(self.instrument.clone(), self.timeframe, self.direction, level)
    }

    fn emoji(&self) -> &'static str {
        match self.direction {
            Direction::Bullish => "🚀",
            Direction::Bearish => "🔻",
        }
    }

    /// Headline without markup, e.g. `BULLISH Engulfing near CPR BC`.
    pub fn title(&self) -> String {
        match (self.kind, self.direction) {
            (SignalKind::Engulfing, d) => format!("{d} Engulfing"),
            (SignalKind::CprEngulfing { level, .. }, d) => {
                format!("{d} Engulfing near CPR {}", level.as_str())
            }
            (SignalKind::BodyBreakout { .. }, Direction::Bullish) => {
                format!("{} Bullish Body Breakout", self.instrument)
            }
            (SignalKind::BodyBreakout { .. }, Direction::Bearish) => {
                format!("{} Bearish Body Breakdown", self.instrument)
            }
        }
    }

    /// HTML notification text.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} <b>{}</b>", self.emoji(), self.title())?;
        writeln!(f)?;
        if !matches!(self.kind, SignalKind::BodyBreakout { .. }) {
            writeln!(f, "Pair: {}", self.instrument)?;
        }
        writeln!(f, "TF: {}", self.timeframe)?;
        writeln!(f, "Open: {:.5}", self.open)?;
        writeln!(f, "Close: {:.5}", self.close)?;
        match self.kind {
            SignalKind::Engulfing => {}
            SignalKind::CprEngulfing { level, level_value } => {
                writeln!(f, "CPR {}: {:.5}", level.as_str(), level_value)?;
            }
            SignalKind::BodyBreakout { reference } => {
                let side = if self.direction.is_bullish() { "High" } else { "Low" };
                writeln!(f, "Prev Day {side}: {reference:.5}")?;
            }
        }
        write!(f, "Time: {}", self.at.format("%Y-%m-%d %H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(direction: Direction, kind: SignalKind) -> Signal {
        Signal {
            instrument: "EUR_USD".into(),
            timeframe: Granularity::M30,
            direction,
            kind,
            open: 1.19755,
            close: 1.2010,
            at: DateTime::parse_from_rfc3339("2024-03-04T10:30:00+00:00").unwrap(),
        }
    }

    #[test]
    fn test_keys_by_kind() {
        let plain = signal(Direction::Bullish, SignalKind::Engulfing);
        assert_eq!(plain.key().to_string(), "EUR_USD_M30_BULLISH_");

        let cpr = signal(
            Direction::Bullish,
            SignalKind::CprEngulfing {
                level: CprLevel::Bc,
                level_value: 1.2,
            },
        );
        assert_eq!(cpr.key().to_string(), "EUR_USD_M30_BULLISH_BC");

        let breakdown = signal(Direction::Bearish, SignalKind::BodyBreakout { reference: 1.19 });
        assert_eq!(breakdown.key().level, Some(LevelKind::Low));
    }

    #[test]
    fn test_render_cpr_message() {
        let cpr = signal(
            Direction::Bullish,
            SignalKind::CprEngulfing {
                level: CprLevel::Bc,
                level_value: 1.2,
            },
        );
        let text = cpr.render();
        assert!(text.starts_with("🚀 <b>BULLISH Engulfing near CPR BC</b>\n\nPair: EUR_USD\n"));
        assert!(text.contains("CPR BC: 1.20000\n"));
        assert!(text.ends_with("Time: 2024-03-04 10:30:00"));
    }

    #[test]
    fn test_render_breakdown_message() {
        let breakdown = signal(Direction::Bearish, SignalKind::BodyBreakout { reference: 1.19 });
        let text = breakdown.render();
        assert!(text.starts_with("🔻 <b>EUR_USD Bearish Body Breakdown</b>\n\nTF: M30\n"));
        assert!(text.contains("Prev Day Low: 1.19000\n"));
    }
}
