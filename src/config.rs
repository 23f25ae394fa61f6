//! Monitor configuration.
//!
//! The check table and timings come from a JSON file (every field optional);
//! credentials and endpoints come from the environment.

use std::{collections::HashSet, env, path::Path, time::Duration};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::{
    detectors::{CprPolicy, PROXIMITY_FLOOR, PROXIMITY_RANGE_FACTOR},
    engine::DetectorParams,
    Error, Granularity, Result,
};

// ============================================================
// CHECK TABLE
// ============================================================

/// A detector run against one `(instrument, timeframe)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Engulfing,
    CprEngulfing,
    BodyBreakout,
}

impl Check {
    pub const ALL: [Check; 3] = [Check::Engulfing, Check::CprEngulfing, Check::BodyBreakout];

    pub fn as_str(self) -> &'static str {
        match self {
            Check::Engulfing => "engulfing",
            Check::CprEngulfing => "cpr_engulfing",
            Check::BodyBreakout => "body_breakout",
        }
    }
}

fn all_checks() -> Vec<Check> {
    Check::ALL.to_vec()
}

/// Which checks run for one instrument, and on which timeframes (in order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub instrument: String,
    pub timeframes: Vec<Granularity>,
    #[serde(default = "all_checks")]
    pub checks: Vec<Check>,
}

impl InstrumentConfig {
    pub fn new(instrument: impl Into<String>, timeframes: Vec<Granularity>) -> Self {
        Self {
            instrument: instrument.into(),
            timeframes,
            checks: all_checks(),
        }
    }

    pub fn with_checks(mut self, checks: Vec<Check>) -> Self {
        self.checks = checks;
        self
    }

    /// Loop cadence: the shortest configured timeframe.
    pub fn cadence(&self) -> Granularity {
        self.timeframes.iter().copied().min().unwrap_or(Granularity::D)
    }
}

// ============================================================
// MONITOR CONFIG
// ============================================================

/// Top-level monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub instruments: Vec<InstrumentConfig>,
    /// Minimum seconds between two alerts with the same identity
    pub cooldown_secs: u64,
    /// Back-off after a failed cycle
    pub recovery_secs: u64,
    /// Pause between timeframes of one instrument
    pub timeframe_pause_ms: u64,
    /// Upper bound on any single fetch or send
    pub io_timeout_secs: u64,
    /// 0 disables the heartbeat
    pub heartbeat_secs: u64,
    /// Offset used for candle boundaries and day rollover, e.g. `+05:30`
    pub utc_offset: String,
    pub cpr_policy: CprPolicy,
    pub proximity_factor: f64,
    pub proximity_floor: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        use Granularity::{H1, M30};
        Self {
            instruments: vec![
                InstrumentConfig::new("EUR_USD", vec![M30]),
                InstrumentConfig::new("XAU_USD", vec![H1]),
                InstrumentConfig::new("NZD_USD", vec![M30]),
                InstrumentConfig::new("ETH_USD", vec![H1]),
            ],
            cooldown_secs: 1800,
            recovery_secs: 300,
            timeframe_pause_ms: 1000,
            io_timeout_secs: 20,
            heartbeat_secs: 600,
            utc_offset: "+00:00".to_string(),
            cpr_policy: CprPolicy::default(),
            proximity_factor: PROXIMITY_RANGE_FACTOR,
            proximity_floor: PROXIMITY_FLOOR,
        }
    }
}

impl MonitorConfig {
    /// Load and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::InvalidConfig("no instruments configured".into()));
        }

        let mut seen = HashSet::new();
        for inst in &self.instruments {
            if inst.instrument.trim().is_empty() {
                return Err(Error::InvalidConfig("empty instrument name".into()));
            }
            if !seen.insert(inst.instrument.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate instrument {}",
                    inst.instrument
                )));
            }
            if inst.timeframes.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "{} has no timeframes",
                    inst.instrument
                )));
            }
        }

        if self.cooldown_secs == 0 {
            return Err(Error::InvalidConfig("cooldown_secs must be positive".into()));
        }
        if self.io_timeout_secs == 0 {
            return Err(Error::InvalidConfig("io_timeout_secs must be positive".into()));
        }
        for (name, value) in [
            ("proximity_factor", self.proximity_factor),
            ("proximity_floor", self.proximity_floor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }

        self.offset()?;
        Ok(())
    }

    /// Parsed `utc_offset`. Accepts `Z`, `+HH:MM`, `-HH:MM` and `+HHMM`.
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.utc_offset)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_secs)
    }

    pub fn timeframe_pause(&self) -> Duration {
        Duration::from_millis(self.timeframe_pause_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            policy: self.cpr_policy,
            proximity_factor: self.proximity_factor,
            proximity_floor: self.proximity_floor,
        }
    }
}

fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let invalid = || Error::InvalidConfig(format!("invalid utc_offset {raw:?}"));

    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

// ============================================================
// ENVIRONMENT
// ============================================================

/// Practice endpoint, used when `OANDA_URL` is unset.
pub const DEFAULT_OANDA_URL: &str = "https://api-fxpractice.oanda.com/v3";

/// Credentials and endpoints read from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub oanda_api_key: String,
    pub oanda_url: String,
    /// Both `None` ⇒ alerts go to the log instead of Telegram.
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            oanda_api_key: env_str("OANDA_API_KEY", ""),
            oanda_url: env_str("OANDA_URL", DEFAULT_OANDA_URL),
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
        }
    }

    /// Bot token and chat id, when both are set.
    pub fn telegram(&self) -> Option<(&str, &str)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) => Some((token.as_str(), chat.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("oanda_api_key", &(!self.oanda_api_key.is_empty()))
            .field("oanda_url", &self.oanda_url)
            .field("telegram", &self.telegram().is_some())
            .finish()
    }
}
