//! Runs the configured checks for one `(instrument, timeframe)`.
//!
//! Flow per check: fetch completed candles, evaluate the pure detector, ask the
//! deduplicator for admission, send, then record the fire.

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    breakout::BreakoutTracker,
    clock::Clock,
    config::Check,
    dedup::AlertDeduplicator,
    detectors::{
        cpr_engulfing, engulfing, CprLevels, CprPolicy, PROXIMITY_FLOOR, PROXIMITY_RANGE_FACTOR,
    },
    scheduler::Shutdown,
    signal::{Signal, SignalKind},
    source::{completed_window, AlertSink, CandleSource},
    Candle, Direction, Error, Granularity, Result,
};

/// Tunables for the CPR detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub policy: CprPolicy,
    pub proximity_factor: f64,
    pub proximity_floor: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            policy: CprPolicy::default(),
            proximity_factor: PROXIMITY_RANGE_FACTOR,
            proximity_floor: PROXIMITY_FLOOR,
        }
    }
}

/// Default bound on a single fetch or send.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(20);

/// Detection core shared by every monitor task.
pub struct SignalEngine {
    source: Arc<dyn CandleSource>,
    sink: Arc<dyn AlertSink>,
    dedup: Arc<AlertDeduplicator>,
    breakouts: Arc<BreakoutTracker>,
    clock: Arc<dyn Clock>,
    params: DetectorParams,
    io_timeout: Duration,
}

impl SignalEngine {
    pub fn new(
        source: Arc<dyn CandleSource>,
        sink: Arc<dyn AlertSink>,
        dedup: Arc<AlertDeduplicator>,
        breakouts: Arc<BreakoutTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            sink,
            dedup,
            breakouts,
            clock,
            params: DetectorParams::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_params(mut self, params: DetectorParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn dedup(&self) -> &AlertDeduplicator {
        &self.dedup
    }

    pub fn breakouts(&self) -> &BreakoutTracker {
        &self.breakouts
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ============================================================
    // EVALUATION
    // ============================================================

    /// Run `checks` in order and emit every admitted signal.
    ///
    /// Transient failures (provider errors, timeouts, bad candles) abort only
    /// the check that hit them. Any other error is returned.
    pub async fn evaluate(
        &self,
        instrument: &str,
        timeframe: Granularity,
        checks: &[Check],
    ) -> Result<Vec<Signal>> {
        self.run_checks(instrument, timeframe, checks, None).await
    }

    /// Same as [`evaluate`](Self::evaluate), but gives up at the next fetch once
    /// `shutdown` fires. An alert that was already admitted is still delivered.
    pub async fn evaluate_until(
        &self,
        instrument: &str,
        timeframe: Granularity,
        checks: &[Check],
        shutdown: &mut Shutdown,
    ) -> Result<Vec<Signal>> {
        self.run_checks(instrument, timeframe, checks, Some(shutdown)).await
    }

    async fn run_checks(
        &self,
        instrument: &str,
        timeframe: Granularity,
        checks: &[Check],
        mut shutdown: Option<&mut Shutdown>,
    ) -> Result<Vec<Signal>> {
        let mut emitted = Vec::new();
        for &check in checks {
            let detection = match shutdown.as_deref_mut() {
                Some(shutdown) => {
                    if shutdown.is_triggered() {
                        debug!(instrument, %timeframe, "shutdown, skipping remaining checks");
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.wait() => {
                            debug!(instrument, %timeframe, "shutdown, check abandoned");
                            break;
                        }
                        detection = self.detect(check, instrument, timeframe) => detection,
                    }
                }
                None => self.detect(check, instrument, timeframe).await,
            };
            match detection {
                Ok(Some(signal)) => {
                    if self.emit(&signal).await {
                        emitted.push(signal);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!(
                        instrument,
                        %timeframe,
                        check = check.as_str(),
                        error = %e,
                        "check failed"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(emitted)
    }

    /// Evaluate one check without emitting anything.
    pub async fn detect(
        &self,
        check: Check,
        instrument: &str,
        timeframe: Granularity,
    ) -> Result<Option<Signal>> {
        let operation = check.as_str();
        let detection = match check {
            Check::Engulfing => {
                self.bounded(operation, self.check_engulfing(instrument, timeframe)).await?
            }
            Check::CprEngulfing => {
                self.bounded(operation, self.check_cpr_engulfing(instrument, timeframe)).await?
            }
            Check::BodyBreakout => {
                self.bounded(operation, self.check_body_breakout(instrument, timeframe)).await?
            }
        };
        if detection.is_none() {
            debug!(instrument, %timeframe, check = operation, "no signal");
        }
        Ok(detection)
    }

    async fn check_engulfing(
        &self,
        instrument: &str,
        timeframe: Granularity,
    ) -> Result<Option<Signal>> {
        let Some([prev, curr]) = self.last_two(instrument, timeframe).await? else {
            return Ok(None);
        };
        Ok(engulfing(&prev, &curr).map(|direction| {
            self.signal(instrument, timeframe, direction, SignalKind::Engulfing, &curr)
        }))
    }

    async fn check_cpr_engulfing(
        &self,
        instrument: &str,
        timeframe: Granularity,
    ) -> Result<Option<Signal>> {
        let Some([_, prior_day]) = self.last_two(instrument, Granularity::D).await? else {
            debug!(instrument, "not enough daily candles for CPR");
            return Ok(None);
        };
        let Some([prev, curr]) = self.last_two(instrument, timeframe).await? else {
            return Ok(None);
        };

        let levels = CprLevels::from_daily(&prior_day);
        let threshold =
            levels.threshold_f(self.params.proximity_factor, self.params.proximity_floor);
        let touch = cpr_engulfing(&levels, threshold, &prev, &curr, self.params.policy);

        Ok(touch.map(|t| {
            let kind = SignalKind::CprEngulfing {
                level: t.level,
                level_value: t.level_value,
            };
            self.signal(instrument, timeframe, t.direction, kind, &curr)
        }))
    }

    async fn check_body_breakout(
        &self,
        instrument: &str,
        timeframe: Granularity,
    ) -> Result<Option<Signal>> {
        let event = self
            .breakouts
            .check(self.source.as_ref(), instrument, timeframe)
            .await?;
        Ok(event.map(|e| {
            let kind = SignalKind::BodyBreakout {
                reference: e.reference,
            };
            self.signal(instrument, timeframe, e.direction, kind, &e.candle)
        }))
    }

    // ============================================================
    // EMISSION
    // ============================================================

    /// Send `signal` unless its key is cooling down. Returns `true` if sent.
    pub async fn emit(&self, signal: &Signal) -> bool {
        let key = signal.key();
        if !self.dedup.admit(&key) {
            debug!(%key, "alert suppressed");
            return false;
        }

        let text = signal.render();
        if tokio::time::timeout(self.io_timeout, self.sink.send(&text)).await.is_err() {
            warn!(%key, timeout = ?self.io_timeout, "alert delivery timed out");
        }
        self.dedup.record(key.clone());
        info!(%key, title = %signal.title(), "alert sent");
        true
    }

    // ============================================================
    // HELPERS
    // ============================================================

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                after: self.io_timeout,
            })?
    }

    async fn last_two(
        &self,
        instrument: &str,
        granularity: Granularity,
    ) -> Result<Option<[Candle; 2]>> {
        let window = completed_window(self.source.as_ref(), instrument, granularity, 2).await?;
        Ok(window.and_then(|w| <[Candle; 2]>::try_from(w).ok()))
    }

    fn signal(
        &self,
        instrument: &str,
        timeframe: Granularity,
        direction: Direction,
        kind: SignalKind,
        candle: &Candle,
    ) -> Signal {
        Signal {
            instrument: instrument.to_string(),
            timeframe,
            direction,
            kind,
            open: candle.open,
            close: candle.close,
            at: self.clock.now(),
        }
    }
}

impl std::fmt::Debug for SignalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalEngine")
            .field("params", &self.params)
            .field("io_timeout", &self.io_timeout)
            .field("dedup", &self.dedup)
            .finish()
    }
}
