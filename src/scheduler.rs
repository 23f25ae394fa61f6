//! Boundary-aligned monitor loops.
//!
//! One task per instrument. Each loop is
//! `WAITING -> EVALUATING -> (WAITING | RECOVERING -> WAITING)` and observes a
//! shared [`Shutdown`] at every sleep.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset};
use futures::FutureExt;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info};

use crate::{
    config::{InstrumentConfig, MonitorConfig},
    engine::SignalEngine,
    Granularity, Result,
};

/// Default pause between two timeframes of the same instrument.
pub const DEFAULT_TIMEFRAME_PAUSE: Duration = Duration::from_secs(1);
/// Default back-off after a failed cycle.
pub const DEFAULT_RECOVERY: Duration = Duration::from_secs(300);

// ============================================================
// BOUNDARIES
// ============================================================

/// Time until the next close of a `granularity` candle.
///
/// Boundaries are multiples of the period counted from the Unix epoch, which
/// is where the provider's intraday candles close. Exactly on a boundary the
/// full period is returned, so a candle that is still being finalised is never
/// read.
///
/// `H4` and `D` boundaries therefore fall on 00:00, 04:00, ... UTC. OANDA
/// aligns those candles to 17:00 New York instead, so an instrument whose
/// shortest timeframe is `H4` or `D` wakes between candle closes and reads the
/// last completed candle, not the one that just closed.
pub fn until_next_boundary(now: DateTime<FixedOffset>, granularity: Granularity) -> Duration {
    let period_ms = granularity.seconds() * 1000;
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let elapsed = millis % period_ms;
    Duration::from_millis(period_ms - elapsed)
}

// ============================================================
// SHUTDOWN
// ============================================================

/// Receiving side of the process-wide stop signal.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

/// Sending side of the stop signal.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is triggered. Never resolves if the trigger was
    /// dropped without firing.
    pub async fn wait(&mut self) {
        let triggered = self.0.wait_for(|stop| *stop).await.is_ok();
        if !triggered {
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================
// MONITOR
// ============================================================

/// Evaluation loop for one instrument.
#[derive(Debug)]
pub struct Monitor {
    instrument: InstrumentConfig,
    engine: Arc<SignalEngine>,
    timeframe_pause: Duration,
    recovery: Duration,
}

impl Monitor {
    pub fn new(instrument: InstrumentConfig, engine: Arc<SignalEngine>) -> Self {
        Self {
            instrument,
            engine,
            timeframe_pause: DEFAULT_TIMEFRAME_PAUSE,
            recovery: DEFAULT_RECOVERY,
        }
    }

    pub fn with_timeframe_pause(mut self, pause: Duration) -> Self {
        self.timeframe_pause = pause;
        self
    }

    pub fn with_recovery(mut self, recovery: Duration) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn instrument(&self) -> &str {
        &self.instrument.instrument
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, mut shutdown: Shutdown) {
        let instrument = self.instrument();
        let cadence = self.instrument.cadence();
        info!(
            instrument,
            %cadence,
            timeframes = ?self.instrument.timeframes,
            "monitor started"
        );

        loop {
            let wait = until_next_boundary(self.engine.clock().now(), cadence);
            debug!(instrument, wait_secs = wait.as_secs(), "waiting for candle close");
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let outcome = AssertUnwindSafe(self.run_cycle(&mut shutdown))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(sent)) => {
                    info!(instrument, sent, "cycle complete");
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            if let Some(reason) = failure {
                error!(
                    instrument,
                    %reason,
                    recovery_secs = self.recovery.as_secs(),
                    "cycle failed, backing off"
                );
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(self.recovery) => {}
                }
            }
        }

        info!(instrument, "monitor stopped");
    }

    /// One evaluation pass over every configured timeframe, in order.
    ///
    /// Returns the number of alerts sent. Stops early on shutdown, including in
    /// the middle of a timeframe's checks.
    pub async fn run_cycle(&self, shutdown: &mut Shutdown) -> Result<usize> {
        self.engine.dedup().sweep();

        let mut sent = 0;
        for (i, &timeframe) in self.instrument.timeframes.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = shutdown.wait() => return Ok(sent),
                    _ = tokio::time::sleep(self.timeframe_pause) => {}
                }
            }
            sent += self
                .engine
                .evaluate_until(self.instrument(), timeframe, &self.instrument.checks, shutdown)
                .await?
                .len();
        }
        Ok(sent)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic".to_string()
    }
}

/// Spawn one [`Monitor`] per configured instrument.
pub fn spawn_monitors(
    config: &MonitorConfig,
    engine: Arc<SignalEngine>,
    shutdown: &Shutdown,
) -> Vec<JoinHandle<()>> {
    config
        .instruments
        .iter()
        .cloned()
        .map(|instrument| {
            let monitor = Monitor::new(instrument, Arc::clone(&engine))
                .with_timeframe_pause(config.timeframe_pause())
                .with_recovery(config.recovery());
            tokio::spawn(monitor.run(shutdown.clone()))
        })
        .collect()
}

/// Log a liveness line every `every` until shutdown.
pub async fn heartbeat(every: Duration, mut shutdown: Shutdown) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(every) => info!("monitor alive"),
        }
    }
}
