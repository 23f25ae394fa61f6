//! End-to-end tests: engine, stores and monitor loops against in-memory
//! collaborators and a manual clock.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, FixedOffset};
use parking_lot::Mutex;
use pivotwatch::{
    dedup::DEFAULT_COOLDOWN,
    prelude::*,
    scheduler::{shutdown_channel, spawn_monitors},
};
use tokio::sync::mpsc;

// ============================================================
// FAKES
// ============================================================

/// Candles keyed by granularity; optionally panics for one instrument.
#[derive(Default)]
struct Book {
    candles: Mutex<HashMap<Granularity, Vec<Candle>>>,
    panic_on: Option<&'static str>,
}

impl Book {
    fn with(mut self, granularity: Granularity, candles: Vec<Candle>) -> Self {
        self.candles.get_mut().insert(granularity, candles);
        self
    }
}

#[async_trait]
impl CandleSource for Book {
    async fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        _count: usize,
    ) -> Result<Vec<Candle>> {
        if self.panic_on == Some(instrument) {
            panic!("provider exploded for {instrument}");
        }
        Ok(self.candles.lock().get(&granularity).cloned().unwrap_or_default())
    }
}

/// Rejects every request and reports when each one arrived.
struct Rejecting(mpsc::UnboundedSender<tokio::time::Instant>);

#[async_trait]
impl CandleSource for Rejecting {
    async fn candles(
        &self,
        instrument: &str,
        _granularity: Granularity,
        _count: usize,
    ) -> Result<Vec<Candle>> {
        let _ = self.0.send(tokio::time::Instant::now());
        Err(Error::InvalidConfig(format!("unknown instrument {instrument}")))
    }
}

/// Never answers.
#[derive(Default)]
struct Stalled {
    calls: AtomicUsize,
}

#[async_trait]
impl CandleSource for Stalled {
    async fn candles(
        &self,
        _instrument: &str,
        _granularity: Granularity,
        _count: usize,
    ) -> Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Wall clock that follows the tokio timer, so paused tests see time move.
struct TimerClock {
    start: DateTime<FixedOffset>,
    origin: tokio::time::Instant,
}

impl Clock for TimerClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.start + TimeDelta::from_std(self.origin.elapsed()).unwrap()
    }
}

struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl AlertSink for ChannelSink {
    async fn send(&self, text: &str) {
        let _ = self.0.send(text.to_string());
    }
}

struct Setup {
    clock: Arc<ManualClock>,
    engine: Arc<SignalEngine>,
    alerts: mpsc::UnboundedReceiver<String>,
}

fn build_engine(
    source: Arc<dyn CandleSource>,
    clock: Arc<dyn Clock>,
) -> (SignalEngine, mpsc::UnboundedReceiver<String>) {
    let (tx, alerts) = mpsc::unbounded_channel();
    let engine = SignalEngine::new(
        source,
        Arc::new(ChannelSink(tx)),
        Arc::new(AlertDeduplicator::new(DEFAULT_COOLDOWN, clock.clone())),
        Arc::new(BreakoutTracker::new(clock.clone())),
        clock,
    );
    (engine, alerts)
}

fn setup(book: Book, start: &str) -> Setup {
    let clock = Arc::new(ManualClock::new(DateTime::parse_from_rfc3339(start).unwrap()));
    let (engine, alerts) = build_engine(Arc::new(book), clock.clone());
    Setup {
        clock,
        engine: Arc::new(engine),
        alerts,
    }
}

/// Two completed days; the last has H=1.3000 L=1.1000 C=1.2600 so BC = 1.2000.
fn daily() -> Vec<Candle> {
    vec![
        Candle::closed(1.1900, 1.2100, 1.1800, 1.1850),
        Candle::closed(1.1500, 1.3000, 1.1000, 1.2600),
    ]
}

/// Ten M30 candles drifting down into BC, ending in a bullish engulfing that
/// closes 0.0010 above it.
fn window_ending_near_bc() -> Vec<Candle> {
    let mut candles: Vec<Candle> = (0..8)
        .map(|i| {
            let open = 1.2100 - i as f64 * 0.0010;
            Candle::closed(open, open + 0.0005, open - 0.0015, open - 0.0010)
        })
        .collect();
    candles.push(Candle::closed(1.2000, 1.2010, 1.1970, 1.1980));
    candles.push(Candle::closed(1.1975, 1.2020, 1.1970, 1.2010));
    candles
}

// ============================================================
// ENGINE
// ============================================================

#[tokio::test]
async fn test_cpr_alert_then_duplicate_suppressed() {
    let book = Book::default()
        .with(Granularity::D, daily())
        .with(Granularity::M30, window_ending_near_bc());
    let mut s = setup(book, "2024-03-04T10:30:00+00:00");

    let sent = s
        .engine
        .evaluate("EUR_USD", Granularity::M30, &[Check::CprEngulfing])
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title(), "BULLISH Engulfing near CPR BC");
    assert_eq!(sent[0].key().to_string(), "EUR_USD_M30_BULLISH_BC");

    let text = s.alerts.try_recv().unwrap();
    assert!(text.contains("<b>BULLISH Engulfing near CPR BC</b>"));
    assert!(text.contains("Pair: EUR_USD"));

    s.clock.advance(TimeDelta::minutes(5));
    let again = s
        .engine
        .evaluate("EUR_USD", Granularity::M30, &[Check::CprEngulfing])
        .await
        .unwrap();
    assert!(again.is_empty());
    assert!(s.alerts.try_recv().is_err());
}

#[tokio::test]
async fn test_incomplete_tail_candle_is_ignored() {
    let mut candles = window_ending_near_bc();
    candles.push(Candle {
        complete: false,
        ..Candle::closed(1.2010, 1.2015, 1.1990, 1.1995)
    });
    let book = Book::default()
        .with(Granularity::D, daily())
        .with(Granularity::M30, candles);
    let s = setup(book, "2024-03-04T10:30:00+00:00");

    let signal = s
        .engine
        .detect(Check::CprEngulfing, "EUR_USD", Granularity::M30)
        .await
        .unwrap();
    assert!(signal.is_some());
}

#[tokio::test]
async fn test_breakout_once_per_day_then_again_next_day() {
    let book = Book::default()
        .with(
            Granularity::D,
            vec![
                Candle::closed(1.0950, 1.1000, 1.0900, 1.0980),
                Candle::closed(1.0995, 1.1040, 1.0990, 1.1000),
            ],
        )
        .with(Granularity::M30, vec![Candle::closed(1.1050, 1.1090, 1.1045, 1.1080)]);
    let s = setup(book, "2024-03-04T10:30:00+00:00");
    let checks = [Check::BodyBreakout];

    let first = s.engine.evaluate("EUR_USD", Granularity::M30, &checks).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].title(), "EUR_USD Bullish Body Breakout");

    // Past the cooldown but still the same day
    s.clock.advance(TimeDelta::hours(2));
    let later = s.engine.evaluate("EUR_USD", Granularity::M30, &checks).await.unwrap();
    assert!(later.is_empty());

    s.clock.advance(TimeDelta::days(1));
    let next_day = s.engine.evaluate("EUR_USD", Granularity::M30, &checks).await.unwrap();
    assert_eq!(next_day.len(), 1);
    let state = s.engine.breakouts().state("EUR_USD").unwrap();
    assert_eq!(state.as_of, s.clock.today());
    assert!(state.fired_today);
}

// ============================================================
// MONITOR LOOPS
// ============================================================

fn engulfing_pair() -> Vec<Candle> {
    vec![
        Candle::closed(1.1060, 1.1070, 1.1030, 1.1040),
        Candle::closed(1.1035, 1.1080, 1.1030, 1.1075),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_monitor_waits_for_boundary_and_stops_on_shutdown() {
    let book = Book::default().with(Granularity::M30, engulfing_pair());
    let mut s = setup(book, "2024-03-04T10:17:30+00:00");
    let instrument = InstrumentConfig::new("EUR_USD", vec![Granularity::M30])
        .with_checks(vec![Check::Engulfing]);
    let monitor = Monitor::new(instrument, s.engine.clone());

    let (trigger, shutdown) = shutdown_channel();
    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(monitor.run(shutdown));

    let text = s.alerts.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(12 * 60 + 30));
    assert!(text.contains("<b>BULLISH Engulfing</b>"));

    trigger.trigger();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_instrument_does_not_stop_others() {
    let book = Book {
        panic_on: Some("XAU_USD"),
        ..Book::default()
    }
    .with(Granularity::M30, engulfing_pair());
    let mut s = setup(book, "2024-03-04T10:17:30+00:00");

    let config = MonitorConfig {
        instruments: vec![
            InstrumentConfig::new("XAU_USD", vec![Granularity::M30]),
            InstrumentConfig::new("EUR_USD", vec![Granularity::M30])
                .with_checks(vec![Check::Engulfing]),
        ],
        recovery_secs: 60,
        ..MonitorConfig::default()
    };

    let (trigger, shutdown) = shutdown_channel();
    let handles = spawn_monitors(&config, s.engine.clone(), &shutdown);

    let text = s.alerts.recv().await.unwrap();
    assert!(text.contains("Pair: EUR_USD"));

    trigger.trigger();
    for result in futures::future::join_all(handles).await {
        assert!(result.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_wait_exits_promptly() {
    let s = setup(Book::default(), "2024-03-04T10:00:00+00:00");
    let monitor = Monitor::new(InstrumentConfig::new("EUR_USD", vec![Granularity::H1]), s.engine);

    let (trigger, shutdown) = shutdown_channel();
    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(monitor.run(shutdown));

    tokio::time::sleep(Duration::from_secs(5)).await;
    trigger.trigger();
    handle.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycle_backs_off_then_realigns_to_boundary() {
    let (calls_tx, mut calls) = mpsc::unbounded_channel();
    let origin = tokio::time::Instant::now();
    let clock = Arc::new(TimerClock {
        start: DateTime::parse_from_rfc3339("2024-03-04T10:17:30+00:00").unwrap(),
        origin,
    });
    let (engine, _alerts) = build_engine(Arc::new(Rejecting(calls_tx)), clock);
    let recovery = Duration::from_secs(45 * 60);
    let instrument = InstrumentConfig::new("EUR_USD", vec![Granularity::M30])
        .with_checks(vec![Check::Engulfing]);
    let monitor = Monitor::new(instrument, Arc::new(engine)).with_recovery(recovery);

    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(monitor.run(shutdown));

    // First attempt on the 10:30 close
    let first = calls.recv().await.unwrap() - origin;
    assert!(first >= Duration::from_secs(750) && first < Duration::from_secs(751));

    // Nothing until the back-off has run out
    let early = tokio::time::timeout(recovery - Duration::from_secs(1), calls.recv()).await;
    assert!(early.is_err());

    // Back-off ends at 11:15, the retry waits for the 11:30 close
    let second = calls.recv().await.unwrap() - origin;
    assert!(second >= first + recovery);
    assert!(second >= Duration::from_secs(4350) && second < Duration::from_secs(4351));

    trigger.trigger();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_in_flight_check() {
    let source = Arc::new(Stalled::default());
    let clock = Arc::new(ManualClock::new(
        DateTime::parse_from_rfc3339("2024-03-04T10:30:00+00:00").unwrap(),
    ));
    let (engine, _alerts) = build_engine(source.clone(), clock);
    let engine = Arc::new(engine.with_io_timeout(Duration::from_secs(3600)));

    let (trigger, mut shutdown) = shutdown_channel();
    let started = tokio::time::Instant::now();
    let task = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .evaluate_until("EUR_USD", Granularity::M30, &Check::ALL, &mut shutdown)
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    trigger.trigger();
    let sent = task.await.unwrap().unwrap();

    assert!(sent.is_empty());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_triggered_shutdown_skips_all_checks() {
    let source = Arc::new(Stalled::default());
    let clock = Arc::new(ManualClock::new(
        DateTime::parse_from_rfc3339("2024-03-04T10:30:00+00:00").unwrap(),
    ));
    let (engine, _alerts) = build_engine(source.clone(), clock);

    let (trigger, mut shutdown) = shutdown_channel();
    trigger.trigger();
    let sent = engine
        .evaluate_until("EUR_USD", Granularity::M30, &Check::ALL, &mut shutdown)
        .await
        .unwrap();

    assert!(sent.is_empty());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}
