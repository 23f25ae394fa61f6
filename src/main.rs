use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use pivotwatch::{
    adapters::{LogSink, OandaSource, TelegramSink},
    breakout::BreakoutTracker,
    clock::{Clock, SystemClock},
    config::{MonitorConfig, Secrets},
    dedup::AlertDeduplicator,
    engine::SignalEngine,
    logging,
    scheduler::{heartbeat, shutdown_channel, spawn_monitors, Monitor},
    source::{AlertSink, CandleSource},
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Candle-close signal monitor", long_about = None)]
struct Args {
    /// JSON config file. Built-in defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Evaluate every instrument once, then exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if args.json_logs {
        logging::init_json_logging();
    } else {
        logging::init_logging();
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> pivotwatch::Result<()> {
    let config = match &args.config {
        Some(path) => MonitorConfig::from_path(path)?,
        None => MonitorConfig::default(),
    };
    let secrets = Secrets::from_env();
    info!(instruments = config.instruments.len(), ?secrets, "starting pivotwatch");
    if secrets.oanda_api_key.is_empty() {
        warn!("OANDA_API_KEY not set, candle requests will be rejected");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.offset()?));
    let source: Arc<dyn CandleSource> = Arc::new(OandaSource::new(
        &secrets.oanda_url,
        &secrets.oanda_api_key,
        config.io_timeout(),
    )?);
    let sink: Arc<dyn AlertSink> = match secrets.telegram() {
        Some((token, chat_id)) => Arc::new(TelegramSink::new(token, chat_id, config.io_timeout())?),
        None => {
            warn!("Telegram env not set, alerts are written to the log");
            Arc::new(LogSink)
        }
    };

    let dedup = Arc::new(AlertDeduplicator::new(config.cooldown(), Arc::clone(&clock)));
    let breakouts = Arc::new(BreakoutTracker::new(Arc::clone(&clock)));
    let engine = Arc::new(
        SignalEngine::new(source, sink, dedup, breakouts, clock)
            .with_params(config.detector_params())
            .with_io_timeout(config.io_timeout()),
    );

    let (trigger, shutdown) = shutdown_channel();

    if args.once {
        let mut shutdown = shutdown.clone();
        for instrument in &config.instruments {
            let monitor = Monitor::new(instrument.clone(), Arc::clone(&engine))
                .with_timeframe_pause(config.timeframe_pause());
            match monitor.run_cycle(&mut shutdown).await {
                Ok(sent) => info!(instrument = monitor.instrument(), sent, "evaluated"),
                Err(e) => warn!(instrument = monitor.instrument(), error = %e, "evaluation failed"),
            }
        }
        return Ok(());
    }

    let mut tasks = spawn_monitors(&config, engine, &shutdown);
    if let Some(every) = config.heartbeat() {
        tasks.push(tokio::spawn(heartbeat(every, shutdown.clone())));
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the monitors run until the process is killed.
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, stopping monitors");
    trigger.trigger();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "monitor task ended abnormally");
        }
    }
    info!("stopped");
    Ok(())
}
