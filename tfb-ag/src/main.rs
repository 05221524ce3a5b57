//! tfb-ag - Talk Feedback aggregator
//!
//! Runs on the voting unit in one room: captures votes, logs every one to
//! the per-day CSV log and keeps the event spreadsheet's tallies current.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tfb_ag::capture::{read_votes, simulate, VoteCapture, SIMULATED_VOTE_PERIOD};
use tfb_ag::sheet_client::SheetClient;
use tfb_ag::{vote_channel, AggregatorConfig, FeedbackAggregator, MemorySheet, TallySink};
use tfb_common::cache::{load_schedule, LoadedSchedule, ScheduleCache};
use tfb_common::config::{resolve_config_path, LoggingConfig, TomlConfig};
use tfb_common::time::{Clock, SystemClock};
use tfb_common::vote_log::VoteLog;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for tfb-ag
#[derive(Parser, Debug)]
#[command(name = "tfb-ag")]
#[command(about = "Talk feedback vote aggregator")]
#[command(version)]
struct Args {
    /// Config file (default: $TFB_CONFIG, then the user and system config dirs)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Room to collect votes for (overrides room_id)
    #[arg(short, long, env = "TFB_ROOM")]
    room: Option<String>,

    /// Generate random votes instead of reading stdin
    #[arg(long)]
    simulate: bool,

    /// Directory for vote logs and schedule caches (overrides data_dir)
    #[arg(short, long, env = "TFB_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging)?;

    info!(
        "Starting Talk Feedback aggregator (tfb-ag) v{} [{}] built {}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(config));
    // A pending stdin read cannot be cancelled; don't wait for it
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Err(e) = &result {
        error!("tfb-ag failed: {:#}", e);
    }
    result
}

/// Resolve, load and validate the config, applying command-line overrides
fn load_config(args: &Args) -> Result<TomlConfig> {
    let path = resolve_config_path(args.config.as_deref())?;
    let mut config = TomlConfig::load(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;

    if let Some(room) = &args.room {
        config.room_id = room.clone();
    }
    if args.simulate {
        config.simulate_voting = true;
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn run(config: TomlConfig) -> Result<()> {
    let data_dir = config.data_dir();
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
    info!("Room: {}", config.room_id);
    info!("Data directory: {}", data_dir.display());

    let cache = ScheduleCache::new(&data_dir);
    let loaded = load_schedule(
        &config.schedule_source_path(),
        &cache,
        &config.room_id,
        &config.timing,
    );
    match &loaded {
        LoadedSchedule::Fresh(schedule) => info!("✓ Schedule ready ({} talks)", schedule.len()),
        LoadedSchedule::Cached { schedule, reason } => warn!(
            "Running on cached schedule ({} talks); source rejected: {}",
            schedule.len(),
            reason
        ),
        LoadedSchedule::Unavailable { reason, .. } => {
            error!("No schedule available ({}); votes will not be attributed", reason)
        }
    }
    let schedule = Arc::new(loaded.into_schedule());

    let sink: Arc<dyn TallySink> = match &config.sheet.base_url {
        Some(base_url) => {
            let client = SheetClient::new(&config.sheet, config.worksheet())
                .context("Failed to create sheet client")?;
            info!("Publishing to worksheet '{}' via {}", client.worksheet(), base_url);
            Arc::new(client)
        }
        None => {
            warn!("No sheet base_url configured; tallies are kept in memory only");
            Arc::new(MemorySheet::with_talks(schedule.talk_ids()))
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (sender, receiver) = vote_channel(config.channel_capacity);
    let cancel = CancellationToken::new();

    let capture = VoteCapture::new(sender, Arc::clone(&clock), config.room_id.clone());
    let capture_task = if config.simulate_voting {
        tokio::spawn(simulate(capture, SIMULATED_VOTE_PERIOD, cancel.clone()))
    } else {
        info!("Reading votes from stdin (p = positive, n = negative, u = neutral)");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        tokio::spawn(read_votes(capture, stdin, cancel.clone()))
    };

    let mut aggregator = FeedbackAggregator::new(
        schedule,
        VoteLog::new(&data_dir),
        sink,
        receiver,
        clock,
        AggregatorConfig::from_toml(&config),
    );
    let aggregator_cancel = cancel.clone();
    let aggregator_task = tokio::spawn(async move {
        aggregator.run(aggregator_cancel).await;
    });

    shutdown_signal().await;
    cancel.cancel();

    aggregator_task
        .await
        .context("Aggregator task ended abnormally")?;
    if capture_task.is_finished() {
        if let Ok(cast) = capture_task.await {
            info!("Capture stopped after {} votes", cast);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
