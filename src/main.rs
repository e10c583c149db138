//! CLI entry point for the GTFS-RT sync service.
//!
//! Runs the refresh loops for every configured feed, runs a single cycle for
//! one feed and dumps the snapshot, or decodes a feed for inspection.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gtfs_rt_sync::clock::{Clock, SystemClock};
use gtfs_rt_sync::config::{FeedSettings, SyncConfig};
use gtfs_rt_sync::decode::{FeedFormat, decoder_for};
use gtfs_rt_sync::engine::FeedEngine;
use gtfs_rt_sync::error::QueryError;
use gtfs_rt_sync::fetch::{BasicClient, FeedTransport, SourceTransport};
use gtfs_rt_sync::infra::directory::{DirectoryClient, PassthroughDirectory};
use gtfs_rt_sync::infra::keys::{EnvKeyStore, KeyStore};
use gtfs_rt_sync::metrics::FeedMetrics;
use gtfs_rt_sync::model::PayloadKind;
use gtfs_rt_sync::output::{append_snapshot, print_json, print_pretty};
use gtfs_rt_sync::query::QueryFilter;
use gtfs_rt_sync::services::directory_api::EnrichmentClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_sync")]
#[command(about = "Keeps an in-memory view of live GTFS-RT feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the refresh loop for every configured feed until Ctrl+C
    Run {
        /// JSON configuration file
        #[arg(short, long, default_value = "sync.json")]
        config: String,

        /// Seconds between per-feed status log lines
        #[arg(short, long, default_value_t = 60)]
        status_interval: u64,
    },
    /// Run one refresh cycle for a feed and optionally dump the snapshot
    Once {
        /// JSON configuration file
        #[arg(short, long, default_value = "sync.json")]
        config: String,

        /// Name of the feed to refresh
        #[arg(short, long)]
        feed: String,

        /// CSV file to append the resulting snapshot to
        #[arg(short, long)]
        output: Option<String>,

        /// Log the cycle report in debug format instead of JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Fetch and decode a feed from a file or URL and summarize it
    Inspect {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Feed wire format
        #[arg(short, long, value_enum, default_value_t = FeedFormat::GtfsRt)]
        format: FeedFormat,

        /// Payload to extract from each vehicle
        #[arg(short, long, value_enum, default_value_t = PayloadKind::Position)]
        payload: PayloadKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_sync.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_sync.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            status_interval,
        } => {
            let config = SyncConfig::load(&config)?;
            run_all_feeds(&config, status_interval).await?;
        }
        Commands::Once {
            config,
            feed,
            output,
            pretty,
        } => {
            let config = SyncConfig::load(&config)?;
            let settings = config
                .feed(&feed)
                .with_context(|| format!("no feed named '{feed}' in config"))?;
            let (engine, _) = build_engine(&config, settings, &EnvKeyStore).await?;
            engine.force_status(true);

            let report = engine.run_cycle().await;
            if pretty {
                print_pretty(&report);
            } else {
                print_json(&report)?;
            }

            if let Some(path) = output {
                match engine.get_current(&QueryFilter::new()) {
                    Ok(records) => {
                        let rows = append_snapshot(&path, engine.name(), &records)?;
                        info!(path, rows, "Snapshot written");
                    }
                    Err(QueryError::NoDataLoaded) => warn!("No data loaded, snapshot not written"),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Commands::Inspect {
            source,
            format,
            payload,
        } => {
            inspect(&source, format, payload).await?;
        }
    }

    Ok(())
}

/// Wires one feed's engine from configuration. Returns the metrics handle
/// alongside so callers can report on it.
async fn build_engine(
    config: &SyncConfig,
    feed: &FeedSettings,
    keys: &dyn KeyStore,
) -> Result<(FeedEngine, Arc<FeedMetrics>)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let feed_http = feed
        .auth
        .wrap(BasicClient::new(feed.timeout())?, keys)
        .await
        .with_context(|| format!("feed '{}': cannot set up authentication", feed.name))?;
    let transport = Arc::new(SourceTransport::new(feed_http));

    let directory: Arc<dyn EnrichmentClient> = match &config.directory {
        Some(dir) => {
            let timeout = Duration::from_secs(dir.timeout_secs);
            let dir_http = dir
                .auth
                .wrap(BasicClient::new(timeout)?, keys)
                .await
                .context("directory: cannot set up authentication")?;
            Arc::new(DirectoryClient::new(dir_http, &dir.base_url, timeout, clock.clone())?)
        }
        None => Arc::new(PassthroughDirectory::new(clock.clone())),
    };

    let correlation_ttl = config
        .directory
        .as_ref()
        .and_then(|d| d.correlation_ttl_secs)
        .map(Duration::from_secs);

    let metrics = Arc::new(FeedMetrics::default());
    let engine = FeedEngine::builder(
        feed.clone(),
        decoder_for(feed.format, feed.payload),
        transport,
        directory,
    )
    .timezone(config.timezone()?)
    .clock(clock)
    .observer(metrics.clone())
    .correlation_ttl(correlation_ttl)
    .build();

    Ok((engine, metrics))
}

/// Spawns one refresh loop per feed and logs their status until Ctrl+C.
#[tracing::instrument(skip(config), fields(feeds = config.feeds.len()))]
async fn run_all_feeds(config: &SyncConfig, status_interval: u64) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut engines = Vec::new();
    let mut tasks = Vec::new();

    for feed in &config.feeds {
        let (engine, metrics) = build_engine(config, feed, &EnvKeyStore).await?;
        let engine = Arc::new(engine);

        let feed_span = tracing::info_span!("feed_loop", feed = %feed.name);
        let task = {
            let engine = Arc::clone(&engine);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { engine.run(shutdown).await }.instrument(feed_span))
        };

        tasks.push(task);
        engines.push((engine, metrics));
    }

    info!(feed_count = engines.len(), "Refresh loops started. Press Ctrl+C to stop.");

    let mut status = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    status.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Cannot listen for Ctrl+C, shutting down");
                }
                break;
            }
            _ = status.tick() => {
                for (engine, metrics) in &engines {
                    let snapshot = metrics.snapshot();
                    info!(
                        feed = engine.name(),
                        enabled = engine.is_enabled(),
                        records = engine.store().len(),
                        correlations = engine.correlation().len(),
                        last_update = ?engine.last_update_timestamp(),
                        cycles = snapshot.cycles,
                        load_errors = snapshot.load_errors,
                        "Feed status"
                    );
                }
            }
        }
    }

    info!("Shutting down refresh loops");
    shutdown.cancel();
    join_feed_loops(tasks).await;

    Ok(())
}

/// Waits for every feed loop, logging any that panicked or were aborted.
/// Returns how many ended that way.
async fn join_feed_loops(tasks: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, panicked = e.is_panic(), "Feed loop ended abnormally");
            failed += 1;
        }
    }
    failed
}

/// Loads a feed from a local path or URL, decodes it and logs a summary.
#[tracing::instrument(fields(source = %source))]
async fn inspect(source: &str, format: FeedFormat, payload: PayloadKind) -> Result<()> {
    let timeout = Duration::from_secs(30);
    let transport = SourceTransport::new(BasicClient::new(Duration::from_secs(10))?);
    let bytes = transport.fetch(source, timeout).await?;
    let records = decoder_for(format, payload).decode(&bytes)?;

    let no_fix = records.iter().filter(|r| r.lacks_position()).count();
    let with_timestamp = records.iter().filter(|r| r.observed_at.is_some()).count();
    let with_hint = records.iter().filter(|r| r.stop_or_line_key.is_some()).count();
    let distinct_keys = records
        .iter()
        .map(|r| r.source_key.as_str())
        .collect::<HashSet<_>>()
        .len();

    info!(
        bytes = bytes.len(),
        records = records.len(),
        distinct_keys,
        no_fix,
        with_timestamp,
        with_hint,
        "Feed decoded"
    );
    Ok(())
}
