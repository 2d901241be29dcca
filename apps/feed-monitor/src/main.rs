//! Feed Monitor Binary
//!
//! Starts the staleness monitor and its health server. With
//! `FEED_MONITOR_INGEST_STDIN=true` it also writes newline-delimited JSON
//! records from stdin into the store.
//!
//! # Usage
//!
//! ```bash
//! FEED_MONITOR_REDIS_HOST=127.0.0.1 cargo run --bin feed-monitor
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_MONITOR_REDIS_HOST`: Redis host, or socket path for the unix transport
//!
//! ## Optional
//! - `FEED_MONITOR_REDIS_PORT`: Redis port (default: 6379)
//! - `FEED_MONITOR_REDIS_TRANSPORT`: tcp | tls | unix (default: tcp)
//! - `FEED_MONITOR_SYMBOLS`: Comma-separated symbols (default: BTC-USDT)
//! - `FEED_MONITOR_EXCHANGE`: Exchange in series keys (default: BINANCE)
//! - `FEED_MONITOR_POLL_INTERVAL_SECS`: Seconds between passes (default: 2)
//! - `FEED_MONITOR_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `FEED_MONITOR_SHUTDOWN_GRACE_SECS`: Shutdown grace period (default: 5)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `feed_monitor=info`)

use std::sync::Arc;

use feed_monitor::application::ports::FanoutSink;
use feed_monitor::infrastructure::health::{StatusServer, StatusState};
use feed_monitor::infrastructure::ingest;
use feed_monitor::infrastructure::redis::RedisConnector;
use feed_monitor::infrastructure::sink::{StatusBoard, TracingHealthSink};
use feed_monitor::infrastructure::telemetry;
use feed_monitor::{
    FeedMonitorConfig, MonitorConfig, MonitorSupervisor, StoreConnector, SystemClock,
    WriterConfig, init_metrics,
};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_crypto_provider();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting feed monitor");

    let _metrics_handle = init_metrics();

    let config = FeedMonitorConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    log_config(&config);

    let connector: Arc<dyn StoreConnector> = Arc::new(RedisConnector::new(config.redis.clone())?);

    let monitor_config = MonitorConfig::from_settings(&config.monitor, &config.reconnect);
    let board = Arc::new(StatusBoard::new(
        monitor_config.channels().into_iter().map(|channel| channel.key),
    ));
    let sink = FanoutSink::new()
        .with(Arc::new(TracingHealthSink))
        .with(board.clone());

    let mut supervisor = MonitorSupervisor::new(config.server.shutdown_grace);
    let monitor = supervisor.spawn_monitor(
        &monitor_config,
        Arc::clone(&connector),
        Arc::new(sink),
        Arc::new(SystemClock),
    );
    tracing::info!(monitor_id = %monitor.id, channels = monitor.channels.len(), "Monitor spawned");

    let mut status_state = StatusState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&board),
        Arc::clone(&monitor.stats),
    );

    if config.server.ingest_stdin {
        let writer = supervisor.spawn_writer(
            WriterConfig::from_settings(&config.writer, &config.reconnect),
            monitor_config.names.clone(),
            Arc::clone(&connector),
            config.writer.queue_capacity,
        );
        status_state = status_state.with_writer(Arc::clone(&writer.stats));

        let queue = Arc::clone(&writer.queue);
        let cancel = supervisor.cancel_token();
        tokio::spawn(async move {
            let report = ingest::ingest_stdin(&queue, &cancel).await;
            tracing::info!(
                accepted = report.accepted,
                displaced = report.displaced,
                rejected = report.rejected,
                "Stdin ingest finished"
            );
        });
        tracing::info!(writer_id = %writer.id, "Writer spawned, reading records from stdin");
    }

    if config.server.health_port > 0 {
        let status_server = StatusServer::new(
            config.server.health_port,
            Arc::new(status_state),
            supervisor.cancel_token(),
        );
        tokio::spawn(async move {
            if let Err(e) = status_server.serve().await {
                tracing::error!(error = %e, "Status endpoint error");
            }
        });
    }

    tracing::info!("Feed monitor ready");

    await_shutdown().await;

    tracing::info!(
        grace_secs = config.server.shutdown_grace.as_secs_f64(),
        "Graceful shutdown started"
    );
    supervisor.shutdown().await?;

    tracing::info!("Feed monitor stopped");
    Ok(())
}

/// The TLS transport needs a process-wide rustls provider before any
/// connection is opened.
#[allow(clippy::expect_used)]
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("no other rustls provider is installed at startup");
    }
}

/// Use the first `.env` found walking up from the working directory.
fn load_dotenv() {
    let found = std::env::current_dir().ok().and_then(|cwd| {
        cwd.ancestors()
            .map(|dir| dir.join(".env"))
            .find(|candidate| candidate.is_file())
    });
    if let Some(path) = found {
        let _ = dotenvy::from_path(&path);
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedMonitorConfig) {
    tracing::info!(
        transport = config.redis.transport.as_str(),
        exchange = %config.monitor.exchange,
        symbols = ?config.monitor.symbols,
        sample_window = config.monitor.sample_window,
        mean_interval_threshold_secs = config.monitor.mean_interval_threshold_secs,
        age_threshold_secs = config.monitor.age_threshold_secs,
        poll_interval_secs = config.monitor.poll_interval.as_secs_f64(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        host = %config.redis.host,
        port = config.redis.port,
        decode_as_text = config.redis.decode_as_text,
        "Store endpoint"
    );
}

/// Resolve on the first of SIGINT or SIGTERM.
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler can be installed at startup");
        tokio::select! {
            result = signal::ctrl_c() => {
                result.expect("SIGINT handler can be installed at startup");
                tracing::info!(signal = "SIGINT", "Shutdown requested");
            }
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "Shutdown requested");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .expect("Ctrl+C handler can be installed at startup");
        tracing::info!(signal = "Ctrl+C", "Shutdown requested");
    }
}
