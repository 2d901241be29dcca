//! Staleness Monitor Integration Tests
//!
//! End-to-end classification, outage recovery, supervised shutdown, and the
//! health endpoints, all against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use feed_monitor::application::ports::{Clock, HealthSink, ManualClock};
use feed_monitor::application::services::backoff::BackoffConfig;
use feed_monitor::infrastructure::health::{StatusState, status_routes};
use feed_monitor::infrastructure::memory::MemoryStore;
use feed_monitor::infrastructure::sink::StatusBoard;
use feed_monitor::{
    ChannelKey, ChannelKind, ChannelStatus, HealthEvent, MonitorConfig, MonitorState,
    MonitorSupervisor, StalenessMonitor, UpdateRecord,
};

const BOOK_SAMPLES: [f64; 5] = [100.0, 100.05, 100.11, 100.18, 100.25];

fn book_key() -> ChannelKey {
    ChannelKey::new("book", "BINANCE", "BTC-USDT")
}

fn trades_key() -> ChannelKey {
    ChannelKey::new("trades", "BINANCE", "BTC-USDT")
}

fn config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(10),
        reconnect: BackoffConfig {
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
            ..BackoffConfig::default()
        },
        ..MonitorConfig::default()
    }
}

fn seeded_store(last_trade: f64) -> MemoryStore {
    let store = MemoryStore::new();
    for ts in BOOK_SAMPLES {
        store.seed(
            &book_key(),
            &UpdateRecord::new("BINANCE", "BTC-USDT", ChannelKind::Continuous, ts, ts, "{}"),
        );
    }
    store.seed(
        &trades_key(),
        &UpdateRecord::new(
            "BINANCE",
            "BTC-USDT",
            ChannelKind::Discrete,
            last_trade,
            last_trade,
            "{}",
        ),
    );
    store
}

fn board() -> Arc<StatusBoard> {
    Arc::new(StatusBoard::new([book_key(), trades_key()]))
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<HealthEvent>>);

impl HealthSink for RecordingSink {
    fn emit(&self, event: &HealthEvent) {
        self.0.lock().push(event.clone());
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn classifies_each_channel_kind() {
    let store = seeded_store(100.25);
    let board = board();
    let clock = Arc::new(ManualClock::new(100.45));
    let cancel = CancellationToken::new();

    let monitor = StalenessMonitor::new(
        &config(),
        Arc::new(store),
        board.clone(),
        clock.clone(),
        cancel.clone(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_until("first verdicts", || board.all_evaluated()).await;
    assert_eq!(board.status_of(&book_key()), Some(ChannelStatus::Healthy));
    assert_eq!(board.status_of(&trades_key()), Some(ChannelStatus::Healthy));

    // Ten seconds after the last trade is still healthy; past that it is stale.
    clock.set(110.25);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(board.status_of(&trades_key()), Some(ChannelStatus::Healthy));

    clock.set(111.0);
    wait_until("trades to go stale", || {
        board.status_of(&trades_key()) == Some(ChannelStatus::Stale)
    })
    .await;
    assert_eq!(board.status_of(&book_key()), Some(ChannelStatus::Stale));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn empty_series_reports_insufficient_data() {
    let board = board();
    let cancel = CancellationToken::new();

    let monitor = StalenessMonitor::new(
        &config(),
        Arc::new(MemoryStore::new()),
        board.clone(),
        Arc::new(ManualClock::new(100.0)),
        cancel.clone(),
    );
    let stats = monitor.stats();
    let handle = tokio::spawn(monitor.run());

    wait_until("first pass", || stats.snapshot().passes_completed >= 1).await;
    assert_eq!(board.count(ChannelStatus::InsufficientData), 2);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn resumes_polling_after_store_outage() {
    let store = seeded_store(100.25);
    let cancel = CancellationToken::new();

    let monitor = StalenessMonitor::new(
        &config(),
        Arc::new(store.clone()),
        board(),
        Arc::new(ManualClock::new(100.45)),
        cancel.clone(),
    );
    let stats = monitor.stats();
    let handle = tokio::spawn(monitor.run());

    wait_until("first pass", || stats.snapshot().passes_completed >= 1).await;

    store.set_offline(true);
    wait_until("connection failures", || {
        stats.snapshot().connection_failures >= 2
    })
    .await;
    assert_eq!(stats.state(), MonitorState::Connecting);
    let passes_during_outage = stats.snapshot().passes_completed;

    store.set_offline(false);
    wait_until("reconnect", || stats.snapshot().reconnects >= 1).await;
    wait_until("polling to resume", || {
        stats.snapshot().passes_completed > passes_during_outage
    })
    .await;

    cancel.cancel();
    handle.await.unwrap();
    assert_eq!(stats.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn read_failure_mid_pass_resumes_at_failed_channel() {
    let store = seeded_store(100.25);
    store.fail_read_after(1);
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(ManualClock::new(100.45));
    let cancel = CancellationToken::new();

    let monitor = StalenessMonitor::new(
        &MonitorConfig {
            poll_interval: Duration::from_secs(60),
            ..config()
        },
        Arc::new(store),
        sink.clone(),
        clock.clone(),
        cancel.clone(),
    );
    let stats = monitor.stats();
    let handle = tokio::spawn(monitor.run());

    wait_until("pass to complete", || stats.snapshot().passes_completed >= 1).await;

    let keys: Vec<String> = sink.0.lock().iter().map(|e| e.channel_key.to_string()).collect();
    assert_eq!(keys, vec![book_key().to_string(), trades_key().to_string()]);
    assert!(sink.0.lock().iter().all(|e| e.evaluated_at == clock.now_utc()));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.passes_completed, 1);
    assert_eq!(snapshot.evaluations, 2);
    assert_eq!(snapshot.reconnects, 1);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn health_endpoints_follow_supervised_monitor() {
    let store = seeded_store(50.0);
    let board = board();
    let mut supervisor = MonitorSupervisor::new(Duration::from_secs(2));

    let monitor = supervisor.spawn_monitor(
        &config(),
        Arc::new(store),
        board.clone(),
        Arc::new(ManualClock::new(100.45)),
    );
    let app = status_routes(Arc::new(StatusState::new(
        "test".to_string(),
        board.clone(),
        Arc::clone(&monitor.stats),
    )));

    wait_until("every channel evaluated", || board.all_evaluated()).await;

    let response = app
        .clone()
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["channels"].as_array().unwrap().len(), 2);

    supervisor.shutdown().await.unwrap();
    assert_eq!(monitor.stats.state(), MonitorState::Stopped);

    let response = app
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
