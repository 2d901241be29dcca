//! Staleness Monitor
//!
//! Polls the most recent entries of every configured channel and classifies
//! each one with its channel kind's policy.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────────── store error ────────────┐
//!            ▼                                      │
//! CONNECTING ──► POLLING ──► EVALUATING ──► SLEEPING ──► POLLING ...
//!      │                                                  │
//!      └──────────────── shutdown ──► STOPPED ◄───────────┘
//! ```
//!
//! Channels are evaluated one after another within a pass. A pass cut short
//! by a store error resumes at the failed channel after reconnecting, so no
//! channel is evaluated twice in one pass. Every suspension point (connect,
//! read, sleep) also waits on the cancellation token.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use crate::application::ports::{
    Clock, HealthSink, OrderedStore, StoreConnector, StoreError, utc_from_secs,
};
use crate::domain::record::{ChannelKey, ChannelNames};
use crate::domain::staleness::{
    ChannelStatus, ContinuousPolicy, DiscretePolicy, EvaluationDetail, HealthEvent,
    MonitoredChannel,
};
use crate::infrastructure::metrics;
use crate::{MonitorSettings, ReconnectSettings};

// =============================================================================
// Configuration
// =============================================================================

/// Monitor behaviour.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Exchange whose channels are watched.
    pub exchange: String,
    /// Symbols to watch; each gets one continuous and one discrete channel.
    pub symbols: Vec<String>,
    /// Series name prefixes.
    pub names: ChannelNames,
    /// Samples per continuous evaluation.
    pub sample_window: usize,
    /// Continuous threshold, seconds.
    pub mean_interval_threshold_secs: f64,
    /// Discrete threshold, seconds.
    pub age_threshold_secs: f64,
    /// Pause between passes.
    pub poll_interval: Duration,
    /// Reconnect schedule.
    pub reconnect: BackoffConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            exchange: "BINANCE".to_string(),
            symbols: vec!["BTC-USDT".to_string()],
            names: ChannelNames::default(),
            sample_window: 5,
            mean_interval_threshold_secs: 0.2,
            age_threshold_secs: 10.0,
            poll_interval: Duration::from_secs(2),
            reconnect: BackoffConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Build from configured settings.
    #[must_use]
    pub fn from_settings(monitor: &MonitorSettings, reconnect: &ReconnectSettings) -> Self {
        Self {
            exchange: monitor.exchange.clone(),
            symbols: monitor.symbols.clone(),
            names: ChannelNames::new(&monitor.continuous_channel, &monitor.discrete_channel),
            sample_window: monitor.sample_window,
            mean_interval_threshold_secs: monitor.mean_interval_threshold_secs,
            age_threshold_secs: monitor.age_threshold_secs,
            poll_interval: monitor.poll_interval,
            reconnect: BackoffConfig::from_settings(reconnect),
        }
    }

    /// Channels in evaluation order: per symbol, continuous then discrete.
    #[must_use]
    pub fn channels(&self) -> Vec<MonitoredChannel> {
        let continuous = Arc::new(ContinuousPolicy::new(
            self.sample_window,
            self.mean_interval_threshold_secs,
        ));
        let discrete = Arc::new(DiscretePolicy::new(self.age_threshold_secs));

        self.symbols
            .iter()
            .flat_map(|symbol| {
                [
                    MonitoredChannel::new(
                        ChannelKey::new(&self.names.continuous, &self.exchange, symbol),
                        continuous.clone(),
                    ),
                    MonitoredChannel::new(
                        ChannelKey::new(&self.names.discrete, &self.exchange, symbol),
                        discrete.clone(),
                    ),
                ]
            })
            .collect()
    }
}

// =============================================================================
// State and Statistics
// =============================================================================

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    /// Establishing a store connection.
    Connecting,
    /// Reading recent entries.
    Polling,
    /// Classifying a channel.
    Evaluating,
    /// Waiting for the next pass.
    Sleeping,
    /// Shut down.
    Stopped,
}

impl MonitorState {
    /// Whether a store handle is held.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Polling | Self::Evaluating | Self::Sleeping)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "CONNECTING",
            Self::Polling => "POLLING",
            Self::Evaluating => "EVALUATING",
            Self::Sleeping => "SLEEPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// Monitor counters and current state.
#[derive(Debug)]
pub struct MonitorStats {
    state: RwLock<MonitorState>,
    passes_completed: AtomicU64,
    evaluations: AtomicU64,
    stale: AtomicU64,
    insufficient: AtomicU64,
    malformed_skipped: AtomicU64,
    connection_failures: AtomicU64,
    reconnects: AtomicU64,
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self {
            state: RwLock::new(MonitorState::Connecting),
            passes_completed: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            insufficient: AtomicU64::new(0),
            malformed_skipped: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStatsSnapshot {
    /// Current state.
    pub state: MonitorState,
    /// Passes that evaluated every channel.
    pub passes_completed: u64,
    /// Health events emitted.
    pub evaluations: u64,
    /// Events with status stale.
    pub stale: u64,
    /// Events with status insufficient-data.
    pub insufficient: u64,
    /// Stored entries skipped as malformed.
    pub malformed_skipped: u64,
    /// Failed connection attempts.
    pub connection_failures: u64,
    /// Connections re-established after a loss.
    pub reconnects: u64,
}

impl MonitorStats {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.write() = state;
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> MonitorStatsSnapshot {
        MonitorStatsSnapshot {
            state: self.state(),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            insufficient: self.insufficient.load(Ordering::Relaxed),
            malformed_skipped: self.malformed_skipped.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

enum PassError {
    Cancelled,
    Store(StoreError),
}

/// Staleness monitor task.
pub struct StalenessMonitor {
    channels: Vec<MonitoredChannel>,
    poll_interval: Duration,
    reconnect: BackoffConfig,
    connector: Arc<dyn StoreConnector>,
    sink: Arc<dyn HealthSink>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    stats: Arc<MonitorStats>,
}

impl StalenessMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        config: &MonitorConfig,
        connector: Arc<dyn StoreConnector>,
        sink: Arc<dyn HealthSink>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channels: config.channels(),
            poll_interval: config.poll_interval,
            reconnect: config.reconnect.clone(),
            connector,
            sink,
            clock,
            cancel,
            stats: Arc::new(MonitorStats::default()),
        }
    }

    /// Shared counters, readable while the monitor runs.
    #[must_use]
    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    /// Keys of the watched channels, in evaluation order.
    #[must_use]
    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        self.channels.iter().map(|c| c.key.clone()).collect()
    }

    /// Run until cancelled.
    pub async fn run(self) {
        tracing::info!(
            endpoint = %self.connector.endpoint(),
            channels = self.channels.len(),
            poll_interval_ms = self.poll_interval.as_millis(),
            "Staleness monitor started"
        );

        let mut backoff = Backoff::new(self.reconnect.clone());
        let mut store: Option<Arc<dyn OrderedStore>> = None;
        let mut connected_before = false;
        let mut next_channel = 0;
        let mut state = MonitorState::Connecting;

        loop {
            self.enter(state);
            state = match state {
                MonitorState::Connecting => match self.connect(&mut backoff).await {
                    Some(handle) => {
                        if connected_before {
                            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                        }
                        connected_before = true;
                        store = Some(handle);
                        MonitorState::Polling
                    }
                    None => MonitorState::Stopped,
                },
                MonitorState::Polling | MonitorState::Evaluating => {
                    let Some(handle) = store.clone() else {
                        state = MonitorState::Connecting;
                        continue;
                    };
                    match self.poll_pass(handle.as_ref(), &mut next_channel).await {
                        Ok(()) => {
                            self.stats.passes_completed.fetch_add(1, Ordering::Relaxed);
                            MonitorState::Sleeping
                        }
                        Err(PassError::Cancelled) => MonitorState::Stopped,
                        Err(PassError::Store(error)) => {
                            tracing::warn!(
                                error = %error,
                                resume_at = next_channel,
                                "Store error during poll, reconnecting"
                            );
                            store = None;
                            metrics::set_monitor_connected(false);
                            MonitorState::Connecting
                        }
                    }
                }
                MonitorState::Sleeping => {
                    tokio::select! {
                        () = self.cancel.cancelled() => MonitorState::Stopped,
                        () = tokio::time::sleep(self.poll_interval) => MonitorState::Polling,
                    }
                }
                MonitorState::Stopped => break,
            };
        }

        drop(store);
        metrics::set_monitor_connected(false);
        let stats = self.stats.snapshot();
        tracing::info!(
            passes = stats.passes_completed,
            evaluations = stats.evaluations,
            reconnects = stats.reconnects,
            "Staleness monitor stopped, store connection released"
        );
    }

    fn enter(&self, state: MonitorState) {
        self.stats.set_state(state);
        tracing::trace!(state = %state, "Monitor state");
    }

    /// Connect with backoff. `None` means shutdown was requested.
    async fn connect(&self, backoff: &mut Backoff) -> Option<Arc<dyn OrderedStore>> {
        loop {
            let attempt = tokio::select! {
                () = self.cancel.cancelled() => return None,
                attempt = self.connector.connect() => attempt,
            };

            match attempt {
                Ok(handle) => {
                    backoff.reset();
                    metrics::set_monitor_connected(true);
                    tracing::info!(endpoint = %self.connector.endpoint(), "Store connected");
                    return Some(handle);
                }
                Err(error) => {
                    self.stats
                        .connection_failures
                        .fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect_attempt();
                    let delay = backoff.next_delay_or_max();
                    tracing::warn!(
                        endpoint = %self.connector.endpoint(),
                        attempt = backoff.attempts(),
                        retry_in_ms = delay.as_millis(),
                        error = %error,
                        "Store connection failed"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Read and evaluate each channel from `*next` to the end of the list.
    ///
    /// `*next` advances past every completed evaluation and wraps to zero
    /// once the pass finishes; on error it names the channel to retry.
    async fn poll_pass(
        &self,
        store: &dyn OrderedStore,
        next: &mut usize,
    ) -> Result<(), PassError> {
        while let Some(channel) = self.channels.get(*next) {
            self.enter(MonitorState::Polling);
            let window = tokio::select! {
                () = self.cancel.cancelled() => return Err(PassError::Cancelled),
                window = store.read_recent(&channel.key, channel.policy.window()) => {
                    window.map_err(PassError::Store)?
                }
            };

            self.enter(MonitorState::Evaluating);
            if window.malformed > 0 {
                self.stats
                    .malformed_skipped
                    .fetch_add(window.malformed as u64, Ordering::Relaxed);
                metrics::record_malformed(window.malformed as u64);
                tracing::warn!(
                    channel_key = %channel.key,
                    malformed = window.malformed,
                    "Skipped malformed series entries"
                );
            }

            let now = self.clock.now_secs();
            let evaluation = channel.policy.evaluate(&window.scores(), now);
            let event = HealthEvent {
                channel_key: channel.key.clone(),
                kind: channel.policy.kind(),
                status: evaluation.status,
                detail: evaluation.detail,
                evaluated_at: utc_from_secs(now),
            };
            self.record(&event);
            self.sink.emit(&event);
            *next += 1;
        }
        *next = 0;
        Ok(())
    }

    fn record(&self, event: &HealthEvent) {
        self.stats.evaluations.fetch_add(1, Ordering::Relaxed);
        match event.status {
            ChannelStatus::Stale => {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
            }
            ChannelStatus::InsufficientData => {
                self.stats.insufficient.fetch_add(1, Ordering::Relaxed);
            }
            ChannelStatus::Healthy => {}
        }

        metrics::record_evaluation(event.kind, event.status);
        match event.detail {
            EvaluationDetail::MeanInterval { mean_secs, .. } => {
                metrics::record_mean_interval(mean_secs);
            }
            EvaluationDetail::Age { age_secs, .. } => metrics::record_update_age(age_secs),
            EvaluationDetail::Insufficient { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{ManualClock, MockHealthSink};
    use crate::domain::record::{ChannelKind, UpdateRecord};
    use crate::infrastructure::memory::MemoryStore;

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(20),
            reconnect: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..BackoffConfig::default()
            },
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn channels_pair_each_symbol() {
        let config = MonitorConfig {
            symbols: vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()],
            ..MonitorConfig::default()
        };
        let keys: Vec<String> = config
            .channels()
            .iter()
            .map(|c| c.key.to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "book-BINANCE-BTC-USDT",
                "trades-BINANCE-BTC-USDT",
                "book-BINANCE-ETH-USDT",
                "trades-BINANCE-ETH-USDT",
            ]
        );
        assert_eq!(config.channels()[0].policy.window(), 5);
        assert_eq!(config.channels()[1].policy.window(), 1);
    }

    #[test]
    fn connected_states() {
        assert!(!MonitorState::Connecting.is_connected());
        assert!(MonitorState::Polling.is_connected());
        assert!(MonitorState::Sleeping.is_connected());
        assert!(!MonitorState::Stopped.is_connected());
        assert_eq!(MonitorState::Evaluating.to_string(), "EVALUATING");
    }

    #[tokio::test]
    async fn pass_emits_one_event_per_channel() {
        let store = MemoryStore::new();
        for ts in [100.0, 100.05, 100.11, 100.18, 100.25] {
            let record =
                UpdateRecord::new("BINANCE", "BTC-USDT", ChannelKind::Continuous, ts, ts, "{}");
            store.seed(&ChannelKey::new("book", "BINANCE", "BTC-USDT"), &record);
        }

        let mut sink = MockHealthSink::new();
        sink.expect_emit()
            .withf(|e| e.kind == ChannelKind::Continuous && e.status == ChannelStatus::Healthy)
            .times(1)
            .return_const(());
        sink.expect_emit()
            .withf(|e| {
                e.kind == ChannelKind::Discrete && e.status == ChannelStatus::InsufficientData
            })
            .times(1)
            .return_const(());

        let monitor = StalenessMonitor::new(
            &config(),
            Arc::new(store.clone()),
            Arc::new(sink),
            Arc::new(ManualClock::new(100.45)),
            CancellationToken::new(),
        );

        let handle: Arc<dyn OrderedStore> = Arc::new(store);
        let mut next = 0;
        assert!(monitor.poll_pass(handle.as_ref(), &mut next).await.is_ok());
        assert_eq!(next, 0);

        let stats = monitor.stats().snapshot();
        assert_eq!(stats.evaluations, 2);
        assert_eq!(stats.insufficient, 1);
        assert_eq!(stats.stale, 0);
    }

    #[tokio::test]
    async fn cancelled_monitor_stops_while_connecting() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let cancel = CancellationToken::new();

        let monitor = StalenessMonitor::new(
            &config(),
            Arc::new(store),
            Arc::new(crate::application::ports::NoOpHealthSink),
            Arc::new(ManualClock::new(0.0)),
            cancel.clone(),
        );
        let stats = monitor.stats();
        let handle = tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(stats.state(), MonitorState::Connecting);
        assert!(stats.snapshot().connection_failures >= 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should stop promptly")
            .expect("monitor task should not panic");
        assert_eq!(stats.state(), MonitorState::Stopped);
    }
}
