//! Health Sink Adapters
//!
//! - [`TracingHealthSink`]: writes each verdict as a structured log line
//! - [`StatusBoard`]: keeps the latest verdict per channel for the health
//!   endpoint

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::application::ports::HealthSink;
use crate::domain::record::ChannelKey;
use crate::domain::staleness::{ChannelStatus, HealthEvent};

// =============================================================================
// Tracing Sink
// =============================================================================

/// Logs every evaluation. Healthy channels log at `info`, anything else at
/// `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHealthSink;

impl HealthSink for TracingHealthSink {
    fn emit(&self, event: &HealthEvent) {
        let detail = event.detail.to_string();
        match event.status {
            ChannelStatus::Healthy => tracing::info!(
                channel_key = %event.channel_key,
                kind = event.kind.as_str(),
                status = event.status.as_str(),
                detail = %detail,
                "Channel healthy"
            ),
            ChannelStatus::Stale => tracing::warn!(
                channel_key = %event.channel_key,
                kind = event.kind.as_str(),
                status = event.status.as_str(),
                detail = %detail,
                "Channel stale"
            ),
            ChannelStatus::InsufficientData => tracing::warn!(
                channel_key = %event.channel_key,
                kind = event.kind.as_str(),
                status = event.status.as_str(),
                detail = %detail,
                "Channel has insufficient data"
            ),
        }
    }
}

// =============================================================================
// Status Board
// =============================================================================

/// Latest verdict per watched channel.
#[derive(Debug, Default)]
pub struct StatusBoard {
    channels: RwLock<BTreeMap<ChannelKey, Option<HealthEvent>>>,
}

/// One row of [`StatusBoard::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    /// Series key.
    pub channel_key: ChannelKey,
    /// Latest verdict, absent until the first evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<HealthEvent>,
}

impl StatusBoard {
    /// Create a board expecting verdicts for `keys`.
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = ChannelKey>) -> Self {
        Self {
            channels: RwLock::new(keys.into_iter().map(|key| (key, None)).collect()),
        }
    }

    /// Whether every expected channel has been evaluated at least once.
    #[must_use]
    pub fn all_evaluated(&self) -> bool {
        self.channels.read().values().all(Option::is_some)
    }

    /// Number of channels whose latest verdict is `status`.
    #[must_use]
    pub fn count(&self, status: ChannelStatus) -> usize {
        self.channels
            .read()
            .values()
            .flatten()
            .filter(|event| event.status == status)
            .count()
    }

    /// Latest status of one channel.
    #[must_use]
    pub fn status_of(&self, key: &ChannelKey) -> Option<ChannelStatus> {
        self.channels
            .read()
            .get(key)
            .and_then(|latest| latest.as_ref().map(|event| event.status))
    }

    /// Row for the channel whose key is `key`, if it is watched.
    #[must_use]
    pub fn report_for(&self, key: &str) -> Option<ChannelReport> {
        self.channels
            .read()
            .iter()
            .find(|(channel_key, _)| channel_key.as_str() == key)
            .map(|(channel_key, latest)| ChannelReport {
                channel_key: channel_key.clone(),
                latest: latest.clone(),
            })
    }

    /// All channels in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChannelReport> {
        self.channels
            .read()
            .iter()
            .map(|(key, latest)| ChannelReport {
                channel_key: key.clone(),
                latest: latest.clone(),
            })
            .collect()
    }
}

impl HealthSink for StatusBoard {
    fn emit(&self, event: &HealthEvent) {
        self.channels
            .write()
            .insert(event.channel_key.clone(), Some(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::record::ChannelKind;
    use crate::domain::staleness::EvaluationDetail;

    fn event(key: &ChannelKey, status: ChannelStatus) -> HealthEvent {
        HealthEvent {
            channel_key: key.clone(),
            kind: ChannelKind::Discrete,
            status,
            detail: EvaluationDetail::Age {
                age_secs: 1.0,
                threshold_secs: 10.0,
                last_timestamp: 99.0,
            },
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn board_tracks_latest_verdict() {
        let book = ChannelKey::new("book", "BINANCE", "BTC-USDT");
        let trades = ChannelKey::new("trades", "BINANCE", "BTC-USDT");
        let board = StatusBoard::new([book.clone(), trades.clone()]);
        assert!(!board.all_evaluated());
        assert_eq!(board.status_of(&book), None);

        board.emit(&event(&book, ChannelStatus::Stale));
        board.emit(&event(&trades, ChannelStatus::Healthy));
        assert!(board.all_evaluated());
        assert_eq!(board.count(ChannelStatus::Stale), 1);

        board.emit(&event(&book, ChannelStatus::Healthy));
        assert_eq!(board.status_of(&book), Some(ChannelStatus::Healthy));
        assert_eq!(board.count(ChannelStatus::Healthy), 2);
        assert_eq!(board.snapshot().len(), 2);

        let row = board.report_for("trades-BINANCE-BTC-USDT").unwrap();
        assert_eq!(row.latest.map(|e| e.status), Some(ChannelStatus::Healthy));
        assert!(board.report_for("trades-BINANCE-ETH-USDT").is_none());
    }

    #[test]
    fn tracing_sink_accepts_every_status() {
        let key = ChannelKey::new("trades", "BINANCE", "BTC-USDT");
        for status in [
            ChannelStatus::Healthy,
            ChannelStatus::Stale,
            ChannelStatus::InsufficientData,
        ] {
            TracingHealthSink.emit(&event(&key, status));
        }
    }
}
