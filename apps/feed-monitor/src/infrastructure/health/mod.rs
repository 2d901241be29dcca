//! Status Endpoint
//!
//! Small HTTP surface over the monitor: probes for orchestrators, a JSON
//! status document with the latest verdict per channel, and the Prometheus
//! scrape target.
//!
//! | Route                  | Answer                                          |
//! |------------------------|-------------------------------------------------|
//! | `GET /healthz`         | `200` while the process runs                    |
//! | `GET /readyz`          | `200` once connected and every channel judged   |
//! | `GET /health`          | [`StatusDocument`], `503` when the store is lost |
//! | `GET /channels/{key}`  | Latest verdict for one series, `404` if unknown |
//! | `GET /metrics`         | Prometheus text exposition                      |

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::monitor::{MonitorStats, MonitorStatsSnapshot};
use crate::application::services::writer::{WriterStats, WriterStatsSnapshot};
use crate::domain::staleness::ChannelStatus;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::sink::{ChannelReport, StatusBoard};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Status Document
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusDocument {
    /// Rolled-up service health.
    pub status: ServiceHealth,
    /// Crate version.
    pub version: String,
    /// When the endpoint state was created.
    pub started_at: DateTime<Utc>,
    /// Whole seconds since `started_at`.
    pub uptime_secs: i64,
    /// Monitor state and counters.
    pub monitor: MonitorStatsSnapshot,
    /// Writer counters, when a writer runs in this process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<WriterStatsSnapshot>,
    /// Latest verdict per channel.
    pub channels: Vec<ChannelReport>,
}

/// Rolled-up service health.
///
/// Losing the store outranks channel verdicts: a disconnected monitor has no
/// current opinion about any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    /// Connected, every channel healthy.
    Healthy,
    /// Connected, at least one channel stale or short of data.
    Degraded,
    /// Not connected to the store.
    Unhealthy,
}

impl ServiceHealth {
    const fn roll_up(store_connected: bool, unhealthy_channels: usize) -> Self {
        match (store_connected, unhealthy_channels) {
            (false, _) => Self::Unhealthy,
            (true, 0) => Self::Healthy,
            (true, _) => Self::Degraded,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// What the endpoint reads from.
pub struct StatusState {
    version: String,
    started_at: DateTime<Utc>,
    board: Arc<StatusBoard>,
    monitor: Arc<MonitorStats>,
    writer: Option<Arc<WriterStats>>,
}

impl StatusState {
    /// Endpoint state over a status board and the monitor's counters.
    #[must_use]
    pub fn new(version: String, board: Arc<StatusBoard>, monitor: Arc<MonitorStats>) -> Self {
        Self {
            version,
            started_at: Utc::now(),
            board,
            monitor,
            writer: None,
        }
    }

    /// Also report writer counters.
    #[must_use]
    pub fn with_writer(mut self, writer: Arc<WriterStats>) -> Self {
        self.writer = Some(writer);
        self
    }

    fn is_ready(&self) -> bool {
        self.monitor.state().is_connected() && self.board.all_evaluated()
    }

    fn document(&self) -> StatusDocument {
        let monitor = self.monitor.snapshot();
        let unhealthy_channels = self.board.count(ChannelStatus::Stale)
            + self.board.count(ChannelStatus::InsufficientData);

        StatusDocument {
            status: ServiceHealth::roll_up(monitor.state.is_connected(), unhealthy_channels),
            version: self.version.clone(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            monitor,
            writer: self.writer.as_deref().map(WriterStats::snapshot),
            channels: self.board.snapshot(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Status endpoint bound to one port, stopped by a cancellation token.
pub struct StatusServer {
    port: u16,
    state: Arc<StatusState>,
    cancel: CancellationToken,
}

impl StatusServer {
    /// Prepare a server; nothing is bound until [`serve`](Self::serve).
    #[must_use]
    pub const fn new(port: u16, state: Arc<StatusState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind on all interfaces and serve until the token is cancelled.
    ///
    /// # Errors
    ///
    /// `StatusServerError::Bind` when the port is unavailable,
    /// `StatusServerError::Serve` when the accept loop fails.
    pub async fn serve(self) -> Result<(), StatusServerError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StatusServerError::Bind {
                port: self.port,
                source,
            })?;
        tracing::info!(%addr, "Status endpoint listening");

        axum::serve(listener, status_routes(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(StatusServerError::Serve)?;

        tracing::info!(%addr, "Status endpoint closed");
        Ok(())
    }
}

/// Route table of the status endpoint.
pub fn status_routes(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readiness))
        .route("/health", get(status_document))
        .route("/channels/{key}", get(channel_report))
        .route("/metrics", get(prometheus_scrape))
        .with_state(state)
}

async fn readiness(State(state): State<Arc<StatusState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn status_document(State(state): State<Arc<StatusState>>) -> Response {
    let document = state.document();
    (document.status.http_status(), Json(document)).into_response()
}

async fn channel_report(
    State(state): State<Arc<StatusState>>,
    Path(key): Path<String>,
) -> Response {
    match state.board.report_for(&key) {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::NOT_FOUND, format!("channel {key} is not monitored")).into_response(),
    }
}

async fn prometheus_scrape() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
}

/// Status endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    /// Port could not be bound.
    #[error("cannot bind status endpoint on port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Accept loop terminated with an error.
    #[error("status endpoint failed")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::record::ChannelKey;

    fn routes() -> Router {
        let board = Arc::new(StatusBoard::new([ChannelKey::new("book", "BINANCE", "BTC-USDT")]));
        let state = StatusState::new("test".to_string(), board, Arc::new(MonitorStats::default()));
        status_routes(Arc::new(state))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn roll_up_prefers_connection_over_channels() {
        assert_eq!(ServiceHealth::roll_up(false, 0), ServiceHealth::Unhealthy);
        assert_eq!(ServiceHealth::roll_up(false, 3), ServiceHealth::Unhealthy);
        assert_eq!(ServiceHealth::roll_up(true, 1), ServiceHealth::Degraded);
        assert_eq!(ServiceHealth::roll_up(true, 0), ServiceHealth::Healthy);
        assert_eq!(
            serde_json::to_string(&ServiceHealth::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[tokio::test]
    async fn probes_before_first_connection() {
        let app = routes();
        assert_eq!(get_status(app.clone(), "/healthz").await, StatusCode::OK);
        assert_eq!(
            get_status(app.clone(), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(app, "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn channel_lookup_by_key() {
        let app = routes();

        let response = app
            .clone()
            .oneshot(
                Request::get("/channels/book-BINANCE-BTC-USDT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["channel_key"], "book-BINANCE-BTC-USDT");
        assert!(report.get("latest").is_none());

        assert_eq!(
            get_status(app, "/channels/trades-BINANCE-BTC-USDT").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn status_document_includes_writer_counters() {
        let board = Arc::new(StatusBoard::new([ChannelKey::new("book", "BINANCE", "BTC-USDT")]));
        let state = StatusState::new("test".to_string(), board, Arc::new(MonitorStats::default()))
            .with_writer(Arc::new(WriterStats::default()));

        let response = status_routes(Arc::new(state))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let document: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(document["writer"]["batches_written"], 0);
        assert_eq!(document["writer"]["records_lost"], 0);
        assert_eq!(document["monitor"]["state"], "CONNECTING");
        assert_eq!(document["status"], "unhealthy");
    }

    #[tokio::test]
    async fn status_document_omits_writer_when_absent() {
        let response = routes()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let document: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(document.get("writer").is_none());
    }
}
