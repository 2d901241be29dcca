#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Feed Monitor - Series Writer and Staleness Monitor
//!
//! Persists market data update records into per-channel Redis sorted sets
//! and continuously checks whether each channel is still updating at its
//! expected cadence.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Records, channel keys, and staleness policies
//!   - `record`: Update records, channel kinds, and key naming
//!   - `staleness`: Mean-interval and age rules, health events
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Ordered store, health sink, and clock interfaces
//!   - `services`: Writer, monitor, record queue, and supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `redis`: Sorted-set store over TCP, TLS, or a Unix socket
//!   - `memory`: In-process store with outage simulation
//!   - `sink`: Log sink and status board
//!   - `ingest`: Newline-delimited JSON record input
//!   - `config`: Environment configuration
//!   - `health`: Status HTTP endpoint and probes
//!
//! # Data Flow
//!
//! ```text
//! feed handler ──► RecordQueue ──► TimeSeriesWriter ──► Redis
//!                                                        │
//!              log / status board / metrics ◄── StalenessMonitor
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Records and staleness rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::record::{ChannelKey, ChannelKind, ChannelNames, DecodeMode, UpdateRecord};
pub use domain::staleness::{
    ChannelStatus, ContinuousPolicy, DiscretePolicy, EvaluationDetail, HealthEvent,
    StalenessPolicy,
};

// Ports
pub use application::ports::{
    Clock, HealthSink, InsertOutcome, OrderedStore, StoreConnector, StoreError, SystemClock,
};

// Services
pub use application::services::monitor::{MonitorConfig, MonitorState, StalenessMonitor};
pub use application::services::queue::{PushOutcome, RecordQueue};
pub use application::services::supervisor::{MonitorSupervisor, SupervisorError};
pub use application::services::writer::{TimeSeriesWriter, WriterConfig};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedMonitorConfig, MonitorSettings, ReconnectSettings, RedisSettings,
    ServerSettings, Transport, WriterSettings,
};

// Status endpoint
pub use infrastructure::health::{StatusServer, StatusServerError, StatusState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
