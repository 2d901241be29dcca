//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Newline-delimited JSON record ingest.
pub mod ingest;

/// In-process ordered store.
pub mod memory;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Redis sorted-set store adapter.
pub mod redis;

/// Health event sinks.
pub mod sink;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;
