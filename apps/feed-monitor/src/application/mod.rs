//! Application Layer - Ports and long-running services.

/// Interfaces to the store, health sinks, and the clock.
pub mod ports;

/// Writer, monitor, and supervisor tasks.
pub mod services;
