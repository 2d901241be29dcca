//! Application Services
//!
//! Long-running tasks built on the ports.
//!
//! - `TimeSeriesWriter`: Drains the record queue into the store
//! - `StalenessMonitor`: Polls and classifies channels
//! - `MonitorSupervisor`: Spawns tasks and shuts them down

/// Exponential backoff schedule.
pub mod backoff;

/// Staleness monitor state machine.
pub mod monitor;

/// Bounded drop-oldest record queue.
pub mod queue;

/// Task lifecycle management.
pub mod supervisor;

/// Batched series writer.
pub mod writer;
