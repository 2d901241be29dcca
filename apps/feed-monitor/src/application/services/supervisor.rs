//! Monitor Supervisor
//!
//! Owns the lifecycle of monitor and writer tasks: spawns them under child
//! cancellation tokens and stops them within a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::monitor::{MonitorConfig, MonitorStats, StalenessMonitor};
use super::queue::RecordQueue;
use super::writer::{TimeSeriesWriter, WriterConfig, WriterStats};
use crate::application::ports::{Clock, HealthSink, StoreConnector};
use crate::domain::record::{ChannelKey, ChannelNames};

/// Handle to a spawned monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    /// Instance identifier used in log spans.
    pub id: Uuid,
    /// Watched channels.
    pub channels: Vec<ChannelKey>,
    /// Live counters.
    pub stats: Arc<MonitorStats>,
}

/// Handle to a spawned writer.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    /// Instance identifier used in log spans.
    pub id: Uuid,
    /// Producer side of the writer's queue.
    pub queue: Arc<RecordQueue>,
    /// Live counters.
    pub stats: Arc<WriterStats>,
}

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Tasks were still running when the grace period ended and were aborted.
    #[error("{remaining} task(s) still running after {grace:?} grace period, aborted")]
    GraceExceeded {
        /// Tasks aborted.
        remaining: usize,
        /// Grace period.
        grace: Duration,
    },
}

/// Owner of monitor and writer tasks.
pub struct MonitorSupervisor {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    grace: Duration,
}

impl MonitorSupervisor {
    /// Create a supervisor with the given shutdown grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
            grace,
        }
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tasks not yet finished.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn a staleness monitor.
    pub fn spawn_monitor(
        &mut self,
        config: &MonitorConfig,
        connector: Arc<dyn StoreConnector>,
        sink: Arc<dyn HealthSink>,
        clock: Arc<dyn Clock>,
    ) -> MonitorHandle {
        let id = Uuid::new_v4();
        let monitor =
            StalenessMonitor::new(config, connector, sink, clock, self.cancel.child_token());
        let handle = MonitorHandle {
            id,
            channels: monitor.channel_keys(),
            stats: monitor.stats(),
        };

        let span = tracing::info_span!("monitor", %id, exchange = %config.exchange);
        self.tasks.spawn(monitor.run().instrument(span));
        handle
    }

    /// Spawn a series writer fed by a new queue of `queue_capacity` records.
    pub fn spawn_writer(
        &mut self,
        config: WriterConfig,
        names: ChannelNames,
        connector: Arc<dyn StoreConnector>,
        queue_capacity: usize,
    ) -> WriterHandle {
        let id = Uuid::new_v4();
        let queue = Arc::new(RecordQueue::new(queue_capacity));
        let writer = TimeSeriesWriter::new(
            config,
            names,
            connector,
            Arc::clone(&queue),
            self.cancel.child_token(),
        );
        let handle = WriterHandle {
            id,
            queue,
            stats: writer.stats(),
        };

        let span = tracing::info_span!("writer", %id);
        self.tasks.spawn(writer.run().instrument(span));
        handle
    }

    /// Cancel every task and wait up to the grace period for them to finish.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::GraceExceeded` if tasks had to be aborted.
    pub async fn shutdown(mut self) -> Result<(), SupervisorError> {
        tracing::info!(
            tasks = self.tasks.len(),
            grace_ms = self.grace.as_millis(),
            "Supervisor shutting down"
        );
        self.cancel.cancel();

        let grace = self.grace;
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(error) = result {
                    tracing::error!(error = %error, "Supervised task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            let remaining = self.tasks.len();
            self.tasks.abort_all();
            tracing::error!(remaining, "Grace period exceeded, aborting tasks");
            return Err(SupervisorError::GraceExceeded {
                remaining,
                grace: self.grace,
            });
        }

        tracing::info!("Supervisor stopped");
        Ok(())
    }
}
