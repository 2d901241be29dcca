//! Time-Series Writer
//!
//! Drains the [`RecordQueue`] into the ordered store. Records are flushed in
//! batches bounded by size and by wait time, grouped per series so each
//! group travels as one pipeline.
//!
//! Failed groups are retried with exponential backoff. Because inserts are
//! `NX` set operations, replaying a partially applied pipeline is safe. A
//! group that exhausts its attempts is dropped and logged as data loss; the
//! writer keeps going.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::queue::RecordQueue;
use crate::application::ports::{OrderedStore, StoreConnector, StoreError};
use crate::domain::record::{ChannelKey, ChannelNames, UpdateRecord};
use crate::infrastructure::metrics;
use crate::{ReconnectSettings, WriterSettings};

/// Writer behaviour.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Records per flush, at most.
    pub max_batch_size: usize,
    /// Longest a record waits for its batch to fill.
    pub max_batch_wait: Duration,
    /// Attempts per group before it is dropped.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub retry: BackoffConfig,
    /// Trim each series to this length after a write (`None` = keep all).
    pub trim_to: Option<usize>,
    /// Upper bound on one idle wait for the first record of a batch.
    pub idle_wait: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_wait: Duration::from_millis(250),
            max_attempts: 5,
            retry: BackoffConfig::default().with_max_attempts(5),
            trim_to: None,
            idle_wait: Duration::from_secs(1),
        }
    }
}

impl WriterConfig {
    /// Build from configured settings.
    #[must_use]
    pub fn from_settings(writer: &WriterSettings, reconnect: &ReconnectSettings) -> Self {
        Self {
            max_batch_size: writer.max_batch_size,
            max_batch_wait: writer.max_batch_wait,
            max_attempts: writer.max_attempts,
            retry: BackoffConfig::from_settings(reconnect).with_max_attempts(writer.max_attempts),
            trim_to: writer.trim_to,
            ..Self::default()
        }
    }
}

/// Writer counters.
#[derive(Debug, Default)]
pub struct WriterStats {
    batches_written: AtomicU64,
    records_inserted: AtomicU64,
    duplicates: AtomicU64,
    records_lost: AtomicU64,
    unencodable: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStatsSnapshot {
    /// Groups written successfully.
    pub batches_written: u64,
    /// Records that added a new member.
    pub records_inserted: u64,
    /// Records that collapsed into an existing member.
    pub duplicates: u64,
    /// Records dropped after exhausting write attempts.
    pub records_lost: u64,
    /// Records skipped because they could not be encoded.
    pub unencodable: u64,
    /// Failed write attempts.
    pub write_failures: u64,
}

impl WriterStats {
    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            unencodable: self.unencodable.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Queue-to-store writer task.
pub struct TimeSeriesWriter {
    config: WriterConfig,
    names: ChannelNames,
    connector: Arc<dyn StoreConnector>,
    queue: Arc<RecordQueue>,
    cancel: CancellationToken,
    stats: Arc<WriterStats>,
}

impl TimeSeriesWriter {
    /// Create a writer.
    #[must_use]
    pub fn new(
        config: WriterConfig,
        names: ChannelNames,
        connector: Arc<dyn StoreConnector>,
        queue: Arc<RecordQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            names,
            connector,
            queue,
            cancel,
            stats: Arc::new(WriterStats::default()),
        }
    }

    /// Shared counters, readable while the writer runs.
    #[must_use]
    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled or until the queue is closed and empty.
    ///
    /// On cancellation the queue is closed, remaining records get one flush
    /// attempt, and the store handle is released.
    pub async fn run(self) {
        tracing::info!(
            endpoint = %self.connector.endpoint(),
            max_batch_size = self.config.max_batch_size,
            max_batch_wait_ms = self.config.max_batch_wait.as_millis(),
            "Series writer started"
        );

        let mut store: Option<Arc<dyn OrderedStore>> = None;

        loop {
            if self.cancel.is_cancelled() || (self.queue.is_closed() && self.queue.is_empty()) {
                break;
            }

            let ready = tokio::select! {
                () = self.cancel.cancelled() => break,
                ready = self.queue.wait_for_records(self.config.idle_wait) => ready,
            };
            if !ready {
                continue;
            }

            let batch = self.collect_batch().await;
            if !batch.is_empty() {
                self.flush(&mut store, batch, self.config.max_attempts).await;
            }
        }

        self.queue.close();
        let remaining = self.queue.drain();
        if !remaining.is_empty() {
            tracing::info!(records = remaining.len(), "Final flush of buffered records");
            for chunk in remaining.chunks(self.config.max_batch_size.max(1)) {
                self.flush(&mut store, chunk.to_vec(), 1).await;
            }
        }

        drop(store);
        let stats = self.stats.snapshot();
        tracing::info!(
            batches = stats.batches_written,
            inserted = stats.records_inserted,
            duplicates = stats.duplicates,
            lost = stats.records_lost,
            unencodable = stats.unencodable,
            queue_dropped = self.queue.dropped(),
            "Series writer stopped, store connection released"
        );
    }

    /// Gather records until the batch is full, the wait elapses, or the
    /// queue closes.
    async fn collect_batch(&self) -> Vec<UpdateRecord> {
        let max = self.config.max_batch_size.max(1);
        let deadline = tokio::time::Instant::now() + self.config.max_batch_wait;
        let mut batch = self.queue.take(max);

        while batch.len() < max && !self.queue.is_closed() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let more = tokio::select! {
                () = self.cancel.cancelled() => false,
                ready = self.queue.wait_for_records(remaining) => ready,
            };
            if !more {
                break;
            }
            batch.extend(self.queue.take(max - batch.len()));
        }

        batch
    }

    /// Write a batch, one pipeline per series.
    async fn flush(
        &self,
        store: &mut Option<Arc<dyn OrderedStore>>,
        batch: Vec<UpdateRecord>,
        attempts: u32,
    ) {
        for (key, records) in group_by_key(&self.names, batch) {
            self.write_group(store, &key, &records, attempts).await;
        }
    }

    async fn write_group(
        &self,
        store: &mut Option<Arc<dyn OrderedStore>>,
        key: &ChannelKey,
        records: &[UpdateRecord],
        attempts: u32,
    ) {
        let attempts = attempts.max(1);
        let mut backoff = Backoff::new(self.config.retry.clone());

        for attempt in 1..=attempts {
            match self.try_write(store, key, records).await {
                Ok(()) => return,
                Err(error) => {
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    if error.is_recoverable() {
                        *store = None;
                    }
                    tracing::warn!(
                        channel_key = %key,
                        batch_size = records.len(),
                        attempt,
                        max_attempts = attempts,
                        error = %error,
                        "Series write failed"
                    );
                    if !error.is_recoverable() || attempt == attempts {
                        break;
                    }
                }
            }

            let delay = backoff.next_delay_or_max();
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(channel_key = %key, "Retry backoff interrupted by shutdown");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let lost = records.len() as u64;
        self.stats.records_lost.fetch_add(lost, Ordering::Relaxed);
        metrics::record_records_lost(lost);
        tracing::error!(
            channel_key = %key,
            batch_size = records.len(),
            "Dropping batch after exhausting write attempts"
        );
    }

    async fn try_write(
        &self,
        store: &mut Option<Arc<dyn OrderedStore>>,
        key: &ChannelKey,
        records: &[UpdateRecord],
    ) -> Result<(), StoreError> {
        let handle = match store {
            Some(handle) => Arc::clone(handle),
            None => {
                let handle = self.connector.connect().await?;
                *store = Some(Arc::clone(&handle));
                handle
            }
        };

        let report = handle.insert_batch(key, records).await?;
        self.stats.batches_written.fetch_add(1, Ordering::Relaxed);
        self.stats
            .records_inserted
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.stats
            .duplicates
            .fetch_add(report.duplicates as u64, Ordering::Relaxed);
        metrics::record_batch_written(report.inserted as u64, report.duplicates as u64);
        if report.unencodable > 0 {
            self.stats
                .unencodable
                .fetch_add(report.unencodable as u64, Ordering::Relaxed);
            tracing::warn!(
                channel_key = %key,
                skipped = report.unencodable,
                "Skipped records that could not be encoded"
            );
        }
        tracing::debug!(
            channel_key = %key,
            submitted = report.submitted,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "Batch written"
        );

        if let Some(max_len) = self.config.trim_to {
            match handle.trim(key, max_len).await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(channel_key = %key, removed, "Series trimmed");
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(channel_key = %key, error = %error, "Series trim failed");
                }
            }
        }

        Ok(())
    }
}

/// Split a batch into per-series groups, keeping first-seen key order and
/// arrival order within each group.
fn group_by_key(names: &ChannelNames, batch: Vec<UpdateRecord>) -> Vec<(ChannelKey, Vec<UpdateRecord>)> {
    let mut index: HashMap<ChannelKey, usize> = HashMap::new();
    let mut groups: Vec<(ChannelKey, Vec<UpdateRecord>)> = Vec::new();

    for record in batch {
        let key = names.key_for(&record);
        if let Some(&slot) = index.get(&key) {
            groups[slot].1.push(record);
        } else {
            index.insert(key.clone(), groups.len());
            groups.push((key, vec![record]));
        }
    }

    groups
}
