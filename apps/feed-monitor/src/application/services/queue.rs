//! Record Queue
//!
//! Bounded hand-off between the feed handler and the series writer. When
//! full, the oldest record is evicted to make room, so memory stays bounded
//! and the freshest data survives a slow store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::record::UpdateRecord;
use crate::infrastructure::metrics;

/// Outcome of [`RecordQueue::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Queued without eviction.
    Accepted,
    /// Queued after evicting the oldest record.
    DisplacedOldest,
    /// Queue is closed; the record is handed back.
    Closed(UpdateRecord),
}

/// Bounded drop-oldest queue of update records.
#[derive(Debug)]
pub struct RecordQueue {
    records: Mutex<VecDeque<UpdateRecord>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl RecordQueue {
    /// Create a queue holding at most `capacity` records (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a record, evicting the oldest one when full.
    pub fn push(&self, record: UpdateRecord) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed(record);
        }

        let displaced = {
            let mut records = self.records.lock();
            let displaced = if records.len() >= self.capacity {
                records.pop_front()
            } else {
                None
            };
            records.push_back(record);
            displaced
        };
        self.notify.notify_one();

        match displaced {
            None => PushOutcome::Accepted,
            Some(evicted) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_queue_drop();
                // Powers of two keep a saturated queue from flooding the log.
                if total.is_power_of_two() {
                    tracing::warn!(
                        dropped_total = total,
                        capacity = self.capacity,
                        exchange = %evicted.exchange,
                        symbol = %evicted.symbol,
                        "Record queue full, dropping oldest records"
                    );
                }
                PushOutcome::DisplacedOldest
            }
        }
    }

    /// Wait up to `max_wait` for at least one record.
    ///
    /// Returns `true` when records are available, `false` on timeout or when
    /// the queue is closed and empty.
    pub async fn wait_for_records(&self, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let notified = self.notify.notified();
            if !self.is_empty() {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !self.is_empty();
            }
        }
    }

    /// Remove up to `max` records from the front.
    #[must_use]
    pub fn take(&self, max: usize) -> Vec<UpdateRecord> {
        let mut records = self.records.lock();
        let n = max.min(records.len());
        records.drain(..n).collect()
    }

    /// Remove every queued record.
    #[must_use]
    pub fn drain(&self) -> Vec<UpdateRecord> {
        self.records.lock().drain(..).collect()
    }

    /// Stop accepting records and wake any waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Records currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Maximum records held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records evicted because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
