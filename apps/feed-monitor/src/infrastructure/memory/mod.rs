//! In-Memory Ordered Store
//!
//! A process-local sorted-set store with the same member/score semantics as
//! the Redis adapter, for unit and integration tests. Handles are cheap
//! clones sharing one series map.
//!
//! The store can be switched offline to simulate an outage: while offline,
//! `connect` and every store call fail with a connection error. Single
//! batch or read failures can also be scheduled.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{
    BatchReport, InsertOutcome, OrderedStore, RecentWindow, ScoredRecord, StoreConnector,
    StoreError, encode_members,
};
use crate::domain::record::{ChannelKey, DecodeMode, UpdateRecord};

type Series = Vec<(Vec<u8>, f64)>;

#[derive(Debug, Default)]
struct Inner {
    series: Mutex<HashMap<String, Series>>,
    offline: AtomicBool,
    failing_batches: AtomicU32,
    read_fault: Mutex<Option<u32>>,
    batch_log: Mutex<Vec<usize>>,
    connect_attempts: AtomicU64,
}

/// Shared in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    decode: DecodeMode,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store decoding members as text.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            decode: DecodeMode::Text,
        }
    }

    /// Same store, decoding members with `decode`.
    #[must_use]
    pub fn with_decode(mut self, decode: DecodeMode) -> Self {
        self.decode = decode;
        self
    }

    /// Insert `record` directly, bypassing outage simulation.
    ///
    /// # Panics
    ///
    /// Panics if the record cannot be encoded.
    #[allow(clippy::expect_used)]
    pub fn seed(&self, key: &ChannelKey, record: &UpdateRecord) {
        let member = record.encode().expect("seeded record must encode");
        self.seed_raw(key, member, record.timestamp);
    }

    /// Insert an arbitrary member and score, including ones that will not
    /// decode.
    pub fn seed_raw(&self, key: &ChannelKey, member: Vec<u8>, score: f64) {
        let mut series = self.inner.series.lock();
        add_member(series.entry(key.to_string()).or_default(), member, score);
    }

    /// Simulate an outage (`true`) or recovery (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` batch inserts as interrupted pipelines.
    pub fn fail_next_batches(&self, count: u32) {
        self.inner.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Let `successes` more reads through, then fail the next one with a
    /// connection error. Later reads succeed again.
    pub fn fail_read_after(&self, successes: u32) {
        *self.inner.read_fault.lock() = Some(successes);
    }

    /// Sizes of the batch inserts that reached the store, in order.
    #[must_use]
    pub fn batch_log(&self) -> Vec<usize> {
        self.inner.batch_log.lock().clone()
    }

    /// Number of `connect` calls so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of members in the series at `key`.
    #[must_use]
    pub fn series_len(&self, key: &ChannelKey) -> usize {
        self.inner
            .series
            .lock()
            .get(key.as_str())
            .map_or(0, Vec::len)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StoreError::Connection {
                message: "in-memory store is offline".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn take_read_failure(&self) -> bool {
        let mut fault = self.inner.read_fault.lock();
        match *fault {
            Some(0) => {
                *fault = None;
                true
            }
            Some(remaining) => {
                *fault = Some(remaining - 1);
                false
            }
            None => false,
        }
    }

    fn take_batch_failure(&self) -> bool {
        self.inner
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Add a member unless it is already present. Keeps the series sorted by
/// score, then by member bytes.
fn add_member(series: &mut Series, member: Vec<u8>, score: f64) -> InsertOutcome {
    if series.iter().any(|(existing, _)| *existing == member) {
        return InsertOutcome::Duplicate;
    }
    let at = series.partition_point(|(existing, existing_score)| {
        match existing_score.total_cmp(&score) {
            CmpOrdering::Less => true,
            CmpOrdering::Equal => existing.as_slice() < member.as_slice(),
            CmpOrdering::Greater => false,
        }
    });
    series.insert(at, (member, score));
    InsertOutcome::Inserted
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn insert(
        &self,
        key: &ChannelKey,
        record: &UpdateRecord,
    ) -> Result<InsertOutcome, StoreError> {
        self.check_online()?;
        let member = record.encode()?;
        let mut series = self.inner.series.lock();
        Ok(add_member(
            series.entry(key.to_string()).or_default(),
            member,
            record.timestamp,
        ))
    }

    async fn insert_batch(
        &self,
        key: &ChannelKey,
        records: &[UpdateRecord],
    ) -> Result<BatchReport, StoreError> {
        self.check_online()?;
        let (members, unencodable) = encode_members(records);

        if self.take_batch_failure() {
            return Err(StoreError::BatchInterrupted {
                key: key.clone(),
                submitted: members.len(),
                message: "simulated connection reset".to_string(),
            });
        }

        let mut report = BatchReport {
            submitted: members.len(),
            unencodable,
            ..BatchReport::default()
        };
        {
            let mut map = self.inner.series.lock();
            let series = map.entry(key.to_string()).or_default();
            for (member, score) in members {
                match add_member(series, member, score) {
                    InsertOutcome::Inserted => report.inserted += 1,
                    InsertOutcome::Duplicate => report.duplicates += 1,
                }
            }
        }
        self.inner.batch_log.lock().push(report.submitted);
        Ok(report)
    }

    async fn read_recent(
        &self,
        key: &ChannelKey,
        count: usize,
    ) -> Result<RecentWindow, StoreError> {
        self.check_online()?;
        if self.take_read_failure() {
            return Err(StoreError::Connection {
                message: "simulated read failure".to_string(),
            });
        }
        if count == 0 {
            return Ok(RecentWindow::default());
        }

        let map = self.inner.series.lock();
        let Some(series) = map.get(key.as_str()) else {
            return Ok(RecentWindow::default());
        };

        let start = series.len().saturating_sub(count);
        let mut window = RecentWindow::default();
        for (member, score) in &series[start..] {
            match UpdateRecord::decode(member, self.decode) {
                Ok(record) if score.is_finite() => window.entries.push(ScoredRecord {
                    record,
                    score: *score,
                }),
                _ => window.malformed += 1,
            }
        }
        Ok(window)
    }

    async fn trim(&self, key: &ChannelKey, max_len: usize) -> Result<u64, StoreError> {
        self.check_online()?;
        if max_len == 0 {
            return Ok(0);
        }
        let mut map = self.inner.series.lock();
        let Some(series) = map.get_mut(key.as_str()) else {
            return Ok(0);
        };
        let excess = series.len().saturating_sub(max_len);
        series.drain(..excess);
        Ok(excess as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self) -> Result<Arc<dyn OrderedStore>, StoreError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(Arc::new(self.clone()))
    }

    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::ChannelKind;

    fn key() -> ChannelKey {
        ChannelKey::new("trades", "BINANCE", "BTC-USDT")
    }

    fn trade(timestamp: f64, payload: &str) -> UpdateRecord {
        UpdateRecord::new(
            "BINANCE",
            "BTC-USDT",
            ChannelKind::Discrete,
            timestamp,
            timestamp,
            payload,
        )
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = MemoryStore::new();
        let record = trade(10.0, "{\"px\":1}");
        assert_eq!(
            store.insert(&key(), &record).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert(&key(), &record).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.series_len(&key()), 1);
    }

    #[tokio::test]
    async fn same_score_distinct_payloads_both_kept() {
        let store = MemoryStore::new();
        store.insert(&key(), &trade(10.0, "a")).await.unwrap();
        store.insert(&key(), &trade(10.0, "b")).await.unwrap();
        assert_eq!(store.series_len(&key()), 2);
    }

    #[tokio::test]
    async fn read_recent_returns_tail_ascending() {
        let store = MemoryStore::new();
        for ts in [3.0, 1.0, 5.0, 2.0, 4.0] {
            store.seed(&key(), &trade(ts, ""));
        }

        let window = store.read_recent(&key(), 3).await.unwrap();
        assert_eq!(window.scores(), vec![3.0, 4.0, 5.0]);

        let all = store.read_recent(&key(), 50).await.unwrap();
        assert_eq!(all.len(), 5);

        assert!(store.read_recent(&key(), 0).await.unwrap().is_empty());
        let missing = ChannelKey::new("trades", "BINANCE", "DOGE-USDT");
        assert!(store.read_recent(&missing, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_entries_are_counted() {
        let store = MemoryStore::new();
        store.seed(&key(), &trade(1.0, ""));
        store.seed_raw(&key(), b"not json".to_vec(), 2.0);
        store.seed_raw(&key(), vec![0xff, 0xfe], 3.0);
        store.seed(&key(), &trade(4.0, ""));

        let window = store.read_recent(&key(), 10).await.unwrap();
        assert_eq!(window.scores(), vec![1.0, 4.0]);
        assert_eq!(window.malformed, 2);
    }

    #[tokio::test]
    async fn trim_keeps_newest() {
        let store = MemoryStore::new();
        for ts in 1..=10 {
            store.seed(&key(), &trade(f64::from(ts), ""));
        }
        assert_eq!(store.trim(&key(), 4).await.unwrap(), 6);
        let window = store.read_recent(&key(), 10).await.unwrap();
        assert_eq!(window.scores(), vec![7.0, 8.0, 9.0, 10.0]);
        assert_eq!(store.trim(&key(), 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_store_refuses_connections() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.connect().await,
            Err(StoreError::Connection { .. })
        ));
        assert!(store.ping().await.is_err());

        store.set_offline(false);
        assert!(store.connect().await.is_ok());
        assert_eq!(store.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn simulated_batch_failure_applies_nothing() {
        let store = MemoryStore::new();
        store.fail_next_batches(1);
        let records = vec![trade(1.0, ""), trade(2.0, "")];

        let err = store.insert_batch(&key(), &records).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchInterrupted { submitted: 2, .. }));
        assert_eq!(store.series_len(&key()), 0);

        let report = store.insert_batch(&key(), &records).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(store.batch_log(), vec![2]);
    }

    #[tokio::test]
    async fn unencodable_record_does_not_sink_its_batch() {
        let store = MemoryStore::new();
        let records = vec![trade(1.0, "a"), trade(f64::NAN, "b"), trade(2.0, "c")];

        let report = store.insert_batch(&key(), &records).await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.unencodable, 1);
        assert_eq!(store.series_len(&key()), 2);
    }

    #[tokio::test]
    async fn scheduled_read_failure_fires_once() {
        let store = MemoryStore::new();
        store.seed(&key(), &trade(1.0, ""));
        store.fail_read_after(1);

        assert_eq!(store.read_recent(&key(), 1).await.unwrap().len(), 1);
        assert!(matches!(
            store.read_recent(&key(), 1).await,
            Err(StoreError::Connection { .. })
        ));
        assert_eq!(store.read_recent(&key(), 1).await.unwrap().len(), 1);
    }
}
