//! Ordered Store Port (Driven Port)
//!
//! Interface to a sorted-set store holding one ordered series per channel.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::record::{ChannelKey, RecordError, UpdateRecord};

/// Result of a single deduplicated insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new member was added.
    Inserted,
    /// An identical member with the same score already existed.
    Duplicate,
}

/// Result of a pipelined batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records sent in the pipeline.
    pub submitted: usize,
    /// Records that added a new member.
    pub inserted: usize,
    /// Records that collapsed into an existing member.
    pub duplicates: usize,
    /// Records left out of the pipeline because they could not be encoded.
    pub unencodable: usize,
}

/// Encode `records` as `(member, score)` pairs for a pipeline.
///
/// Records that cannot be encoded are left out and counted, so one bad
/// record never sinks the rest of its batch.
#[must_use]
pub fn encode_members(records: &[UpdateRecord]) -> (Vec<(Vec<u8>, f64)>, usize) {
    let mut members = Vec::with_capacity(records.len());
    let mut unencodable = 0;
    for record in records {
        match record.encode() {
            Ok(member) => members.push((member, record.timestamp)),
            Err(_) => unencodable += 1,
        }
    }
    (members, unencodable)
}

/// A decoded series entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Decoded member.
    pub record: UpdateRecord,
    /// Series score.
    pub score: f64,
}

/// Most recent entries of a series, ascending by score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentWindow {
    /// Entries that decoded cleanly.
    pub entries: Vec<ScoredRecord>,
    /// Entries skipped because the score or member could not be decoded.
    pub malformed: usize,
}

impl RecentWindow {
    /// Scores of the decoded entries, ascending.
    #[must_use]
    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|entry| entry.score).collect()
    }

    /// Number of decoded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry decoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or connection lost.
    #[error("store connection error: {message}")]
    Connection {
        /// Underlying cause.
        message: String,
    },

    /// Call exceeded its deadline.
    #[error("store call {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Pipeline failed mid-flight; some members may have been applied.
    #[error("batch of {submitted} records for {key} interrupted, may be partially applied: {message}")]
    BatchInterrupted {
        /// Series key.
        key: ChannelKey,
        /// Records sent in the pipeline.
        submitted: usize,
        /// Underlying cause.
        message: String,
    },

    /// Store rejected the command.
    #[error("store command failed: {message}")]
    Command {
        /// Server reply or client error.
        message: String,
    },

    /// Record could not be encoded.
    #[error(transparent)]
    Serialization(#[from] RecordError),
}

impl StoreError {
    /// Whether retrying or reconnecting can succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Serialization(_))
    }
}

/// Port for the ordered series store.
///
/// Implementations must be safe for concurrent use from several tasks.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Add `record` to the series at `key` unless an identical member with the
    /// same score is present.
    async fn insert(
        &self,
        key: &ChannelKey,
        record: &UpdateRecord,
    ) -> Result<InsertOutcome, StoreError>;

    /// Add `records` to the series at `key` in one non-transactional pipeline.
    ///
    /// Records that cannot be encoded are skipped and reported in
    /// [`BatchReport::unencodable`]; the rest are still written.
    async fn insert_batch(
        &self,
        key: &ChannelKey,
        records: &[UpdateRecord],
    ) -> Result<BatchReport, StoreError>;

    /// Read up to `count` most recent entries, ascending by score.
    async fn read_recent(&self, key: &ChannelKey, count: usize)
    -> Result<RecentWindow, StoreError>;

    /// Remove the oldest entries so at most `max_len` remain. Returns the
    /// number removed.
    async fn trim(&self, key: &ChannelKey, max_len: usize) -> Result<u64, StoreError>;

    /// Round-trip a no-op command.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Port producing connected store handles.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Establish a connection and verify it answers.
    async fn connect(&self) -> Result<Arc<dyn OrderedStore>, StoreError>;

    /// Endpoint description for logs (no credentials).
    fn endpoint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::ChannelKind;

    #[test]
    fn window_scores_follow_entries() {
        let window = RecentWindow {
            entries: vec![
                ScoredRecord {
                    record: UpdateRecord::new("X", "A", ChannelKind::Discrete, 1.0, 1.0, ""),
                    score: 1.0,
                },
                ScoredRecord {
                    record: UpdateRecord::new("X", "A", ChannelKind::Discrete, 2.0, 2.0, ""),
                    score: 2.0,
                },
            ],
            malformed: 1,
        };
        assert_eq!(window.scores(), vec![1.0, 2.0]);
        assert_eq!(window.len(), 2);
        assert!(!window.is_empty());
    }

    #[test]
    fn serialization_errors_are_not_recoverable() {
        assert!(!StoreError::Serialization(RecordError::NonFiniteTimestamp).is_recoverable());
        assert!(
            StoreError::Timeout {
                operation: "ZRANGE",
                timeout_ms: 10
            }
            .is_recoverable()
        );
        assert!(
            StoreError::BatchInterrupted {
                key: ChannelKey::new("book", "X", "A"),
                submitted: 3,
                message: "reset".to_string(),
            }
            .is_recoverable()
        );
    }

    #[test]
    fn unencodable_records_are_left_out() {
        let records = vec![
            UpdateRecord::new("X", "A", ChannelKind::Discrete, 1.0, 1.0, ""),
            UpdateRecord::new("X", "A", ChannelKind::Discrete, f64::NAN, 2.0, ""),
            UpdateRecord::new("X", "A", ChannelKind::Discrete, 3.0, f64::INFINITY, ""),
            UpdateRecord::new("X", "A", ChannelKind::Discrete, 4.0, 4.0, ""),
        ];
        let (members, unencodable) = encode_members(&records);
        assert_eq!(unencodable, 2);
        let scores: Vec<f64> = members.iter().map(|(_, score)| *score).collect();
        assert_eq!(scores, vec![1.0, 4.0]);
    }
}
