//! Redis Ordered Store Adapter
//!
//! Implements [`OrderedStore`] over Redis sorted sets:
//!
//! - insert: `ZADD key NX score member` (reply 0 means duplicate)
//! - batch insert: the same command pipelined, without `MULTI`
//! - read: `ZRANGE key -count -1 WITHSCORES`
//! - trim: `ZREMRANGEBYRANK key 0 -(max_len + 1)`
//!
//! Connections go through [`ConnectionManager`], which is cheap to clone and
//! shared by all calls on one handle. Every call is bounded by the configured
//! command timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Value};

use crate::application::ports::{
    BatchReport, InsertOutcome, OrderedStore, RecentWindow, ScoredRecord, StoreConnector,
    StoreError, encode_members,
};
use crate::domain::record::{ChannelKey, DecodeMode, UpdateRecord};
use crate::infrastructure::config::{RedisSettings, Transport};

// =============================================================================
// Connector
// =============================================================================

/// Opens Redis connections from [`RedisSettings`].
pub struct RedisConnector {
    client: redis::Client,
    settings: RedisSettings,
}

impl RedisConnector {
    /// Create a connector. No connection is made until [`StoreConnector::connect`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the connection URL is rejected.
    pub fn new(settings: RedisSettings) -> Result<Self, StoreError> {
        let client = redis::Client::open(settings.connection_url()).map_err(|e| {
            StoreError::Connection {
                message: format!("invalid connection settings: {e}"),
            }
        })?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn OrderedStore>, StoreError> {
        let timeout = self.settings.command_timeout;
        let conn = bounded("CONNECT", timeout, ConnectionManager::new(self.client.clone()))
            .await?
            .map_err(|e| connection_error(&e))?;

        let store = RedisStore {
            conn,
            decode: DecodeMode::from_text_flag(self.settings.decode_as_text),
            command_timeout: timeout,
        };
        store.ping().await?;

        tracing::debug!(endpoint = %self.endpoint(), "Redis connection established");
        Ok(Arc::new(store))
    }

    fn endpoint(&self) -> String {
        let RedisSettings {
            host,
            port,
            transport,
            ..
        } = &self.settings;
        match transport {
            Transport::Unix => format!("unix:{host}"),
            other => format!("{}:{host}:{port}", other.as_str()),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Connected Redis store handle.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    decode: DecodeMode,
    command_timeout: Duration,
}

impl RedisStore {
    async fn query<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        bounded(operation, self.command_timeout, fut)
            .await?
            .map_err(|e| command_error(&e))
    }
}

#[async_trait]
impl OrderedStore for RedisStore {
    async fn insert(
        &self,
        key: &ChannelKey,
        record: &UpdateRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let member = record.encode()?;
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key.as_str())
            .arg("NX")
            .arg(record.timestamp)
            .arg(member);

        let mut conn = self.conn.clone();
        let added: i64 = self.query("ZADD", cmd.query_async(&mut conn)).await?;
        Ok(if added > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn insert_batch(
        &self,
        key: &ChannelKey,
        records: &[UpdateRecord],
    ) -> Result<BatchReport, StoreError> {
        let (members, unencodable) = encode_members(records);
        if members.is_empty() {
            return Ok(BatchReport {
                unencodable,
                ..BatchReport::default()
            });
        }
        let submitted = members.len();

        let mut pipe = redis::pipe();
        for (member, score) in members {
            pipe.cmd("ZADD")
                .arg(key.as_str())
                .arg("NX")
                .arg(score)
                .arg(member);
        }

        let mut conn = self.conn.clone();
        let replies: Vec<i64> =
            bounded("ZADD pipeline", self.command_timeout, pipe.query_async(&mut conn))
                .await
                .map_err(|_| StoreError::BatchInterrupted {
                    key: key.clone(),
                    submitted,
                    message: format!("no reply within {}ms", self.command_timeout.as_millis()),
                })?
                .map_err(|e| batch_error(key, submitted, &e))?;

        let inserted = replies.iter().filter(|&&added| added > 0).count();
        Ok(BatchReport {
            submitted,
            inserted,
            duplicates: submitted - inserted,
            unencodable,
        })
    }

    async fn read_recent(
        &self,
        key: &ChannelKey,
        count: usize,
    ) -> Result<RecentWindow, StoreError> {
        if count == 0 {
            return Ok(RecentWindow::default());
        }
        let start = -i64::try_from(count).unwrap_or(i64::MAX);

        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(key.as_str())
            .arg(start)
            .arg(-1)
            .arg("WITHSCORES");

        let mut conn = self.conn.clone();
        let reply: Value = self.query("ZRANGE", cmd.query_async(&mut conn)).await?;
        Ok(decode_window(reply, self.decode))
    }

    async fn trim(&self, key: &ChannelKey, max_len: usize) -> Result<u64, StoreError> {
        if max_len == 0 {
            return Ok(0);
        }
        let stop = -i64::try_from(max_len).unwrap_or(i64::MAX) - 1;

        let mut cmd = redis::cmd("ZREMRANGEBYRANK");
        cmd.arg(key.as_str()).arg(0).arg(stop);

        let mut conn = self.conn.clone();
        self.query("ZREMRANGEBYRANK", cmd.query_async(&mut conn)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let cmd = redis::cmd("PING");
        let mut conn = self.conn.clone();
        let _pong: String = bounded("PING", self.command_timeout, cmd.query_async(&mut conn))
            .await?
            .map_err(|e| connection_error(&e))?;
        Ok(())
    }
}

// =============================================================================
// Reply Decoding
// =============================================================================

/// Decode a `ZRANGE ... WITHSCORES` reply.
///
/// Accepts both the flat RESP2 layout (`[member, score, member, score, ...]`)
/// and the nested RESP3 layout (`[[member, score], ...]`). Entries whose
/// score or member cannot be decoded are counted as malformed.
fn decode_window(reply: Value, decode: DecodeMode) -> RecentWindow {
    let items = match reply {
        Value::Array(items) | Value::Set(items) => items,
        Value::Nil => Vec::new(),
        other => {
            tracing::warn!(reply = ?other, "Unexpected ZRANGE reply shape");
            return RecentWindow {
                entries: Vec::new(),
                malformed: 1,
            };
        }
    };

    let nested = items.iter().all(|item| matches!(item, Value::Array(_)));
    let pairs: Vec<(Value, Option<Value>)> = if nested {
        items
            .into_iter()
            .map(|item| match item {
                Value::Array(mut pair) if pair.len() == 2 => {
                    let score = pair.pop();
                    let member = pair.pop().unwrap_or(Value::Nil);
                    (member, score)
                }
                other => (other, None),
            })
            .collect()
    } else {
        let mut iter = items.into_iter();
        let mut pairs = Vec::new();
        while let Some(member) = iter.next() {
            pairs.push((member, iter.next()));
        }
        pairs
    };

    let mut window = RecentWindow::default();
    for (member, score) in pairs {
        let score = score.as_ref().and_then(score_of);
        let record = member_bytes(member).and_then(|bytes| UpdateRecord::decode(&bytes, decode).ok());
        match (record, score) {
            (Some(record), Some(score)) => window.entries.push(ScoredRecord { record, score }),
            _ => window.malformed += 1,
        }
    }
    window
}

fn score_of(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Double(score) => *score,
        #[allow(clippy::cast_precision_loss)]
        Value::Int(score) => *score as f64,
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok()?,
        Value::SimpleString(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    score.is_finite().then_some(score)
}

fn member_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes),
        Value::SimpleString(text) => Some(text.into_bytes()),
        _ => None,
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
}

fn is_link_failure(error: &RedisError) -> bool {
    error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal()
}

fn connection_error(error: &RedisError) -> StoreError {
    StoreError::Connection {
        message: error.to_string(),
    }
}

fn command_error(error: &RedisError) -> StoreError {
    if is_link_failure(error) || error.is_timeout() {
        connection_error(error)
    } else {
        StoreError::Command {
            message: error.to_string(),
        }
    }
}

fn batch_error(key: &ChannelKey, submitted: usize, error: &RedisError) -> StoreError {
    if error.is_connection_refusal() {
        connection_error(error)
    } else if is_link_failure(error) || error.is_timeout() {
        StoreError::BatchInterrupted {
            key: key.clone(),
            submitted,
            message: error.to_string(),
        }
    } else {
        StoreError::Command {
            message: error.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::ChannelKind;

    fn member(timestamp: f64) -> Value {
        let record = UpdateRecord::new(
            "BINANCE",
            "BTC-USDT",
            ChannelKind::Continuous,
            timestamp,
            timestamp,
            "{}",
        );
        Value::BulkString(record.encode().unwrap())
    }

    fn score(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    #[test]
    fn decodes_flat_reply() {
        let reply = Value::Array(vec![
            member(1.5),
            score("1.5"),
            member(2.25),
            score("2.25"),
        ]);
        let window = decode_window(reply, DecodeMode::Text);
        assert_eq!(window.scores(), vec![1.5, 2.25]);
        assert_eq!(window.malformed, 0);
    }

    #[test]
    fn decodes_nested_reply() {
        let reply = Value::Array(vec![
            Value::Array(vec![member(1.0), Value::Double(1.0)]),
            Value::Array(vec![member(2.0), Value::Double(2.0)]),
        ]);
        let window = decode_window(reply, DecodeMode::Raw);
        assert_eq!(window.scores(), vec![1.0, 2.0]);
    }

    #[test]
    fn skips_malformed_entries() {
        let reply = Value::Array(vec![
            member(1.0),
            score("1.0"),
            member(2.0),
            score("not-a-number"),
            Value::BulkString(b"{broken".to_vec()),
            score("3.0"),
            member(4.0),
            score("inf"),
            member(5.0),
            score("5.0"),
        ]);
        let window = decode_window(reply, DecodeMode::Text);
        assert_eq!(window.scores(), vec![1.0, 5.0]);
        assert_eq!(window.malformed, 3);
    }

    #[test]
    fn dangling_member_is_malformed() {
        let reply = Value::Array(vec![member(1.0), score("1.0"), member(2.0)]);
        let window = decode_window(reply, DecodeMode::Text);
        assert_eq!(window.len(), 1);
        assert_eq!(window.malformed, 1);
    }

    #[test]
    fn empty_reply_is_empty_window() {
        assert_eq!(
            decode_window(Value::Array(Vec::new()), DecodeMode::Text),
            RecentWindow::default()
        );
        assert_eq!(decode_window(Value::Nil, DecodeMode::Text), RecentWindow::default());
    }

    #[test]
    fn text_mode_rejects_non_utf8_members() {
        let reply = Value::Array(vec![Value::BulkString(vec![0xff, 0x00]), score("1.0")]);
        let window = decode_window(reply, DecodeMode::Text);
        assert!(window.is_empty());
        assert_eq!(window.malformed, 1);
    }

    #[test]
    fn endpoint_omits_scheme_details() {
        let connector = RedisConnector::new(RedisSettings {
            host: "cache.internal".to_string(),
            port: 6380,
            transport: Transport::Tls,
            ..RedisSettings::default()
        })
        .unwrap();
        assert_eq!(connector.endpoint(), "tls:cache.internal:6380");

        let connector = RedisConnector::new(RedisSettings {
            host: "/tmp/redis.sock".to_string(),
            transport: Transport::Unix,
            ..RedisSettings::default()
        })
        .unwrap();
        assert_eq!(connector.endpoint(), "unix:/tmp/redis.sock");
    }

    #[tokio::test]
    async fn bounded_reports_timeout() {
        let result = bounded(
            "ZRANGE",
            Duration::from_millis(5),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
        assert!(matches!(
            result,
            Err(StoreError::Timeout {
                operation: "ZRANGE",
                timeout_ms: 5
            })
        ));
    }
}
