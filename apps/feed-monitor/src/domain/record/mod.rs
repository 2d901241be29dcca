//! Update Records and Channel Keys
//!
//! An update record is one time-stamped event from the feed handler. Records
//! are written into per-channel ordered series addressed by a [`ChannelKey`].
//!
//! The member stored in a series is the JSON encoding of the record. Field
//! order is fixed by the struct definition, so two logically identical records
//! always encode to identical bytes and collapse into one series member.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Channel Kind
// =============================================================================

/// Update cadence class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    /// Short, roughly even intervals (order-book deltas).
    Continuous,
    /// Infrequent, irregular events (trades).
    Discrete,
}

impl ChannelKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Discrete => "discrete",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Series name prefix for each channel kind.
///
/// The feed handler writes order-book deltas under `book-…` and trades under
/// `trades-…`; both are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    /// Name used for continuous channels.
    pub continuous: String,
    /// Name used for discrete channels.
    pub discrete: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            continuous: "book".to_string(),
            discrete: "trades".to_string(),
        }
    }
}

impl ChannelNames {
    /// Create channel names.
    #[must_use]
    pub fn new(continuous: impl Into<String>, discrete: impl Into<String>) -> Self {
        Self {
            continuous: continuous.into(),
            discrete: discrete.into(),
        }
    }

    /// Name for the given kind.
    #[must_use]
    pub fn name_for(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Continuous => &self.continuous,
            ChannelKind::Discrete => &self.discrete,
        }
    }

    /// Key of the series holding `record`.
    #[must_use]
    pub fn key_for(&self, record: &UpdateRecord) -> ChannelKey {
        ChannelKey::new(
            self.name_for(record.channel_kind),
            &record.exchange,
            &record.symbol,
        )
    }
}

// =============================================================================
// Channel Key
// =============================================================================

/// Key of one ordered series: `<channel name>-<exchange>-<symbol>`.
///
/// Case-sensitive. Symbols may themselves contain dashes (`BTC-USDT`), so the
/// key is never parsed back into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Build a key from its parts.
    #[must_use]
    pub fn new(channel_name: &str, exchange: &str, symbol: &str) -> Self {
        Self(format!("{channel_name}-{exchange}-{symbol}"))
    }

    /// The key as sent to the store.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Update Record
// =============================================================================

/// How stored members are presented when read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Members must be valid UTF-8 text before they are decoded.
    #[default]
    Text,
    /// Members are decoded straight from raw bytes.
    Raw,
}

impl DecodeMode {
    /// Map the `decode_as_text` connection flag to a mode.
    #[must_use]
    pub const fn from_text_flag(decode_as_text: bool) -> Self {
        if decode_as_text { Self::Text } else { Self::Raw }
    }
}

/// One time-stamped update from the feed handler.
///
/// Immutable once written. `payload` carries the feed handler's serialized
/// body verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Exchange identifier, e.g. `BINANCE`.
    pub exchange: String,
    /// Instrument symbol, e.g. `BTC-USDT`.
    pub symbol: String,
    /// Cadence class of the channel this record belongs to.
    pub channel_kind: ChannelKind,
    /// Exchange event time, seconds since the Unix epoch (UTC). Used as score.
    pub timestamp: f64,
    /// Local receipt time, seconds since the Unix epoch (UTC).
    pub receipt_timestamp: f64,
    /// Opaque serialized payload.
    pub payload: String,
}

impl UpdateRecord {
    /// Create a record.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        channel_kind: ChannelKind,
        timestamp: f64,
        receipt_timestamp: f64,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            channel_kind,
            timestamp,
            receipt_timestamp,
            payload: payload.into(),
        }
    }

    /// Stable member encoding.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::NonFiniteTimestamp` for NaN or infinite
    /// timestamps, which JSON cannot represent.
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        if !self.timestamp.is_finite() || !self.receipt_timestamp.is_finite() {
            return Err(RecordError::NonFiniteTimestamp);
        }
        serde_json::to_vec(self).map_err(|e| RecordError::Encode(e.to_string()))
    }

    /// Decode a stored member.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::NotText` when `mode` is [`DecodeMode::Text`] and
    /// the member is not UTF-8, or `RecordError::Decode` when the member is not
    /// a valid record.
    pub fn decode(bytes: &[u8], mode: DecodeMode) -> Result<Self, RecordError> {
        match mode {
            DecodeMode::Text => {
                let text = std::str::from_utf8(bytes).map_err(|_| RecordError::NotText)?;
                serde_json::from_str(text).map_err(|e| RecordError::Decode(e.to_string()))
            }
            DecodeMode::Raw => {
                serde_json::from_slice(bytes).map_err(|e| RecordError::Decode(e.to_string()))
            }
        }
    }
}

/// Record encoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Timestamp is NaN or infinite.
    #[error("record timestamp is not finite")]
    NonFiniteTimestamp,
    /// Serialization failed.
    #[error("failed to encode record: {0}")]
    Encode(String),
    /// Member is not UTF-8 text.
    #[error("stored member is not valid UTF-8")]
    NotText,
    /// Member is not a valid record.
    #[error("failed to decode record: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(timestamp: f64, payload: &str) -> UpdateRecord {
        UpdateRecord::new(
            "BINANCE",
            "BTC-USDT",
            ChannelKind::Discrete,
            timestamp,
            timestamp + 0.01,
            payload,
        )
    }

    #[test]
    fn channel_key_format() {
        let key = ChannelKey::new("book", "BINANCE", "BTC-USDT");
        assert_eq!(key.as_str(), "book-BINANCE-BTC-USDT");
        assert_eq!(key.to_string(), "book-BINANCE-BTC-USDT");
    }

    #[test]
    fn channel_key_is_case_sensitive() {
        let upper = ChannelKey::new("book", "BINANCE", "BTC-USDT");
        let lower = ChannelKey::new("book", "binance", "BTC-USDT");
        assert_ne!(upper, lower);
    }

    #[test]
    fn names_map_kind_to_key() {
        let names = ChannelNames::default();
        let record = trade(1.0, "{}");
        assert_eq!(names.key_for(&record).as_str(), "trades-BINANCE-BTC-USDT");

        let custom = ChannelNames::new("l2", "fills");
        assert_eq!(custom.name_for(ChannelKind::Continuous), "l2");
        assert_eq!(custom.key_for(&record).as_str(), "fills-BINANCE-BTC-USDT");
    }

    #[test]
    fn identical_records_encode_identically() {
        let a = trade(1_700_000_000.125, r#"{"price":"42000.5"}"#);
        let b = a.clone();
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn distinct_payloads_encode_differently() {
        let a = trade(1_700_000_000.125, r#"{"id":1}"#);
        let b = trade(1_700_000_000.125, r#"{"id":2}"#);
        assert_ne!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn decode_in_both_modes() {
        let record = trade(1_700_000_000.5, r#"{"side":"buy"}"#);
        let bytes = record.encode().unwrap();
        assert_eq!(UpdateRecord::decode(&bytes, DecodeMode::Text).unwrap(), record);
        assert_eq!(UpdateRecord::decode(&bytes, DecodeMode::Raw).unwrap(), record);
    }

    #[test]
    fn text_mode_rejects_non_utf8() {
        let bytes = [0xff, 0xfe, 0x00];
        assert_eq!(
            UpdateRecord::decode(&bytes, DecodeMode::Text),
            Err(RecordError::NotText)
        );
        assert!(matches!(
            UpdateRecord::decode(&bytes, DecodeMode::Raw),
            Err(RecordError::Decode(_))
        ));
    }

    #[test]
    fn non_finite_timestamp_is_rejected() {
        let record = trade(f64::NAN, "{}");
        assert_eq!(record.encode(), Err(RecordError::NonFiniteTimestamp));
    }

    #[test]
    fn kind_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&ChannelKind::Continuous).unwrap(),
            "\"CONTINUOUS\""
        );
        assert_eq!(
            serde_json::to_string(&ChannelKind::Discrete).unwrap(),
            "\"DISCRETE\""
        );
    }

    #[test]
    fn decode_mode_from_flag() {
        assert_eq!(DecodeMode::from_text_flag(true), DecodeMode::Text);
        assert_eq!(DecodeMode::from_text_flag(false), DecodeMode::Raw);
    }
}
