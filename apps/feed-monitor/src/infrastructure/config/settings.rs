//! Monitor Configuration Settings
//!
//! Configuration types for the monitor service, loaded from environment
//! variables. Unlike optional tuning knobs elsewhere, a value that is present
//! but unparseable is an error: a silently defaulted threshold would make
//! every health verdict wrong.

use std::str::FromStr;
use std::time::Duration;

/// Store transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Plaintext TCP.
    #[default]
    Tcp,
    /// TLS over TCP.
    Tls,
    /// Local Unix domain socket.
    Unix,
}

impl Transport {
    /// Transport name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "tls",
            Self::Unix => "unix",
        }
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" | "plain" => Ok(Self::Tcp),
            "tls" | "ssl" => Ok(Self::Tls),
            "unix" | "unix-socket" | "socket" => Ok(Self::Unix),
            other => Err(ConfigError::InvalidValue {
                key: "FEED_MONITOR_REDIS_TRANSPORT".to_string(),
                value: other.to_string(),
                reason: "expected tcp, tls, or unix".to_string(),
            }),
        }
    }
}

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    /// Host name, or socket path for [`Transport::Unix`].
    pub host: String,
    /// TCP port (ignored for Unix sockets).
    pub port: u16,
    /// Transport.
    pub transport: Transport,
    /// Present stored members as text (UTF-8 checked) rather than raw bytes.
    pub decode_as_text: bool,
    /// Deadline for any single store call.
    pub command_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            transport: Transport::Tcp,
            decode_as_text: true,
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisSettings {
    /// Connection URL understood by the Redis client.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match self.transport {
            Transport::Tcp => format!("redis://{}:{}", self.host, self.port),
            Transport::Tls => format!("rediss://{}:{}", self.host, self.port),
            Transport::Unix => format!("unix://{}", self.host),
        }
    }
}

/// Staleness monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Symbols to watch.
    pub symbols: Vec<String>,
    /// Series name for continuous channels.
    pub continuous_channel: String,
    /// Series name for discrete channels.
    pub discrete_channel: String,
    /// Exchange identifier used in series keys.
    pub exchange: String,
    /// Samples per continuous evaluation.
    pub sample_window: usize,
    /// Continuous threshold, seconds.
    pub mean_interval_threshold_secs: f64,
    /// Discrete threshold, seconds.
    pub age_threshold_secs: f64,
    /// Pause between passes.
    pub poll_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC-USDT".to_string()],
            continuous_channel: "book".to_string(),
            discrete_channel: "trades".to_string(),
            exchange: "BINANCE".to_string(),
            sample_window: 5,
            mean_interval_threshold_secs: 0.2,
            age_threshold_secs: 10.0,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Growth factor per attempt.
    pub delay_multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
        }
    }
}

/// Series writer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSettings {
    /// Records buffered before the oldest is dropped.
    pub queue_capacity: usize,
    /// Records per flush, at most.
    pub max_batch_size: usize,
    /// Longest a record waits for its batch to fill.
    pub max_batch_wait: Duration,
    /// Attempts per batch before it is dropped.
    pub max_attempts: u32,
    /// Trim each series to this many entries (`None` = unbounded).
    pub trim_to: Option<usize>,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            max_batch_size: 100,
            max_batch_wait: Duration::from_millis(250),
            max_attempts: 5,
            trim_to: None,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Time allowed for tasks to stop after a shutdown signal.
    pub shutdown_grace: Duration,
    /// Read newline-delimited JSON records from stdin and write them to the
    /// store.
    pub ingest_stdin: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            shutdown_grace: Duration::from_secs(5),
            ingest_stdin: false,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMonitorConfig {
    /// Store connection.
    pub redis: RedisSettings,
    /// Staleness monitor.
    pub monitor: MonitorSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Series writer.
    pub writer: WriterSettings,
    /// Server ports and shutdown.
    pub server: ServerSettings,
}

impl FeedMonitorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or any value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let host = env.required("FEED_MONITOR_REDIS_HOST")?;
        let redis_defaults = RedisSettings::default();
        let redis = RedisSettings {
            host,
            port: env.parse("FEED_MONITOR_REDIS_PORT", redis_defaults.port)?,
            transport: env.parse("FEED_MONITOR_REDIS_TRANSPORT", redis_defaults.transport)?,
            decode_as_text: env.flag("FEED_MONITOR_REDIS_DECODE_TEXT", redis_defaults.decode_as_text)?,
            command_timeout: env.millis("FEED_MONITOR_REDIS_TIMEOUT_MS", redis_defaults.command_timeout)?,
        };

        let monitor_defaults = MonitorSettings::default();
        let monitor = MonitorSettings {
            symbols: env
                .get("FEED_MONITOR_SYMBOLS")
                .map_or(monitor_defaults.symbols, |raw| split_list(&raw)),
            continuous_channel: env
                .get("FEED_MONITOR_CONTINUOUS_CHANNEL")
                .unwrap_or(monitor_defaults.continuous_channel),
            discrete_channel: env
                .get("FEED_MONITOR_DISCRETE_CHANNEL")
                .unwrap_or(monitor_defaults.discrete_channel),
            exchange: env
                .get("FEED_MONITOR_EXCHANGE")
                .unwrap_or(monitor_defaults.exchange),
            sample_window: env.parse("FEED_MONITOR_SAMPLE_WINDOW", monitor_defaults.sample_window)?,
            mean_interval_threshold_secs: env.parse(
                "FEED_MONITOR_MEAN_INTERVAL_THRESHOLD_SECS",
                monitor_defaults.mean_interval_threshold_secs,
            )?,
            age_threshold_secs: env.parse(
                "FEED_MONITOR_AGE_THRESHOLD_SECS",
                monitor_defaults.age_threshold_secs,
            )?,
            poll_interval: env.secs_f64("FEED_MONITOR_POLL_INTERVAL_SECS", monitor_defaults.poll_interval)?,
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_initial: env.millis(
                "FEED_MONITOR_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.delay_initial,
            )?,
            delay_max: env.secs_f64(
                "FEED_MONITOR_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            )?,
            delay_multiplier: env.parse(
                "FEED_MONITOR_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.delay_multiplier,
            )?,
        };

        let writer_defaults = WriterSettings::default();
        let trim_to: usize = env.parse("FEED_MONITOR_WRITER_TRIM_TO", 0)?;
        let writer = WriterSettings {
            queue_capacity: env.parse(
                "FEED_MONITOR_WRITER_QUEUE_CAPACITY",
                writer_defaults.queue_capacity,
            )?,
            max_batch_size: env.parse("FEED_MONITOR_WRITER_MAX_BATCH", writer_defaults.max_batch_size)?,
            max_batch_wait: env.millis("FEED_MONITOR_WRITER_MAX_WAIT_MS", writer_defaults.max_batch_wait)?,
            max_attempts: env.parse("FEED_MONITOR_WRITER_MAX_ATTEMPTS", writer_defaults.max_attempts)?,
            trim_to: (trim_to > 0).then_some(trim_to),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            health_port: env.parse("FEED_MONITOR_HEALTH_PORT", server_defaults.health_port)?,
            shutdown_grace: env.secs_f64(
                "FEED_MONITOR_SHUTDOWN_GRACE_SECS",
                server_defaults.shutdown_grace,
            )?,
            ingest_stdin: env.flag("FEED_MONITOR_INGEST_STDIN", server_defaults.ingest_stdin)?,
        };

        let config = Self {
            redis,
            monitor,
            reconnect,
            writer,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field and range constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FEED_MONITOR_REDIS_HOST".to_string()));
        }
        if self.redis.transport != Transport::Unix && self.redis.port == 0 {
            return Err(invalid("FEED_MONITOR_REDIS_PORT", "0", "port must be non-zero"));
        }
        if self.redis.command_timeout.is_zero() {
            return Err(invalid("FEED_MONITOR_REDIS_TIMEOUT_MS", "0", "must be positive"));
        }

        let monitor = &self.monitor;
        if monitor.symbols.is_empty() {
            return Err(ConfigError::EmptyValue("FEED_MONITOR_SYMBOLS".to_string()));
        }
        for (key, value) in [
            ("FEED_MONITOR_EXCHANGE", &monitor.exchange),
            ("FEED_MONITOR_CONTINUOUS_CHANNEL", &monitor.continuous_channel),
            ("FEED_MONITOR_DISCRETE_CHANNEL", &monitor.discrete_channel),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyValue(key.to_string()));
            }
        }
        if monitor.sample_window == 0 {
            return Err(invalid("FEED_MONITOR_SAMPLE_WINDOW", "0", "must be at least 1"));
        }
        positive_finite(
            "FEED_MONITOR_MEAN_INTERVAL_THRESHOLD_SECS",
            monitor.mean_interval_threshold_secs,
        )?;
        positive_finite("FEED_MONITOR_AGE_THRESHOLD_SECS", monitor.age_threshold_secs)?;
        if monitor.poll_interval.is_zero() {
            return Err(invalid("FEED_MONITOR_POLL_INTERVAL_SECS", "0", "must be positive"));
        }

        if self.reconnect.delay_max < self.reconnect.delay_initial {
            return Err(invalid(
                "FEED_MONITOR_RECONNECT_DELAY_MAX_SECS",
                &format!("{:?}", self.reconnect.delay_max),
                "must not be below the initial delay",
            ));
        }
        if !self.reconnect.delay_multiplier.is_finite() || self.reconnect.delay_multiplier < 1.0 {
            return Err(invalid(
                "FEED_MONITOR_RECONNECT_DELAY_MULTIPLIER",
                &self.reconnect.delay_multiplier.to_string(),
                "must be at least 1.0",
            ));
        }

        if self.writer.queue_capacity == 0 {
            return Err(invalid("FEED_MONITOR_WRITER_QUEUE_CAPACITY", "0", "must be positive"));
        }
        if self.writer.max_batch_size == 0 {
            return Err(invalid("FEED_MONITOR_WRITER_MAX_BATCH", "0", "must be positive"));
        }
        if self.writer.max_attempts == 0 {
            return Err(invalid("FEED_MONITOR_WRITER_MAX_ATTEMPTS", "0", "must be positive"));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Constraint violated.
        reason: String,
    },
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn positive_finite(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(key, &value.to_string(), "must be a positive number"))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.trim().to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(invalid(key, &v, "expected a boolean")),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| invalid(key, &raw, &e.to_string()))
        })
    }

    fn secs_f64(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |raw| {
            let secs: f64 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| invalid(key, &raw, &e.to_string()))?;
            Duration::try_from_secs_f64(secs)
                .map_err(|e| invalid(key, &raw, &e.to_string()))
        })
    }
}
