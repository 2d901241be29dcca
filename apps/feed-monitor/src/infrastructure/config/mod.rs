//! Configuration Module
//!
//! Configuration loading for the monitor service.

mod settings;

pub use settings::{
    ConfigError, FeedMonitorConfig, MonitorSettings, ReconnectSettings, RedisSettings,
    ServerSettings, Transport, WriterSettings,
};
