//! Logging and Tracing Setup
//!
//! One global subscriber: `RUST_LOG` filtering, a console formatter, and an
//! OTLP span exporter when `OTEL_ENABLED` is set. An exporter that cannot be
//! built degrades to console-only output instead of failing startup.
//!
//! | Variable                      | Default                 |
//! |-------------------------------|-------------------------|
//! | `OTEL_ENABLED`                | `false`                 |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` |
//! | `OTEL_SERVICE_NAME`           | `feed-monitor`          |
//! | `FEED_MONITOR_LOG_ANSI`       | `true`                  |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Added to whatever `RUST_LOG` says. Quiets client internals.
const BASELINE_DIRECTIVES: [&str; 4] = ["feed_monitor=info", "redis=warn", "h2=warn", "hyper=warn"];

/// Flushes and stops span export when dropped. Hold it until `main` returns.
#[must_use = "dropping the guard stops span export"]
pub struct TelemetryGuard(Option<SdkTracerProvider>);

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.0.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("span exporter shutdown failed: {e}");
        }
    }
}

/// Subscriber options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP/gRPC.
    pub otlp_enabled: bool,
    /// Collector address.
    pub otlp_endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// ANSI colors in console output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: env!("CARGO_PKG_NAME").to_string(),
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Read options from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`; unset keys keep their defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = |key: &str| {
            lookup(key).map(|raw| {
                matches!(
                    raw.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
        };

        let mut config = Self::default();
        if let Some(on) = enabled("OTEL_ENABLED") {
            config.otlp_enabled = on;
        }
        if let Some(on) = enabled("FEED_MONITOR_LOG_ANSI") {
            config.ansi = on;
        }
        if let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = endpoint;
        }
        if let Some(name) = lookup("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        config
    }
}

/// Install the global subscriber configured from the environment.
pub fn init() -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the global subscriber with explicit options.
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let (provider, export_error) = if config.otlp_enabled {
        match span_provider(config) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(log_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi)
                .with_target(true),
        )
        .with(otel_layer)
        .init();

    if let Some(e) = export_error {
        tracing::error!(
            endpoint = %config.otlp_endpoint,
            error = %e,
            "Span export disabled, OTLP exporter could not be built"
        );
    } else if provider.is_some() {
        tracing::debug!(endpoint = %config.otlp_endpoint, "Exporting spans over OTLP");
    }

    TelemetryGuard(provider)
}

fn span_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, String> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| e.to_string())?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}

fn log_filter() -> EnvFilter {
    BASELINE_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}
