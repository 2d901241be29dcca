//! Prometheus Instrumentation
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs the Prometheus recorder. The
//! rendered text is served at `/metrics` by the status endpoint.

use std::sync::OnceLock;

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::record::ChannelKind;
use crate::domain::staleness::ChannelStatus;

const EVALUATIONS: &str = "feed_monitor_evaluations_total";
const MEAN_INTERVAL: &str = "feed_monitor_mean_interval_seconds";
const UPDATE_AGE: &str = "feed_monitor_update_age_seconds";
const MALFORMED: &str = "feed_monitor_malformed_entries_total";
const STORE_CONNECTED: &str = "feed_monitor_store_connected";
const RECONNECT_ATTEMPTS: &str = "feed_monitor_reconnect_attempts_total";
const BATCHES: &str = "feed_monitor_writer_batches_total";
const RECORDS: &str = "feed_monitor_writer_records_total";
const RECORDS_LOST: &str = "feed_monitor_writer_records_lost_total";
const QUEUE_DROPPED: &str = "feed_monitor_writer_queue_dropped_total";

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder and describe every metric.
///
/// Idempotent. Returns `None` when another recorder already owns the
/// `metrics` facade; recording then goes to that recorder instead.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe();
            Some(HANDLE.get_or_init(|| handle).clone())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

/// Handle for rendering, once [`init_metrics`] has succeeded.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    HANDLE.get().cloned()
}

fn describe() {
    describe_counter!(EVALUATIONS, "Channel verdicts, labelled by kind and status");
    describe_histogram!(
        MEAN_INTERVAL,
        Unit::Seconds,
        "Mean inter-arrival time of continuous channels, evaluation instant included"
    );
    describe_histogram!(UPDATE_AGE, Unit::Seconds, "Age of the newest discrete update");
    describe_counter!(MALFORMED, "Series entries skipped because they did not decode");
    describe_gauge!(STORE_CONNECTED, "1 while the monitor holds a store connection");
    describe_counter!(RECONNECT_ATTEMPTS, "Failed monitor connection attempts");
    describe_counter!(BATCHES, "Per-series pipelines written");
    describe_counter!(RECORDS, "Records written, labelled inserted or duplicate");
    describe_counter!(RECORDS_LOST, "Records given up on after the last write attempt");
    describe_counter!(QUEUE_DROPPED, "Records evicted from a full writer queue");
}

/// Count one channel verdict.
pub fn record_evaluation(kind: ChannelKind, status: ChannelStatus) {
    counter!(EVALUATIONS, "kind" => kind.as_str(), "status" => status.as_str()).increment(1);
}

/// Observe a continuous channel's mean interval.
pub fn record_mean_interval(seconds: f64) {
    histogram!(MEAN_INTERVAL).record(seconds);
}

/// Observe a discrete channel's update age.
pub fn record_update_age(seconds: f64) {
    histogram!(UPDATE_AGE).record(seconds);
}

/// Count entries skipped during a read.
pub fn record_malformed(count: u64) {
    counter!(MALFORMED).increment(count);
}

/// Flip the connection gauge.
pub fn set_monitor_connected(connected: bool) {
    gauge!(STORE_CONNECTED).set(f64::from(u8::from(connected)));
}

/// Count a failed connection attempt.
pub fn record_reconnect_attempt() {
    counter!(RECONNECT_ATTEMPTS).increment(1);
}

/// Count one written pipeline and its per-record outcomes.
pub fn record_batch_written(inserted: u64, duplicates: u64) {
    counter!(BATCHES).increment(1);
    counter!(RECORDS, "outcome" => "inserted").increment(inserted);
    counter!(RECORDS, "outcome" => "duplicate").increment(duplicates);
}

/// Count records lost after retries ran out.
pub fn record_records_lost(count: u64) {
    counter!(RECORDS_LOST).increment(count);
}

/// Count one queue eviction.
pub fn record_queue_drop() {
    counter!(QUEUE_DROPPED).increment(1);
}
