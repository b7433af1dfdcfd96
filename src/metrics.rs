//! Production observability metrics for the repository miner
//!
//! This module provides metrics collection for monitoring request volume,
//! rate-limit recovery (rotations and waits), quota headroom, and job progress.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint, installed only with `--metrics-addr`
//! - Without an installed recorder every call is a no-op

use crate::quota::{format_reset, QuotaState};
use crate::{EntityType, Provider};
use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Remaining-quota ratio below which a warning is logged.
pub const LOW_QUOTA_RATIO: f64 = 0.10;

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are ignored.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(MetricsError::Install(e.to_string()));
    }

    describe_counter!(
        "miner_http_requests_total",
        Unit::Count,
        "Total number of API requests sent"
    );
    describe_histogram!(
        "miner_http_request_duration_seconds",
        Unit::Seconds,
        "API request duration in seconds"
    );
    describe_counter!(
        "miner_rate_limit_events_total",
        Unit::Count,
        "Rate-limit exhaustion events by guard decision"
    );
    describe_counter!(
        "miner_credential_rotations_total",
        Unit::Count,
        "Active credential switches"
    );
    describe_histogram!(
        "miner_rate_limit_wait_seconds",
        Unit::Seconds,
        "Time slept waiting for quota resets"
    );
    describe_gauge!(
        "miner_quota_remaining",
        Unit::Count,
        "Remaining quota of the active credential per bucket"
    );
    describe_counter!(
        "miner_windows_completed_total",
        Unit::Count,
        "Date windows fully persisted and checkpointed"
    );
    describe_counter!(
        "miner_records_upserted_total",
        Unit::Count,
        "Records handed to the store"
    );
    describe_counter!(
        "miner_jobs_completed_total",
        Unit::Count,
        "Collection jobs finished successfully"
    );
    describe_counter!(
        "miner_jobs_failed_total",
        Unit::Count,
        "Collection jobs that failed"
    );

    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    provider: Provider,
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(provider: Provider, endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting API request"
        );

        Self {
            provider,
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "miner_http_requests_total",
            "provider" => self.provider.as_str(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "miner_http_request_duration_seconds",
            "provider" => self.provider.as_str(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "API request completed"
        );
    }

    /// Record a transport error (no status code)
    pub fn record_transport_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "miner_http_requests_total",
            "provider" => self.provider.as_str(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "miner_http_request_duration_seconds",
            "provider" => self.provider.as_str(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Publish remaining quota and warn when it runs low.
pub fn record_quota(provider: Provider, state: &QuotaState, now: DateTime<Utc>, offset: FixedOffset) {
    gauge!(
        "miner_quota_remaining",
        "provider" => provider.as_str(),
        "bucket" => state.bucket,
    )
    .set(state.remaining as f64);

    if state.limit > 0 && state.remaining_ratio() < LOW_QUOTA_RATIO {
        warn!(
            provider = %provider,
            bucket = state.bucket,
            remaining = state.remaining,
            limit = state.limit,
            reset = %format_reset(state, now, offset),
            "Quota below 10% of limit"
        );
    }
}

/// Count one rate-limit event and the guard's decision.
pub fn record_rate_limit_event(provider: Provider, bucket: &'static str, decision: &'static str) {
    counter!(
        "miner_rate_limit_events_total",
        "provider" => provider.as_str(),
        "bucket" => bucket,
        "decision" => decision,
    )
    .increment(1);
}

/// Record time slept waiting for a quota reset.
pub fn record_rate_limit_wait(provider: Provider, bucket: &'static str, waited: Duration) {
    histogram!(
        "miner_rate_limit_wait_seconds",
        "provider" => provider.as_str(),
        "bucket" => bucket,
    )
    .record(waited.as_secs_f64());
}

/// Count an active credential switch.
pub fn record_credential_rotation(provider: Provider) {
    counter!("miner_credential_rotations_total", "provider" => provider.as_str()).increment(1);
}

/// Count a checkpointed window and the records it upserted.
pub fn record_window_completed(provider: Provider, entity: EntityType, records: u64) {
    counter!(
        "miner_windows_completed_total",
        "provider" => provider.as_str(),
        "entity" => entity.as_str(),
    )
    .increment(1);
    counter!(
        "miner_records_upserted_total",
        "provider" => provider.as_str(),
        "entity" => entity.as_str(),
    )
    .increment(records);
}

/// Collection job metrics
pub struct JobMetrics {
    job_id: String,
    start_time: Instant,
}

impl JobMetrics {
    /// Start tracking a job
    pub fn start(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        info!(job_id = %job_id, "Collection job started");
        Self {
            job_id,
            start_time: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn record_success(&self, records: u64) {
        counter!("miner_jobs_completed_total").increment(1);
        info!(
            job_id = %self.job_id,
            records,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Collection job completed successfully"
        );
    }

    /// Record failure with its error classification
    pub fn record_failure(&self, error_type: &str, message: &str) {
        counter!("miner_jobs_failed_total", "error_type" => error_type.to_string()).increment(1);
        error!(
            job_id = %self.job_id,
            error_type = %error_type,
            error = %message,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Collection job failed"
        );
    }
}
