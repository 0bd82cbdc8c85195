//! Observability infrastructure for the status agent
//!
//! Provides:
//! - Prometheus self-metrics (samples, errors, iteration latency, capacity)
//! - Structured JSON lifecycle logging with tracing

use crate::models::{IdentityContext, ResolutionConfig};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::info;

/// Histogram buckets for iteration latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    iteration_latency_seconds: Histogram,
    samples_total: IntCounter,
    sample_errors_total: IntCounterVec,
    points_published_total: IntCounter,
    publish_errors_total: IntCounter,
    max_children: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            iteration_latency_seconds: register_histogram!(
                "status_agent_iteration_latency_seconds",
                "Time spent sampling and publishing in one iteration",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register iteration_latency_seconds"),

            samples_total: register_int_counter!(
                "status_agent_samples_total",
                "Successful status samples"
            )
            .expect("Failed to register samples_total"),

            sample_errors_total: register_int_counter_vec!(
                "status_agent_sample_errors_total",
                "Failed status samples by kind",
                &["kind"]
            )
            .expect("Failed to register sample_errors_total"),

            points_published_total: register_int_counter!(
                "status_agent_points_published_total",
                "Metric points handed to the publisher"
            )
            .expect("Failed to register points_published_total"),

            publish_errors_total: register_int_counter!(
                "status_agent_publish_errors_total",
                "Failed publish calls"
            )
            .expect("Failed to register publish_errors_total"),

            max_children: register_int_gauge!(
                "status_agent_max_children",
                "Computed maximum worker count"
            )
            .expect("Failed to register max_children"),
        }
    }
}

/// Handle to the global agent metrics.
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_iteration_latency(&self, duration_secs: f64) {
        self.inner().iteration_latency_seconds.observe(duration_secs);
    }

    pub fn inc_samples(&self) {
        self.inner().samples_total.inc();
    }

    /// Count a failed sample under `kind` (`decode` or `transport`)
    pub fn inc_sample_errors(&self, kind: &str) {
        self.inner()
            .sample_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn add_points_published(&self, count: u64) {
        self.inner().points_published_total.inc_by(count);
    }

    pub fn inc_publish_errors(&self) {
        self.inner().publish_errors_total.inc();
    }

    pub fn set_max_children(&self, capacity: u64) {
        self.inner()
            .max_children
            .set(i64::try_from(capacity).unwrap_or(i64::MAX));
    }
}

/// Structured logger for agent lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    endpoint: String,
}

impl StructuredLogger {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Log agent startup with the constants the loop will run with
    pub fn log_startup(
        &self,
        version: &str,
        identity: &IdentityContext,
        capacity: u64,
        resolution: &ResolutionConfig,
        dry_run: bool,
    ) {
        info!(
            event = "agent_started",
            endpoint = %self.endpoint,
            agent_version = %version,
            cluster = %identity.cluster_name(),
            service = %identity.task_name,
            task = ?identity.task_short_id(),
            max_children = capacity,
            resolution_secs = resolution.requested_seconds,
            storage_resolution = resolution.storage_resolution.seconds(),
            dry_run = dry_run,
            "Status agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            endpoint = %self.endpoint,
            reason = %reason,
            "Status agent shutting down"
        );
    }
}
