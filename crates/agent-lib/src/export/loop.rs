//! Export loop
//!
//! Samples the worker pool, builds metric points and publishes them on a
//! drift-corrected cadence. Failures shorten the next wait and are retried
//! until the loop is stopped.

use super::{ConfigError, MetricsPublisher, PreviewSink};
use crate::health::{components, HealthRegistry};
use crate::metrics;
use crate::models::{IdentityContext, ResolutionConfig};
use crate::observability::AgentMetrics;
use crate::sampler::{SampleError, StatusSampler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Wait after a failed iteration, regardless of the configured cadence
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(2000);

/// Shortest wait between iterations
pub const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Cooperative stop signal shared between the signal handler and the loop.
///
/// The handler is the only writer; the loop reads the flag at iteration
/// boundaries. `Notify` only cuts the cadence sleep short.
#[derive(Debug, Default)]
pub struct StopFlag {
    stopped: AtomicBool,
    wake: Notify,
}

impl StopFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Request a graceful stop
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sleep for `duration` or until a stop is requested
    pub async fn sleep(&self, duration: Duration) {
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// Where successful samples go
#[derive(Clone)]
pub enum ExportSink {
    /// Build points and publish them under `namespace`
    Publish {
        namespace: String,
        publisher: Arc<dyn MetricsPublisher>,
    },
    /// Render the values only; nothing leaves the process
    Preview(Arc<dyn PreviewSink>),
}

/// What one iteration did
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Published { points: usize },
    Previewed,
    SampleFailed(SampleError),
    PublishFailed(String),
}

impl IterationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            IterationOutcome::SampleFailed(_) | IterationOutcome::PublishFailed(_)
        )
    }
}

/// Wait before the next iteration.
///
/// Successful iterations subtract their own cost from the poll period so
/// samples stay on an even cadence; failures wait exactly `error_backoff`.
pub fn next_sleep(
    outcome: &IterationOutcome,
    elapsed: Duration,
    poll_period: Duration,
    error_backoff: Duration,
) -> Duration {
    if outcome.is_failure() {
        return error_backoff;
    }
    poll_period.saturating_sub(elapsed).max(MIN_SLEEP)
}

/// The sampling and export loop
pub struct ExportLoop {
    sampler: Arc<dyn StatusSampler>,
    sink: ExportSink,
    identity: IdentityContext,
    capacity: u64,
    resolution: ResolutionConfig,
    error_backoff: Duration,
    stop: Arc<StopFlag>,
    health: HealthRegistry,
    metrics: AgentMetrics,
}

impl ExportLoop {
    /// Run until the stop flag is set; returns the number of iterations
    pub async fn run(self) -> u64 {
        info!(
            interval_ms = self.resolution.poll_period.as_millis() as u64,
            storage_resolution = self.resolution.storage_resolution.seconds(),
            preview = matches!(self.sink, ExportSink::Preview(_)),
            "Starting export loop"
        );

        let mut iterations = 0u64;

        while !self.stop.is_stopped() {
            let start = Instant::now();
            let outcome = self.run_iteration().await;
            let elapsed = start.elapsed();
            iterations += 1;

            self.metrics.observe_iteration_latency(elapsed.as_secs_f64());

            let wait = next_sleep(
                &outcome,
                elapsed,
                self.resolution.poll_period,
                self.error_backoff,
            );
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                sleep_ms = wait.as_millis() as u64,
                failed = outcome.is_failure(),
                "Iteration complete"
            );

            if self.stop.is_stopped() {
                break;
            }
            self.stop.sleep(wait).await;
        }

        info!(iterations = iterations, "Export loop stopped");
        iterations
    }

    /// Sample once and hand the result to the sink.
    ///
    /// Everything created here (connection, snapshot, points) is dropped
    /// before returning.
    pub async fn run_iteration(&self) -> IterationOutcome {
        let snapshot = match self.sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.report_sample_error(&err).await;
                return IterationOutcome::SampleFailed(err);
            }
        };

        self.metrics.inc_samples();
        self.health.record_success(components::SAMPLER).await;

        match &self.sink {
            ExportSink::Preview(preview) => {
                let rows = metrics::preview_rows(&snapshot, &self.identity, self.capacity);
                preview.render(&rows);
                IterationOutcome::Previewed
            }
            ExportSink::Publish {
                namespace,
                publisher,
            } => {
                let timestamp = chrono::Utc::now().timestamp();
                let points = metrics::build(
                    &snapshot,
                    &self.identity,
                    self.capacity,
                    &self.resolution,
                    timestamp,
                );

                match publisher.publish(namespace, &points).await {
                    Ok(()) => {
                        self.metrics.add_points_published(points.len() as u64);
                        self.health.record_success(components::PUBLISHER).await;
                        IterationOutcome::Published {
                            points: points.len(),
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            namespace = %namespace,
                            points = points.len(),
                            "Error while publishing metrics"
                        );
                        self.metrics.inc_publish_errors();
                        self.health
                            .record_failure(components::PUBLISHER, e.to_string())
                            .await;
                        IterationOutcome::PublishFailed(e.to_string())
                    }
                }
            }
        }
    }

    async fn report_sample_error(&self, err: &SampleError) {
        match err {
            SampleError::Decode { detail, body } => {
                warn!(
                    error = %detail,
                    response_body = %body,
                    "Error decoding php fpm status"
                );
            }
            SampleError::Transport(detail) => {
                warn!(error = %detail, "Error while retrieving php fpm status");
            }
        }

        self.metrics.inc_sample_errors(err.kind());
        self.health
            .record_failure(components::SAMPLER, err.to_string())
            .await;
    }

    pub fn stop_flag(&self) -> Arc<StopFlag> {
        self.stop.clone()
    }
}

/// Builder for the export loop
pub struct ExportLoopBuilder {
    sampler: Option<Arc<dyn StatusSampler>>,
    sink: Option<ExportSink>,
    identity: Option<IdentityContext>,
    capacity: Option<u64>,
    resolution: Option<ResolutionConfig>,
    error_backoff: Duration,
    stop: Option<Arc<StopFlag>>,
    health: Option<HealthRegistry>,
}

impl ExportLoopBuilder {
    pub fn new() -> Self {
        Self {
            sampler: None,
            sink: None,
            identity: None,
            capacity: None,
            resolution: None,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            stop: None,
            health: None,
        }
    }

    pub fn sampler(mut self, sampler: Arc<dyn StatusSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Publish each batch under `namespace`
    pub fn publisher(
        mut self,
        namespace: impl Into<String>,
        publisher: Arc<dyn MetricsPublisher>,
    ) -> Self {
        self.sink = Some(ExportSink::Publish {
            namespace: namespace.into(),
            publisher,
        });
        self
    }

    /// Render values instead of publishing (dry run)
    pub fn preview(mut self, preview: Arc<dyn PreviewSink>) -> Self {
        self.sink = Some(ExportSink::Preview(preview));
        self
    }

    pub fn identity(mut self, identity: IdentityContext) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn stop_flag(mut self, stop: Arc<StopFlag>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<ExportLoop, ConfigError> {
        let sampler = self.sampler.ok_or(ConfigError::Missing("sampler"))?;
        let sink = self.sink.ok_or(ConfigError::Missing("sink"))?;

        if let ExportSink::Publish { namespace, .. } = &sink {
            if namespace.trim().is_empty() {
                return Err(ConfigError::MissingNamespace);
            }
        }

        Ok(ExportLoop {
            sampler,
            sink,
            identity: self.identity.ok_or(ConfigError::Missing("identity"))?,
            capacity: self.capacity.ok_or(ConfigError::Missing("capacity"))?,
            resolution: self.resolution.ok_or(ConfigError::Missing("resolution"))?,
            error_backoff: self.error_backoff,
            stop: self.stop.unwrap_or_else(StopFlag::new),
            health: self.health.unwrap_or_default(),
            metrics: AgentMetrics::new(),
        })
    }
}

impl Default for ExportLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
