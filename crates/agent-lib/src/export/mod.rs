//! Metric export
//!
//! The export loop samples the worker pool on a fixed cadence and hands each
//! batch of points to a publisher, or renders it as a table in dry-run mode.

mod cloudwatch;
mod r#loop;
mod preview;


pub use cloudwatch::CloudWatchPublisher;
pub use preview::{render_table, PreviewSink, TablePreview};
pub use r#loop::{
    next_sleep, ExportLoop, ExportLoopBuilder, ExportSink, IterationOutcome, StopFlag,
    DEFAULT_ERROR_BACKOFF, MIN_SLEEP,
};

use crate::models::MetricPoint;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a publisher
#[derive(Debug, Error)]
pub enum PublishError {
    /// The backend call failed
    #[error("publish request failed: {0}")]
    Request(String),
}

/// Fatal configuration problems detected before the loop starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("metric namespace must not be empty")]
    MissingNamespace,

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Destination for metric batches
#[async_trait]
pub trait MetricsPublisher: Send + Sync {
    /// Publish one iteration's batch in a single call
    async fn publish(&self, namespace: &str, points: &[MetricPoint]) -> Result<(), PublishError>;
}
