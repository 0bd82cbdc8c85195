//! Metric point construction
//!
//! Maps a status snapshot plus the identity context into CloudWatch data
//! points. Each metric is published per service and, under ECS, per task.

use crate::models::{
    Dimension, IdentityContext, MetricPoint, ResolutionConfig, StatusSnapshot,
};
use serde::Serialize;
use tabled::Tabled;

pub const LISTEN_QUEUE: &str = "ListenQueue";
pub const LISTEN_QUEUE_LEN: &str = "ListenQueueLen";
pub const MAX_PROCESSES: &str = "MaxProcesses";
pub const IDLE_PROCESSES: &str = "IdleProcesses";
pub const ACTIVE_PROCESSES: &str = "ActiveProcesses";

/// Metric names in publish order
pub const METRIC_NAMES: [&str; 5] = [
    LISTEN_QUEUE,
    LISTEN_QUEUE_LEN,
    MAX_PROCESSES,
    IDLE_PROCESSES,
    ACTIVE_PROCESSES,
];

/// Dimension names
pub mod dimensions {
    pub const CLUSTER_NAME: &str = "ClusterName";
    pub const SERVICE_NAME: &str = "ServiceName";
    pub const TASK: &str = "Task";
}

/// CloudWatch unit for all published metrics
pub const UNIT_NONE: &str = "None";

/// The five named values in publish order
fn named_values(snapshot: &StatusSnapshot, capacity: u64) -> [(&'static str, u64); 5] {
    [
        (LISTEN_QUEUE, snapshot.listen_queue),
        (LISTEN_QUEUE_LEN, snapshot.listen_queue_len),
        (MAX_PROCESSES, capacity),
        (IDLE_PROCESSES, snapshot.idle_processes),
        (ACTIVE_PROCESSES, snapshot.active_processes),
    ]
}

/// Build the data points for one sample.
///
/// Returns 5 points without a task id and 10 with one; for each metric the
/// task-scoped point comes before the service-scoped one.
pub fn build(
    snapshot: &StatusSnapshot,
    identity: &IdentityContext,
    capacity: u64,
    resolution: &ResolutionConfig,
    timestamp_secs: i64,
) -> Vec<MetricPoint> {
    let cluster_name = identity.cluster_name();
    let task = identity.task_short_id();

    let service_dims = vec![
        Dimension::new(dimensions::CLUSTER_NAME, cluster_name),
        Dimension::new(dimensions::SERVICE_NAME, identity.task_name.as_str()),
    ];

    let mut points = Vec::with_capacity(if task.is_some() { 10 } else { 5 });

    for (name, value) in named_values(snapshot, capacity) {
        let point = |dimensions: Vec<Dimension>| MetricPoint {
            name: name.to_string(),
            value: value as f64,
            unit: UNIT_NONE.to_string(),
            timestamp_secs,
            storage_resolution: resolution.storage_resolution,
            dimensions,
        };

        if let Some(task) = task {
            let mut task_dims = service_dims.clone();
            task_dims.push(Dimension::new(dimensions::TASK, task));
            points.push(point(task_dims));
        }

        points.push(point(service_dims.clone()));
    }

    points
}

/// One row of the dry-run preview table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct PreviewRow {
    #[tabled(rename = "ClusterName")]
    pub cluster_name: String,
    #[tabled(rename = "ServiceName")]
    pub service_name: String,
    #[tabled(rename = "MetricsName")]
    pub metric_name: String,
    #[tabled(rename = "Value")]
    pub value: u64,
}

/// Rows for the dry-run preview; no timestamps or task dimensions
pub fn preview_rows(
    snapshot: &StatusSnapshot,
    identity: &IdentityContext,
    capacity: u64,
) -> Vec<PreviewRow> {
    named_values(snapshot, capacity)
        .into_iter()
        .map(|(name, value)| PreviewRow {
            cluster_name: identity.cluster_name().to_string(),
            service_name: identity.task_name.clone(),
            metric_name: name.to_string(),
            value,
        })
        .collect()
}
