//! Core data models for the status agent

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pool status as reported by the FPM status page (`?json&full`)
///
/// Only the saturation fields are kept; the rest of the document is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "listen queue")]
    pub listen_queue: u64,
    #[serde(rename = "listen queue len")]
    pub listen_queue_len: u64,
    #[serde(rename = "idle processes")]
    pub idle_processes: u64,
    #[serde(rename = "active processes")]
    pub active_processes: u64,
}

/// Where the agent runs: cluster, service and (under ECS) task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    /// Cluster name or full cluster ARN
    pub cluster: String,
    /// Task ARN, only known when running under ECS
    pub task_id: Option<String>,
    /// Service name used for the `ServiceName` dimension
    pub task_name: String,
}

impl IdentityContext {
    pub fn new(
        cluster: impl Into<String>,
        task_id: Option<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            task_id,
            task_name: task_name.into(),
        }
    }

    /// Cluster name with any ARN prefix removed
    pub fn cluster_name(&self) -> &str {
        last_segment(&self.cluster)
    }

    /// Task id with any ARN prefix removed
    pub fn task_short_id(&self) -> Option<&str> {
        self.task_id.as_deref().map(last_segment)
    }
}

/// Returns the part after the last `/`, or the whole string
pub fn last_segment(value: &str) -> &str {
    match value.rfind('/') {
        Some(idx) => &value[idx + 1..],
        None => value,
    }
}

/// CloudWatch storage resolution; the backend only accepts 1 or 60
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageResolution {
    High,
    Standard,
}

impl StorageResolution {
    pub fn seconds(&self) -> i32 {
        match self {
            StorageResolution::High => 1,
            StorageResolution::Standard => 60,
        }
    }
}

/// Sampling cadence and the storage resolution tag published with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionConfig {
    pub requested_seconds: u32,
    pub poll_period: Duration,
    pub storage_resolution: StorageResolution,
}

/// A named key/value tag attached to a metric point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One timestamped data point ready to publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp_secs: i64,
    pub storage_resolution: StorageResolution,
    pub dimensions: Vec<Dimension>,
}

impl MetricPoint {
    /// Look up a dimension value by name
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_name_from_arn() {
        let identity = IdentityContext::new("arn:aws:ecs:cluster/prod", None, "svc");
        assert_eq!(identity.cluster_name(), "prod");
    }

    #[test]
    fn test_cluster_name_bare() {
        let identity = IdentityContext::new("prod", None, "svc");
        assert_eq!(identity.cluster_name(), "prod");
    }

    #[test]
    fn test_task_short_id() {
        let identity = IdentityContext::new(
            "prod",
            Some("arn:aws:ecs:eu-west-1:123:task/prod/abc123".to_string()),
            "svc",
        );
        assert_eq!(identity.task_short_id(), Some("abc123"));
        assert_eq!(IdentityContext::new("prod", None, "svc").task_short_id(), None);
    }

    #[test]
    fn test_snapshot_deserialize_ignores_extra_keys() {
        let body = r#"{"pool":"www","listen queue":1,"listen queue len":128,
            "idle processes":3,"active processes":2,"total processes":5}"#;
        let snapshot: StatusSnapshot = serde_json::from_str(body).unwrap();
        assert_eq!(snapshot.listen_queue, 1);
        assert_eq!(snapshot.listen_queue_len, 128);
        assert_eq!(snapshot.idle_processes, 3);
        assert_eq!(snapshot.active_processes, 2);
    }

    #[test]
    fn test_snapshot_missing_key_is_error() {
        let body = r#"{"listen queue":1,"idle processes":3,"active processes":2}"#;
        assert!(serde_json::from_str::<StatusSnapshot>(body).is_err());
    }

    #[test]
    fn test_storage_resolution_seconds() {
        assert_eq!(StorageResolution::High.seconds(), 1);
        assert_eq!(StorageResolution::Standard.seconds(), 60);
    }
}
