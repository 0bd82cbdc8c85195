//! Task identity resolution
//!
//! Under ECS the agent reads the task metadata endpoint
//! (`ECS_CONTAINER_METADATA_URI_V4`) and asks the ECS API for the task's
//! group to find the service name. Outside ECS it falls back to
//! environment-provided defaults.

use crate::models::IdentityContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Service name used when the task does not belong to a service
pub const GENERIC_SERVICE_NAME: &str = "Generic";

/// Default cluster name outside ECS
pub const DEFAULT_CLUSTER_NAME: &str = "AWS-EC2";

/// Default service name outside ECS
pub const DEFAULT_TASK_NAME: &str = "PHP-FPM";

const SERVICE_GROUP_PREFIX: &str = "service:";

/// Subset of the ECS task metadata v4 `/task` document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskMetadata {
    #[serde(rename = "Cluster")]
    pub cluster: String,
    #[serde(rename = "TaskARN")]
    pub task_arn: String,
    #[serde(rename = "Limits", default)]
    pub limits: Option<TaskLimits>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskLimits {
    /// Task memory limit in MB
    #[serde(rename = "Memory", default)]
    pub memory: Option<f64>,
}

impl TaskMetadata {
    /// Task memory limit in MB, if the task declares one
    pub fn memory_limit_mb(&self) -> Option<f64> {
        self.limits.as_ref().and_then(|l| l.memory)
    }
}

/// HTTP client for the ECS task metadata endpoint
pub struct TaskMetadataClient {
    client: reqwest::Client,
    base_url: String,
}

impl TaskMetadataClient {
    /// Create a client for the given metadata base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .context("Failed to create metadata HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch `{base_url}/task`
    pub async fn fetch_task(&self) -> Result<TaskMetadata> {
        let url = format!("{}/task", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Task metadata endpoint returned {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse task metadata")
    }
}

/// Fetch task metadata if a metadata URL is configured.
///
/// Absence of ECS is a supported mode, so every failure maps to `None`.
pub async fn fetch_task_metadata(metadata_url: Option<&str>) -> Option<TaskMetadata> {
    let url = metadata_url.filter(|u| !u.is_empty())?;

    let client = match TaskMetadataClient::new(url) {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "Task metadata client unavailable");
            return None;
        }
    };

    match client.fetch_task().await {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            debug!(error = %e, "Task metadata unavailable, assuming no orchestrator");
            None
        }
    }
}

/// Looks up the `group` of an ECS task (e.g. `service:web`)
#[async_trait]
pub trait TaskGroupLookup: Send + Sync {
    async fn task_group(&self, cluster: &str, task_arn: &str) -> Result<Option<String>>;
}

/// `TaskGroupLookup` backed by the ECS `DescribeTasks` API
pub struct EcsTaskGroupLookup {
    client: aws_sdk_ecs::Client,
}

impl EcsTaskGroupLookup {
    pub fn new(client: aws_sdk_ecs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskGroupLookup for EcsTaskGroupLookup {
    async fn task_group(&self, cluster: &str, task_arn: &str) -> Result<Option<String>> {
        let output = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .tasks(task_arn)
            .send()
            .await
            .context("DescribeTasks failed")?;

        Ok(output
            .tasks()
            .first()
            .and_then(|task| task.group())
            .map(str::to_string))
    }
}

/// Service name from an ECS task group; `Generic` for non-service tasks
pub fn service_name_from_group(group: &str) -> String {
    match group.strip_prefix(SERVICE_GROUP_PREFIX) {
        Some(service) => service.to_string(),
        None => GENERIC_SERVICE_NAME.to_string(),
    }
}

/// Identity values used when not running under ECS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDefaults {
    pub cluster_name: String,
    pub task_name: String,
}

impl Default for IdentityDefaults {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            task_name: DEFAULT_TASK_NAME.to_string(),
        }
    }
}

/// Resolve the identity context once at startup
pub async fn resolve_identity(
    metadata: Option<&TaskMetadata>,
    defaults: &IdentityDefaults,
    lookup: &dyn TaskGroupLookup,
) -> IdentityContext {
    let Some(metadata) = metadata else {
        return IdentityContext::new(
            defaults.cluster_name.clone(),
            None,
            defaults.task_name.clone(),
        );
    };

    let task_name = match lookup.task_group(&metadata.cluster, &metadata.task_arn).await {
        Ok(Some(group)) => service_name_from_group(&group),
        Ok(None) => GENERIC_SERVICE_NAME.to_string(),
        Err(e) => {
            warn!(
                error = %e,
                task_arn = %metadata.task_arn,
                "Could not resolve task group, using generic service name"
            );
            GENERIC_SERVICE_NAME.to_string()
        }
    };

    IdentityContext::new(
        metadata.cluster.clone(),
        Some(metadata.task_arn.clone()),
        task_name,
    )
}
