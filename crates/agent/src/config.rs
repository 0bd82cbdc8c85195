//! Agent configuration
//!
//! The command surface is parsed with clap; ambient settings that the
//! container environment provides are collected once into `AgentEnvironment`.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use status_agent_lib::capacity::{CapacitySettings, DEFAULT_CAPACITY, DEFAULT_MEMORY_PER_WORKER_MB};
use status_agent_lib::identity::{IdentityDefaults, DEFAULT_CLUSTER_NAME, DEFAULT_TASK_NAME};
use status_agent_lib::resolution::{self, HI_RES_RESOLUTION_SECS};
use status_agent_lib::ResolutionConfig;
use tracing::warn;

/// PHP-FPM pool metrics agent
#[derive(Debug, Parser)]
#[command(name = "status-agent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sample the FPM status page and publish pool metrics
    Run(RunArgs),

    /// Print the worker count the available memory supports
    ComputeMaxChildren,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// FPM address: unix:///path/to/socket, tcp://host:port or host:port
    pub socket: String,

    /// Status page path (pm.status_path)
    pub path: String,

    /// CloudWatch namespace
    #[arg(long, env = "METRIC_NAMESPACE")]
    pub namespace: Option<String>,

    /// Print values instead of publishing them
    #[arg(long)]
    pub dry_run: bool,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,

    /// AWS shared config profile
    #[arg(long)]
    pub profile: Option<String>,

    /// Sampling resolution in seconds
    #[arg(long, env = "STATUS_AGENT_RESOLUTION")]
    pub resolution: Option<String>,

    /// Sample every 5 seconds with high-resolution storage
    #[arg(long)]
    pub hi_res: bool,

    /// Serve /healthz, /readyz and /metrics on this port
    #[arg(long, env = "STATUS_AGENT_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl RunArgs {
    /// Namespace with surrounding whitespace removed; empty when unset
    pub fn namespace(&self) -> String {
        self.namespace
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }

    /// `--resolution` wins over `--hi-res`
    pub fn resolution_config(&self) -> ResolutionConfig {
        match &self.resolution {
            Some(raw) => resolution::from_raw(raw),
            None if self.hi_res => resolution::normalize(i64::from(HI_RES_RESOLUTION_SECS)),
            None => resolution::normalize(i64::from(resolution::DEFAULT_RESOLUTION_SECS)),
        }
    }

    /// Region from `--region`, then `AWS_REGION`, then `AWS_DEFAULT_REGION`
    pub fn region(&self) -> Option<String> {
        self.region
            .clone()
            .or_else(|| non_empty_var("AWS_REGION"))
            .or_else(|| non_empty_var("AWS_DEFAULT_REGION"))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Environment values as found, before parsing
#[derive(Debug, Default, Deserialize)]
struct RawEnvironment {
    memory_per_task: Option<String>,
    default_max_children: Option<String>,
    ecs_container_metadata_uri_v4: Option<String>,
    cluster_name: Option<String>,
    task_name: Option<String>,
}

/// Settings read from the process environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEnvironment {
    /// Memory budget per worker in MB (`MEMORY_PER_TASK`)
    pub memory_per_task: u64,

    /// Worker count without any memory figure (`DEFAULT_MAX_CHILDREN`)
    pub default_max_children: u64,

    /// ECS task metadata endpoint (`ECS_CONTAINER_METADATA_URI_V4`)
    pub ecs_container_metadata_uri_v4: Option<String>,

    /// Cluster name outside ECS (`CLUSTER_NAME`)
    pub cluster_name: String,

    /// Service name outside ECS (`TASK_NAME`)
    pub task_name: String,
}

impl Default for AgentEnvironment {
    fn default() -> Self {
        Self {
            memory_per_task: DEFAULT_MEMORY_PER_WORKER_MB,
            default_max_children: DEFAULT_CAPACITY,
            ecs_container_metadata_uri_v4: None,
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            task_name: DEFAULT_TASK_NAME.to_string(),
        }
    }
}

/// Parse a numeric variable; a bad value only resets that variable
fn number_or_default(name: &str, raw: Option<String>, default: u64) -> u64 {
    let Some(raw) = raw.filter(|v| !v.trim().is_empty()) else {
        return default;
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(
                variable = name,
                value = %raw,
                error = %e,
                fallback = default,
                "Invalid numeric setting, using default"
            );
            default
        }
    }
}

fn text_or_default(raw: Option<String>, default: &str) -> String {
    raw.filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl AgentEnvironment {
    /// Load from the environment; each unreadable value falls back on its own
    pub fn load() -> Self {
        Self::from_source(config::Environment::default())
    }

    fn from_source(source: config::Environment) -> Self {
        let raw = config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize::<RawEnvironment>())
            .unwrap_or_else(|e| {
                warn!(error = %e, "Environment unreadable, using defaults");
                RawEnvironment::default()
            });

        Self {
            memory_per_task: number_or_default(
                "MEMORY_PER_TASK",
                raw.memory_per_task,
                DEFAULT_MEMORY_PER_WORKER_MB,
            ),
            default_max_children: number_or_default(
                "DEFAULT_MAX_CHILDREN",
                raw.default_max_children,
                DEFAULT_CAPACITY,
            ),
            ecs_container_metadata_uri_v4: raw.ecs_container_metadata_uri_v4,
            cluster_name: text_or_default(raw.cluster_name, DEFAULT_CLUSTER_NAME),
            task_name: text_or_default(raw.task_name, DEFAULT_TASK_NAME),
        }
    }

    pub fn metadata_url(&self) -> Option<&str> {
        self.ecs_container_metadata_uri_v4
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    pub fn capacity_settings(&self) -> CapacitySettings {
        CapacitySettings::default()
            .with_memory_per_worker(self.memory_per_task)
            .with_default_capacity(self.default_max_children)
    }

    pub fn identity_defaults(&self) -> IdentityDefaults {
        IdentityDefaults {
            cluster_name: self.cluster_name.clone(),
            task_name: self.task_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use status_agent_lib::StorageResolution;
    use std::collections::HashMap;
    use std::time::Duration;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["status-agent", "run", "127.0.0.1:9000", "/status"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn env_from(pairs: &[(&str, &str)]) -> AgentEnvironment {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentEnvironment::from_source(config::Environment::default().source(Some(vars)))
    }

    #[test]
    fn test_parse_run_command() {
        let args = run_args(&["--namespace", " PHP-FPM ", "--metrics-port", "9102"]);

        assert_eq!(args.socket, "127.0.0.1:9000");
        assert_eq!(args.path, "/status");
        assert_eq!(args.namespace(), "PHP-FPM");
        assert_eq!(args.metrics_port, Some(9102));
        assert!(!args.dry_run);
    }

    #[test]
    fn test_parse_compute_max_children() {
        let cli = Cli::try_parse_from(["status-agent", "compute-max-children"]).unwrap();
        assert!(matches!(cli.command, Command::ComputeMaxChildren));
    }

    #[test]
    fn test_hi_res_means_five_seconds() {
        let config = run_args(&["--hi-res"]).resolution_config();

        assert_eq!(config.requested_seconds, 5);
        assert_eq!(config.poll_period, Duration::from_secs(5));
        assert_eq!(config.storage_resolution, StorageResolution::High);
    }

    #[test]
    fn test_explicit_resolution_wins_over_hi_res() {
        let config = run_args(&["--hi-res", "--resolution", "150"]).resolution_config();

        assert_eq!(config.requested_seconds, 120);
        assert_eq!(config.storage_resolution, StorageResolution::Standard);
    }

    #[test]
    fn test_environment_defaults() {
        let env = env_from(&[]);

        assert_eq!(env.memory_per_task, 60);
        assert_eq!(env.default_max_children, 8);
        assert_eq!(env.metadata_url(), None);
        assert_eq!(env.identity_defaults(), IdentityDefaults::default());
    }

    #[test]
    fn test_environment_overrides() {
        let env = env_from(&[
            ("MEMORY_PER_TASK", "128"),
            ("CLUSTER_NAME", "staging"),
            ("TASK_NAME", "web"),
            ("ECS_CONTAINER_METADATA_URI_V4", "http://169.254.170.2/v4/abc"),
        ]);

        assert_eq!(env.capacity_settings().memory_per_worker_mb, 128);
        assert_eq!(env.identity_defaults().cluster_name, "staging");
        assert_eq!(env.identity_defaults().task_name, "web");
        assert_eq!(env.metadata_url(), Some("http://169.254.170.2/v4/abc"));
    }

    #[test]
    fn test_bad_number_only_resets_that_setting() {
        let env = env_from(&[
            ("MEMORY_PER_TASK", "60MB"),
            ("DEFAULT_MAX_CHILDREN", "12"),
            ("ECS_CONTAINER_METADATA_URI_V4", "http://169.254.170.2/v4/abc"),
            ("CLUSTER_NAME", "staging"),
        ]);

        assert_eq!(env.memory_per_task, 60);
        assert_eq!(env.default_max_children, 12);
        assert_eq!(env.metadata_url(), Some("http://169.254.170.2/v4/abc"));
        assert_eq!(env.cluster_name, "staging");
        assert_eq!(env.task_name, "PHP-FPM");
    }

    #[test]
    fn test_empty_names_use_defaults() {
        let env = env_from(&[("CLUSTER_NAME", ""), ("TASK_NAME", " ")]);
        assert_eq!(env.identity_defaults(), IdentityDefaults::default());
    }

    #[test]
    fn test_blank_metadata_url_is_ignored() {
        let env = env_from(&[("ECS_CONTAINER_METADATA_URI_V4", "  ")]);
        assert_eq!(env.metadata_url(), None);
    }
}
