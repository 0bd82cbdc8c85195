//! Worker pool sizing
//!
//! Derives the maximum number of FPM workers (`pm.max_children`) from the
//! ECS task memory limit or, outside ECS, from host memory. Never fails:
//! every unreadable signal falls back to a fixed default.

use crate::identity::TaskMetadata;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Worker count when no memory figure is available
pub const DEFAULT_CAPACITY: u64 = 8;

/// Memory budget per worker in MB
pub const DEFAULT_MEMORY_PER_WORKER_MB: u64 = 60;

/// Share of host memory usable by the pool
const HOST_MEMORY_SHARE: f64 = 0.8;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// Inputs for the capacity computation
#[derive(Debug, Clone)]
pub struct CapacitySettings {
    pub memory_per_worker_mb: u64,
    pub default_capacity: u64,
    pub meminfo_path: PathBuf,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            memory_per_worker_mb: DEFAULT_MEMORY_PER_WORKER_MB,
            default_capacity: DEFAULT_CAPACITY,
            meminfo_path: PathBuf::from(MEMINFO_PATH),
        }
    }
}

impl CapacitySettings {
    /// Per-worker memory budget in MB; zero means the default
    pub fn with_memory_per_worker(mut self, memory_per_worker_mb: u64) -> Self {
        self.memory_per_worker_mb = memory_per_worker_mb;
        self
    }

    pub fn with_default_capacity(mut self, default_capacity: u64) -> Self {
        self.default_capacity = default_capacity;
        self
    }

    /// Override the meminfo location (for testing)
    pub fn with_meminfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.meminfo_path = path.into();
        self
    }
}

/// Parse `MemTotal` from `/proc/meminfo` contents, in bytes
pub fn parse_mem_total_bytes(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let mut parts = rest.split_whitespace();
        let kb: u64 = parts.next()?.parse().ok()?;
        match parts.next() {
            Some(unit) if unit.eq_ignore_ascii_case("kb") => kb.checked_mul(1024),
            _ => None,
        }
    })
}

/// Usable host memory in MB (80% of the total)
pub fn host_budget_mb(total_bytes: u64) -> f64 {
    (total_bytes as f64 * HOST_MEMORY_SHARE).floor() / 1024.0 / 1024.0
}

async fn read_host_budget_mb(meminfo_path: &Path) -> Option<f64> {
    match tokio::fs::read_to_string(meminfo_path).await {
        Ok(content) => parse_mem_total_bytes(&content).map(host_budget_mb),
        Err(e) => {
            debug!(path = %meminfo_path.display(), error = %e, "Host memory info unavailable");
            None
        }
    }
}

/// Worker count for a memory budget (MB)
pub fn max_workers(memory_mb: Option<f64>, settings: &CapacitySettings) -> u64 {
    let per_worker = if settings.memory_per_worker_mb == 0 {
        DEFAULT_MEMORY_PER_WORKER_MB
    } else {
        settings.memory_per_worker_mb
    };

    match memory_mb {
        Some(mb) if mb.is_finite() && mb > 0.0 => (mb / per_worker as f64).floor() as u64,
        _ => settings.default_capacity,
    }
}

/// Resolve the maximum worker count.
///
/// Uses the task memory limit when task metadata is available, otherwise
/// 80% of host memory, otherwise the default capacity.
pub async fn resolve(settings: &CapacitySettings, metadata: Option<&TaskMetadata>) -> u64 {
    let memory_mb = match metadata.and_then(TaskMetadata::memory_limit_mb) {
        Some(limit) => Some(limit),
        None => read_host_budget_mb(&settings.meminfo_path).await,
    };

    let capacity = max_workers(memory_mb, settings);
    debug!(
        memory_mb = ?memory_mb,
        memory_per_worker_mb = settings.memory_per_worker_mb,
        capacity = capacity,
        "Resolved worker capacity"
    );
    capacity
}
