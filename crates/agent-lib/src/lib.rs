//! Agent library for PHP-FPM pool monitoring
//!
//! This crate provides the core functionality for:
//! - Sampling the FPM status page over FastCGI
//! - Resolving cluster, service and task identity
//! - Sizing the worker pool from available memory
//! - Publishing pool metrics to CloudWatch on a fixed cadence
//! - Health checks and observability

pub mod capacity;
pub mod export;
pub mod fastcgi;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod resolution;
pub mod sampler;

pub use export::{
    CloudWatchPublisher, ConfigError, ExportLoop, ExportLoopBuilder, MetricsPublisher,
    StopFlag, TablePreview,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use sampler::{FpmStatusSampler, SampleError, SampleOutcome, StatusSampler};
