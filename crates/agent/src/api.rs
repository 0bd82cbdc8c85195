//! Health and self-metrics endpoint
//!
//! Served only when `--metrics-port` is set. Health checks report the
//! sampler and publisher components together with the constants the agent
//! resolved at startup.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use status_agent_lib::{
    health::{ComponentStatus, HealthRegistry, HealthResponse},
    IdentityContext, ResolutionConfig,
};
use std::sync::Arc;
use tracing::{error, info};

/// What this agent instance is doing, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub version: String,
    pub endpoint: String,
    pub mode: &'static str,
    pub cluster: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub max_children: u64,
    pub resolution_secs: u32,
}

impl AgentInfo {
    pub fn new(
        version: &str,
        endpoint: impl Into<String>,
        identity: &IdentityContext,
        max_children: u64,
        resolution: &ResolutionConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            version: version.to_string(),
            endpoint: endpoint.into(),
            mode: if dry_run { "dry-run" } else { "publish" },
            cluster: identity.cluster_name().to_string(),
            service: identity.task_name.clone(),
            task: identity.task_short_id().map(str::to_string),
            max_children,
            resolution_secs: resolution.requested_seconds,
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub info: AgentInfo,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, info: AgentInfo) -> Self {
        Self {
            health_registry,
            info,
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    #[serde(flatten)]
    health: HealthResponse,
    agent: AgentInfo,
}

/// 200 while components work or are retrying, 503 once one fails persistently
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status == ComponentStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = HealthBody {
        health,
        agent: state.info.clone(),
    };
    (status_code, Json(body))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                Vec::new(),
            )
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the endpoint until the task is aborted
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting health endpoint");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, create_router(state)).await?;

    Ok(())
}
