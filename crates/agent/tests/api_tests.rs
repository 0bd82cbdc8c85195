//! Integration tests for the health endpoint

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use api::{create_router, AgentInfo, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use status_agent_lib::{
    health::{components, HealthRegistry, UNHEALTHY_AFTER_FAILURES},
    observability::AgentMetrics,
    resolution, IdentityContext,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup(dry_run: bool) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    if !dry_run {
        health_registry.register(components::PUBLISHER).await;
    }

    let identity = IdentityContext::new(
        "arn:aws:ecs:eu-west-1:123456789012:cluster/demo",
        Some("arn:aws:ecs:eu-west-1:123456789012:task/demo/abc123".to_string()),
        "svc",
    );
    let info = AgentInfo::new(
        "0.1.0",
        "tcp://127.0.0.1:9000",
        &identity,
        104,
        &resolution::normalize(5),
        dry_run,
    );

    let state = Arc::new(AppState::new(health_registry, info));
    (create_router(state.clone()), state)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn fail_persistently(state: &AppState, component: &str) {
    for _ in 0..UNHEALTHY_AFTER_FAILURES {
        state
            .health_registry
            .record_failure(component, "request failed")
            .await;
    }
}

#[tokio::test]
async fn test_healthz_reports_agent_info() {
    let (app, _state) = setup(false).await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["agent"]["mode"], "publish");
    assert_eq!(health["agent"]["cluster"], "demo");
    assert_eq!(health["agent"]["service"], "svc");
    assert_eq!(health["agent"]["task"], "abc123");
    assert_eq!(health["agent"]["max_children"], 104);
    assert_eq!(health["agent"]["resolution_secs"], 5);
    assert!(health["components"]["sampler"].is_object());
    assert!(health["components"]["publisher"].is_object());
}

#[tokio::test]
async fn test_dry_run_has_no_publisher_component() {
    let (app, _state) = setup(true).await;

    let (_, health) = get_json(app, "/healthz").await;

    assert_eq!(health["agent"]["mode"], "dry-run");
    assert!(health["components"]["sampler"].is_object());
    assert!(health["components"]["publisher"].is_null());
}

#[tokio::test]
async fn test_failure_streak_degrades_then_fails() {
    let (app, state) = setup(false).await;

    state
        .health_registry
        .record_failure(components::PUBLISHER, "throttled")
        .await;

    let (status, health) = get_json(app.clone(), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["publisher"]["message"], "throttled");
    assert_eq!(health["components"]["publisher"]["consecutive_failures"], 1);
    assert_eq!(health["components"]["sampler"]["status"], "healthy");

    fail_persistently(&state, components::SAMPLER).await;

    let (status, health) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let (app, state) = setup(false).await;

    fail_persistently(&state, components::SAMPLER).await;
    state
        .health_registry
        .record_success(components::SAMPLER)
        .await;

    let (status, health) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["components"]["sampler"]["consecutive_failures"], 0);
}

#[tokio::test]
async fn test_readyz_follows_startup_and_health() {
    let (app, state) = setup(false).await;

    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);

    fail_persistently(&state, components::PUBLISHER).await;
    let (status, _) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_exposes_agent_series() {
    let (app, _state) = setup(false).await;

    let metrics = AgentMetrics::new();
    metrics.observe_iteration_latency(0.02);
    metrics.inc_samples();
    metrics.inc_sample_errors("decode");
    metrics.add_points_published(10);
    metrics.set_max_children(104);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("status_agent_iteration_latency_seconds_bucket"));
    assert!(text.contains("status_agent_samples_total"));
    assert!(text.contains("status_agent_sample_errors_total{kind=\"decode\"}"));
    assert!(text.contains("status_agent_points_published_total"));
    assert!(text.contains("status_agent_max_children 104"));
}
