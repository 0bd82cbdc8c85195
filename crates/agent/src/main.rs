//! Status Agent - PHP-FPM pool metrics agent
//!
//! Runs next to a PHP-FPM pool, samples its status page on a fixed cadence
//! and publishes the pool's queue and worker figures to CloudWatch.

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatch::config::Region;
use clap::Parser;
use status_agent_lib::{
    capacity,
    export::{CloudWatchPublisher, ConfigError, ExportLoopBuilder, StopFlag, TablePreview},
    fastcgi::Endpoint,
    health::{components, HealthRegistry},
    identity::{self, EcsTaskGroupLookup},
    observability::{AgentMetrics, StructuredLogger},
    sampler::FpmStatusSampler,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{AgentEnvironment, Cli, Command, RunArgs};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the dry-run table and command output
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let env = AgentEnvironment::load();

    match cli.command {
        Command::ComputeMaxChildren => {
            let metadata = identity::fetch_task_metadata(env.metadata_url()).await;
            let max_children = capacity::resolve(&env.capacity_settings(), metadata.as_ref()).await;
            println!("{}", max_children);
            Ok(())
        }
        Command::Run(args) => run(args, env).await,
    }
}

async fn run(args: RunArgs, env: AgentEnvironment) -> Result<()> {
    info!("Starting status-agent");

    let namespace = args.namespace();
    if !args.dry_run && namespace.is_empty() {
        error!("No metric namespace configured; set --namespace or METRIC_NAMESPACE");
        return Err(ConfigError::MissingNamespace.into());
    }

    let endpoint = Endpoint::parse(&args.socket)
        .with_context(|| format!("invalid FPM address {}", args.socket))?;

    // AWS clients
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = args.region() {
        loader = loader.region(Region::new(region));
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile_name(profile);
    }
    let sdk_config = loader.load().await;

    // Startup constants
    let metadata = identity::fetch_task_metadata(env.metadata_url()).await;
    let max_children = capacity::resolve(&env.capacity_settings(), metadata.as_ref()).await;
    let lookup = EcsTaskGroupLookup::new(aws_sdk_ecs::Client::new(&sdk_config));
    let identity =
        identity::resolve_identity(metadata.as_ref(), &env.identity_defaults(), &lookup).await;
    let resolution = args.resolution_config();

    let metrics = AgentMetrics::new();
    metrics.set_max_children(max_children);

    let logger = StructuredLogger::new(endpoint.to_string());
    logger.log_startup(
        AGENT_VERSION,
        &identity,
        max_children,
        &resolution,
        args.dry_run,
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    if !args.dry_run {
        health_registry.register(components::PUBLISHER).await;
    }

    let stop = StopFlag::new();
    let signal_handle = tokio::spawn({
        let stop = stop.clone();
        async move {
            let reason = wait_for_shutdown().await;
            info!(reason = reason, "Stop requested");
            stop.stop();
            reason
        }
    });

    // Health and metrics server
    let info = api::AgentInfo::new(
        AGENT_VERSION,
        endpoint.to_string(),
        &identity,
        max_children,
        &resolution,
        args.dry_run,
    );
    let api_handle = args.metrics_port.map(|port| {
        let state = Arc::new(api::AppState::new(health_registry.clone(), info));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                warn!(error = %e, port = port, "API server stopped");
            }
        })
    });

    let builder = ExportLoopBuilder::new()
        .sampler(Arc::new(FpmStatusSampler::new(endpoint, &args.path)))
        .identity(identity)
        .capacity(max_children)
        .resolution(resolution)
        .stop_flag(stop)
        .health(health_registry.clone());

    let builder = if args.dry_run {
        builder.preview(Arc::new(TablePreview))
    } else {
        let publisher = CloudWatchPublisher::new(aws_sdk_cloudwatch::Client::new(&sdk_config));
        builder.publisher(namespace, Arc::new(publisher))
    };

    let export = builder.build()?;
    health_registry.set_ready(true).await;

    export.run().await;

    let reason = signal_handle.await.unwrap_or("signal handler failed");
    logger.log_shutdown(reason);

    if let Some(handle) = api_handle {
        handle.abort();
    }

    Ok(())
}

/// Resolve when the process is asked to stop
async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT received",
                    _ = terminate.recv() => "SIGTERM received",
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT received"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT received"
    }
}
