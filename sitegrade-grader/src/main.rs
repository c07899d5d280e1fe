//! sitegrade-grader - Environmental Layer Grading Microservice
//!
//! **Module Identity:**
//! - Name: sitegrade-grader
//! - Port: 5790 (default)
//!
//! Grades a coordinate against the environmental layer catalog and streams
//! progress over SSE.

use anyhow::{Context, Result};
use clap::Parser;
use sitegrade_common::events::EventBus;
use sitegrade_grader::config::GraderConfig;
use sitegrade_grader::orchestrator::Orchestrator;
use sitegrade_grader::registry::PolicyTable;
use sitegrade_grader::sampler::{HttpRasterSource, RasterSampler};
use sitegrade_grader::scale::ScaleResolver;
use sitegrade_grader::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sitegrade-grader", version, about = "Environmental layer grading service")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SITEGRADE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides configuration)
    #[arg(short, long, env = "SITEGRADE_GRADER_PORT")]
    port: Option<u16>,

    /// Layer catalog file (overrides configuration)
    #[arg(long, env = "SITEGRADE_POLICY_FILE")]
    policy_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GraderConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(policy_file) = args.policy_file {
        config.grading.policy_file = Some(policy_file);
    }

    init_tracing(&config).context("Failed to initialize logging")?;

    info!(
        "Starting sitegrade-grader v{} ({}, {} build, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let table = Arc::new(config.load_policy_table().context("Failed to load layer catalog")?);
    info!(
        layers = table.len(),
        critical = table.list_critical().len(),
        "Layer catalog ready"
    );

    let source = HttpRasterSource::new(&config.raster).context("Failed to create raster client")?;
    info!(
        base_url = %config.raster.base_url,
        api_key = source.has_api_key(),
        rate_limit_per_second = config.raster.rate_limit_per_second,
        "Raster service client initialized"
    );

    let event_bus = EventBus::new(256);
    let orchestrator = Arc::new(build_orchestrator(&config, table, Arc::new(source), event_bus.clone()));
    info!(
        concurrency = orchestrator.config().concurrency,
        reconciliation = ?orchestrator.config().reconciliation,
        ceiling = %config.grading.scale_ceiling,
        "Grading orchestrator ready"
    );

    let state = AppState::new(orchestrator, event_bus, config.grading.scale_ceiling)
        .with_retained_runs(config.grading.retained_runs);
    let app = sitegrade_grader::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn build_orchestrator(
    config: &GraderConfig,
    table: Arc<PolicyTable>,
    source: Arc<HttpRasterSource>,
    event_bus: EventBus,
) -> Orchestrator {
    let resolver = ScaleResolver::new(table.clone(), config.scales.clone());
    let sampler = RasterSampler::new(source, config.sampler_config());
    Orchestrator::new(table, resolver, sampler, config.orchestrator_config()).with_event_bus(event_bus)
}

/// `RUST_LOG` wins over the configured level; optional file output
fn init_tracing(config: &GraderConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("sitegrade_grader={0},sitegrade_common={0},tower_http=info", config.logging.level).into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
