mod handlers;
mod metrics;
mod routes;

use anyhow::{bail, Context, Result};
use axum::Router;
use quizrun_common::config::{env_flag, redis_url};
use quizrun_engine::{
    CancelToken, EngineConfig, InMemorySubmissionStore, JobCoordinator, RedisSubmissionStore,
    SubmissionStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

pub struct AppState {
    pub coordinator: JobCoordinator,
    pub store: Arc<dyn SubmissionStore>,
    /// Set on shutdown; in-flight jobs stop before their next step
    pub shutdown: CancelToken,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if env_flag("QUIZRUN_LOG_JSON") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn build_store() -> Result<Arc<dyn SubmissionStore>> {
    let kind = std::env::var("QUIZRUN_SUBMISSION_STORE").unwrap_or_else(|_| "memory".to_string());
    match kind.trim().to_lowercase().as_str() {
        "memory" => {
            warn!("Using in-memory submission store; records are lost on restart");
            Ok(Arc::new(InMemorySubmissionStore::new()))
        }
        "redis" => {
            let url = redis_url();
            let store = RedisSubmissionStore::connect(&url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", url))?;
            info!("Connected to Redis: {}", url);
            Ok(Arc::new(store))
        }
        other => bail!("Unknown submission store '{}' (expected memory or redis)", other),
    }
}

async fn shutdown_signal(shutdown: CancelToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, cancelling in-flight jobs");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("quizrun API booting...");

    let config = EngineConfig::from_env()?;
    let coordinator = JobCoordinator::from_config(&config)?;
    let store = build_store().await?;

    let shutdown = CancelToken::new();
    let state = Arc::new(AppState {
        coordinator,
        store,
        shutdown: shutdown.clone(),
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let addr = std::env::var("QUIZRUN_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}
