//! Flowgate - OpenAI-compatible gateway for Flow image and video generation
//!
//! This is the main entry point for the Flowgate server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use flowgate::captcha::ChallengeSolver;
use flowgate::{routes, AppState, Config, TokenRefresher};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "flowgate=info,tower_http=info".into());

    let json = std::env::var("FLOWGATE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Flowgate");

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    routes::metrics::init_metrics();
    info!("Metrics initialized");

    let state = Arc::new(AppState::new(config.clone()).await?);
    info!(store = state.store.name(), "Application state initialized");

    if let Err(e) = state.proxies.check().await {
        warn!(error = %e, "Stored outbound proxy configuration is invalid");
    }
    if let Err(e) = state.broker.preflight().await {
        warn!(error = %e, "Captcha browser settings are unusable");
    }

    if let Some(path) = &config.seed_file {
        match state.tokens.import_seed_file(path).await {
            Ok(count) => info!(count, path = %path, "Imported seed credentials"),
            Err(e) => warn!(error = %e, path = %path, "Failed to import seed credentials"),
        }
    }

    let refresher = TokenRefresher::new(
        state.tokens.clone(),
        Duration::from_secs(config.pool.refresh_interval_seconds),
    );
    let refresher_cancel = refresher.cancel_token();
    let refresher_task = refresher.start();

    let app = routes::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher_cancel.cancel();
    if let Some(task) = refresher_task {
        let _ = task.await;
    }
    state.shutdown().await;

    info!("Flowgate shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating shutdown");
        }
    }
}
