use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use worldcast::api::{create_app, WorldAppState};
use worldcast::config::load_or_default;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worldcast=info".into()),
        )
        .init();

    info!("Worldcast starting...");

    let config_path =
        std::env::var("WORLDCAST_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let mut config = load_or_default(&config_path)?;
    config.apply_env();

    info!(
        queue_capacity = config.hub.queue_capacity,
        static_dir = %config.server.static_dir.display(),
        "Configuration loaded"
    );

    let state = WorldAppState::new(config.hub.queue_capacity);
    let hub = Arc::clone(&state.hub);
    let app = create_app(state, &config.server.static_dir);

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!(subscribers = hub.subscriber_count(), "Worldcast stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
