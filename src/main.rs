use anyhow::{Context, Result};
use courier_config::{Config, DynamicConfigProvider, FileConfigProvider, StaticConfigProvider};
use courier_server::{create_router, AppContext, Backends};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.logging.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Courier Server Starting ===");
    info!("Port: {}", config.port);
    info!("Fan-out workers: {}", config.fanout_workers);

    let dynamic_config: Arc<dyn DynamicConfigProvider> = match &config.dynamic.path {
        Some(path) => {
            let provider = Arc::new(FileConfigProvider::load(path)?);
            provider.spawn_refresh(config.dynamic.poll_interval);
            info!(path = %path, "Dynamic configuration loaded");
            provider
        }
        None => {
            info!("DYNAMIC_CONFIG_PATH not set, using built-in limiter defaults");
            Arc::new(StaticConfigProvider::default())
        }
    };

    let backends = Backends::from_config(&config, dynamic_config).await?;
    let bind_address = config.bind_address.clone();
    let app_context = Arc::new(AppContext::new(config, backends)?);
    let app = create_router(app_context);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .context("Failed to bind to address")?;
    info!("Courier server listening on {}", bind_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    info!("Courier server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
