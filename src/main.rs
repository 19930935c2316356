use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use pms_core::config::CONFIG;
use pms_core::database::TenantRegistry;
use pms_core::handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, PMS_TENANT_CATALOG, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    tracing::info!("Starting PMS data core in {:?} mode", CONFIG.environment);

    let registry = TenantRegistry::global().context("failed to load tenant catalog")?;
    tracing::info!("Tenant catalog loaded with {} tenant(s)", registry.catalog().len());

    let monitor = CONFIG
        .database
        .health_probe_interval()
        .map(|interval| registry.clone().spawn_liveness_monitor(interval));

    let bind_addr = format!("0.0.0.0:{}", CONFIG.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("PMS data core listening on http://{}", bind_addr);

    let app = handlers::app(registry.clone());
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    registry.close_all().await;
    tracing::info!("Tenant connections closed");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
