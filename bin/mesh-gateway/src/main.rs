use anyhow::Result;
use clap::Parser;
use mesh_core::ServiceRegistry;
use mesh_proxy::{serve, AuthorizedForwarder, MeshService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{GatewayConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::parse();
    init_tracing(config.log_format);

    info!("Starting mesh-gateway...");

    // Directory lives for the lifetime of the process
    let registry = Arc::new(ServiceRegistry::new());
    info!("Service registry initialized");

    let policy = config.forward_policy();
    let forwarder = Arc::new(AuthorizedForwarder::new(registry.clone(), policy.clone()));
    info!(
        "Authorized forwarder initialized with {:?} upstream timeout (caller header {})",
        policy.upstream_timeout,
        if policy.forward_caller_header { "forwarded" } else { "stripped" }
    );

    let service = Arc::new(MeshService::new(forwarder));

    let listener = TcpListener::bind(&config.listen).await?;
    info!("HTTP server listening on {}", config.listen);

    serve(listener, service, shutdown_signal()).await;

    info!(
        "Shutting down with {} registered services",
        registry.service_count().await
    );
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
