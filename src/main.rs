//! Atelier - per-user workshop module deployments

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use atelier::api::{router, AppState};
use atelier::catalog::ModuleCatalog;
use atelier::client::KubeResourceClient;
use atelier::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Missing required settings abort here with a usage error
    let settings = Settings::parse();

    tracing::info!("Atelier starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // The catalog must fully resolve or the process refuses to start
    let catalog = ModuleCatalog::load(&client, &settings)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load module catalog: {}", e))?;
    tracing::info!(modules = catalog.modules().len(), "Module catalog loaded");

    let state = AppState::new(
        Arc::new(KubeResourceClient::new(client)),
        Arc::new(catalog),
        Arc::new(settings.clone()),
    );

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", settings.bind_addr, e))?;
    tracing::info!(addr = %settings.bind_addr, "Serving workshop API");

    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("Atelier shutting down");
    Ok(())
}
