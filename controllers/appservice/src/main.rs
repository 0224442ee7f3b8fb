//! AppService Controller
//!
//! Reconciles `AppService` custom resources (group `app.ydzs.io`) into a
//! Deployment and a NodePort Service. Two strategies are available:
//! - `create-or-update` (default): diff desired children against the live objects
//! - `annotation`: diff the spec against the copy stored in the `old/spec` annotation

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod resources;
mod retry;
mod server;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install the rustls crypto provider before any TLS connection is made
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::warn!("rustls crypto provider already installed");
    }

    info!("Starting AppService Controller");

    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Strategy: {}", config.strategy);
    info!("  HTTP bind address: {}", config.http_bind_address);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Debounce: {}s", config.debounce.as_secs());

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
