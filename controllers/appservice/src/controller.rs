//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler,
//! the AppService watcher and the probe/metrics server together and runs
//! them until one exits.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, HttpState};
use crate::watcher::Watcher;
use crds::AppService;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for AppService management.
pub struct Controller {
    app_service_watcher: JoinHandle<Result<(), ControllerError>>,
    http_server: JoinHandle<Result<(), ControllerError>>,
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing AppService Controller");

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        let metrics = Metrics::new()?;
        let reconciler = Arc::new(Reconciler::new(
            kube_client.clone(),
            config.strategy,
            metrics.clone(),
        ));

        let ns = config.namespace.as_deref();
        let watcher_instance = Watcher::new(
            reconciler,
            scoped_api::<AppService>(&kube_client, ns),
            scoped_api::<Deployment>(&kube_client, ns),
            scoped_api::<Service>(&kube_client, ns),
            config.concurrency,
            config.debounce,
        );

        let ready = Arc::new(AtomicBool::new(false));

        let app_service_watcher = {
            let ready = ready.clone();
            tokio::spawn(async move { watcher_instance.watch_app_services(ready).await })
        };

        let http_server = {
            let state = HttpState { metrics, ready };
            let addr = config.http_bind_address;
            tokio::spawn(async move { server::serve(addr, state).await })
        };

        Ok(Self {
            app_service_watcher,
            http_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("AppService Controller running");

        // The watcher ends on SIGINT/SIGTERM; the server only ends on error
        tokio::select! {
            result = &mut self.app_service_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AppService watcher panicked: {}", e)))??;
            }
            result = &mut self.http_server => {
                result.map_err(|e| ControllerError::Watch(format!("HTTP server panicked: {}", e)))??;
                return Err(ControllerError::Watch("HTTP server exited unexpectedly".to_string()));
            }
        }

        self.http_server.abort();
        info!("AppService Controller stopped");
        Ok(())
    }
}
