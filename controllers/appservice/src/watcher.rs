//! Kubernetes resource watchers.
//!
//! Drives the reconciler from a `kube_runtime::Controller`, which supplies
//! the watch, the work queue, debouncing and reconnection. With the
//! create-or-update strategy owned Deployments and Services are watched too,
//! so edits to a child re-trigger its AppService.

use crate::config::ReconcileStrategy;
use crate::error::ControllerError;
use crate::reconcile_helpers::resource_key;
use crate::reconciler::Reconciler;
use crds::AppService;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

async fn reconcile(app: Arc<AppService>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    ctx.reconcile_app_service(&app).await
}

/// Requeues a failed AppService after its next Fibonacci backoff delay.
fn error_policy(app: Arc<AppService>, error: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    let key = resource_key(app.as_ref());
    let (delay, attempts) = ctx.backoff().record_failure(&key);
    error!(
        "Reconciliation error for AppService {} (attempt {}): {}, retrying in {}s",
        key,
        attempts,
        error,
        delay.as_secs()
    );
    Action::requeue(delay)
}

/// Watches AppService resources (and their children) for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    app_service_api: Api<AppService>,
    deployment_api: Api<Deployment>,
    service_api: Api<Service>,
    concurrency: u16,
    debounce: Duration,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        app_service_api: Api<AppService>,
        deployment_api: Api<Deployment>,
        service_api: Api<Service>,
        concurrency: u16,
        debounce: Duration,
    ) -> Self {
        Self {
            reconciler,
            app_service_api,
            deployment_api,
            service_api,
            concurrency,
            debounce,
        }
    }

    /// Runs the AppService controller until a shutdown signal arrives.
    ///
    /// `ready` is raised once the controller is running and lowered when it stops.
    pub async fn watch_app_services(&self, ready: Arc<AtomicBool>) -> Result<(), ControllerError> {
        let strategy = self.reconciler.strategy();
        info!("Starting AppService watcher ({} strategy)", strategy);

        let controller_config = ControllerConfig::default()
            .debounce(self.debounce)
            .concurrency(self.concurrency);

        let mut controller = Controller::new(self.app_service_api.clone(), watcher::Config::default())
            .with_config(controller_config);
        if strategy == ReconcileStrategy::CreateOrUpdate {
            controller = controller
                .owns(self.deployment_api.clone(), watcher::Config::default())
                .owns(self.service_api.clone(), watcher::Config::default());
        }

        ready.store(true, Ordering::SeqCst);
        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled {}", obj),
                    Err(e) => warn!("AppService controller error: {}", e),
                }
            })
            .await;
        ready.store(false, Ordering::SeqCst);

        info!("AppService watcher stopped");
        Ok(())
    }
}
