//! Reconciliation logic for AppService.
//!
//! An AppService owns one Deployment and one Service. Two strategies decide
//! when those children need writing:
//! - `create_or_update`: build the desired child and compare it with the live one
//! - `annotation`: compare the spec with the copy recorded in the `old/spec` annotation
//!
//! Both finish by patching the AppService status from the Deployment.

pub mod annotation;
pub mod create_or_update;

mod annotation_test;

use crate::backoff::BackoffTable;
use crate::config::ReconcileStrategy;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::{
    app_name, app_namespace, failed_status, observed_status, resource_key, stamp_status,
    status_needs_update, status_patch,
};
use crds::{AppService, AppServiceState, AppServiceStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long to wait before looking at a Deployment that is still rolling out.
pub const PENDING_REQUEUE: Duration = Duration::from_secs(30);

/// Reconciles AppService resources into their Deployment and Service.
pub struct Reconciler {
    pub(crate) client: Client,
    strategy: ReconcileStrategy,
    metrics: Metrics,
    /// Error count tracking per resource (namespace/name -> backoff)
    backoff: BackoffTable,
}

impl Reconciler {
    pub fn new(client: Client, strategy: ReconcileStrategy, metrics: Metrics) -> Self {
        Self {
            client,
            strategy,
            metrics,
            backoff: BackoffTable::new(),
        }
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.strategy
    }

    pub fn backoff(&self) -> &BackoffTable {
        &self.backoff
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn app_service_api(&self, namespace: &str) -> Api<AppService> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub(crate) fn deployment_api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub(crate) fn service_api(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Reconciles a single AppService.
    ///
    /// Requeues after [`PENDING_REQUEUE`] while the Deployment is not ready;
    /// otherwise waits for the next change. On error the status is marked
    /// `Failed` and the error is returned for the error policy to back off.
    pub async fn reconcile_app_service(&self, app: &AppService) -> Result<Action, ControllerError> {
        let name = app_name(app)?;
        let namespace = app_namespace(app)?;

        if app.metadata.deletion_timestamp.is_some() {
            debug!("AppService {}/{} is being deleted, skipping", namespace, name);
            self.backoff.reset(&resource_key(app));
            return Ok(Action::await_change());
        }

        info!("Reconciling AppService {}/{} ({})", namespace, name, self.strategy);
        let _timer = self.metrics.start_timer(self.strategy);

        match self.sync(app, &name, &namespace).await {
            Ok(state) => {
                self.metrics.record_success(self.strategy);
                self.backoff.reset(&resource_key(app));
                if state == AppServiceState::Ready {
                    Ok(Action::await_change())
                } else {
                    debug!("AppService {}/{} not ready yet, requeueing", namespace, name);
                    Ok(Action::requeue(PENDING_REQUEUE))
                }
            }
            Err(e) => {
                error!("Failed to reconcile AppService {}/{}: {}", namespace, name, e);
                self.metrics.record_failure(self.strategy, &e);
                if let Err(status_err) = self
                    .update_status(app, &name, &namespace, failed_status(app, &e))
                    .await
                {
                    warn!(
                        "Failed to record error status for AppService {}/{}: {}",
                        namespace, name, status_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Runs the configured strategy and records the observed status.
    async fn sync(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<AppServiceState, ControllerError> {
        let deployment = match self.strategy {
            ReconcileStrategy::CreateOrUpdate => {
                self.reconcile_create_or_update(app, name, namespace).await?
            }
            ReconcileStrategy::Annotation => self.reconcile_annotation(app, name, namespace).await?,
        };

        let status = observed_status(app, Some(&deployment));
        let state = status.state;
        self.update_status(app, name, namespace, status).await?;
        Ok(state)
    }

    /// Merge-patches the status subresource unless only the timestamp would change.
    async fn update_status(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
        desired: AppServiceStatus,
    ) -> Result<(), ControllerError> {
        let current = app.status.as_ref();
        if !status_needs_update(current, &desired) {
            debug!("AppService {}/{} status unchanged, skipping update", namespace, name);
            return Ok(());
        }

        let status = stamp_status(current, desired, chrono::Utc::now());
        let patch = status_patch(&status)?;
        self.app_service_api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Updated AppService {}/{} status to {}", namespace, name, status.state.as_str());
        Ok(())
    }
}
