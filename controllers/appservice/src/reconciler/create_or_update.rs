//! Create-or-update strategy.
//!
//! Builds the desired Deployment and Service on top of the live objects and
//! writes them only when the result differs. Drift in either child is
//! corrected on the next pass because the controller also watches them.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::create_or_update;
use crate::resources::{mutate_deployment, mutate_service, set_controller_reference};
use crds::AppService;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tracing::info;

impl Reconciler {
    /// Converges the Deployment and Service of `app`, returning the live Deployment.
    pub(crate) async fn reconcile_create_or_update(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ControllerError> {
        let (deployment, result) = create_or_update(
            &self.deployment_api(namespace),
            name,
            namespace,
            |deployment: &mut Deployment| {
                mutate_deployment(app, deployment);
                set_controller_reference(app, deployment)
            },
        )
        .await?;
        info!("Deployment {}/{} {}", namespace, name, result);
        self.metrics().record_operation("Deployment", result);

        let (_, result) = create_or_update(
            &self.service_api(namespace),
            name,
            namespace,
            |service: &mut Service| {
                mutate_service(app, service);
                set_controller_reference(app, service)
            },
        )
        .await?;
        info!("Service {}/{} {}", namespace, name, result);
        self.metrics().record_operation("Service", result);

        Ok(deployment)
    }
}
