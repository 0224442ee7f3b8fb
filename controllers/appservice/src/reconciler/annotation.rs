//! Annotation strategy.
//!
//! The spec applied at the last successful sync is stored as JSON in the
//! `old/spec` annotation of the AppService. Children are created when the
//! Deployment is missing and rewritten only when the current spec differs
//! from the recorded one. Drift made directly to the children is not
//! detected by this strategy.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::OperationResult;
use crate::resources::{mutate_deployment, mutate_service, new_deployment, new_service};
use crate::retry::retry_on_conflict;
use crds::{AppService, AppServiceSpec, OLD_SPEC_ANNOTATION};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::PostParams;
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Spec recorded in the `old/spec` annotation, if present and parseable.
pub fn recorded_spec(app: &AppService) -> Option<AppServiceSpec> {
    let raw = app.annotations().get(OLD_SPEC_ANNOTATION)?;
    match serde_json::from_str(raw) {
        Ok(spec) => Some(spec),
        Err(e) => {
            warn!(
                "Ignoring unparseable {} annotation on AppService {}: {}",
                OLD_SPEC_ANNOTATION,
                app.name_any(),
                e
            );
            None
        }
    }
}

/// True unless the recorded spec equals the current one.
///
/// A missing or corrupt annotation counts as a change so the children get
/// rewritten and the annotation repaired.
pub fn spec_changed(app: &AppService) -> bool {
    recorded_spec(app).as_ref() != Some(&app.spec)
}

/// Stores `spec` as JSON in the `old/spec` annotation of `app`.
pub fn annotate_spec(app: &mut AppService, spec: &AppServiceSpec) -> Result<(), ControllerError> {
    let data = serde_json::to_string(spec)?;
    app.annotations_mut()
        .insert(OLD_SPEC_ANNOTATION.to_string(), data);
    Ok(())
}

impl Reconciler {
    /// Syncs the children of `app` by annotation diff, returning the live Deployment.
    pub(crate) async fn reconcile_annotation(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ControllerError> {
        let deployments = self.deployment_api(namespace);

        let Some(existing) = deployments.get_opt(name).await? else {
            info!("Deployment {}/{} not found, creating children", namespace, name);
            self.record_spec(app, name, namespace).await?;
            return self.create_children(app, name, namespace).await;
        };

        if !spec_changed(app) {
            debug!("AppService {}/{} spec unchanged since last sync", namespace, name);
            return Ok(existing);
        }

        info!("AppService {}/{} spec changed, updating children", namespace, name);
        let deployment = self.update_deployment(app, name, namespace).await?;
        self.update_service(app, name, namespace).await?;
        self.record_spec(app, name, namespace).await?;
        Ok(deployment)
    }

    async fn create_children(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ControllerError> {
        let deployment = self
            .deployment_api(namespace)
            .create(&PostParams::default(), &new_deployment(app)?)
            .await?;
        info!("Created Deployment {}/{}", namespace, name);
        self.metrics().record_operation("Deployment", OperationResult::Created);

        match self
            .service_api(namespace)
            .create(&PostParams::default(), &new_service(app)?)
            .await
        {
            Ok(_) => {
                info!("Created Service {}/{}", namespace, name);
                self.metrics().record_operation("Service", OperationResult::Created);
            }
            Err(e) => {
                let e = ControllerError::from(e);
                if !e.is_already_exists() {
                    return Err(e);
                }
                debug!("Service {}/{} already exists, leaving it in place", namespace, name);
            }
        }

        Ok(deployment)
    }

    async fn update_deployment(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ControllerError> {
        let api = self.deployment_api(namespace);
        let api = &api;
        let deployment = retry_on_conflict(move || async move {
            let mut deployment = api.get(name).await?;
            mutate_deployment(app, &mut deployment);
            let updated = api.replace(name, &PostParams::default(), &deployment).await?;
            Ok::<_, ControllerError>(updated)
        })
        .await?;
        info!("Updated Deployment {}/{}", namespace, name);
        self.metrics().record_operation("Deployment", OperationResult::Updated);
        Ok(deployment)
    }

    async fn update_service(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        let api = self.service_api(namespace);
        let api = &api;
        retry_on_conflict(move || async move {
            // mutate_service keeps the allocated clusterIP, which is immutable
            let mut service = api.get(name).await?;
            mutate_service(app, &mut service);
            api.replace(name, &PostParams::default(), &service).await?;
            Ok::<_, ControllerError>(())
        })
        .await?;
        info!("Updated Service {}/{}", namespace, name);
        self.metrics().record_operation("Service", OperationResult::Updated);
        Ok(())
    }

    /// Records the spec being applied in the `old/spec` annotation.
    ///
    /// The AppService is re-read on every attempt; the recorded spec is the
    /// one this pass applied, so a newer spec written concurrently still
    /// shows up as a change next time.
    async fn record_spec(
        &self,
        app: &AppService,
        name: &str,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        let api = self.app_service_api(namespace);
        let api = &api;
        let spec = &app.spec;
        retry_on_conflict(move || async move {
            let mut latest = api.get(name).await?;
            annotate_spec(&mut latest, spec)?;
            api.replace(name, &PostParams::default(), &latest).await?;
            Ok::<_, ControllerError>(())
        })
        .await?;
        debug!("Recorded spec annotation on AppService {}/{}", namespace, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_app_service;

    #[test]
    fn test_missing_annotation_counts_as_change() {
        let app = create_test_app_service("web", "default");
        assert!(recorded_spec(&app).is_none());
        assert!(spec_changed(&app));
    }

    #[test]
    fn test_recorded_spec_matches_current() {
        let mut app = create_test_app_service("web", "default");
        let spec = app.spec.clone();
        annotate_spec(&mut app, &spec).unwrap();
        assert_eq!(recorded_spec(&app), Some(spec));
        assert!(!spec_changed(&app));
    }

    #[test]
    fn test_spec_change_detected() {
        let mut app = create_test_app_service("web", "default");
        let spec = app.spec.clone();
        annotate_spec(&mut app, &spec).unwrap();
        app.spec.size = Some(3);
        assert!(spec_changed(&app));
    }

    #[test]
    fn test_corrupt_annotation_counts_as_change() {
        let mut app = create_test_app_service("web", "default");
        app.annotations_mut()
            .insert(OLD_SPEC_ANNOTATION.to_string(), "{not json".to_string());
        assert!(recorded_spec(&app).is_none());
        assert!(spec_changed(&app));
    }

    #[test]
    fn test_annotation_is_camel_case_json() {
        let mut app = create_test_app_service("web", "default");
        let spec = app.spec.clone();
        annotate_spec(&mut app, &spec).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&app.annotations()[OLD_SPEC_ANNOTATION]).unwrap();
        assert_eq!(raw["image"], "nginx:1.25");
        assert_eq!(raw["ports"][0]["targetPort"], 8080);
    }
}
