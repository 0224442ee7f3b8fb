//! Unit tests for the annotation reconciler

#[cfg(test)]
mod tests {
    use crate::config::ReconcileStrategy;
    use crate::metrics::Metrics;
    use crate::reconcile_helpers::observed_status;
    use crate::reconciler::annotation::annotate_spec;
    use crate::reconciler::Reconciler;
    use crate::resources::{new_deployment, new_service};
    use crate::test_utils::*;
    use crds::{AppService, AppServiceSpec, OLD_SPEC_ANNOTATION};
    use http::{Method, StatusCode};
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use kube_runtime::controller::Action;

    fn reconciler(client: kube::Client) -> Reconciler {
        Reconciler::new(client, ReconcileStrategy::Annotation, Metrics::new().unwrap())
    }

    fn annotated(spec: &AppServiceSpec) -> AppService {
        let mut app = create_test_app_service("web", "default");
        annotate_spec(&mut app, spec).unwrap();
        app
    }

    fn recorded(body: &serde_json::Value) -> AppServiceSpec {
        let raw = body["metadata"]["annotations"][OLD_SPEC_ANNOTATION]
            .as_str()
            .expect("old/spec annotation");
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_creates_children_and_records_spec() {
        let (client, mut server) = testcontext();
        let app = create_test_app_service("web", "default");

        let scenario = tokio::spawn(async move {
            server.not_found(Method::GET, &format!("{}/web", DEPLOYMENTS)).await;

            let app = create_test_app_service("web", "default");
            server
                .respond(Method::GET, &format!("{}/web", APPSERVICES), StatusCode::OK, &app)
                .await;
            let updated = server
                .echo(Method::PUT, &format!("{}/web", APPSERVICES), StatusCode::OK)
                .await;
            assert_eq!(recorded(&updated), app.spec);

            let deployment = server.echo(Method::POST, DEPLOYMENTS, StatusCode::CREATED).await;
            assert_eq!(deployment["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:1.25");
            let service = server.echo(Method::POST, SERVICES, StatusCode::CREATED).await;
            assert_eq!(service["spec"]["selector"]["myapp"], "web");

            server
                .respond(Method::PATCH, &format!("{}/web/status", APPSERVICES), StatusCode::OK, &app)
                .await;
        });

        reconciler(client).reconcile_app_service(&app).await.unwrap();
        timeout_after_1s(scenario).await;
    }

    #[tokio::test]
    async fn test_reconcile_tolerates_existing_service() {
        let (client, mut server) = testcontext();
        let app = create_test_app_service("web", "default");

        let scenario = tokio::spawn(async move {
            server.not_found(Method::GET, &format!("{}/web", DEPLOYMENTS)).await;
            let app = create_test_app_service("web", "default");
            server
                .respond(Method::GET, &format!("{}/web", APPSERVICES), StatusCode::OK, &app)
                .await;
            server
                .echo(Method::PUT, &format!("{}/web", APPSERVICES), StatusCode::OK)
                .await;
            server.echo(Method::POST, DEPLOYMENTS, StatusCode::CREATED).await;
            server.fail(Method::POST, SERVICES, 409, "AlreadyExists").await;
            server
                .respond(Method::PATCH, &format!("{}/web/status", APPSERVICES), StatusCode::OK, &app)
                .await;
        });

        reconciler(client).reconcile_app_service(&app).await.unwrap();
        timeout_after_1s(scenario).await;
    }

    #[tokio::test]
    async fn test_reconcile_unchanged_spec_skips_writes() {
        let (client, mut server) = testcontext();
        let base = create_test_app_service("web", "default");
        let mut app = annotated(&base.spec);
        let mut deployment = new_deployment(&app).unwrap();
        deployment.status = Some(DeploymentStatus {
            ready_replicas: Some(2),
            ..Default::default()
        });
        app.status = Some(observed_status(&app, Some(&deployment)));

        let scenario = tokio::spawn(async move {
            server
                .respond(Method::GET, &format!("{}/web", DEPLOYMENTS), StatusCode::OK, &deployment)
                .await;
        });

        let action = reconciler(client).reconcile_app_service(&app).await.unwrap();
        timeout_after_1s(scenario).await;
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_changed_spec_updates_children() {
        let (client, mut server) = testcontext();
        let previous = create_test_app_service("web", "default");
        let mut app = annotated(&previous.spec);
        app.spec.image = "nginx:1.26".to_string();
        app.spec.size = Some(3);

        let deployment = new_deployment(&previous).unwrap();
        let mut service = new_service(&previous).unwrap();
        if let Some(spec) = service.spec.as_mut() {
            spec.cluster_ip = Some("10.96.0.12".to_string());
        }
        let live_app = app.clone();

        let scenario = tokio::spawn(async move {
            server
                .respond(Method::GET, &format!("{}/web", DEPLOYMENTS), StatusCode::OK, &deployment)
                .await;

            // Deployment write conflicts once and is retried from a fresh read
            server
                .respond(Method::GET, &format!("{}/web", DEPLOYMENTS), StatusCode::OK, &deployment)
                .await;
            server
                .fail(Method::PUT, &format!("{}/web", DEPLOYMENTS), 409, "Conflict")
                .await;
            server
                .respond(Method::GET, &format!("{}/web", DEPLOYMENTS), StatusCode::OK, &deployment)
                .await;
            let replaced = server
                .echo(Method::PUT, &format!("{}/web", DEPLOYMENTS), StatusCode::OK)
                .await;
            assert_eq!(replaced["spec"]["replicas"], 3);
            assert_eq!(replaced["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:1.26");

            server
                .respond(Method::GET, &format!("{}/web", SERVICES), StatusCode::OK, &service)
                .await;
            let replaced = server
                .echo(Method::PUT, &format!("{}/web", SERVICES), StatusCode::OK)
                .await;
            assert_eq!(replaced["spec"]["clusterIP"], "10.96.0.12");

            server
                .respond(Method::GET, &format!("{}/web", APPSERVICES), StatusCode::OK, &live_app)
                .await;
            let updated = server
                .echo(Method::PUT, &format!("{}/web", APPSERVICES), StatusCode::OK)
                .await;
            assert_eq!(recorded(&updated), live_app.spec);

            server
                .respond(Method::PATCH, &format!("{}/web/status", APPSERVICES), StatusCode::OK, &live_app)
                .await;
        });

        reconciler(client).reconcile_app_service(&app).await.unwrap();
        timeout_after_1s(scenario).await;
    }

    #[tokio::test]
    async fn test_reconcile_deployment_create_failure_is_returned() {
        let (client, mut server) = testcontext();
        let app = create_test_app_service("web", "default");

        let scenario = tokio::spawn(async move {
            server.not_found(Method::GET, &format!("{}/web", DEPLOYMENTS)).await;
            let app = create_test_app_service("web", "default");
            server
                .respond(Method::GET, &format!("{}/web", APPSERVICES), StatusCode::OK, &app)
                .await;
            server
                .echo(Method::PUT, &format!("{}/web", APPSERVICES), StatusCode::OK)
                .await;
            server.fail(Method::POST, DEPLOYMENTS, 403, "Forbidden").await;
            let patch = server
                .respond(Method::PATCH, &format!("{}/web/status", APPSERVICES), StatusCode::OK, &app)
                .await;
            assert_eq!(patch["status"]["state"], "Failed");
        });

        let err = reconciler(client).reconcile_app_service(&app).await.unwrap_err();
        timeout_after_1s(scenario).await;
        assert_eq!(err.api_code(), Some(403));
    }
}
