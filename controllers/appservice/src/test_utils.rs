//! Test utilities for unit testing reconcilers
//!
//! Provides AppService fixtures and a scripted fake API server: the kube
//! `Client` is built on a `tower_test` mock service, and each test answers
//! the requests it expects in order.

use crds::{AppService, AppServicePort, AppServiceSpec};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::client::Body;
use kube::Client;
use serde::Serialize;
use std::time::Duration;

/// Helper to create a test AppService: nginx, 2 replicas, port 80 -> 8080.
pub fn create_test_app_service(name: &str, namespace: &str) -> AppService {
    AppService {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            generation: Some(1),
            resource_version: Some("100".to_string()),
            ..Default::default()
        },
        spec: AppServiceSpec {
            image: "nginx:1.25".to_string(),
            size: Some(2),
            ports: vec![AppServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: Some(8080),
                ..Default::default()
            }],
            envs: vec![],
            resources: None,
        },
        status: None,
    }
}

pub const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/default/deployments";
pub const SERVICES: &str = "/api/v1/namespaces/default/services";
pub const APPSERVICES: &str = "/apis/app.ydzs.io/v1beta1/namespaces/default/appservices";

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
type Responder = tower_test::mock::SendResponse<Response<Body>>;

/// Scripted stand-in for the Kubernetes API server.
pub struct ApiServerVerifier(ApiServerHandle);

/// Create a test context with a mocked kube client
pub fn testcontext() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let mock_client = Client::new(mock_service, "default");
    (mock_client, ApiServerVerifier(handle))
}

/// Waits for the scripted server task, failing the test if calls are missing.
pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let bytes = serde_json::to_vec(body).expect("serializable response");
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .expect("valid response")
}

impl ApiServerVerifier {
    /// Takes the next request and checks its method and path.
    async fn next(&mut self, method: Method, path: &str) -> (serde_json::Value, Responder) {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), method, "unexpected method for {}", request.uri());
        assert_eq!(request.uri().path(), path);
        let bytes = request
            .into_body()
            .collect()
            .await
            .expect("readable request body")
            .to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json request body")
        };
        (body, send)
    }

    /// Answers the next request with a NotFound status.
    pub async fn not_found(&mut self, method: Method, path: &str) {
        let (_, send) = self.next(method, path).await;
        send.send_response(json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": format!("{} not found", path),
                "reason": "NotFound",
                "code": 404,
            }),
        ));
    }

    /// Answers the next request with an error status.
    pub async fn fail(&mut self, method: Method, path: &str, code: u16, reason: &str) {
        let (_, send) = self.next(method, path).await;
        send.send_response(json_response(
            StatusCode::from_u16(code).expect("valid status code"),
            &serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": reason,
                "reason": reason,
                "code": code,
            }),
        ));
    }

    /// Answers the next request with `object` and returns the request body.
    pub async fn respond<T: Serialize>(
        &mut self,
        method: Method,
        path: &str,
        status: StatusCode,
        object: &T,
    ) -> serde_json::Value {
        let (body, send) = self.next(method, path).await;
        send.send_response(json_response(status, object));
        body
    }

    /// Answers the next write by echoing its body back, as the API server
    /// does for a successful create/replace.
    pub async fn echo(&mut self, method: Method, path: &str, status: StatusCode) -> serde_json::Value {
        let (body, send) = self.next(method, path).await;
        send.send_response(json_response(status, &body));
        body
    }
}
