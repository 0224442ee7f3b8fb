//! AppService CRD
//!
//! Declares an application (image, replicas, ports, env, resources) that the
//! controller materializes as a Deployment plus a NodePort Service.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation holding the JSON spec recorded at the last successful sync.
pub const OLD_SPEC_ANNOTATION: &str = "old/spec";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "app.ydzs.io",
    version = "v1beta1",
    kind = "AppService",
    namespaced,
    status = "AppServiceStatus",
    shortname = "appsvc",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppServiceSpec {
    /// Container image
    pub image: String,

    /// Replica count (Deployment default when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,

    /// Ports exposed through the Service
    #[serde(default)]
    pub ports: Vec<AppServicePort>,

    /// Container environment variables
    #[serde(default)]
    pub envs: Vec<EnvVarSpec>,

    /// Compute resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,
}

/// A port exposed by the application.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppServicePort {
    /// Port name (required by Kubernetes when more than one port is declared)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Protocol ("TCP", "UDP" or "SCTP")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Service port
    pub port: i32,

    /// Container port traffic is forwarded to (defaults to `port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,

    /// Fixed node port; allocated by the API server when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

impl AppServicePort {
    /// Port the container listens on.
    pub fn container_port(&self) -> i32 {
        self.target_port.unwrap_or(self.port)
    }
}

/// A single environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSpec {
    /// Variable name
    pub name: String,

    /// Variable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Resource requests/limits expressed as Kubernetes quantity strings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Upper bounds, e.g. `{"cpu": "500m", "memory": "256Mi"}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, String>>,

    /// Guaranteed amounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppServiceStatus {
    /// Reconciliation state
    pub state: AppServiceState,

    /// Desired replicas as seen on the Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Ready replicas reported by the Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    /// Generation of the AppService last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the state changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,

    /// Error message if reconciliation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// AppService reconciliation state
///
/// Serializes as PascalCase and also accepts lowercase on input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum AppServiceState {
    /// Children created, waiting for replicas
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// All desired replicas are ready
    #[serde(alias = "ready")]
    Ready,

    /// Last reconciliation failed
    #[serde(alias = "failed")]
    Failed,
}

impl AppServiceState {
    /// Name as written to the status subresource.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppServiceState::Pending => "Pending",
            AppServiceState::Ready => "Ready",
            AppServiceState::Failed => "Failed",
        }
    }
}
