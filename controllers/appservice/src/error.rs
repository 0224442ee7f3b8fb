//! Controller-specific error types.
//!
//! This module defines error types specific to the AppService Controller
//! that are not covered by upstream library errors.

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the AppService Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),
    
    /// Spec (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    
    /// Object is missing a required metadata field
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),
    
    /// Child object is already controlled by a different owner
    #[error("Object is already owned by {0}")]
    AlreadyOwned(String),
    
    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),
    
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    
    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
    
    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    
    /// Probe/metrics HTTP server error
    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}

impl ControllerError {
    /// Returns the HTTP status code when this wraps an API server error response.
    pub fn api_code(&self) -> Option<u16> {
        match self {
            ControllerError::Kube(KubeError::Api(response)) => Some(response.code),
            _ => None,
        }
    }
    
    /// Write rejected because the object changed since it was read.
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }
    
    /// Create rejected because the object already exists.
    pub fn is_already_exists(&self) -> bool {
        self.api_code() == Some(409)
            && matches!(self, ControllerError::Kube(KubeError::Api(response)) if response.reason == "AlreadyExists")
    }
    
    /// Short label for metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Serialization(_) => "serialization",
            ControllerError::MissingObjectKey(_) => "missing_object_key",
            ControllerError::AlreadyOwned(_) => "already_owned",
            ControllerError::Reconciliation(_) => "reconciliation",
            ControllerError::InvalidConfig(_) => "invalid_config",
            ControllerError::Watch(_) => "watch",
            ControllerError::Metrics(_) => "metrics",
            ControllerError::Http(_) => "http",
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> ControllerError {
    let response: kube::core::ErrorResponse = serde_json::from_value(serde_json::json!({
        "status": "Failure",
        "message": format!("test error {}", code),
        "reason": reason,
        "code": code,
    }))
    .expect("valid error response");
    ControllerError::Kube(KubeError::Api(response))
}
