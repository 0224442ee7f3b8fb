//! Controller configuration.
//!
//! All settings come from environment variables so the controller can be
//! configured from its Deployment manifest.

use crate::error::ControllerError;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_CONCURRENCY: u16 = 3;
const DEFAULT_DEBOUNCE_SECS: u64 = 1;

/// How the reconciler decides whether children need updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileStrategy {
    /// Compute the desired child, compare with the live object, write on difference.
    #[default]
    CreateOrUpdate,
    /// Compare the spec against the copy recorded in the `old/spec` annotation.
    Annotation,
}

impl ReconcileStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStrategy::CreateOrUpdate => "create-or-update",
            ReconcileStrategy::Annotation => "annotation",
        }
    }
}

impl fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconcileStrategy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create-or-update" | "createorupdate" => Ok(ReconcileStrategy::CreateOrUpdate),
            "annotation" => Ok(ReconcileStrategy::Annotation),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown RECONCILE_STRATEGY '{}' (expected 'create-or-update' or 'annotation')",
                other
            ))),
        }
    }
}

/// Runtime settings for the AppService controller.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Reconciler variant
    pub strategy: ReconcileStrategy,
    /// Listen address for `/healthz`, `/readyz` and `/metrics`
    pub http_bind_address: SocketAddr,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
    /// Quiet period after the last event before reconciling
    pub debounce: Duration,
}

impl OperatorConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let strategy = match lookup("RECONCILE_STRATEGY") {
            Some(value) => value.parse()?,
            None => ReconcileStrategy::default(),
        };

        let bind = lookup("HTTP_BIND_ADDRESS").unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());
        let http_bind_address = bind.parse::<SocketAddr>().map_err(|_| {
            ControllerError::InvalidConfig(format!("HTTP_BIND_ADDRESS '{}' is not a socket address", bind))
        })?;

        let concurrency = parse_or("RECONCILE_CONCURRENCY", &lookup, DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        let debounce_secs = parse_or("RECONCILE_DEBOUNCE_SECS", &lookup, DEFAULT_DEBOUNCE_SECS)?;

        Ok(Self {
            namespace,
            strategy,
            http_bind_address,
            concurrency,
            debounce: Duration::from_secs(debounce_secs),
        })
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{} '{}' is not a valid number", key, value))
        }),
        None => Ok(default),
    }
}
