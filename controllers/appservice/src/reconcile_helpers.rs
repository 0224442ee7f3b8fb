//! Helper functions for common reconciliation patterns
//!
//! This module provides the generic create-or-update flow used by the
//! default strategy, plus the status bookkeeping shared by both reconciler
//! variants.

use crate::error::ControllerError;
use crate::retry::retry_on_conflict;
use crds::{AppService, AppServiceState, AppServiceStatus};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Outcome of [`create_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Live object already matched the desired state
    Unchanged,
    /// Object did not exist and was created
    Created,
    /// Object existed and was replaced
    Updated,
}

impl OperationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationResult::Unchanged => "unchanged",
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `namespace/name` key used for logging and backoff tracking.
pub fn resource_key<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.as_deref().unwrap_or("default"),
        obj.meta().name.as_deref().unwrap_or("<unknown>")
    )
}

/// Applies `mutate` to a copy of `existing`.
///
/// Returns `Ok(None)` when the mutation changed nothing, `Ok(Some(obj))` with
/// the object to write otherwise. The mutation may not rename or move the
/// object.
pub fn apply_mutation<K, F>(existing: &K, mutate: F) -> Result<Option<K>, ControllerError>
where
    K: Resource + Clone + PartialEq,
    F: FnOnce(&mut K) -> Result<(), ControllerError>,
{
    let mut desired = existing.clone();
    mutate(&mut desired)?;

    if desired.meta().name != existing.meta().name
        || desired.meta().namespace != existing.meta().namespace
    {
        return Err(ControllerError::Reconciliation(format!(
            "mutation changed the identity of {}",
            resource_key(existing)
        )));
    }

    if desired == *existing {
        Ok(None)
    } else {
        Ok(Some(desired))
    }
}

/// Reads the named object and makes it match `mutate`.
///
/// When the object is absent a default one carrying `name`/`namespace` is
/// mutated and created. When present, `mutate` runs on a copy and the copy
/// is written back only if it differs. A write conflict re-reads the object
/// and runs `mutate` again, so `mutate` must be repeatable.
pub async fn create_or_update<K, F>(
    api: &Api<K>,
    name: &str,
    namespace: &str,
    mutate: F,
) -> Result<(K, OperationResult), ControllerError>
where
    K: Resource + Clone + PartialEq + Default + Serialize + DeserializeOwned + fmt::Debug,
    F: Fn(&mut K) -> Result<(), ControllerError>,
{
    let mutate = &mutate;
    retry_on_conflict(move || async move {
        match api.get_opt(name).await? {
            None => {
                let mut obj = K::default();
                obj.meta_mut().name = Some(name.to_string());
                obj.meta_mut().namespace = Some(namespace.to_string());
                mutate(&mut obj)?;
                let created = api.create(&PostParams::default(), &obj).await?;
                Ok::<_, ControllerError>((created, OperationResult::Created))
            }
            Some(existing) => match apply_mutation(&existing, mutate)? {
                None => {
                    debug!("{} already up-to-date", resource_key(&existing));
                    Ok((existing, OperationResult::Unchanged))
                }
                Some(desired) => {
                    let updated = api.replace(name, &PostParams::default(), &desired).await?;
                    Ok((updated, OperationResult::Updated))
                }
            },
        }
    })
    .await
}

/// Status reflecting the current Deployment of an AppService.
///
/// Ready once the Deployment reports at least the desired number of ready
/// replicas (1 when unset).
pub fn observed_status(app: &AppService, deployment: Option<&Deployment>) -> AppServiceStatus {
    let replicas = deployment
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.replicas)
        .or(app.spec.size);
    let ready_replicas = deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.ready_replicas);

    let state = if ready_replicas.unwrap_or(0) >= replicas.unwrap_or(1) {
        AppServiceState::Ready
    } else {
        AppServiceState::Pending
    };

    AppServiceStatus {
        state,
        replicas,
        ready_replicas,
        observed_generation: app.metadata.generation,
        last_reconciled: None,
        error: None,
    }
}

/// Status recorded after a failed reconciliation.
pub fn failed_status(app: &AppService, error: &ControllerError) -> AppServiceStatus {
    let previous = app.status.clone().unwrap_or_default();
    AppServiceStatus {
        state: AppServiceState::Failed,
        observed_generation: app.metadata.generation,
        last_reconciled: None,
        error: Some(error.to_string()),
        ..previous
    }
}

/// Check if the status needs writing.
///
/// `last_reconciled` is ignored; comparing it would make every pass write
/// and re-trigger the watch.
pub fn status_needs_update(current: Option<&AppServiceStatus>, desired: &AppServiceStatus) -> bool {
    match current {
        None => true,
        Some(status) => {
            status.state != desired.state
                || status.replicas != desired.replicas
                || status.ready_replicas != desired.ready_replicas
                || status.observed_generation != desired.observed_generation
                || status.error != desired.error
        }
    }
}

/// Fills in `last_reconciled`: a fresh timestamp when the state changed,
/// otherwise the previous one.
pub fn stamp_status(
    current: Option<&AppServiceStatus>,
    mut desired: AppServiceStatus,
    now: chrono::DateTime<chrono::Utc>,
) -> AppServiceStatus {
    desired.last_reconciled = match current {
        Some(status) if status.state == desired.state => status.last_reconciled.or(Some(now)),
        _ => Some(now),
    };
    desired
}

/// Merge patch body for the status subresource.
///
/// Optional fields that are unset are sent as `null` so the merge clears
/// values left over from an earlier pass (e.g. a resolved error).
pub fn status_patch(status: &AppServiceStatus) -> Result<serde_json::Value, ControllerError> {
    let mut value = serde_json::to_value(status)?;
    if let Some(fields) = value.as_object_mut() {
        for key in ["replicas", "readyReplicas", "observedGeneration", "error"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({ "status": value }))
}

/// Name of the AppService, or an error for objects missing it.
pub fn app_name(app: &AppService) -> Result<String, ControllerError> {
    app.metadata
        .name
        .clone()
        .ok_or(ControllerError::MissingObjectKey(".metadata.name"))
}

/// Namespace of the AppService, or an error for objects missing it.
pub fn app_namespace(app: &AppService) -> Result<String, ControllerError> {
    app.namespace()
        .ok_or(ControllerError::MissingObjectKey(".metadata.namespace"))
}
