//! Kubernetes resource builders for AppService.
//!
//! Pure functions mapping an `AppService` onto the `Deployment` and
//! `Service` it owns. Both children share the AppService's name and
//! namespace and select pods through the `myapp=<name>` label.

use crate::error::ControllerError;
use crds::{AppService, AppServicePort, ResourceSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Label key joining the Service selector to the pods.
pub const APP_LABEL: &str = "myapp";

/// Service type used for every AppService.
pub const SERVICE_TYPE_NODE_PORT: &str = "NodePort";

/// Selector and pod labels for an AppService.
pub fn labels(app: &AppService) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.name_any())])
}

/// Controller OwnerReference so children are garbage collected with the AppService.
pub fn owner_reference(app: &AppService) -> Result<OwnerReference, ControllerError> {
    Ok(OwnerReference {
        api_version: AppService::api_version(&()).to_string(),
        kind: AppService::kind(&()).to_string(),
        name: app
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKey(".metadata.name"))?,
        uid: app
            .metadata
            .uid
            .clone()
            .ok_or(ControllerError::MissingObjectKey(".metadata.uid"))?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Marks `app` as the managing controller of `object`.
///
/// An existing reference to the same owner is replaced in place; a
/// controller reference to any other object is an error, since an object
/// can only have one managing controller.
pub fn set_controller_reference<K: Resource>(
    app: &AppService,
    object: &mut K,
) -> Result<(), ControllerError> {
    let owner = owner_reference(app)?;
    let refs = object.owner_references_mut();

    if let Some(other) = refs.iter().find(|r| {
        r.controller == Some(true) && !(r.kind == owner.kind && r.name == owner.name)
    }) {
        return Err(ControllerError::AlreadyOwned(format!(
            "{} {}",
            other.kind, other.name
        )));
    }

    match refs.iter_mut().find(|r| {
        r.kind == owner.kind && r.name == owner.name && api_group(&r.api_version) == api_group(&owner.api_version)
    }) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
    Ok(())
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map_or("", |(group, _)| group)
}

fn quantities(values: &Option<BTreeMap<String, String>>) -> Option<BTreeMap<String, Quantity>> {
    values.as_ref().map(|m| {
        m.iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect()
    })
}

fn resource_requirements(spec: &ResourceSpec) -> ResourceRequirements {
    ResourceRequirements {
        limits: quantities(&spec.limits),
        requests: quantities(&spec.requests),
        ..Default::default()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

/// The single application container: image, env, resources and one
/// container port per exposed port.
pub fn new_containers(app: &AppService) -> Vec<Container> {
    let ports = app
        .spec
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.container_port(),
            protocol: p.protocol.clone(),
            ..Default::default()
        })
        .collect();

    let env = app
        .spec
        .envs
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
            ..Default::default()
        })
        .collect();

    vec![Container {
        name: app.name_any(),
        image: Some(app.spec.image.clone()),
        env: non_empty(env),
        resources: app.spec.resources.as_ref().map(resource_requirements),
        ports: non_empty(ports),
        ..Default::default()
    }]
}

/// Desired Deployment spec.
pub fn deployment_spec(app: &AppService) -> DeploymentSpec {
    let labels = labels(app);
    DeploymentSpec {
        replicas: app.spec.size,
        selector: LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: new_containers(app),
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}

/// Builds the Deployment for a new AppService.
pub fn new_deployment(app: &AppService) -> Result<Deployment, ControllerError> {
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(app.name_any()),
            namespace: app.namespace(),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(deployment_spec(app)),
        status: None,
    })
}

/// Overwrites the Deployment spec with the desired one.
pub fn mutate_deployment(app: &AppService, deployment: &mut Deployment) {
    deployment.spec = Some(deployment_spec(app));
}

fn service_port(port: &AppServicePort, existing: Option<&ServiceSpec>) -> ServicePort {
    // Keep the node port the API server already allocated for this port.
    let node_port = port.node_port.or_else(|| {
        existing
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.port == port.port))
            .and_then(|p| p.node_port)
    });

    ServicePort {
        name: port.name.clone(),
        protocol: port.protocol.clone(),
        port: port.port,
        target_port: Some(IntOrString::Int(port.container_port())),
        node_port,
        ..Default::default()
    }
}

/// Desired Service spec, carrying over server-assigned addresses from `existing`.
pub fn service_spec(app: &AppService, existing: Option<&ServiceSpec>) -> ServiceSpec {
    let ports = app
        .spec
        .ports
        .iter()
        .map(|p| service_port(p, existing))
        .collect();

    ServiceSpec {
        cluster_ip: existing.and_then(|s| s.cluster_ip.clone()),
        cluster_ips: existing.and_then(|s| s.cluster_ips.clone()),
        ports: non_empty(ports),
        selector: Some(labels(app)),
        type_: Some(SERVICE_TYPE_NODE_PORT.to_string()),
        ..Default::default()
    }
}

/// Builds the Service for a new AppService.
pub fn new_service(app: &AppService) -> Result<Service, ControllerError> {
    Ok(Service {
        metadata: ObjectMeta {
            name: Some(app.name_any()),
            namespace: app.namespace(),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(service_spec(app, None)),
        status: None,
    })
}

/// Overwrites the Service spec with the desired one, keeping the cluster IP
/// (which is immutable) and allocated node ports.
pub fn mutate_service(app: &AppService, service: &mut Service) {
    let spec = service_spec(app, service.spec.as_ref());
    service.spec = Some(spec);
}
