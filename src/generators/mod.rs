//! Pure rendering of a validated module into manifest and Dockerfile text.
//!
//! Every generator builds the matching `k8s-openapi` object and serializes it
//! with `serde_yaml`. Maps are `BTreeMap`s and lists keep model order, so the
//! same module always renders to the same bytes.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

use crate::{error::Result, validate::ValidatedModule};

mod config;
mod deployment;
mod docker;
mod hpa;
mod ingress;
mod job;
mod service;
mod volume;

pub use docker::{copy_file_context_path, render_dockerfile, LIBS_DIR};

pub const DOCKERFILE: &str = "Dockerfile";
/// Pod label every Service and the Deployment selector match on.
pub const APP_LABEL: &str = "app";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Kubernetes,
    Docker,
}

/// One rendered file, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub destination: Destination,
    pub file_name: String,
    pub contents: String,
}

impl Artifact {
    fn manifest(name: &str, kind: &str, contents: String) -> Self {
        Self {
            destination: Destination::Kubernetes,
            file_name: format!("{name}_{kind}.yaml"),
            contents,
        }
    }
}

/// Settings that apply to every resource of a module.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Used when the deployment annotation does not set one.
    pub namespace: Option<String>,
}

/// Render everything in a fixed order: deployment, services, autoscaler,
/// jobs, config maps, secrets, volume claims, ingresses, Dockerfile.
pub fn render_all(module: &ValidatedModule, opts: &RenderOptions) -> Result<Vec<Artifact>> {
    let namespace = module
        .deployment
        .namespace
        .as_deref()
        .or(opts.namespace.as_deref());
    let mut out = Vec::new();

    if let Some(name) = module.deployment.name.as_deref() {
        let yaml = deployment::render(module, namespace)?;
        out.push(Artifact::manifest(name, "deployment", yaml));
    }
    for svc in module.services.values() {
        let (name, yaml) = service::render(module, svc, namespace)?;
        out.push(Artifact::manifest(&name, "svc", yaml));
    }
    if let Some(hpa) = &module.hpa {
        let (name, yaml) = hpa::render(hpa, namespace)?;
        out.push(Artifact::manifest(&name, "hpa", yaml));
    }
    for job in module.jobs.values() {
        let (name, kind, yaml) = job::render(module, job, namespace)?;
        out.push(Artifact::manifest(&name, kind, yaml));
    }
    for cm in &module.config_maps {
        let yaml = config::render_config_map(cm, namespace)?;
        out.push(Artifact::manifest(&cm.name, "config_map", yaml));
    }
    for secret in &module.secrets {
        let yaml = config::render_secret(secret, namespace)?;
        out.push(Artifact::manifest(&secret.name, "secret", yaml));
    }
    for claim in &module.volume_claims {
        let yaml = volume::render(claim, namespace)?;
        out.push(Artifact::manifest(&claim.name, "volume_claim", yaml));
    }
    for ingress in module.ingresses.values() {
        let (name, yaml) = ingress::render(ingress, namespace)?;
        out.push(Artifact::manifest(&name, "ingress", yaml));
    }

    out.push(Artifact {
        destination: Destination::Docker,
        file_name: DOCKERFILE.to_string(),
        contents: render_dockerfile(&module.docker),
    });
    Ok(out)
}

fn to_yaml<T: Serialize>(resource: &T) -> Result<String> {
    Ok(serde_yaml::to_string(resource)?)
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.clone())
}

fn object_meta(
    name: &str,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: non_empty(labels),
        annotations: non_empty(annotations),
        ..Default::default()
    }
}

fn app_selector(deployment_name: &str) -> BTreeMap<String, String> {
    [(APP_LABEL.to_string(), deployment_name.to_string())].into()
}
