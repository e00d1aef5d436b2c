use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            ConfigMapVolumeSource, Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction,
            LocalObjectReference, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
            Probe, ResourceRequirements, SecretVolumeSource, TCPSocketAction, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};

use super::{app_selector, non_empty, object_meta, to_yaml};
use crate::{
    error::Result,
    model::{ModuleContext, ProbeAction, ProbeModel, Quantities},
    validate::ValidatedModule,
};

pub(super) fn render(module: &ValidatedModule, namespace: Option<&str>) -> Result<String> {
    let d = &module.deployment;
    let name = module.deployment_name();
    let selector = app_selector(&name);

    let mut pod_labels = d.labels.clone();
    pod_labels.extend(selector.clone());

    let ports: Vec<_> = module
        .container_ports()
        .into_iter()
        .map(|port| ContainerPort {
            container_port: port.into(),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();
    let mut container = container(module, &name, &d.env, d.image_pull_policy.as_deref());
    container.ports = (!ports.is_empty()).then_some(ports);
    container.liveness_probe = d.liveness.as_ref().map(probe);
    container.readiness_probe = d.readiness.as_ref().map(probe);
    container.resources = resources(&d.resources.requests, &d.resources.limits);

    let deployment = Deployment {
        metadata: object_meta(&name, namespace, &d.labels, &d.annotations),
        spec: Some(DeploymentSpec {
            replicas: d.replicas,
            selector: LabelSelector {
                match_labels: Some(selector),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: non_empty(&d.pod_annotations),
                    ..Default::default()
                }),
                spec: Some(pod_spec(module, container, None)),
            },
            ..Default::default()
        }),
        status: None,
    };
    to_yaml(&deployment)
}

/// The module's single container. Jobs and the deployment share it.
pub(super) fn container(
    ctx: &ModuleContext,
    name: &str,
    env: &BTreeMap<String, String>,
    image_pull_policy: Option<&str>,
) -> Container {
    let env: Vec<EnvVar> = env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();
    Container {
        name: name.to_string(),
        image: Some(ctx.docker.image_reference()),
        image_pull_policy: image_pull_policy.map(str::to_string),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: volume_mounts(ctx),
        ..Default::default()
    }
}

/// Pod spec mounting every config map, secret and claim of the module.
pub(super) fn pod_spec(
    ctx: &ModuleContext,
    container: Container,
    restart_policy: Option<&str>,
) -> PodSpec {
    let d = &ctx.deployment;
    let image_pull_secrets: Vec<_> = d
        .image_pull_secrets
        .iter()
        .map(|s| LocalObjectReference {
            name: Some(s.clone()),
        })
        .collect();
    PodSpec {
        containers: vec![container],
        volumes: volumes(ctx),
        image_pull_secrets: (!image_pull_secrets.is_empty()).then_some(image_pull_secrets),
        service_account_name: d.service_account.clone(),
        restart_policy: restart_policy.map(str::to_string),
        ..Default::default()
    }
}

fn volume_mounts(ctx: &ModuleContext) -> Option<Vec<VolumeMount>> {
    let mut mounts = Vec::new();
    for cm in &ctx.config_maps {
        if let Some(path) = &cm.mount_path {
            mounts.push(VolumeMount {
                name: format!("{}-volume", cm.name),
                mount_path: path.clone(),
                read_only: Some(cm.read_only),
                ..Default::default()
            });
        }
    }
    for secret in &ctx.secrets {
        if let Some(path) = &secret.mount_path {
            mounts.push(VolumeMount {
                name: format!("{}-volume", secret.name),
                mount_path: path.clone(),
                read_only: Some(secret.read_only),
                ..Default::default()
            });
        }
    }
    for claim in &ctx.volume_claims {
        mounts.push(VolumeMount {
            name: format!("{}-volume", claim.name),
            mount_path: claim.mount_path.clone(),
            read_only: Some(claim.read_only),
            ..Default::default()
        });
    }
    (!mounts.is_empty()).then_some(mounts)
}

fn volumes(ctx: &ModuleContext) -> Option<Vec<Volume>> {
    let mut volumes = Vec::new();
    for cm in ctx.config_maps.iter().filter(|c| c.mount_path.is_some()) {
        volumes.push(Volume {
            name: format!("{}-volume", cm.name),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(cm.name.clone()),
                default_mode: cm.default_mode,
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    for secret in ctx.secrets.iter().filter(|s| s.mount_path.is_some()) {
        volumes.push(Volume {
            name: format!("{}-volume", secret.name),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                default_mode: secret.default_mode,
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    for claim in &ctx.volume_claims {
        volumes.push(Volume {
            name: format!("{}-volume", claim.name),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.name.clone(),
                read_only: Some(claim.read_only),
            }),
            ..Default::default()
        });
    }
    (!volumes.is_empty()).then_some(volumes)
}

fn probe(p: &ProbeModel) -> Probe {
    let port = || IntOrString::Int(p.port.map(i32::from).unwrap_or_default());
    let mut probe = Probe {
        initial_delay_seconds: Some(p.initial_delay_seconds),
        period_seconds: Some(p.period_seconds),
        ..Default::default()
    };
    match &p.action {
        ProbeAction::TcpSocket => {
            probe.tcp_socket = Some(TCPSocketAction {
                port: port(),
                host: None,
            })
        }
        ProbeAction::HttpGet { path } => {
            probe.http_get = Some(HTTPGetAction {
                path: Some(path.clone()),
                port: port(),
                ..Default::default()
            })
        }
        ProbeAction::Exec { command } => {
            probe.exec = Some(ExecAction {
                command: Some(command.clone()),
            })
        }
    }
    probe
}

fn quantities(q: &Quantities) -> Option<BTreeMap<String, Quantity>> {
    let map: BTreeMap<_, _> = [("cpu", &q.cpu), ("memory", &q.memory)]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), Quantity(v.clone()))))
        .collect();
    (!map.is_empty()).then_some(map)
}

fn resources(requests: &Quantities, limits: &Quantities) -> Option<ResourceRequirements> {
    if requests.is_empty() && limits.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: quantities(requests),
        limits: quantities(limits),
        ..Default::default()
    })
}
