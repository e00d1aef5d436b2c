use serde_json::Value;

use super::{
    probe::probe_from_value, require_workload_target, resolve_name, scalar_string,
    AnnotationProcessor, Fields,
};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, Origin},
    model::{assign, merge_map, CopyFile, ModuleContext, ProbeKind, Quantities},
    names::DEPLOYMENT_POSTFIX,
};

const KEYS: &[&str] = &[
    "name",
    "namespace",
    "labels",
    "annotations",
    "podAnnotations",
    "replicas",
    "image",
    "registry",
    "tag",
    "baseImage",
    "imagePullPolicy",
    "env",
    "imageEnv",
    "cmd",
    "entrypoint",
    "livenessProbe",
    "readinessProbe",
    "resources",
    "imagePullSecrets",
    "serviceAccountName",
    "copyFiles",
];

const RESOURCE_KEYS: &[&str] = &["requests", "limits"];
const QUANTITY_KEYS: &[&str] = &["cpu", "memory"];
const COPY_FILE_KEYS: &[&str] = &["sourceFile", "target"];

const PULL_POLICIES: &[&str] = &["Always", "IfNotPresent", "Never"];

pub struct DeploymentProcessor;

impl AnnotationProcessor for DeploymentProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        require_workload_target(AnnotationKind::Deployment, &annotation.target)?;
        let fields = Fields::new(AnnotationKind::Deployment, &annotation.data, KEYS);
        let origin = annotation.origin;

        let (name, explicit_name) = resolve_name(&fields, &ctx.module, DEPLOYMENT_POSTFIX)?;
        let image_pull_policy = pull_policy(&fields)?;
        let liveness = probe_from_value(ProbeKind::Liveness, &fields, "livenessProbe")?;
        let readiness = probe_from_value(ProbeKind::Readiness, &fields, "readinessProbe")?;
        let (requests, limits) = resources(&fields)?;
        let copy_files = copy_files(&fields)?;
        let entrypoint = match fields.value("entrypoint") {
            None => None,
            Some(Value::String(s)) => Some(vec![s.clone()]),
            Some(_) => Some(fields.string_list("entrypoint")?),
        };
        let mut annotations = fields.string_map("annotations")?;
        annotations.extend(fields.passthrough());

        let deployment = &mut ctx.deployment;
        deployment.declared = true;
        if explicit_name {
            assign(&mut deployment.name, name, origin);
        }
        if let Some(namespace) = fields.string("namespace")? {
            assign(&mut deployment.namespace, namespace, origin);
        }
        if let Some(replicas) = fields.count("replicas")? {
            assign(&mut deployment.replicas, replicas, origin);
        }
        if let Some(policy) = image_pull_policy {
            assign(&mut deployment.image_pull_policy, policy, origin);
        }
        if let Some(account) = fields.string("serviceAccountName")? {
            assign(&mut deployment.service_account, account, origin);
        }
        merge_map(&mut deployment.labels, fields.string_map("labels")?, origin);
        merge_map(&mut deployment.annotations, annotations, origin);
        merge_map(
            &mut deployment.pod_annotations,
            fields.string_map("podAnnotations")?,
            origin,
        );
        merge_map(&mut deployment.env, fields.string_map("env")?, origin);
        merge_quantities(&mut deployment.resources.requests, requests, origin);
        merge_quantities(&mut deployment.resources.limits, limits, origin);
        let secrets = fields.string_list("imagePullSecrets")?;
        if origin == Origin::Explicit || deployment.image_pull_secrets.is_empty() {
            for secret in secrets {
                if !deployment.image_pull_secrets.contains(&secret) {
                    deployment.image_pull_secrets.push(secret);
                }
            }
        }
        if let Some(probe) = liveness {
            deployment.set_probe(probe, origin);
        }
        if let Some(probe) = readiness {
            deployment.set_probe(probe, origin);
        }

        let docker = &mut ctx.docker;
        if let Some(image) = fields.string("image")? {
            assign(&mut docker.image, image, origin);
        }
        if let Some(registry) = fields.string("registry")? {
            assign(&mut docker.registry, registry, origin);
        }
        if let Some(tag) = fields.string("tag")? {
            assign(&mut docker.tag, tag, origin);
        }
        if let Some(base) = fields.string("baseImage")? {
            assign(&mut docker.base_image, base, origin);
        }
        if let Some(cmd) = fields.string("cmd")? {
            assign(&mut docker.cmd, cmd, origin);
        }
        if let Some(entrypoint) = entrypoint {
            assign(&mut docker.entrypoint, entrypoint, origin);
        }
        merge_map(&mut docker.env, fields.string_map("imageEnv")?, origin);
        for file in copy_files {
            if !docker.copy_files.contains(&file) {
                docker.copy_files.push(file);
            }
        }
        Ok(())
    }
}

/// `imagePullPolicy`, checked against the values kubernetes accepts.
pub(super) fn pull_policy(fields: &Fields) -> Result<Option<String>> {
    match fields.string("imagePullPolicy")? {
        Some(p) if !PULL_POLICIES.contains(&p.as_str()) => Err(Error::schema(format!(
            "invalid imagePullPolicy '{p}', expected one of {}",
            PULL_POLICIES.join(", ")
        ))),
        other => Ok(other),
    }
}

fn resources(fields: &Fields) -> Result<(Quantities, Quantities)> {
    let Some(resources) = fields.record("resources", RESOURCE_KEYS)? else {
        return Ok(Default::default());
    };
    Ok((
        quantities(&resources, "requests")?,
        quantities(&resources, "limits")?,
    ))
}

fn quantities(resources: &Fields, key: &str) -> Result<Quantities> {
    let Some(q) = resources.record(key, QUANTITY_KEYS)? else {
        return Ok(Quantities::default());
    };
    let quantity = |name: &str| -> Result<Option<String>> {
        match q.value(name) {
            None => Ok(None),
            Some(v) => scalar_string(v).map(Some).ok_or_else(|| {
                Error::schema(format!("resources.{key}.{name} must be a quantity, found {v}"))
            }),
        }
    };
    Ok(Quantities {
        cpu: quantity("cpu")?,
        memory: quantity("memory")?,
    })
}

fn merge_quantities(slot: &mut Quantities, value: Quantities, origin: Origin) {
    if let Some(cpu) = value.cpu {
        assign(&mut slot.cpu, cpu, origin);
    }
    if let Some(memory) = value.memory {
        assign(&mut slot.memory, memory, origin);
    }
}

fn copy_files(fields: &Fields) -> Result<Vec<CopyFile>> {
    fields
        .records("copyFiles", COPY_FILE_KEYS)?
        .into_iter()
        .map(|f| {
            let source = f
                .string("sourceFile")?
                .ok_or_else(|| Error::schema("copyFiles entry requires 'sourceFile'"))?;
            let target = f
                .string("target")?
                .ok_or_else(|| Error::schema("copyFiles entry requires 'target'"))?;
            if !target.starts_with('/') {
                return Err(Error::schema(format!(
                    "copyFiles target '{target}' must be an absolute path inside the image"
                )));
            }
            Ok(CopyFile {
                source: source.into(),
                target,
            })
        })
        .collect()
}
