//! Cross-entity checks run once every annotation of a module was processed.

use std::{collections::BTreeMap, ffi::OsStr, ops::Deref, path::Path};

use tracing::debug;

use crate::{
    error::{Error, ModuleErrors},
    model::{ModuleContext, ServiceType},
    names::is_dns1123_label,
};

/// A module context whose defaults are resolved and whose invariants hold.
/// Only [`validate`] constructs one.
#[derive(Debug, Clone)]
pub struct ValidatedModule(ModuleContext);

impl ValidatedModule {
    pub fn into_inner(self) -> ModuleContext {
        self.0
    }
}

impl Deref for ValidatedModule {
    type Target = ModuleContext;

    fn deref(&self) -> &ModuleContext {
        &self.0
    }
}

/// Resolve cross-entity defaults and check every invariant, collecting all
/// violations in a fixed order.
pub fn validate(mut ctx: ModuleContext) -> Result<ValidatedModule, ModuleErrors> {
    ctx.resolve_defaults();
    let mut errors = ModuleErrors::new(ctx.module.clone());
    check_service_types(&ctx, &mut errors);
    check_references(&ctx, &mut errors);
    check_names(&ctx, &mut errors);
    check_collisions(&ctx, &mut errors);
    check_dependencies(&ctx, &mut errors);
    errors.into_result()?;
    debug!(module = %ctx.module, "module validated");
    Ok(ValidatedModule(ctx))
}

fn check_service_types(ctx: &ModuleContext, errors: &mut ModuleErrors) {
    for svc in ctx.services.values() {
        // a nodePort needs the NodePort type from a user annotation, not a default
        if let Some(node_port) = svc.node_port {
            if svc.service_type() != ServiceType::NodePort || !svc.explicit_service_type {
                let found = match (svc.service_type, svc.explicit_service_type) {
                    (Some(t), false) => format!("{t} (inferred)"),
                    _ => svc.service_type().to_string(),
                };
                errors.push(Error::reference(format!(
                    "nodePort {node_port} of service '{}' requires serviceType NodePort, found {found}",
                    svc.attachment
                )));
            }
        }
        if svc.port.is_none() {
            errors.push(Error::reference(format!(
                "service '{}' has no port",
                svc.attachment
            )));
        }
    }
}

fn check_references(ctx: &ModuleContext, errors: &mut ModuleErrors) {
    if let Some(hpa) = &ctx.hpa {
        match (&hpa.target, &ctx.deployment.name) {
            (Some(target), Some(deployment)) if target == deployment => {}
            (Some(target), _) if ctx.jobs.values().any(|j| j.name.as_ref() == Some(target)) => {
                errors.push(Error::reference(format!(
                    "HPA '{}' targets job '{target}'; only deployments can be autoscaled",
                    hpa.name.as_deref().unwrap_or_default()
                )))
            }
            (Some(target), _) => errors.push(Error::reference(format!(
                "HPA '{}' targets deployment '{target}', which is not generated for module [{}]",
                hpa.name.as_deref().unwrap_or_default(),
                ctx.module
            ))),
            (None, _) => errors.push(Error::reference(format!(
                "HPA '{}' has no deployment to scale",
                hpa.name.as_deref().unwrap_or_default()
            ))),
        }
    }

    for (backend, ingress) in &ctx.ingresses {
        if ingress.service_name.is_none() || ingress.service_port.is_none() {
            errors.push(Error::reference(format!(
                "ingress '{}' routes to '{backend}', which has no @Service",
                ingress.name.as_deref().unwrap_or_default()
            )));
        }
    }

    for probe in ctx.deployment.probes() {
        if probe.action.needs_port() && probe.port.is_none() {
            errors.push(Error::reference(format!(
                "{} probe needs a port but module [{}] exposes none",
                probe.kind.as_str(),
                ctx.module
            )));
        }
    }
}

fn check_names(ctx: &ModuleContext, errors: &mut ModuleErrors) {
    let mut check = |kind: &str, name: Option<&str>| match name {
        Some(name) if is_dns1123_label(name) => {}
        Some(name) => errors.push(Error::reference(format!(
            "{kind} name '{name}' is not a valid DNS-1123 label"
        ))),
        None => errors.push(Error::reference(format!("{kind} has no name"))),
    };

    if ctx.deployment.declared {
        check("deployment", ctx.deployment.name.as_deref());
    }
    for svc in ctx.services.values() {
        check("service", svc.name.as_deref());
    }
    if let Some(hpa) = &ctx.hpa {
        check("HPA", hpa.name.as_deref());
    }
    for job in ctx.jobs.values() {
        check("job", job.name.as_deref());
    }
    for cm in &ctx.config_maps {
        check("config map", Some(&cm.name));
    }
    for secret in &ctx.secrets {
        check("secret", Some(&secret.name));
    }
    for claim in &ctx.volume_claims {
        check("volume claim", Some(&claim.name));
    }
    for ingress in ctx.ingresses.values() {
        check("ingress", ingress.name.as_deref());
    }
}

fn check_collisions(ctx: &ModuleContext, errors: &mut ModuleErrors) {
    let mut report = |kind: &str, names: Vec<&str>| {
        let mut seen = BTreeMap::new();
        for name in names {
            *seen.entry(name).or_insert(0) += 1;
        }
        for (name, count) in seen {
            if count > 1 {
                errors.push(Error::reference(format!(
                    "{count} {kind} resources are named '{name}'"
                )));
            }
        }
    };

    report(
        "service",
        ctx.services.values().filter_map(|s| s.name.as_deref()).collect(),
    );
    report(
        "job",
        ctx.jobs.values().filter_map(|j| j.name.as_deref()).collect(),
    );
    report(
        "config map",
        ctx.config_maps.iter().map(|c| c.name.as_str()).collect(),
    );
    report("secret", ctx.secrets.iter().map(|s| s.name.as_str()).collect());
    report(
        "volume claim",
        ctx.volume_claims.iter().map(|v| v.name.as_str()).collect(),
    );
    report(
        "ingress",
        ctx.ingresses.values().filter_map(|i| i.name.as_deref()).collect(),
    );

    let mounts = ctx
        .config_maps
        .iter()
        .filter_map(|c| c.mount_path.as_deref())
        .chain(ctx.secrets.iter().filter_map(|s| s.mount_path.as_deref()))
        .chain(ctx.volume_claims.iter().map(|v| v.mount_path.as_str()))
        .collect();
    report("volume mount", mounts);
}

/// Dependencies of a layered image share one `libs/` directory.
fn check_dependencies(ctx: &ModuleContext, errors: &mut ModuleErrors) {
    if ctx.docker.uber {
        return;
    }
    let mut by_name: BTreeMap<&OsStr, Vec<&Path>> = BTreeMap::new();
    for dep in &ctx.docker.dependencies {
        match dep.file_name() {
            Some(name) => by_name.entry(name).or_default().push(dep),
            None => errors.push(Error::schema(format!(
                "dependency '{}' does not name a file",
                dep.display()
            ))),
        }
    }
    for (name, paths) in by_name {
        if paths.len() > 1 {
            let paths: Vec<_> = paths.iter().map(|p| format!("'{}'", p.display())).collect();
            errors.push(Error::schema(format!(
                "dependencies {} would all be copied to libs/{}",
                paths.join(", "),
                name.to_string_lossy()
            )));
        }
    }
}
