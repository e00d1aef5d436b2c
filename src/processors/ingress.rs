use super::{resolve_name, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, AttachmentTarget, Origin},
    model::{assign, merge_map, IngressModel, ModuleContext},
    names::INGRESS_POSTFIX,
};

const KEYS: &[&str] = &[
    "name",
    "labels",
    "annotations",
    "hostname",
    "path",
    "targetPath",
    "ingressClass",
    "enableTLS",
];

/// Routes a hostname to the Service generated for the annotated target.
pub struct IngressProcessor;

impl AnnotationProcessor for IngressProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        if let AttachmentTarget::Function(_) = annotation.target {
            return Err(Error::schema(format!(
                "@Ingress annotation is not supported on {}",
                annotation.target.describe()
            )));
        }
        let fields = Fields::new(AnnotationKind::Ingress, &annotation.data, KEYS);
        let origin = annotation.origin;
        let backend = annotation.target.identifier();

        let (name, explicit_name) = resolve_name(&fields, backend, INGRESS_POSTFIX)?;
        let hostname = fields.string("hostname")?;
        let path = path_value(&fields, "path")?;
        let target_path = path_value(&fields, "targetPath")?;
        let mut annotations = fields.string_map("annotations")?;
        annotations.extend(fields.passthrough());

        let ingress = ctx
            .ingresses
            .entry(backend.to_string())
            .or_insert_with(|| IngressModel::new(backend));
        assign(
            &mut ingress.name,
            name,
            if explicit_name { origin } else { Origin::Inferred },
        );
        if let Some(hostname) = hostname {
            assign(&mut ingress.hostname, hostname, origin);
        }
        if ingress.hostname.is_none() {
            return Err(Error::schema(format!(
                "@Ingress on {} requires a 'hostname'",
                annotation.target.describe()
            )));
        }
        if let Some(path) = path {
            assign(&mut ingress.path, path, origin);
        }
        if let Some(target_path) = target_path {
            assign(&mut ingress.target_path, target_path, origin);
        }
        if let Some(class) = fields.string("ingressClass")? {
            assign(&mut ingress.ingress_class, class, origin);
        }
        if let Some(tls) = fields.bool("enableTLS")? {
            if origin == Origin::Explicit {
                ingress.tls = tls;
            }
        }
        merge_map(&mut ingress.labels, fields.string_map("labels")?, origin);
        merge_map(&mut ingress.annotations, annotations, origin);
        Ok(())
    }
}

fn path_value(fields: &Fields, key: &str) -> Result<Option<String>> {
    match fields.string(key)? {
        Some(p) if !p.starts_with('/') => Err(Error::schema(format!(
            "@Ingress {key} '{p}' must start with '/'"
        ))),
        other => Ok(other),
    }
}
