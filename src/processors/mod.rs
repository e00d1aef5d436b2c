//! One processor per annotation kind.
//!
//! Each processor reads its annotation's key/value payload and mutates the
//! module's deployment context. Keys a processor does not know are kept as
//! annotations on the resource it produces.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, AttachmentTarget},
    model::ModuleContext,
    names::{get_valid_name, get_valid_name_with_postfix},
};

mod config;
mod deployment;
mod hpa;
mod ingress;
mod job;
mod probe;
mod service;
mod volume;

pub use service::{extract_port, service_protocol};

pub trait AnnotationProcessor: Sync {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()>;
}

static DEPLOYMENT: deployment::DeploymentProcessor = deployment::DeploymentProcessor;
static SERVICE: service::ServiceProcessor = service::ServiceProcessor;
static HPA: hpa::HpaProcessor = hpa::HpaProcessor;
static JOB: job::JobProcessor = job::JobProcessor;
static CONFIG_MAP: config::ConfigMapProcessor = config::ConfigMapProcessor;
static SECRET: config::SecretProcessor = config::SecretProcessor;
static VOLUME: volume::VolumeProcessor = volume::VolumeProcessor;
static INGRESS: ingress::IngressProcessor = ingress::IngressProcessor;
static PROBE: probe::ProbeProcessor = probe::ProbeProcessor;

pub fn processor_for(kind: AnnotationKind) -> &'static dyn AnnotationProcessor {
    match kind {
        AnnotationKind::Deployment => &DEPLOYMENT,
        AnnotationKind::Service => &SERVICE,
        AnnotationKind::Hpa => &HPA,
        AnnotationKind::Job => &JOB,
        AnnotationKind::ConfigMap => &CONFIG_MAP,
        AnnotationKind::Secret => &SECRET,
        AnnotationKind::Volume => &VOLUME,
        AnnotationKind::Ingress => &INGRESS,
        AnnotationKind::Probe => &PROBE,
    }
}

/// Run the processor registered for the annotation's kind.
pub fn process(ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
    if let AttachmentTarget::Listener(var) = &annotation.target {
        if !var.is_listener {
            return Err(Error::schema(format!(
                "annotations are only supported with listeners, '{}' is not a listener",
                var.name
            )));
        }
    }
    debug!(
        module = %ctx.module,
        kind = %annotation.kind,
        target = %annotation.target.identifier(),
        "processing annotation"
    );
    processor_for(annotation.kind).process(ctx, annotation)
}

/// Reject targets that cannot own a long running workload.
fn require_workload_target(kind: AnnotationKind, target: &AttachmentTarget) -> Result<()> {
    if target.owns_long_running_workload() {
        Ok(())
    } else {
        Err(Error::schema(format!(
            "@{kind} annotation is not supported on {}",
            target.describe()
        )))
    }
}

/// Name from the `name` key, sanitized, or derived from `fallback`.
fn resolve_name(fields: &Fields, fallback: &str, postfix: &str) -> Result<(String, bool)> {
    match fields.string("name")? {
        Some(raw) => {
            let name = get_valid_name(&raw);
            if name.is_empty() {
                return Err(Error::schema(format!(
                    "@{} name '{raw}' has no characters valid in a kubernetes name",
                    fields.kind
                )));
            }
            if name != raw {
                debug!(raw, name, "sanitized resource name");
            }
            Ok((name, true))
        }
        None => {
            if get_valid_name(fallback).is_empty() {
                return Err(Error::schema(format!(
                    "cannot derive a kubernetes name from '{fallback}'"
                )));
            }
            Ok((get_valid_name_with_postfix(fallback, postfix), false))
        }
    }
}

/// Typed, read-only view over one annotation's payload.
pub(crate) struct Fields<'a> {
    kind: AnnotationKind,
    data: &'a Map<String, Value>,
    known: &'static [&'static str],
}

impl<'a> Fields<'a> {
    pub fn new(
        kind: AnnotationKind,
        data: &'a Map<String, Value>,
        known: &'static [&'static str],
    ) -> Self {
        Self { kind, data, known }
    }

    fn mismatch(&self, key: &str, expected: &str, found: &Value) -> Error {
        Error::schema(format!(
            "@{} field '{key}' must be {expected}, found {found}",
            self.kind
        ))
    }

    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.data.get(key)
    }

    pub fn string(&self, key: &str) -> Result<Option<String>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.mismatch(key, "a string", other)),
        }
    }

    pub fn int(&self, key: &str) -> Result<Option<i64>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.mismatch(key, "an integer", v)),
        }
    }

    pub fn i32(&self, key: &str) -> Result<Option<i32>> {
        match self.int(key)? {
            None => Ok(None),
            Some(n) => i32::try_from(n)
                .map(Some)
                .map_err(|_| Error::schema(format!("@{} field '{key}' is out of range: {n}", self.kind))),
        }
    }

    /// Non-negative count, e.g. replicas or a percentage.
    pub fn count(&self, key: &str) -> Result<Option<i32>> {
        match self.i32(key)? {
            Some(n) if n < 0 => Err(Error::schema(format!(
                "@{} field '{key}' must not be negative: {n}",
                self.kind
            ))),
            other => Ok(other),
        }
    }

    pub fn port(&self, key: &str) -> Result<Option<u16>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(v) => port_value(v).map(Some).ok_or_else(|| {
                Error::schema(format!(
                    "@{} field '{key}' is not a valid port (0-65535): {v}",
                    self.kind
                ))
            }),
        }
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(key, "a boolean", other)),
        }
    }

    /// A record of scalars; numbers and booleans are stringified.
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.data.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    scalar_string(v)
                        .map(|s| (k.clone(), s))
                        .ok_or_else(|| self.mismatch(&format!("{key}.{k}"), "a scalar", v))
                })
                .collect(),
            Some(other) => Err(self.mismatch(key, "a record", other)),
        }
    }

    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.data.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(self.mismatch(key, "a list of strings", other)),
                })
                .collect(),
            Some(other) => Err(self.mismatch(key, "a list of strings", other)),
        }
    }

    /// A list of records, each viewed as its own `Fields`.
    pub fn records(&self, key: &str, known: &'static [&'static str]) -> Result<Vec<Fields<'a>>> {
        match self.data.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Object(obj) => Ok(Fields {
                        kind: self.kind,
                        data: obj,
                        known,
                    }),
                    other => Err(self.mismatch(key, "a list of records", other)),
                })
                .collect(),
            Some(other) => Err(self.mismatch(key, "a list of records", other)),
        }
    }

    /// Nested record under `key`.
    pub fn record(&self, key: &str, known: &'static [&'static str]) -> Result<Option<Fields<'a>>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Object(obj)) => Ok(Some(Fields {
                kind: self.kind,
                data: obj,
                known,
            })),
            Some(other) => Err(self.mismatch(key, "a record", other)),
        }
    }

    /// Keys this processor does not know, kept as resource annotations.
    pub fn passthrough(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .filter(|(k, _)| !self.known.contains(&k.as_str()))
            .map(|(k, v)| {
                debug!(kind = %self.kind, key = %k, "passing unknown annotation key through");
                (k.clone(), scalar_string(v).unwrap_or_else(|| v.to_string()))
            })
            .collect()
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn port_value(v: &Value) -> Option<u16> {
    v.as_u64().and_then(|n| u16::try_from(n).ok())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use serde_json::Value;

    use crate::{
        input::{
            AnnotationData, AnnotationKind, AnnotationUse, AttachedListener, AttachmentTarget,
            FunctionDecl, ListenerArg, ListenerInit, ListenerVariable, NamedListener, ServiceDecl,
        },
        model::{ModuleContext, OutputPaths},
    };

    pub fn context() -> ModuleContext {
        ModuleContext::new("hello", OutputPaths::for_module(Path::new("/out"), "hello"))
    }

    pub fn data(value: Value) -> AnnotationData {
        match value {
            Value::Object(map) => map,
            _ => panic!("annotation data must be an object"),
        }
    }

    pub fn http_service(name: &str, port: i64) -> AttachmentTarget {
        AttachmentTarget::Service(ServiceDecl {
            name: name.to_string(),
            listeners: vec![AttachedListener::Anonymous(ListenerInit {
                type_alias: Some("http".to_string()),
                args: vec![ListenerArg::int(port)],
            })],
        })
    }

    pub fn named_listener_service(name: &str, listener: &str) -> AttachmentTarget {
        AttachmentTarget::Service(ServiceDecl {
            name: name.to_string(),
            listeners: vec![AttachedListener::Named(NamedListener {
                name: listener.to_string(),
            })],
        })
    }

    pub fn listener_var(name: &str, alias: &str, args: Vec<ListenerArg>) -> AttachmentTarget {
        AttachmentTarget::Listener(ListenerVariable {
            name: name.to_string(),
            declared_alias: Some(alias.to_string()),
            is_listener: true,
            init: ListenerInit {
                type_alias: None,
                args,
            },
        })
    }

    pub fn main_function() -> AttachmentTarget {
        AttachmentTarget::Function(FunctionDecl {
            name: "main".to_string(),
        })
    }

    pub fn annotation(target: AttachmentTarget, kind: AnnotationKind, value: Value) -> AnnotationUse {
        AnnotationUse::new(target, kind, data(value))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{test_support::*, *};
    use crate::input::{ListenerArg, ListenerInit, ListenerVariable};

    #[test]
    fn non_listener_variables_are_rejected() {
        let mut ctx = context();
        let target = AttachmentTarget::Listener(ListenerVariable {
            name: "counter".into(),
            declared_alias: None,
            is_listener: false,
            init: ListenerInit {
                type_alias: None,
                args: vec![ListenerArg::int(1)],
            },
        });
        let err = process(
            &mut ctx,
            &annotation(target, AnnotationKind::Service, json!({})),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(ctx.services.is_empty());
    }

    #[test]
    fn every_kind_has_a_processor() {
        for kind in AnnotationKind::ALL {
            let _ = processor_for(kind);
        }
    }

    #[test]
    fn fields_type_checks() {
        let d = data(json!({
            "name": "x",
            "replicas": 3,
            "port": 70000,
            "labels": {"a": "b", "n": 1},
            "flag": "yes",
            "custom": {"deep": true},
        }));
        let f = Fields::new(AnnotationKind::Deployment, &d, &["name", "replicas", "port", "labels", "flag"]);
        assert_eq!(f.string("name").unwrap().as_deref(), Some("x"));
        assert!(f.string("replicas").is_err());
        assert_eq!(f.count("replicas").unwrap(), Some(3));
        assert!(matches!(f.port("port"), Err(Error::Schema(_))));
        assert!(f.bool("flag").is_err());
        assert_eq!(f.string_map("labels").unwrap()["n"], "1");
        assert_eq!(f.string("missing").unwrap(), None);

        let rest = f.passthrough();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest["custom"], r#"{"deep":true}"#);
    }
}
