//! Default annotations for modules that opt into automatic generation.
//!
//! The defaults are ordinary annotation values marked
//! [`Origin::Inferred`](crate::input::Origin::Inferred),
//! so they go through the same processors as user annotations and only fill
//! in what the user left unset.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::input::{
    AnnotationData, AnnotationKind, AnnotationUse, AttachedListener, AttachmentTarget,
};

const MAIN_FUNCTION: &str = "main";

/// Inferred annotations for `declarations`, in a fixed order:
/// deployments and autoscalers, services, then jobs.
pub fn synthesize(declarations: &[AttachmentTarget]) -> Vec<AnnotationUse> {
    let services: Vec<_> = declarations
        .iter()
        .filter_map(|d| match d {
            AttachmentTarget::Service(s) => Some((d, s)),
            _ => None,
        })
        .collect();

    let mut out = Vec::new();
    for (target, _) in &services {
        out.push(inferred(target, AnnotationKind::Deployment, json!({})));
    }
    for (target, _) in &services {
        out.push(inferred(target, AnnotationKind::Hpa, json!({})));
    }

    let node_port = || json!({ "serviceType": "NodePort" });
    for (target, svc) in &services {
        if svc
            .listeners
            .iter()
            .any(|l| matches!(l, AttachedListener::Anonymous(_)))
        {
            out.push(inferred(target, AnnotationKind::Service, node_port()));
        }
    }

    let exposed: BTreeSet<&str> = services
        .iter()
        .flat_map(|(_, svc)| svc.listeners.iter())
        .filter_map(|l| match l {
            AttachedListener::Named(n) => Some(n.name.as_str()),
            AttachedListener::Anonymous(_) => None,
        })
        .collect();
    for decl in declarations {
        if let AttachmentTarget::Listener(var) = decl {
            if var.is_listener && exposed.contains(var.name.as_str()) {
                out.push(inferred(decl, AnnotationKind::Service, node_port()));
            }
        }
    }

    for decl in declarations {
        if let AttachmentTarget::Function(f) = decl {
            if f.name == MAIN_FUNCTION {
                out.push(inferred(decl, AnnotationKind::Job, json!({})));
            }
        }
    }
    out
}

fn inferred(target: &AttachmentTarget, kind: AnnotationKind, data: Value) -> AnnotationUse {
    let data = match data {
        Value::Object(map) => map,
        _ => AnnotationData::new(),
    };
    AnnotationUse::inferred(target.clone(), kind, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::{ListenerArg, Origin},
        processors::test_support::{http_service, listener_var, main_function, named_listener_service},
    };

    fn kinds(annotations: &[AnnotationUse]) -> Vec<(AnnotationKind, &str)> {
        annotations
            .iter()
            .map(|a| (a.kind, a.target.identifier()))
            .collect()
    }

    #[test]
    fn services_listeners_and_main() {
        let declarations = vec![
            http_service("hello", 9090),
            named_listener_service("greet", "helloEP"),
            listener_var("helloEP", "http", vec![ListenerArg::int(8080)]),
            listener_var("unusedEP", "http", vec![ListenerArg::int(8081)]),
            main_function(),
        ];
        let out = synthesize(&declarations);
        assert!(out.iter().all(|a| a.origin == Origin::Inferred));
        assert_eq!(
            kinds(&out),
            vec![
                (AnnotationKind::Deployment, "hello"),
                (AnnotationKind::Deployment, "greet"),
                (AnnotationKind::Hpa, "hello"),
                (AnnotationKind::Hpa, "greet"),
                (AnnotationKind::Service, "hello"),
                (AnnotationKind::Service, "helloEP"),
                (AnnotationKind::Job, "main"),
            ]
        );
        assert_eq!(out[4].data["serviceType"], "NodePort");
    }

    #[test]
    fn nothing_to_infer() {
        assert!(synthesize(&[]).is_empty());
    }
}
