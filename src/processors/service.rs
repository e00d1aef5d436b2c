use tracing::warn;

use super::{resolve_name, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{
        AnnotationKind, AnnotationUse, AttachedListener, AttachmentTarget, ListenerArg, ListenerInit,
        Origin,
    },
    model::{assign, merge_map, ModuleContext, ServiceModel, ServiceType, SessionAffinity},
    names::SVC_POSTFIX,
};

const KEYS: &[&str] = &[
    "name",
    "labels",
    "annotations",
    "serviceType",
    "port",
    "targetPort",
    "nodePort",
    "sessionAffinity",
];

pub struct ServiceProcessor;

impl AnnotationProcessor for ServiceProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        let (listener, declared_alias) = match &annotation.target {
            AttachmentTarget::Service(svc) => {
                if svc
                    .listeners
                    .iter()
                    .any(|l| matches!(l, AttachedListener::Named(_)))
                {
                    return Err(Error::schema(format!(
                        "adding @Service annotation to service '{}' is only supported when \
                         the service has an anonymous listener",
                        svc.name
                    )));
                }
                let first = match svc.listeners.first() {
                    Some(AttachedListener::Anonymous(init)) => init,
                    _ => {
                        return Err(Error::extraction(format!(
                            "service '{}' has no listener to take a port from",
                            svc.name
                        )))
                    }
                };
                if svc.listeners.len() > 1 {
                    warn!(
                        service = %svc.name,
                        listeners = svc.listeners.len(),
                        "only the first listener's port and protocol are used"
                    );
                }
                (first, None)
            }
            AttachmentTarget::Listener(var) => (&var.init, var.declared_alias.as_deref()),
            AttachmentTarget::Function(_) => {
                return Err(Error::schema(format!(
                    "@Service annotation is not supported on {}",
                    annotation.target.describe()
                )))
            }
        };

        let fields = Fields::new(AnnotationKind::Service, &annotation.data, KEYS);
        let key = annotation.target.identifier();
        let (name, explicit_name) = resolve_name(&fields, key, SVC_POSTFIX)?;
        let listener_port = extract_port(listener)?;
        let protocol = service_protocol(listener, declared_alias)?;
        let service_type = fields
            .string("serviceType")?
            .map(|s| s.parse::<ServiceType>())
            .transpose()?;
        let session_affinity = fields
            .string("sessionAffinity")?
            .map(|s| s.parse::<SessionAffinity>())
            .transpose()?;
        let port = fields.port("port")?;
        let target_port = fields.port("targetPort")?;
        let node_port = fields.port("nodePort")?;
        let labels = fields.string_map("labels")?;
        let mut annotations = fields.string_map("annotations")?;
        annotations.extend(fields.passthrough());

        let origin = annotation.origin;
        ctx.deployment.declared = true;
        let svc = ctx
            .services
            .entry(key.to_string())
            .or_insert_with(|| ServiceModel::new(key));

        assign(
            &mut svc.name,
            name,
            if explicit_name { origin } else { Origin::Inferred },
        );
        assign(&mut svc.protocol, protocol, origin);

        // With an annotated port the listener's port is what the pod listens on;
        // without one it is used for both.
        assign(&mut svc.port, port.unwrap_or(listener_port), origin);
        assign(&mut svc.target_port, target_port.unwrap_or(listener_port), origin);
        if let Some(node_port) = node_port {
            assign(&mut svc.node_port, node_port, origin);
        }
        if let Some(service_type) = service_type {
            assign(&mut svc.service_type, service_type, origin);
            svc.explicit_service_type |= origin == Origin::Explicit;
        }
        if let Some(affinity) = session_affinity {
            assign(&mut svc.session_affinity, affinity, origin);
        }
        merge_map(&mut svc.labels, labels, origin);
        merge_map(&mut svc.annotations, annotations, origin);
        Ok(())
    }
}

/// Port a listener binds to.
///
/// An `int` first argument is the port itself; otherwise the first argument
/// is expected to be a config record with a `port` field.
pub fn extract_port(listener: &ListenerInit) -> Result<u16> {
    let first = listener.args.first().ok_or_else(|| Error::PortExtraction {
        expr: "<no arguments>".to_string(),
    })?;
    let text = match first {
        ListenerArg::Literal { type_name, text } if type_name == "int" => text,
        ListenerArg::Record { fields } => fields
            .iter()
            .find(|f| f.key == "port")
            .map(|f| &f.value)
            .ok_or_else(|| Error::PortExtraction {
                expr: first.to_string(),
            })?,
        _ => {
            return Err(Error::PortExtraction {
                expr: first.to_string(),
            })
        }
    };
    text.trim().parse::<u16>().map_err(|_| Error::PortParse {
        expr: first.to_string(),
    })
}

/// Protocol of a listener, taken from the package alias of its type.
///
/// `http` listeners built with a config record that has a `secureSocket`
/// field are `https`.
pub fn service_protocol(listener: &ListenerInit, declared_alias: Option<&str>) -> Result<String> {
    let alias = listener
        .type_alias
        .as_deref()
        .or(declared_alias)
        .ok_or_else(|| {
            Error::extraction(format!(
                "unable to infer the protocol of the listener built from ({})",
                listener
                    .args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
    if alias == "http" {
        if let [_, ListenerArg::Record { fields }] = listener.args.as_slice() {
            let secure = fields.iter().any(|f| f.key == "secureSocket");
            return Ok(if secure { "https" } else { "http" }.to_string());
        }
    }
    Ok(alias.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::processors::{process, test_support::*};

    fn http_init(args: Vec<ListenerArg>) -> ListenerInit {
        ListenerInit {
            type_alias: Some("http".into()),
            args,
        }
    }

    #[test]
    fn port_from_int_literal() {
        assert_eq!(extract_port(&http_init(vec![ListenerArg::int(9090)])).unwrap(), 9090);
    }

    #[test]
    fn port_from_config_record() {
        let init = ListenerInit {
            type_alias: Some("grpc".into()),
            args: vec![ListenerArg::record([("host", "\"0.0.0.0\""), ("port", "7070")])],
        };
        assert_eq!(extract_port(&init).unwrap(), 7070);
    }

    #[test]
    fn every_port_is_extracted() {
        for p in [0u16, 1, 80, 443, 8080, 65535] {
            let init = http_init(vec![ListenerArg::int(p.into())]);
            assert_eq!(extract_port(&init).unwrap(), p);
        }
    }

    #[test]
    fn missing_port_is_an_extraction_error() {
        let init = http_init(vec![ListenerArg::record([("host", "\"localhost\"")])]);
        let err = extract_port(&init).unwrap_err();
        assert!(matches!(err, Error::PortExtraction { ref expr } if expr.contains("localhost")));

        let init = http_init(vec![ListenerArg::Expr {
            text: "getPort()".into(),
        }]);
        assert!(matches!(extract_port(&init), Err(Error::PortExtraction { .. })));
        assert!(matches!(
            extract_port(&ListenerInit::default()),
            Err(Error::PortExtraction { .. })
        ));
    }

    #[test]
    fn bad_port_is_a_parse_error() {
        for text in ["abc", "70000", "-1"] {
            let init = http_init(vec![ListenerArg::Literal {
                type_name: "int".into(),
                text: text.into(),
            }]);
            assert!(
                matches!(extract_port(&init), Err(Error::PortParse { .. })),
                "{text}"
            );
        }
        let init = http_init(vec![ListenerArg::record([("port", "config:port")])]);
        assert!(matches!(extract_port(&init), Err(Error::PortParse { .. })));
    }

    #[test]
    fn secure_socket_upgrades_http() {
        let secure = http_init(vec![
            ListenerArg::int(9095),
            ListenerArg::record([("secureSocket", "{key: k}")]),
        ]);
        assert_eq!(service_protocol(&secure, None).unwrap(), "https");

        let plain = http_init(vec![
            ListenerArg::int(9095),
            ListenerArg::record([("timeout", "30")]),
        ]);
        assert_eq!(service_protocol(&plain, None).unwrap(), "http");

        let bare = http_init(vec![ListenerArg::int(9095)]);
        assert_eq!(service_protocol(&bare, None).unwrap(), "http");
    }

    #[test]
    fn protocol_falls_back_to_declared_alias() {
        let init = ListenerInit {
            type_alias: None,
            args: vec![ListenerArg::int(9090)],
        };
        assert_eq!(service_protocol(&init, Some("grpc")).unwrap(), "grpc");
        assert!(matches!(service_protocol(&init, None), Err(Error::Extraction(_))));
    }

    #[test]
    fn service_on_anonymous_listener() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("helloWorld", 9090),
                AnnotationKind::Service,
                json!({
                    "serviceType": "NodePort",
                    "sessionAffinity": "ClientIP",
                    "labels": {"team": "a"},
                    "owner": "platform",
                }),
            ),
        )
        .unwrap();

        let svc = &ctx.services["helloWorld"];
        assert_eq!(svc.name.as_deref(), Some("helloworld-svc"));
        assert_eq!(svc.port, Some(9090));
        assert_eq!(svc.target_port, Some(9090));
        assert_eq!(svc.protocol.as_deref(), Some("http"));
        assert_eq!(svc.service_type, Some(ServiceType::NodePort));
        assert_eq!(svc.session_affinity, Some(SessionAffinity::ClientIp));
        assert_eq!(svc.labels["team"], "a");
        assert_eq!(svc.annotations["owner"], "platform");
        assert!(ctx.deployment.declared);
    }

    #[test]
    fn annotated_port_keeps_listener_port_as_target() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("hello", 9090),
                AnnotationKind::Service,
                json!({"port": 80, "name": "Hello_Front"}),
            ),
        )
        .unwrap();
        let svc = &ctx.services["hello"];
        assert_eq!(svc.name.as_deref(), Some("hello-front"));
        assert_eq!(svc.port, Some(80));
        assert_eq!(svc.target_port, Some(9090));
    }

    #[test]
    fn named_listener_on_service_is_rejected() {
        let mut ctx = context();
        let err = process(
            &mut ctx,
            &annotation(
                named_listener_service("hello", "helloEp"),
                AnnotationKind::Service,
                json!({}),
            ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(ref m) if m.contains("anonymous listener")));
        assert!(ctx.services.is_empty());
    }

    #[test]
    fn service_on_listener_variable() {
        let mut ctx = context();
        let target = listener_var(
            "helloEp",
            "http",
            vec![
                ListenerArg::int(9095),
                ListenerArg::record([("secureSocket", "{}")]),
            ],
        );
        process(&mut ctx, &annotation(target, AnnotationKind::Service, json!({}))).unwrap();
        let svc = &ctx.services["helloEp"];
        assert_eq!(svc.protocol.as_deref(), Some("https"));
        assert_eq!(svc.name.as_deref(), Some("helloep-svc"));
    }

    #[test]
    fn malformed_annotation_port() {
        let mut ctx = context();
        for bad in [json!("80"), json!(-1), json!(65536), json!(8.5)] {
            let err = process(
                &mut ctx,
                &annotation(
                    http_service("hello", 9090),
                    AnnotationKind::Service,
                    json!({ "nodePort": bad }),
                ),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Schema(_)));
        }
    }

    #[test]
    fn inferred_defaults_merge_under_explicit_values() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("hello", 9090),
                AnnotationKind::Service,
                json!({"serviceType": "LoadBalancer", "port": 80}),
            ),
        )
        .unwrap();
        let mut inferred = annotation(
            http_service("hello", 9090),
            AnnotationKind::Service,
            json!({"serviceType": "NodePort"}),
        );
        inferred.origin = Origin::Inferred;
        process(&mut ctx, &inferred).unwrap();

        let svc = &ctx.services["hello"];
        assert_eq!(svc.service_type, Some(ServiceType::LoadBalancer));
        assert_eq!(svc.port, Some(80));
        assert_eq!(svc.target_port, Some(9090));
    }

    #[test]
    fn unknown_service_type_is_rejected() {
        let mut ctx = context();
        let err = process(
            &mut ctx,
            &annotation(
                http_service("hello", 9090),
                AnnotationKind::Service,
                json!({"serviceType": "ExternalName"}),
            ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
