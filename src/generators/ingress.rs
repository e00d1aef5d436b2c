use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};

use super::{object_meta, to_yaml};
use crate::{
    error::{Error, Result},
    model::{IngressModel, DEFAULT_INGRESS_CLASS},
};

const REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
const BACKEND_PROTOCOL: &str = "nginx.ingress.kubernetes.io/backend-protocol";

pub(super) fn render(ingress: &IngressModel, namespace: Option<&str>) -> Result<(String, String)> {
    let name = ingress
        .name
        .clone()
        .ok_or_else(|| Error::reference("ingress has no name"))?;
    let missing = || Error::reference(format!("ingress '{name}' has no backend service"));
    let service_name = ingress.service_name.clone().ok_or_else(missing)?;
    let service_port = ingress.service_port.ok_or_else(missing)?;
    let hostname = ingress
        .hostname
        .clone()
        .ok_or_else(|| Error::reference(format!("ingress '{name}' has no hostname")))?;

    let mut annotations = ingress.annotations.clone();
    if let Some(target) = &ingress.target_path {
        annotations.insert(REWRITE_TARGET.to_string(), target.clone());
    }
    if ingress.backend_https {
        annotations.insert(BACKEND_PROTOCOL.to_string(), "HTTPS".to_string());
    }

    let tls = ingress.tls.then(|| {
        vec![IngressTLS {
            hosts: Some(vec![hostname.clone()]),
            secret_name: Some(format!("{name}-tls")),
        }]
    });

    let resource = Ingress {
        metadata: object_meta(&name, namespace, &ingress.labels, &annotations),
        spec: Some(IngressSpec {
            ingress_class_name: Some(
                ingress
                    .ingress_class
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INGRESS_CLASS.to_string()),
            ),
            rules: Some(vec![IngressRule {
                host: Some(hostname),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(ingress.path.clone().unwrap_or_else(|| "/".to_string())),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service_name,
                                port: Some(ServiceBackendPort {
                                    number: Some(service_port.into()),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            tls,
            default_backend: None,
        }),
        status: None,
    };
    Ok((name, to_yaml(&resource)?))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn model() -> IngressModel {
        let mut ingress = IngressModel::new("helloEP");
        ingress.name = Some("helloep-ingress".into());
        ingress.hostname = Some("abc.com".into());
        ingress.path = Some("/hello".into());
        ingress.target_path = Some("/".into());
        ingress.service_name = Some("helloep-svc".into());
        ingress.service_port = Some(9090);
        ingress
    }

    #[test]
    fn ingress_yaml() {
        let (_, yaml) = render(&model(), None).unwrap();
        assert_eq!(
            yaml,
            r#"apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  annotations:
    nginx.ingress.kubernetes.io/rewrite-target: /
  name: helloep-ingress
spec:
  ingressClassName: nginx
  rules:
  - host: abc.com
    http:
      paths:
      - backend:
          service:
            name: helloep-svc
            port:
              number: 9090
        path: /hello
        pathType: Prefix
"#
        );
    }

    #[test]
    fn tls_and_https_backend() {
        let mut ingress = model();
        ingress.tls = true;
        ingress.backend_https = true;
        let (_, yaml) = render(&ingress, None).unwrap();
        let parsed: Ingress = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            parsed.metadata.annotations.unwrap()[BACKEND_PROTOCOL],
            "HTTPS"
        );
        let tls = parsed.spec.unwrap().tls.unwrap();
        assert_eq!(tls[0].hosts.as_deref(), Some(&["abc.com".to_string()][..]));
        assert_eq!(tls[0].secret_name.as_deref(), Some("helloep-ingress-tls"));
    }
}
