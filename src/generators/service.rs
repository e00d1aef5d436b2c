use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};

use super::{app_selector, object_meta, to_yaml};
use crate::{
    error::{Error, Result},
    model::ServiceModel,
    names::get_valid_port_name,
    validate::ValidatedModule,
};

pub(super) fn render(
    module: &ValidatedModule,
    svc: &ServiceModel,
    namespace: Option<&str>,
) -> Result<(String, String)> {
    let name = svc
        .name
        .clone()
        .ok_or_else(|| Error::reference(format!("service '{}' has no name", svc.attachment)))?;
    let port = svc
        .port
        .ok_or_else(|| Error::reference(format!("service '{}' has no port", svc.attachment)))?;
    let target_port = svc.target_port.unwrap_or(port);

    let service = Service {
        metadata: object_meta(&name, namespace, &svc.labels, &svc.annotations),
        spec: Some(ServiceSpec {
            selector: Some(app_selector(&module.deployment_name())),
            type_: Some(svc.service_type().as_str().to_string()),
            session_affinity: svc.session_affinity.map(|a| a.as_str().to_string()),
            ports: Some(vec![ServicePort {
                name: svc.protocol.as_deref().and_then(get_valid_port_name),
                port: port.into(),
                target_port: Some(IntOrString::Int(target_port.into())),
                node_port: svc.node_port.map(i32::from),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    Ok((name, to_yaml(&service)?))
}
