use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{ConfigMap, Secret},
    ByteString,
};

use super::{object_meta, to_yaml};
use crate::{
    error::Result,
    model::{ConfigMapModel, SecretModel},
};

pub(super) fn render_config_map(cm: &ConfigMapModel, namespace: Option<&str>) -> Result<String> {
    let empty = BTreeMap::new();
    to_yaml(&ConfigMap {
        metadata: object_meta(&cm.name, namespace, &empty, &empty),
        data: Some(cm.data.clone()),
        ..Default::default()
    })
}

/// Secret values are base64 encoded by `ByteString`'s serializer.
pub(super) fn render_secret(secret: &SecretModel, namespace: Option<&str>) -> Result<String> {
    let empty = BTreeMap::new();
    let data = secret
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone())))
        .collect();
    to_yaml(&Secret {
        metadata: object_meta(&secret.name, namespace, &empty, &empty),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}
