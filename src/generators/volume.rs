use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};

use super::{object_meta, to_yaml};
use crate::{error::Result, model::VolumeClaimModel};

pub(super) fn render(claim: &VolumeClaimModel, namespace: Option<&str>) -> Result<String> {
    to_yaml(&PersistentVolumeClaim {
        metadata: object_meta(&claim.name, namespace, &BTreeMap::new(), &claim.annotations),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![claim.access_mode.clone()]),
            resources: Some(ResourceRequirements {
                requests: Some([("storage".to_string(), Quantity(claim.size.clone()))].into()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    })
}
