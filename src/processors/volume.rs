use super::{resolve_name, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, Origin},
    model::{ModuleContext, VolumeClaimModel, DEFAULT_ACCESS_MODE},
    names::VOLUME_CLAIM_POSTFIX,
};

const CLAIM_KEYS: &[&str] = &[
    "name",
    "mountPath",
    "accessMode",
    "volumeClaimSize",
    "readOnly",
    "annotations",
];

const ACCESS_MODES: &[&str] = &["ReadWriteOnce", "ReadOnlyMany", "ReadWriteMany", "ReadWriteOncePod"];

pub struct VolumeProcessor;

impl AnnotationProcessor for VolumeProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        let fields = Fields::new(AnnotationKind::Volume, &annotation.data, &["volumeClaims"]);
        for claim in fields.records("volumeClaims", CLAIM_KEYS)? {
            let mount_path = claim
                .string("mountPath")?
                .ok_or_else(|| Error::schema("volume claim requires a 'mountPath'"))?;
            let size = claim
                .string("volumeClaimSize")?
                .ok_or_else(|| Error::schema("volume claim requires a 'volumeClaimSize'"))?;
            let access_mode = match claim.string("accessMode")? {
                Some(mode) if !ACCESS_MODES.contains(&mode.as_str()) => {
                    return Err(Error::schema(format!(
                        "invalid accessMode '{mode}', expected one of {}",
                        ACCESS_MODES.join(", ")
                    )))
                }
                Some(mode) => mode,
                None => DEFAULT_ACCESS_MODE.to_string(),
            };
            let fallback = mount_path.trim_matches('/').to_string();
            let (name, _) = resolve_name(&claim, &fallback, VOLUME_CLAIM_POSTFIX)?;

            if annotation.origin == Origin::Inferred
                && ctx.volume_claims.iter().any(|v| v.name == name)
            {
                continue;
            }
            ctx.volume_claims.push(VolumeClaimModel {
                name,
                mount_path,
                access_mode,
                size,
                read_only: claim.bool("readOnly")?.unwrap_or(false),
                annotations: claim.string_map("annotations")?,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::processors::{process, test_support::*};

    #[test]
    fn claims_are_collected() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("helloWorld", 9090),
                AnnotationKind::Volume,
                json!({"volumeClaims": [
                    {"name": "Data", "mountPath": "/var/data", "volumeClaimSize": "2Gi"},
                    {"mountPath": "/var/cache", "volumeClaimSize": "1Gi", "accessMode": "ReadWriteMany", "readOnly": true},
                ]}),
            ),
        )
        .unwrap();
        let claims = &ctx.volume_claims;
        assert_eq!(claims[0].name, "data");
        assert_eq!(claims[0].access_mode, "ReadWriteOnce");
        assert!(!claims[0].read_only);
        assert_eq!(claims[1].name, "var-cache-pvc");
        assert_eq!(claims[1].size, "1Gi");
        assert!(claims[1].read_only);
    }

    #[test]
    fn required_keys() {
        for bad in [
            json!({"volumeClaims": [{"volumeClaimSize": "1Gi"}]}),
            json!({"volumeClaims": [{"mountPath": "/data"}]}),
            json!({"volumeClaims": [{"mountPath": "/data", "volumeClaimSize": "1Gi", "accessMode": "All"}]}),
            json!({"volumeClaims": {"mountPath": "/data"}}),
        ] {
            let mut ctx = context();
            let err = process(
                &mut ctx,
                &annotation(http_service("s", 80), AnnotationKind::Volume, bad.clone()),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Schema(_)), "{bad}: {err}");
        }
    }
}
