use super::{require_workload_target, resolve_name, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, Origin},
    model::{assign, merge_map, HpaModel, ModuleContext},
    names::{get_valid_name, HPA_POSTFIX},
};

const KEYS: &[&str] = &[
    "name",
    "labels",
    "annotations",
    "minReplicas",
    "maxReplicas",
    "cpuPercentage",
    "memoryPercentage",
    "deployment",
];

/// One autoscaler per module, scaling the module's deployment.
pub struct HpaProcessor;

impl AnnotationProcessor for HpaProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        require_workload_target(AnnotationKind::Hpa, &annotation.target)?;
        let fields = Fields::new(AnnotationKind::Hpa, &annotation.data, KEYS);
        let origin = annotation.origin;

        let (name, explicit_name) = resolve_name(&fields, &ctx.module, HPA_POSTFIX)?;
        let min = fields.count("minReplicas")?;
        let max = fields.count("maxReplicas")?;
        let cpu = percentage(&fields, "cpuPercentage")?;
        let memory = percentage(&fields, "memoryPercentage")?;
        let target = fields.string("deployment")?.map(|d| get_valid_name(&d));
        let mut annotations = fields.string_map("annotations")?;
        annotations.extend(fields.passthrough());

        ctx.deployment.declared = true;
        let hpa = ctx.hpa.get_or_insert_with(HpaModel::default);
        assign(
            &mut hpa.name,
            name,
            if explicit_name { origin } else { Origin::Inferred },
        );
        if let Some(min) = min {
            assign(&mut hpa.min_replicas, min, origin);
        }
        if let Some(max) = max {
            assign(&mut hpa.max_replicas, max, origin);
        }
        if let Some(cpu) = cpu {
            assign(&mut hpa.cpu_percentage, cpu, origin);
        }
        if let Some(memory) = memory {
            assign(&mut hpa.memory_percentage, memory, origin);
        }
        if let Some(target) = target {
            assign(&mut hpa.target, target, origin);
        }
        merge_map(&mut hpa.labels, fields.string_map("labels")?, origin);
        merge_map(&mut hpa.annotations, annotations, origin);

        if hpa.min_replicas() < 1 {
            return Err(Error::schema(format!(
                "@HPA minReplicas must be at least 1, found {}",
                hpa.min_replicas()
            )));
        }
        if hpa.min_replicas() > hpa.max_replicas() {
            return Err(Error::schema(format!(
                "@HPA minReplicas ({}) is greater than maxReplicas ({})",
                hpa.min_replicas(),
                hpa.max_replicas()
            )));
        }
        Ok(())
    }
}

fn percentage(fields: &Fields, key: &str) -> Result<Option<i32>> {
    match fields.count(key)? {
        Some(p) if p == 0 || p > 100 => Err(Error::schema(format!(
            "@HPA {key} must be between 1 and 100, found {p}"
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::processors::{process, test_support::*};

    #[test]
    fn hpa_annotation() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("helloWorld", 9090),
                AnnotationKind::Hpa,
                json!({"minReplicas": 2, "maxReplicas": 6, "cpuPercentage": 70}),
            ),
        )
        .unwrap();
        let hpa = ctx.hpa.as_ref().unwrap();
        assert_eq!(hpa.name.as_deref(), Some("hello-hpa"));
        assert_eq!(hpa.min_replicas(), 2);
        assert_eq!(hpa.max_replicas(), 6);
        assert_eq!(hpa.cpu_percentage, Some(70));
        assert_eq!(hpa.target, None);
        assert!(ctx.deployment.declared);
    }

    #[test]
    fn max_defaults_above_min() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("helloWorld", 9090),
                AnnotationKind::Hpa,
                json!({"minReplicas": 4}),
            ),
        )
        .unwrap();
        assert_eq!(ctx.hpa.unwrap().max_replicas(), 5);
    }

    #[test]
    fn largest_min_replicas() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("helloWorld", 9090),
                AnnotationKind::Hpa,
                json!({"minReplicas": 2147483647}),
            ),
        )
        .unwrap();
        let hpa = ctx.hpa.unwrap();
        assert_eq!(hpa.min_replicas(), i32::MAX);
        assert_eq!(hpa.max_replicas(), i32::MAX);
    }

    #[test]
    fn invalid_bounds() {
        for bad in [
            json!({"minReplicas": 5, "maxReplicas": 2}),
            json!({"minReplicas": 0}),
            json!({"cpuPercentage": 150}),
            json!({"memoryPercentage": "high"}),
        ] {
            let mut ctx = context();
            let err = process(
                &mut ctx,
                &annotation(http_service("s", 80), AnnotationKind::Hpa, bad.clone()),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Schema(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn explicit_target_is_sanitized() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("s", 80),
                AnnotationKind::Hpa,
                json!({"deployment": "Other_Deployment"}),
            ),
        )
        .unwrap();
        assert_eq!(ctx.hpa.unwrap().target.as_deref(), Some("other-deployment"));
    }
}
