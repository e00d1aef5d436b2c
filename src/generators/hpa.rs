use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec,
    MetricTarget, ResourceMetricSource,
};

use super::{object_meta, to_yaml};
use crate::{
    error::{Error, Result},
    model::{HpaModel, DEFAULT_HPA_CPU_PERCENTAGE},
};

pub(super) fn render(hpa: &HpaModel, namespace: Option<&str>) -> Result<(String, String)> {
    let name = hpa
        .name
        .clone()
        .ok_or_else(|| Error::reference("HPA has no name"))?;
    let target = hpa
        .target
        .clone()
        .ok_or_else(|| Error::reference(format!("HPA '{name}' has no deployment to scale")))?;

    let mut metrics = vec![utilization(
        "cpu",
        hpa.cpu_percentage.unwrap_or(DEFAULT_HPA_CPU_PERCENTAGE),
    )];
    if let Some(memory) = hpa.memory_percentage {
        metrics.push(utilization("memory", memory));
    }

    let autoscaler = HorizontalPodAutoscaler {
        metadata: object_meta(&name, namespace, &hpa.labels, &hpa.annotations),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: target,
            },
            min_replicas: Some(hpa.min_replicas()),
            max_replicas: hpa.max_replicas(),
            metrics: Some(metrics),
            behavior: None,
        }),
        status: None,
    };
    Ok((name, to_yaml(&autoscaler)?))
}

fn utilization(resource: &str, percentage: i32) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(percentage),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn hpa_yaml() {
        let hpa = HpaModel {
            name: Some("hello-hpa".into()),
            target: Some("hello-deployment".into()),
            min_replicas: Some(2),
            memory_percentage: Some(80),
            ..Default::default()
        };
        let (name, yaml) = render(&hpa, None).unwrap();
        assert_eq!(name, "hello-hpa");
        assert_eq!(
            yaml,
            r#"apiVersion: autoscaling/v2
kind: HorizontalPodAutoscaler
metadata:
  name: hello-hpa
spec:
  maxReplicas: 3
  metrics:
  - resource:
      name: cpu
      target:
        averageUtilization: 50
        type: Utilization
    type: Resource
  - resource:
      name: memory
      target:
        averageUtilization: 80
        type: Utilization
    type: Resource
  minReplicas: 2
  scaleTargetRef:
    apiVersion: apps/v1
    kind: Deployment
    name: hello-deployment
"#
        );
    }

    #[test]
    fn untargeted_hpa_is_an_error() {
        let hpa = HpaModel {
            name: Some("hello-hpa".into()),
            ..Default::default()
        };
        assert!(matches!(render(&hpa, None), Err(Error::Reference(_))));
    }
}
