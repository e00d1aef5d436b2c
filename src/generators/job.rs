use k8s_openapi::{
    api::{
        batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec},
        core::v1::PodTemplateSpec,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use super::{
    deployment::{container, pod_spec},
    non_empty, object_meta, to_yaml,
};
use crate::{
    error::{Error, Result},
    model::{JobModel, RestartPolicy, DEFAULT_JOB_BACKOFF_LIMIT},
    validate::ValidatedModule,
};

/// A one-shot `Job`, or a `CronJob` wrapping the same job spec when scheduled.
/// Returns the resource name, the file kind and the YAML.
pub(super) fn render(
    module: &ValidatedModule,
    job: &JobModel,
    namespace: Option<&str>,
) -> Result<(String, &'static str, String)> {
    let name = job
        .name
        .clone()
        .ok_or_else(|| Error::reference("job has no name"))?;
    let restart_policy = job.restart_policy.unwrap_or(RestartPolicy::OnFailure);
    let container = container(module, &name, &job.env, job.image_pull_policy.as_deref());

    let spec = JobSpec {
        backoff_limit: Some(job.backoff_limit.unwrap_or(DEFAULT_JOB_BACKOFF_LIMIT)),
        active_deadline_seconds: job.active_deadline_seconds,
        template: PodTemplateSpec {
            metadata: non_empty(&job.labels).map(|labels| ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(pod_spec(module, container, Some(restart_policy.as_str()))),
        },
        ..Default::default()
    };
    let metadata = object_meta(&name, namespace, &job.labels, &job.annotations);

    match &job.schedule {
        None => {
            let yaml = to_yaml(&Job {
                metadata,
                spec: Some(spec),
                status: None,
            })?;
            Ok((name, "job", yaml))
        }
        Some(schedule) => {
            let yaml = to_yaml(&CronJob {
                metadata,
                spec: Some(CronJobSpec {
                    schedule: schedule.clone(),
                    job_template: JobTemplateSpec {
                        metadata: None,
                        spec: Some(spec),
                    },
                    ..Default::default()
                }),
                status: None,
            })?;
            Ok((name, "cronjob", yaml))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        generators::test_support::validated,
        input::AnnotationKind,
        processors::test_support::*,
    };

    #[test]
    fn one_shot_job_yaml() {
        let module = validated(vec![annotation(
            main_function(),
            AnnotationKind::Job,
            json!({}),
        )]);
        let (name, kind, yaml) = render(&module, &module.jobs["main"], None).unwrap();
        assert_eq!((name.as_str(), kind), ("hello-job", "job"));
        assert_eq!(
            yaml,
            r#"apiVersion: batch/v1
kind: Job
metadata:
  name: hello-job
spec:
  backoffLimit: 3
  template:
    spec:
      containers:
      - image: hello:latest
        name: hello-job
      restartPolicy: OnFailure
"#
        );
    }

    #[test]
    fn scheduled_job_is_a_cron_job() {
        let module = validated(vec![annotation(
            main_function(),
            AnnotationKind::Job,
            json!({"schedule": "0 * * * *", "restartPolicy": "Never", "env": {"MODE": "batch"}}),
        )]);
        let (_, kind, yaml) = render(&module, &module.jobs["main"], Some("jobs")).unwrap();
        assert_eq!(kind, "cronjob");
        let cron: CronJob = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cron.metadata.namespace.as_deref(), Some("jobs"));
        let spec = cron.spec.unwrap();
        assert_eq!(spec.schedule, "0 * * * *");
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let env = pod.containers[0].env.as_ref().unwrap();
        assert_eq!(env[0].name, "MODE");
    }
}
