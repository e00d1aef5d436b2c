use super::{deployment::pull_policy, resolve_name, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, AttachmentTarget, Origin},
    model::{assign, merge_map, ModuleContext, RestartPolicy},
    names::JOB_POSTFIX,
};

const KEYS: &[&str] = &[
    "name",
    "labels",
    "annotations",
    "restartPolicy",
    "backoffLimit",
    "activeDeadlineSeconds",
    "schedule",
    "env",
    "imagePullPolicy",
];

pub struct JobProcessor;

impl AnnotationProcessor for JobProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        let AttachmentTarget::Function(function) = &annotation.target else {
            return Err(Error::schema(format!(
                "@Job annotation is only supported on functions, not on {}",
                annotation.target.describe()
            )));
        };
        let fields = Fields::new(AnnotationKind::Job, &annotation.data, KEYS);
        let origin = annotation.origin;

        let (name, explicit_name) = resolve_name(&fields, &ctx.module, JOB_POSTFIX)?;
        let restart_policy = fields
            .string("restartPolicy")?
            .map(|s| s.parse::<RestartPolicy>())
            .transpose()?;
        let deadline = match fields.int("activeDeadlineSeconds")? {
            Some(n) if n <= 0 => {
                return Err(Error::schema(format!(
                    "@Job activeDeadlineSeconds must be positive, found {n}"
                )))
            }
            other => other,
        };
        let schedule = match fields.string("schedule")? {
            Some(s) if s.split_whitespace().count() != 5 => {
                return Err(Error::schema(format!(
                    "@Job schedule '{s}' is not a five field cron expression"
                )))
            }
            other => other,
        };
        let image_pull_policy = pull_policy(&fields)?;
        let mut annotations = fields.string_map("annotations")?;
        annotations.extend(fields.passthrough());

        let job = ctx.jobs.entry(function.name.clone()).or_default();
        assign(
            &mut job.name,
            name,
            if explicit_name { origin } else { Origin::Inferred },
        );
        if let Some(policy) = restart_policy {
            assign(&mut job.restart_policy, policy, origin);
        }
        if let Some(limit) = fields.count("backoffLimit")? {
            assign(&mut job.backoff_limit, limit, origin);
        }
        if let Some(deadline) = deadline {
            assign(&mut job.active_deadline_seconds, deadline, origin);
        }
        if let Some(schedule) = schedule {
            assign(&mut job.schedule, schedule, origin);
        }
        if let Some(policy) = image_pull_policy {
            assign(&mut job.image_pull_policy, policy, origin);
        }
        merge_map(&mut job.labels, fields.string_map("labels")?, origin);
        merge_map(&mut job.annotations, annotations, origin);
        merge_map(&mut job.env, fields.string_map("env")?, origin);
        Ok(())
    }
}
