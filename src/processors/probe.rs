use serde_json::Value;

use super::{require_workload_target, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse},
    model::{ModuleContext, ProbeAction, ProbeKind, ProbeModel},
};

const KEYS: &[&str] = &["kind", "port", "path", "command", "initialDelaySeconds", "periodSeconds"];
const RECORD_KEYS: &[&str] = &["port", "path", "command", "initialDelaySeconds", "periodSeconds"];

pub struct ProbeProcessor;

impl AnnotationProcessor for ProbeProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        require_workload_target(AnnotationKind::Probe, &annotation.target)?;
        let fields = Fields::new(AnnotationKind::Probe, &annotation.data, KEYS);
        let kind = fields
            .string("kind")?
            .ok_or_else(|| Error::schema("@Probe annotation requires a 'kind' of liveness or readiness"))?
            .parse::<ProbeKind>()?;
        let probe = probe_from_fields(kind, &fields)?;
        ctx.deployment.declared = true;
        ctx.deployment.set_probe(probe, annotation.origin);
        Ok(())
    }
}

/// `true` enables a default probe, `false` none, a record configures one.
pub(super) fn probe_from_value(
    kind: ProbeKind,
    owner: &Fields,
    key: &str,
) -> Result<Option<ProbeModel>> {
    match owner.value(key) {
        None | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(ProbeModel::new(kind))),
        Some(Value::Object(_)) => match owner.record(key, RECORD_KEYS)? {
            Some(fields) => probe_from_fields(kind, &fields).map(Some),
            None => Ok(None),
        },
        Some(other) => Err(Error::schema(format!(
            "'{key}' must be a boolean or a probe record, found {other}"
        ))),
    }
}

fn probe_from_fields(kind: ProbeKind, fields: &Fields) -> Result<ProbeModel> {
    let mut probe = ProbeModel::new(kind);
    probe.port = fields.port("port")?;
    let path = fields.string("path")?;
    let command = match fields.value("command") {
        None => None,
        Some(Value::String(cmd)) => Some(vec!["sh".to_string(), "-c".to_string(), cmd.clone()]),
        Some(_) => Some(fields.string_list("command")?),
    };
    probe.action = match (path, command) {
        (Some(_), Some(_)) => {
            return Err(Error::schema(format!(
                "{} probe may set either 'path' or 'command', not both",
                kind.as_str()
            )))
        }
        (Some(path), None) => ProbeAction::HttpGet { path },
        (None, Some(command)) => ProbeAction::Exec { command },
        (None, None) => ProbeAction::TcpSocket,
    };
    if let Some(delay) = fields.count("initialDelaySeconds")? {
        probe.initial_delay_seconds = delay;
    }
    if let Some(period) = fields.count("periodSeconds")? {
        probe.period_seconds = period;
    }
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::processors::{process, test_support::*};

    #[test]
    fn http_readiness_probe() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("hello", 9090),
                AnnotationKind::Probe,
                json!({"kind": "readiness", "path": "/health", "periodSeconds": 7}),
            ),
        )
        .unwrap();
        let probe = ctx.deployment.readiness.unwrap();
        assert_eq!(
            probe.action,
            ProbeAction::HttpGet {
                path: "/health".into()
            }
        );
        assert_eq!(probe.period_seconds, 7);
        assert_eq!(probe.initial_delay_seconds, 3);
        assert_eq!(probe.port, None);
        assert!(ctx.deployment.liveness.is_none());
    }

    #[test]
    fn exec_probe_from_string_command() {
        let mut ctx = context();
        process(
            &mut ctx,
            &annotation(
                http_service("hello", 9090),
                AnnotationKind::Probe,
                json!({"kind": "liveness", "command": "test -f /tmp/ok"}),
            ),
        )
        .unwrap();
        let probe = ctx.deployment.liveness.unwrap();
        assert_eq!(
            probe.action,
            ProbeAction::Exec {
                command: vec!["sh".into(), "-c".into(), "test -f /tmp/ok".into()]
            }
        );
        assert!(!probe.action.needs_port());
    }

    #[test]
    fn probe_needs_kind() {
        let mut ctx = context();
        let err = process(
            &mut ctx,
            &annotation(http_service("hello", 9090), AnnotationKind::Probe, json!({})),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let err = process(
            &mut ctx,
            &annotation(
                http_service("hello", 9090),
                AnnotationKind::Probe,
                json!({"kind": "startup"}),
            ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn probe_on_function_is_rejected() {
        let mut ctx = context();
        let err = process(
            &mut ctx,
            &annotation(main_function(), AnnotationKind::Probe, json!({"kind": "liveness"})),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
