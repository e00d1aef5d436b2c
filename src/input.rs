//! What the host tool hands us: declarations and the annotations attached to them.
//!
//! Everything here is plain data; nothing is re-parsed from source text.

use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Raw key/value payload of one annotation. Keys iterate in sorted order.
pub type AnnotationData = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnnotationKind {
    Deployment,
    Service,
    #[serde(rename = "HPA")]
    Hpa,
    Job,
    ConfigMap,
    Secret,
    #[serde(rename = "PersistentVolumeClaim")]
    Volume,
    Ingress,
    Probe,
}

impl AnnotationKind {
    pub const ALL: [AnnotationKind; 9] = [
        Self::Deployment,
        Self::Service,
        Self::Hpa,
        Self::Job,
        Self::ConfigMap,
        Self::Secret,
        Self::Volume,
        Self::Ingress,
        Self::Probe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Hpa => "HPA",
            Self::Job => "Job",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Volume => "PersistentVolumeClaim",
            Self::Ingress => "Ingress",
            Self::Probe => "Probe",
        }
    }
}

impl FromStr for AnnotationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::schema(format!("unknown annotation kind '{s}'")))
    }
}

impl Display for AnnotationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an annotation was written by the user or synthesized as a default.
/// Inferred annotations never overwrite a value that is already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Explicit,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationUse {
    pub target: AttachmentTarget,
    pub kind: AnnotationKind,
    #[serde(default)]
    pub data: AnnotationData,
    #[serde(default)]
    pub origin: Origin,
}

impl AnnotationUse {
    pub fn new(target: AttachmentTarget, kind: AnnotationKind, data: AnnotationData) -> Self {
        Self {
            target,
            kind,
            data,
            origin: Origin::Explicit,
        }
    }

    pub fn inferred(target: AttachmentTarget, kind: AnnotationKind, data: AnnotationData) -> Self {
        Self {
            target,
            kind,
            data,
            origin: Origin::Inferred,
        }
    }
}

/// The declaration an annotation decorates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttachmentTarget {
    Service(ServiceDecl),
    Listener(ListenerVariable),
    Function(FunctionDecl),
}

impl AttachmentTarget {
    /// Identifier used to key per-target entities (services, HPAs, ingresses).
    pub fn identifier(&self) -> &str {
        match self {
            Self::Service(s) => &s.name,
            Self::Listener(l) => &l.name,
            Self::Function(f) => &f.name,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Service(s) => format!("service '{}'", s.name),
            Self::Listener(l) => format!("listener '{}'", l.name),
            Self::Function(f) => format!("function '{}'", f.name),
        }
    }

    /// Services and listeners own a long running workload; functions own a job.
    pub fn owns_long_running_workload(&self) -> bool {
        !matches!(self, Self::Function(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDecl {
    pub name: String,
    #[serde(default)]
    pub listeners: Vec<AttachedListener>,
}

/// A listener expression attached to a service declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachedListener {
    /// `service on new Listener(..)`
    Anonymous(ListenerInit),
    /// `service on someListener`
    Named(NamedListener),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedListener {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerVariable {
    pub name: String,
    /// Package alias of the variable's declared type, e.g. `http` in `http:Listener`.
    #[serde(default)]
    pub declared_alias: Option<String>,
    #[serde(default = "default_true")]
    pub is_listener: bool,
    pub init: ListenerInit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
}

/// A listener constructor call: `new alias:Listener(args..)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListenerInit {
    /// Package alias written at the constructor, when the type was spelled out.
    #[serde(default)]
    pub type_alias: Option<String>,
    #[serde(default)]
    pub args: Vec<ListenerArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenerArg {
    /// A literal with its static type name, e.g. `int` / `9090`.
    Literal { type_name: String, text: String },
    Record { fields: Vec<RecordField> },
    /// Anything else, kept only for error messages.
    Expr { text: String },
}

impl ListenerArg {
    pub fn int(port: i64) -> Self {
        Self::Literal {
            type_name: "int".to_string(),
            text: port.to_string(),
        }
    }

    pub fn record<K: Into<String>, V: Into<String>>(fields: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Record {
            fields: fields
                .into_iter()
                .map(|(key, value)| RecordField {
                    key: key.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }
}

impl Display for ListenerArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { text, .. } | Self::Expr { text } => f.write_str(text),
            Self::Record { fields } => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.key, field.value)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub key: String,
    pub value: String,
}

/// Everything known about one compiled module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInput {
    pub module: String,
    /// The compiled executable copied into the image.
    pub executable: PathBuf,
    #[serde(default)]
    pub dependencies: Vec<PathBuf>,
    /// When unset the build-wide setting applies.
    #[serde(default)]
    pub uber: Option<bool>,
    /// Synthesize default annotations for every declaration.
    #[serde(default)]
    pub auto_generate: bool,
    #[serde(default)]
    pub declarations: Vec<AttachmentTarget>,
    /// In source declaration order.
    #[serde(default)]
    pub annotations: Vec<AnnotationUse>,
}

#[derive(Debug, Deserialize)]
struct ModuleFile {
    #[serde(default)]
    module: Vec<ModuleInput>,
}

impl ModuleInput {
    /// read module inputs from a toml file
    /// relative paths are considered relative to that file
    pub fn from_file(path: &Path) -> anyhow::Result<Vec<Self>> {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read module file at {}", path.display()))?;
        let parsed: ModuleFile = toml::from_str(&file)
            .with_context(|| format!("failed to parse module file at {}", path.display()))?;
        let mut modules = parsed.module;
        for m in &mut modules {
            m.make_relative_to(&parent);
        }
        Ok(modules)
    }

    fn make_relative_to(&mut self, base: &Path) {
        self.executable = base.join(&self.executable);
        for dep in &mut self.dependencies {
            *dep = base.join(&*dep);
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[[module]]
module = "hello"
executable = "target/bin/hello"
dependencies = ["libs/a.so"]
auto_generate = true

[[module.declarations]]
type = "service"
name = "helloWorld"

[[module.declarations.listeners]]
kind = "anonymous"
type_alias = "http"

[[module.declarations.listeners.args]]
kind = "literal"
type_name = "int"
text = "9090"

[[module.annotations]]
kind = "HPA"
data = { minReplicas = 2, maxReplicas = 4 }

[module.annotations.target]
type = "function"
name = "main"
"#;

    #[test]
    fn test_deserialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.toml");
        std::fs::write(&path, EXAMPLE).unwrap();

        let modules = ModuleInput::from_file(&path).unwrap();
        assert_eq!(modules.len(), 1);
        let m = &modules[0];
        assert_eq!(m.module, "hello");
        assert_eq!(m.executable, dir.path().join("target/bin/hello"));
        assert_eq!(m.dependencies, vec![dir.path().join("libs/a.so")]);
        assert!(m.auto_generate);
        assert_eq!(m.uber, None);
        assert_eq!(
            m.declarations,
            vec![AttachmentTarget::Service(ServiceDecl {
                name: "helloWorld".into(),
                listeners: vec![AttachedListener::Anonymous(ListenerInit {
                    type_alias: Some("http".into()),
                    args: vec![ListenerArg::int(9090)],
                })],
            })]
        );
        let hpa = &m.annotations[0];
        assert_eq!(hpa.kind, AnnotationKind::Hpa);
        assert_eq!(hpa.origin, Origin::Explicit);
        assert_eq!(hpa.data["maxReplicas"], serde_json::json!(4));
        assert_eq!(hpa.target.identifier(), "main");
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in AnnotationKind::ALL {
            assert_eq!(kind.as_str().parse::<AnnotationKind>().unwrap(), kind);
        }
        assert!(matches!(
            "Pod".parse::<AnnotationKind>(),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn record_display() {
        let arg = ListenerArg::record([("host", "\"0.0.0.0\""), ("port", "8080")]);
        assert_eq!(arg.to_string(), "{host: \"0.0.0.0\", port: 8080}");
    }
}
