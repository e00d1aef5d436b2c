use std::{fmt::Debug, fmt::Formatter, path::PathBuf, str::FromStr};

use clap::Parser;

use crate::artifacts::BuildSettings;

#[derive(Parser, Debug, Clone)]
#[clap(name = "manifestor", about = "Generate Kubernetes manifests and Dockerfiles from annotated modules")]
pub struct Opts {
    /// Path to the module descriptions (toml, one `[[module]]` table each)
    #[clap(short, long, env = "MANIFESTOR_MODULES")]
    pub modules: PathBuf,

    /// Root of the generated output; files land in `kubernetes/<module>` and
    /// `docker/<module>` below it.
    #[clap(short, long, env = "MANIFESTOR_OUTPUT", default_value = "target")]
    pub output: PathBuf,

    /// Namespace for resources whose deployment annotation does not name one.
    #[clap(short, long, env = "MANIFESTOR_NAMESPACE")]
    pub namespace: Option<KubeNamespace>,

    /// Package executables as single self-contained files unless a module says otherwise.
    #[clap(short, long, env = "MANIFESTOR_UBER", default_value = "false")]
    pub uber: bool,
}

impl Opts {
    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            output_root: self.output.clone(),
            uber: self.uber,
            namespace: self.namespace.as_ref().map(|ns| ns.as_str().to_string()),
        }
    }
}

/// Valid custom namespaces:
///   must not be empty, use "default" instead
///   contain at most 63 characters
///   contain only lowercase alphanumeric characters or '-'
///   start with an alphanumeric character
///   end with an alphanumeric character
///   should not start with 'kube-'
#[derive(Clone, PartialEq, Eq)]
pub struct KubeNamespace(String);

impl KubeNamespace {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for KubeNamespace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        let (Some(first), Some(last)) = (s.chars().next(), s.chars().last()) else {
            anyhow::bail!("namespace cannot be an empty string");
        };
        anyhow::ensure!(s.len() <= 63, "namespace must be <= 63 characters");
        anyhow::ensure!(
            s.chars().all(|c| alnum(c) || c == '-'),
            "namespace must contain only lowercase alphanumeric characters or '-'"
        );
        anyhow::ensure!(
            alnum(first),
            "namespace must start with an alphanumeric character"
        );
        anyhow::ensure!(
            alnum(last),
            "namespace must end with an alphanumeric character"
        );
        anyhow::ensure!(
            !s.starts_with("kube-"),
            "namespace should not start with 'kube-'"
        );
        Ok(Self(s.to_string()))
    }
}

impl Debug for KubeNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
