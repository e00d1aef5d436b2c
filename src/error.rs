//! Error types shared by the processing, validation and generation stages.

use std::{fmt, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Unknown annotation kind, or a known key carrying a value of the wrong shape.
    #[error("schema error: {0}")]
    Schema(String),

    /// A port, name or cross-resource reference breaks an invariant.
    #[error("reference error: {0}")]
    Reference(String),

    /// The listener's construction arguments did not yield a usable port.
    #[error("unable to extract port from the listener {expr}")]
    PortExtraction { expr: String },

    /// A port was found but is not a number in 0..=65535.
    #[error("unable to parse port/targetPort for the service: {expr}")]
    PortParse { expr: String },

    /// Anything else that could not be inferred from a listener.
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A generator or writer failed mid-module. Partial output was removed.
    #[error("generation aborted for module [{module}]: {cause}")]
    GenerationAborted { module: String, cause: Box<Error> },

    #[error("pipeline cancelled for module [{0}]")]
    Cancelled(String),

    #[error("deployment context for module [{0}] is already in use")]
    ContextInUse(String),
}

impl Error {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn reference(msg: impl Into<String>) -> Self {
        Self::Reference(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Every error collected for one module, in the order it was found.
#[derive(Debug, Default)]
pub struct ModuleErrors {
    pub module: String,
    pub errors: Vec<Error>,
}

impl ModuleErrors {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, e: Error) {
        self.errors.push(e);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<(String, Error)> for ModuleErrors {
    fn from((module, e): (String, Error)) -> Self {
        Self {
            module,
            errors: vec![e],
        }
    }
}

impl fmt::Display for ModuleErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module [{}] has {} error(s)", self.module, self.errors.len())?;
        for e in &self.errors {
            write!(f, "\n  - {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ModuleErrors {}
