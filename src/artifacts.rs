//! Drives one module from annotations to files on disk.
//!
//! `Idle -> Populating -> Validating -> Generating -> Written | Failed`
//!
//! Processing and validation collect every error. Generation renders the
//! whole artifact set in memory before touching the output directories and
//! removes whatever it wrote if anything goes wrong, so a module's output is
//! either complete or absent.

use std::{
    fmt::{self, Debug, Display, Formatter},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    defaults,
    docker::ImageBuildSpec,
    error::{Error, ModuleErrors, Result},
    generators::{copy_file_context_path, render_all, Artifact, Destination, RenderOptions, LIBS_DIR},
    input::ModuleInput,
    model::{DockerModel, ModuleContext, OutputPaths},
    processors,
    registry::{GenerationState, ModelRegistry},
    validate::validate,
};

/// Build-wide settings shared by every module.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub output_root: PathBuf,
    /// Default for modules that do not say.
    pub uber: bool,
    pub namespace: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ArtifactDigest {
    hash: [u8; 32],
}

impl ArtifactDigest {
    /// Hash of the generated files, in write order.
    fn of(artifacts: &[Artifact]) -> Self {
        let mut hasher = Sha256::new();
        for a in artifacts {
            let dir = match a.destination {
                Destination::Kubernetes => "kubernetes",
                Destination::Docker => "docker",
            };
            hasher.update(dir);
            hasher.update([0]);
            hasher.update(&a.file_name);
            hasher.update([0]);
            hasher.update((a.contents.len() as u64).to_le_bytes());
            hasher.update(&a.contents);
        }
        Self {
            hash: hasher.finalize().into(),
        }
    }

    pub fn hex(&self) -> String {
        self.hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// convert to hex the first 64 bits of this hash
    pub fn shorthex(&self) -> String {
        self.hash
            .iter()
            .map(|b| format!("{:02x}", b))
            .take(8)
            .collect()
    }
}

impl Display for ArtifactDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl Debug for ArtifactDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactDigest({})", self.shorthex())
    }
}

/// Everything written for one module.
#[derive(Debug, Clone)]
pub struct ModuleOutput {
    pub module: String,
    pub kubernetes_dir: PathBuf,
    pub docker_dir: PathBuf,
    pub cloud_config: PathBuf,
    /// Every file written, in write order.
    pub files: Vec<PathBuf>,
    pub digest: ArtifactDigest,
    pub image: ImageBuildSpec,
}

pub struct ArtifactManager<'r> {
    registry: &'r ModelRegistry,
    settings: BuildSettings,
    cancel: CancellationToken,
}

impl<'r> ArtifactManager<'r> {
    pub fn new(registry: &'r ModelRegistry, settings: BuildSettings) -> Self {
        Self {
            registry,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between stages once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn output_paths(&self, module: &str) -> OutputPaths {
        OutputPaths::for_module(&self.settings.output_root, module)
    }

    /// Populate and then generate.
    pub fn run(&self, input: &ModuleInput) -> Result<ModuleOutput, ModuleErrors> {
        self.populate_deployment_model(input)?;
        self.create_artifacts(&input.module)
    }

    /// Run every annotation of `input` through its processor, explicit
    /// annotations first, then the synthesized defaults.
    pub fn populate_deployment_model(&self, input: &ModuleInput) -> Result<(), ModuleErrors> {
        let module = input.module.as_str();
        self.check_cancelled(module)?;

        // a refused checkout leaves the holder's state untouched
        let mut ctx = self
            .registry
            .checkout(module, || {
                ModuleContext::new(module, self.output_paths(module))
            })
            .map_err(|e| ModuleErrors::from((module.to_string(), e)))?;
        self.registry.set_state(module, GenerationState::Populating);

        ctx.docker.executable = input.executable.clone();
        ctx.docker.dependencies.extend(input.dependencies.iter().cloned());
        ctx.docker.uber = input.uber.unwrap_or(self.settings.uber);

        let mut errors = ModuleErrors::new(module);
        let inferred = if input.auto_generate {
            defaults::synthesize(&input.declarations)
        } else {
            Vec::new()
        };
        for annotation in input.annotations.iter().chain(&inferred) {
            if let Err(e) = processors::process(&mut ctx, annotation) {
                debug!(module, kind = %annotation.kind, error = %e, "annotation rejected");
                errors.push(e);
            }
        }
        self.registry.checkin(ctx);
        errors.into_result().map_err(|errors| {
            let _ = self.registry.take(module);
            self.registry.set_state(module, GenerationState::Failed);
            errors
        })
    }

    /// Validate the populated model and write its artifacts.
    pub fn create_artifacts(&self, module: &str) -> Result<ModuleOutput, ModuleErrors> {
        self.check_cancelled(module)?;
        let ctx = match self.registry.take(module) {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                return Err(self.fail(
                    module,
                    Error::reference(format!("no deployment model was populated for module [{module}]")),
                ))
            }
            Err(e) => return Err(self.fail(module, e)),
        };

        self.registry.set_state(module, GenerationState::Validating);
        let validated = validate(ctx).map_err(|errors| {
            self.registry.set_state(module, GenerationState::Failed);
            errors
        })?;
        self.check_cancelled(module)?;

        self.registry.set_state(module, GenerationState::Generating);
        let paths = validated.paths.clone();
        if let Err(e) = remove_outputs(&paths) {
            return Err(self.abort(module, &paths, e));
        }

        let opts = RenderOptions {
            namespace: self.settings.namespace.clone(),
        };
        let artifacts = match render_all(&validated, &opts) {
            Ok(artifacts) => artifacts,
            Err(e) => return Err(self.abort(module, &paths, e)),
        };
        if self.cancel.is_cancelled() {
            return Err(self.abort(module, &paths, Error::Cancelled(module.to_string())));
        }

        let files = match write_all(&paths, &artifacts, &validated.docker) {
            Ok(files) => files,
            Err(e) => return Err(self.abort(module, &paths, e)),
        };

        let digest = ArtifactDigest::of(&artifacts);
        let image = ImageBuildSpec::new(&validated.docker, &paths.docker);
        self.registry.set_state(module, GenerationState::Written);
        info!(
            module,
            files = files.len(),
            digest = %digest.shorthex(),
            image = %image.tag,
            "artifacts written"
        );
        Ok(ModuleOutput {
            module: module.to_string(),
            kubernetes_dir: paths.kubernetes,
            docker_dir: paths.docker,
            cloud_config: paths.cloud_config,
            files,
            digest,
            image,
        })
    }

    fn check_cancelled(&self, module: &str) -> Result<(), ModuleErrors> {
        if self.cancel.is_cancelled() {
            Err(self.fail(module, Error::Cancelled(module.to_string())))
        } else {
            Ok(())
        }
    }

    fn fail(&self, module: &str, e: Error) -> ModuleErrors {
        self.registry.set_state(module, GenerationState::Failed);
        ModuleErrors::from((module.to_string(), e))
    }

    /// Remove partial output and report the cause.
    fn abort(&self, module: &str, paths: &OutputPaths, cause: Error) -> ModuleErrors {
        warn!(module, error = %cause, "generation aborted, removing partial output");
        if let Err(e) = remove_outputs(paths) {
            warn!(module, error = %e, "failed to remove partial output");
        }
        self.fail(
            module,
            Error::GenerationAborted {
                module: module.to_string(),
                cause: Box::new(cause),
            },
        )
    }
}

fn remove_outputs(paths: &OutputPaths) -> Result<()> {
    for dir in [&paths.kubernetes, &paths.docker] {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => debug!(dir = %dir.display(), "removed previous output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(dir, e)),
        }
    }
    Ok(())
}

fn write_all(paths: &OutputPaths, artifacts: &[Artifact], docker: &DockerModel) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in [&paths.kubernetes, &paths.docker] {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }

    for artifact in artifacts {
        let dir = match artifact.destination {
            Destination::Kubernetes => &paths.kubernetes,
            Destination::Docker => &paths.docker,
        };
        let path = dir.join(&artifact.file_name);
        std::fs::write(&path, &artifact.contents).map_err(|e| Error::io(&path, e))?;
        files.push(path);
    }

    files.push(copy_into(&docker.executable, &paths.docker.join(docker.executable_name()))?);
    if !docker.uber {
        let libs = paths.docker.join(LIBS_DIR);
        for dep in docker.dependencies.iter().sorted() {
            let name = dep
                .file_name()
                .ok_or_else(|| Error::schema(format!("dependency '{}' does not name a file", dep.display())))?;
            files.push(copy_into(dep, &libs.join(name))?);
        }
    }
    for (i, file) in docker.copy_files.iter().enumerate() {
        let target = paths.docker.join(copy_file_context_path(i, file));
        files.push(copy_into(&file.source, &target)?);
    }
    Ok(files)
}

fn copy_into(source: &Path, target: &Path) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::copy(source, target).map_err(|e| Error::io(source, e))?;
    Ok(target.to_path_buf())
}
