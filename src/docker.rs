//! Image build instructions for a generated build context.
//!
//! Nothing here runs a build; callers hand [`ImageBuildSpec::command`] to a
//! shell or [`ImageBuildSpec::archive`] to a daemon.

use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    generators::DOCKERFILE,
    model::DockerModel,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildSpec {
    /// `registry/name:tag`
    pub tag: String,
    pub context_dir: PathBuf,
    pub dockerfile: PathBuf,
}

impl ImageBuildSpec {
    pub fn new(docker: &DockerModel, context_dir: &Path) -> Self {
        Self {
            tag: docker.image_reference(),
            context_dir: context_dir.to_path_buf(),
            dockerfile: context_dir.join(DOCKERFILE),
        }
    }

    /// `docker build` invocation for this context.
    pub fn command(&self) -> Vec<String> {
        vec![
            "docker".to_string(),
            "build".to_string(),
            "--file".to_string(),
            self.dockerfile.display().to_string(),
            "--tag".to_string(),
            self.tag.clone(),
            self.context_dir.display().to_string(),
        ]
    }

    /// Tar the build context with the Dockerfile at its root.
    /// currently does not heed .dockerignore
    pub fn archive(&self) -> Result<Vec<u8>> {
        let in_context = self.context_dir.join(DOCKERFILE);
        if in_context.exists() && in_context != self.dockerfile {
            return Err(Error::reference(format!(
                "build context {} may only contain 'Dockerfile' if the build spec points to it",
                self.context_dir.display()
            )));
        }

        let io = |e: std::io::Error| Error::io(&self.context_dir, e);
        let mut archive = tar::Builder::new(Vec::new());
        archive.follow_symlinks(false);
        archive.append_dir_all(".", &self.context_dir).map_err(io)?;
        if in_context != self.dockerfile {
            archive
                .append_path_with_name(&self.dockerfile, DOCKERFILE)
                .map_err(|e| Error::io(&self.dockerfile, e))?;
        }
        archive.into_inner().map_err(io)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, io::Read};

    use super::*;

    fn entries(tarball: &[u8]) -> BTreeSet<(String, String)> {
        let mut archive = tar::Archive::new(tarball);
        archive
            .entries()
            .unwrap()
            .map(Result::unwrap)
            .filter(|e| e.header().entry_type().is_file())
            .map(|mut e| {
                let path = e.path().unwrap().display().to_string();
                let mut body = String::new();
                e.read_to_string(&mut body).unwrap();
                (path.trim_start_matches("./").to_string(), body)
            })
            .collect()
    }

    #[test]
    fn command_line() {
        let docker = DockerModel {
            name: Some("hello".into()),
            registry: Some("reg.io".into()),
            ..Default::default()
        };
        let spec = ImageBuildSpec::new(&docker, Path::new("/out/docker/hello"));
        assert_eq!(spec.tag, "reg.io/hello:latest");
        assert_eq!(
            spec.command().join(" "),
            "docker build --file /out/docker/hello/Dockerfile --tag reg.io/hello:latest /out/docker/hello"
        );
    }

    #[test]
    fn archive_contains_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DOCKERFILE), "FROM scratch\n").unwrap();
        std::fs::write(dir.path().join("hello"), "bin").unwrap();

        let spec = ImageBuildSpec::new(&DockerModel::default(), dir.path());
        let tarball = spec.archive().unwrap();
        let got = entries(&tarball);
        assert!(got.contains(&("Dockerfile".to_string(), "FROM scratch\n".to_string())));
        assert!(got.contains(&("hello".to_string(), "bin".to_string())));
    }

    #[test]
    fn foreign_dockerfile_conflicts_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DOCKERFILE), "FROM scratch\n").unwrap();
        let other = elsewhere.path().join(DOCKERFILE);
        std::fs::write(&other, "FROM alpine\n").unwrap();

        let spec = ImageBuildSpec {
            tag: "x:latest".into(),
            context_dir: dir.path().to_path_buf(),
            dockerfile: other,
        };
        assert!(matches!(spec.archive(), Err(Error::Reference(_))));
    }
}
