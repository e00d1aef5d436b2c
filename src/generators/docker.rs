use std::fmt::Write;

use crate::model::{CopyFile, DockerModel};

/// Directory inside the image the executable is copied to.
pub const APP_HOME: &str = "/home/app";
/// Dependencies of a non-uber build are staged here in the build context.
pub const LIBS_DIR: &str = "libs";
pub const FILES_DIR: &str = "files";

/// Path of an extra copied file inside the build context. The index keeps
/// files that share a name apart.
pub fn copy_file_context_path(index: usize, file: &CopyFile) -> String {
    let name = file
        .source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    format!("{FILES_DIR}/{index}/{name}")
}

pub fn render_dockerfile(docker: &DockerModel) -> String {
    let mut out = String::new();
    let exe = docker.executable_name();

    // writing to a String cannot fail
    let _ = writeln!(out, "# Auto generated Dockerfile");
    let _ = writeln!(out, "FROM {}", docker.base_image());
    let _ = writeln!(out);
    let _ = writeln!(out, "WORKDIR {APP_HOME}");
    if !docker.uber && !docker.dependencies.is_empty() {
        let _ = writeln!(out, "COPY {LIBS_DIR}/ {APP_HOME}/{LIBS_DIR}/");
    }
    for (i, file) in docker.copy_files.iter().enumerate() {
        let _ = writeln!(out, "COPY {} {}", copy_file_context_path(i, file), file.target);
    }
    let _ = writeln!(out, "COPY {exe} {APP_HOME}/");

    if !docker.env.is_empty() {
        let _ = writeln!(out);
        for (k, v) in &docker.env {
            let _ = writeln!(out, "ENV {k}={}", quoted(v));
        }
    }
    if !docker.ports.is_empty() {
        let ports: Vec<_> = docker.ports.iter().map(u16::to_string).collect();
        let _ = writeln!(out);
        let _ = writeln!(out, "EXPOSE {}", ports.join(" "));
    }

    let entrypoint = docker
        .entrypoint
        .clone()
        .unwrap_or_else(|| vec![format!("{APP_HOME}/{exe}")]);
    let _ = writeln!(out);
    let _ = writeln!(out, "ENTRYPOINT {}", exec_form(&entrypoint));
    if let Some(cmd) = &docker.cmd {
        let _ = writeln!(out, "CMD {cmd}");
    }
    out
}

fn quoted(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn exec_form(args: &[String]) -> String {
    let quoted: Vec<_> = args.iter().map(|a| quoted(a)).collect();
    format!("[{}]", quoted.join(", "))
}
