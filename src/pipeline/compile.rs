//! Compiler invocation: LaTeX source in, PDF bytes out.
//!
//! Every call gets its own scratch directory:
//!
//! ```text
//! latex-XXXXXX/
//! ├── content/doc.tex      (read-only inside a container)
//! └── output/
//!     ├── output.pdf
//!     └── output.log | compile.log
//! ```
//!
//! The directory is a [`tempfile::TempDir`]; it is removed when the call
//! returns on every path, including timeouts and spawn failures. Nothing
//! about one request is visible to another.
//!
//! A container run is named after its scratch directory. On timeout the
//! container is killed and removed by name before the directory goes away.

use crate::config::{CompilerBackend, ServiceConfig};
use crate::error::CompileError;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

const CONTENT_DIR: &str = "content";
const OUTPUT_DIR: &str = "output";
const TEX_FILE: &str = "doc.tex";
const PDF_FILE: &str = "output.pdf";
const JOB_NAME: &str = "output";
const CONTAINER_CONTENT_DIR: &str = "/latex/content";
const CONTAINER_OUTPUT_DIR: &str = "/latex/output";
const CONTAINER_STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Compiles a final LaTeX document to PDF bytes.
#[async_trait]
pub trait PdfCompiler: Send + Sync {
    async fn compile(&self, document: &str) -> Result<Vec<u8>, CompileError>;
}

/// Whether a container may write to a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAccess {
    ReadOnly,
    ReadWrite,
}

/// A host directory bind-mounted into the compiler container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub access: MountAccess,
}

impl MountSpec {
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            access: MountAccess::ReadOnly,
        }
    }

    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            access: MountAccess::ReadWrite,
        }
    }

    /// The `host:container[:ro]` value for `-v`.
    pub fn volume_arg(&self) -> OsString {
        let mut arg = OsString::from(self.host_path.as_os_str());
        arg.push(":");
        arg.push(self.container_path.as_os_str());
        if self.access == MountAccess::ReadOnly {
            arg.push(":ro");
        }
        arg
    }
}

/// Production [`PdfCompiler`]: a local LaTeX engine or a one-shot container.
#[derive(Debug, Clone)]
pub struct LatexCompiler {
    backend: CompilerBackend,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl LatexCompiler {
    pub fn new(backend: CompilerBackend, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            backend: config.compiler.clone(),
            timeout: config.compile_timeout(),
            scratch_root: config.scratch_root.clone(),
        }
    }

    pub fn backend(&self) -> &CompilerBackend {
        &self.backend
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("latex-");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    /// Program and arguments for one compile of `<scratch>/content/doc.tex`
    /// into `<scratch>/output/`.
    pub fn command_line(&self, scratch: &Path) -> (OsString, Vec<OsString>) {
        let content_dir = scratch.join(CONTENT_DIR);
        let output_dir = scratch.join(OUTPUT_DIR);
        match &self.backend {
            CompilerBackend::Local { program } => {
                let mut output_arg = OsString::from("-output-directory=");
                output_arg.push(output_dir.as_os_str());
                let args = vec![
                    OsString::from("-interaction=nonstopmode"),
                    OsString::from("-halt-on-error"),
                    output_arg,
                    OsString::from(format!("-jobname={JOB_NAME}")),
                    content_dir.join(TEX_FILE).into_os_string(),
                ];
                (OsString::from(program), args)
            }
            CompilerBackend::Container { runtime, image } => {
                let mounts = [
                    MountSpec::read_only(&content_dir, CONTAINER_CONTENT_DIR),
                    MountSpec::read_write(&output_dir, CONTAINER_OUTPUT_DIR),
                ];
                let mut args = vec![
                    OsString::from("run"),
                    OsString::from("--rm"),
                    OsString::from("--name"),
                    container_name(scratch),
                ];
                for mount in &mounts {
                    args.push(OsString::from("-v"));
                    args.push(mount.volume_arg());
                }
                args.push(OsString::from(image));
                (OsString::from(runtime), args)
            }
        }
    }

    async fn compile_in(&self, scratch: &Path, document: &str) -> Result<Vec<u8>, CompileError> {
        let content_dir = scratch.join(CONTENT_DIR);
        let output_dir = scratch.join(OUTPUT_DIR);
        for dir in [&content_dir, &output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CompileError::write_failed(format!("{}: {e}", dir.display())))?;
        }

        let tex_path = content_dir.join(TEX_FILE);
        tokio::fs::write(&tex_path, document)
            .await
            .map_err(|e| CompileError::write_failed(format!("{}: {e}", tex_path.display())))?;
        let written = tokio::fs::read_to_string(&tex_path)
            .await
            .map_err(|e| CompileError::write_failed(format!("{}: {e}", tex_path.display())))?;
        if written.is_empty() {
            return Err(CompileError::write_failed(format!(
                "{} is empty after writing",
                tex_path.display()
            )));
        }

        let (program, args) = self.command_line(scratch);
        debug!("Running {:?} {:?}", program, args);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                if let CompilerBackend::Container { runtime, .. } = &self.backend {
                    stop_container(runtime, &container_name(scratch)).await;
                }
                let log = self.read_log(&output_dir).await;
                return Err(CompileError::invocation_failed(
                    format!("compiler timed out after {}s", self.timeout.as_secs()),
                    log,
                ));
            }
            Ok(Err(e)) => {
                let log = self.read_log(&output_dir).await;
                return Err(CompileError::invocation_failed(
                    format!("failed to start {}: {e}", program.to_string_lossy()),
                    log,
                ));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let log = self.read_log(&output_dir).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match stderr.trim() {
                "" => format!("compiler exited with {}", output.status),
                tail => format!("compiler exited with {}: {}", output.status, last_lines(tail, 5)),
            };
            return Err(CompileError::invocation_failed(detail, log));
        }

        match tokio::fs::read(output_dir.join(PDF_FILE)).await {
            Ok(pdf) if !pdf.is_empty() => {
                info!("Compiled {} bytes of PDF in {:?}", pdf.len(), start.elapsed());
                Ok(pdf)
            }
            _ => Err(CompileError::missing_output(self.read_log(&output_dir).await)),
        }
    }

    async fn read_log(&self, output_dir: &Path) -> Option<String> {
        let path = output_dir.join(self.backend.log_file_name());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                debug!("No compiler log at {}: {e}", path.display());
                None
            }
        }
    }
}

#[async_trait]
impl PdfCompiler for LatexCompiler {
    async fn compile(&self, document: &str) -> Result<Vec<u8>, CompileError> {
        let scratch = self
            .scratch_dir()
            .map_err(|e| CompileError::write_failed(format!("cannot create scratch directory: {e}")))?;
        // Container runtimes reject relative bind-mount sources.
        let root = std::path::absolute(scratch.path()).unwrap_or_else(|_| scratch.path().to_path_buf());

        let result = self.compile_in(&root, document).await;

        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory {}: {e}", path.display());
        }
        result
    }
}

fn container_name(scratch: &Path) -> OsString {
    scratch
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("latex-compile"))
}

/// Kill and remove a named container. Killing the runtime client does not
/// stop the container it started.
async fn stop_container(runtime: &str, name: &OsStr) {
    for verb in [&["kill"][..], &["rm", "-f"][..]] {
        let mut cmd = Command::new(runtime);
        cmd.args(verb)
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let action = verb.join(" ");
        match tokio::time::timeout(CONTAINER_STOP_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => debug!("{runtime} {action} {name:?}: {status}"),
            Ok(Err(e)) => warn!("Could not run {runtime} {action} {name:?}: {e}"),
            Err(_) => warn!("{runtime} {action} {name:?} did not finish in {CONTAINER_STOP_TIMEOUT:?}"),
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
