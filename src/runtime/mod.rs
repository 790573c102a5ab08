//! Container engine abstraction.
//!
//! One capability trait, two engines. [`PodmanRuntime`] creates real pods
//! with a shared network namespace; [`DockerRuntime`] has no pod concept, so
//! it binds every container to the host network and treats the group purely
//! as a naming convention (`<group>-` prefix). The two are interchangeable
//! for every operation except grouping: on docker, cross-container
//! addressing must go through host loopback.

mod docker;
mod exec;
mod podman;

pub use docker::DockerRuntime;
pub use exec::ExecOutput;
pub use podman::PodmanRuntime;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout};

use crate::error::{ConfigError, Error, Result, RuntimeError};
use crate::spec::{PortMapping, VolumeMount};

/// Prefix for volumes owned by this tool; `list_volumes` only reports these.
pub const VOLUME_PREFIX: &str = "podstack_";

/// Which engine an adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Podman,
    Docker,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Podman => write!(f, "podman"),
            RuntimeKind::Docker => write!(f, "docker"),
        }
    }
}

/// Options for group creation.
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    /// User namespace mode (`--userns`), when configured.
    pub userns: Option<String>,
}

/// Everything needed to run one container.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub group: String,
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub env: BTreeMap<String, String>,
    /// Resolved GPU device flags, split on whitespace when applied.
    pub gpu_flags: Option<String>,
    pub pids_limit: u32,
    pub restart_policy: String,
}

/// One group as reported by `group_status`.
#[derive(Debug, Clone)]
pub struct GroupState {
    pub name: String,
    pub running: bool,
    pub ports: Vec<String>,
    pub containers: Vec<String>,
}

/// One container as reported by `list_containers`.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub name: String,
    pub running: bool,
}

/// Options for log streaming.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub follow: bool,
    pub tail: Option<u32>,
    /// Passed through to the engine verbatim (e.g. "10m", "1h").
    pub since: Option<String>,
}

/// Lazy stream of log lines from an engine `logs` subprocess.
///
/// Engines mirror the container's stdout/stderr split, so both pipes are
/// read; the stream ends when both are exhausted (never, under `follow`).
/// Dropping the stream kills the subprocess.
pub struct LogStream {
    _child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

impl LogStream {
    pub(crate) fn from_child(mut child: Child) -> Self {
        let stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
        let stderr = child.stderr.take().map(|err| BufReader::new(err).lines());
        Self {
            _child: child,
            stdout,
            stderr,
        }
    }

    /// Next log line from either pipe, or `None` once both are closed.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        enum Pipe {
            Out(Option<String>),
            Err(Option<String>),
        }

        loop {
            let event = match (self.stdout.as_mut(), self.stderr.as_mut()) {
                (Some(out), Some(err)) => tokio::select! {
                    line = out.next_line() => Pipe::Out(line?),
                    line = err.next_line() => Pipe::Err(line?),
                },
                (Some(out), None) => Pipe::Out(out.next_line().await?),
                (None, Some(err)) => Pipe::Err(err.next_line().await?),
                (None, None) => return Ok(None),
            };
            match event {
                Pipe::Out(Some(line)) | Pipe::Err(Some(line)) => return Ok(Some(line)),
                Pipe::Out(None) => self.stdout = None,
                Pipe::Err(None) => self.stderr = None,
            }
        }
    }
}

/// Capability interface every container engine adapter implements.
///
/// Every `ensure_*` operation is idempotent and reports whether it newly
/// created the resource. Adapters never retry; failures are classified into
/// [`RuntimeError`] and surfaced as-is.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn kind(&self) -> RuntimeKind;

    /// Surface "engine missing or unreachable" before any other operation.
    async fn check_available(&self) -> std::result::Result<(), RuntimeError>;

    async fn ensure_volume(&self, name: &str) -> std::result::Result<bool, RuntimeError>;
    async fn volume_exists(&self, name: &str) -> std::result::Result<bool, RuntimeError>;
    async fn list_volumes(&self) -> std::result::Result<Vec<String>, RuntimeError>;
    async fn remove_volume(&self, name: &str) -> std::result::Result<(), RuntimeError>;

    async fn pull_image(
        &self,
        image: &str,
        force_refresh: bool,
    ) -> std::result::Result<(), RuntimeError>;
    async fn image_exists(&self, image: &str) -> std::result::Result<bool, RuntimeError>;
    async fn image_size(&self, image: &str) -> std::result::Result<Option<u64>, RuntimeError>;
    async fn remove_image(&self, image: &str) -> std::result::Result<(), RuntimeError>;

    async fn ensure_group(
        &self,
        name: &str,
        ports: &[PortMapping],
        options: &GroupOptions,
    ) -> std::result::Result<bool, RuntimeError>;
    async fn group_exists(&self, name: &str) -> std::result::Result<bool, RuntimeError>;
    async fn stop_group(
        &self,
        name: &str,
        grace: Duration,
    ) -> std::result::Result<(), RuntimeError>;
    async fn remove_group(&self, name: &str) -> std::result::Result<(), RuntimeError>;
    async fn group_status(&self) -> std::result::Result<Vec<GroupState>, RuntimeError>;
    async fn inspect_group(
        &self,
        name: &str,
    ) -> std::result::Result<Option<serde_json::Value>, RuntimeError>;

    async fn run_container(
        &self,
        request: &ContainerRequest,
    ) -> std::result::Result<(), RuntimeError>;
    async fn container_exists(&self, name: &str) -> std::result::Result<bool, RuntimeError>;
    async fn container_running(&self, name: &str) -> std::result::Result<bool, RuntimeError>;
    async fn inspect_container(
        &self,
        name: &str,
    ) -> std::result::Result<Option<serde_json::Value>, RuntimeError>;
    async fn list_containers(
        &self,
        name_filter: Option<&str>,
    ) -> std::result::Result<Vec<ContainerSummary>, RuntimeError>;

    async fn logs(
        &self,
        container: &str,
        options: &LogOptions,
    ) -> std::result::Result<LogStream, RuntimeError>;
    async fn exec_in_container(
        &self,
        container: &str,
        command: &[String],
    ) -> std::result::Result<ExecOutput, RuntimeError>;
    async fn copy_to_container(
        &self,
        source: &Path,
        container: &str,
        dest: &str,
    ) -> std::result::Result<(), RuntimeError>;
    async fn copy_from_container(
        &self,
        container: &str,
        source: &str,
        dest: &Path,
    ) -> std::result::Result<(), RuntimeError>;
}

/// Select the adapter for the configured preference, once per invocation.
pub fn runtime_for(prefer: &str) -> Result<Arc<dyn ContainerRuntime>> {
    match prefer {
        "auto" | "podman" => Ok(Arc::new(PodmanRuntime::new())),
        "docker" => Ok(Arc::new(DockerRuntime::new())),
        other => Err(Error::Config(ConfigError::InvalidValue {
            field: "runtime.prefer",
            reason: format!("unknown runtime '{other}' (expected auto, podman, or docker)"),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_podman_for_auto() {
        let runtime = runtime_for("auto").unwrap();
        assert_eq!(runtime.kind(), RuntimeKind::Podman);
    }

    #[test]
    fn factory_selects_docker_when_asked() {
        let runtime = runtime_for("docker").unwrap();
        assert_eq!(runtime.kind(), RuntimeKind::Docker);
        assert_eq!(runtime.name(), "docker");
    }

    #[test]
    fn factory_rejects_unknown_engine() {
        let err = runtime_for("rkt").unwrap_err();
        assert!(err.to_string().contains("unknown runtime 'rkt'"));
    }
}
