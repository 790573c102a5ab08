//! Shared subprocess plumbing for engine adapters.
//!
//! Every engine call funnels through [`EngineCli`] so output capture,
//! deadlines, and failure classification live in one place. Nothing here
//! retries.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

use crate::error::RuntimeError;

/// Default deadline for ordinary engine commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Image pulls stream gigabytes; give them a much longer leash.
pub(crate) const PULL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Captured result of `exec_in_container`.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Thin wrapper over one engine binary (`podman` or `docker`).
#[derive(Debug)]
pub(crate) struct EngineCli {
    program: &'static str,
}

impl EngineCli {
    pub(crate) fn new(program: &'static str) -> Self {
        Self { program }
    }

    /// Run a command, returning captured stdout on success.
    pub(crate) async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        self.run_with_timeout(args, COMMAND_TIMEOUT).await
    }

    pub(crate) async fn run_with_timeout(
        &self,
        args: &[&str],
        limit: Duration,
    ) -> Result<String, RuntimeError> {
        trace!(program = self.program, ?args, "engine command");
        let output = self.output(args, limit).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(classify(self.program, &detail))
        }
    }

    /// Exit-status probe for `exists`-style commands: exit 0 maps to `true`,
    /// nonzero to `false`, unless stderr points at a broken engine.
    pub(crate) async fn probe(&self, args: &[&str]) -> Result<bool, RuntimeError> {
        let output = self.output(args, COMMAND_TIMEOUT).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        match classify(self.program, stderr.trim()) {
            RuntimeError::Unavailable(detail) => Err(RuntimeError::Unavailable(detail)),
            RuntimeError::PermissionDenied(detail) => Err(RuntimeError::PermissionDenied(detail)),
            _ => Ok(false),
        }
    }

    /// Run a command inside-container style: capture both streams and the
    /// exit code without treating nonzero exit as an engine failure.
    pub(crate) async fn run_capture(
        &self,
        args: &[&str],
        limit: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        let output = self.output(args, limit).await?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Spawn a long-lived streaming command (logs) with piped output.
    pub(crate) fn spawn_streaming(
        &self,
        args: &[&str],
    ) -> Result<tokio::process::Child, RuntimeError> {
        Command::new(self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(self.program, err))
    }

    async fn output(
        &self,
        args: &[&str],
        limit: Duration,
    ) -> Result<std::process::Output, RuntimeError> {
        let mut command = Command::new(self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(limit, command.output()).await {
            Err(_) => Err(RuntimeError::Timeout(limit)),
            Ok(Err(err)) => Err(spawn_error(self.program, err)),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> RuntimeError {
    if err.kind() == std::io::ErrorKind::NotFound {
        RuntimeError::Unavailable(format!("{program} not found on PATH"))
    } else {
        RuntimeError::Io(err)
    }
}

/// Classify engine stderr into the runtime error taxonomy.
pub(crate) fn classify(program: &str, detail: &str) -> RuntimeError {
    let lower = detail.to_lowercase();
    if lower.contains("permission denied") {
        return RuntimeError::PermissionDenied(detail.to_string());
    }
    if lower.contains("cannot connect")
        || lower.contains("connection refused")
        || lower.contains("is the docker daemon running")
        || (lower.contains(".sock") && lower.contains("no such file"))
    {
        return RuntimeError::Unavailable(format!("{program} daemon unreachable: {detail}"));
    }
    RuntimeError::CommandFailed(detail.to_string())
}

/// Whether an engine error message means "the resource does not exist".
pub(crate) fn is_not_found(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("no such") || lower.contains("not found") || lower.contains("does not exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_denied() {
        let err = classify("podman", "Error: permission denied while connecting");
        assert!(matches!(err, RuntimeError::PermissionDenied(_)));
    }

    #[test]
    fn classifies_unreachable_daemon() {
        let err = classify(
            "docker",
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
        );
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }

    #[test]
    fn other_failures_are_command_failures() {
        let err = classify("podman", "Error: something else entirely");
        assert!(matches!(err, RuntimeError::CommandFailed(_)));
    }

    #[test]
    fn detects_not_found_phrasing() {
        assert!(is_not_found("Error: no such pod ollama"));
        assert!(is_not_found("Error: volume podstack_x not found"));
        assert!(!is_not_found("Error: invalid argument"));
    }
}
