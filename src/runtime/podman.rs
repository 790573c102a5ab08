//! Podman adapter: the pod-capable engine.
//!
//! Groups are real podman pods sharing a network namespace; published ports
//! live on the pod's infra container, so member containers reach each other
//! over localhost inside the pod.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RuntimeError;
use crate::spec::PortMapping;

use super::exec::{is_not_found, EngineCli, ExecOutput, PULL_TIMEOUT};
use super::{
    ContainerRequest, ContainerRuntime, ContainerSummary, GroupOptions, GroupState, LogOptions,
    LogStream, RuntimeKind, VOLUME_PREFIX,
};

#[derive(Debug)]
pub struct PodmanRuntime {
    cli: EngineCli,
}

impl PodmanRuntime {
    pub fn new() -> Self {
        Self {
            cli: EngineCli::new("podman"),
        }
    }
}

impl Default for PodmanRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PodRow {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Containers", default)]
    containers: Vec<PodContainer>,
}

#[derive(Debug, Deserialize)]
struct PodContainer {
    #[serde(rename = "Names", default)]
    names: String,
}

#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "State", default)]
    state: String,
}

/// Parse `podman pod ps --format json` output. Ports are filled in later
/// from pod inspection.
fn parse_pod_rows(json: &str) -> Result<Vec<GroupState>, RuntimeError> {
    let rows: Vec<PodRow> = serde_json::from_str(json)
        .map_err(|err| RuntimeError::CommandFailed(format!("unparseable pod listing: {err}")))?;
    Ok(rows
        .into_iter()
        .map(|row| GroupState {
            running: row.status == "Running",
            name: row.name,
            ports: Vec::new(),
            containers: row.containers.into_iter().map(|c| c.names).collect(),
        })
        .collect())
}

fn parse_ps_rows(json: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
    let rows: Vec<PsRow> = serde_json::from_str(json).map_err(|err| {
        RuntimeError::CommandFailed(format!("unparseable container listing: {err}"))
    })?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            row.names.into_iter().next().map(|name| ContainerSummary {
                name,
                running: row.state == "running",
            })
        })
        .collect())
}

/// Extract human-readable port bindings from a pod's infra config.
fn infra_port_bindings(inspect: &serde_json::Value) -> Vec<String> {
    let mut ports = Vec::new();
    if let Some(bindings) = inspect
        .pointer("/InfraConfig/PortBindings")
        .and_then(|v| v.as_object())
    {
        for (container_port, binds) in bindings {
            let Some(binds) = binds.as_array() else {
                continue;
            };
            for bind in binds {
                let host_ip = bind
                    .get("HostIp")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .unwrap_or("0.0.0.0");
                let host_port = bind.get("HostPort").and_then(|v| v.as_str()).unwrap_or("");
                ports.push(format!("{host_ip}:{host_port}->{container_port}"));
            }
        }
    }
    ports
}

fn first_of_array(value: serde_json::Value) -> Option<serde_json::Value> {
    match value {
        serde_json::Value::Array(mut items) => {
            if items.is_empty() {
                None
            } else {
                Some(items.swap_remove(0))
            }
        }
        other => Some(other),
    }
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    fn name(&self) -> &'static str {
        "podman"
    }

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Podman
    }

    async fn check_available(&self) -> Result<(), RuntimeError> {
        match self.cli.run(&["info", "--format", "{{.Host.Arch}}"]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::Unavailable(detail)) => Err(RuntimeError::Unavailable(detail)),
            Err(err) => Err(RuntimeError::Unavailable(err.to_string())),
        }
    }

    async fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        if self.cli.probe(&["volume", "exists", name]).await? {
            return Ok(false);
        }
        self.cli.run(&["volume", "create", name]).await?;
        Ok(true)
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.cli.probe(&["volume", "exists", name]).await
    }

    async fn list_volumes(&self) -> Result<Vec<String>, RuntimeError> {
        let out = self
            .cli
            .run(&["volume", "ls", "--format", "{{.Name}}"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with(VOLUME_PREFIX))
            .map(String::from)
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        match self.cli.run(&["volume", "rm", "--force", name]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn pull_image(&self, image: &str, force_refresh: bool) -> Result<(), RuntimeError> {
        if !force_refresh && self.image_exists(image).await? {
            return Ok(());
        }
        match self.cli.run_with_timeout(&["pull", image], PULL_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::Unavailable(detail)) => Err(RuntimeError::Unavailable(detail)),
            Err(err) => Err(RuntimeError::ImagePull {
                image: image.to_string(),
                detail: err.to_string(),
            }),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.cli.probe(&["image", "exists", image]).await
    }

    async fn image_size(&self, image: &str) -> Result<Option<u64>, RuntimeError> {
        match self
            .cli
            .run(&["image", "inspect", image, "--format", "{{.Size}}"])
            .await
        {
            Ok(out) => Ok(out.trim().parse::<u64>().ok()),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.cli.run(&["rmi", "--force", image]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn ensure_group(
        &self,
        name: &str,
        ports: &[PortMapping],
        options: &GroupOptions,
    ) -> Result<bool, RuntimeError> {
        if self.cli.probe(&["pod", "exists", name]).await? {
            return Ok(false);
        }

        let mut args: Vec<String> = vec!["pod".into(), "create".into(), "--name".into(), name.into()];
        for port in ports {
            args.push("-p".into());
            args.push(format!("{}:{}", port.host, port.container));
        }
        if let Some(userns) = &options.userns {
            args.push("--userns".into());
            args.push(userns.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.cli.run(&arg_refs).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::Unavailable(detail)) => Err(RuntimeError::Unavailable(detail)),
            Err(err) => Err(RuntimeError::GroupCreate {
                group: name.to_string(),
                detail: err.to_string(),
            }),
        }
    }

    async fn group_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.cli.probe(&["pod", "exists", name]).await
    }

    async fn stop_group(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let timeout = grace.as_secs().to_string();
        match self.cli.run(&["pod", "stop", "-t", &timeout, name]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => {
                Err(RuntimeError::NotFound {
                    kind: "pod",
                    name: name.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn remove_group(&self, name: &str) -> Result<(), RuntimeError> {
        match self.cli.run(&["pod", "rm", "--force", name]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn group_status(&self) -> Result<Vec<GroupState>, RuntimeError> {
        let out = self.cli.run(&["pod", "ps", "--format", "json"]).await?;
        let mut groups = parse_pod_rows(&out)?;
        for group in &mut groups {
            if let Some(inspect) = self.inspect_group(&group.name).await? {
                group.ports = infra_port_bindings(&inspect);
            }
        }
        Ok(groups)
    }

    async fn inspect_group(&self, name: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        match self.cli.run(&["pod", "inspect", name]).await {
            Ok(out) => Ok(serde_json::from_str(&out).ok().and_then(first_of_array)),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn run_container(&self, request: &ContainerRequest) -> Result<(), RuntimeError> {
        // Replace stopped leftovers under the same name; the orchestration
        // engine has already decided a running container should be kept.
        if self.cli.probe(&["container", "exists", &request.name]).await? {
            let _ = self
                .cli
                .run(&["container", "rm", "--force", &request.name])
                .await;
        }

        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            request.name.clone(),
            "--pod".into(),
            request.group.clone(),
            "--restart".into(),
            request.restart_policy.clone(),
            "--pids-limit".into(),
            request.pids_limit.to_string(),
        ];
        for (key, value) in &request.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        for mount in &request.volumes {
            args.push("-v".into());
            args.push(format!("{}:{}", mount.source, mount.target));
        }
        if let Some(flags) = &request.gpu_flags {
            args.extend(flags.split_whitespace().map(String::from));
        }
        args.push(request.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.cli.run(&arg_refs).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::Unavailable(detail)) => Err(RuntimeError::Unavailable(detail)),
            Err(err) => Err(RuntimeError::ContainerStart {
                container: request.name.clone(),
                detail: err.to_string(),
            }),
        }
    }

    async fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.cli.probe(&["container", "exists", name]).await
    }

    async fn container_running(&self, name: &str) -> Result<bool, RuntimeError> {
        match self
            .cli
            .run(&["container", "inspect", name, "--format", "{{.State.Running}}"])
            .await
        {
            Ok(out) => Ok(out.trim() == "true"),
            Err(RuntimeError::CommandFailed(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<Option<serde_json::Value>, RuntimeError> {
        match self.cli.run(&["container", "inspect", name]).await {
            Ok(out) => Ok(serde_json::from_str(&out).ok().and_then(first_of_array)),
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_containers(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filter = name_filter.map(|name| format!("name={name}"));
        let mut args = vec!["ps", "--all", "--format", "json"];
        if let Some(filter) = &filter {
            args.push("--filter");
            args.push(filter);
        }
        let out = self.cli.run(&args).await?;
        parse_ps_rows(&out)
    }

    async fn logs(
        &self,
        container: &str,
        options: &LogOptions,
    ) -> Result<LogStream, RuntimeError> {
        let tail;
        let mut args = vec!["logs"];
        if options.follow {
            args.push("--follow");
        }
        if let Some(lines) = options.tail {
            tail = lines.to_string();
            args.push("--tail");
            args.push(&tail);
        }
        if let Some(since) = &options.since {
            args.push("--since");
            args.push(since);
        }
        args.push(container);
        let child = self.cli.spawn_streaming(&args)?;
        Ok(LogStream::from_child(child))
    }

    async fn exec_in_container(
        &self,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        let mut args = vec!["exec", container];
        args.extend(command.iter().map(String::as_str));
        self.cli.run_capture(&args, Duration::from_secs(300)).await
    }

    async fn copy_to_container(
        &self,
        source: &Path,
        container: &str,
        dest: &str,
    ) -> Result<(), RuntimeError> {
        let src = source.to_string_lossy();
        let target = format!("{container}:{dest}");
        self.cli.run(&["cp", &src, &target]).await?;
        Ok(())
    }

    async fn copy_from_container(
        &self,
        container: &str,
        source: &str,
        dest: &Path,
    ) -> Result<(), RuntimeError> {
        let src = format!("{container}:{source}");
        let target = dest.to_string_lossy();
        self.cli.run(&["cp", &src, &target]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pod_listing() {
        let json = r#"[
            {"Name": "ollama", "Status": "Running",
             "Containers": [{"Names": "ollama-infra"}, {"Names": "ollama-0"}]},
            {"Name": "comfyui", "Status": "Exited", "Containers": []}
        ]"#;
        let groups = parse_pod_rows(json).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].running);
        assert_eq!(groups[0].containers, vec!["ollama-infra", "ollama-0"]);
        assert!(!groups[1].running);
    }

    #[test]
    fn parses_container_listing() {
        let json = r#"[
            {"Names": ["ollama-0"], "State": "running"},
            {"Names": ["comfyui-0"], "State": "exited"}
        ]"#;
        let containers = parse_ps_rows(json).unwrap();
        assert_eq!(containers[0].name, "ollama-0");
        assert!(containers[0].running);
        assert!(!containers[1].running);
    }

    #[test]
    fn extracts_infra_port_bindings() {
        let inspect: serde_json::Value = serde_json::from_str(
            r#"{"InfraConfig": {"PortBindings": {
                "11434/tcp": [{"HostIp": "", "HostPort": "11434"}]
            }}}"#,
        )
        .unwrap();
        let ports = infra_port_bindings(&inspect);
        assert_eq!(ports, vec!["0.0.0.0:11434->11434/tcp"]);
    }

    #[test]
    fn missing_infra_config_yields_no_ports() {
        let inspect = serde_json::json!({"Name": "ollama"});
        assert!(infra_port_bindings(&inspect).is_empty());
    }
}
