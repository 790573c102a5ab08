//! Docker adapter: no pod concept.
//!
//! Docker cannot share a network namespace across a named group the way
//! podman pods do, so every container runs with `--network host` and a group
//! is purely a naming convention: the containers whose names start with
//! `<group>-`. Cross-container traffic goes over host loopback, which is why
//! service configs address each other as `127.0.0.1:<host port>`.

use std::collections::BTreeMap;
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
pub struct DockerRuntime {
    cli: EngineCli,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self {
            cli: EngineCli::new("docker"),
        }
    }

    /// All containers belonging to a group, running or not.
    async fn group_members(&self, group: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filter = format!("name={group}-");
        let out = self
            .cli
            .run(&["ps", "--all", "--filter", &filter, "--format", "{{json .}}"])
            .await?;
        parse_ps_lines(&out)
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// One line of `docker ps --format '{{json .}}'` output.
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
}

fn parse_ps_lines(out: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
    let mut containers = Vec::new();
    for line in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let row: PsLine = serde_json::from_str(line).map_err(|err| {
            RuntimeError::CommandFailed(format!("unparseable container listing: {err}"))
        })?;
        containers.push(ContainerSummary {
            name: row.names,
            running: row.state == "running",
        });
    }
    Ok(containers)
}

/// Group a container belongs to under the naming convention: everything
/// before the last `-`. A name with no `-` is its own group.
fn group_of(container: &str) -> &str {
    match container.rsplit_once('-') {
        Some((prefix, _)) => prefix,
        None => container,
    }
}

/// Fold a flat container listing into per-group state. A group counts as
/// running when any member is.
fn fold_groups(containers: Vec<ContainerSummary>) -> Vec<GroupState> {
    let mut groups: BTreeMap<String, GroupState> = BTreeMap::new();
    for container in containers {
        let group = group_of(&container.name).to_string();
        let entry = groups.entry(group.clone()).or_insert_with(|| GroupState {
            name: group,
            running: false,
            ports: Vec::new(),
            containers: Vec::new(),
        });
        entry.running |= container.running;
        entry.containers.push(container.name);
    }
    groups.into_values().collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn check_available(&self) -> Result<(), RuntimeError> {
        match self
            .cli
            .run(&["info", "--format", "{{.ServerVersion}}"])
            .await
        {
            Ok(_) => Ok(()),
            Err(RuntimeError::Unavailable(detail)) => Err(RuntimeError::Unavailable(detail)),
            Err(err) => Err(RuntimeError::Unavailable(err.to_string())),
        }
    }

    async fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        if self.cli.probe(&["volume", "inspect", name]).await? {
            return Ok(false);
        }
        self.cli.run(&["volume", "create", name]).await?;
        Ok(true)
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.cli.probe(&["volume", "inspect", name]).await
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
        self.cli.probe(&["image", "inspect", image]).await
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

    /// No group primitive exists on docker; the name prefix is the group.
    async fn ensure_group(
        &self,
        _name: &str,
        _ports: &[PortMapping],
        _options: &GroupOptions,
    ) -> Result<bool, RuntimeError> {
        Ok(false)
    }

    async fn group_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(!self.group_members(name).await?.is_empty())
    }

    async fn stop_group(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let members = self.group_members(name).await?;
        if members.is_empty() {
            return Err(RuntimeError::NotFound {
                kind: "group",
                name: name.to_string(),
            });
        }
        let timeout = grace.as_secs().to_string();
        for member in &members {
            self.cli
                .run(&["stop", "-t", &timeout, &member.name])
                .await?;
        }
        Ok(())
    }

    async fn remove_group(&self, name: &str) -> Result<(), RuntimeError> {
        for member in self.group_members(name).await? {
            match self.cli.run(&["rm", "--force", &member.name]).await {
                Ok(_) => {}
                Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Ports stay empty here: host networking publishes nothing through the
    /// engine, so the spec's declared ports are the source of truth.
    async fn group_status(&self) -> Result<Vec<GroupState>, RuntimeError> {
        let out = self
            .cli
            .run(&["ps", "--all", "--format", "{{json .}}"])
            .await?;
        Ok(fold_groups(parse_ps_lines(&out)?))
    }

    async fn inspect_group(&self, name: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        self.inspect_container(&format!("{name}-0")).await
    }

    async fn run_container(&self, request: &ContainerRequest) -> Result<(), RuntimeError> {
        if self.cli.probe(&["container", "inspect", &request.name]).await? {
            let _ = self.cli.run(&["rm", "--force", &request.name]).await;
        }

        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            request.name.clone(),
            "--network".into(),
            "host".into(),
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
        self.cli.probe(&["container", "inspect", name]).await
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
            Ok(out) => {
                let value: Option<serde_json::Value> = serde_json::from_str(&out).ok();
                Ok(value.and_then(|v| match v {
                    serde_json::Value::Array(mut items) => {
                        if items.is_empty() {
                            None
                        } else {
                            Some(items.swap_remove(0))
                        }
                    }
                    other => Some(other),
                }))
            }
            Err(RuntimeError::CommandFailed(detail)) if is_not_found(&detail) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_containers(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filter = name_filter.map(|name| format!("name={name}"));
        let mut args = vec!["ps", "--all", "--format", "{{json .}}"];
        if let Some(filter) = &filter {
            args.push("--filter");
            args.push(filter);
        }
        let out = self.cli.run(&args).await?;
        parse_ps_lines(&out)
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
    fn parses_json_lines() {
        let out = concat!(
            r#"{"Names": "ollama-0", "State": "running", "Status": "Up 2 minutes"}"#,
            "\n",
            r#"{"Names": "open-webui-0", "State": "exited", "Status": "Exited (0) 1 hour ago"}"#,
            "\n",
        );
        let containers = parse_ps_lines(out).unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].running);
        assert_eq!(containers[1].name, "open-webui-0");
        assert!(!containers[1].running);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_ps_lines("\n\n").unwrap().is_empty());
    }

    #[test]
    fn derives_group_from_name_prefix() {
        assert_eq!(group_of("ollama-0"), "ollama");
        assert_eq!(group_of("open-webui-0"), "open-webui");
        assert_eq!(group_of("standalone"), "standalone");
    }

    #[test]
    fn folds_containers_into_groups() {
        let groups = fold_groups(vec![
            ContainerSummary {
                name: "ollama-0".into(),
                running: true,
            },
            ContainerSummary {
                name: "open-webui-0".into(),
                running: false,
            },
        ]);
        assert_eq!(groups.len(), 2);
        let ollama = groups.iter().find(|g| g.name == "ollama").unwrap();
        assert!(ollama.running);
        assert_eq!(ollama.containers, vec!["ollama-0"]);
        let webui = groups.iter().find(|g| g.name == "open-webui").unwrap();
        assert!(!webui.running);
    }

    #[test]
    fn group_running_when_any_member_runs() {
        let groups = fold_groups(vec![
            ContainerSummary {
                name: "comfyui-0".into(),
                running: false,
            },
            ContainerSummary {
                name: "comfyui-1".into(),
                running: true,
            },
        ]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].running);
    }
}
