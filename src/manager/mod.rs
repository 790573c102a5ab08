//! Orchestration engine: brings services up, polls them healthy, stops and
//! cleans them.
//!
//! One [`ServiceManager`] drives everything through the engine-agnostic
//! [`ContainerRuntime`] trait. Failures are isolated per service: one
//! service failing a step never prevents the others from starting, and one
//! shared polling loop waits on all started services together so slow
//! services overlap instead of serializing.

mod clock;
mod health;

pub use clock::{Clock, SystemClock};
pub use health::{HealthProbe, ProbeOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{Error, Result, RuntimeError};
use crate::gpu::GpuResolver;
use crate::runtime::{ContainerRequest, ContainerRuntime, GroupOptions, LogOptions, LogStream};
use crate::secrets::SecretSource;
use crate::spec::ServiceSpec;

/// Environment variable the session secret is injected under.
pub const SECRET_ENV_KEY: &str = "WEBUI_SECRET_KEY";

/// Name of the persisted secret in the secret store.
const SECRET_NAME: &str = "webui_secret_key";

/// Knobs the manager needs from resolved settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
    pub restart_policy: String,
    pub pids_limit: u32,
    /// "auto" for detection, "none" to disable, anything else verbatim.
    pub gpu_device_flag: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Skip GPU flags even for services that want them.
    pub force_cpu: bool,
    /// Pull images even when present locally.
    pub refresh_images: bool,
}

/// Which bring-up step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    Volumes,
    Image,
    Secret,
    Group,
    Container,
}

impl std::fmt::Display for StartStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            StartStep::Volumes => "volumes",
            StartStep::Image => "image",
            StartStep::Secret => "secret",
            StartStep::Group => "group",
            StartStep::Container => "container",
        };
        f.write_str(step)
    }
}

/// Final state of one service after a start invocation.
#[derive(Debug)]
pub enum ServiceResult {
    /// Running, no health check declared.
    Ready,
    /// Health check passed with this status code.
    Healthy(u16),
    /// Started but the health check did not pass before the deadline.
    TimedOut,
    /// Awaiting its first successful probe; only seen mid-poll.
    Pending,
    /// A bring-up step failed; later steps were not attempted.
    Failed { step: StartStep, error: Error },
}

#[derive(Debug)]
pub struct ServiceReport {
    pub service: String,
    pub result: ServiceResult,
    pub notes: Vec<String>,
}

#[derive(Debug)]
pub struct StartReport {
    pub services: Vec<ServiceReport>,
}

impl StartReport {
    pub fn failed_count(&self) -> usize {
        self.services
            .iter()
            .filter(|r| {
                matches!(
                    r.result,
                    ServiceResult::Failed { .. } | ServiceResult::TimedOut
                )
            })
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }
}

#[derive(Debug)]
pub enum StopOutcome {
    Stopped { removed: bool },
    NotRunning,
    Failed(Error),
}

#[derive(Debug)]
pub struct StopReport {
    pub service: String,
    pub outcome: StopOutcome,
}

/// Health column of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSummary {
    NotConfigured,
    NotRunning,
    Healthy(u16),
    Unhealthy(String),
}

#[derive(Debug)]
pub struct ServiceState {
    pub service: String,
    pub present: bool,
    pub running: bool,
    pub ports: Vec<String>,
    pub health: HealthSummary,
}

#[derive(Debug)]
pub struct CleanReport {
    pub services: Vec<StopReport>,
    pub removed_volumes: Vec<String>,
}

struct StepFailure {
    step: StartStep,
    error: Error,
}

fn fail(step: StartStep) -> impl FnOnce(RuntimeError) -> StepFailure {
    move |error| StepFailure {
        step,
        error: error.into(),
    }
}

pub struct ServiceManager {
    runtime: Arc<dyn ContainerRuntime>,
    probe: HealthProbe,
    clock: Arc<dyn Clock>,
    secrets: Arc<dyn SecretSource>,
    gpu: Arc<dyn GpuResolver>,
    config: ManagerConfig,
    /// GPU flags are resolved at most once per invocation.
    gpu_flag: OnceCell<Option<String>>,
}

impl ServiceManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: HealthProbe,
        clock: Arc<dyn Clock>,
        secrets: Arc<dyn SecretSource>,
        gpu: Arc<dyn GpuResolver>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            runtime,
            probe,
            clock,
            secrets,
            gpu,
            config,
            gpu_flag: OnceCell::new(),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Fail fast when the configured engine is missing or unreachable.
    pub async fn ensure_runtime(&self) -> Result<()> {
        self.runtime.check_available().await?;
        info!(engine = self.runtime.name(), "container engine available");
        Ok(())
    }

    /// Start the given services, then poll them healthy under one shared
    /// deadline. Every service gets a report; none is skipped because a
    /// sibling failed.
    pub async fn start(
        &self,
        specs: &[&ServiceSpec],
        options: &StartOptions,
    ) -> Result<StartReport> {
        let mut reports = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut notes = Vec::new();
            let result = match self.bring_up(spec, options, &mut notes).await {
                Ok(()) => {
                    if spec.health.is_some() && spec.primary_host_port().is_some() {
                        ServiceResult::Pending
                    } else {
                        ServiceResult::Ready
                    }
                }
                Err(failure) => {
                    warn!(
                        service = %spec.name,
                        step = %failure.step,
                        error = %failure.error,
                        "service failed to start"
                    );
                    ServiceResult::Failed {
                        step: failure.step,
                        error: failure.error,
                    }
                }
            };
            reports.push(ServiceReport {
                service: spec.name.clone(),
                result,
                notes,
            });
        }

        self.await_health(specs, &mut reports).await;
        Ok(StartReport { services: reports })
    }

    /// One polling loop over all pending services. Slow starters overlap
    /// instead of serializing, and the deadline is shared.
    async fn await_health(&self, specs: &[&ServiceSpec], reports: &mut [ServiceReport]) {
        let deadline = self.clock.now() + self.config.startup_timeout;
        loop {
            let mut still_pending = false;
            for (spec, report) in specs.iter().zip(reports.iter_mut()) {
                if !matches!(report.result, ServiceResult::Pending) {
                    continue;
                }
                let (port, check) = match (spec.primary_host_port(), spec.health.as_ref()) {
                    (Some(port), Some(check)) => (port, check),
                    _ => continue,
                };
                match self.probe.check(port, check).await {
                    ProbeOutcome::Healthy(status) => {
                        info!(service = %spec.name, status, "service healthy");
                        report.result = ServiceResult::Healthy(status);
                    }
                    _ => still_pending = true,
                }
            }

            if !still_pending {
                return;
            }
            if self.clock.now() >= deadline {
                for report in reports.iter_mut() {
                    if matches!(report.result, ServiceResult::Pending) {
                        warn!(service = %report.service, "health check deadline reached");
                        report.result = ServiceResult::TimedOut;
                    }
                }
                return;
            }
            self.clock.sleep(self.config.poll_interval).await;
        }
    }

    async fn bring_up(
        &self,
        spec: &ServiceSpec,
        options: &StartOptions,
        notes: &mut Vec<String>,
    ) -> std::result::Result<(), StepFailure> {
        for mount in &spec.volumes {
            if mount.is_bind() {
                std::fs::create_dir_all(&mount.source).map_err(|err| StepFailure {
                    step: StartStep::Volumes,
                    error: err.into(),
                })?;
            } else if self
                .runtime
                .ensure_volume(&mount.source)
                .await
                .map_err(fail(StartStep::Volumes))?
            {
                notes.push(format!("created volume {}", mount.source));
            } else {
                notes.push(format!("reusing volume {}", mount.source));
            }
        }

        let have_image = self
            .runtime
            .image_exists(&spec.image)
            .await
            .map_err(fail(StartStep::Image))?;
        if have_image && !options.refresh_images {
            notes.push("image present".to_string());
        } else {
            info!(service = %spec.name, image = %spec.image, "pulling image");
            self.runtime
                .pull_image(&spec.image, options.refresh_images)
                .await
                .map_err(fail(StartStep::Image))?;
            notes.push("image pulled".to_string());
        }

        let mut env = spec.env.clone();
        if spec.needs_secret {
            let secret = self
                .secrets
                .get_or_create(SECRET_NAME)
                .await
                .map_err(|error| StepFailure {
                    step: StartStep::Secret,
                    error,
                })?;
            env.insert(SECRET_ENV_KEY.to_string(), secret);
        }

        let gpu_flags = if spec.gpu && !options.force_cpu {
            let flags = self.resolve_gpu().await;
            if flags.is_none() {
                notes.push("no GPU detected, starting on CPU".to_string());
            }
            flags
        } else {
            None
        };

        let created = self
            .runtime
            .ensure_group(&spec.group, &spec.ports, &GroupOptions::default())
            .await
            .map_err(fail(StartStep::Group))?;
        if created {
            notes.push(format!("created group {}", spec.group));
        } else {
            notes.push(format!("reusing group {}", spec.group));
        }

        // Re-verify right before mutating: another invocation may have won.
        let running = self
            .runtime
            .container_running(&spec.container)
            .await
            .map_err(fail(StartStep::Container))?;
        if running {
            notes.push("container already running".to_string());
            return Ok(());
        }

        let request = ContainerRequest {
            group: spec.group.clone(),
            name: spec.container.clone(),
            image: spec.image.clone(),
            ports: spec.ports.clone(),
            volumes: spec.volumes.clone(),
            env,
            gpu_flags,
            pids_limit: self.config.pids_limit,
            restart_policy: self.config.restart_policy.clone(),
        };
        info!(service = %spec.name, container = %spec.container, "starting container");
        self.runtime
            .run_container(&request)
            .await
            .map_err(fail(StartStep::Container))?;
        Ok(())
    }

    async fn resolve_gpu(&self) -> Option<String> {
        self.gpu_flag
            .get_or_init(|| async {
                match self.config.gpu_device_flag.as_str() {
                    "auto" => self.gpu.flags(self.runtime.kind()).await,
                    "none" | "" => None,
                    explicit => Some(explicit.to_string()),
                }
            })
            .await
            .clone()
    }

    /// Stop services; with `remove`, also delete their groups. Volumes are
    /// always preserved here.
    pub async fn stop(&self, specs: &[&ServiceSpec], remove: bool) -> Vec<StopReport> {
        let mut reports = Vec::with_capacity(specs.len());
        for spec in specs {
            let outcome = self.stop_one(spec, remove).await;
            reports.push(StopReport {
                service: spec.name.clone(),
                outcome,
            });
        }
        reports
    }

    async fn stop_one(&self, spec: &ServiceSpec, remove: bool) -> StopOutcome {
        match self.runtime.group_exists(&spec.group).await {
            Ok(false) => return StopOutcome::NotRunning,
            Ok(true) => {}
            Err(err) => return StopOutcome::Failed(err.into()),
        }

        match self
            .runtime
            .stop_group(&spec.group, self.config.stop_grace)
            .await
        {
            Ok(()) | Err(RuntimeError::NotFound { .. }) => {}
            Err(err) => return StopOutcome::Failed(err.into()),
        }
        info!(service = %spec.name, group = %spec.group, "group stopped");

        if remove {
            if let Err(err) = self.runtime.remove_group(&spec.group).await {
                return StopOutcome::Failed(err.into());
            }
        }
        StopOutcome::Stopped { removed: remove }
    }

    /// One engine listing answers for all services; running services with a
    /// health check also get probed.
    pub async fn status(&self, specs: &[&ServiceSpec]) -> Result<Vec<ServiceState>> {
        let groups = self.runtime.group_status().await?;
        let by_name: HashMap<&str, _> = groups.iter().map(|g| (g.name.as_str(), g)).collect();

        let mut states = Vec::with_capacity(specs.len());
        for spec in specs {
            let group = by_name.get(spec.group.as_str()).copied();
            let present = group.is_some();
            let running = group.map(|g| g.running).unwrap_or(false);

            let ports = match group.filter(|g| !g.ports.is_empty()) {
                Some(g) => g.ports.clone(),
                None => spec
                    .ports
                    .iter()
                    .map(|p| format!("{}->{}/tcp", p.host, p.container))
                    .collect(),
            };

            let health = if !running {
                HealthSummary::NotRunning
            } else {
                match (spec.primary_host_port(), spec.health.as_ref()) {
                    (Some(port), Some(check)) => match self.probe.check(port, check).await {
                        ProbeOutcome::Healthy(status) => HealthSummary::Healthy(status),
                        ProbeOutcome::Unhealthy(status) => {
                            HealthSummary::Unhealthy(format!("status {status}"))
                        }
                        ProbeOutcome::Unreachable => {
                            HealthSummary::Unhealthy("unreachable".to_string())
                        }
                    },
                    _ => HealthSummary::NotConfigured,
                }
            };

            states.push(ServiceState {
                service: spec.name.clone(),
                present,
                running,
                ports,
                health,
            });
        }
        Ok(states)
    }

    /// Stop and remove groups; with `volumes`, also delete named volumes.
    /// Bind-mounted host directories are never touched.
    pub async fn clean(&self, specs: &[&ServiceSpec], volumes: bool) -> Result<CleanReport> {
        let services = self.stop(specs, true).await;

        let mut removed_volumes = Vec::new();
        if volumes {
            for spec in specs {
                for mount in &spec.volumes {
                    if mount.is_bind() {
                        continue;
                    }
                    self.runtime.remove_volume(&mount.source).await?;
                    info!(volume = %mount.source, "volume removed");
                    removed_volumes.push(mount.source.clone());
                }
            }
        }

        Ok(CleanReport {
            services,
            removed_volumes,
        })
    }

    /// Stream logs for one service's container.
    pub async fn logs(&self, spec: &ServiceSpec, options: &LogOptions) -> Result<LogStream> {
        if !self.runtime.container_exists(&spec.container).await? {
            return Err(RuntimeError::NotFound {
                kind: "container",
                name: spec.container.clone(),
            }
            .into());
        }
        Ok(self.runtime.logs(&spec.container, options).await?)
    }
}
