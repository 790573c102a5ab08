//! In-memory test doubles for the orchestration engine.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use podstack::error::RuntimeError;
use podstack::gpu::GpuResolver;
use podstack::manager::{Clock, HealthProbe, ManagerConfig, ServiceManager};
use podstack::runtime::{
    ContainerRequest, ContainerRuntime, ContainerSummary, ExecOutput, GroupOptions, GroupState,
    LogOptions, LogStream, RuntimeKind,
};
use podstack::secrets::SecretSource;
use podstack::spec::{HealthCheck, PortMapping, ServiceSpec, VolumeMount};

#[derive(Debug)]
struct ContainerRecord {
    group: String,
    running: bool,
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeSet<String>,
    images: BTreeSet<String>,
    groups: BTreeSet<String>,
    containers: BTreeMap<String, ContainerRecord>,
    run_requests: Vec<ContainerRequest>,
    failing_pulls: BTreeSet<String>,
}

/// Engine double holding all state in memory.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an image as already present locally.
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    /// Make pulls of this image fail.
    pub fn failing_pull(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_pulls
            .insert(image.to_string());
        self
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().unwrap().volumes.contains(name)
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().unwrap().run_requests.len()
    }

    pub fn last_request(&self) -> ContainerRequest {
        self.state
            .lock()
            .unwrap()
            .run_requests
            .last()
            .expect("no container was run")
            .clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Podman
    }

    async fn check_available(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().volumes.insert(name.to_string()))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.has_volume(name))
    }

    async fn list_volumes(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.state.lock().unwrap().volumes.iter().cloned().collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().volumes.remove(name);
        Ok(())
    }

    async fn pull_image(&self, image: &str, _force_refresh: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_pulls.contains(image) {
            return Err(RuntimeError::ImagePull {
                image: image.to_string(),
                detail: "registry unreachable".to_string(),
            });
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn image_size(&self, _image: &str) -> Result<Option<u64>, RuntimeError> {
        Ok(None)
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().images.remove(image);
        Ok(())
    }

    async fn ensure_group(
        &self,
        name: &str,
        _ports: &[PortMapping],
        _options: &GroupOptions,
    ) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().groups.insert(name.to_string()))
    }

    async fn group_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().groups.contains(name))
    }

    async fn stop_group(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if !state.groups.contains(name) {
            return Err(RuntimeError::NotFound {
                kind: "pod",
                name: name.to_string(),
            });
        }
        for container in state.containers.values_mut() {
            if container.group == name {
                container.running = false;
            }
        }
        Ok(())
    }

    async fn remove_group(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.groups.remove(name);
        state.containers.retain(|_, c| c.group != name);
        Ok(())
    }

    async fn group_status(&self) -> Result<Vec<GroupState>, RuntimeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .map(|group| {
                let members: Vec<_> = state
                    .containers
                    .iter()
                    .filter(|(_, c)| &c.group == group)
                    .collect();
                GroupState {
                    name: group.clone(),
                    running: members.iter().any(|(_, c)| c.running),
                    ports: Vec::new(),
                    containers: members.iter().map(|(name, _)| (*name).clone()).collect(),
                }
            })
            .collect())
    }

    async fn inspect_group(&self, _name: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        Ok(None)
    }

    async fn run_container(&self, request: &ContainerRequest) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.run_requests.push(request.clone());
        state.containers.insert(
            request.name.clone(),
            ContainerRecord {
                group: request.group.clone(),
                running: true,
            },
        );
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().containers.contains_key(name))
    }

    async fn container_running(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false))
    }

    async fn inspect_container(
        &self,
        _name: &str,
    ) -> Result<Option<serde_json::Value>, RuntimeError> {
        Ok(None)
    }

    async fn list_containers(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(name, _)| name_filter.map(|f| name.contains(f)).unwrap_or(true))
            .map(|(name, c)| ContainerSummary {
                name: name.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn logs(
        &self,
        _container: &str,
        _options: &LogOptions,
    ) -> Result<LogStream, RuntimeError> {
        Err(RuntimeError::CommandFailed(
            "log streaming not supported by the fake engine".to_string(),
        ))
    }

    async fn exec_in_container(
        &self,
        _container: &str,
        _command: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn copy_to_container(
        &self,
        _source: &Path,
        _container: &str,
        _dest: &str,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn copy_from_container(
        &self,
        _container: &str,
        _source: &str,
        _dest: &Path,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Clock whose sleeps advance simulated time instantly, counting rounds.
pub struct TestClock {
    now: Mutex<Instant>,
    pub sleeps: AtomicUsize,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        *self.now.lock().unwrap() += duration;
    }
}

/// Secret source returning a fixed value.
pub struct FixedSecrets;

#[async_trait]
impl SecretSource for FixedSecrets {
    async fn get_or_create(&self, _name: &str) -> podstack::Result<String> {
        Ok("test-secret".to_string())
    }
}

/// GPU resolver returning a canned flag and counting resolutions.
#[derive(Default)]
pub struct CountingGpu {
    pub calls: AtomicUsize,
    pub flags: Option<String>,
}

impl CountingGpu {
    pub fn with_flags(flags: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            flags: Some(flags.to_string()),
        }
    }
}

#[async_trait]
impl GpuResolver for CountingGpu {
    async fn flags(&self, _kind: RuntimeKind) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.flags.clone()
    }
}

/// Manager config with short timings suitable for tests.
pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        startup_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_secs(2),
        stop_grace: Duration::from_secs(1),
        restart_policy: "unless-stopped".to_string(),
        pids_limit: 512,
        gpu_device_flag: "auto".to_string(),
    }
}

pub fn build_manager(
    runtime: std::sync::Arc<FakeRuntime>,
    gpu: std::sync::Arc<CountingGpu>,
    config: ManagerConfig,
) -> ServiceManager {
    build_manager_with_clock(runtime, gpu, config, std::sync::Arc::new(TestClock::new()))
}

pub fn build_manager_with_clock(
    runtime: std::sync::Arc<FakeRuntime>,
    gpu: std::sync::Arc<CountingGpu>,
    config: ManagerConfig,
    clock: std::sync::Arc<TestClock>,
) -> ServiceManager {
    ServiceManager::new(
        runtime,
        HealthProbe::new(Duration::from_millis(500)),
        clock,
        std::sync::Arc::new(FixedSecrets),
        gpu,
        config,
    )
}

/// Minimal service spec with the given name; image defaults to `<name>-img`.
pub fn spec(name: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        image: format!("{name}-img"),
        group: name.to_string(),
        container: format!("{name}-0"),
        ports: Vec::new(),
        volumes: Vec::new(),
        env: BTreeMap::new(),
        gpu: false,
        health: None,
        needs_secret: false,
    }
}

pub fn with_port(mut spec: ServiceSpec, host: u16, container: u16) -> ServiceSpec {
    spec.ports.push(PortMapping { host, container });
    spec
}

pub fn with_volume(mut spec: ServiceSpec, source: &str, target: &str) -> ServiceSpec {
    spec.volumes.push(VolumeMount {
        source: source.to_string(),
        target: target.to_string(),
    });
    spec
}

pub fn with_health(mut spec: ServiceSpec, path: &str, low: u16, high: u16) -> ServiceSpec {
    spec.health = Some(HealthCheck {
        path: path.to_string(),
        accept_low: low,
        accept_high: high,
    });
    spec
}
