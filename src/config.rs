//! Settings loading and validation.
//!
//! The raw TOML is parsed into a [`toml::Value`] tree, run through the
//! template resolver, and only then deserialized into typed settings — so
//! every consumer downstream of [`Settings::load`] sees fully resolved
//! values. A missing config file falls back to the built-in catalog.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use toml::Value;
use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, Result};
use crate::template;

/// Built-in default configuration: the stock ollama / open-webui / comfyui
/// catalog, used verbatim when no config file is present.
pub const DEFAULT_CONFIG: &str = r#"
[runtime]
prefer = "auto"
gpu_device_flag = "auto"
restart_policy = "unless-stopped"
pids_limit = 2048

[orchestration]
startup_timeout_secs = 120
poll_interval_secs = 2
stop_grace_secs = 10
ping_timeout_secs = 2
auto_confirm = false

[logging]
level = "info"
format = "pretty"

[services.ollama]
image = "docker.io/ollama/ollama:latest"
group = "ollama"
container = "ollama-0"
ports = [{ host = 11434, container = 11434 }]
gpu = true

[services.ollama.volumes.data]
source = "podstack_ollama_data"
target = "/root/.ollama"

[services.ollama.health]
path = "/api/tags"
expected_status = [200, 299]

[services.ollama.env]
OLLAMA_ORIGINS = "*"
OLLAMA_HOST = "0.0.0.0"

[services.open-webui]
image = "ghcr.io/open-webui/open-webui:latest"
group = "open-webui"
container = "open-webui-0"
ports = [{ host = 3000, container = 8080 }]
needs_secret = true

[services.open-webui.volumes.data]
source = "podstack_webui_data"
target = "/app/backend/data"

[services.open-webui.health]
path = "/"
expected_status = [200, 399]

[services.open-webui.env]
PORT = "{{services.open-webui.ports.0.host}}"
OLLAMA_BASE_URL = "http://127.0.0.1:{{services.ollama.ports.0.host}}"
ENABLE_COMMUNITY_SHARING = "True"

[services.comfyui]
image = "docker.io/yanwk/comfyui-boot:cu128-slim"
group = "comfyui"
container = "comfyui-0"
ports = [{ host = 8188, container = 8188 }]
gpu = true

[services.comfyui.volumes.models]
source = "podstack_comfyui_data"
target = "/root/ComfyUI/models"

[services.comfyui.health]
path = "/"
expected_status = [200, 299]
"#;

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub orchestration: OrchestrationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSettings {
    /// Engine preference: "auto", "podman", or "docker".
    #[serde(default = "default_prefer")]
    pub prefer: String,
    /// GPU device flag: "auto" for detection, or an explicit flag string.
    #[serde(default = "default_auto")]
    pub gpu_device_flag: String,
    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
}

fn default_prefer() -> String {
    "auto".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_restart_policy() -> String {
    "unless-stopped".to_string()
}

fn default_pids_limit() -> u32 {
    2048
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            prefer: default_prefer(),
            gpu_device_flag: default_auto(),
            restart_policy: default_restart_policy(),
            pids_limit: default_pids_limit(),
        }
    }
}

/// Cross-cutting orchestration knobs consumed by the service manager.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationSettings {
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default)]
    pub auto_confirm: bool,
}

fn default_startup_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    2
}

fn default_stop_grace() -> u64 {
    10
}

fn default_ping_timeout() -> u64 {
    2
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout(),
            poll_interval_secs: default_poll_interval(),
            stop_grace_secs: default_stop_grace(),
            ping_timeout_secs: default_ping_timeout(),
            auto_confirm: false,
        }
    }
}

impl OrchestrationSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingSettings {
    /// Initialize the global tracing subscriber. `RUST_LOG` wins over the
    /// configured level when set.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.clone()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false);
        if self.format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}

/// One service as declared in configuration, post template resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub image: String,
    pub group: String,
    pub container: String,
    #[serde(default)]
    pub ports: Vec<PortSettings>,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSettings>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub health: Option<HealthSettings>,
    #[serde(default)]
    pub needs_secret: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortSettings {
    pub host: u16,
    pub container: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSettings {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    pub path: String,
    /// Inclusive [low, high] range of accepted HTTP status codes.
    pub expected_status: [u16; 2],
}

impl Settings {
    /// Load settings from `path`, falling back to the built-in catalog when
    /// the file does not exist. Template placeholders are resolved before
    /// deserialization.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: Value = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
            text.parse().map_err(ConfigError::Parse)?
        } else {
            DEFAULT_CONFIG.parse().map_err(ConfigError::Parse)?
        };

        let resolved = template::resolve(&raw)?;
        let settings: Settings = resolved.try_into().map_err(ConfigError::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.orchestration.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestration.poll_interval_secs",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.orchestration.ping_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestration.ping_timeout_secs",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        for (name, service) in &self.services {
            let Some(health) = &service.health else {
                continue;
            };
            if service.ports.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "services",
                    reason: format!("service '{name}' declares a health check but no ports"),
                }
                .into());
            }
            if health.expected_status[0] > health.expected_status[1] {
                return Err(ConfigError::InvalidValue {
                    field: "services",
                    reason: format!(
                        "service '{name}' health range [{}, {}] is inverted",
                        health.expected_status[0], health.expected_status[1]
                    ),
                }
                .into());
            }
            if !health.path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "services",
                    reason: format!(
                        "service '{name}' health path '{}' must start with '/'",
                        health.path
                    ),
                }
                .into());
            }
        }
        Ok(())
    }
}
