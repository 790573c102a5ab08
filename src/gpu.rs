//! GPU device flag resolution.
//!
//! Services marked `gpu = true` get engine flags exposing the host GPU. The
//! flag shape differs per engine and per toolkit generation: podman prefers
//! CDI device names when a CDI spec is installed, falling back to the legacy
//! `--gpus` hook; docker always takes `--gpus`. Detection runs `nvidia-smi`
//! once and the result is cached per invocation by the caller.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::runtime::RuntimeKind;

const CDI_SPEC_PATHS: &[&str] = &["/etc/cdi/nvidia.yaml", "/var/run/cdi/nvidia.yaml"];

#[async_trait]
pub trait GpuResolver: Send + Sync {
    /// Engine flags for GPU access, or `None` when no usable GPU is present.
    async fn flags(&self, kind: RuntimeKind) -> Option<String>;
}

/// Detects an NVIDIA GPU via `nvidia-smi` and picks flags for the engine.
pub struct ToolkitGpu;

impl ToolkitGpu {
    async fn gpu_present(&self) -> bool {
        match Command::new("nvidia-smi").arg("-L").output().await {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!(error = %err, "nvidia-smi not runnable, assuming no GPU");
                false
            }
        }
    }

    fn cdi_available(&self) -> bool {
        CDI_SPEC_PATHS.iter().any(|path| Path::new(path).exists())
    }
}

#[async_trait]
impl GpuResolver for ToolkitGpu {
    async fn flags(&self, kind: RuntimeKind) -> Option<String> {
        if !self.gpu_present().await {
            return None;
        }
        let flags = match kind {
            RuntimeKind::Podman => {
                if self.cdi_available() {
                    "--device nvidia.com/gpu=all --security-opt=label=disable"
                } else {
                    "--gpus all --security-opt=label=disable"
                }
            }
            RuntimeKind::Docker => "--gpus all",
        };
        info!(%kind, flags, "GPU detected");
        Some(flags.to_string())
    }
}
