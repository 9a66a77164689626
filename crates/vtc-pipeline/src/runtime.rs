//! Backend selection.
//!
//! Keeps the choice of device backend inside `vtc-pipeline` so callers can
//! build pipelines without importing `vtc-host`, `vtc-cuda` or
//! `vtc-nvcodec` directly.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use vtc_core::context::{ContextConfig, ExecutionContext};
use vtc_core::error::{EngineError, Result};

/// Device backend a pipeline runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Host-emulated device with the reference codec. Always available.
    #[default]
    Host,
    /// CUDA memory and kernels (feature `cuda`). No codec sessions.
    Cuda,
    /// CUDA plus NVDEC/NVENC (feature `nvcodec`).
    Nvidia,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Cuda => "cuda",
            Self::Nvidia => "nvidia",
        }
    }

    /// Whether this build can create the backend.
    pub const fn is_compiled(self) -> bool {
        match self {
            Self::Host => true,
            Self::Cuda => cfg!(feature = "cuda"),
            Self::Nvidia => cfg!(feature = "nvcodec"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "cuda" => Ok(Self::Cuda),
            "nvidia" | "nvcodec" => Ok(Self::Nvidia),
            other => Err(EngineError::InvalidParameter(format!(
                "unknown backend `{other}`; use host, cuda or nvidia"
            ))),
        }
    }
}

/// Backends compiled into this build.
pub fn available_backends() -> Vec<BackendKind> {
    [BackendKind::Host, BackendKind::Cuda, BackendKind::Nvidia]
        .into_iter()
        .filter(|b| b.is_compiled())
        .collect()
}

/// Device context plus stream on the requested backend.
pub fn create_execution_context(
    kind: BackendKind,
    device: usize,
    config: &ContextConfig,
) -> Result<Arc<ExecutionContext>> {
    let ctx = match kind {
        BackendKind::Host => vtc_host::execution_context(config)?,
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => vtc_cuda::execution_context(device, config)?,
        #[cfg(feature = "nvcodec")]
        BackendKind::Nvidia => vtc_nvcodec::execution_context(device, config)?,
        #[allow(unreachable_patterns)]
        other => {
            return Err(EngineError::BackendUnavailable(format!(
                "backend `{other}` (device {device}) is not compiled into this build"
            )));
        }
    };
    info!(
        backend = ctx.backend().name(),
        device,
        context = %ctx.id(),
        vram_limit_bytes = config.vram_limit_bytes,
        "execution context ready"
    );
    Ok(ctx)
}
