//! Stand-in for builds without the NVIDIA Video Codec SDK.

use std::sync::Arc;

use vtc_core::buffer::{Packet, Surface};
use vtc_core::codec_traits::{EncodeSession, EncoderConfig};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_cuda::CudaBackend;

use crate::params::NvEncSettings;

const UNAVAILABLE: &str =
    "vtc-nvcodec built without `nvcodec-runtime`: NVENC is unavailable in this build";

/// NVENC session placeholder; [`open`](Self::open) validates the settings
/// and then fails.
pub struct NvEncoder {
    _private: (),
}

impl NvEncoder {
    pub fn open(
        ctx: &Arc<ExecutionContext>,
        cuda: &CudaBackend,
        config: &EncoderConfig,
    ) -> Result<Self> {
        let _ = (ctx, cuda);
        NvEncSettings::from_config(config)?;
        Err(EngineError::BackendUnavailable(UNAVAILABLE.into()))
    }
}

impl EncodeSession for NvEncoder {
    fn encode(&mut self, _surface: &Surface) -> Result<Vec<Packet>> {
        Err(EngineError::BackendUnavailable(UNAVAILABLE.into()))
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        Err(EngineError::BackendUnavailable(UNAVAILABLE.into()))
    }
}
