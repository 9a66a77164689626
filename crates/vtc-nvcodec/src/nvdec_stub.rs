//! Stand-in for builds without the NVIDIA Video Codec SDK.

use std::sync::Arc;

use vtc_core::buffer::{Packet, Surface};
use vtc_core::codec_traits::{DecodeSession, DecoderConfig, PictureInfo, SequenceInfo};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_cuda::CudaBackend;

use crate::params::decode_codec;

const UNAVAILABLE: &str =
    "vtc-nvcodec built without `nvcodec-runtime`: NVDEC is unavailable in this build";

/// NVDEC session placeholder; [`open`](Self::open) always fails.
pub struct NvDecoder {
    _private: (),
}

impl NvDecoder {
    pub fn open(
        ctx: &Arc<ExecutionContext>,
        cuda: &CudaBackend,
        config: &DecoderConfig,
    ) -> Result<Self> {
        let _ = (ctx, cuda);
        decode_codec(config.codec)?;
        Err(EngineError::BackendUnavailable(UNAVAILABLE.into()))
    }
}

impl DecodeSession for NvDecoder {
    fn submit(&mut self, _packet: Option<&Packet>) -> Result<()> {
        Err(EngineError::BackendUnavailable(UNAVAILABLE.into()))
    }

    fn sequence(&self) -> Option<SequenceInfo> {
        None
    }

    fn ready(&self) -> usize {
        0
    }

    fn output_picture(&mut self, _target: &Surface) -> Result<PictureInfo> {
        Err(EngineError::BackendUnavailable(UNAVAILABLE.into()))
    }
}
