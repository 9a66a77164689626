#![allow(missing_docs)]
//! Stub FFmpeg demuxer for builds without FFmpeg runtime bindings.

use std::path::Path;

use vtc_core::buffer::Packet;
use vtc_core::codec_traits::BitstreamSource;
use vtc_core::error::{EngineError, Result};
use vtc_core::types::MuxingParams;

/// Stub container demuxer used when FFmpeg runtime support is disabled.
pub struct FfmpegDemuxer {
    params: MuxingParams,
}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> Result<Self> {
        Err(EngineError::Open {
            locator: path.display().to_string(),
            reason: "vtc-container built without `ffmpeg-runtime`; only .ivf input is available"
                .into(),
        })
    }
}

impl BitstreamSource for FfmpegDemuxer {
    fn params(&self) -> &MuxingParams {
        &self.params
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Err(EngineError::Demux(
            "vtc-container built without `ffmpeg-runtime`; container demux is unavailable".into(),
        ))
    }
}
