#![allow(missing_docs)]
//! Stub FFmpeg muxer for builds without FFmpeg runtime bindings.

use std::path::Path;

use vtc_core::buffer::Packet;
use vtc_core::codec_traits::BitstreamSink;
use vtc_core::error::{EngineError, Result};
use vtc_core::types::MuxingParams;

/// Stub container muxer used when FFmpeg runtime support is disabled.
pub struct FfmpegMuxer;

impl FfmpegMuxer {
    pub fn create(path: &Path, params: &MuxingParams) -> Result<Self> {
        let _ = params;
        Err(EngineError::Open {
            locator: path.display().to_string(),
            reason: "vtc-container built without `ffmpeg-runtime`; only .ivf output is available"
                .into(),
        })
    }
}

impl BitstreamSink for FfmpegMuxer {
    fn supports_audio(&self) -> bool {
        false
    }

    fn write_packet(&mut self, _packet: &Packet) -> Result<()> {
        Err(EngineError::Mux(
            "vtc-container built without `ffmpeg-runtime`; container mux is unavailable".into(),
        ))
    }

    fn finish(&mut self) -> Result<()> {
        Err(EngineError::Mux(
            "vtc-container built without `ffmpeg-runtime`; container mux is unavailable".into(),
        ))
    }
}
