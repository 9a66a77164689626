//! Synthetic reference-codec clips for smoke tests and the `synth` command.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use vtc_container::IvfWriter;
use vtc_core::backend::Copy2d;
use vtc_core::buffer::HostFrame;
use vtc_core::codec_traits::{BitstreamSink, EncoderConfig};
use vtc_core::context::ContextConfig;
use vtc_core::encoder_options::EncoderOptions;
use vtc_core::error::Result;
use vtc_core::types::{CodecId, MuxingParams, PixelFormat, Rational};

/// Shape of a synthetic clip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSpec {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub framerate: Rational,
    pub gop_length: u32,
    pub b_frames: u32,
}

impl Default for SynthSpec {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frames: 10,
            framerate: Rational::new(30, 1),
            gop_length: 30,
            b_frames: 0,
        }
    }
}

/// NV12 picture `index`: a diagonal luma ramp that moves each frame over
/// flat mid-grey chroma.
pub fn pattern_frame(width: u32, height: u32, index: u32) -> Result<HostFrame> {
    let format = PixelFormat::Nv12;
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![128u8; format.dense_size(width, height)];
    for (y, row) in data[..w * h].chunks_exact_mut(w).enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            *px = (16 + (x + y + 4 * index as usize) % 220) as u8;
        }
    }
    HostFrame::new(data, width, height, format)
}

/// Encode `spec.frames` pattern pictures with the reference codec into the
/// IVF file at `path`.
pub fn write_reference_clip(path: &Path, spec: &SynthSpec) -> Result<MuxingParams> {
    let ctx = vtc_host::execution_context(&ContextConfig::default())?;
    let options = EncoderOptions {
        codec: CodecId::Raw,
        gop_length: spec.gop_length,
        b_frames: spec.b_frames,
        framerate: spec.framerate,
        ..EncoderOptions::default()
    };
    options.validate()?;
    let mut encoder = ctx.backend().open_encoder(
        &ctx,
        &EncoderConfig {
            options,
            format: PixelFormat::Nv12,
            width: spec.width,
            height: spec.height,
        },
    )?;
    let params = MuxingParams {
        codec: CodecId::Raw,
        width: spec.width,
        height: spec.height,
        framerate: spec.framerate,
        time_base: Rational::new(spec.framerate.den, spec.framerate.num),
        audio: None,
    };
    let mut writer = IvfWriter::create(path, &params)?;

    let frame_us = spec.framerate.frame_duration_us();
    let surface = ctx
        .device()
        .alloc_surface(spec.width, spec.height, PixelFormat::Nv12)?;
    let mut packets = 0u64;
    for index in 0..spec.frames {
        let frame = pattern_frame(spec.width, spec.height, index)?;
        for copy in Copy2d::host_to_surface(&surface) {
            ctx.backend().upload(
                ctx.stream().handle(),
                frame.data(),
                surface.memory().allocation(),
                &copy,
            )?;
        }
        let mut surface = surface.clone();
        surface.pts = i64::from(index) * frame_us;
        for packet in encoder.encode(&surface)? {
            writer.write_packet(&packet)?;
            packets += 1;
        }
    }
    for packet in encoder.flush()? {
        writer.write_packet(&packet)?;
        packets += 1;
    }
    writer.finish()?;
    info!(
        path = %path.display(),
        frames = spec.frames,
        packets,
        width = spec.width,
        height = spec.height,
        fps = %spec.framerate,
        "reference clip written"
    );
    Ok(params)
}
