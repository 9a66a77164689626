//! The closed set of pipeline stages.
//!
//! | stage              | inputs              | outputs           |
//! |--------------------|---------------------|-------------------|
//! | [`DemuxFrame`]     | -                   | packet, params    |
//! | [`DecodeFrame`]    | packet              | device surface    |
//! | [`EncodeFrame`]    | device surface      | packet            |
//! | [`ConvertSurface`] | device surface      | device surface    |
//! | [`ResizeSurface`]  | device surface      | device surface    |
//! | [`UploadFrame`]    | host frame          | device surface    |
//! | [`DownloadSurface`]| device surface      | host frame        |
//! | [`MuxFrame`]       | packet, audio packet| -                 |
//!
//! Every stage is built by its `make` factory, which validates all
//! parameters up front and never returns a half-constructed instance.

mod convert;
mod decode;
mod demux;
mod encode;
mod mux;
mod resize;
mod transfer;

pub use convert::ConvertSurface;
pub use decode::DecodeFrame;
pub use demux::DemuxFrame;
pub use encode::EncodeFrame;
pub use mux::MuxFrame;
pub use resize::ResizeSurface;
pub use transfer::{DownloadSurface, UploadFrame};

use vtc_core::backend::Copy2d;
use vtc_core::buffer::{HostFrame, Packet, Surface, Token};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};

fn unexpected(stage: &str, want: &str, got: &Token) -> EngineError {
    EngineError::Wiring(format!("{stage} expects a {want}, got {}", got.kind()))
}

/// Unwrap a device surface; host frames are a residency error.
pub(crate) fn expect_surface(stage: &str, token: Token) -> Result<Surface> {
    match token {
        Token::Device(surface) => Ok(surface),
        Token::Host(_) => Err(EngineError::Residency(format!(
            "{stage} takes device surfaces; insert an upload stage"
        ))),
        other => Err(unexpected(stage, "device surface", &other)),
    }
}

pub(crate) fn expect_host(stage: &str, token: Token) -> Result<HostFrame> {
    match token {
        Token::Host(frame) => Ok(frame),
        Token::Device(_) => Err(EngineError::Residency(format!(
            "{stage} takes host frames; the input is already on the device"
        ))),
        other => Err(unexpected(stage, "host frame", &other)),
    }
}

pub(crate) fn expect_packet(stage: &str, token: Token) -> Result<Packet> {
    match token {
        Token::Packet(packet) => Ok(packet),
        other => Err(unexpected(stage, "packet", &other)),
    }
}

/// Plane-by-plane device copy between two surfaces of one layout.
pub(crate) fn copy_surface(ctx: &ExecutionContext, src: &Surface, dst: &Surface) -> Result<()> {
    let backend = ctx.backend();
    for copy in Copy2d::surface_to_surface(src, dst) {
        backend.copy(
            ctx.stream().handle(),
            src.memory().allocation(),
            dst.memory().allocation(),
            &copy,
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use vtc_core::buffer::{HostFrame, Surface};
    use vtc_core::context::{ContextConfig, ExecutionContext};
    use vtc_core::types::PixelFormat;

    pub fn host_ctx() -> Arc<ExecutionContext> {
        vtc_host::execution_context(&ContextConfig::default()).expect("host context")
    }

    /// Packed frame whose bytes follow `f(i)` for byte index `i`.
    pub fn pattern_frame(
        width: u32,
        height: u32,
        format: PixelFormat,
        f: impl Fn(usize) -> u8,
    ) -> HostFrame {
        let data: Vec<u8> = (0..format.dense_size(width, height)).map(f).collect();
        HostFrame::new(data, width, height, format).expect("valid frame")
    }

    pub fn upload(ctx: &Arc<ExecutionContext>, frame: &HostFrame) -> Surface {
        let surface = ctx
            .device()
            .alloc_surface(frame.width(), frame.height(), frame.format())
            .expect("alloc");
        for copy in vtc_core::backend::Copy2d::host_to_surface(&surface) {
            ctx.backend()
                .upload(
                    ctx.stream().handle(),
                    frame.data(),
                    surface.memory().allocation(),
                    &copy,
                )
                .expect("upload");
        }
        surface
    }

    pub fn download(ctx: &Arc<ExecutionContext>, surface: &Surface) -> Vec<u8> {
        let mut out = vec![0u8; surface.format().dense_size(surface.width(), surface.height())];
        for copy in vtc_core::backend::Copy2d::surface_to_host(surface) {
            ctx.backend()
                .download(
                    ctx.stream().handle(),
                    surface.memory().allocation(),
                    &mut out,
                    &copy,
                )
                .expect("download");
        }
        ctx.synchronize().expect("sync");
        out
    }
}
