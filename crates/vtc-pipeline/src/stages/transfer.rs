//! The only stages that move pixels across the host/device boundary.

use std::sync::Arc;

use tracing::{debug, info};

use vtc_core::backend::Copy2d;
use vtc_core::buffer::{HostFrame, Token};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::PixelFormat;

use super::{expect_host, expect_surface};

fn check_frame(frame: &HostFrame, width: u32, height: u32, format: PixelFormat) -> Result<()> {
    if frame.format() != format {
        return Err(EngineError::FormatMismatch {
            expected: format,
            actual: frame.format(),
        });
    }
    if frame.width() != width || frame.height() != height {
        return Err(EngineError::DimensionMismatch(format!(
            "expected {width}x{height}, got {}x{}",
            frame.width(),
            frame.height()
        )));
    }
    Ok(())
}

/// Host frame → pitched device surface.
pub struct UploadFrame {
    core: TaskCore,
    ctx: Arc<ExecutionContext>,
    width: u32,
    height: u32,
    format: PixelFormat,
    upload_size: usize,
}

impl UploadFrame {
    pub const NUM_INPUTS: usize = 1;
    pub const NUM_OUTPUTS: usize = 1;

    pub fn make(
        ctx: &Arc<ExecutionContext>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        format.check_dimensions(width, height)?;
        let upload_size = format.checked_dense_size(width, height)?;
        info!(%format, width, height, upload_size, "upload configured");
        Ok(Self {
            core: TaskCore::new("upload", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            ctx: Arc::clone(ctx),
            width,
            height,
            format,
            upload_size,
        })
    }

    /// Dense host bytes expected per input frame.
    pub fn upload_size(&self) -> usize {
        self.upload_size
    }
}

impl Stage for UploadFrame {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<Step> {
        let Some(token) = self.core.take_input(0) else {
            return Ok(Step::Exhausted);
        };
        let frame = expect_host("upload", token)?;
        check_frame(&frame, self.width, self.height, self.format)?;

        let mut surface = self
            .ctx
            .device()
            .alloc_surface(self.width, self.height, self.format)?;
        let backend = self.ctx.backend();
        for copy in Copy2d::host_to_surface(&surface) {
            backend.upload(
                self.ctx.stream().handle(),
                frame.data(),
                surface.memory().allocation(),
                &copy,
            )?;
        }
        surface.pts = frame.pts;
        debug!(pts = surface.pts, bytes = frame.data().len(), "uploaded frame");
        self.core.publish(0, Token::Device(surface))?;
        Ok(Step::Done)
    }
}

/// Device surface → packed host frame.
///
/// The stream is synchronized before the frame is published.
pub struct DownloadSurface {
    core: TaskCore,
    ctx: Arc<ExecutionContext>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl DownloadSurface {
    pub const NUM_INPUTS: usize = 1;
    pub const NUM_OUTPUTS: usize = 1;

    pub fn make(
        ctx: &Arc<ExecutionContext>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        format.check_dimensions(width, height)?;
        info!(%format, width, height, "download configured");
        Ok(Self {
            core: TaskCore::new("download", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            ctx: Arc::clone(ctx),
            width,
            height,
            format,
        })
    }
}

impl Stage for DownloadSurface {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<Step> {
        let Some(token) = self.core.take_input(0) else {
            return Ok(Step::Exhausted);
        };
        let surface = expect_surface("download", token)?;
        self.ctx.check_surface(&surface)?;
        surface.expect_layout(self.width, self.height, self.format)?;

        let mut data = vec![0u8; self.format.dense_size(self.width, self.height)];
        let backend = self.ctx.backend();
        for copy in Copy2d::surface_to_host(&surface) {
            backend.download(
                self.ctx.stream().handle(),
                surface.memory().allocation(),
                &mut data,
                &copy,
            )?;
        }
        self.ctx.synchronize()?;

        let mut frame = HostFrame::new(data, self.width, self.height, self.format)?;
        frame.pts = surface.pts;
        debug!(pts = frame.pts, "downloaded surface");
        self.core.publish(0, Token::Host(frame))?;
        Ok(Step::Done)
    }
}
