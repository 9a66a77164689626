use std::sync::Arc;

use tracing::{debug, info};

use vtc_core::buffer::Token;
use vtc_core::context::ExecutionContext;
use vtc_core::error::Result;
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::{Interpolation, PixelFormat};

use super::{copy_surface, expect_surface};

/// Resamples every plane of a surface to a new size.
pub struct ResizeSurface {
    core: TaskCore,
    ctx: Arc<ExecutionContext>,
    src: (u32, u32),
    dst: (u32, u32),
    format: PixelFormat,
    interpolation: Interpolation,
}

impl ResizeSurface {
    pub const NUM_INPUTS: usize = 1;
    pub const NUM_OUTPUTS: usize = 1;

    pub fn make(
        ctx: &Arc<ExecutionContext>,
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
        format: PixelFormat,
        interpolation: Interpolation,
    ) -> Result<Self> {
        format.check_dimensions(src_width, src_height)?;
        format.check_dimensions(dst_width, dst_height)?;
        info!(
            %format,
            src = %format_args!("{src_width}x{src_height}"),
            dst = %format_args!("{dst_width}x{dst_height}"),
            ?interpolation,
            "resize configured"
        );
        Ok(Self {
            core: TaskCore::new("resize", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            ctx: Arc::clone(ctx),
            src: (src_width, src_height),
            dst: (dst_width, dst_height),
            format,
            interpolation,
        })
    }
}

impl Stage for ResizeSurface {
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
        let src = expect_surface("resize", token)?;
        self.ctx.check_surface(&src)?;
        src.expect_layout(self.src.0, self.src.1, self.format)?;

        let mut dst = self
            .ctx
            .device()
            .alloc_surface(self.dst.0, self.dst.1, self.format)?;
        if self.src == self.dst {
            copy_surface(&self.ctx, &src, &dst)?;
        } else {
            self.ctx.backend().resize(
                self.ctx.stream().handle(),
                &src,
                &dst,
                self.interpolation,
            )?;
        }
        dst.pts = src.pts;
        debug!(pts = dst.pts, "resized surface");
        self.core.publish(0, Token::Device(dst))?;
        Ok(Step::Done)
    }
}
