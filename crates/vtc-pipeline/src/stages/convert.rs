use std::sync::Arc;

use tracing::{debug, info};

use vtc_core::buffer::Token;
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::{ColorSpec, PixelFormat};

use super::{copy_surface, expect_surface};

/// Pixel format conversion between two surfaces of the same size.
pub struct ConvertSurface {
    core: TaskCore,
    ctx: Arc<ExecutionContext>,
    width: u32,
    height: u32,
    from: PixelFormat,
    to: PixelFormat,
    color: ColorSpec,
}

impl ConvertSurface {
    pub const NUM_INPUTS: usize = 1;
    pub const NUM_OUTPUTS: usize = 1;

    pub fn make(
        ctx: &Arc<ExecutionContext>,
        width: u32,
        height: u32,
        from: PixelFormat,
        to: PixelFormat,
        color: ColorSpec,
    ) -> Result<Self> {
        from.check_dimensions(width, height)?;
        to.check_dimensions(width, height)?;
        if from != to && !ctx.backend().supports_conversion(from, to) {
            return Err(EngineError::Unsupported(format!(
                "{} backend cannot convert {from} to {to}",
                ctx.backend().name()
            )));
        }
        info!(%from, %to, width, height, ?color, "convert configured");
        Ok(Self {
            core: TaskCore::new("convert", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            ctx: Arc::clone(ctx),
            width,
            height,
            from,
            to,
            color,
        })
    }
}

impl Stage for ConvertSurface {
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
        let src = expect_surface("convert", token)?;
        self.ctx.check_surface(&src)?;
        src.expect_layout(self.width, self.height, self.from)?;

        let mut dst = self
            .ctx
            .device()
            .alloc_surface(self.width, self.height, self.to)?;
        if self.from == self.to {
            copy_surface(&self.ctx, &src, &dst)?;
        } else {
            self.ctx
                .backend()
                .convert(self.ctx.stream().handle(), &src, &dst, self.color)?;
        }
        dst.pts = src.pts;
        debug!(pts = dst.pts, "converted surface");
        self.core.publish(0, Token::Device(dst))?;
        Ok(Step::Done)
    }
}

#[cfg(test)]
mod tests {
    use vtc_core::task::{Task, TaskExecStatus};

    use super::*;
    use crate::stages::test_support::{download, host_ctx, pattern_frame, upload};

    fn run_once(task: &mut ConvertSurface, input: Token) -> TaskExecStatus {
        task.set_input(0, input).expect("set");
        task.execute()
    }

    #[test]
    fn identity_is_bit_exact_for_every_format() {
        let ctx = host_ctx();
        for format in PixelFormat::ALL {
            let frame = pattern_frame(16, 8, format, |i| (i * 7 % 251) as u8);
            let mut task =
                ConvertSurface::make(&ctx, 16, 8, format, format, ColorSpec::default())
                    .expect("identity is always supported");
            let mut src = upload(&ctx, &frame);
            src.pts = 42;
            assert_eq!(run_once(&mut task, Token::Device(src)), TaskExecStatus::Success);
            let out = task
                .output(0)
                .and_then(Token::as_surface)
                .expect("surface");
            assert_eq!(out.pts, 42);
            assert_eq!(out.format(), format);
            assert_eq!(download(&ctx, out), frame.data().to_vec(), "{format}");
        }
    }

    #[test]
    fn grey_nv12_becomes_grey_rgb() {
        let ctx = host_ctx();
        let frame = pattern_frame(16, 8, PixelFormat::Nv12, |i| if i < 128 { 126 } else { 128 });
        let mut task = ConvertSurface::make(
            &ctx,
            16,
            8,
            PixelFormat::Nv12,
            PixelFormat::Rgb,
            ColorSpec::default(),
        )
        .expect("make");
        assert_eq!(
            run_once(&mut task, Token::Device(upload(&ctx, &frame))),
            TaskExecStatus::Success
        );
        let out = task.output(0).and_then(Token::as_surface).expect("surface");
        let rgb = download(&ctx, out);
        assert_eq!(rgb.len(), 16 * 8 * 3);
        let first = rgb[0];
        assert!(rgb.iter().all(|&v| v.abs_diff(first) <= 1));
    }

    #[test]
    fn unsupported_pairs_and_bad_sizes_fail_at_make() {
        let ctx = host_ctx();
        let spec = ColorSpec::default();
        assert!(
            ConvertSurface::make(&ctx, 16, 8, PixelFormat::Y, PixelFormat::Rgb, spec).is_err()
        );
        assert!(
            ConvertSurface::make(&ctx, 15, 8, PixelFormat::Nv12, PixelFormat::Rgb, spec).is_err()
        );
        assert!(
            ConvertSurface::make(&ctx, 0, 8, PixelFormat::Rgb, PixelFormat::Bgr, spec).is_err()
        );
    }

    #[test]
    fn surface_from_another_context_fails() {
        let ctx = host_ctx();
        let other = host_ctx();
        let mut task = ConvertSurface::make(
            &ctx,
            16,
            8,
            PixelFormat::Rgb,
            PixelFormat::Bgr,
            ColorSpec::default(),
        )
        .expect("make");
        let foreign = upload(&other, &pattern_frame(16, 8, PixelFormat::Rgb, |_| 1));
        assert_eq!(run_once(&mut task, Token::Device(foreign)), TaskExecStatus::Fail);
        let err = task.last_error().expect("error");
        assert!(err.to_string().contains("Context mismatch"));
        assert_eq!(task.execute(), TaskExecStatus::Fail);
    }

    #[test]
    fn empty_input_ends_the_stream() {
        let ctx = host_ctx();
        let mut task = ConvertSurface::make(
            &ctx,
            16,
            8,
            PixelFormat::Rgb,
            PixelFormat::Bgr,
            ColorSpec::default(),
        )
        .expect("make");
        assert_eq!(task.execute(), TaskExecStatus::EndOfStream);
        let frame = pattern_frame(16, 8, PixelFormat::Rgb, |_| 1);
        assert_eq!(
            run_once(&mut task, Token::Device(upload(&ctx, &frame))),
            TaskExecStatus::EndOfStream
        );
    }

    #[test]
    fn host_frame_input_is_a_residency_error() {
        let ctx = host_ctx();
        let mut task = ConvertSurface::make(
            &ctx,
            16,
            8,
            PixelFormat::Rgb,
            PixelFormat::Bgr,
            ColorSpec::default(),
        )
        .expect("make");
        let frame = pattern_frame(16, 8, PixelFormat::Rgb, |_| 1);
        assert_eq!(run_once(&mut task, Token::Host(frame)), TaskExecStatus::Fail);
        assert_eq!(task.last_error().map(|e| e.error_code()), Some(504));
    }
}
