//! [`DeviceBackend`] implementation over host memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;
use vtc_core::backend::{BackendStream, Copy2d, DeviceBackend};
use vtc_core::buffer::{DeviceAllocation, Surface};
use vtc_core::codec_traits::{DecodeSession, DecoderConfig, EncodeSession, EncoderConfig};
use vtc_core::context::{ContextConfig, DeviceContext, ExecutionContext};
use vtc_core::error::{EngineError, Result};
use vtc_core::types::{ColorSpec, ConversionKind, Interpolation, PixelFormat, conversion_kind};

use crate::codec::{RawDecoder, RawEncoder};
use crate::kernels::{self, YuvCoefficients};
use crate::memory::{HostAllocation, HostStream, copy_rows};

/// Host-emulated device: heap memory, synchronous kernels, reference codec.
#[derive(Debug, Default)]
pub struct HostBackend {
    next_stream: AtomicU64,
}

impl HostBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Device context plus one stream on a fresh host backend.
pub fn execution_context(config: &ContextConfig) -> Result<Arc<ExecutionContext>> {
    let device = DeviceContext::new(HostBackend::new(), config);
    ExecutionContext::new(&device)
}

/// Run `f` with `src` locked for reading and `dst` for writing.
///
/// Locks are taken in address order so two opposite copies cannot deadlock.
fn with_pair<R>(
    src: &dyn DeviceAllocation,
    dst: &dyn DeviceAllocation,
    f: impl FnOnce(&[u8], &mut [u8]) -> R,
) -> Result<R> {
    let src = HostAllocation::downcast(src)?;
    let dst = HostAllocation::downcast(dst)?;
    if src.same_as(dst) {
        return Err(EngineError::InvalidParameter(
            "source and destination share one allocation".into(),
        ));
    }
    if src.device_ptr() < dst.device_ptr() {
        let s = src.read();
        let mut d = dst.write();
        Ok(f(&s, &mut d))
    } else {
        let mut d = dst.write();
        let s = src.read();
        Ok(f(&s, &mut d))
    }
}

impl DeviceBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn create_stream(&self) -> Result<Box<dyn BackendStream>> {
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(HostStream { id }))
    }

    fn alloc(&self, bytes: usize) -> Result<Box<dyn DeviceAllocation>> {
        Ok(Box::new(HostAllocation::new(bytes)?))
    }

    fn upload(
        &self,
        _stream: &dyn BackendStream,
        src: &[u8],
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()> {
        let dst = HostAllocation::downcast(dst)?;
        let mut bytes = dst.write();
        copy.check_bounds(src.len(), bytes.len())?;
        copy_rows(src, &mut bytes, copy);
        Ok(())
    }

    fn download(
        &self,
        _stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &mut [u8],
        copy: &Copy2d,
    ) -> Result<()> {
        let src = HostAllocation::downcast(src)?;
        let bytes = src.read();
        copy.check_bounds(bytes.len(), dst.len())?;
        copy_rows(&bytes, dst, copy);
        Ok(())
    }

    fn copy(
        &self,
        _stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()> {
        with_pair(src, dst, |s, d| {
            copy.check_bounds(s.len(), d.len())?;
            copy_rows(s, d, copy);
            Ok(())
        })?
    }

    fn synchronize(&self, stream: &dyn BackendStream) -> Result<()> {
        trace!(?stream, "host stream synchronize");
        Ok(())
    }

    fn supports_conversion(&self, from: PixelFormat, to: PixelFormat) -> bool {
        conversion_kind(from, to).is_some()
    }

    fn convert(
        &self,
        _stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        color: ColorSpec,
    ) -> Result<()> {
        let (from, to) = (src.format(), dst.format());
        let kind = conversion_kind(from, to).ok_or_else(|| {
            EngineError::Unsupported(format!("host backend cannot convert {from} to {to}"))
        })?;
        src.check_same_size(dst)?;

        let (w, h) = (src.width() as usize, src.height() as usize);
        let sm = from.channel_map(src.height(), src.pitch());
        let dm = to.channel_map(dst.height(), dst.pitch());
        let coeffs = YuvCoefficients::new(color);
        trace!(%from, %to, ?kind, w, h, "host convert");
        vtc_core::host_copy_violation!("convert", "{from} -> {to} ran on host memory")?;

        with_pair(
            src.memory().allocation(),
            dst.memory().allocation(),
            |s, d| match kind {
                ConversionKind::Copy | ConversionKind::Repack | ConversionKind::Shuffle => {
                    kernels::copy_channels(
                        s,
                        &sm.channels[..sm.count],
                        d,
                        &dm.channels[..dm.count],
                        sm.chroma_shift,
                        w,
                        h,
                    )
                }
                ConversionKind::ExtractLuma => {
                    kernels::copy_channels(s, &sm.channels[..1], d, &dm.channels[..1], 0, w, h)
                }
                ConversionKind::YuvToRgb => kernels::yuv_to_rgb(
                    s,
                    &sm.channels,
                    sm.chroma_shift,
                    d,
                    &dm.channels,
                    w,
                    h,
                    &coeffs,
                ),
                ConversionKind::RgbToYuv => kernels::rgb_to_yuv(
                    s,
                    &sm.channels,
                    d,
                    &dm.channels,
                    dm.chroma_shift,
                    w,
                    h,
                    &coeffs,
                ),
            },
        )
    }

    fn resize(
        &self,
        _stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        interpolation: Interpolation,
    ) -> Result<()> {
        if src.format() != dst.format() {
            return Err(EngineError::FormatMismatch {
                expected: src.format(),
                actual: dst.format(),
            });
        }
        trace!(
            src_w = src.width(),
            src_h = src.height(),
            dst_w = dst.width(),
            dst_h = dst.height(),
            ?interpolation,
            "host resize"
        );
        vtc_core::host_copy_violation!("resize", "{} resize ran on host memory", src.format())?;
        with_pair(src.memory().allocation(), dst.memory().allocation(), |s, d| {
            for index in 0..src.format().planes().len() {
                let (src_plane, src_size, channels) = src.plane_channel(index);
                let (dst_plane, dst_size, _) = dst.plane_channel(index);
                kernels::resize_plane(
                    s,
                    src_plane,
                    src_size,
                    d,
                    dst_plane,
                    dst_size,
                    channels,
                    interpolation,
                );
            }
        })
    }

    fn open_decoder(
        &self,
        ctx: &Arc<ExecutionContext>,
        config: &DecoderConfig,
    ) -> Result<Box<dyn DecodeSession>> {
        Ok(Box::new(RawDecoder::open(ctx, config)?))
    }

    fn open_encoder(
        &self,
        ctx: &Arc<ExecutionContext>,
        config: &EncoderConfig,
    ) -> Result<Box<dyn EncodeSession>> {
        Ok(Box::new(RawEncoder::open(ctx, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtc_core::types::{ColorRange, ColorSpace};

    fn ctx() -> Arc<ExecutionContext> {
        execution_context(&ContextConfig::default()).expect("host context")
    }

    /// Fill a surface from a dense host buffer.
    fn upload(ctx: &ExecutionContext, surface: &Surface, data: &[u8]) {
        for copy in Copy2d::host_to_surface(surface) {
            ctx.backend()
                .upload(
                    ctx.stream().handle(),
                    data,
                    surface.memory().allocation(),
                    &copy,
                )
                .expect("upload");
        }
    }

    fn download(ctx: &ExecutionContext, surface: &Surface) -> Vec<u8> {
        let f = surface.format();
        let mut out = vec![0u8; f.dense_size(surface.width(), surface.height())];
        for copy in Copy2d::surface_to_host(surface) {
            ctx.backend()
                .download(
                    ctx.stream().handle(),
                    surface.memory().allocation(),
                    &mut out,
                    &copy,
                )
                .expect("download");
        }
        out
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn upload_download_preserves_pitched_planes() {
        let ctx = ctx();
        let s = ctx
            .device()
            .alloc_surface(6, 4, PixelFormat::Yuv420)
            .expect("alloc");
        assert_eq!(s.pitch(), 256);
        let data = pattern(PixelFormat::Yuv420.dense_size(6, 4));
        upload(&ctx, &s, &data);
        assert_eq!(download(&ctx, &s), data);
    }

    #[test]
    fn nv12_yuv420_repack_is_lossless() {
        let ctx = ctx();
        let dev = ctx.device();
        let nv12 = dev.alloc_surface(8, 4, PixelFormat::Nv12).expect("alloc");
        let planar = dev.alloc_surface(8, 4, PixelFormat::Yuv420).expect("alloc");
        let back = dev.alloc_surface(8, 4, PixelFormat::Nv12).expect("alloc");
        let data = pattern(PixelFormat::Nv12.dense_size(8, 4));
        upload(&ctx, &nv12, &data);

        let backend = ctx.backend();
        let stream = ctx.stream().handle();
        backend
            .convert(stream, &nv12, &planar, ColorSpec::default())
            .expect("nv12 -> yuv420");
        let planar_bytes = download(&ctx, &planar);
        // First U sample is the first byte of the interleaved UV plane.
        assert_eq!(planar_bytes[32], data[32]);
        assert_eq!(planar_bytes[32 + 8], data[33]);

        backend
            .convert(stream, &planar, &back, ColorSpec::default())
            .expect("yuv420 -> nv12");
        assert_eq!(download(&ctx, &back), data);
    }

    #[test]
    fn rgb_bgr_shuffle_swaps_red_and_blue() {
        let ctx = ctx();
        let dev = ctx.device();
        let rgb = dev.alloc_surface(2, 1, PixelFormat::Rgb).expect("alloc");
        let bgr = dev.alloc_surface(2, 1, PixelFormat::Bgr).expect("alloc");
        upload(&ctx, &rgb, &[10, 20, 30, 40, 50, 60]);
        ctx.backend()
            .convert(ctx.stream().handle(), &rgb, &bgr, ColorSpec::default())
            .expect("shuffle");
        assert_eq!(download(&ctx, &bgr), [30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn nv12_to_rgb_renders_neutral_grey() {
        let ctx = ctx();
        let dev = ctx.device();
        let nv12 = dev.alloc_surface(4, 2, PixelFormat::Nv12).expect("alloc");
        let rgb = dev.alloc_surface(4, 2, PixelFormat::Rgb).expect("alloc");
        upload(&ctx, &nv12, &[128u8; 12]);
        let full = ColorSpec {
            space: ColorSpace::Bt601,
            range: ColorRange::Full,
        };
        ctx.backend()
            .convert(ctx.stream().handle(), &nv12, &rgb, full)
            .expect("convert");
        assert!(download(&ctx, &rgb).iter().all(|&v| v == 128));
    }

    #[test]
    fn unsupported_pair_and_geometry_are_rejected() {
        let ctx = ctx();
        let dev = ctx.device();
        let y = dev.alloc_surface(4, 4, PixelFormat::Y).expect("alloc");
        let rgb = dev.alloc_surface(4, 4, PixelFormat::Rgb).expect("alloc");
        let small = dev.alloc_surface(2, 2, PixelFormat::Y).expect("alloc");
        let backend = ctx.backend();
        assert!(!backend.supports_conversion(PixelFormat::Y, PixelFormat::Rgb));

        let err = backend
            .convert(ctx.stream().handle(), &y, &rgb, ColorSpec::default())
            .expect_err("y -> rgb is not in the table");
        assert!(err.to_string().contains("cannot convert y to rgb"));

        let err = backend
            .convert(ctx.stream().handle(), &y, &small, ColorSpec::default())
            .expect_err("geometry differs");
        assert!(err.to_string().contains("4x4 -> 2x2"));
    }

    #[test]
    fn resize_scales_every_plane() {
        let ctx = ctx();
        let dev = ctx.device();
        let src = dev.alloc_surface(8, 8, PixelFormat::Nv12).expect("alloc");
        let dst = dev.alloc_surface(4, 4, PixelFormat::Nv12).expect("alloc");
        upload(&ctx, &src, &vec![77u8; PixelFormat::Nv12.dense_size(8, 8)]);
        ctx.backend()
            .resize(ctx.stream().handle(), &src, &dst, Interpolation::Bilinear)
            .expect("resize");
        let out = download(&ctx, &dst);
        assert_eq!(out.len(), 24);
        assert!(out.iter().all(|&v| v == 77));

        let rgb = dev.alloc_surface(4, 4, PixelFormat::Rgb).expect("alloc");
        let err = ctx
            .backend()
            .resize(ctx.stream().handle(), &src, &rgb, Interpolation::Nearest)
            .expect_err("format differs");
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn aliasing_copy_is_rejected() {
        let ctx = ctx();
        let s = ctx
            .device()
            .alloc_surface(4, 4, PixelFormat::Y)
            .expect("alloc");
        let alloc = s.memory().allocation();
        let copy = Copy2d::surface_to_surface(&s, &s)[0];
        let err = ctx
            .backend()
            .copy(ctx.stream().handle(), alloc, alloc, &copy)
            .expect_err("in-place copy");
        assert!(err.to_string().contains("share one allocation"));
    }
}
