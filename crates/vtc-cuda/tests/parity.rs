//! CUDA kernels against the host reference backend.

use std::sync::Arc;

use vtc_core::backend::Copy2d;
use vtc_core::buffer::Surface;
use vtc_core::context::{ContextConfig, ExecutionContext};
use vtc_core::types::{ColorSpec, Interpolation, PixelFormat};

fn cuda() -> Arc<ExecutionContext> {
    vtc_cuda::execution_context(0, &ContextConfig::default()).expect("cuda device 0")
}

fn host() -> Arc<ExecutionContext> {
    vtc_host::execution_context(&ContextConfig::default()).expect("host context")
}

fn upload(ctx: &ExecutionContext, surface: &Surface, data: &[u8]) {
    for copy in Copy2d::host_to_surface(surface) {
        ctx.backend()
            .upload(ctx.stream().handle(), data, surface.memory().allocation(), &copy)
            .expect("upload");
    }
}

fn download(ctx: &ExecutionContext, surface: &Surface) -> Vec<u8> {
    let mut out = vec![0u8; surface.format().dense_size(surface.width(), surface.height())];
    for copy in Copy2d::surface_to_host(surface) {
        ctx.backend()
            .download(ctx.stream().handle(), surface.memory().allocation(), &mut out, &copy)
            .expect("download");
    }
    ctx.synchronize().expect("sync");
    out
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 241) as u8).collect()
}

/// Run `from → to` on both backends and return (host, cuda) bytes.
fn convert_on_both(from: PixelFormat, to: PixelFormat, w: u32, h: u32) -> (Vec<u8>, Vec<u8>) {
    let data = pattern(from.dense_size(w, h));
    let mut outputs = Vec::new();
    for ctx in [host(), cuda()] {
        let src = ctx.device().alloc_surface(w, h, from).expect("alloc");
        let dst = ctx.device().alloc_surface(w, h, to).expect("alloc");
        upload(&ctx, &src, &data);
        ctx.backend()
            .convert(ctx.stream().handle(), &src, &dst, ColorSpec::default())
            .expect("convert");
        outputs.push(download(&ctx, &dst));
    }
    let cuda = outputs.pop().expect("cuda output");
    let host = outputs.pop().expect("host output");
    (host, cuda)
}

fn max_diff(a: &[u8], b: &[u8]) -> u8 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x.abs_diff(*y)).max().unwrap_or(0)
}

#[test]
#[ignore = "requires a CUDA device"]
fn pitched_round_trip_is_exact() {
    let ctx = cuda();
    let s = ctx
        .device()
        .alloc_surface(70, 6, PixelFormat::Yuv420)
        .expect("alloc");
    assert_eq!(s.pitch(), 256);
    let data = pattern(PixelFormat::Yuv420.dense_size(70, 6));
    upload(&ctx, &s, &data);
    assert_eq!(download(&ctx, &s), data);
}

#[test]
#[ignore = "requires a CUDA device"]
fn copies_match_the_host_bit_for_bit() {
    for (from, to) in [
        (PixelFormat::Nv12, PixelFormat::Yuv420),
        (PixelFormat::Yuv420, PixelFormat::Nv12),
        (PixelFormat::Nv12, PixelFormat::Y),
        (PixelFormat::Rgb, PixelFormat::Bgr),
        (PixelFormat::Rgb, PixelFormat::RgbPlanar),
        (PixelFormat::Nv12, PixelFormat::Nv12),
    ] {
        let (host, cuda) = convert_on_both(from, to, 64, 32);
        assert_eq!(host, cuda, "{from} -> {to}");
    }
}

#[test]
#[ignore = "requires a CUDA device"]
fn colour_math_matches_the_host_within_one() {
    for (from, to) in [
        (PixelFormat::Nv12, PixelFormat::Rgb),
        (PixelFormat::Yuv420, PixelFormat::Rgb),
        (PixelFormat::Rgb, PixelFormat::Nv12),
        (PixelFormat::Bgr, PixelFormat::Nv12),
    ] {
        let (host, cuda) = convert_on_both(from, to, 64, 32);
        assert!(max_diff(&host, &cuda) <= 1, "{from} -> {to}");
    }
}

#[test]
#[ignore = "requires a CUDA device"]
fn resize_matches_the_host_within_one() {
    let data = pattern(PixelFormat::Nv12.dense_size(96, 64));
    for interpolation in [Interpolation::Nearest, Interpolation::Bilinear] {
        let mut outputs = Vec::new();
        for ctx in [host(), cuda()] {
            let src = ctx
                .device()
                .alloc_surface(96, 64, PixelFormat::Nv12)
                .expect("alloc");
            let dst = ctx
                .device()
                .alloc_surface(64, 36, PixelFormat::Nv12)
                .expect("alloc");
            upload(&ctx, &src, &data);
            ctx.backend()
                .resize(ctx.stream().handle(), &src, &dst, interpolation)
                .expect("resize");
            outputs.push(download(&ctx, &dst));
        }
        assert!(
            max_diff(&outputs[0], &outputs[1]) <= 1,
            "{interpolation:?}"
        );
    }
}

#[test]
#[ignore = "requires a CUDA device"]
fn codec_sessions_point_to_the_nvidia_backend() {
    let ctx = cuda();
    let err = ctx
        .backend()
        .open_decoder(
            &ctx,
            &vtc_core::codec_traits::DecoderConfig {
                codec: vtc_core::types::CodecId::H264,
                coded_width: 64,
                coded_height: 64,
            },
        )
        .err()
        .expect("no decoder");
    assert!(err.to_string().contains("use the nvidia backend"));
}

#[test]
#[ignore = "requires a CUDA device"]
fn host_surfaces_are_rejected() {
    let cuda = cuda();
    let host = host();
    let foreign = host
        .device()
        .alloc_surface(8, 8, PixelFormat::Y)
        .expect("alloc");
    let local = cuda
        .device()
        .alloc_surface(8, 8, PixelFormat::Y)
        .expect("alloc");
    let err = cuda
        .backend()
        .convert(cuda.stream().handle(), &foreign, &local, ColorSpec::default())
        .expect_err("foreign memory");
    assert!(err.to_string().contains("does not belong to the cuda backend"));
}
