//! NVENC → NVDEC round trips on a real GPU.

use std::sync::Arc;

use vtc_core::backend::Copy2d;
use vtc_core::buffer::{Packet, Surface};
use vtc_core::codec_traits::{DecoderConfig, EncoderConfig};
use vtc_core::context::{ContextConfig, ExecutionContext};
use vtc_core::encoder_options::{EncoderOptions, RateControl};
use vtc_core::types::{CodecId, PixelFormat};

const W: u32 = 320;
const H: u32 = 240;

fn nvidia() -> Arc<ExecutionContext> {
    vtc_nvcodec::execution_context(0, &ContextConfig::default()).expect("nvidia device 0")
}

fn frame(ctx: &ExecutionContext, index: u8) -> Surface {
    let mut surface = ctx
        .device()
        .alloc_surface(W, H, PixelFormat::Nv12)
        .expect("alloc");
    let data: Vec<u8> = (0..PixelFormat::Nv12.dense_size(W, H))
        .map(|i| (i as u8).wrapping_add(index.wrapping_mul(7)))
        .collect();
    for copy in Copy2d::host_to_surface(&surface) {
        ctx.backend()
            .upload(ctx.stream().handle(), &data, surface.memory().allocation(), &copy)
            .expect("upload");
    }
    surface.pts = i64::from(index) * 33_333;
    surface
}

fn encode(ctx: &Arc<ExecutionContext>, codec: CodecId, b_frames: u32, count: u8) -> Vec<Packet> {
    let config = EncoderConfig {
        options: EncoderOptions {
            codec,
            b_frames,
            gop_length: 30,
            rate_control: RateControl::Cbr { bitrate: 2_000_000 },
            ..EncoderOptions::default()
        },
        format: PixelFormat::Nv12,
        width: W,
        height: H,
    };
    let mut encoder = ctx.backend().open_encoder(ctx, &config).expect("open encoder");
    let mut packets = Vec::new();
    for i in 0..count {
        packets.extend(encoder.encode(&frame(ctx, i)).expect("encode"));
    }
    packets.extend(encoder.flush().expect("flush"));
    packets
}

#[test]
#[ignore = "requires an NVIDIA GPU with NVDEC/NVENC"]
fn h264_with_b_frames_keeps_timestamps_ordered() {
    let ctx = nvidia();
    let packets = encode(&ctx, CodecId::H264, 2, 12);
    assert_eq!(packets.len(), 12);
    assert!(packets[0].is_keyframe);
    assert!(packets.windows(2).all(|w| w[0].dts < w[1].dts));
    assert!(packets.iter().all(|p| p.dts <= p.pts));
    let mut pts: Vec<_> = packets.iter().map(|p| p.pts).collect();
    pts.sort_unstable();
    assert_eq!(pts, (0..12).map(|i| i * 33_333).collect::<Vec<i64>>());
}

#[test]
#[ignore = "requires an NVIDIA GPU with NVDEC/NVENC"]
fn hevc_round_trip_restores_display_order() {
    let ctx = nvidia();
    let packets = encode(&ctx, CodecId::Hevc, 2, 10);

    let mut decoder = ctx
        .backend()
        .open_decoder(
            &ctx,
            &DecoderConfig {
                codec: CodecId::Hevc,
                coded_width: W,
                coded_height: H,
            },
        )
        .expect("open decoder");
    let mut pictures = Vec::new();
    let mut drain = |decoder: &mut Box<dyn vtc_core::codec_traits::DecodeSession>| {
        while decoder.ready() > 0 {
            let seq = decoder.sequence().expect("sequence known");
            let target = ctx
                .device()
                .alloc_surface(seq.width, seq.height, seq.format)
                .expect("alloc");
            pictures.push(decoder.output_picture(&target).expect("picture"));
        }
    };
    for packet in &packets {
        decoder.submit(Some(packet)).expect("submit");
        drain(&mut decoder);
    }
    decoder.submit(None).expect("eos");
    drain(&mut decoder);

    assert_eq!(pictures.len(), 10);
    assert!(pictures[0].is_keyframe);
    assert!(pictures.windows(2).all(|w| w[0].pts < w[1].pts));
    let seq = decoder.sequence().expect("sequence");
    assert_eq!((seq.width, seq.height), (W, H));
}

#[test]
#[ignore = "requires an NVIDIA GPU with NVDEC/NVENC"]
fn wrong_geometry_is_rejected_before_nvenc() {
    let ctx = nvidia();
    let config = EncoderConfig {
        options: EncoderOptions::default(),
        format: PixelFormat::Nv12,
        width: W,
        height: H,
    };
    let mut encoder = ctx.backend().open_encoder(&ctx, &config).expect("open encoder");
    let small = ctx
        .device()
        .alloc_surface(W / 2, H / 2, PixelFormat::Nv12)
        .expect("alloc");
    let err = encoder.encode(&small).expect_err("geometry mismatch");
    assert!(err.to_string().contains(&format!("{}", W / 2)));
}
