use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use vtc_core::buffer::{Packet, Token};
use vtc_core::codec_traits::{EncodeSession, EncoderConfig};
use vtc_core::context::ExecutionContext;
use vtc_core::encoder_options::EncoderOptions;
use vtc_core::error::Result;
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::PixelFormat;

use super::expect_surface;

/// Encodes device surfaces into coded packets.
///
/// At most one packet leaves per execute; surplus packets wait in a queue.
/// An empty input flushes the session.
pub struct EncodeFrame {
    core: TaskCore,
    ctx: Arc<ExecutionContext>,
    session: Box<dyn EncodeSession>,
    options: EncoderOptions,
    format: PixelFormat,
    width: u32,
    height: u32,
    pending: VecDeque<Packet>,
    flushed: bool,
}

impl EncodeFrame {
    pub const NUM_INPUTS: usize = 1;
    pub const NUM_OUTPUTS: usize = 1;

    pub fn make(
        ctx: &Arc<ExecutionContext>,
        options: EncoderOptions,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        format.check_dimensions(width, height)?;
        options.validate()?;
        options.validate_input(format)?;
        let session = ctx.backend().open_encoder(
            ctx,
            &EncoderConfig {
                options: options.clone(),
                format,
                width,
                height,
            },
        )?;
        info!(
            codec = ?options.codec,
            %format,
            width,
            height,
            gop = options.gop_length,
            b_frames = options.b_frames,
            backend = ctx.backend().name(),
            "encode session opened"
        );
        if options.b_frames > 0 {
            info!(
                min_decode_pool = options.min_decode_pool(),
                "encoder holds reordered surfaces; a decode pool feeding it must be at least this large"
            );
        }
        Ok(Self {
            core: TaskCore::new("encode", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            ctx: Arc::clone(ctx),
            session,
            options,
            format,
            width,
            height,
            pending: VecDeque::new(),
            flushed: false,
        })
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Packets produced but not yet published.
    pub fn queued_packets(&self) -> usize {
        self.pending.len()
    }
}

impl Stage for EncodeFrame {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<Step> {
        match self.core.take_input(0) {
            Some(token) => {
                let surface = expect_surface("encode", token)?;
                self.ctx.check_surface(&surface)?;
                surface.expect_layout(self.width, self.height, self.format)?;
                let packets = self.session.encode(&surface)?;
                self.pending.extend(packets);
            }
            None if !self.flushed => {
                let packets = self.session.flush()?;
                debug!(packets = packets.len(), "encode: flushed");
                self.pending.extend(packets);
                self.flushed = true;
            }
            None => {}
        }

        match self.pending.pop_front() {
            Some(packet) => {
                self.core.publish(0, Token::Packet(packet))?;
                Ok(Step::Done)
            }
            None if self.flushed => Ok(Step::Exhausted),
            None => Ok(Step::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use vtc_core::codec_traits::DecoderConfig;
    use vtc_core::task::{Task, TaskExecStatus};
    use vtc_core::types::{CodecId, Rational};

    use super::*;
    use crate::stages::test_support::{host_ctx, pattern_frame, upload};

    fn raw_options(b_frames: u32) -> EncoderOptions {
        EncoderOptions {
            codec: CodecId::Raw,
            gop_length: 30,
            b_frames,
            framerate: Rational::new(30, 1),
            ..EncoderOptions::default()
        }
    }

    #[test]
    fn lookahead_packets_drain_one_per_execute() {
        let ctx = host_ctx();
        let mut encode =
            EncodeFrame::make(&ctx, raw_options(2), PixelFormat::Nv12, 16, 8).expect("make");
        assert_eq!((encode.num_inputs(), encode.num_outputs()), (1, 1));

        let mut packets = Vec::new();
        for i in 0..5 {
            let mut surface = upload(&ctx, &pattern_frame(16, 8, PixelFormat::Nv12, |b| b as u8));
            surface.pts = i * 1_000;
            encode.set_input(0, Token::Device(surface)).expect("set");
            assert_eq!(encode.execute(), TaskExecStatus::Success);
            if let Some(p) = encode.output(0).and_then(Token::as_packet) {
                packets.push(p.clone());
            }
        }
        loop {
            match encode.execute() {
                TaskExecStatus::Success => packets.push(
                    encode
                        .output(0)
                        .and_then(Token::as_packet)
                        .expect("flushed packet")
                        .clone(),
                ),
                TaskExecStatus::EndOfStream => break,
                TaskExecStatus::Fail => panic!("flush failed: {:?}", encode.last_error()),
            }
        }
        assert_eq!(packets.len(), 5);
        assert!(packets[0].is_keyframe);
        assert_eq!(encode.queued_packets(), 0);
        assert_eq!(encode.execute(), TaskExecStatus::EndOfStream);
    }

    #[test]
    fn decode_then_encode_never_fails() {
        let ctx = host_ctx();
        let mut source =
            EncodeFrame::make(&ctx, raw_options(1), PixelFormat::Nv12, 16, 8).expect("make");
        let mut coded = Vec::new();
        for i in 0..4u8 {
            let surface = upload(&ctx, &pattern_frame(16, 8, PixelFormat::Nv12, |b| b as u8 ^ i));
            source.set_input(0, Token::Device(surface)).expect("set");
            source.execute();
            coded.extend(source.output(0).and_then(Token::as_packet).cloned());
        }
        while source.execute() == TaskExecStatus::Success {
            coded.extend(source.output(0).and_then(Token::as_packet).cloned());
        }
        assert_eq!(coded.len(), 4);

        let mut decoder = ctx
            .backend()
            .open_decoder(
                &ctx,
                &DecoderConfig {
                    codec: CodecId::Raw,
                    coded_width: 16,
                    coded_height: 8,
                },
            )
            .expect("decoder");
        let mut encode =
            EncodeFrame::make(&ctx, raw_options(0), PixelFormat::Nv12, 16, 8).expect("make");
        let mut out = 0;
        for packet in &coded {
            decoder.submit(Some(packet)).expect("submit");
            while decoder.ready() > 0 {
                let surface = ctx
                    .device()
                    .alloc_surface(16, 8, PixelFormat::Nv12)
                    .expect("alloc");
                decoder.output_picture(&surface).expect("picture");
                encode.set_input(0, Token::Device(surface)).expect("set");
                assert_ne!(encode.execute(), TaskExecStatus::Fail);
                out += usize::from(encode.output(0).is_some());
            }
        }
        decoder.submit(None).expect("drain");
        while decoder.ready() > 0 {
            let surface = ctx
                .device()
                .alloc_surface(16, 8, PixelFormat::Nv12)
                .expect("alloc");
            decoder.output_picture(&surface).expect("picture");
            encode.set_input(0, Token::Device(surface)).expect("set");
            assert_ne!(encode.execute(), TaskExecStatus::Fail);
            out += usize::from(encode.output(0).is_some());
        }
        while encode.execute() == TaskExecStatus::Success {
            out += 1;
        }
        assert!(out <= coded.len());
        assert_eq!(encode.execute(), TaskExecStatus::EndOfStream);
    }

    #[test]
    fn invalid_options_fail_at_make() {
        let ctx = host_ctx();
        let mut bad = raw_options(0);
        bad.gop_length = 0;
        assert!(EncodeFrame::make(&ctx, bad, PixelFormat::Nv12, 16, 8).is_err());
        assert!(EncodeFrame::make(&ctx, raw_options(0), PixelFormat::Rgb, 16, 8).is_err());
        assert!(EncodeFrame::make(&ctx, raw_options(0), PixelFormat::Nv12, 15, 8).is_err());
        assert!(EncodeFrame::make(&ctx, raw_options(0), PixelFormat::Nv12, 0, 8).is_err());
    }

    #[test]
    fn mismatched_surface_fails() {
        let ctx = host_ctx();
        let mut encode =
            EncodeFrame::make(&ctx, raw_options(0), PixelFormat::Nv12, 16, 8).expect("make");
        let surface = upload(&ctx, &pattern_frame(32, 8, PixelFormat::Nv12, |_| 0));
        encode.set_input(0, Token::Device(surface)).expect("set");
        assert_eq!(encode.execute(), TaskExecStatus::Fail);
        assert_eq!(encode.last_error().map(|e| e.error_code()), Some(501));
    }
}
