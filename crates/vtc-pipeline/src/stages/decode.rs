use std::sync::Arc;

use tracing::{debug, info};

use vtc_core::buffer::Token;
use vtc_core::codec_traits::{DecodeSession, DecoderConfig};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_core::surface_pool::SurfacePool;
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::{CodecId, check_max_dimension};

use super::expect_packet;

/// Decodes coded packets into pooled device surfaces.
///
/// Pictures leave in display order, at most one per execute. An empty
/// input drains the session; `EndOfStream` follows the last picture.
pub struct DecodeFrame {
    core: TaskCore,
    ctx: Arc<ExecutionContext>,
    session: Box<dyn DecodeSession>,
    pool: SurfacePool,
    draining: bool,
    /// `(width, height, elem_size)` of decoded pictures.
    frame_params: Option<(u32, u32, usize)>,
    pictures: u64,
}

impl DecodeFrame {
    pub const NUM_INPUTS: usize = 1;
    pub const NUM_OUTPUTS: usize = 1;

    pub fn make(
        ctx: &Arc<ExecutionContext>,
        codec: CodecId,
        pool_size: usize,
        coded_width: u32,
        coded_height: u32,
    ) -> Result<Self> {
        if coded_width == 0 || coded_height == 0 {
            return Err(EngineError::InvalidParameter(format!(
                "decode needs a non-zero coded size, got {coded_width}x{coded_height}"
            )));
        }
        check_max_dimension(coded_width, coded_height)?;
        let pool = SurfacePool::new(pool_size)?;
        let session = ctx.backend().open_decoder(
            ctx,
            &DecoderConfig {
                codec,
                coded_width,
                coded_height,
            },
        )?;
        info!(
            ?codec,
            pool_size,
            coded_width,
            coded_height,
            backend = ctx.backend().name(),
            "decode session opened"
        );
        Ok(Self {
            core: TaskCore::new("decode", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            ctx: Arc::clone(ctx),
            session,
            pool,
            draining: false,
            frame_params: None,
            pictures: 0,
        })
    }

    /// `(width, height, elem_size)` once the first picture was decoded.
    pub fn decoded_frame_params(&self) -> Option<(u32, u32, usize)> {
        self.frame_params
    }

    /// Row pitch of the pooled surfaces once they exist.
    pub fn device_frame_pitch(&self) -> Option<usize> {
        self.frame_params.and(self.pool.pitch())
    }

    /// Pool slots still referenced downstream.
    pub fn surfaces_in_use(&self) -> usize {
        self.pool.in_use()
    }
}

impl Stage for DecodeFrame {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<Step> {
        match self.core.take_input(0) {
            Some(token) => {
                if self.draining {
                    return Err(EngineError::Decode(
                        "packet received after the decoder started draining".into(),
                    ));
                }
                let packet = expect_packet("decode", token)?;
                self.session.submit(Some(&packet))?;
            }
            None if !self.draining => {
                debug!(pictures = self.pictures, "decode: draining");
                self.session.submit(None)?;
                self.draining = true;
            }
            None => {}
        }

        if self.session.ready() == 0 {
            return Ok(if self.draining {
                Step::Exhausted
            } else {
                Step::Done
            });
        }

        let sequence = self.session.sequence().ok_or_else(|| {
            EngineError::InvariantViolation("decoder has pictures but no sequence header".into())
        })?;
        self.pool.ensure_layout(
            self.ctx.device(),
            sequence.width,
            sequence.height,
            sequence.format,
        )?;
        let mut surface = self.pool.acquire()?;
        let picture = self.session.output_picture(&surface)?;
        surface.pts = picture.pts;

        self.frame_params = Some((
            sequence.width,
            sequence.height,
            sequence.format.element_bytes(),
        ));
        self.pictures += 1;
        debug!(
            pts = picture.pts,
            keyframe = picture.is_keyframe,
            in_use = self.pool.in_use(),
            "decoded picture"
        );
        self.core.publish(0, Token::Device(surface))?;
        Ok(Step::Done)
    }
}

#[cfg(test)]
mod tests {
    use vtc_core::buffer::{Packet, Surface};
    use vtc_core::codec_traits::EncoderConfig;
    use vtc_core::encoder_options::EncoderOptions;
    use vtc_core::task::{Task, TaskExecStatus};
    use vtc_core::types::{PixelFormat, Rational};

    use super::*;
    use crate::stages::test_support::{host_ctx, pattern_frame, upload};

    /// Reference-codec packets for `frames` pictures, in coding order.
    fn raw_packets(ctx: &Arc<ExecutionContext>, frames: usize, b_frames: u32) -> Vec<Packet> {
        let options = EncoderOptions {
            codec: CodecId::Raw,
            gop_length: 8,
            b_frames,
            framerate: Rational::new(30, 1),
            ..EncoderOptions::default()
        };
        let mut encoder = ctx
            .backend()
            .open_encoder(
                ctx,
                &EncoderConfig {
                    options,
                    format: PixelFormat::Nv12,
                    width: 16,
                    height: 8,
                },
            )
            .expect("encoder");
        let mut packets = Vec::new();
        for i in 0..frames {
            let frame = pattern_frame(16, 8, PixelFormat::Nv12, |b| (b + i) as u8);
            let mut surface = upload(ctx, &frame);
            surface.pts = i as i64 * 33_333;
            packets.extend(encoder.encode(&surface).expect("encode"));
        }
        packets.extend(encoder.flush().expect("flush"));
        packets
    }

    fn take_surface(task: &dyn Task) -> Option<Surface> {
        task.output(0).and_then(Token::as_surface).cloned()
    }

    #[test]
    fn decodes_every_packet_in_display_order() {
        let ctx = host_ctx();
        let packets = raw_packets(&ctx, 6, 2);
        assert_eq!(packets.len(), 6);
        let mut decode = DecodeFrame::make(&ctx, CodecId::Raw, 4, 16, 8).expect("make");
        assert!(decode.decoded_frame_params().is_none());
        assert!(decode.device_frame_pitch().is_none());

        let mut pts = Vec::new();
        for packet in packets {
            decode
                .set_input(0, Token::Packet(packet))
                .expect("set input");
            assert_eq!(decode.execute(), TaskExecStatus::Success);
            if let Some(surface) = take_surface(&decode) {
                pts.push(surface.pts);
            }
            decode.clear_inputs();
        }
        loop {
            match decode.execute() {
                TaskExecStatus::Success => {
                    pts.push(take_surface(&decode).expect("drained picture").pts);
                }
                TaskExecStatus::EndOfStream => break,
                TaskExecStatus::Fail => panic!("drain failed: {:?}", decode.last_error()),
            }
        }
        assert_eq!(pts, (0..6).map(|i| i * 33_333).collect::<Vec<_>>());
        assert_eq!(decode.decoded_frame_params(), Some((16, 8, 1)));
        assert_eq!(decode.device_frame_pitch(), Some(256));
        assert_eq!(decode.execute(), TaskExecStatus::EndOfStream);
    }

    #[test]
    fn pool_exhaustion_fails_and_released_slots_are_reused() {
        let ctx = host_ctx();
        let packets = raw_packets(&ctx, 4, 0);

        let mut decode = DecodeFrame::make(&ctx, CodecId::Raw, 2, 16, 8).expect("make");
        let mut held = Vec::new();
        for packet in packets.iter().take(2) {
            decode
                .set_input(0, Token::Packet(packet.clone()))
                .expect("set input");
            assert_eq!(decode.execute(), TaskExecStatus::Success);
            held.push(take_surface(&decode).expect("picture"));
        }
        assert_eq!(decode.surfaces_in_use(), 2);
        decode
            .set_input(0, Token::Packet(packets[2].clone()))
            .expect("set input");
        assert_eq!(decode.execute(), TaskExecStatus::Fail);
        let err = decode.last_error().expect("error");
        assert_eq!(err.error_code(), 700);
        assert!(err.to_string().contains("exhausted"));

        let mut decode = DecodeFrame::make(&ctx, CodecId::Raw, 2, 16, 8).expect("make");
        for packet in &packets {
            decode
                .set_input(0, Token::Packet(packet.clone()))
                .expect("set input");
            assert_eq!(decode.execute(), TaskExecStatus::Success);
            // Dropping every reference returns the slot.
            decode.clear_outputs();
            assert_eq!(decode.surfaces_in_use(), 0);
        }
        drop(held);
    }

    #[test]
    fn invalid_parameters_fail_at_make() {
        let ctx = host_ctx();
        for (pool, w, h) in [(0, 16, 8), (4, 0, 8), (4, 16, 0)] {
            assert!(DecodeFrame::make(&ctx, CodecId::Raw, pool, w, h).is_err());
        }
        let err = DecodeFrame::make(&ctx, CodecId::Hevc, 4, 16, 8)
            .err()
            .expect("host backend only decodes raw");
        assert!(err.to_string().contains("raw reference codec"));
    }

    #[test]
    fn wrong_token_kind_is_a_failure() {
        let ctx = host_ctx();
        let mut decode = DecodeFrame::make(&ctx, CodecId::Raw, 2, 16, 8).expect("make");
        let frame = pattern_frame(16, 8, PixelFormat::Nv12, |_| 0);
        decode.set_input(0, Token::Host(frame)).expect("set input");
        assert_eq!(decode.execute(), TaskExecStatus::Fail);
        assert!(
            decode
                .last_error()
                .expect("error")
                .to_string()
                .contains("expects a packet")
        );
    }
}
