//! Reference codec for [`CodecId::Raw`].
//!
//! Pictures are stored uncompressed (dense NV12) behind a small header, but
//! the coding structure is real: the encoder holds up to `b_frames` pictures
//! of lookahead and emits each anchor (I/P) before the B pictures it
//! precedes in display order, and the decoder restores display order with a
//! reorder buffer. Pipelines built on the host backend therefore see the
//! same "no output yet" / "drain on flush" behaviour as a hardware codec.
//!
//! # Packet layout
//!
//! ```text
//! 0..4    magic "VTCF"
//! 4..8    width  (u32 LE)
//! 8..12   height (u32 LE)
//! 12      frame type (0 = I, 1 = P, 2 = B)
//! 13..16  reserved
//! 16..24  display index (u64 LE)
//! 24..    NV12 picture, planes packed without row padding
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};
use vtc_core::backend::Copy2d;
use vtc_core::buffer::{Packet, StreamKind, Surface};
use vtc_core::codec_traits::{
    DecodeSession, DecoderConfig, EncodeSession, EncoderConfig, PictureInfo, SequenceInfo,
};
use vtc_core::context::ExecutionContext;
use vtc_core::encoder_options::EncoderOptions;
use vtc_core::error::{EngineError, Result};
use vtc_core::host_copy_violation;
use vtc_core::types::{CodecId, PixelFormat};

pub const RAW_MAGIC: [u8; 4] = *b"VTCF";
pub const RAW_HEADER_LEN: usize = 24;

/// Picture coding type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
    B,
}

impl FrameType {
    fn to_byte(self) -> u8 {
        match self {
            Self::I => 0,
            Self::P => 1,
            Self::B => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::I),
            1 => Ok(Self::P),
            2 => Ok(Self::B),
            other => Err(EngineError::Decode(format!("unknown frame type {other}"))),
        }
    }
}

/// Header of one reference-codec packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrameHeader {
    pub width: u32,
    pub height: u32,
    pub frame_type: FrameType,
    pub display_index: u64,
}

impl RawFrameHeader {
    pub fn write(&self, out: &mut BytesMut) {
        out.extend_from_slice(&RAW_MAGIC);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&[self.frame_type.to_byte(), 0, 0, 0]);
        out.extend_from_slice(&self.display_index.to_le_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RAW_HEADER_LEN {
            return Err(EngineError::Decode(format!(
                "packet of {} bytes is shorter than the {RAW_HEADER_LEN}-byte header",
                data.len()
            )));
        }
        if data[..4] != RAW_MAGIC {
            return Err(EngineError::Decode("bad reference codec magic".into()));
        }
        let u32_at =
            |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let mut index = [0u8; 8];
        index.copy_from_slice(&data[16..24]);
        let header = Self {
            width: u32_at(4),
            height: u32_at(8),
            frame_type: FrameType::from_byte(data[12])?,
            display_index: u64::from_le_bytes(index),
        };
        PixelFormat::Nv12
            .check_dimensions(header.width, header.height)
            .map_err(|e| EngineError::Decode(format!("bad sequence header: {e}")))?;
        Ok(header)
    }

    fn payload_len(&self) -> usize {
        PixelFormat::Nv12.dense_size(self.width, self.height)
    }
}

/// Dense copy of a surface's pixels.
fn read_surface(ctx: &ExecutionContext, surface: &Surface) -> Result<Vec<u8>> {
    let format = surface.format();
    let mut data = vec![0u8; format.dense_size(surface.width(), surface.height())];
    for copy in Copy2d::surface_to_host(surface) {
        ctx.backend().download(
            ctx.stream().handle(),
            surface.memory().allocation(),
            &mut data,
            &copy,
        )?;
    }
    ctx.synchronize()?;
    Ok(data)
}

fn write_surface(ctx: &ExecutionContext, data: &[u8], surface: &Surface) -> Result<()> {
    for copy in Copy2d::host_to_surface(surface) {
        ctx.backend().upload(
            ctx.stream().handle(),
            data,
            surface.memory().allocation(),
            &copy,
        )?;
    }
    Ok(())
}

// ─── Encoder ─────────────────────────────────────────────────────────────────

struct PendingPicture {
    display_index: u64,
    pts: i64,
    data: Vec<u8>,
}

/// Reference encoder with B-frame lookahead.
pub struct RawEncoder {
    ctx: Arc<ExecutionContext>,
    options: EncoderOptions,
    width: u32,
    height: u32,
    next_display: u64,
    /// Pictures waiting for their anchor, in display order.
    lookahead: Vec<PendingPicture>,
    /// Presentation times in display order; popped in coding order to form DTS.
    dts_queue: VecDeque<i64>,
    frame_duration: i64,
}

impl RawEncoder {
    pub fn open(ctx: &Arc<ExecutionContext>, config: &EncoderConfig) -> Result<Self> {
        let options = &config.options;
        if options.codec != CodecId::Raw {
            return Err(EngineError::Unsupported(format!(
                "host backend only encodes the raw reference codec, not {:?}",
                options.codec
            )));
        }
        options.validate()?;
        if config.format != PixelFormat::Nv12 {
            return Err(EngineError::FormatMismatch {
                expected: PixelFormat::Nv12,
                actual: config.format,
            });
        }
        PixelFormat::Nv12.check_dimensions(config.width, config.height)?;
        debug!(
            width = config.width,
            height = config.height,
            gop = options.gop_length,
            b_frames = options.b_frames,
            "raw encoder opened"
        );
        Ok(Self {
            ctx: Arc::clone(ctx),
            options: options.clone(),
            width: config.width,
            height: config.height,
            next_display: 0,
            lookahead: Vec::new(),
            dts_queue: VecDeque::new(),
            frame_duration: options.framerate.frame_duration_us(),
        })
    }

    fn emit(&mut self, picture: PendingPicture, frame_type: FrameType, out: &mut Vec<Packet>) {
        let header = RawFrameHeader {
            width: self.width,
            height: self.height,
            frame_type,
            display_index: picture.display_index,
        };
        let mut data = BytesMut::with_capacity(RAW_HEADER_LEN + picture.data.len());
        header.write(&mut data);
        data.extend_from_slice(&picture.data);

        let delay = i64::from(self.options.b_frames) * self.frame_duration;
        let dts = self.dts_queue.pop_front().unwrap_or(picture.pts) - delay;
        trace!(
            display_index = picture.display_index,
            ?frame_type,
            pts = picture.pts,
            dts,
            "raw encoder packet"
        );
        out.push(Packet {
            data: data.freeze(),
            pts: picture.pts,
            dts,
            duration: self.frame_duration,
            is_keyframe: frame_type == FrameType::I,
            stream: StreamKind::Video,
        });
    }

    /// Close the open group: its last picture becomes a P anchor.
    fn close_group(&mut self, out: &mut Vec<Packet>) {
        let mut group = std::mem::take(&mut self.lookahead);
        if let Some(anchor) = group.pop() {
            self.emit(anchor, FrameType::P, out);
            for picture in group {
                self.emit(picture, FrameType::B, out);
            }
        }
    }
}

impl EncodeSession for RawEncoder {
    fn encode(&mut self, surface: &Surface) -> Result<Vec<Packet>> {
        self.ctx.check_surface(surface)?;
        surface.expect_layout(self.width, self.height, PixelFormat::Nv12)?;
        host_copy_violation!("encode", "raw reference encoder reads pixels on the host")?;
        let picture = PendingPicture {
            display_index: self.next_display,
            pts: surface.pts,
            data: read_surface(&self.ctx, surface)?,
        };
        self.next_display += 1;
        self.dts_queue.push_back(surface.pts);

        let mut out = Vec::new();
        let gop = u64::from(self.options.gop_length);
        if picture.display_index % gop == 0 {
            self.close_group(&mut out);
            self.emit(picture, FrameType::I, &mut out);
        } else if self.lookahead.len() as u32 == self.options.b_frames {
            self.emit(picture, FrameType::P, &mut out);
            for b in std::mem::take(&mut self.lookahead) {
                self.emit(b, FrameType::B, &mut out);
            }
        } else {
            self.lookahead.push(picture);
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        let mut out = Vec::new();
        self.close_group(&mut out);
        debug!(packets = out.len(), "raw encoder flushed");
        Ok(out)
    }
}

// ─── Decoder ─────────────────────────────────────────────────────────────────

struct DecodedPicture {
    header: RawFrameHeader,
    pts: i64,
    payload: Bytes,
}

/// Reference decoder restoring display order.
pub struct RawDecoder {
    ctx: Arc<ExecutionContext>,
    sequence: Option<SequenceInfo>,
    reorder: BTreeMap<u64, DecodedPicture>,
    /// Display index of the next picture to hand out.
    next_display: Option<u64>,
    draining: bool,
}

impl RawDecoder {
    pub fn open(ctx: &Arc<ExecutionContext>, config: &DecoderConfig) -> Result<Self> {
        if config.codec != CodecId::Raw {
            return Err(EngineError::Unsupported(format!(
                "host backend only decodes the raw reference codec, not {:?}",
                config.codec
            )));
        }
        debug!(
            coded_width = config.coded_width,
            coded_height = config.coded_height,
            "raw decoder opened"
        );
        Ok(Self {
            ctx: Arc::clone(ctx),
            sequence: None,
            reorder: BTreeMap::new(),
            next_display: None,
            draining: false,
        })
    }

    fn contiguous(&self) -> usize {
        let Some(mut next) = self.next_display else {
            return 0;
        };
        let mut n = 0;
        while self.reorder.contains_key(&next) {
            n += 1;
            next += 1;
        }
        n
    }
}

impl DecodeSession for RawDecoder {
    fn submit(&mut self, packet: Option<&Packet>) -> Result<()> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if self.draining {
            return Err(EngineError::Decode(
                "packet submitted after end of stream".into(),
            ));
        }
        let header = RawFrameHeader::parse(&packet.data)?;
        let payload = packet.data.slice(RAW_HEADER_LEN..);
        if payload.len() != header.payload_len() {
            return Err(EngineError::Decode(format!(
                "picture {} carries {} bytes, {}x{} NV12 needs {}",
                header.display_index,
                payload.len(),
                header.width,
                header.height,
                header.payload_len()
            )));
        }
        let next = match self.next_display {
            Some(next) => next,
            None if header.frame_type == FrameType::I => header.display_index,
            None => {
                return Err(EngineError::Decode(
                    "stream does not start with a keyframe".into(),
                ));
            }
        };
        if header.display_index < next || self.reorder.contains_key(&header.display_index) {
            return Err(EngineError::Decode(format!(
                "picture {} is duplicated or arrived after display",
                header.display_index
            )));
        }
        host_copy_violation!("decode", "raw reference decoder holds pixels on the host")?;
        self.next_display = Some(next);
        self.sequence = Some(SequenceInfo {
            width: header.width,
            height: header.height,
            format: PixelFormat::Nv12,
        });
        self.reorder.insert(
            header.display_index,
            DecodedPicture {
                header,
                pts: packet.pts,
                payload,
            },
        );
        Ok(())
    }

    fn sequence(&self) -> Option<SequenceInfo> {
        self.sequence
    }

    fn ready(&self) -> usize {
        if self.draining {
            self.reorder.len()
        } else {
            self.contiguous()
        }
    }

    fn output_picture(&mut self, target: &Surface) -> Result<PictureInfo> {
        let index = match self.next_display {
            Some(next) if self.reorder.contains_key(&next) => next,
            _ if self.draining => match self.reorder.keys().next() {
                Some(&first) => first,
                None => return Err(EngineError::Decode("decoder is drained".into())),
            },
            _ => return Err(EngineError::Decode("no picture ready for display".into())),
        };
        let Some(picture) = self.reorder.remove(&index) else {
            return Err(EngineError::InvariantViolation(format!(
                "picture {index} vanished from the reorder buffer"
            )));
        };
        self.ctx.check_surface(target)?;
        target.expect_layout(picture.header.width, picture.header.height, PixelFormat::Nv12)?;
        write_surface(&self.ctx, &picture.payload, target)?;
        self.next_display = Some(index + 1);
        Ok(PictureInfo {
            pts: picture.pts,
            is_keyframe: picture.header.frame_type == FrameType::I,
        })
    }
}
