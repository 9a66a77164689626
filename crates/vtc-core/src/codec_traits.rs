//! Shared codec and container traits used across crate boundaries.
//!
//! These traits give `vtc-host`, `vtc-nvcodec`, `vtc-container` and
//! `vtc-pipeline` a neutral home so none of them depends on another.

use crate::buffer::{Packet, Surface};
use crate::encoder_options::EncoderOptions;
use crate::error::Result;
use crate::types::{CodecId, MuxingParams, PixelFormat};

// ─── Bitstream source (container → demux task) ───────────────────────────

/// Demuxed compressed packets (host-side, NOT raw pixels).
///
/// Implementations: IVF reader, FFmpeg demuxer.
pub trait BitstreamSource: Send + 'static {
    /// Stream parameters read from the container header.
    fn params(&self) -> &MuxingParams;

    /// Read the next video packet, or `None` at end-of-stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

// ─── Bitstream sink (mux task → container) ───────────────────────────────

/// Receives coded packets, already interleaved by presentation time.
///
/// Implementations: IVF writer, FFmpeg muxer.
pub trait BitstreamSink: Send + 'static {
    /// Whether the container can carry an audio stream.
    fn supports_audio(&self) -> bool;

    /// Write one packet. `pts`/`dts` are in microseconds; sinks rescale to
    /// their container time base at the output boundary.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Flush internal buffers and finalise the output (trailer).
    fn finish(&mut self) -> Result<()>;
}

// ─── Decode session ──────────────────────────────────────────────────────

/// Parameters for opening a decode session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: CodecId,
    pub coded_width: u32,
    pub coded_height: u32,
}

/// Sequence geometry reported by a decoder once its first header is parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceInfo {
    pub width: u32,
    pub height: u32,
    /// Output format of decoded pictures (NV12 for every current backend).
    pub format: PixelFormat,
}

/// Metadata of one picture handed out by a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PictureInfo {
    /// Presentation timestamp in microseconds.
    pub pts: i64,
    pub is_keyframe: bool,
}

/// A hardware or reference decoder.
///
/// Pictures come out in display order, which may differ from submission
/// order. After `submit(None)` the session drains its reorder buffer.
pub trait DecodeSession: Send {
    /// Feed one packet, or `None` to signal end of stream.
    fn submit(&mut self, packet: Option<&Packet>) -> Result<()>;

    /// Geometry of the current sequence, once known.
    fn sequence(&self) -> Option<SequenceInfo>;

    /// Number of pictures ready for display.
    fn ready(&self) -> usize;

    /// Copy the next display-order picture into `target`.
    ///
    /// `target` must match [`sequence`](Self::sequence) and belong to the
    /// session's execution context.
    fn output_picture(&mut self, target: &Surface) -> Result<PictureInfo>;
}

// ─── Encode session ──────────────────────────────────────────────────────

/// Parameters for opening an encode session.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderConfig {
    pub options: EncoderOptions,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// A hardware or reference encoder.
///
/// `encode` may return no packets while the encoder fills its lookahead.
pub trait EncodeSession: Send {
    /// Submit one surface; returns every packet that became available.
    fn encode(&mut self, surface: &Surface) -> Result<Vec<Packet>>;

    /// Drain everything still buffered.
    fn flush(&mut self) -> Result<Vec<Packet>>;
}
