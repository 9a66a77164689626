//! FFmpeg FFI helpers: error translation, string conversion, codec id
//! mapping, and the bitstream filter declarations `ffmpeg-sys-next` omits.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fmt::{Display, Formatter};

use ffmpeg_sys_next::{AVCodecID, AVCodecParameters, AVPacket, AVRational};
use vtc_core::error::EngineError;
use vtc_core::types::{CodecId, Rational};

// ── BSF FFI ──────────────────────────────────────────────────────────────────
//
// `libavcodec/bsf.h` is public API but not generated by `ffmpeg-sys-next`;
// the subset the demuxer needs for MP4 → Annex B is declared here.

/// Opaque bitstream filter descriptor.
#[repr(C)]
pub struct AVBitStreamFilter {
    _opaque: [u8; 0],
}

/// Bitstream filter instance. Layout mirrors `libavcodec/bsf.h`.
#[repr(C)]
pub struct AVBSFContext {
    pub av_class: *const c_void,
    pub filter: *const AVBitStreamFilter,
    pub priv_data: *mut c_void,
    pub par_in: *mut AVCodecParameters,
    pub par_out: *mut AVCodecParameters,
    pub time_base_in: AVRational,
    pub time_base_out: AVRational,
}

unsafe extern "C" {
    pub fn av_bsf_get_by_name(name: *const c_char) -> *const AVBitStreamFilter;
    pub fn av_bsf_alloc(filter: *const AVBitStreamFilter, ctx: *mut *mut AVBSFContext) -> c_int;
    pub fn av_bsf_init(ctx: *mut AVBSFContext) -> c_int;
    pub fn av_bsf_send_packet(ctx: *mut AVBSFContext, pkt: *const AVPacket) -> c_int;
    pub fn av_bsf_receive_packet(ctx: *mut AVBSFContext, pkt: *mut AVPacket) -> c_int;
    pub fn av_bsf_free(ctx: *mut *mut AVBSFContext);
}

/// Structured FFmpeg error details.
#[derive(Debug, Clone)]
pub struct FfmpegErrorDetail {
    /// FFmpeg call that failed (e.g. `"avformat_open_input"`).
    pub context: String,
    /// Raw negative AVERROR value.
    pub code: i32,
    pub message: String,
}

impl Display for FfmpegErrorDetail {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (code {})", self.context, self.message, self.code)
    }
}

impl FfmpegErrorDetail {
    pub fn demux(self) -> EngineError {
        EngineError::Demux(self.to_string())
    }

    pub fn mux(self) -> EngineError {
        EngineError::Mux(self.to_string())
    }
}

/// Translate an FFmpeg return code into a structured error.
pub fn check_ffmpeg(ret: i32, context: &str) -> std::result::Result<(), FfmpegErrorDetail> {
    if ret >= 0 {
        return Ok(());
    }

    let mut buf = [0 as c_char; 256];
    // SAFETY: buf is a valid mutable buffer of known length.
    unsafe {
        ffmpeg_sys_next::av_strerror(ret, buf.as_mut_ptr(), buf.len());
    }
    // SAFETY: av_strerror always NUL-terminates within `buf`.
    let message = unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    Err(FfmpegErrorDetail {
        context: context.to_string(),
        code: ret,
        message,
    })
}

/// Convert a Rust `&str` to a `CString`, mapping NUL bytes to an error.
pub fn to_cstring(s: &str) -> std::result::Result<CString, String> {
    CString::new(s).map_err(|e| format!("Invalid path string: {e}"))
}

pub fn codec_to_av(codec: CodecId) -> Option<AVCodecID> {
    match codec {
        CodecId::H264 => Some(AVCodecID::AV_CODEC_ID_H264),
        CodecId::Hevc => Some(AVCodecID::AV_CODEC_ID_HEVC),
        CodecId::Av1 => Some(AVCodecID::AV_CODEC_ID_AV1),
        CodecId::Vp8 => Some(AVCodecID::AV_CODEC_ID_VP8),
        CodecId::Vp9 => Some(AVCodecID::AV_CODEC_ID_VP9),
        CodecId::Raw => None,
    }
}

pub fn codec_from_av(id: AVCodecID) -> Option<CodecId> {
    match id {
        AVCodecID::AV_CODEC_ID_H264 => Some(CodecId::H264),
        AVCodecID::AV_CODEC_ID_HEVC => Some(CodecId::Hevc),
        AVCodecID::AV_CODEC_ID_AV1 => Some(CodecId::Av1),
        AVCodecID::AV_CODEC_ID_VP8 => Some(CodecId::Vp8),
        AVCodecID::AV_CODEC_ID_VP9 => Some(CodecId::Vp9),
        _ => None,
    }
}

pub fn rational_from_av(r: AVRational) -> Rational {
    Rational::new(r.num.max(0) as u32, r.den.max(0) as u32)
}

pub fn rational_to_av(r: Rational) -> AVRational {
    AVRational {
        num: r.num as i32,
        den: r.den as i32,
    }
}

pub const MICROSECONDS: AVRational = AVRational {
    num: 1,
    den: 1_000_000,
};
