//! Mapping from backend-neutral codec settings to NVDEC/NVENC parameters.
//!
//! Everything here is plain data so it can be checked without a GPU.

use std::collections::VecDeque;

use vtc_core::codec_traits::EncoderConfig;
use vtc_core::encoder_options::{Preset, Profile, RateControl};
use vtc_core::error::{EngineError, Result};
use vtc_core::types::{CodecId, PixelFormat, Rational};

use crate::sys::*;

/// NVDEC codec for a decode request.
pub fn decode_codec(codec: CodecId) -> Result<cudaVideoCodec> {
    match codec {
        CodecId::H264 => Ok(cudaVideoCodec::H264),
        CodecId::Hevc => Ok(cudaVideoCodec::HEVC),
        CodecId::Av1 => Ok(cudaVideoCodec::AV1),
        CodecId::Vp8 => Ok(cudaVideoCodec::VP8),
        CodecId::Vp9 => Ok(cudaVideoCodec::VP9),
        CodecId::Raw => Err(EngineError::Unsupported(
            "NVDEC cannot decode the raw reference codec".into(),
        )),
    }
}

fn encode_guid(codec: CodecId) -> Result<GUID> {
    match codec {
        CodecId::H264 => Ok(NV_ENC_CODEC_H264_GUID),
        CodecId::Hevc => Ok(NV_ENC_CODEC_HEVC_GUID),
        CodecId::Av1 => Ok(NV_ENC_CODEC_AV1_GUID),
        other => Err(EngineError::Unsupported(format!(
            "NVENC cannot encode {other:?}"
        ))),
    }
}

fn preset_guid(preset: Preset) -> GUID {
    match preset {
        Preset::P1 => NV_ENC_PRESET_P1_GUID,
        Preset::P2 => NV_ENC_PRESET_P2_GUID,
        Preset::P3 => NV_ENC_PRESET_P3_GUID,
        Preset::P4 => NV_ENC_PRESET_P4_GUID,
        Preset::P5 => NV_ENC_PRESET_P5_GUID,
        Preset::P6 => NV_ENC_PRESET_P6_GUID,
        Preset::P7 => NV_ENC_PRESET_P7_GUID,
    }
}

fn profile_guid(codec: CodecId, profile: Profile) -> Result<GUID> {
    let guid = match (codec, profile) {
        (_, Profile::Auto) => NV_ENC_CODEC_PROFILE_AUTOSELECT_GUID,
        (CodecId::H264, Profile::Baseline) => NV_ENC_H264_PROFILE_BASELINE_GUID,
        (CodecId::H264, Profile::Main) => NV_ENC_H264_PROFILE_MAIN_GUID,
        (CodecId::H264, Profile::High) => NV_ENC_H264_PROFILE_HIGH_GUID,
        (CodecId::H264, Profile::High444) => NV_ENC_H264_PROFILE_HIGH_444_GUID,
        (CodecId::Hevc, Profile::Main) => NV_ENC_HEVC_PROFILE_MAIN_GUID,
        (CodecId::Av1, Profile::Main) => NV_ENC_AV1_PROFILE_MAIN_GUID,
        (codec, profile) => {
            return Err(EngineError::Unsupported(format!(
                "profile {profile:?} is not available for {codec:?}"
            )));
        }
    };
    Ok(guid)
}

fn buffer_format(format: PixelFormat) -> Result<NV_ENC_BUFFER_FORMAT> {
    match format {
        PixelFormat::Nv12 => Ok(NV_ENC_BUFFER_FORMAT::NV12),
        PixelFormat::Yuv444 => Ok(NV_ENC_BUFFER_FORMAT::YUV444),
        // IYUV wants half-pitch chroma rows; surfaces share one pitch.
        PixelFormat::Yuv420 => Err(EngineError::Unsupported(
            "NVENC reads planar 4:2:0 with half-pitch chroma; convert to nv12 first".into(),
        )),
        other => Err(EngineError::Unsupported(format!(
            "NVENC has no input mapping for {other}"
        ))),
    }
}

/// Rate-control block written into `NV_ENC_RC_PARAMS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RcSettings {
    pub mode: u32,
    pub const_qp: u32,
    pub average_bitrate: u32,
    pub max_bitrate: u32,
}

impl From<RateControl> for RcSettings {
    fn from(rc: RateControl) -> Self {
        match rc {
            RateControl::ConstQp { qp } => Self {
                mode: NV_ENC_PARAMS_RC_CONSTQP,
                const_qp: qp,
                average_bitrate: 0,
                max_bitrate: 0,
            },
            RateControl::Cbr { bitrate } => Self {
                mode: NV_ENC_PARAMS_RC_CBR,
                const_qp: 0,
                average_bitrate: bitrate,
                max_bitrate: bitrate,
            },
            RateControl::Vbr {
                bitrate,
                max_bitrate,
            } => Self {
                mode: NV_ENC_PARAMS_RC_VBR,
                const_qp: 0,
                average_bitrate: bitrate,
                max_bitrate: if max_bitrate > 0 {
                    max_bitrate
                } else {
                    bitrate.saturating_mul(3) / 2
                },
            },
        }
    }
}

/// Fully resolved NVENC session parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NvEncSettings {
    pub codec: CodecId,
    pub encode_guid: GUID,
    pub preset_guid: GUID,
    pub profile_guid: GUID,
    pub buffer_format: NV_ENC_BUFFER_FORMAT,
    pub rc: RcSettings,
    pub width: u32,
    pub height: u32,
    pub framerate: Rational,
    pub gop_length: u32,
    pub b_frames: u32,
    pub idr_period: u32,
}

impl NvEncSettings {
    /// Validate `config` and resolve every NVENC identifier it names.
    pub fn from_config(config: &EncoderConfig) -> Result<Self> {
        let options = &config.options;
        options.validate()?;
        options.validate_input(config.format)?;
        config.format.check_dimensions(config.width, config.height)?;
        Ok(Self {
            codec: options.codec,
            encode_guid: encode_guid(options.codec)?,
            preset_guid: preset_guid(options.preset),
            profile_guid: profile_guid(options.codec, options.profile)?,
            buffer_format: buffer_format(config.format)?,
            rc: options.rate_control.into(),
            width: config.width,
            height: config.height,
            framerate: options.framerate,
            gop_length: options.gop_length,
            b_frames: options.b_frames,
            idr_period: if options.idr_period == 0 {
                options.gop_length
            } else {
                options.idr_period
            },
        })
    }

    /// `frameIntervalP`: distance between anchor pictures.
    pub fn frame_interval_p(&self) -> i32 {
        self.b_frames as i32 + 1
    }

    /// Output buffers in flight: one per reordered picture plus slack.
    pub fn bitstream_buffers(&self) -> usize {
        self.b_frames as usize + 2
    }

    /// Overwrite the preset config with the session's GOP and RC choices.
    pub fn apply(&self, config: &mut NV_ENC_CONFIG) {
        config.profileGUID = self.profile_guid;
        config.gopLength = self.gop_length;
        config.frameIntervalP = self.frame_interval_p();
        config.rcParams.rateControlMode = self.rc.mode;
        config.rcParams.averageBitRate = self.rc.average_bitrate;
        config.rcParams.maxBitRate = self.rc.max_bitrate;
        if self.rc.mode == NV_ENC_PARAMS_RC_CONSTQP {
            config.rcParams.constQP_interP = self.rc.const_qp;
            config.rcParams.constQP_interB = self.rc.const_qp;
            config.rcParams.constQP_intra = self.rc.const_qp;
        }
    }
}

/// Decode timestamps for reordered output.
///
/// Input presentation times are queued in submission order; each packet
/// takes the oldest one, shifted back by the reorder depth so that
/// `dts <= pts` holds for every B-picture.
#[derive(Debug)]
pub struct DtsQueue {
    pending: VecDeque<i64>,
    delay: i64,
}

impl DtsQueue {
    pub fn new(b_frames: u32, frame_duration: i64) -> Self {
        Self {
            pending: VecDeque::new(),
            delay: i64::from(b_frames) * frame_duration,
        }
    }

    pub fn push(&mut self, pts: i64) {
        self.pending.push_back(pts);
    }

    /// DTS for the next packet out; falls back to its own `pts`.
    pub fn next(&mut self, pts: i64) -> i64 {
        self.pending.pop_front().unwrap_or(pts) - self.delay
    }
}
