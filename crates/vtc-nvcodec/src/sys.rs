//! Raw FFI bindings to NVIDIA Video Codec SDK (nvcuvid + nvEncodeAPI).
//!
//! Covers the subset used by [`NvDecoder`](super::nvdec) and
//! [`NvEncoder`](super::nvenc). Layouts follow Video Codec SDK v12/v13
//! headers; reserved tails keep every struct at its declared size.
//!
//! # Linking
//!
//! `build.rs` emits `-l cuda`, `-l nvcuvid` and `-l nvidia-encode`
//! (Windows: `nvencodeapi`) when `nvcodec-runtime` is enabled.
//!
//! # Safety
//!
//! Every function here is `unsafe extern "C"`. The wrappers in `nvdec.rs`
//! and `nvenc.rs` keep handles alive and single-threaded.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::c_void;
use std::os::raw::{c_int, c_short, c_uint, c_ulong, c_ulonglong};

use vtc_core::error::{EngineError, Result};

// ═══════════════════════════════════════════════════════════════════════════
//  COMMON TYPES
// ═══════════════════════════════════════════════════════════════════════════

pub type CUresult = c_int;
pub const CUDA_SUCCESS: CUresult = 0;

pub type CUdeviceptr = c_ulonglong;
pub type CUstream = *mut c_void;
pub type CUcontext = *mut c_void;

// ═══════════════════════════════════════════════════════════════════════════
//  NVDEC: cuviddec.h / nvcuvid.h
// ═══════════════════════════════════════════════════════════════════════════

pub type CUvideodecoder = *mut c_void;
pub type CUvideoparser = *mut c_void;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum cudaVideoCodec {
    MPEG1 = 0,
    MPEG2 = 1,
    MPEG4 = 2,
    VC1 = 3,
    H264 = 4,
    JPEG = 5,
    H264_SVC = 6,
    H264_MVC = 7,
    HEVC = 8,
    VP8 = 9,
    VP9 = 10,
    AV1 = 11,
    NumCodecs = 12,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum cudaVideoSurfaceFormat {
    NV12 = 0,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum cudaVideoChromaFormat {
    Monochrome = 0,
    _420 = 1,
    _422 = 2,
    _444 = 3,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum cudaVideoDeinterlaceMode {
    Weave = 0,
    Adaptive = 2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum cudaVideoCreateFlags {
    PreferCUVID = 0,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CUVIDRECT {
    pub left: c_short,
    pub top: c_short,
    pub right: c_short,
    pub bottom: c_short,
}

/// Parameters for `cuvidCreateDecoder`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CUVIDDECODECREATEINFO {
    pub ulWidth: c_ulong,
    pub ulHeight: c_ulong,
    pub ulNumDecodeSurfaces: c_ulong,
    pub CodecType: cudaVideoCodec,
    pub ChromaFormat: cudaVideoChromaFormat,
    pub ulCreationFlags: c_ulong,
    pub bitDepthMinus8: c_ulong,
    pub ulIntraDecodeOnly: c_ulong,
    pub ulMaxWidth: c_ulong,
    pub ulMaxHeight: c_ulong,
    pub Reserved1: c_ulong,
    pub display_area: CUVIDRECT,
    pub OutputFormat: cudaVideoSurfaceFormat,
    pub DeinterlaceMode: cudaVideoDeinterlaceMode,
    pub ulTargetWidth: c_ulong,
    pub ulTargetHeight: c_ulong,
    pub ulNumOutputSurfaces: c_ulong,
    pub vidLock: *mut c_void,
    pub target_rect: CUVIDRECT,
    pub enableHistogram: c_ulong,
    pub Reserved2: [c_ulong; 4],
}

/// Picture params; the codec-specific union is kept opaque.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CUVIDPICPARAMS {
    pub PicWidthInMbs: c_int,
    pub FrameHeightInMbs: c_int,
    pub CurrPicIdx: c_int,
    pub field_pic_flag: c_int,
    pub bottom_field_flag: c_int,
    pub second_field: c_int,
    pub nBitstreamDataLen: c_uint,
    pub pBitstreamData: *const u8,
    pub nNumSlices: c_uint,
    pub pSliceDataOffsets: *const c_uint,
    pub ref_pic_flag: c_int,
    pub intra_pic_flag: c_int,
    pub Reserved: [c_uint; 30],
    pub CodecSpecific: [u8; 1024],
}

/// Sequence format reported by the parser.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CUVIDEOFORMAT {
    pub codec: cudaVideoCodec,
    pub frame_rate_num: c_uint,
    pub frame_rate_den: c_uint,
    pub progressive_sequence: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub min_num_decode_surfaces: u8,
    pub coded_width: c_uint,
    pub coded_height: c_uint,
    pub display_area_left: c_short,
    pub display_area_top: c_short,
    pub display_area_right: c_short,
    pub display_area_bottom: c_short,
    pub chroma_format: cudaVideoChromaFormat,
    pub bitrate: c_uint,
    pub display_aspect_ratio_x: c_uint,
    pub display_aspect_ratio_y: c_uint,
    pub video_signal_description: [u8; 8],
    pub seqhdr_data_length: c_uint,
}

/// A decoded picture ready for display.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CUVIDPARSERDISPINFO {
    pub picture_index: c_int,
    pub progressive_frame: c_int,
    pub top_field_first: c_int,
    pub repeat_first_field: c_int,
    pub timestamp: c_ulonglong,
}

#[repr(C)]
pub struct CUVIDPARSERPARAMS {
    pub CodecType: cudaVideoCodec,
    pub ulMaxNumDecodeSurfaces: c_uint,
    pub ulClockRate: c_uint,
    pub ulErrorThreshold: c_uint,
    pub ulMaxDisplayDelay: c_uint,
    pub bAnnexb: c_uint,
    pub uReserved: c_uint,
    pub Reserved: [c_uint; 4],
    pub pUserData: *mut c_void,
    pub pfnSequenceCallback:
        Option<unsafe extern "C" fn(*mut c_void, *mut CUVIDEOFORMAT) -> c_int>,
    pub pfnDecodePicture: Option<unsafe extern "C" fn(*mut c_void, *mut CUVIDPICPARAMS) -> c_int>,
    pub pfnDisplayPicture:
        Option<unsafe extern "C" fn(*mut c_void, *mut CUVIDPARSERDISPINFO) -> c_int>,
    pub pvReserved2: [*mut c_void; 7],
    pub pExtVideoInfo: *mut c_void,
}

#[repr(C)]
pub struct CUVIDSOURCEDATAPACKET {
    pub flags: c_ulong,
    pub payload_size: c_ulong,
    pub payload: *const u8,
    pub timestamp: c_ulonglong,
}

pub const CUVID_PKT_ENDOFSTREAM: c_ulong = 0x01;
pub const CUVID_PKT_TIMESTAMP: c_ulong = 0x02;

/// Processing params for `cuvidMapVideoFrame64`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CUVIDPROCPARAMS {
    pub progressive_frame: c_int,
    pub second_field: c_int,
    pub top_field_first: c_int,
    pub unpaired_field: c_int,
    pub reserved_flags: c_uint,
    pub reserved_zero: c_uint,
    pub raw_input_dptr: c_ulonglong,
    pub raw_input_pitch: c_uint,
    pub raw_input_format: c_uint,
    pub raw_output_dptr: c_ulonglong,
    pub raw_output_pitch: c_uint,
    pub Reserved1: c_uint,
    pub output_stream: CUstream,
    pub Reserved: [c_uint; 46],
}

unsafe extern "C" {
    pub fn cuvidCreateVideoParser(
        parser: *mut CUvideoparser,
        params: *mut CUVIDPARSERPARAMS,
    ) -> CUresult;

    pub fn cuvidParseVideoData(
        parser: CUvideoparser,
        packet: *mut CUVIDSOURCEDATAPACKET,
    ) -> CUresult;

    pub fn cuvidDestroyVideoParser(parser: CUvideoparser) -> CUresult;

    pub fn cuvidCreateDecoder(
        decoder: *mut CUvideodecoder,
        params: *mut CUVIDDECODECREATEINFO,
    ) -> CUresult;

    pub fn cuvidDecodePicture(decoder: CUvideodecoder, pic_params: *mut CUVIDPICPARAMS)
    -> CUresult;

    pub fn cuvidMapVideoFrame64(
        decoder: CUvideodecoder,
        pic_idx: c_int,
        dev_ptr: *mut CUdeviceptr,
        pitch: *mut c_uint,
        params: *mut CUVIDPROCPARAMS,
    ) -> CUresult;

    pub fn cuvidUnmapVideoFrame64(decoder: CUvideodecoder, dev_ptr: CUdeviceptr) -> CUresult;

    pub fn cuvidDestroyDecoder(decoder: CUvideodecoder) -> CUresult;
}

// ═══════════════════════════════════════════════════════════════════════════
//  NVENC: nvEncodeAPI.h
// ═══════════════════════════════════════════════════════════════════════════

pub type NVENCSTATUS = c_int;
pub const NV_ENC_SUCCESS: NVENCSTATUS = 0;
// Statuses the session code branches on or names in errors.
pub const NV_ENC_ERR_INVALID_PARAM: NVENCSTATUS = 8;
pub const NV_ENC_ERR_OUT_OF_MEMORY: NVENCSTATUS = 10;
pub const NV_ENC_ERR_INVALID_VERSION: NVENCSTATUS = 15;
pub const NV_ENC_ERR_NEED_MORE_INPUT: NVENCSTATUS = 17;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GUID {
    pub Data1: u32,
    pub Data2: u16,
    pub Data3: u16,
    pub Data4: [u8; 8],
}

const fn guid(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> GUID {
    GUID {
        Data1: d1,
        Data2: d2,
        Data3: d3,
        Data4: d4,
    }
}

// ─── Codec GUIDs ─────────────────────────────────────────────────────────

pub const NV_ENC_CODEC_H264_GUID: GUID = guid(
    0x6BC82762,
    0x4E63,
    0x4CA4,
    [0xAA, 0x85, 0x1A, 0x4F, 0x6A, 0x21, 0xF5, 0x07],
);
pub const NV_ENC_CODEC_HEVC_GUID: GUID = guid(
    0x790CDC88,
    0x4522,
    0x4D7B,
    [0x94, 0x25, 0xBD, 0xA9, 0x97, 0x5F, 0x76, 0x03],
);
pub const NV_ENC_CODEC_AV1_GUID: GUID = guid(
    0x0A352289,
    0x0AA7,
    0x4759,
    [0x86, 0x2D, 0x5D, 0x15, 0xCD, 0x16, 0xD2, 0x54],
);

// ─── Preset GUIDs (P1 fastest .. P7 slowest) ─────────────────────────────

pub const NV_ENC_PRESET_P1_GUID: GUID = guid(
    0xFC0A8D3E,
    0x45F8,
    0x4CF8,
    [0x80, 0xC7, 0x29, 0x88, 0x71, 0x59, 0x0E, 0xBF],
);
pub const NV_ENC_PRESET_P2_GUID: GUID = guid(
    0xF581CFB8,
    0x88D6,
    0x4381,
    [0x93, 0xF0, 0xDF, 0x13, 0xF9, 0xC2, 0x7D, 0xAB],
);
pub const NV_ENC_PRESET_P3_GUID: GUID = guid(
    0x36850110,
    0x3A07,
    0x441F,
    [0x94, 0xD5, 0x36, 0x70, 0x63, 0x1F, 0x91, 0xF6],
);
pub const NV_ENC_PRESET_P4_GUID: GUID = guid(
    0x90A7B826,
    0xDF06,
    0x4862,
    [0xB9, 0xD2, 0xCD, 0x6D, 0x73, 0xA0, 0x86, 0x81],
);
pub const NV_ENC_PRESET_P5_GUID: GUID = guid(
    0x21C6E6B4,
    0x297A,
    0x4CBA,
    [0x99, 0x8F, 0xB6, 0xCB, 0xDE, 0x72, 0xAD, 0xE3],
);
pub const NV_ENC_PRESET_P6_GUID: GUID = guid(
    0x8E75C279,
    0x6299,
    0x4AB6,
    [0x83, 0x02, 0x0B, 0x21, 0x5A, 0x33, 0x5C, 0xF5],
);
pub const NV_ENC_PRESET_P7_GUID: GUID = guid(
    0x84848C12,
    0x6F71,
    0x4C13,
    [0x93, 0x1B, 0x53, 0xE5, 0x6F, 0x78, 0x84, 0x3B],
);

// ─── Profile GUIDs ───────────────────────────────────────────────────────

pub const NV_ENC_CODEC_PROFILE_AUTOSELECT_GUID: GUID = guid(
    0xBFD6F8E7,
    0x233C,
    0x4341,
    [0x8B, 0x3E, 0x48, 0x18, 0x52, 0x38, 0x03, 0xF4],
);
pub const NV_ENC_H264_PROFILE_BASELINE_GUID: GUID = guid(
    0x0727BCAA,
    0x78C4,
    0x4C83,
    [0x8C, 0x2F, 0xEF, 0x3D, 0xFF, 0x26, 0x7C, 0x6A],
);
pub const NV_ENC_H264_PROFILE_MAIN_GUID: GUID = guid(
    0x60B5C1D4,
    0x67FE,
    0x4790,
    [0x94, 0xD5, 0xC4, 0x72, 0x6D, 0x7B, 0x6E, 0x6D],
);
pub const NV_ENC_H264_PROFILE_HIGH_GUID: GUID = guid(
    0xE7CBC309,
    0x4F7A,
    0x4B89,
    [0xAF, 0x2A, 0xD5, 0x37, 0xC9, 0x2B, 0xE3, 0x10],
);
pub const NV_ENC_H264_PROFILE_HIGH_444_GUID: GUID = guid(
    0x7AC663CB,
    0xA598,
    0x4960,
    [0xB8, 0x44, 0x33, 0x9B, 0x26, 0x1A, 0x7D, 0x52],
);
pub const NV_ENC_HEVC_PROFILE_MAIN_GUID: GUID = guid(
    0xB514C39A,
    0xB55B,
    0x40FA,
    [0x87, 0x8F, 0xF1, 0x25, 0x3B, 0x4D, 0xFD, 0xEC],
);
pub const NV_ENC_AV1_PROFILE_MAIN_GUID: GUID = guid(
    0x5F2A39F5,
    0xF14E,
    0x4F95,
    [0x9A, 0x9E, 0xB7, 0x6D, 0x56, 0x8F, 0xCF, 0x97],
);

// ─── NVENC enums ─────────────────────────────────────────────────────────
//
// Enums this crate only writes carry the values it passes in plus their
// zero value, so `mem::zeroed` structs stay valid. `NV_ENC_PIC_TYPE` comes
// back from the driver and stays complete. `NV_ENC_PIC_STRUCT` has no zero
// value and is a plain `u32`.

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NV_ENC_DEVICE_TYPE {
    DIRECTX = 0,
    CUDA = 1,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NV_ENC_INPUT_RESOURCE_TYPE {
    DIRECTX = 0,
    CUDADEVICEPTR = 1,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NV_ENC_BUFFER_FORMAT {
    UNDEFINED = 0x00000000,
    NV12 = 0x00000001,
    YUV444 = 0x00001000,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NV_ENC_PIC_TYPE {
    P = 0,
    B = 1,
    I = 2,
    IDR = 3,
    BI = 4,
    SKIPPED = 5,
}

pub const NV_ENC_PIC_STRUCT_FRAME: u32 = 0x01;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NV_ENC_TUNING_INFO {
    UNDEFINED = 0,
    HIGH_QUALITY = 1,
}

pub const NV_ENC_PARAMS_RC_CONSTQP: u32 = 0x0;
pub const NV_ENC_PARAMS_RC_VBR: u32 = 0x1;
pub const NV_ENC_PARAMS_RC_CBR: u32 = 0x2;

// ─── NVENC params structs ────────────────────────────────────────────────

pub const NVENCAPI_MAJOR_VERSION: u32 = 13;
pub const NVENCAPI_MINOR_VERSION: u32 = 0;
pub const NVENCAPI_VERSION: u32 = NVENCAPI_MAJOR_VERSION | (NVENCAPI_MINOR_VERSION << 24);

/// `NVENCAPI_STRUCT_VERSION(ver)`.
#[inline]
pub const fn nvenc_struct_version(struct_ver: u32) -> u32 {
    NVENCAPI_VERSION | (struct_ver << 16) | (0x7 << 28)
}

pub const NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS_VER: u32 = nvenc_struct_version(1);
pub const NV_ENCODE_API_FUNCTION_LIST_VER: u32 = nvenc_struct_version(2);

#[repr(C)]
pub struct NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS {
    pub version: u32,
    pub deviceType: NV_ENC_DEVICE_TYPE,
    pub device: *mut c_void,
    pub reserved: *mut c_void,
    pub apiVersion: u32,
    pub reserved1: [u32; 253],
    pub reserved2: [*mut c_void; 64],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NV_ENC_RC_PARAMS {
    pub version: u32,
    pub rateControlMode: u32,
    pub constQP_interP: u32,
    pub constQP_interB: u32,
    pub constQP_intra: u32,
    pub averageBitRate: u32,
    pub maxBitRate: u32,
    pub vbvBufferSize: u32,
    pub vbvInitialDelay: u32,
    pub reserved: [u32; 247],
}

/// Codec-specific config, kept opaque.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NV_ENC_CODEC_CONFIG {
    pub reserved: [u32; 256],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NV_ENC_CONFIG {
    pub version: u32,
    pub profileGUID: GUID,
    pub gopLength: u32,
    pub frameIntervalP: i32,
    pub monoChromeEncoding: u32,
    pub frameFieldMode: u32,
    pub mvPrecision: u32,
    pub rcParams: NV_ENC_RC_PARAMS,
    pub encodeCodecConfig: NV_ENC_CODEC_CONFIG,
    pub reserved: [u32; 278],
    pub reserved2: [*mut c_void; 64],
}

#[repr(C)]
pub struct NV_ENC_INITIALIZE_PARAMS {
    pub version: u32,
    pub encodeGUID: GUID,
    pub presetGUID: GUID,
    pub encodeWidth: u32,
    pub encodeHeight: u32,
    pub darWidth: u32,
    pub darHeight: u32,
    pub frameRateNum: u32,
    pub frameRateDen: u32,
    pub enableEncodeAsync: u32,
    pub enablePTD: u32,
    pub reportSliceOffsets: u32,
    pub enableSubFrameWrite: u32,
    pub enableExternalMEHints: u32,
    pub enableMEOnlyMode: u32,
    pub enableWeightedPrediction: u32,
    pub enableOutputInVidmem: u32,
    pub reserved1: u32,
    pub privDataSize: u32,
    pub privData: *mut c_void,
    pub encodeConfig: *mut NV_ENC_CONFIG,
    pub maxEncodeWidth: u32,
    pub maxEncodeHeight: u32,
    pub maxMEHintCountsPerBlock: [u32; 2],
    pub tuningInfo: NV_ENC_TUNING_INFO,
    pub reserved: [u32; 289],
    pub reserved2: [*mut c_void; 64],
}

#[repr(C)]
pub struct NV_ENC_REGISTER_RESOURCE {
    pub version: u32,
    pub resourceType: NV_ENC_INPUT_RESOURCE_TYPE,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub subResourceIndex: u32,
    pub resourceToRegister: *mut c_void,
    pub registeredResource: *mut c_void,
    pub bufferFormat: NV_ENC_BUFFER_FORMAT,
    pub bufferUsage: u32,
    pub pInputFencePoint: *mut c_void,
    pub pOutputFencePoint: *mut c_void,
    pub reserved: [u32; 247],
    pub reserved2: [*mut c_void; 62],
}

#[repr(C)]
pub struct NV_ENC_MAP_INPUT_RESOURCE {
    pub version: u32,
    pub subResourceIndex: u32,
    pub inputResource: *mut c_void,
    pub registeredResource: *mut c_void,
    pub mappedResource: *mut c_void,
    pub mappedBufferFmt: NV_ENC_BUFFER_FORMAT,
    pub reserved: [u32; 251],
    pub reserved2: [*mut c_void; 63],
}

#[repr(C)]
pub struct NV_ENC_CREATE_BITSTREAM_BUFFER {
    pub version: u32,
    pub bitstreamBuffer: *mut c_void,
    pub size: u32,
    pub memoryHeap: u32,
    pub reserved: [u32; 252],
    pub reserved2: [*mut c_void; 64],
}

#[repr(C)]
pub struct NV_ENC_PIC_PARAMS {
    pub version: u32,
    pub inputWidth: u32,
    pub inputHeight: u32,
    pub inputPitch: u32,
    pub encodePicFlags: u32,
    pub frameIdx: u32,
    pub inputTimeStamp: u64,
    pub inputDuration: u64,
    pub inputBuffer: *mut c_void,
    pub outputBitstream: *mut c_void,
    pub completionEvent: *mut c_void,
    pub bufferFmt: NV_ENC_BUFFER_FORMAT,
    pub pictureStruct: u32,
    pub pictureType: NV_ENC_PIC_TYPE,
    pub codecPicParams: [u32; 256],
    pub meHintCountsPerBlock: [u32; 2],
    pub meExternalHints: *mut c_void,
    pub reserved1: [u32; 6],
    pub reserved2: [*mut c_void; 2],
    pub qpDeltaMap: *mut i8,
    pub qpDeltaMapSize: u32,
    pub reservedBitFields: u32,
    pub meHintRefPicDist: [u32; 2],
    pub alphaBuffer: *mut c_void,
    pub reserved3: [u32; 286],
    pub reserved4: [*mut c_void; 60],
}

#[repr(C)]
pub struct NV_ENC_LOCK_BITSTREAM {
    pub version: u32,
    pub doNotWait: u32,
    pub ltrFrame: u32,
    pub reservedBitFields: u32,
    pub outputBitstream: *mut c_void,
    pub sliceOffsets: *mut u32,
    pub frameIdx: u32,
    pub hwEncodeStatus: u32,
    pub numSlices: u32,
    pub bitstreamSizeInBytes: u32,
    pub outputTimeStamp: u64,
    pub outputDuration: u64,
    pub bitstreamBufferPtr: *mut c_void,
    pub pictureType: NV_ENC_PIC_TYPE,
    pub pictureStruct: u32,
    pub frameAvgQP: u32,
    pub frameSatd: u32,
    pub ltrFrameIdx: u32,
    pub ltrFrameBitmap: u32,
    pub temporalId: u32,
    pub reserved: [u32; 13],
    pub intraMBCount: u32,
    pub interMBCount: u32,
    pub averageMVX: i32,
    pub averageMVY: i32,
    pub reserved1: [u32; 226],
    pub reserved2: [*mut c_void; 64],
}

pub const NV_ENC_PIC_FLAG_EOS: u32 = 0x01;
pub const NV_ENC_PIC_FLAG_FORCEIDR: u32 = 0x04;

#[repr(C)]
pub struct NV_ENC_PRESET_CONFIG {
    pub version: u32,
    pub presetCfg: NV_ENC_CONFIG,
    pub reserved: [u32; 255],
    pub reserved2: [*mut c_void; 64],
}

/// Subset of `NV_ENCODE_API_FUNCTION_LIST` that is called; the rest stay
/// opaque pointers so the table keeps its layout.
#[repr(C)]
pub struct NV_ENCODE_API_FUNCTION_LIST {
    pub version: u32,
    pub reserved: u32,
    /// `nvEncOpenEncodeSession` through `nvEncGetEncodePresetGUIDs`.
    pub _capability_queries: [*const c_void; 10],
    pub nvEncGetEncodePresetConfig: Option<
        unsafe extern "C" fn(*mut c_void, GUID, GUID, *mut NV_ENC_PRESET_CONFIG) -> NVENCSTATUS,
    >,
    pub nvEncInitializeEncoder:
        Option<unsafe extern "C" fn(*mut c_void, *mut NV_ENC_INITIALIZE_PARAMS) -> NVENCSTATUS>,
    /// `nvEncCreateInputBuffer`, `nvEncDestroyInputBuffer`.
    pub _input_buffers: [*const c_void; 2],
    pub nvEncCreateBitstreamBuffer: Option<
        unsafe extern "C" fn(*mut c_void, *mut NV_ENC_CREATE_BITSTREAM_BUFFER) -> NVENCSTATUS,
    >,
    pub nvEncDestroyBitstreamBuffer:
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> NVENCSTATUS>,
    pub nvEncEncodePicture:
        Option<unsafe extern "C" fn(*mut c_void, *mut NV_ENC_PIC_PARAMS) -> NVENCSTATUS>,
    pub nvEncLockBitstream:
        Option<unsafe extern "C" fn(*mut c_void, *mut NV_ENC_LOCK_BITSTREAM) -> NVENCSTATUS>,
    pub nvEncUnlockBitstream: Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> NVENCSTATUS>,
    /// Input buffer locking, stats, sequence params and async events.
    pub _host_input_and_events: [*const c_void; 6],
    pub nvEncMapInputResource:
        Option<unsafe extern "C" fn(*mut c_void, *mut NV_ENC_MAP_INPUT_RESOURCE) -> NVENCSTATUS>,
    pub nvEncUnmapInputResource:
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> NVENCSTATUS>,
    pub nvEncDestroyEncoder: Option<unsafe extern "C" fn(*mut c_void) -> NVENCSTATUS>,
    /// `nvEncInvalidateRefFrames`.
    pub _invalidate_ref_frames: *const c_void,
    pub nvEncOpenEncodeSessionEx: Option<
        unsafe extern "C" fn(
            *mut NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS,
            *mut *mut c_void,
        ) -> NVENCSTATUS,
    >,
    pub nvEncRegisterResource:
        Option<unsafe extern "C" fn(*mut c_void, *mut NV_ENC_REGISTER_RESOURCE) -> NVENCSTATUS>,
    pub nvEncUnregisterResource:
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> NVENCSTATUS>,
    /// Reconfigure, a reserved slot, motion-estimation-only entries,
    /// `nvEncGetLastErrorString` and `nvEncSetIOCudaStreams`.
    pub _reconfigure_and_motion: [*const c_void; 7],
    pub nvEncGetEncodePresetConfigEx: Option<
        unsafe extern "C" fn(
            *mut c_void,
            GUID,
            GUID,
            NV_ENC_TUNING_INFO,
            *mut NV_ENC_PRESET_CONFIG,
        ) -> NVENCSTATUS,
    >,
    /// Three newer entry points followed by the SDK's 275 reserved slots.
    pub _tail: [*const c_void; 278],
}

unsafe extern "C" {
    pub fn NvEncodeAPIGetMaxSupportedVersion(version: *mut u32) -> NVENCSTATUS;
    pub fn NvEncodeAPICreateInstance(
        function_list: *mut NV_ENCODE_API_FUNCTION_LIST,
    ) -> NVENCSTATUS;
}

// ═══════════════════════════════════════════════════════════════════════════
//  CUDA DRIVER: context and 2D copies
// ═══════════════════════════════════════════════════════════════════════════

unsafe extern "C" {
    pub fn cuCtxGetCurrent(pctx: *mut CUcontext) -> CUresult;
    pub fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;
    pub fn cuMemcpy2DAsync_v2(pCopy: *const CUDA_MEMCPY2D, hStream: CUstream) -> CUresult;
}

/// `CU_MEMORYTYPE_DEVICE` from `CUmemorytype`.
pub const CU_MEMORYTYPE_DEVICE: c_uint = 0x02;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CUDA_MEMCPY2D {
    pub srcXInBytes: usize,
    pub srcY: usize,
    pub srcMemoryType: c_uint,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: *const c_void,
    pub srcPitch: usize,
    pub dstXInBytes: usize,
    pub dstY: usize,
    pub dstMemoryType: c_uint,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: *mut c_void,
    pub dstPitch: usize,
    pub WidthInBytes: usize,
    pub Height: usize,
}

impl CUDA_MEMCPY2D {
    /// Pitched device → device copy of `width_bytes × rows`.
    pub fn device_to_device(
        src: CUdeviceptr,
        src_pitch: usize,
        dst: CUdeviceptr,
        dst_pitch: usize,
        width_bytes: usize,
        rows: usize,
    ) -> Self {
        Self {
            srcXInBytes: 0,
            srcY: 0,
            srcMemoryType: CU_MEMORYTYPE_DEVICE,
            srcHost: std::ptr::null(),
            srcDevice: src,
            srcArray: std::ptr::null(),
            srcPitch: src_pitch,
            dstXInBytes: 0,
            dstY: 0,
            dstMemoryType: CU_MEMORYTYPE_DEVICE,
            dstHost: std::ptr::null_mut(),
            dstDevice: dst,
            dstArray: std::ptr::null_mut(),
            dstPitch: dst_pitch,
            WidthInBytes: width_bytes,
            Height: rows,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  HELPERS
// ═══════════════════════════════════════════════════════════════════════════

#[inline]
pub fn check_cu(result: CUresult, context: &str) -> Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(EngineError::Decode(format!(
            "{context}: CUDA error code {result}"
        )))
    }
}

#[inline]
pub fn check_nvenc(status: NVENCSTATUS, context: &str) -> Result<()> {
    if status == NV_ENC_SUCCESS {
        Ok(())
    } else {
        Err(EngineError::Encode(format!(
            "{context}: NVENC error code {status} ({})",
            nvenc_status_name(status)
        )))
    }
}

/// Names for the statuses above; anything else reports as unknown.
#[inline]
pub const fn nvenc_status_name(status: NVENCSTATUS) -> &'static str {
    match status {
        NV_ENC_SUCCESS => "NV_ENC_SUCCESS",
        NV_ENC_ERR_INVALID_PARAM => "NV_ENC_ERR_INVALID_PARAM",
        NV_ENC_ERR_OUT_OF_MEMORY => "NV_ENC_ERR_OUT_OF_MEMORY",
        NV_ENC_ERR_INVALID_VERSION => "NV_ENC_ERR_INVALID_VERSION",
        NV_ENC_ERR_NEED_MORE_INPUT => "NV_ENC_ERR_NEED_MORE_INPUT",
        _ => "NV_ENC_ERR_UNKNOWN",
    }
}
