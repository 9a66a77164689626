//! NVDEC hardware decoder with device-resident NV12 output.
//!
//! ```text
//! Packet ──(host bytes)──▸ cuvidParseVideoData
//!                                │ callbacks
//!                                ▼
//!                 cuvidDecodePicture (NVDEC)
//!                                │
//!            display queue ──▸ output_picture(target)
//!                                │
//!                      cuvidMapVideoFrame64
//!                                │
//!           cuMemcpy2DAsync Y + UV ──▸ target surface (ctx stream)
//!                                │
//!                     cuvidUnmapVideoFrame64
//! ```
//!
//! NVDEC surfaces are a small pool, so every picture is copied into a
//! caller-owned surface and the decoder surface is returned at once.

use std::collections::VecDeque;
use std::ffi::{c_int, c_short, c_uint, c_ulong, c_ulonglong, c_void};
use std::ptr;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use vtc_core::buffer::{Packet, Surface};
use vtc_core::codec_traits::{DecodeSession, DecoderConfig, PictureInfo, SequenceInfo};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_core::types::PixelFormat;
use vtc_cuda::CudaBackend;

use crate::cuda_ctx::{CudaContextGuard, primary_context, raw_stream};
use crate::params::decode_codec;
use crate::sys::*;

/// Upper bound on NVDEC decode surfaces; also sizes the keyframe table.
const MAX_DECODE_SURFACES: usize = 32;
/// The parser may read past the payload end.
const PAYLOAD_PADDING: usize = 64;

// ─── Decoder callback state ─────────────────────────────────────────────

/// Shared between the parser callbacks and [`NvDecoder`].
struct CallbackState {
    decoder: CUvideodecoder,
    codec: cudaVideoCodec,
    format: Option<CUVIDEOFORMAT>,
    /// Output geometry, rounded up to even for NV12.
    target: (u32, u32),
    pending_display: VecDeque<CUVIDPARSERDISPINFO>,
    /// Intra flag of the picture last decoded into each surface.
    intra: [bool; MAX_DECODE_SURFACES],
    /// First failure raised inside a callback.
    error: Option<EngineError>,
}

impl CallbackState {
    fn fail(&mut self, err: EngineError) -> c_int {
        if self.error.is_none() {
            self.error = Some(err);
        }
        0
    }
}

// ─── NvDecoder ───────────────────────────────────────────────────────────

/// NVDEC session implementing [`DecodeSession`].
pub struct NvDecoder {
    parser: CUvideoparser,
    ctx: Arc<ExecutionContext>,
    cuda_context: CUcontext,
    state: Box<CallbackState>,
    eos_sent: bool,
    pictures: u64,
}

// SAFETY: the decode task owns the session and drives it from one thread at
// a time; every driver call binds the primary context first.
unsafe impl Send for NvDecoder {}

impl NvDecoder {
    /// Open a parser for `config.codec`.
    ///
    /// The hardware decoder itself is created on the first sequence header.
    pub fn open(
        ctx: &Arc<ExecutionContext>,
        cuda: &CudaBackend,
        config: &DecoderConfig,
    ) -> Result<Self> {
        let codec = decode_codec(config.codec)?;
        let cuda_context = primary_context(cuda.device());
        let _guard = CudaContextGuard::make_current(cuda_context)?;

        let mut state = Box::new(CallbackState {
            decoder: ptr::null_mut(),
            codec,
            format: None,
            target: (0, 0),
            pending_display: VecDeque::new(),
            intra: [false; MAX_DECODE_SURFACES],
            error: None,
        });

        // SAFETY: all-zero is the documented initial state for parser params.
        let mut params: CUVIDPARSERPARAMS = unsafe { std::mem::zeroed() };
        params.CodecType = codec;
        params.ulMaxNumDecodeSurfaces = 8;
        params.ulMaxDisplayDelay = 4;
        params.pUserData = (&mut *state as *mut CallbackState).cast::<c_void>();
        params.pfnSequenceCallback = Some(sequence_callback);
        params.pfnDecodePicture = Some(decode_callback);
        params.pfnDisplayPicture = Some(display_callback);

        let mut parser: CUvideoparser = ptr::null_mut();
        // SAFETY: params is initialised and `state` is boxed, so the user
        // data pointer stays valid for the parser's lifetime.
        unsafe {
            check_cu(
                cuvidCreateVideoParser(&mut parser, &mut params),
                "cuvidCreateVideoParser",
            )?;
        }
        info!(
            codec = ?config.codec,
            coded_width = config.coded_width,
            coded_height = config.coded_height,
            "NVDEC parser created"
        );
        Ok(Self {
            parser,
            ctx: Arc::clone(ctx),
            cuda_context,
            state,
            eos_sent: false,
            pictures: 0,
        })
    }

    fn parse(&mut self, packet: &mut CUVIDSOURCEDATAPACKET, what: &str) -> Result<()> {
        let _guard = CudaContextGuard::make_current(self.cuda_context)?;
        // SAFETY: the parser is live and the payload outlives the call; the
        // parser copies what it keeps.
        let rc = unsafe { cuvidParseVideoData(self.parser, packet) };
        if let Some(err) = self.state.error.take() {
            return Err(err);
        }
        check_cu(rc, what)
    }

    fn map_and_copy(&mut self, disp: &CUVIDPARSERDISPINFO, target: &Surface) -> Result<()> {
        let decoder = self.state.decoder;
        if decoder.is_null() {
            return Err(EngineError::Decode("NVDEC decoder not created yet".into()));
        }
        let (width, height) = self.state.target;
        let stream = raw_stream(&self.ctx)?;
        let _guard = CudaContextGuard::make_current(self.cuda_context)?;

        let mut src_ptr: CUdeviceptr = 0;
        let mut src_pitch: c_uint = 0;
        // SAFETY: all-zero is a valid CUVIDPROCPARAMS.
        let mut proc_params: CUVIDPROCPARAMS = unsafe { std::mem::zeroed() };
        proc_params.progressive_frame = disp.progressive_frame;
        proc_params.top_field_first = disp.top_field_first;
        proc_params.output_stream = stream;

        // SAFETY: decoder is live; the picture index came from the parser.
        unsafe {
            check_cu(
                cuvidMapVideoFrame64(
                    decoder,
                    disp.picture_index,
                    &mut src_ptr,
                    &mut src_pitch,
                    &mut proc_params,
                ),
                "cuvidMapVideoFrame64",
            )?;
        }

        let src_pitch = src_pitch as usize;
        let dst_ptr = target.device_ptr();
        let luma_rows = height as usize;
        let planes = [
            CUDA_MEMCPY2D::device_to_device(
                src_ptr,
                src_pitch,
                dst_ptr,
                target.pitch(),
                width as usize,
                luma_rows,
            ),
            CUDA_MEMCPY2D::device_to_device(
                src_ptr + (src_pitch * luma_rows) as CUdeviceptr,
                src_pitch,
                dst_ptr + target.plane_offset(1) as CUdeviceptr,
                target.pitch(),
                width as usize,
                luma_rows / 2,
            ),
        ];

        let mut copied = Ok(());
        for (plane, copy) in ["Y", "UV"].into_iter().zip(&planes) {
            // SAFETY: source is the mapped NVDEC surface; the target layout
            // was checked against the sequence geometry.
            let rc = unsafe { cuMemcpy2DAsync_v2(copy, stream) };
            copied = check_cu(rc, &format!("cuMemcpy2DAsync_v2 ({plane} plane)"));
            if copied.is_err() {
                break;
            }
        }

        // Copies are ordered on the stream before the surface is reused.
        // SAFETY: src_ptr came from cuvidMapVideoFrame64 on this decoder.
        let unmapped = unsafe {
            check_cu(
                cuvidUnmapVideoFrame64(decoder, src_ptr),
                "cuvidUnmapVideoFrame64",
            )
        };
        copied.and(unmapped)
    }
}

impl DecodeSession for NvDecoder {
    fn submit(&mut self, packet: Option<&Packet>) -> Result<()> {
        let Some(packet) = packet else {
            if !self.eos_sent {
                let mut eos = CUVIDSOURCEDATAPACKET {
                    flags: CUVID_PKT_ENDOFSTREAM,
                    payload_size: 0,
                    payload: ptr::null(),
                    timestamp: 0,
                };
                self.parse(&mut eos, "cuvidParseVideoData (EOS)")?;
                self.eos_sent = true;
                debug!(pending = self.state.pending_display.len(), "NVDEC drained");
            }
            return Ok(());
        };
        if self.eos_sent {
            return Err(EngineError::Decode(
                "packet submitted after end of stream".into(),
            ));
        }
        if packet.data.is_empty() {
            trace!(pts = packet.pts, "skipping empty packet");
            return Ok(());
        }

        let payload_size = packet.data.len();
        let mut padded = Vec::with_capacity(payload_size + PAYLOAD_PADDING);
        padded.extend_from_slice(&packet.data);
        padded.resize(payload_size + PAYLOAD_PADDING, 0);

        // Timestamps are carried bit-for-bit so negative pts survive.
        let mut pkt = CUVIDSOURCEDATAPACKET {
            flags: CUVID_PKT_TIMESTAMP,
            payload_size: payload_size as c_ulong,
            payload: padded.as_ptr(),
            timestamp: packet.pts as c_ulonglong,
        };
        self.parse(&mut pkt, "cuvidParseVideoData")
    }

    fn sequence(&self) -> Option<SequenceInfo> {
        self.state.format.as_ref().map(|_| SequenceInfo {
            width: self.state.target.0,
            height: self.state.target.1,
            format: PixelFormat::Nv12,
        })
    }

    fn ready(&self) -> usize {
        self.state.pending_display.len()
    }

    fn output_picture(&mut self, target: &Surface) -> Result<PictureInfo> {
        self.ctx.check_surface(target)?;
        let sequence = self
            .sequence()
            .ok_or_else(|| EngineError::Decode("no sequence header decoded yet".into()))?;
        target.expect_layout(sequence.width, sequence.height, sequence.format)?;
        let disp = self
            .state
            .pending_display
            .pop_front()
            .ok_or_else(|| EngineError::Decode("no decoded picture is ready".into()))?;

        self.map_and_copy(&disp, target)?;
        let is_keyframe = usize::try_from(disp.picture_index)
            .ok()
            .and_then(|i| self.state.intra.get(i).copied())
            .unwrap_or(false);
        self.pictures += 1;
        let info = PictureInfo {
            pts: disp.timestamp as i64,
            is_keyframe,
        };
        trace!(pts = info.pts, is_keyframe, picture = self.pictures, "NVDEC picture out");
        Ok(info)
    }
}

impl Drop for NvDecoder {
    fn drop(&mut self) {
        let _guard = CudaContextGuard::make_current(self.cuda_context).ok();
        if !self.parser.is_null() {
            // SAFETY: created by cuvidCreateVideoParser; stops callbacks.
            unsafe {
                cuvidDestroyVideoParser(self.parser);
            }
        }
        if !self.state.decoder.is_null() {
            // SAFETY: created by cuvidCreateDecoder in the sequence callback.
            unsafe {
                cuvidDestroyDecoder(self.state.decoder);
            }
        }
        debug!(pictures = self.pictures, "NVDEC decoder destroyed");
    }
}

// ─── Parser callbacks ────────────────────────────────────────────────────
//
// Invoked synchronously from cuvidParseVideoData on the calling thread.

/// Sequence header parsed: (re)create the hardware decoder.
unsafe extern "C" fn sequence_callback(
    user_data: *mut c_void,
    format: *mut CUVIDEOFORMAT,
) -> c_int {
    // SAFETY: user data is the boxed CallbackState owned by NvDecoder.
    let state = unsafe { &mut *user_data.cast::<CallbackState>() };
    // SAFETY: the parser passes a valid format for the callback's duration.
    let fmt = unsafe { *format };

    if fmt.bit_depth_luma_minus8 != 0 || fmt.chroma_format != cudaVideoChromaFormat::_420 {
        return state.fail(EngineError::Unsupported(format!(
            "NVDEC output is 8-bit NV12; stream is {}-bit {:?}",
            8 + u32::from(fmt.bit_depth_luma_minus8),
            fmt.chroma_format
        )));
    }

    let surfaces = u32::from(fmt.min_num_decode_surfaces)
        .max(8)
        .min(MAX_DECODE_SURFACES as u32);
    let display_w = (fmt.display_area_right - fmt.display_area_left).max(0) as u32;
    let display_h = (fmt.display_area_bottom - fmt.display_area_top).max(0) as u32;
    let target = ((display_w + 1) & !1, (display_h + 1) & !1);

    if !state.decoder.is_null() {
        // SAFETY: the previous decoder is idle between sequences.
        unsafe { cuvidDestroyDecoder(state.decoder) };
        state.decoder = ptr::null_mut();
    }

    // SAFETY: all-zero is a valid starting point for create info.
    let mut create: CUVIDDECODECREATEINFO = unsafe { std::mem::zeroed() };
    create.ulWidth = fmt.coded_width as c_ulong;
    create.ulHeight = fmt.coded_height as c_ulong;
    create.ulNumDecodeSurfaces = surfaces as c_ulong;
    create.CodecType = state.codec;
    create.ChromaFormat = fmt.chroma_format;
    create.ulCreationFlags = cudaVideoCreateFlags::PreferCUVID as c_ulong;
    create.ulMaxWidth = fmt.coded_width as c_ulong;
    create.ulMaxHeight = fmt.coded_height as c_ulong;
    create.display_area = CUVIDRECT {
        left: fmt.display_area_left,
        top: fmt.display_area_top,
        right: fmt.display_area_right,
        bottom: fmt.display_area_bottom,
    };
    create.OutputFormat = cudaVideoSurfaceFormat::NV12;
    create.DeinterlaceMode = cudaVideoDeinterlaceMode::Adaptive;
    create.ulTargetWidth = target.0 as c_ulong;
    create.ulTargetHeight = target.1 as c_ulong;
    create.ulNumOutputSurfaces = 2;
    create.target_rect = CUVIDRECT {
        left: 0,
        top: 0,
        right: target.0 as c_short,
        bottom: target.1 as c_short,
    };

    // SAFETY: create info is fully initialised above.
    let rc = unsafe { cuvidCreateDecoder(&mut state.decoder, &mut create) };
    if rc != CUDA_SUCCESS {
        state.decoder = ptr::null_mut();
        return state.fail(EngineError::Decode(format!(
            "cuvidCreateDecoder: CUDA error code {rc}"
        )));
    }
    if let Some(prev) = state.format
        && (prev.coded_width, prev.coded_height) != (fmt.coded_width, fmt.coded_height)
    {
        warn!(
            from_width = prev.coded_width,
            from_height = prev.coded_height,
            to_width = fmt.coded_width,
            to_height = fmt.coded_height,
            "NVDEC sequence changed resolution"
        );
    }
    state.format = Some(fmt);
    state.target = target;
    debug!(
        coded_width = fmt.coded_width,
        coded_height = fmt.coded_height,
        width = target.0,
        height = target.1,
        surfaces,
        "NVDEC decoder created"
    );
    surfaces as c_int
}

/// Picture ready for decoding.
unsafe extern "C" fn decode_callback(
    user_data: *mut c_void,
    pic_params: *mut CUVIDPICPARAMS,
) -> c_int {
    // SAFETY: user data is the boxed CallbackState owned by NvDecoder.
    let state = unsafe { &mut *user_data.cast::<CallbackState>() };
    if state.decoder.is_null() {
        return state.fail(EngineError::Decode(
            "picture arrived before a sequence header".into(),
        ));
    }
    // SAFETY: the parser passes valid params for the callback's duration.
    let (index, intra) = unsafe { ((*pic_params).CurrPicIdx, (*pic_params).intra_pic_flag) };
    if let Some(slot) = usize::try_from(index)
        .ok()
        .and_then(|i| state.intra.get_mut(i))
    {
        *slot = intra != 0;
    }
    // SAFETY: decoder is live; params come straight from the parser.
    let rc = unsafe { cuvidDecodePicture(state.decoder, pic_params) };
    if rc != CUDA_SUCCESS {
        return state.fail(EngineError::Decode(format!(
            "cuvidDecodePicture: CUDA error code {rc}"
        )));
    }
    1
}

/// Picture ready for display, in presentation order.
unsafe extern "C" fn display_callback(
    user_data: *mut c_void,
    disp_info: *mut CUVIDPARSERDISPINFO,
) -> c_int {
    // SAFETY: user data is the boxed CallbackState owned by NvDecoder.
    let state = unsafe { &mut *user_data.cast::<CallbackState>() };
    if !disp_info.is_null() {
        // SAFETY: non-null display info is valid for the callback's duration.
        state.pending_display.push_back(unsafe { *disp_info });
    }
    1
}
