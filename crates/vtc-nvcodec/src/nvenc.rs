//! NVENC hardware encoder reading device-resident surfaces.
//!
//! ```text
//! Surface (NV12 / YUV444) ──(device ptr)──▸ nvEncRegisterResource (cached)
//!                                                 │
//!                                       nvEncMapInputResource
//!                                                 │
//!                                nvEncEncodePicture ──▸ bitstream slot
//!                                                 │
//!                     NEED_MORE_INPUT? ── yes ──▸ keep slot in flight
//!                                                 │ no
//!                          nvEncLockBitstream (every slot, in order)
//!                                                 │
//!                            Packet ◂── copy ── nvEncUnlockBitstream
//!                                                 │
//!                                       nvEncUnmapInputResource
//! ```
//!
//! Registrations are cached by device pointer: pooled surfaces come back
//! with the same address, so steady state registers nothing.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::Arc;
use std::{fs, mem, ptr};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use vtc_core::buffer::{Packet, StreamKind, Surface};
use vtc_core::codec_traits::{EncodeSession, EncoderConfig};
use vtc_core::context::ExecutionContext;
use vtc_core::error::{EngineError, Result};
use vtc_core::types::PixelFormat;
use vtc_cuda::CudaBackend;

use crate::cuda_ctx::{CudaContextGuard, primary_context};
use crate::params::{DtsQueue, NvEncSettings};
use crate::sys::*;

/// Struct versions tried newest first when the driver rejects ours.
const VERSION_CANDIDATES: [u32; 8] = [8, 7, 6, 5, 4, 3, 2, 1];

// ─── Registration cache ──────────────────────────────────────────────────

/// NVENC resource registrations keyed by `(device pointer, pitch)`.
struct RegistrationCache {
    entries: HashMap<(u64, u32), *mut c_void>,
}

impl RegistrationCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: (u64, u32)) -> Option<*mut c_void> {
        self.entries.get(&key).copied()
    }

    fn insert(&mut self, key: (u64, u32), handle: *mut c_void) {
        self.entries.insert(key, handle);
    }

    fn drain(&mut self) -> impl Iterator<Item = *mut c_void> + '_ {
        self.entries.drain().map(|(_, handle)| handle)
    }
}

/// One submitted picture whose output has not been locked yet.
struct InFlight {
    bitstream: *mut c_void,
    mapped: *mut c_void,
    /// Keeps the input memory alive until NVENC is done with it.
    _surface: Surface,
}

pub(crate) fn nvenc_version_parts(v: u32) -> (u32, u32) {
    (v & 0x00ff_ffff, (v >> 24) & 0xff)
}

fn resolved_libnvidia_encode_path() -> Option<String> {
    let maps = fs::read_to_string("/proc/self/maps").ok()?;
    maps.lines()
        .filter_map(|line| line.split_whitespace().last())
        .find(|p| p.contains("libnvidia-encode.so"))
        .map(str::to_string)
}

fn required<T>(f: Option<T>, name: &str) -> Result<T> {
    f.ok_or_else(|| EngineError::Encode(format!("{name} missing in NVENC function list")))
}

// ─── NvEncoder ───────────────────────────────────────────────────────────

/// NVENC session implementing [`EncodeSession`].
pub struct NvEncoder {
    encoder: *mut c_void,
    fns: NV_ENCODE_API_FUNCTION_LIST,
    ctx: Arc<ExecutionContext>,
    cuda_context: CUcontext,
    settings: NvEncSettings,
    format: PixelFormat,
    reg_cache: RegistrationCache,
    bitstreams: Vec<*mut c_void>,
    free: Vec<*mut c_void>,
    in_flight: VecDeque<InFlight>,
    dts: DtsQueue,
    frame_duration: i64,
    frame_idx: u32,
    flushed: bool,
}

// SAFETY: the encode task owns the session and drives it from one thread at
// a time; every NVENC call binds the primary context first.
unsafe impl Send for NvEncoder {}

impl NvEncoder {
    /// Open and initialise an NVENC session for `config`.
    pub fn open(
        ctx: &Arc<ExecutionContext>,
        cuda: &CudaBackend,
        config: &EncoderConfig,
    ) -> Result<Self> {
        let settings = NvEncSettings::from_config(config)?;
        let cuda_context = primary_context(cuda.device());
        let _guard = CudaContextGuard::make_current(cuda_context)?;

        let mut api_version = NVENCAPI_VERSION;
        let mut max_supported = 0u32;
        // SAFETY: only writes the out-parameter.
        unsafe {
            check_nvenc(
                NvEncodeAPIGetMaxSupportedVersion(&mut max_supported),
                "NvEncodeAPIGetMaxSupportedVersion",
            )?;
        }
        let (compiled_major, compiled_minor) = nvenc_version_parts(NVENCAPI_VERSION);
        let (runtime_major, runtime_minor) = nvenc_version_parts(max_supported);
        info!(
            libnvidia_encode = ?resolved_libnvidia_encode_path(),
            compiled_api_major = compiled_major,
            compiled_api_minor = compiled_minor,
            runtime_max_api_major = runtime_major,
            runtime_max_api_minor = runtime_minor,
            "NVENC runtime environment"
        );
        if api_version > max_supported {
            info!(
                requested_api_version = api_version,
                max_supported,
                "NVENC API version exceeds driver support; downgrading"
            );
            api_version = max_supported;
        }

        // SAFETY: zeroed with version set is the documented input.
        let mut fns: NV_ENCODE_API_FUNCTION_LIST = unsafe { mem::zeroed() };
        fns.version = NV_ENCODE_API_FUNCTION_LIST_VER;
        // SAFETY: fills the function table in place.
        unsafe {
            check_nvenc(
                NvEncodeAPICreateInstance(&mut fns),
                "NvEncodeAPICreateInstance",
            )?;
        }
        let open_fn = required(fns.nvEncOpenEncodeSessionEx, "nvEncOpenEncodeSessionEx")?;

        // SAFETY: all-zero is a valid starting point.
        let mut open_params: NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS = unsafe { mem::zeroed() };
        open_params.version = NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS_VER;
        open_params.deviceType = NV_ENC_DEVICE_TYPE::CUDA;
        open_params.device = cuda_context;
        open_params.apiVersion = api_version;

        let mut encoder: *mut c_void = ptr::null_mut();
        // SAFETY: open_params is initialised; the context is current.
        let status = unsafe { open_fn(&mut open_params, &mut encoder) };
        check_nvenc(status, "nvEncOpenEncodeSessionEx")?;

        // From here on Drop cleans up whatever has been created.
        let mut this = Self {
            encoder,
            fns,
            ctx: Arc::clone(ctx),
            cuda_context,
            settings,
            format: config.format,
            reg_cache: RegistrationCache::new(),
            bitstreams: Vec::new(),
            free: Vec::new(),
            in_flight: VecDeque::new(),
            dts: DtsQueue::new(settings.b_frames, settings.framerate.frame_duration_us()),
            frame_duration: settings.framerate.frame_duration_us(),
            frame_idx: 0,
            flushed: false,
        };
        this.initialize()?;
        this.create_bitstreams()?;
        info!(
            codec = ?settings.codec,
            width = settings.width,
            height = settings.height,
            fps = %settings.framerate,
            gop = settings.gop_length,
            b_frames = settings.b_frames,
            rc_mode = settings.rc.mode,
            "NVENC encoder initialized"
        );
        Ok(this)
    }

    fn preset_config(&self) -> Result<Option<NV_ENC_CONFIG>> {
        let s = &self.settings;
        if let Some(get_ex) = self.fns.nvEncGetEncodePresetConfigEx {
            for ver in VERSION_CANDIDATES {
                // SAFETY: all-zero with versions set is the documented input.
                let mut preset: NV_ENC_PRESET_CONFIG = unsafe { mem::zeroed() };
                preset.version = nvenc_struct_version(ver);
                preset.presetCfg.version = nvenc_struct_version(ver);
                // SAFETY: the session is open; preset is a valid out-struct.
                let status = unsafe {
                    get_ex(
                        self.encoder,
                        s.encode_guid,
                        s.preset_guid,
                        NV_ENC_TUNING_INFO::HIGH_QUALITY,
                        &mut preset,
                    )
                };
                if status == NV_ENC_SUCCESS {
                    debug!(struct_version = ver, "NVENC preset loaded");
                    return Ok(Some(preset.presetCfg));
                }
                if status != NV_ENC_ERR_INVALID_VERSION {
                    check_nvenc(status, "nvEncGetEncodePresetConfigEx")?;
                }
            }
        }

        let Some(get_legacy) = self.fns.nvEncGetEncodePresetConfig else {
            return Ok(None);
        };
        for ver in VERSION_CANDIDATES {
            // SAFETY: all-zero is a valid preset out-struct.
            let mut preset: NV_ENC_PRESET_CONFIG = unsafe { mem::zeroed() };
            preset.version = nvenc_struct_version(ver);
            preset.presetCfg.version = nvenc_struct_version(ver);
            // SAFETY: the session is open; preset is a valid out-struct.
            let status =
                unsafe { get_legacy(self.encoder, s.encode_guid, s.preset_guid, &mut preset) };
            if status == NV_ENC_SUCCESS {
                debug!(struct_version = ver, "NVENC preset loaded (legacy)");
                return Ok(Some(preset.presetCfg));
            }
            if status != NV_ENC_ERR_INVALID_VERSION {
                check_nvenc(status, "nvEncGetEncodePresetConfig")?;
            }
        }
        Ok(None)
    }

    fn initialize(&mut self) -> Result<()> {
        let mut enc_config = match self.preset_config()? {
            Some(config) => config,
            None => {
                warn!("NVENC preset query failed on every struct version; using defaults");
                // SAFETY: all-zero lets the driver pick defaults.
                unsafe { mem::zeroed() }
            }
        };
        if enc_config.version == 0 {
            enc_config.version = nvenc_struct_version(8);
        }
        self.settings.apply(&mut enc_config);

        let s = &self.settings;
        // SAFETY: all-zero is a valid starting point.
        let mut init: NV_ENC_INITIALIZE_PARAMS = unsafe { mem::zeroed() };
        init.encodeGUID = s.encode_guid;
        init.presetGUID = s.preset_guid;
        init.encodeWidth = s.width;
        init.encodeHeight = s.height;
        init.darWidth = s.width;
        init.darHeight = s.height;
        init.frameRateNum = s.framerate.num;
        init.frameRateDen = s.framerate.den;
        init.enablePTD = 1;
        init.encodeConfig = &mut enc_config;
        init.tuningInfo = NV_ENC_TUNING_INFO::HIGH_QUALITY;
        init.maxEncodeWidth = s.width;
        init.maxEncodeHeight = s.height;

        let init_fn = required(self.fns.nvEncInitializeEncoder, "nvEncInitializeEncoder")?;
        for ver in VERSION_CANDIDATES {
            init.version = nvenc_struct_version(ver);
            // SAFETY: init points at enc_config, which outlives the call.
            let status = unsafe { init_fn(self.encoder, &mut init) };
            if status == NV_ENC_SUCCESS {
                return Ok(());
            }
            if status != NV_ENC_ERR_INVALID_VERSION {
                check_nvenc(status, "nvEncInitializeEncoder")?;
            }
        }
        Err(EngineError::Encode(
            "nvEncInitializeEncoder: every struct version was rejected".into(),
        ))
    }

    fn create_bitstreams(&mut self) -> Result<()> {
        let create_fn = required(
            self.fns.nvEncCreateBitstreamBuffer,
            "nvEncCreateBitstreamBuffer",
        )?;
        for _ in 0..self.settings.bitstream_buffers() {
            // SAFETY: all-zero with version set; NVENC allocates the buffer.
            let mut params: NV_ENC_CREATE_BITSTREAM_BUFFER = unsafe { mem::zeroed() };
            params.version = nvenc_struct_version(1);
            // SAFETY: the session is initialised.
            unsafe {
                check_nvenc(
                    create_fn(self.encoder, &mut params),
                    "nvEncCreateBitstreamBuffer",
                )?;
            }
            self.bitstreams.push(params.bitstreamBuffer);
            self.free.push(params.bitstreamBuffer);
        }
        debug!(count = self.bitstreams.len(), "NVENC bitstream buffers created");
        Ok(())
    }

    fn registration(&mut self, surface: &Surface) -> Result<*mut c_void> {
        let pitch = surface.pitch() as u32;
        let key = (surface.device_ptr(), pitch);
        if let Some(handle) = self.reg_cache.get(key) {
            return Ok(handle);
        }
        let reg_fn = required(self.fns.nvEncRegisterResource, "nvEncRegisterResource")?;
        // SAFETY: all-zero is a valid starting point.
        let mut reg: NV_ENC_REGISTER_RESOURCE = unsafe { mem::zeroed() };
        reg.version = nvenc_struct_version(1);
        reg.resourceType = NV_ENC_INPUT_RESOURCE_TYPE::CUDADEVICEPTR;
        reg.width = self.settings.width;
        reg.height = self.settings.height;
        reg.pitch = pitch;
        reg.resourceToRegister = key.0 as *mut c_void;
        reg.bufferFormat = self.settings.buffer_format;
        // SAFETY: the pointer is a live device allocation of the checked layout.
        unsafe {
            check_nvenc(reg_fn(self.encoder, &mut reg), "nvEncRegisterResource")?;
        }
        self.reg_cache.insert(key, reg.registeredResource);
        debug!(dev_ptr = key.0, pitch, "NVENC resource registered");
        Ok(reg.registeredResource)
    }

    fn unmap(&self, mapped: *mut c_void) -> Result<()> {
        let unmap_fn = required(self.fns.nvEncUnmapInputResource, "nvEncUnmapInputResource")?;
        // SAFETY: `mapped` came from nvEncMapInputResource on this session.
        unsafe {
            check_nvenc(
                unmap_fn(self.encoder, mapped),
                "nvEncUnmapInputResource",
            )
        }
    }

    /// Lock every in-flight slot in submission order.
    fn drain(&mut self) -> Result<Vec<Packet>> {
        let lock_fn = required(self.fns.nvEncLockBitstream, "nvEncLockBitstream")?;
        let unlock_fn = required(self.fns.nvEncUnlockBitstream, "nvEncUnlockBitstream")?;
        let mut out = Vec::with_capacity(self.in_flight.len());
        while let Some(slot) = self.in_flight.pop_front() {
            // SAFETY: all-zero with version set; blocking lock.
            let mut lock: NV_ENC_LOCK_BITSTREAM = unsafe { mem::zeroed() };
            lock.version = nvenc_struct_version(1);
            lock.outputBitstream = slot.bitstream;
            // SAFETY: the slot holds a submitted picture's output buffer.
            unsafe {
                check_nvenc(lock_fn(self.encoder, &mut lock), "nvEncLockBitstream")?;
            }
            // SAFETY: valid for bitstreamSizeInBytes while locked.
            let data = Bytes::copy_from_slice(unsafe {
                std::slice::from_raw_parts(
                    lock.bitstreamBufferPtr as *const u8,
                    lock.bitstreamSizeInBytes as usize,
                )
            });
            // SAFETY: locked above.
            let unlocked = unsafe {
                check_nvenc(
                    unlock_fn(self.encoder, slot.bitstream),
                    "nvEncUnlockBitstream",
                )
            };
            self.free.push(slot.bitstream);
            let unmapped = self.unmap(slot.mapped);
            unlocked.and(unmapped)?;

            let pts = lock.outputTimeStamp as i64;
            let packet = Packet {
                data,
                pts,
                dts: self.dts.next(pts),
                duration: self.frame_duration,
                is_keyframe: matches!(lock.pictureType, NV_ENC_PIC_TYPE::IDR | NV_ENC_PIC_TYPE::I),
                stream: StreamKind::Video,
            };
            trace!(
                pts = packet.pts,
                dts = packet.dts,
                bytes = packet.data.len(),
                keyframe = packet.is_keyframe,
                "NVENC packet"
            );
            out.push(packet);
        }
        Ok(out)
    }
}

impl EncodeSession for NvEncoder {
    fn encode(&mut self, surface: &Surface) -> Result<Vec<Packet>> {
        if self.flushed {
            return Err(EngineError::Encode("encode after flush".into()));
        }
        self.ctx.check_surface(surface)?;
        surface.expect_layout(self.settings.width, self.settings.height, self.format)?;
        let bitstream = self.free.pop().ok_or_else(|| {
            EngineError::Encode(format!(
                "all {} NVENC bitstream buffers are in flight",
                self.bitstreams.len()
            ))
        })?;

        // Upstream kernels on the compute stream must finish before NVENC reads.
        self.ctx.synchronize()?;
        let _guard = CudaContextGuard::make_current(self.cuda_context)?;
        let registered = self.registration(surface)?;

        let map_fn = required(self.fns.nvEncMapInputResource, "nvEncMapInputResource")?;
        // SAFETY: all-zero with version set.
        let mut map: NV_ENC_MAP_INPUT_RESOURCE = unsafe { mem::zeroed() };
        map.version = nvenc_struct_version(1);
        map.registeredResource = registered;
        // SAFETY: `registered` belongs to this session.
        let mapped = unsafe { check_nvenc(map_fn(self.encoder, &mut map), "nvEncMapInputResource") };
        if let Err(err) = mapped {
            self.free.push(bitstream);
            return Err(err);
        }

        let encode_fn = required(self.fns.nvEncEncodePicture, "nvEncEncodePicture")?;
        // SAFETY: all-zero with version set.
        let mut pic: NV_ENC_PIC_PARAMS = unsafe { mem::zeroed() };
        pic.version = nvenc_struct_version(1);
        pic.inputWidth = self.settings.width;
        pic.inputHeight = self.settings.height;
        pic.inputPitch = surface.pitch() as u32;
        pic.inputBuffer = map.mappedResource;
        pic.outputBitstream = bitstream;
        pic.bufferFmt = self.settings.buffer_format;
        pic.pictureStruct = NV_ENC_PIC_STRUCT_FRAME;
        pic.frameIdx = self.frame_idx;
        pic.inputTimeStamp = surface.pts as u64;
        pic.inputDuration = self.frame_duration as u64;
        if self.settings.idr_period > 0
            && self.frame_idx % self.settings.idr_period == 0
        {
            pic.encodePicFlags |= NV_ENC_PIC_FLAG_FORCEIDR;
        }

        // SAFETY: input and output handles belong to this session.
        let status = unsafe { encode_fn(self.encoder, &mut pic) };
        self.in_flight.push_back(InFlight {
            bitstream,
            mapped: map.mappedResource,
            _surface: surface.clone(),
        });
        self.dts.push(surface.pts);
        self.frame_idx = self.frame_idx.wrapping_add(1);

        match status {
            NV_ENC_ERR_NEED_MORE_INPUT => {
                trace!(in_flight = self.in_flight.len(), "NVENC needs more input");
                Ok(Vec::new())
            }
            NV_ENC_SUCCESS => self.drain(),
            other => {
                check_nvenc(other, "nvEncEncodePicture")?;
                Ok(Vec::new())
            }
        }
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        let _guard = CudaContextGuard::make_current(self.cuda_context)?;
        let encode_fn = required(self.fns.nvEncEncodePicture, "nvEncEncodePicture")?;
        // SAFETY: all-zero with version set.
        let mut eos: NV_ENC_PIC_PARAMS = unsafe { mem::zeroed() };
        eos.version = nvenc_struct_version(1);
        eos.encodePicFlags = NV_ENC_PIC_FLAG_EOS;
        // SAFETY: EOS carries no input buffer.
        unsafe {
            check_nvenc(encode_fn(self.encoder, &mut eos), "nvEncEncodePicture (EOS)")?;
        }
        self.flushed = true;
        let out = self.drain()?;
        info!(frames = self.frame_idx, tail = out.len(), "NVENC encoder flushed");
        Ok(out)
    }
}

impl Drop for NvEncoder {
    fn drop(&mut self) {
        let _guard = CudaContextGuard::make_current(self.cuda_context).ok();

        for slot in std::mem::take(&mut self.in_flight) {
            if let Err(err) = self.unmap(slot.mapped) {
                warn!(%err, "NVENC unmap on drop failed");
            }
        }
        if let Some(unreg_fn) = self.fns.nvEncUnregisterResource {
            for handle in self.reg_cache.drain().collect::<Vec<_>>() {
                // SAFETY: registered via nvEncRegisterResource on this session.
                unsafe {
                    unreg_fn(self.encoder, handle);
                }
            }
        }
        if let Some(destroy_fn) = self.fns.nvEncDestroyBitstreamBuffer {
            for buffer in self.bitstreams.drain(..) {
                // SAFETY: created via nvEncCreateBitstreamBuffer.
                unsafe {
                    destroy_fn(self.encoder, buffer);
                }
            }
        }
        if !self.encoder.is_null()
            && let Some(destroy_fn) = self.fns.nvEncDestroyEncoder
        {
            // SAFETY: opened via nvEncOpenEncodeSessionEx.
            unsafe {
                destroy_fn(self.encoder);
            }
        }
        debug!("NVENC encoder destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parts_split_major_and_minor() {
        assert_eq!(nvenc_version_parts(NVENCAPI_VERSION), (13, 0));
        assert_eq!(nvenc_version_parts(12 | (2 << 24)), (12, 2));
    }

    #[test]
    fn registration_cache_keys_on_pitch() {
        let mut cache = RegistrationCache::new();
        let handle = 0x10usize as *mut c_void;
        cache.insert((0x1000, 256), handle);
        assert_eq!(cache.get((0x1000, 256)), Some(handle));
        assert_eq!(cache.get((0x1000, 512)), None);
        assert_eq!(cache.drain().count(), 1);
        assert_eq!(cache.get((0x1000, 256)), None);
    }
}
