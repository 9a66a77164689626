//! [`DeviceBackend`] implementation on a CUDA device.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, DevicePtr};
use tracing::{debug, info, trace};
use vtc_core::backend::{BackendStream, Copy2d, DeviceBackend};
use vtc_core::buffer::{DeviceAllocation, Surface};
use vtc_core::codec_traits::{DecodeSession, DecoderConfig, EncodeSession, EncoderConfig};
use vtc_core::context::{ContextConfig, DeviceContext, ExecutionContext};
use vtc_core::error::{EngineError, Result};
use vtc_core::types::{ColorSpec, ConversionKind, Interpolation, PixelFormat, conversion_kind};

use crate::kernels::{CoeffsArg, Kernels};
use crate::memory::{CudaAllocation, CudaStreamHandle};

/// One CUDA device plus the compiled kernel module.
pub struct CudaBackend {
    device: Arc<CudaDevice>,
    kernels: Kernels,
}

impl CudaBackend {
    /// Open device `ordinal` and compile the kernels for it.
    pub fn new(ordinal: usize) -> Result<Arc<Self>> {
        let device = CudaDevice::new(ordinal)?;
        let kernels = Kernels::compile(&device)?;
        info!(
            device = ordinal,
            name = %device.name().unwrap_or_else(|_| "unknown".into()),
            "CUDA backend ready"
        );
        Ok(Arc::new(Self { device, kernels }))
    }

    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    fn resolve<'a>(&self, stream: &'a dyn BackendStream) -> Result<&'a CudaStreamHandle> {
        CudaStreamHandle::downcast(stream)
    }
}

/// Device context plus one stream on CUDA device `device`.
pub fn execution_context(device: usize, config: &ContextConfig) -> Result<Arc<ExecutionContext>> {
    let backend = CudaBackend::new(device)?;
    let device = DeviceContext::new(backend, config);
    ExecutionContext::new(&device)
}

fn surface_ptr(surface: &Surface) -> Result<u64> {
    Ok(CudaAllocation::downcast(surface.memory().allocation())?.device_ptr())
}

impl DeviceBackend for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn create_stream(&self) -> Result<Box<dyn BackendStream>> {
        Ok(Box::new(CudaStreamHandle::fork(&self.device)?))
    }

    fn alloc(&self, bytes: usize) -> Result<Box<dyn DeviceAllocation>> {
        let slice = self.device.alloc_zeros::<u8>(bytes.max(1))?;
        Ok(Box::new(CudaAllocation::new(slice)))
    }

    fn upload(
        &self,
        stream: &dyn BackendStream,
        src: &[u8],
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()> {
        let stream = self.resolve(stream)?;
        let dst = CudaAllocation::downcast(dst)?;
        copy.check_bounds(src.len(), dst.len())?;
        if copy.rows == 0 || copy.width_bytes == 0 {
            return Ok(());
        }
        let staging = self
            .device
            .htod_sync_copy(&src[copy.src_offset..copy.src_end()])?;
        // SAFETY: bounds were checked against both allocations above.
        unsafe {
            self.kernels.copy_2d(
                stream.stream(),
                *staging.device_ptr(),
                copy.src_pitch,
                dst.device_ptr() + copy.dst_offset as u64,
                copy.dst_pitch,
                copy.width_bytes,
                copy.rows,
            )?;
        }
        // Staging memory must outlive the kernel reading it.
        stream.synchronize()
    }

    fn download(
        &self,
        stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &mut [u8],
        copy: &Copy2d,
    ) -> Result<()> {
        let stream = self.resolve(stream)?;
        let src = CudaAllocation::downcast(src)?;
        copy.check_bounds(src.len(), dst.len())?;
        if copy.rows == 0 || copy.width_bytes == 0 {
            return Ok(());
        }
        let staging = self.device.alloc_zeros::<u8>(copy.width_bytes * copy.rows)?;
        // SAFETY: the source span was bounds-checked; staging is dense.
        unsafe {
            self.kernels.copy_2d(
                stream.stream(),
                src.device_ptr() + copy.src_offset as u64,
                copy.src_pitch,
                *staging.device_ptr(),
                copy.width_bytes,
                copy.width_bytes,
                copy.rows,
            )?;
        }
        stream.synchronize()?;
        let dense = self.device.dtoh_sync_copy(&staging)?;
        for (row, bytes) in dense.chunks_exact(copy.width_bytes).enumerate() {
            let at = copy.dst_offset + row * copy.dst_pitch;
            dst[at..at + copy.width_bytes].copy_from_slice(bytes);
        }
        Ok(())
    }

    fn copy(
        &self,
        stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()> {
        let stream = self.resolve(stream)?;
        let src = CudaAllocation::downcast(src)?;
        let dst = CudaAllocation::downcast(dst)?;
        if src.device_ptr() == dst.device_ptr() {
            return Err(EngineError::InvalidParameter(
                "source and destination share one allocation".into(),
            ));
        }
        copy.check_bounds(src.len(), dst.len())?;
        // SAFETY: bounds were checked against both allocations above.
        unsafe {
            self.kernels.copy_2d(
                stream.stream(),
                src.device_ptr() + copy.src_offset as u64,
                copy.src_pitch,
                dst.device_ptr() + copy.dst_offset as u64,
                copy.dst_pitch,
                copy.width_bytes,
                copy.rows,
            )
        }
    }

    fn synchronize(&self, stream: &dyn BackendStream) -> Result<()> {
        self.resolve(stream)?.synchronize()
    }

    fn supports_conversion(&self, from: PixelFormat, to: PixelFormat) -> bool {
        conversion_kind(from, to).is_some()
    }

    fn convert(
        &self,
        stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        color: ColorSpec,
    ) -> Result<()> {
        let (from, to) = (src.format(), dst.format());
        let kind = conversion_kind(from, to).ok_or_else(|| {
            EngineError::Unsupported(format!("cuda backend cannot convert {from} to {to}"))
        })?;
        src.check_same_size(dst)?;
        let stream = self.resolve(stream)?;
        let (s, d) = (surface_ptr(src)?, surface_ptr(dst)?);

        let (w, h) = (src.width() as usize, src.height() as usize);
        let sm = from.channel_map(src.height(), src.pitch());
        let dm = to.channel_map(dst.height(), dst.pitch());
        trace!(%from, %to, ?kind, w, h, "cuda convert");

        // SAFETY: both surfaces were validated against their allocations at
        // construction, and every channel map stays inside its layout.
        unsafe {
            match kind {
                ConversionKind::Copy => {
                    for plane in Copy2d::surface_to_surface(src, dst) {
                        self.kernels.copy_2d(
                            stream.stream(),
                            s + plane.src_offset as u64,
                            plane.src_pitch,
                            d + plane.dst_offset as u64,
                            plane.dst_pitch,
                            plane.width_bytes,
                            plane.rows,
                        )?;
                    }
                }
                ConversionKind::Repack | ConversionKind::Shuffle => {
                    for i in 0..sm.count {
                        let shift = if i == 0 { 0 } else { sm.chroma_shift };
                        self.kernels.copy_channel(
                            stream.stream(),
                            s,
                            sm.channels[i],
                            d,
                            dm.channels[i],
                            w >> shift,
                            h >> shift,
                        )?;
                    }
                }
                ConversionKind::ExtractLuma => {
                    self.kernels.copy_channel(
                        stream.stream(),
                        s,
                        sm.channels[0],
                        d,
                        dm.channels[0],
                        w,
                        h,
                    )?;
                }
                ConversionKind::YuvToRgb => {
                    self.kernels.yuv_to_rgb(
                        stream.stream(),
                        s,
                        &sm.channels,
                        sm.chroma_shift,
                        d,
                        &dm.channels,
                        w,
                        h,
                        CoeffsArg::new(color),
                    )?;
                }
                ConversionKind::RgbToYuv => {
                    self.kernels.rgb_to_yuv(
                        stream.stream(),
                        s,
                        &sm.channels,
                        d,
                        &dm.channels,
                        dm.chroma_shift,
                        w,
                        h,
                        CoeffsArg::new(color),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn resize(
        &self,
        stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        interpolation: Interpolation,
    ) -> Result<()> {
        if src.format() != dst.format() {
            return Err(EngineError::FormatMismatch {
                expected: src.format(),
                actual: dst.format(),
            });
        }
        let stream = self.resolve(stream)?;
        let (s, d) = (surface_ptr(src)?, surface_ptr(dst)?);
        trace!(
            src_w = src.width(),
            src_h = src.height(),
            dst_w = dst.width(),
            dst_h = dst.height(),
            ?interpolation,
            "cuda resize"
        );
        for index in 0..src.format().planes().len() {
            let (src_plane, src_size, channels) = src.plane_channel(index);
            let (dst_plane, dst_size, _) = dst.plane_channel(index);
            // SAFETY: plane addressing comes from validated surface layouts.
            unsafe {
                self.kernels.resize_plane(
                    stream.stream(),
                    s,
                    src_plane,
                    src_size,
                    d,
                    dst_plane,
                    dst_size,
                    channels,
                    interpolation,
                )?;
            }
        }
        Ok(())
    }

    fn open_decoder(
        &self,
        _ctx: &Arc<ExecutionContext>,
        config: &DecoderConfig,
    ) -> Result<Box<dyn DecodeSession>> {
        debug!(codec = ?config.codec, "decode requested on plain cuda backend");
        Err(EngineError::Unsupported(
            "cuda backend has no codec sessions; use the nvidia backend".into(),
        ))
    }

    fn open_encoder(
        &self,
        _ctx: &Arc<ExecutionContext>,
        config: &EncoderConfig,
    ) -> Result<Box<dyn EncodeSession>> {
        debug!(codec = ?config.options.codec, "encode requested on plain cuda backend");
        Err(EngineError::Unsupported(
            "cuda backend has no codec sessions; use the nvidia backend".into(),
        ))
    }
}
