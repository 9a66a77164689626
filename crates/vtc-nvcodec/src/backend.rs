//! CUDA backend plus NVDEC/NVENC sessions.

use std::sync::Arc;

use tracing::info;
use vtc_core::backend::{BackendStream, Copy2d, DeviceBackend};
use vtc_core::buffer::{DeviceAllocation, Surface};
use vtc_core::codec_traits::{DecodeSession, DecoderConfig, EncodeSession, EncoderConfig};
use vtc_core::context::{ContextConfig, DeviceContext, ExecutionContext};
use vtc_core::error::Result;
use vtc_core::types::{ColorSpec, Interpolation, PixelFormat};
use vtc_cuda::CudaBackend;

use crate::nvdec::NvDecoder;
use crate::nvenc::NvEncoder;

/// Memory, copies and kernels come from [`CudaBackend`]; codec sessions
/// go to the NVDEC/NVENC engines of the same device.
pub struct NvidiaBackend {
    cuda: Arc<CudaBackend>,
}

impl NvidiaBackend {
    pub fn new(ordinal: usize) -> Result<Arc<Self>> {
        let cuda = CudaBackend::new(ordinal)?;
        info!(
            device = ordinal,
            runtime = crate::NVCODEC_RUNTIME,
            "NVIDIA codec backend ready"
        );
        Ok(Arc::new(Self { cuda }))
    }

    pub fn cuda(&self) -> &Arc<CudaBackend> {
        &self.cuda
    }
}

/// Device context plus one stream on CUDA device `device`, with NVDEC and
/// NVENC sessions available.
pub fn execution_context(device: usize, config: &ContextConfig) -> Result<Arc<ExecutionContext>> {
    let backend = NvidiaBackend::new(device)?;
    let device = DeviceContext::new(backend, config);
    ExecutionContext::new(&device)
}

impl DeviceBackend for NvidiaBackend {
    fn name(&self) -> &'static str {
        "nvidia"
    }

    fn pitch_alignment(&self) -> usize {
        self.cuda.pitch_alignment()
    }

    fn create_stream(&self) -> Result<Box<dyn BackendStream>> {
        self.cuda.create_stream()
    }

    fn alloc(&self, bytes: usize) -> Result<Box<dyn DeviceAllocation>> {
        self.cuda.alloc(bytes)
    }

    fn upload(
        &self,
        stream: &dyn BackendStream,
        src: &[u8],
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()> {
        self.cuda.upload(stream, src, dst, copy)
    }

    fn download(
        &self,
        stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &mut [u8],
        copy: &Copy2d,
    ) -> Result<()> {
        self.cuda.download(stream, src, dst, copy)
    }

    fn copy(
        &self,
        stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()> {
        self.cuda.copy(stream, src, dst, copy)
    }

    fn synchronize(&self, stream: &dyn BackendStream) -> Result<()> {
        self.cuda.synchronize(stream)
    }

    fn supports_conversion(&self, from: PixelFormat, to: PixelFormat) -> bool {
        self.cuda.supports_conversion(from, to)
    }

    fn convert(
        &self,
        stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        color: ColorSpec,
    ) -> Result<()> {
        self.cuda.convert(stream, src, dst, color)
    }

    fn resize(
        &self,
        stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        interpolation: Interpolation,
    ) -> Result<()> {
        self.cuda.resize(stream, src, dst, interpolation)
    }

    fn open_decoder(
        &self,
        ctx: &Arc<ExecutionContext>,
        config: &DecoderConfig,
    ) -> Result<Box<dyn DecodeSession>> {
        Ok(Box::new(NvDecoder::open(ctx, &self.cuda, config)?))
    }

    fn open_encoder(
        &self,
        ctx: &Arc<ExecutionContext>,
        config: &EncoderConfig,
    ) -> Result<Box<dyn EncodeSession>> {
        Ok(Box::new(NvEncoder::open(ctx, &self.cuda, config)?))
    }
}
