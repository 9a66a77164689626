//! CUDA allocations and streams behind the backend-neutral handles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use cudarc::driver::sys::CUstream;
use cudarc::driver::{CudaDevice, CudaSlice, CudaStream, DevicePtr};
use vtc_core::backend::BackendStream;
use vtc_core::buffer::DeviceAllocation;
use vtc_core::error::{EngineError, Result};

/// One linear device allocation.
pub struct CudaAllocation {
    slice: CudaSlice<u8>,
}

impl CudaAllocation {
    pub fn new(slice: CudaSlice<u8>) -> Self {
        Self { slice }
    }

    pub fn downcast(allocation: &dyn DeviceAllocation) -> Result<&Self> {
        allocation.as_any().downcast_ref::<Self>().ok_or_else(|| {
            EngineError::Device(format!(
                "allocation at {:#x} does not belong to the cuda backend",
                allocation.device_ptr()
            ))
        })
    }

    pub fn slice(&self) -> &CudaSlice<u8> {
        &self.slice
    }
}

impl DeviceAllocation for CudaAllocation {
    fn len(&self) -> usize {
        self.slice.len()
    }

    fn device_ptr(&self) -> u64 {
        *self.slice.device_ptr()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for CudaAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaAllocation")
            .field("ptr", &format_args!("{:#x}", self.device_ptr()))
            .field("len", &self.len())
            .finish()
    }
}

/// A stream forked from the device's default stream.
pub struct CudaStreamHandle {
    device: Arc<CudaDevice>,
    stream: CudaStream,
}

// SAFETY: a CUstream handle may be used from any thread once the owning
// context is bound; every launch path binds the context first.
unsafe impl Send for CudaStreamHandle {}
// SAFETY: see above. Enqueueing on one stream from several threads is
// permitted by the driver API.
unsafe impl Sync for CudaStreamHandle {}

impl CudaStreamHandle {
    pub fn fork(device: &Arc<CudaDevice>) -> Result<Self> {
        let stream = device.fork_default_stream()?;
        Ok(Self {
            device: Arc::clone(device),
            stream,
        })
    }

    pub fn downcast(stream: &dyn BackendStream) -> Result<&Self> {
        stream.as_any().downcast_ref::<Self>().ok_or_else(|| {
            EngineError::Device(format!("{stream:?} is not a cuda stream"))
        })
    }

    pub fn stream(&self) -> &CudaStream {
        &self.stream
    }

    #[inline]
    pub fn raw(&self) -> CUstream {
        self.stream.stream
    }

    /// Block until everything enqueued on this stream has finished.
    pub fn synchronize(&self) -> Result<()> {
        self.device.bind_to_thread()?;
        // SAFETY: the stream belongs to `self.device`, whose context is bound
        // to this thread, and stays alive for the duration of the call.
        unsafe { cudarc::driver::result::stream::synchronize(self.raw())? };
        Ok(())
    }
}

impl fmt::Debug for CudaStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaStreamHandle")
            .field("device", &self.device.ordinal())
            .field("stream", &format_args!("{:p}", self.raw()))
            .finish()
    }
}

impl BackendStream for CudaStreamHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
