//! Binding the device's primary context around NVDEC/NVENC calls.

use std::ptr;

use tracing::warn;
use vtc_core::error::Result;

use crate::sys::*;

/// Makes `target` current and restores the previous context on drop.
pub(crate) struct CudaContextGuard {
    prev_ctx: CUcontext,
    restore: bool,
}

impl CudaContextGuard {
    pub(crate) fn make_current(target: CUcontext) -> Result<Self> {
        let mut prev_ctx: CUcontext = ptr::null_mut();
        // SAFETY: cuCtxGetCurrent only writes the out-pointer.
        unsafe {
            check_cu(cuCtxGetCurrent(&mut prev_ctx), "cuCtxGetCurrent")?;
        }
        if prev_ctx != target {
            // SAFETY: `target` is a primary context retained by the device.
            unsafe {
                check_cu(cuCtxSetCurrent(target), "cuCtxSetCurrent")?;
            }
        }
        Ok(Self {
            prev_ctx,
            restore: prev_ctx != target,
        })
    }
}

impl Drop for CudaContextGuard {
    fn drop(&mut self) {
        if self.restore {
            // SAFETY: restoring the context that was current on entry.
            let rc = unsafe { cuCtxSetCurrent(self.prev_ctx) };
            if rc != CUDA_SUCCESS {
                warn!(rc, "cuCtxSetCurrent restore failed");
            }
        }
    }
}

/// Raw primary context of a cudarc device.
pub(crate) fn primary_context(device: &cudarc::driver::CudaDevice) -> CUcontext {
    *device.cu_primary_ctx() as CUcontext
}

/// Raw stream behind an execution context's compute stream.
pub(crate) fn raw_stream(
    ctx: &vtc_core::context::ExecutionContext,
) -> Result<CUstream> {
    let handle = vtc_cuda::CudaStreamHandle::downcast(ctx.stream().handle())?;
    Ok(handle.raw() as CUstream)
}
