//! Heap-backed device memory and streams.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use vtc_core::backend::{BackendStream, Copy2d};
use vtc_core::buffer::DeviceAllocation;
use vtc_core::error::{EngineError, Result};

/// Synthetic address space so `device_ptr` values are unique and non-zero.
static NEXT_ADDRESS: AtomicU64 = AtomicU64::new(0x1000_0000);

/// One "device" allocation living in host memory.
pub struct HostAllocation {
    bytes: RwLock<Vec<u8>>,
    len: usize,
    address: u64,
}

impl HostAllocation {
    /// Zeroed allocation of `len` bytes; `AllocationFailed` when the heap refuses.
    pub fn new(len: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| EngineError::AllocationFailed {
                bytes: len,
                reason: e.to_string(),
            })?;
        bytes.resize(len, 0);
        let span = (len as u64).max(1).next_multiple_of(256);
        let address = NEXT_ADDRESS.fetch_add(span, Ordering::Relaxed);
        Ok(Self {
            bytes: RwLock::new(bytes),
            len,
            address,
        })
    }

    /// Reach the host storage behind a backend-neutral allocation.
    pub fn downcast(allocation: &dyn DeviceAllocation) -> Result<&Self> {
        allocation.as_any().downcast_ref::<Self>().ok_or_else(|| {
            EngineError::Device(format!(
                "allocation at {:#x} does not belong to the host backend",
                allocation.device_ptr()
            ))
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes.write()
    }

    /// Whether `self` and `other` are the same allocation.
    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl DeviceAllocation for HostAllocation {
    fn len(&self) -> usize {
        self.len
    }

    fn device_ptr(&self) -> u64 {
        self.address
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for HostAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAllocation")
            .field("address", &format_args!("{:#x}", self.address))
            .field("len", &self.len)
            .finish()
    }
}

/// Work on the host backend runs synchronously on the calling thread, so a
/// stream only carries an id for logging.
#[derive(Debug)]
pub struct HostStream {
    pub id: u64,
}

impl BackendStream for HostStream {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Row-by-row pitched copy between two byte slices.
///
/// The copy must already have passed [`Copy2d::check_bounds`].
pub fn copy_rows(src: &[u8], dst: &mut [u8], copy: &Copy2d) {
    for row in 0..copy.rows {
        let s = copy.src_offset + row * copy.src_pitch;
        let d = copy.dst_offset + row * copy.dst_pitch;
        dst[d..d + copy.width_bytes].copy_from_slice(&src[s..s + copy.width_bytes]);
    }
}
