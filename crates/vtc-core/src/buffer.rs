//! Frame and packet handles carried between tasks.
//!
//! # Ownership model
//!
//! - [`Surface`] wraps device memory via `Arc<DeviceBuffer>`. Cloning is a
//!   reference-count bump; no device memory is copied. When the last clone
//!   drops, the allocation returns to the bucketed pool of the
//!   [`DeviceContext`](crate::context::DeviceContext) that produced it.
//! - [`HostFrame`] and [`Packet`] wrap host bytes via [`bytes::Bytes`].
//!
//! # Residency
//!
//! A [`Surface`] is always device-resident and a [`HostFrame`] is always
//! host-resident. Nothing converts one into the other except the upload and
//! download tasks.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::context::ContextId;
use crate::error::{EngineError, Result};
use crate::types::{Channel, MuxingParams, PixelFormat};

// ─── Device allocation ───────────────────────────────────────────────────────

/// A raw device allocation owned by a backend.
///
/// Backends downcast through [`as_any`](Self::as_any) to reach their concrete
/// storage; a downcast failure means the buffer came from another backend.
pub trait DeviceAllocation: Send + Sync + fmt::Debug + 'static {
    /// Size of the allocation in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw device address (suitable for FFI / kernel arguments).
    fn device_ptr(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// Receives allocations back when their [`DeviceBuffer`] drops.
pub trait Recycler: Send + Sync {
    fn recycle(&self, allocation: Box<dyn DeviceAllocation>);
}

/// Device memory that returns to its allocator's pool when dropped.
pub struct DeviceBuffer {
    allocation: Option<Box<dyn DeviceAllocation>>,
    home: Option<Weak<dyn Recycler>>,
}

impl DeviceBuffer {
    pub fn new(allocation: Box<dyn DeviceAllocation>, home: Option<Weak<dyn Recycler>>) -> Self {
        Self {
            allocation: Some(allocation),
            home,
        }
    }

    /// The backend allocation.
    pub fn allocation(&self) -> &dyn DeviceAllocation {
        // Only `Drop` takes the allocation out.
        match self.allocation.as_deref() {
            Some(a) => a,
            None => unreachable!("DeviceBuffer used after drop"),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.allocation().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn device_ptr(&self) -> u64 {
        self.allocation().device_ptr()
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("allocation", &self.allocation)
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let (Some(allocation), Some(home)) = (self.allocation.take(), self.home.take())
            && let Some(recycler) = home.upgrade()
        {
            recycler.recycle(allocation);
        }
    }
}

// ─── Surface ─────────────────────────────────────────────────────────────────

/// A single video frame residing in device memory.
///
/// `Surface` is `Send + Sync`. Several tasks may hold clones for read-only
/// access; only the task that allocated it writes to it, before publishing.
#[derive(Clone, Debug)]
pub struct Surface {
    memory: Arc<DeviceBuffer>,
    width: u32,
    height: u32,
    /// Row pitch in bytes, shared by every plane.
    pitch: usize,
    format: PixelFormat,
    context: ContextId,
    /// Presentation timestamp in microseconds.
    pub pts: i64,
}

// Compile-time proof that Surface is Send + Sync.
#[allow(dead_code)]
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<Surface>();
    }
};

impl Surface {
    /// Wrap `memory` as a surface.
    ///
    /// Fails when the allocation cannot hold the described layout.
    pub fn new(
        memory: Arc<DeviceBuffer>,
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
        context: ContextId,
    ) -> Result<Self> {
        format.check_dimensions(width, height)?;
        if pitch < format.row_bytes(width) {
            return Err(EngineError::InvalidParameter(format!(
                "pitch {pitch} is smaller than a {format} row of width {width}"
            )));
        }
        let need = format.byte_size(height, pitch);
        if memory.len() < need {
            return Err(EngineError::BufferTooSmall {
                need,
                have: memory.len(),
            });
        }
        Ok(Self {
            memory,
            width,
            height,
            pitch,
            format,
            context,
            pts: 0,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Identity of the context whose allocator produced the memory.
    #[inline]
    pub fn context(&self) -> ContextId {
        self.context
    }

    #[inline]
    pub fn memory(&self) -> &Arc<DeviceBuffer> {
        &self.memory
    }

    #[inline]
    pub fn device_ptr(&self) -> u64 {
        self.memory.device_ptr()
    }

    /// Byte offset of plane `index` within the allocation.
    #[inline]
    pub fn plane_offset(&self, index: usize) -> usize {
        self.format.plane_offset(index, self.height, self.pitch)
    }

    /// Plane `index` addressed as one channel of interleaved samples.
    ///
    /// Returns the channel, the plane size in samples and the number of
    /// interleaved samples per plane pixel.
    pub fn plane_channel(&self, index: usize) -> (Channel, (usize, usize), usize) {
        let layout = self.format.planes()[index];
        let channel = Channel {
            offset: self.plane_offset(index),
            pitch: self.pitch,
            step: layout.channels as usize,
        };
        let size = (
            (self.width / layout.width_div) as usize,
            self.format.plane_rows(index, self.height),
        );
        (channel, size, layout.channels as usize)
    }

    /// Geometry check for kernels that need equal source and destination size.
    pub fn check_same_size(&self, other: &Surface) -> Result<()> {
        if (self.width, self.height) != (other.width, other.height) {
            return Err(EngineError::DimensionMismatch(format!(
                "conversion needs equal geometry, got {}x{} -> {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        Ok(())
    }

    /// Bytes covered by the layout (may be smaller than the allocation).
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.format.byte_size(self.height, self.pitch)
    }

    /// Check geometry and format against what a task was built for.
    pub fn expect_layout(&self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        if self.format != format {
            return Err(EngineError::FormatMismatch {
                expected: format,
                actual: self.format,
            });
        }
        if self.width != width || self.height != height {
            return Err(EngineError::DimensionMismatch(format!(
                "expected {width}x{height}, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

// ─── Host frame ──────────────────────────────────────────────────────────────

/// A packed (unpadded) frame in host memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostFrame {
    data: Bytes,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Presentation timestamp in microseconds.
    pub pts: i64,
}

impl HostFrame {
    /// Wrap packed bytes. The length must equal the format's dense size.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        format.check_dimensions(width, height)?;
        let data = data.into();
        let need = format.dense_size(width, height);
        if data.len() != need {
            return Err(EngineError::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            pts: 0,
        })
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Packed bytes of plane `index`.
    pub fn plane(&self, index: usize) -> &[u8] {
        let start = self.format.dense_plane_offset(index, self.width, self.height);
        let len = self.format.plane_row_bytes(index, self.width)
            * self.format.plane_rows(index, self.height);
        &self.data[start..start + len]
    }
}

// ─── Packet ──────────────────────────────────────────────────────────────────

/// Which elementary stream a packet belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    #[default]
    Video,
    Audio,
}

/// One coded access unit in host memory.
///
/// Host memory is acceptable here: this is codec-compressed data, not pixels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub data: Bytes,
    /// Presentation timestamp in microseconds.
    ///
    /// Container time bases are converted at the demux boundary so decode
    /// and encode stages operate on one stable unit.
    pub pts: i64,
    /// Decode timestamp in microseconds.
    pub dts: i64,
    /// Duration in microseconds (0 when unknown).
    pub duration: i64,
    pub is_keyframe: bool,
    pub stream: StreamKind,
}

// ─── Port token ──────────────────────────────────────────────────────────────

/// The value held by a task port.
#[derive(Clone, Debug)]
pub enum Token {
    Packet(Packet),
    Params(MuxingParams),
    Host(HostFrame),
    Device(Surface),
}

impl Token {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Packet(_) => "packet",
            Self::Params(_) => "params",
            Self::Host(_) => "host_frame",
            Self::Device(_) => "device_surface",
        }
    }

    pub fn as_packet(&self) -> Option<&Packet> {
        match self {
            Self::Packet(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_params(&self) -> Option<&MuxingParams> {
        match self {
            Self::Params(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_host(&self) -> Option<&HostFrame> {
        match self {
            Self::Host(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_surface(&self) -> Option<&Surface> {
        match self {
            Self::Device(s) => Some(s),
            _ => None,
        }
    }
}
