//! Device backend trait: memory, copies, transform kernels and codec sessions.
//!
//! A backend is the capability provider behind an
//! [`ExecutionContext`](crate::context::ExecutionContext). Tasks never talk to
//! a backend directly for memory: they go through the context allocator so
//! buffers are pooled and tagged with the owning context.
//!
//! Every method that takes a [`BackendStream`] enqueues on that stream and may
//! return before the work completes; [`DeviceBackend::synchronize`] is the
//! only blocking call.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{DeviceAllocation, Surface};
use crate::codec_traits::{DecodeSession, DecoderConfig, EncodeSession, EncoderConfig};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::types::{ColorSpec, Interpolation, PixelFormat};

/// An in-order work queue owned by a backend.
pub trait BackendStream: Send + Sync + fmt::Debug + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// One rectangular copy between two pitched regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Copy2d {
    pub src_offset: usize,
    pub src_pitch: usize,
    pub dst_offset: usize,
    pub dst_pitch: usize,
    /// Bytes copied per row.
    pub width_bytes: usize,
    pub rows: usize,
}

impl Copy2d {
    /// Last byte (exclusive) touched on the source side.
    pub fn src_end(&self) -> usize {
        if self.rows == 0 {
            self.src_offset
        } else {
            self.src_offset + (self.rows - 1) * self.src_pitch + self.width_bytes
        }
    }

    /// Last byte (exclusive) touched on the destination side.
    pub fn dst_end(&self) -> usize {
        if self.rows == 0 {
            self.dst_offset
        } else {
            self.dst_offset + (self.rows - 1) * self.dst_pitch + self.width_bytes
        }
    }

    /// Bounds-check the copy against a source of `src_len` and a
    /// destination of `dst_len` bytes.
    pub fn check_bounds(&self, src_len: usize, dst_len: usize) -> Result<()> {
        if self.width_bytes > self.src_pitch || self.width_bytes > self.dst_pitch {
            return Err(EngineError::InvalidParameter(format!(
                "copy row of {} bytes exceeds pitch (src {}, dst {})",
                self.width_bytes, self.src_pitch, self.dst_pitch
            )));
        }
        if self.src_end() > src_len {
            return Err(EngineError::BufferTooSmall {
                need: self.src_end(),
                have: src_len,
            });
        }
        if self.dst_end() > dst_len {
            return Err(EngineError::BufferTooSmall {
                need: self.dst_end(),
                have: dst_len,
            });
        }
        Ok(())
    }

    /// Per-plane copies from a packed host frame into a pitched surface.
    pub fn host_to_surface(surface: &Surface) -> Vec<Copy2d> {
        let (w, h, f) = (surface.width(), surface.height(), surface.format());
        (0..f.planes().len())
            .map(|i| {
                let row = f.plane_row_bytes(i, w);
                Copy2d {
                    src_offset: f.dense_plane_offset(i, w, h),
                    src_pitch: row,
                    dst_offset: surface.plane_offset(i),
                    dst_pitch: surface.pitch(),
                    width_bytes: row,
                    rows: f.plane_rows(i, h),
                }
            })
            .collect()
    }

    /// Per-plane copies from a pitched surface into a packed host frame.
    pub fn surface_to_host(surface: &Surface) -> Vec<Copy2d> {
        Self::host_to_surface(surface)
            .into_iter()
            .map(|c| Copy2d {
                src_offset: c.dst_offset,
                src_pitch: c.dst_pitch,
                dst_offset: c.src_offset,
                dst_pitch: c.src_pitch,
                ..c
            })
            .collect()
    }

    /// Per-plane copies between two surfaces of identical geometry and format.
    pub fn surface_to_surface(src: &Surface, dst: &Surface) -> Vec<Copy2d> {
        let (w, h, f) = (src.width(), src.height(), src.format());
        (0..f.planes().len())
            .map(|i| Copy2d {
                src_offset: src.plane_offset(i),
                src_pitch: src.pitch(),
                dst_offset: dst.plane_offset(i),
                dst_pitch: dst.pitch(),
                width_bytes: f.plane_row_bytes(i, w),
                rows: f.plane_rows(i, h),
            })
            .collect()
    }
}

/// Device-side engine behind a [`DeviceContext`](crate::context::DeviceContext).
pub trait DeviceBackend: Send + Sync + 'static {
    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Row pitch alignment used for surfaces allocated on this backend.
    fn pitch_alignment(&self) -> usize {
        256
    }

    fn create_stream(&self) -> Result<Box<dyn BackendStream>>;

    /// Raw allocation. Callers go through the context allocator instead.
    fn alloc(&self, bytes: usize) -> Result<Box<dyn DeviceAllocation>>;

    /// Host → device pitched copy.
    fn upload(
        &self,
        stream: &dyn BackendStream,
        src: &[u8],
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()>;

    /// Device → host pitched copy. `dst` is valid only after `synchronize`.
    fn download(
        &self,
        stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &mut [u8],
        copy: &Copy2d,
    ) -> Result<()>;

    /// Device → device pitched copy.
    fn copy(
        &self,
        stream: &dyn BackendStream,
        src: &dyn DeviceAllocation,
        dst: &dyn DeviceAllocation,
        copy: &Copy2d,
    ) -> Result<()>;

    /// Block until all work enqueued on `stream` completes.
    fn synchronize(&self, stream: &dyn BackendStream) -> Result<()>;

    /// Whether [`convert`](Self::convert) implements `from → to`.
    fn supports_conversion(&self, from: PixelFormat, to: PixelFormat) -> bool;

    /// Colour conversion between two surfaces of identical geometry.
    fn convert(
        &self,
        stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        color: ColorSpec,
    ) -> Result<()>;

    /// Resample every plane of `src` into `dst` (same format).
    fn resize(
        &self,
        stream: &dyn BackendStream,
        src: &Surface,
        dst: &Surface,
        interpolation: Interpolation,
    ) -> Result<()>;

    /// Open a decode session bound to `ctx`.
    fn open_decoder(
        &self,
        ctx: &Arc<ExecutionContext>,
        config: &DecoderConfig,
    ) -> Result<Box<dyn DecodeSession>>;

    /// Open an encode session bound to `ctx`.
    fn open_encoder(
        &self,
        ctx: &Arc<ExecutionContext>,
        config: &EncoderConfig,
    ) -> Result<Box<dyn EncodeSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DeviceBuffer;
    use crate::context::ContextId;

    #[derive(Debug)]
    struct A(usize);
    impl DeviceAllocation for A {
        fn len(&self) -> usize {
            self.0
        }
        fn device_ptr(&self) -> u64 {
            0
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn nv12_upload_copies_both_planes_into_pitched_rows() {
        let mem = Arc::new(DeviceBuffer::new(Box::new(A(256 * 6)), None));
        let s = Surface::new(mem, 4, 4, 256, PixelFormat::Nv12, ContextId(1)).expect("fits");
        let copies = Copy2d::host_to_surface(&s);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[1].src_offset, 16);
        assert_eq!(copies[1].dst_offset, 1024);
        assert_eq!(copies[1].rows, 2);
        assert_eq!(copies[1].width_bytes, 4);
        assert_eq!(copies[1].dst_end(), 1024 + 256 + 4);
        assert_eq!(copies[1].src_end(), 24);

        let back = Copy2d::surface_to_host(&s);
        assert_eq!(back[1].src_offset, 1024);
        assert_eq!(back[1].dst_pitch, 4);
    }

    #[test]
    fn out_of_bounds_copy_is_rejected() {
        let copy = Copy2d {
            src_offset: 0,
            src_pitch: 4,
            dst_offset: 0,
            dst_pitch: 4,
            width_bytes: 4,
            rows: 3,
        };
        copy.check_bounds(12, 12).expect("exact fit");
        let err = copy.check_bounds(8, 16).expect_err("source too short");
        assert!(err.to_string().contains("need 12 bytes, have 8"));

        let wide = Copy2d {
            width_bytes: 8,
            ..copy
        };
        let err = wide.check_bounds(64, 64).expect_err("row wider than pitch");
        assert!(err.to_string().contains("exceeds pitch"));
    }
}
