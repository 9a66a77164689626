//! Bounded arena of device surfaces for decoded pictures.
//!
//! The pool owns `capacity` surfaces, indexed by slot. A slot is free when
//! the pool holds the only reference to its memory; handing a surface
//! downstream keeps the slot busy until every clone has dropped. Live
//! surfaces are never evicted: when no slot is free, [`SurfacePool::acquire`]
//! fails with [`EngineError::PoolExhausted`].

use std::sync::Arc;

use tracing::debug;

use crate::buffer::Surface;
use crate::context::DeviceContext;
use crate::error::{EngineError, Result};
use crate::types::PixelFormat;

pub struct SurfacePool {
    capacity: usize,
    slots: Vec<Surface>,
    layout: Option<(u32, u32, PixelFormat)>,
    /// Slot scanned first by the next acquire.
    cursor: usize,
}

impl SurfacePool {
    /// An empty pool; memory is allocated by [`ensure_layout`](Self::ensure_layout).
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EngineError::InvalidParameter(
                "decode surface pool needs at least one slot".into(),
            ));
        }
        Ok(Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            layout: None,
            cursor: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether slots have been allocated.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Row pitch of the pooled surfaces, once allocated.
    pub fn pitch(&self) -> Option<usize> {
        self.slots.first().map(Surface::pitch)
    }

    /// Allocate every slot for the given layout, replacing slots of a previous
    /// layout. Surfaces still held downstream keep their own memory alive.
    pub fn ensure_layout(
        &mut self,
        ctx: &DeviceContext,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<()> {
        if self.layout == Some((width, height, format)) {
            return Ok(());
        }
        let slots = (0..self.capacity)
            .map(|_| ctx.alloc_surface(width, height, format))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            capacity = self.capacity,
            width,
            height,
            %format,
            pitch = slots[0].pitch(),
            "decode surface pool allocated"
        );
        self.slots = slots;
        self.layout = Some((width, height, format));
        self.cursor = 0;
        Ok(())
    }

    /// Number of slots referenced outside the pool.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| !Self::is_free(s)).count()
    }

    fn is_free(slot: &Surface) -> bool {
        Arc::strong_count(slot.memory()) == 1
    }

    /// Hand out a free slot.
    pub fn acquire(&mut self) -> Result<Surface> {
        if self.slots.is_empty() {
            return Err(EngineError::InvariantViolation(
                "decode surface pool used before allocation".into(),
            ));
        }
        let n = self.slots.len();
        for offset in 0..n {
            let index = (self.cursor + offset) % n;
            if Self::is_free(&self.slots[index]) {
                self.cursor = (index + 1) % n;
                return Ok(self.slots[index].clone());
            }
        }
        Err(EngineError::PoolExhausted {
            capacity: self.capacity,
        })
    }
}
