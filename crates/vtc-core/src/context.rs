//! Device context and execution context.
//!
//! A [`DeviceContext`] owns one backend device plus a bucketed buffer pool,
//! VRAM accounting and pool metrics. An [`ExecutionContext`] pairs it with a
//! single [`ComputeStream`]; every task of one pipeline shares the same
//! `Arc<ExecutionContext>` and submits all of its work on that stream.
//!
//! # Buffer pool (zero-free steady state)
//!
//! All device allocations go through [`DeviceContext::alloc`]. When the
//! last reference to a [`DeviceBuffer`] drops, its allocation is recycled
//! into the pool. After warm-up the pool holds enough buffers to satisfy
//! every frame without hitting the backend allocator.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendStream, DeviceBackend};
use crate::buffer::{DeviceAllocation, DeviceBuffer, Recycler, Surface};
use crate::error::{EngineError, Result};
use crate::types::PixelFormat;

// ─── Identity ────────────────────────────────────────────────────────────────

/// Process-unique identity of a [`DeviceContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

// ─── Configuration ───────────────────────────────────────────────────────────

/// Allocation limits for a [`DeviceContext`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// VRAM cap in bytes. 0 = unlimited.
    pub vram_limit_bytes: usize,
    /// Enforce the cap as an allocation error instead of a warning.
    pub strict_vram_limit: bool,
}

// ─── VRAM accounting ─────────────────────────────────────────────────────────

/// Atomic VRAM byte counters.  Lock-free reads.
struct VramAccounting {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl VramAccounting {
    const fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn on_alloc(&self, bytes: usize) {
        let prev = self.current.fetch_add(bytes, Ordering::Relaxed);
        self.peak.fetch_max(prev + bytes, Ordering::Relaxed);
    }

    #[inline]
    fn on_free(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::Relaxed);
    }

    #[inline]
    fn snapshot(&self) -> (usize, usize) {
        (
            self.current.load(Ordering::Relaxed),
            self.peak.load(Ordering::Relaxed),
        )
    }
}

// ─── Pool statistics ────────────────────────────────────────────────────────

/// Lock-free pool access counters.
#[derive(Default)]
pub struct PoolStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub recycled: AtomicU64,
    pub overflows: AtomicU64,
}

impl PoolStats {
    /// Hit rate as a percentage (0.0–100.0).
    pub fn hit_rate(&self) -> f64 {
        let h = self.hits.load(Ordering::Relaxed) as f64;
        let m = self.misses.load(Ordering::Relaxed) as f64;
        let total = h + m;
        if total == 0.0 { 0.0 } else { (h / total) * 100.0 }
    }
}

// ─── Allocation policy ──────────────────────────────────────────────────────

/// Tracks warm-up vs steady-state allocation mode.
#[derive(Default)]
pub struct AllocPolicy {
    steady: AtomicBool,
}

impl AllocPolicy {
    pub fn enter_steady_state(&self) {
        if !self.steady.swap(true, Ordering::AcqRel) {
            info!("AllocPolicy: entered steady state; pool misses are now warnings");
        }
    }

    pub fn reset(&self) {
        self.steady.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_steady_state(&self) -> bool {
        self.steady.load(Ordering::Acquire)
    }
}

// ─── Bucketed buffer pool ───────────────────────────────────────────────────

const BUCKET_ALIGNMENT: usize = 2 * 1024 * 1024;
const MAX_PER_BUCKET: usize = 32;

#[derive(Default)]
struct BucketedPool {
    buckets: HashMap<usize, Vec<Box<dyn DeviceAllocation>>>,
}

impl BucketedPool {
    fn take(&mut self, bucket_size: usize) -> Option<Box<dyn DeviceAllocation>> {
        let stack = self.buckets.get_mut(&bucket_size)?;
        let buf = stack.pop()?;
        if stack.is_empty() {
            self.buckets.remove(&bucket_size);
        }
        Some(buf)
    }

    fn put(&mut self, buf: Box<dyn DeviceAllocation>) -> Option<Box<dyn DeviceAllocation>> {
        let stack = self.buckets.entry(buf.len()).or_default();
        if stack.len() >= MAX_PER_BUCKET {
            return Some(buf);
        }
        stack.push(buf);
        None
    }

    fn total_buffers(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    fn total_bytes(&self) -> usize {
        self.buckets
            .iter()
            .map(|(size, stack)| size * stack.len())
            .sum()
    }

    fn drain(&mut self) -> usize {
        self.buckets
            .drain()
            .map(|(size, stack)| size * stack.len())
            .sum()
    }
}

#[inline]
fn bucket_for(size: usize) -> usize {
    if size == 0 {
        return 4096;
    }
    if size < BUCKET_ALIGNMENT {
        size.max(4096).next_power_of_two()
    } else {
        (size + BUCKET_ALIGNMENT - 1) & !(BUCKET_ALIGNMENT - 1)
    }
}

fn check_vram_limit(
    strict: bool,
    limit: Option<usize>,
    current: usize,
    requested: usize,
    reserve: usize,
) -> Result<bool> {
    let Some(limit_bytes) = limit.filter(|limit| *limit > 0) else {
        return Ok(false);
    };

    let would_be = current.saturating_add(reserve);
    if would_be <= limit_bytes {
        return Ok(false);
    }

    if strict {
        return Err(EngineError::VramLimitExceeded {
            limit_bytes,
            current_bytes: current,
            requested_bytes: requested,
            would_be_bytes: would_be,
        });
    }

    Ok(true)
}

// ─── Allocator shared with outstanding buffers ──────────────────────────────

struct PooledAllocator {
    pool: Mutex<BucketedPool>,
    stats: PoolStats,
    vram: VramAccounting,
    vram_limit: AtomicUsize,
    strict_vram_limit: AtomicBool,
    /// Set once the relaxed-limit warning has been logged.
    vram_limit_warned: AtomicBool,
}

impl Recycler for PooledAllocator {
    fn recycle(&self, allocation: Box<dyn DeviceAllocation>) {
        let size = allocation.len();
        if let Some(rejected) = self.pool.lock().put(allocation) {
            self.stats.overflows.fetch_add(1, Ordering::Relaxed);
            self.vram.on_free(size);
            drop(rejected);
        } else {
            self.stats.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ─── Device context ─────────────────────────────────────────────────────────

/// Long-lived device context shared by every pipeline bound to one device.
pub struct DeviceContext {
    id: ContextId,
    backend: Arc<dyn DeviceBackend>,
    allocator: Arc<PooledAllocator>,
    /// Allocation policy (warm-up vs steady state).
    pub alloc_policy: AllocPolicy,
}

impl DeviceContext {
    /// Create a context over `backend`.
    pub fn new(backend: Arc<dyn DeviceBackend>, config: &ContextConfig) -> Arc<Self> {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        info!(context = %id, backend = backend.name(), "Device context created");
        let ctx = Arc::new(Self {
            id,
            backend,
            allocator: Arc::new(PooledAllocator {
                pool: Mutex::new(BucketedPool::default()),
                stats: PoolStats::default(),
                vram: VramAccounting::new(),
                vram_limit: AtomicUsize::new(0),
                strict_vram_limit: AtomicBool::new(false),
                vram_limit_warned: AtomicBool::new(false),
            }),
            alloc_policy: AllocPolicy::default(),
        });
        if config.vram_limit_bytes > 0 {
            ctx.set_vram_limit(config.vram_limit_bytes);
        }
        if config.strict_vram_limit {
            ctx.set_strict_vram_limit(true);
        }
        ctx
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    /// Allocate `size` bytes of device memory, preferring a pooled buffer.
    pub fn alloc(&self, size: usize) -> Result<DeviceBuffer> {
        let bucket_size = bucket_for(size);
        let home: Weak<dyn Recycler> = {
            let strong: Arc<dyn Recycler> = self.allocator.clone();
            Arc::downgrade(&strong)
        };
        let allocator = &self.allocator;

        // Try pool first; bytes are already tracked.
        if let Some(buf) = allocator.pool.lock().take(bucket_size) {
            allocator.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(DeviceBuffer::new(buf, Some(home)));
        }

        allocator.stats.misses.fetch_add(1, Ordering::Relaxed);
        let (current_before, _) = allocator.vram.snapshot();
        let would_exceed = check_vram_limit(
            allocator.strict_vram_limit.load(Ordering::Relaxed),
            match allocator.vram_limit.load(Ordering::Relaxed) {
                0 => None,
                limit => Some(limit),
            },
            current_before,
            size,
            bucket_size,
        )?;
        let buf = self.backend.alloc(bucket_size)?;
        allocator.vram.on_alloc(bucket_size);

        if self.alloc_policy.is_steady_state() {
            warn!(bucket_size, "Pool miss in steady state; pool may be undersized");
        }
        if would_exceed && !allocator.vram_limit_warned.swap(true, Ordering::Relaxed) {
            warn!(
                current_mb = current_before / (1024 * 1024),
                would_be_mb = current_before.saturating_add(bucket_size) / (1024 * 1024),
                limit_mb = allocator.vram_limit.load(Ordering::Relaxed) / (1024 * 1024),
                requested_bytes = size,
                reserved_bytes = bucket_size,
                "VRAM usage would exceed configured limit; continuing because strict_vram_limit=false"
            );
        }
        Ok(DeviceBuffer::new(buf, Some(home)))
    }

    /// Device row pitch for a `width`-wide surface of `format`.
    pub fn pitch_for(&self, width: u32, format: PixelFormat) -> usize {
        let align = self.backend.pitch_alignment().max(1);
        format.row_bytes(width).div_ceil(align) * align
    }

    /// Allocate a pitched surface tagged with this context.
    pub fn alloc_surface(&self, width: u32, height: u32, format: PixelFormat) -> Result<Surface> {
        format.check_dimensions(width, height)?;
        let pitch = self.pitch_for(width, format);
        let memory = self.alloc(format.byte_size(height, pitch))?;
        Surface::new(Arc::new(memory), width, height, pitch, format, self.id)
    }

    /// Read current and peak VRAM usage (bytes) for allocations through this context.
    #[inline]
    pub fn vram_usage(&self) -> (usize, usize) {
        self.allocator.vram.snapshot()
    }

    #[inline]
    pub fn pool_stats(&self) -> &PoolStats {
        &self.allocator.stats
    }

    /// Report pool and VRAM statistics.
    pub fn report_pool_stats(&self) {
        let stats = &self.allocator.stats;
        let pool = self.allocator.pool.lock();
        let (vram_current, vram_peak) = self.allocator.vram.snapshot();
        info!(
            context = %self.id,
            hits = stats.hits.load(Ordering::Relaxed),
            misses = stats.misses.load(Ordering::Relaxed),
            recycled = stats.recycled.load(Ordering::Relaxed),
            overflows = stats.overflows.load(Ordering::Relaxed),
            total_pooled = pool.total_buffers(),
            pooled_bytes_mb = pool.total_bytes() / (1024 * 1024),
            vram_current_mb = vram_current / (1024 * 1024),
            vram_peak_mb = vram_peak / (1024 * 1024),
            "Buffer pool report"
        );
    }

    /// Set a VRAM usage cap (bytes).  0 = unlimited.
    pub fn set_vram_limit(&self, limit_bytes: usize) {
        self.allocator
            .vram_limit
            .store(limit_bytes, Ordering::Relaxed);
        self.allocator
            .vram_limit_warned
            .store(false, Ordering::Relaxed);
        info!(limit_mb = limit_bytes / (1024 * 1024), "VRAM limit set");
    }

    /// Enable/disable hard-fail behavior when a configured VRAM limit would be exceeded.
    pub fn set_strict_vram_limit(&self, enabled: bool) {
        self.allocator
            .strict_vram_limit
            .store(enabled, Ordering::Relaxed);
        info!(enabled, "Strict VRAM limit enforcement");
    }

    /// Capture a structured health snapshot for telemetry export.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let (vram_current, vram_peak) = self.allocator.vram.snapshot();
        let stats = &self.allocator.stats;
        HealthSnapshot {
            vram_current_bytes: vram_current,
            vram_peak_bytes: vram_peak,
            vram_limit_bytes: self.allocator.vram_limit.load(Ordering::Relaxed),
            pool_hits: stats.hits.load(Ordering::Relaxed),
            pool_misses: stats.misses.load(Ordering::Relaxed),
            pool_hit_rate: stats.hit_rate(),
            pool_overflows: stats.overflows.load(Ordering::Relaxed),
            steady_state: self.alloc_policy.is_steady_state(),
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        let freed = self.allocator.pool.lock().drain();
        self.allocator.vram.on_free(freed);
        debug!(context = %self.id, freed_bytes = freed, "Device context dropped");
    }
}

// ─── Health snapshot ────────────────────────────────────────────────────────

/// Immutable snapshot of context health metrics for telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub vram_current_bytes: usize,
    pub vram_peak_bytes: usize,
    pub vram_limit_bytes: usize,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub pool_hit_rate: f64,
    pub pool_overflows: u64,
    pub steady_state: bool,
}

// ─── Streams and execution context ──────────────────────────────────────────

/// A backend queue that work is submitted to, in order.
pub struct ComputeStream {
    id: u64,
    handle: Box<dyn BackendStream>,
}

impl ComputeStream {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> &dyn BackendStream {
        self.handle.as_ref()
    }
}

impl fmt::Debug for ComputeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeStream").field("id", &self.id).finish()
    }
}

/// The (device context, stream) pair a pipeline is bound to.
///
/// Read-only after construction; tasks hold an `Arc` and never mutate it.
pub struct ExecutionContext {
    device: Arc<DeviceContext>,
    stream: ComputeStream,
}

impl ExecutionContext {
    /// Create a new stream on `device` and bind it.
    pub fn new(device: &Arc<DeviceContext>) -> Result<Arc<Self>> {
        let handle = device.backend().create_stream()?;
        let stream = ComputeStream {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            handle,
        };
        debug!(context = %device.id(), stream = stream.id, "Execution context created");
        Ok(Arc::new(Self {
            device: Arc::clone(device),
            stream,
        }))
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.device.id()
    }

    #[inline]
    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    #[inline]
    pub fn backend(&self) -> &dyn DeviceBackend {
        self.device.backend().as_ref()
    }

    #[inline]
    pub fn stream(&self) -> &ComputeStream {
        &self.stream
    }

    /// Block until all work enqueued on the stream completes.
    pub fn synchronize(&self) -> Result<()> {
        self.backend().synchronize(self.stream.handle())
    }

    /// Reject surfaces produced under another device context.
    pub fn check_surface(&self, surface: &Surface) -> Result<()> {
        if surface.context() != self.id() {
            return Err(EngineError::ContextMismatch {
                expected: self.id(),
                actual: surface.context(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("context", &self.device.id())
            .field("backend", &self.device.backend().name())
            .field("stream", &self.stream.id)
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
