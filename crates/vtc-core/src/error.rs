//! Typed error hierarchy shared by every vtc crate.
//!
//! Library crates return [`EngineError`] through the [`Result`] alias; tasks
//! convert errors into [`TaskExecStatus::Fail`](crate::task::TaskExecStatus)
//! after logging them.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! for structured telemetry and CLI exit reporting without string parsing.
//! Each variant also belongs to one [`ErrorCategory`].

use crate::context::ContextId;
use crate::types::PixelFormat;

/// Coarse classification of an [`EngineError`].
///
/// End of stream is not a category: it is reported as a task status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid or incompatible parameters surfaced by a `make` factory.
    Construction,
    /// Hardware, codec or I/O failure during `execute`. Fatal to the task.
    ExecutionFailure,
    /// Pool or allocator exhausted. Treated as an execution failure.
    ResourceExhaustion,
}

/// All errors originating from vtc.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Device ───────────────────────────────────────────────────────
    #[cfg(feature = "cuda")]
    #[error("CUDA driver error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),

    #[cfg(feature = "cuda")]
    #[error("CUDA kernel compilation error: {0}")]
    NvrtcCompile(#[from] cudarc::nvrtc::CompileError),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    // ── Construction ─────────────────────────────────────────────────
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Cannot open `{locator}`: {reason}")]
    Open { locator: String, reason: String },

    // ── Codecs and containers ────────────────────────────────────────
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Demux error: {0}")]
    Demux(String),

    #[error("Mux error: {0}")]
    Mux(String),

    #[error("Bitstream filter error: {0}")]
    BitstreamFilter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Pipeline ─────────────────────────────────────────────────────
    #[error("Pipeline wiring error: {0}")]
    Wiring(String),

    #[error("Task `{task}` failed with error code {code}")]
    TaskFailed { task: String, code: u32 },

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Pipeline configuration error: {0}")]
    Config(String),

    // ── Type contracts ───────────────────────────────────────────────
    #[error("Pixel format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("Context mismatch: task bound to {expected}, buffer from {actual}")]
    ContextMismatch {
        expected: ContextId,
        actual: ContextId,
    },

    #[error("Residency violation: {0}")]
    Residency(String),

    // ── Invariants ───────────────────────────────────────────────────
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ── Resources ────────────────────────────────────────────────────
    #[error("Decode pool exhausted: all {capacity} surfaces are still referenced downstream")]
    PoolExhausted { capacity: usize },

    #[error(
        "VRAM limit exceeded: limit {limit_bytes} B, current {current_bytes} B, requested {requested_bytes} B, would be {would_be_bytes} B"
    )]
    VramLimitExceeded {
        limit_bytes: usize,
        current_bytes: usize,
        requested_bytes: usize,
        would_be_bytes: usize,
    },

    #[error("Allocation of {bytes} bytes failed: {reason}")]
    AllocationFailed { bytes: usize, reason: String },
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: device/driver
    /// - 2xx: construction
    /// - 3xx: codecs and containers
    /// - 4xx: pipeline
    /// - 5xx: type contracts
    /// - 6xx: invariants
    /// - 7xx: resources
    pub fn error_code(&self) -> u32 {
        match self {
            #[cfg(feature = "cuda")]
            Self::Cuda(_) => 100,
            #[cfg(feature = "cuda")]
            Self::NvrtcCompile(_) => 101,
            Self::Device(_) => 102,
            Self::BackendUnavailable(_) => 103,
            Self::InvalidParameter(_) => 200,
            Self::Unsupported(_) => 201,
            Self::Open { .. } => 202,
            Self::Decode(_) => 300,
            Self::Encode(_) => 301,
            Self::Demux(_) => 302,
            Self::Mux(_) => 303,
            Self::BitstreamFilter(_) => 304,
            Self::Io(_) => 305,
            Self::Wiring(_) => 400,
            Self::TaskFailed { .. } => 401,
            Self::Cancelled => 402,
            Self::Config(_) => 403,
            Self::FormatMismatch { .. } => 500,
            Self::DimensionMismatch(_) => 501,
            Self::BufferTooSmall { .. } => 502,
            Self::ContextMismatch { .. } => 503,
            Self::Residency(_) => 504,
            Self::InvariantViolation(_) => 600,
            Self::PoolExhausted { .. } => 700,
            Self::VramLimitExceeded { .. } => 701,
            Self::AllocationFailed { .. } => 702,
        }
    }

    /// Coarse category used by the driver report and the CLI.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidParameter(_)
            | Self::Unsupported(_)
            | Self::Open { .. }
            | Self::Wiring(_)
            | Self::Config(_)
            | Self::BackendUnavailable(_) => ErrorCategory::Construction,
            Self::PoolExhausted { .. }
            | Self::VramLimitExceeded { .. }
            | Self::AllocationFailed { .. } => ErrorCategory::ResourceExhaustion,
            _ => ErrorCategory::ExecutionFailure,
        }
    }
}

/// Convenience alias used throughout the vtc crates.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        assert_eq!(EngineError::InvalidParameter("w".into()).error_code(), 200);
        assert_eq!(EngineError::Decode("bad".into()).error_code(), 300);
        assert_eq!(EngineError::PoolExhausted { capacity: 4 }.error_code(), 700);
        assert_eq!(
            EngineError::ContextMismatch {
                expected: ContextId(1),
                actual: ContextId(2)
            }
            .error_code(),
            503
        );
    }

    #[test]
    fn pool_exhaustion_is_resource_category() {
        let err = EngineError::PoolExhausted { capacity: 4 };
        assert_eq!(err.category(), ErrorCategory::ResourceExhaustion);
        assert!(err.to_string().contains("all 4 surfaces"));
        assert_eq!(
            EngineError::Open {
                locator: "x".into(),
                reason: "missing".into()
            }
            .category(),
            ErrorCategory::Construction
        );
        assert_eq!(
            EngineError::Mux("disk full".into()).category(),
            ErrorCategory::ExecutionFailure
        );
    }
}
