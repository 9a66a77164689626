//! Feature-gated audit of host copies outside the upload/download tasks.
//!
//! Only the upload and download tasks may move pixels across the
//! host/device boundary. Backends that have to touch pixel bytes on the host
//! anyway (the host-emulated backend, for one) report it through
//! [`host_copy_violation!`](crate::host_copy_violation). With
//! `audit-no-host-copies` disabled every helper compiles down to a no-op.

#[cfg(feature = "audit-no-host-copies")]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "audit-no-host-copies")]
use crate::error::EngineError;
use crate::error::Result;

#[cfg(feature = "audit-no-host-copies")]
static STRICT_MODE: AtomicBool = AtomicBool::new(false);
#[cfg(feature = "audit-no-host-copies")]
static WARNED_ONCE: AtomicBool = AtomicBool::new(false);
#[cfg(feature = "audit-no-host-copies")]
static VIOLATIONS: AtomicU64 = AtomicU64::new(0);

/// Restores the previous strict mode value when dropped.
pub struct StrictModeGuard {
    #[cfg(feature = "audit-no-host-copies")]
    previous: bool,
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        #[cfg(feature = "audit-no-host-copies")]
        {
            STRICT_MODE.store(self.previous, Ordering::Relaxed);
        }
    }
}

/// Enable or disable strict no-host-copies mode for the current run scope.
#[must_use]
pub fn push_strict_mode(enabled: bool) -> StrictModeGuard {
    #[cfg(feature = "audit-no-host-copies")]
    {
        let previous = STRICT_MODE.swap(enabled, Ordering::Relaxed);
        StrictModeGuard { previous }
    }

    #[cfg(not(feature = "audit-no-host-copies"))]
    {
        let _ = enabled;
        StrictModeGuard {}
    }
}

/// Whether strict no-host-copies mode is currently enabled.
pub fn is_strict_mode() -> bool {
    #[cfg(feature = "audit-no-host-copies")]
    {
        STRICT_MODE.load(Ordering::Relaxed)
    }

    #[cfg(not(feature = "audit-no-host-copies"))]
    {
        false
    }
}

/// Number of violations recorded so far in this process.
pub fn violation_count() -> u64 {
    #[cfg(feature = "audit-no-host-copies")]
    {
        VIOLATIONS.load(Ordering::Relaxed)
    }

    #[cfg(not(feature = "audit-no-host-copies"))]
    {
        0
    }
}

/// Record a host copy made outside upload/download.
///
/// Logs a single warning for the process lifetime.
pub fn record_violation(stage: &str, detail: String) {
    #[cfg(feature = "audit-no-host-copies")]
    {
        VIOLATIONS.fetch_add(1, Ordering::Relaxed);
        if !WARNED_ONCE.swap(true, Ordering::Relaxed) {
            tracing::warn!(stage, detail = %detail, "no-host-copies audit warning");
        }
    }

    #[cfg(not(feature = "audit-no-host-copies"))]
    {
        let _ = stage;
        let _ = detail;
    }
}

/// Record a host copy, or refuse it with [`EngineError::Residency`] when
/// strict mode is on.
pub fn check_host_copy(stage: &str, detail: String) -> Result<()> {
    #[cfg(feature = "audit-no-host-copies")]
    if is_strict_mode() {
        VIOLATIONS.fetch_add(1, Ordering::Relaxed);
        return Err(EngineError::Residency(format!(
            "host copy in `{stage}` refused by strict no-host-copies mode: {detail}"
        )));
    }
    record_violation(stage, detail);
    Ok(())
}
