#![doc = include_str!("../README.md")]

pub mod backend;
pub mod buffer;
pub mod codec_traits;
pub mod context;
pub mod encoder_options;
pub mod error;
pub mod host_copy_audit;
pub mod surface_pool;
pub mod task;
pub mod types;

/// Report a host copy outside upload/download; evaluates to `Result<()>`.
///
/// Expands against the calling crate's `audit-no-host-copies` feature.
#[macro_export]
macro_rules! host_copy_violation {
    ($stage:expr, $($arg:tt)+) => {{
        #[cfg(feature = "audit-no-host-copies")]
        let checked = $crate::host_copy_audit::check_host_copy($stage, format!($($arg)+));
        #[cfg(not(feature = "audit-no-host-copies"))]
        let checked: $crate::error::Result<()> = {
            let _ = &$stage;
            let _ = format_args!($($arg)+);
            Ok(())
        };
        checked
    }};
}
