#![doc = include_str!("../README.md")]

pub mod backend;
#[cfg(not(vtc_nvcodec_stub))]
mod cuda_ctx;
#[cfg(vtc_nvcodec_stub)]
#[path = "nvdec_stub.rs"]
pub mod nvdec;
#[cfg(not(vtc_nvcodec_stub))]
pub mod nvdec;
#[cfg(vtc_nvcodec_stub)]
#[path = "nvenc_stub.rs"]
pub mod nvenc;
#[cfg(not(vtc_nvcodec_stub))]
pub mod nvenc;
pub mod params;
pub mod sys;

pub use backend::{NvidiaBackend, execution_context};
pub use nvdec::NvDecoder;
pub use nvenc::NvEncoder;

/// Whether NVDEC/NVENC are linked into this build.
pub const NVCODEC_RUNTIME: bool = cfg!(not(vtc_nvcodec_stub));
