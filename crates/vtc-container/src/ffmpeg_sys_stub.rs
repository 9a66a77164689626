#![allow(missing_docs)]
//! Stub FFI helpers for builds without FFmpeg runtime bindings.

use std::ffi::CString;

use vtc_core::error::EngineError;

/// Structured FFmpeg error context.
#[derive(Debug, Clone)]
pub struct FfmpegErrorDetail {
    pub context: String,
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for FfmpegErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {}): {}", self.context, self.code, self.message)
    }
}

impl FfmpegErrorDetail {
    pub fn demux(self) -> EngineError {
        EngineError::Demux(self.to_string())
    }

    pub fn mux(self) -> EngineError {
        EngineError::Mux(self.to_string())
    }
}

/// Stubbed FFmpeg status checker.
pub fn check_ffmpeg(ret: i32, context: &str) -> std::result::Result<(), FfmpegErrorDetail> {
    if ret >= 0 {
        Ok(())
    } else {
        Err(FfmpegErrorDetail {
            context: context.to_string(),
            code: ret,
            message: "FFmpeg runtime support is disabled in this build".into(),
        })
    }
}

/// Convert a Rust string to a C string.
pub fn to_cstring(s: &str) -> std::result::Result<CString, String> {
    CString::new(s).map_err(|e| e.to_string())
}
