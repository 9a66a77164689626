#![doc = include_str!("../README.md")]

/// FFmpeg-based demuxer: extracts compressed video packets from MP4/MKV containers.
#[cfg(feature = "ffmpeg-runtime")]
pub mod ffmpeg_demuxer;
#[cfg(not(feature = "ffmpeg-runtime"))]
#[path = "ffmpeg_demuxer_stub.rs"]
pub mod ffmpeg_demuxer;
/// FFmpeg-based muxer: wraps coded packets into MP4/MKV containers.
#[cfg(feature = "ffmpeg-runtime")]
pub mod ffmpeg_muxer;
#[cfg(not(feature = "ffmpeg-runtime"))]
#[path = "ffmpeg_muxer_stub.rs"]
pub mod ffmpeg_muxer;
/// FFI helpers: BSF declarations, FFmpeg error translation, and string utilities.
#[cfg(feature = "ffmpeg-runtime")]
pub mod ffmpeg_sys;
#[cfg(not(feature = "ffmpeg-runtime"))]
#[path = "ffmpeg_sys_stub.rs"]
pub mod ffmpeg_sys;
/// Pure-Rust IVF reader and writer.
pub mod ivf;

use std::path::Path;

use vtc_core::codec_traits::{BitstreamSink, BitstreamSource};
use vtc_core::error::{EngineError, Result};
use vtc_core::types::MuxingParams;

pub use ffmpeg_demuxer::FfmpegDemuxer;
pub use ffmpeg_muxer::FfmpegMuxer;
pub use ivf::{IvfReader, IvfWriter};

/// Whether FFmpeg containers are available in this build.
pub const FFMPEG_RUNTIME: bool = cfg!(feature = "ffmpeg-runtime");

fn is_ivf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ivf"))
}

fn locator_path(locator: &str) -> Result<&Path> {
    if locator.trim().is_empty() {
        return Err(EngineError::InvalidParameter(
            "container locator must not be empty".into(),
        ));
    }
    Ok(Path::new(locator))
}

/// Open a packet source for `locator`.
pub fn open_source(locator: &str) -> Result<Box<dyn BitstreamSource>> {
    let path = locator_path(locator)?;
    if is_ivf(path) {
        Ok(Box::new(IvfReader::open(path)?))
    } else {
        Ok(Box::new(FfmpegDemuxer::open(path)?))
    }
}

/// Create a packet sink for `locator`.
pub fn create_sink(locator: &str, params: &MuxingParams) -> Result<Box<dyn BitstreamSink>> {
    let path = locator_path(locator)?;
    if is_ivf(path) {
        Ok(Box::new(IvfWriter::create(path, params)?))
    } else {
        Ok(Box::new(FfmpegMuxer::create(path, params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demux_and_mux_stay_at_packet_boundary() {
        let demux = include_str!("ffmpeg_demuxer.rs");
        let mux = include_str!("ffmpeg_muxer.rs");
        let ivf = include_str!("ivf.rs");

        for forbidden in [
            "avcodec_send_packet",
            "avcodec_receive_frame",
            "AVFrame",
            "sws_scale",
            "rawvideo",
        ] {
            for (name, source) in [("demux", demux), ("mux", mux), ("ivf", ivf)] {
                assert!(
                    !source.contains(forbidden),
                    "{name} path should not include raw frame API `{forbidden}`"
                );
            }
        }
    }

    #[test]
    fn empty_locator_is_rejected() {
        let err = open_source("  ").err().expect("empty locator");
        assert!(err.to_string().contains("must not be empty"));
        let params = MuxingParams {
            codec: vtc_core::types::CodecId::Raw,
            width: 64,
            height: 64,
            framerate: vtc_core::types::Rational::new(30, 1),
            time_base: vtc_core::types::Rational::new(1, 30),
            audio: None,
        };
        let err = create_sink("", &params)
            .err()
            .expect("empty locator");
        assert_eq!(err.error_code(), 200);
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(is_ivf(Path::new("clip.IVF")));
        assert!(is_ivf(Path::new("/tmp/a/clip.ivf")));
        assert!(!is_ivf(Path::new("clip.mp4")));
        assert!(!is_ivf(Path::new("ivf")));
    }

    #[cfg(not(feature = "ffmpeg-runtime"))]
    #[test]
    fn non_ivf_locator_needs_ffmpeg_runtime() {
        let err = open_source("/tmp/vtc-missing/clip.mp4")
            .err()
            .expect("stub demuxer");
        assert!(err.to_string().contains("ffmpeg-runtime"));
        assert_eq!(err.error_code(), 202);
    }
}
