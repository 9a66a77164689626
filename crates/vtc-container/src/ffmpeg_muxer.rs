//! FFmpeg-based container muxer: [`BitstreamSink`] for MP4/MKV/MOV.
//!
//! The output format is detected from the file extension. The file is
//! opened at construction; the header is written with the first packet.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;

use ffmpeg_sys_next::*;

use crate::ffmpeg_sys::{MICROSECONDS, check_ffmpeg, codec_to_av, rational_to_av, to_cstring};
use vtc_core::buffer::{Packet, StreamKind};
use vtc_core::codec_traits::BitstreamSink;
use vtc_core::error::{EngineError, Result};
use vtc_core::types::{AudioParams, MuxingParams};

/// Muxes coded packets into a container file.
pub struct FfmpegMuxer {
    fmt_ctx: *mut AVFormatContext,
    video: *mut AVStream,
    audio: *mut AVStream,
    pkt: *mut AVPacket,
    path: PathBuf,
    packet_counter: u64,
    header_written: bool,
    finished: bool,
}

// SAFETY: the muxer is owned by one Mux task and only used from the thread
// driving it.
unsafe impl Send for FfmpegMuxer {}

/// Add an audio stream described by `audio`.
///
/// # Safety
/// `fmt_ctx` must be a valid output context without a written header.
unsafe fn add_audio_stream(
    fmt_ctx: *mut AVFormatContext,
    audio: &AudioParams,
) -> Result<*mut AVStream> {
    let name = CString::new(audio.codec.as_str())
        .map_err(|e| EngineError::InvalidParameter(format!("audio codec name: {e}")))?;
    let descriptor = unsafe { avcodec_descriptor_get_by_name(name.as_ptr()) };
    if descriptor.is_null() {
        return Err(EngineError::Unsupported(format!(
            "audio codec `{}` is unknown to FFmpeg",
            audio.codec
        )));
    }
    let stream = unsafe { avformat_new_stream(fmt_ctx, ptr::null()) };
    if stream.is_null() {
        return Err(EngineError::Mux("Failed to create audio stream".into()));
    }
    unsafe {
        let par = (*stream).codecpar;
        (*par).codec_type = AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*par).codec_id = (*descriptor).id;
        (*par).sample_rate = audio.sample_rate as i32;
        av_channel_layout_default(&mut (*par).ch_layout, i32::from(audio.channels));
        (*stream).time_base = AVRational {
            num: 1,
            den: audio.sample_rate.max(1) as i32,
        };
    }
    Ok(stream)
}

impl FfmpegMuxer {
    /// Create the output container at `path`.
    pub fn create(path: &Path, params: &MuxingParams) -> Result<Self> {
        let open_err = |reason: String| EngineError::Open {
            locator: path.display().to_string(),
            reason,
        };
        let codec_id = codec_to_av(params.codec).ok_or_else(|| {
            EngineError::Unsupported(format!(
                "{:?} packets cannot be stored in an FFmpeg container; use .ivf",
                params.codec
            ))
        })?;
        let path_str = path
            .to_str()
            .ok_or_else(|| open_err("non-UTF8 path".into()))?;
        let c_path = to_cstring(path_str).map_err(open_err)?;

        // ── Create output format context ──
        let mut fmt_ctx: *mut AVFormatContext = ptr::null_mut();
        let ret = unsafe {
            avformat_alloc_output_context2(&mut fmt_ctx, ptr::null(), ptr::null(), c_path.as_ptr())
        };
        if ret < 0 || fmt_ctx.is_null() {
            return Err(open_err("no container format matches the extension".into()));
        }

        let mut muxer = Self {
            fmt_ctx,
            video: ptr::null_mut(),
            audio: ptr::null_mut(),
            pkt: ptr::null_mut(),
            path: path.to_path_buf(),
            packet_counter: 0,
            header_written: false,
            finished: false,
        };
        // From here on `Drop` releases everything on the error paths.

        // ── Video stream ──
        muxer.video = unsafe { avformat_new_stream(fmt_ctx, ptr::null()) };
        if muxer.video.is_null() {
            return Err(EngineError::Mux("Failed to create video stream".into()));
        }
        unsafe {
            let par = (*muxer.video).codecpar;
            (*par).codec_type = AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*par).codec_id = codec_id;
            (*par).width = params.width as i32;
            (*par).height = params.height as i32;
            (*muxer.video).time_base = if params.time_base.is_valid() {
                rational_to_av(params.time_base)
            } else {
                AVRational {
                    num: params.framerate.den as i32,
                    den: params.framerate.num.max(1) as i32,
                }
            };
            (*muxer.video).avg_frame_rate = rational_to_av(params.framerate);
        }

        if let Some(audio) = &params.audio {
            muxer.audio = unsafe { add_audio_stream(fmt_ctx, audio)? };
        }

        // ── Open avio ──
        let needs_file = unsafe { (*(*fmt_ctx).oformat).flags & AVFMT_NOFILE == 0 };
        if needs_file {
            let ret = unsafe { avio_open(&mut (*fmt_ctx).pb, c_path.as_ptr(), AVIO_FLAG_WRITE) };
            check_ffmpeg(ret, "avio_open").map_err(|e| open_err(e.to_string()))?;
        }

        muxer.pkt = unsafe { av_packet_alloc() };
        if muxer.pkt.is_null() {
            return Err(EngineError::Mux("Failed to allocate AVPacket".into()));
        }

        tracing::info!(
            path = %path.display(),
            codec = ?params.codec,
            width = params.width,
            height = params.height,
            fps = %params.framerate,
            audio = params.audio.is_some(),
            "FFmpeg muxer opened"
        );
        Ok(muxer)
    }

    /// Write the container header (lazily on first packet).
    fn write_header_if_needed(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let ret = unsafe { avformat_write_header(self.fmt_ctx, ptr::null_mut()) };
        check_ffmpeg(ret, "avformat_write_header").map_err(|e| e.mux())?;
        // The muxer may adjust stream time bases during header writing.
        let tb = unsafe { (*self.video).time_base };
        tracing::debug!(
            time_base_num = tb.num,
            time_base_den = tb.den,
            "Container header written"
        );
        self.header_written = true;
        Ok(())
    }
}

impl BitstreamSink for FfmpegMuxer {
    fn supports_audio(&self) -> bool {
        true
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.finished {
            return Err(EngineError::Mux(format!(
                "{} is already finalized",
                self.path.display()
            )));
        }
        let stream = match packet.stream {
            StreamKind::Video => self.video,
            StreamKind::Audio if !self.audio.is_null() => self.audio,
            StreamKind::Audio => {
                return Err(EngineError::Mux(
                    "audio packet for a container opened without audio".into(),
                ));
            }
        };
        self.write_header_if_needed()?;

        unsafe {
            let ret = av_new_packet(self.pkt, packet.data.len() as i32);
            check_ffmpeg(ret, "av_new_packet").map_err(|e| e.mux())?;
            ptr::copy_nonoverlapping(packet.data.as_ptr(), (*self.pkt).data, packet.data.len());

            // Pipeline timestamps are microseconds; rescale at the boundary.
            let tb = (*stream).time_base;
            (*self.pkt).pts = av_rescale_q(packet.pts, MICROSECONDS, tb);
            (*self.pkt).dts = av_rescale_q(packet.dts, MICROSECONDS, tb);
            (*self.pkt).duration = av_rescale_q(packet.duration, MICROSECONDS, tb);
            (*self.pkt).stream_index = (*stream).index;
            if packet.is_keyframe {
                (*self.pkt).flags |= AV_PKT_FLAG_KEY;
            }

            // av_interleaved_write_frame takes ownership and unrefs internally.
            let ret = av_interleaved_write_frame(self.fmt_ctx, self.pkt);
            check_ffmpeg(ret, "av_interleaved_write_frame").map_err(|e| e.mux())?;
        }

        self.packet_counter += 1;
        if self.packet_counter.is_multiple_of(100) {
            tracing::debug!(packets = self.packet_counter, "Muxer progress");
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.write_header_if_needed()?;
        let ret = unsafe { av_write_trailer(self.fmt_ctx) };
        check_ffmpeg(ret, "av_write_trailer").map_err(|e| e.mux())?;
        self.finished = true;
        tracing::info!(
            path = %self.path.display(),
            packets = self.packet_counter,
            "Container finalized"
        );
        Ok(())
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        unsafe {
            av_packet_free(&mut self.pkt);
            if !self.fmt_ctx.is_null() {
                let oformat = (*self.fmt_ctx).oformat;
                if (*oformat).flags & AVFMT_NOFILE == 0 && !(*self.fmt_ctx).pb.is_null() {
                    avio_closep(&mut (*self.fmt_ctx).pb);
                }
                avformat_free_context(self.fmt_ctx);
                self.fmt_ctx = ptr::null_mut();
            }
        }
        tracing::debug!("FFmpeg muxer destroyed");
    }
}
