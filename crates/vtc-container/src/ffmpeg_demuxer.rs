//! FFmpeg-based container demuxer: [`BitstreamSource`] for MP4/MKV/MOV.
//!
//! Reads compressed video packets from a container and converts H.264/HEVC
//! from MP4 length-prefixed format to Annex B via the matching bitstream
//! filter. Timestamps leave this module in microseconds.

use std::ffi::CStr;
use std::path::Path;
use std::ptr;

use bytes::Bytes;
use ffmpeg_sys_next::*;

/// POSIX EAGAIN, used with AVERROR() for "try again" semantics.
const EAGAIN: i32 = 11;

use crate::ffmpeg_sys::{
    AVBSFContext, MICROSECONDS, av_bsf_alloc, av_bsf_free, av_bsf_get_by_name, av_bsf_init,
    av_bsf_receive_packet, av_bsf_send_packet, check_ffmpeg, codec_from_av, rational_from_av,
    to_cstring,
};
use vtc_core::buffer::{Packet, StreamKind};
use vtc_core::codec_traits::BitstreamSource;
use vtc_core::error::{EngineError, Result};
use vtc_core::types::{AudioParams, CodecId, MuxingParams};

/// Demuxes a container file into coded video packets.
pub struct FfmpegDemuxer {
    fmt_ctx: *mut AVFormatContext,
    bsf_ctx: *mut AVBSFContext,
    video_stream_index: i32,
    /// Packet for reading from the container.
    pkt_read: *mut AVPacket,
    /// Packet for receiving filtered output from the BSF.
    pkt_filtered: *mut AVPacket,
    /// Stream time base for rescaling to microseconds.
    time_base: AVRational,
    params: MuxingParams,
    eos: bool,
}

// SAFETY: the demuxer is owned by one Demux task and only used from the
// thread driving it. The raw pointers are never shared.
unsafe impl Send for FfmpegDemuxer {}

/// Describe the best audio stream, if any.
///
/// # Safety
/// `fmt_ctx` must be an opened format context with stream info.
unsafe fn audio_params(fmt_ctx: *mut AVFormatContext) -> Option<AudioParams> {
    let index = unsafe {
        av_find_best_stream(
            fmt_ctx,
            AVMediaType::AVMEDIA_TYPE_AUDIO,
            -1,
            -1,
            ptr::null_mut(),
            0,
        )
    };
    if index < 0 {
        return None;
    }
    let par = unsafe { &*(*(*(*fmt_ctx).streams.add(index as usize))).codecpar };
    let name = unsafe { CStr::from_ptr(avcodec_get_name(par.codec_id)) };
    Some(AudioParams {
        codec: name.to_string_lossy().into_owned(),
        sample_rate: par.sample_rate.max(0) as u32,
        channels: par.ch_layout.nb_channels.max(0) as u16,
    })
}

impl FfmpegDemuxer {
    /// Open a container and prepare the Annex B bitstream filter.
    pub fn open(path: &Path) -> Result<Self> {
        let open_err = |reason: String| EngineError::Open {
            locator: path.display().to_string(),
            reason,
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| open_err("non-UTF8 path".into()))?;
        let c_path = to_cstring(path_str).map_err(open_err)?;

        // ── Open container ──
        let mut fmt_ctx: *mut AVFormatContext = ptr::null_mut();
        let ret = unsafe {
            avformat_open_input(&mut fmt_ctx, c_path.as_ptr(), ptr::null(), ptr::null_mut())
        };
        check_ffmpeg(ret, "avformat_open_input").map_err(|e| open_err(e.to_string()))?;

        let ret = unsafe { avformat_find_stream_info(fmt_ctx, ptr::null_mut()) };
        if ret < 0 {
            unsafe { avformat_close_input(&mut fmt_ctx) };
            check_ffmpeg(ret, "avformat_find_stream_info").map_err(|e| open_err(e.to_string()))?;
        }

        // ── Find video stream ──
        let stream_index = unsafe {
            av_find_best_stream(
                fmt_ctx,
                AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                ptr::null_mut(),
                0,
            )
        };
        if stream_index < 0 {
            unsafe { avformat_close_input(&mut fmt_ctx) };
            return Err(open_err("no video stream found in container".into()));
        }

        let stream = unsafe { &*(*(*fmt_ctx).streams.add(stream_index as usize)) };
        let par = unsafe { &*stream.codecpar };
        let Some(codec) = codec_from_av(par.codec_id) else {
            unsafe { avformat_close_input(&mut fmt_ctx) };
            return Err(open_err(format!("unsupported video codec {:?}", par.codec_id)));
        };
        let time_base = stream.time_base;
        let framerate = if stream.avg_frame_rate.num > 0 {
            stream.avg_frame_rate
        } else {
            stream.r_frame_rate
        };
        let params = MuxingParams {
            codec,
            width: par.width.max(0) as u32,
            height: par.height.max(0) as u32,
            framerate: rational_from_av(framerate),
            time_base: rational_from_av(time_base),
            audio: unsafe { audio_params(fmt_ctx) },
        };

        // ── Allocate packets ──
        let mut pkt_read = unsafe { av_packet_alloc() };
        let mut pkt_filtered = unsafe { av_packet_alloc() };
        if pkt_read.is_null() || pkt_filtered.is_null() {
            unsafe {
                av_packet_free(&mut pkt_read);
                av_packet_free(&mut pkt_filtered);
                avformat_close_input(&mut fmt_ctx);
            }
            return Err(EngineError::Demux("Failed to allocate AVPacket".into()));
        }

        let mut demuxer = Self {
            fmt_ctx,
            bsf_ctx: ptr::null_mut(),
            video_stream_index: stream_index,
            pkt_read,
            pkt_filtered,
            time_base,
            params,
            eos: false,
        };

        // ── Initialize bitstream filter (MP4 → Annex B) ──
        // From here on `Drop` releases everything on the error paths.
        let bsf_name = match codec {
            CodecId::H264 => Some(c"h264_mp4toannexb"),
            CodecId::Hevc => Some(c"hevc_mp4toannexb"),
            _ => None,
        };
        if let Some(bsf_name) = bsf_name {
            let bsf = unsafe { av_bsf_get_by_name(bsf_name.as_ptr()) };
            if bsf.is_null() {
                return Err(EngineError::BitstreamFilter(format!(
                    "BSF {bsf_name:?} not found; FFmpeg build may be incomplete"
                )));
            }
            let ret = unsafe { av_bsf_alloc(bsf, &mut demuxer.bsf_ctx) };
            check_ffmpeg(ret, "av_bsf_alloc").map_err(|e| e.demux())?;
            let ret =
                unsafe { avcodec_parameters_copy((*demuxer.bsf_ctx).par_in, stream.codecpar) };
            check_ffmpeg(ret, "avcodec_parameters_copy").map_err(|e| e.demux())?;
            unsafe { (*demuxer.bsf_ctx).time_base_in = time_base };
            let ret = unsafe { av_bsf_init(demuxer.bsf_ctx) };
            check_ffmpeg(ret, "av_bsf_init").map_err(|e| e.demux())?;
        }

        tracing::info!(
            path = %path.display(),
            ?codec,
            stream_index,
            width = demuxer.params.width,
            height = demuxer.params.height,
            framerate = %demuxer.params.framerate,
            audio = demuxer.params.audio.is_some(),
            bsf = bsf_name.is_some(),
            "FFmpeg demuxer opened"
        );
        Ok(demuxer)
    }

    fn rescale(&self, ts: i64) -> i64 {
        if ts == AV_NOPTS_VALUE {
            return 0;
        }
        unsafe { av_rescale_q(ts, self.time_base, MICROSECONDS) }
    }

    fn copy_packet_data(pkt: &AVPacket) -> Result<Bytes> {
        if pkt.size <= 0 {
            return Ok(Bytes::new());
        }
        if pkt.data.is_null() {
            return Err(EngineError::Demux(
                "FFmpeg produced packet with null data pointer".into(),
            ));
        }
        // SAFETY: `pkt.data` is valid for `pkt.size` bytes when size > 0.
        Ok(Bytes::copy_from_slice(unsafe {
            std::slice::from_raw_parts(pkt.data, pkt.size as usize)
        }))
    }

    /// Convert and release `pkt`. `None` for empty payloads.
    fn take_packet(&self, pkt: *mut AVPacket) -> Result<Option<Packet>> {
        let raw = unsafe { &*pkt };
        let data = Self::copy_packet_data(raw);
        let packet = Packet {
            data: Bytes::new(),
            pts: self.rescale(raw.pts),
            dts: self.rescale(raw.dts),
            duration: self.rescale(raw.duration),
            is_keyframe: (raw.flags & AV_PKT_FLAG_KEY) != 0,
            stream: StreamKind::Video,
        };
        unsafe { av_packet_unref(pkt) };
        let data = data?;
        if data.is_empty() {
            tracing::debug!("Skipping empty demuxed packet");
            return Ok(None);
        }
        Ok(Some(Packet { data, ..packet }))
    }
}

impl BitstreamSource for FfmpegDemuxer {
    fn params(&self) -> &MuxingParams {
        &self.params
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if !self.bsf_ctx.is_null() {
                let ret = unsafe { av_bsf_receive_packet(self.bsf_ctx, self.pkt_filtered) };
                if ret == 0 {
                    match self.take_packet(self.pkt_filtered)? {
                        Some(packet) => return Ok(Some(packet)),
                        None => continue,
                    }
                } else if ret == AVERROR_EOF {
                    return Ok(None);
                } else if ret != AVERROR(EAGAIN) {
                    check_ffmpeg(ret, "av_bsf_receive_packet").map_err(|e| e.demux())?;
                }
            }
            if self.eos {
                return Ok(None);
            }

            let ret = unsafe { av_read_frame(self.fmt_ctx, self.pkt_read) };
            if ret == AVERROR_EOF {
                self.eos = true;
                if self.bsf_ctx.is_null() {
                    return Ok(None);
                }
                // Flush the filter; its remaining output is drained above.
                let ret = unsafe { av_bsf_send_packet(self.bsf_ctx, ptr::null()) };
                check_ffmpeg(ret, "av_bsf_send_packet(flush)").map_err(|e| e.demux())?;
                continue;
            }
            check_ffmpeg(ret, "av_read_frame").map_err(|e| e.demux())?;

            // Video only: audio is described in params, not forwarded.
            if unsafe { (*self.pkt_read).stream_index } != self.video_stream_index {
                unsafe { av_packet_unref(self.pkt_read) };
                continue;
            }

            if self.bsf_ctx.is_null() {
                match self.take_packet(self.pkt_read)? {
                    Some(packet) => return Ok(Some(packet)),
                    None => continue,
                }
            }

            let ret = unsafe { av_bsf_send_packet(self.bsf_ctx, self.pkt_read) };
            unsafe { av_packet_unref(self.pkt_read) };
            check_ffmpeg(ret, "av_bsf_send_packet").map_err(|e| e.demux())?;
        }
    }
}

impl Drop for FfmpegDemuxer {
    fn drop(&mut self) {
        // Free in reverse allocation order.
        unsafe {
            av_packet_free(&mut self.pkt_filtered);
            av_packet_free(&mut self.pkt_read);
            if !self.bsf_ctx.is_null() {
                av_bsf_free(&mut self.bsf_ctx);
            }
            if !self.fmt_ctx.is_null() {
                avformat_close_input(&mut self.fmt_ctx);
            }
        }
        tracing::debug!("FFmpeg demuxer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_packet_data_is_safe() {
        let pkt: AVPacket = unsafe { std::mem::zeroed() };
        let data = FfmpegDemuxer::copy_packet_data(&pkt).expect("empty packet should be accepted");
        assert!(data.is_empty());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = FfmpegDemuxer::open(Path::new("/nonexistent/vtc/clip.mp4"))
            .err()
            .expect("no such file");
        assert_eq!(err.error_code(), 202);
    }
}
