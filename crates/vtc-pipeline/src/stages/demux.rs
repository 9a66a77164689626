use tracing::{debug, info};

use vtc_container::open_source;
use vtc_core::buffer::Token;
use vtc_core::codec_traits::BitstreamSource;
use vtc_core::error::Result;
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::{MuxingParams, Rational};

/// Reads coded video packets from a container.
///
/// Output 0 carries the next packet, output 1 the stream parameters.
pub struct DemuxFrame {
    core: TaskCore,
    source: Box<dyn BitstreamSource>,
    params: Option<MuxingParams>,
}

impl DemuxFrame {
    pub const NUM_INPUTS: usize = 0;
    pub const NUM_OUTPUTS: usize = 2;
    /// Output port of coded packets.
    pub const PACKETS: usize = 0;
    /// Output port of [`MuxingParams`].
    pub const PARAMS: usize = 1;

    /// Open `locator` now. `.ivf` is read natively, anything else through
    /// FFmpeg when built with `ffmpeg-runtime`.
    pub fn make(locator: &str) -> Result<Self> {
        let source = open_source(locator)?;
        info!(locator, "demux opened");
        Ok(Self::from_source(source))
    }

    /// Wrap an already opened packet source.
    pub fn from_source(source: Box<dyn BitstreamSource>) -> Self {
        Self {
            core: TaskCore::new("demux", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            source,
            params: None,
        }
    }

    /// Stream parameters, after the first successful execute.
    pub fn params(&self) -> Option<&MuxingParams> {
        self.params.as_ref()
    }

    pub fn framerate(&self) -> Option<Rational> {
        self.params.as_ref().map(|p| p.framerate)
    }
}

impl Stage for DemuxFrame {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<Step> {
        let Some(packet) = self.source.read_packet()? else {
            return Ok(Step::Exhausted);
        };
        debug!(
            pts = packet.pts,
            bytes = packet.data.len(),
            keyframe = packet.is_keyframe,
            "demuxed packet"
        );
        let params = self.source.params().clone();
        self.core.publish(Self::PACKETS, Token::Packet(packet))?;
        self.core.publish(Self::PARAMS, Token::Params(params.clone()))?;
        self.params = Some(params);
        Ok(Step::Done)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use bytes::Bytes;
    use vtc_container::IvfWriter;
    use vtc_core::buffer::Packet;
    use vtc_core::codec_traits::BitstreamSink;
    use vtc_core::task::{Task, TaskExecStatus};
    use vtc_core::types::CodecId;

    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn write_clip(path: &std::path::Path, frames: i64) -> MuxingParams {
        let params = MuxingParams {
            codec: CodecId::Vp9,
            width: 64,
            height: 48,
            framerate: Rational::new(25, 1),
            time_base: Rational::new(1, 25),
            audio: None,
        };
        let mut writer = IvfWriter::create(path, &params).expect("create ivf");
        for i in 0..frames {
            writer
                .write_packet(&Packet {
                    data: Bytes::from(vec![i as u8; 16]),
                    pts: i * 40_000,
                    dts: i * 40_000,
                    duration: 40_000,
                    is_keyframe: i == 0,
                    ..Packet::default()
                })
                .expect("write");
        }
        writer.finish().expect("finish");
        params
    }

    #[test]
    fn publishes_packets_then_ends() {
        let dir = unique_temp_dir("vtc-demux");
        let path = dir.join("clip.ivf");
        let written = write_clip(&path, 3);

        let mut demux = DemuxFrame::make(path.to_str().expect("utf8")).expect("open");
        assert_eq!((demux.num_inputs(), demux.num_outputs()), (0, 2));
        assert!(demux.params().is_none());
        assert!(demux.framerate().is_none());

        for i in 0..3 {
            assert_eq!(demux.execute(), TaskExecStatus::Success);
            let packet = demux
                .output(DemuxFrame::PACKETS)
                .and_then(Token::as_packet)
                .expect("packet");
            assert_eq!(packet.pts, i * 40_000);
            let params = demux
                .output(DemuxFrame::PARAMS)
                .and_then(Token::as_params)
                .expect("params");
            assert_eq!(params.codec, CodecId::Vp9);
        }
        assert_eq!(demux.framerate(), Some(written.framerate));
        assert_eq!(demux.params().map(|p| (p.width, p.height)), Some((64, 48)));
        assert_eq!(demux.execute(), TaskExecStatus::EndOfStream);
        assert_eq!(demux.execute(), TaskExecStatus::EndOfStream);
        assert_eq!((demux.num_inputs(), demux.num_outputs()), (0, 2));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn bad_locators_fail_at_make() {
        assert!(DemuxFrame::make("").is_err());

        let dir = unique_temp_dir("vtc-demux-bad");
        let path = dir.join("garbage.ivf");
        std::fs::write(&path, b"not an ivf file at all, just text....").expect("write");
        let err = DemuxFrame::make(path.to_str().expect("utf8"))
            .err()
            .expect("malformed header");
        assert_eq!(err.error_code(), 202);

        let err = DemuxFrame::make(dir.join("missing.ivf").to_str().expect("utf8"))
            .err()
            .expect("missing file");
        assert_eq!(err.error_code(), 202);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn truncated_stream_fails_and_stays_failed() {
        let dir = unique_temp_dir("vtc-demux-trunc");
        let path = dir.join("clip.ivf");
        write_clip(&path, 2);
        let len = std::fs::metadata(&path).expect("meta").len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open");
        file.set_len(len - 5).expect("truncate");

        let mut demux = DemuxFrame::make(path.to_str().expect("utf8")).expect("open");
        assert_eq!(demux.execute(), TaskExecStatus::Success);
        assert_eq!(demux.execute(), TaskExecStatus::Fail);
        assert!(demux.output(DemuxFrame::PACKETS).is_none());
        assert_eq!(demux.execute(), TaskExecStatus::Fail);
        assert_eq!(demux.last_error().map(|e| e.error_code()), Some(302));

        let _ = std::fs::remove_dir_all(dir);
    }
}
