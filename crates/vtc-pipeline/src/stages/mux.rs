use std::collections::VecDeque;

use tracing::{debug, info, warn};

use vtc_container::create_sink;
use vtc_core::buffer::{Packet, StreamKind};
use vtc_core::codec_traits::BitstreamSink;
use vtc_core::error::{EngineError, Result};
use vtc_core::task::{Stage, Step, TaskCore};
use vtc_core::types::MuxingParams;

use super::expect_packet;

/// Packets held back at most before the earliest one is written.
const INTERLEAVE_DEPTH: usize = 8;

/// Writes video (input 0) and optional audio (input 1) packets into a
/// container, interleaved by presentation time.
///
/// Execute with both inputs empty finalizes the container and ends the
/// stream. A container that was never finalized is finalized on drop.
pub struct MuxFrame {
    core: TaskCore,
    locator: String,
    sink: Box<dyn BitstreamSink>,
    video: VecDeque<Packet>,
    audio: VecDeque<Packet>,
    written: u64,
    finalized: bool,
}

impl MuxFrame {
    pub const NUM_INPUTS: usize = 2;
    pub const NUM_OUTPUTS: usize = 0;
    pub const VIDEO: usize = 0;
    pub const AUDIO: usize = 1;

    /// Create the container at `locator`. The header follows the first packet.
    pub fn make(locator: &str, params: &MuxingParams) -> Result<Self> {
        if params.width == 0 || params.height == 0 {
            return Err(EngineError::InvalidParameter(format!(
                "mux needs a non-zero video size, got {}x{}",
                params.width, params.height
            )));
        }
        if !params.framerate.is_valid() {
            return Err(EngineError::InvalidParameter(format!(
                "mux needs a positive framerate, got {}",
                params.framerate
            )));
        }
        let sink = create_sink(locator, params)?;
        Self::from_sink(locator, sink, params)
    }

    /// Wrap an already created sink.
    pub fn from_sink(
        locator: &str,
        sink: Box<dyn BitstreamSink>,
        params: &MuxingParams,
    ) -> Result<Self> {
        if params.audio.is_some() && !sink.supports_audio() {
            return Err(EngineError::Unsupported(format!(
                "{locator} cannot carry an audio stream"
            )));
        }
        info!(
            locator,
            codec = ?params.codec,
            width = params.width,
            height = params.height,
            fps = %params.framerate,
            audio = params.audio.is_some(),
            "mux opened"
        );
        Ok(Self {
            core: TaskCore::new("mux", Self::NUM_INPUTS, Self::NUM_OUTPUTS),
            locator: locator.to_string(),
            sink,
            video: VecDeque::new(),
            audio: VecDeque::new(),
            written: 0,
            finalized: false,
        })
    }

    pub fn packets_written(&self) -> u64 {
        self.written
    }

    /// Write the head with the earliest pts. Per-stream order is kept.
    fn write_next(&mut self) -> Result<bool> {
        let take_audio = match (self.video.front(), self.audio.front()) {
            (None, None) => return Ok(false),
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some(v), Some(a)) => a.pts < v.pts,
        };
        let queue = if take_audio {
            &mut self.audio
        } else {
            &mut self.video
        };
        if let Some(packet) = queue.pop_front() {
            self.sink.write_packet(&packet)?;
            self.written += 1;
        }
        Ok(true)
    }

    /// Write whatever no later packet can precede.
    fn interleave(&mut self) -> Result<()> {
        loop {
            let both = !self.video.is_empty() && !self.audio.is_empty();
            let over = self.video.len() + self.audio.len() > INTERLEAVE_DEPTH;
            if !(both || over) || !self.write_next()? {
                return Ok(());
            }
        }
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        while self.write_next()? {}
        self.finalized = true;
        self.sink.finish()?;
        info!(locator = %self.locator, packets = self.written, "mux finalized");
        Ok(())
    }
}

impl Stage for MuxFrame {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn port_required(&self, index: usize) -> bool {
        index == Self::VIDEO
    }

    fn step(&mut self) -> Result<Step> {
        let video = self.core.take_input(Self::VIDEO);
        let audio = self.core.take_input(Self::AUDIO);
        let end = video.is_none() && audio.is_none();

        if let Some(token) = video {
            let mut packet = expect_packet("mux", token)?;
            packet.stream = StreamKind::Video;
            self.video.push_back(packet);
        }
        if let Some(token) = audio {
            let mut packet = expect_packet("mux", token)?;
            packet.stream = StreamKind::Audio;
            self.audio.push_back(packet);
        }

        if end {
            self.finalize()?;
            return Ok(Step::Exhausted);
        }
        self.interleave()?;
        debug!(
            queued_video = self.video.len(),
            queued_audio = self.audio.len(),
            written = self.written,
            "mux step"
        );
        Ok(Step::Done)
    }
}

impl Drop for MuxFrame {
    fn drop(&mut self) {
        if !self.finalized
            && let Err(e) = self.finalize()
        {
            warn!(locator = %self.locator, error = %e, "mux finalize on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use vtc_core::buffer::Token;
    use vtc_core::task::{Task, TaskExecStatus};
    use vtc_core::types::{AudioParams, CodecId, Rational};

    use super::*;

    #[derive(Default)]
    struct Recorded {
        packets: Vec<(StreamKind, i64)>,
        finished: u32,
    }

    struct RecordingSink {
        log: Arc<Mutex<Recorded>>,
        audio: bool,
    }

    impl BitstreamSink for RecordingSink {
        fn supports_audio(&self) -> bool {
            self.audio
        }

        fn write_packet(&mut self, packet: &Packet) -> Result<()> {
            self.log.lock().packets.push((packet.stream, packet.pts));
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.log.lock().finished += 1;
            Ok(())
        }
    }

    fn params(audio: bool) -> MuxingParams {
        MuxingParams {
            codec: CodecId::Raw,
            width: 16,
            height: 8,
            framerate: Rational::new(30, 1),
            time_base: Rational::new(1, 30),
            audio: audio.then(|| AudioParams {
                codec: "aac".into(),
                sample_rate: 48_000,
                channels: 2,
            }),
        }
    }

    fn packet(pts: i64) -> Token {
        Token::Packet(Packet {
            data: Bytes::from_static(b"x"),
            pts,
            dts: pts,
            ..Packet::default()
        })
    }

    fn recording_mux(audio: bool) -> (MuxFrame, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let sink = RecordingSink {
            log: Arc::clone(&log),
            audio,
        };
        let mux = MuxFrame::from_sink("memory", Box::new(sink), &params(audio)).expect("make");
        (mux, log)
    }

    #[test]
    fn interleaves_streams_by_pts() {
        let (mut mux, log) = recording_mux(true);
        assert_eq!((mux.num_inputs(), mux.num_outputs()), (2, 0));
        assert!(mux.input_required(0));
        assert!(!mux.input_required(1));

        for (v, a) in [(0, 10), (33, 20), (66, 50)] {
            mux.set_input(0, packet(v)).expect("video");
            mux.set_input(1, packet(a)).expect("audio");
            assert_eq!(mux.execute(), TaskExecStatus::Success);
        }
        assert_eq!(mux.execute(), TaskExecStatus::EndOfStream);
        let log = log.lock();
        let order: Vec<i64> = log.packets.iter().map(|(_, pts)| *pts).collect();
        assert_eq!(order, vec![0, 10, 20, 33, 50, 66]);
        assert_eq!(log.finished, 1);
        assert_eq!(mux.packets_written(), 6);
    }

    #[test]
    fn video_order_is_kept_even_when_pts_goes_backwards() {
        let (mut mux, log) = recording_mux(false);
        for pts in [0, 99, 33, 66] {
            mux.set_input(0, packet(pts)).expect("video");
            assert_eq!(mux.execute(), TaskExecStatus::Success);
        }
        assert_eq!(mux.execute(), TaskExecStatus::EndOfStream);
        let order: Vec<i64> = log.lock().packets.iter().map(|(_, pts)| *pts).collect();
        assert_eq!(order, vec![0, 99, 33, 66]);
    }

    #[test]
    fn drop_finalizes_once() {
        let (mut mux, log) = recording_mux(false);
        mux.set_input(0, packet(0)).expect("video");
        assert_eq!(mux.execute(), TaskExecStatus::Success);
        drop(mux);
        assert_eq!(log.lock().finished, 1);
        assert_eq!(log.lock().packets.len(), 1);

        let (mut mux, log) = recording_mux(false);
        assert_eq!(mux.execute(), TaskExecStatus::EndOfStream);
        drop(mux);
        assert_eq!(log.lock().finished, 1);
    }

    #[test]
    fn audio_needs_a_capable_container() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let sink = RecordingSink { log, audio: false };
        let err = MuxFrame::from_sink("memory", Box::new(sink), &params(true))
            .err()
            .expect("audio rejected");
        assert!(err.to_string().contains("audio"));

        let dir = std::env::temp_dir().join(format!("vtc-mux-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let err = MuxFrame::make(dir.join("out.ivf").to_str().expect("utf8"), &params(true))
            .err()
            .expect("ivf has no audio");
        assert!(err.to_string().contains("audio"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn invalid_params_fail_at_make() {
        let mut p = params(false);
        p.width = 0;
        assert!(MuxFrame::make("/tmp/vtc-never.ivf", &p).is_err());
        let mut p = params(false);
        p.framerate = Rational::new(0, 1);
        assert!(MuxFrame::make("/tmp/vtc-never.ivf", &p).is_err());
        assert!(MuxFrame::make("", &params(false)).is_err());
    }
}
