//! IVF container: a 32-byte file header followed by length-prefixed frames.
//!
//! ```text
//! file header (32 bytes, little endian)
//!   0..4   "DKIF"
//!   4..6   version (0)
//!   6..8   header length (32)
//!   8..12  fourcc
//!   12..14 width
//!   14..16 height
//!   16..20 time base denominator
//!   20..24 time base numerator
//!   24..28 frame count
//!   28..32 unused
//! frame header (12 bytes)
//!   0..4   payload size
//!   4..12  timestamp in time base units
//! ```
//!
//! IVF carries a single video stream and no per-frame flags.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};
use vtc_core::buffer::{Packet, StreamKind};
use vtc_core::codec_traits::{BitstreamSink, BitstreamSource};
use vtc_core::error::{EngineError, Result};
use vtc_core::types::{CodecId, MuxingParams, Rational};

const SIGNATURE: &[u8; 4] = b"DKIF";
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;
const FRAME_COUNT_OFFSET: u64 = 24;
/// Upper bound on one frame; larger sizes mean a corrupt header.
const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn open_error(path: &Path, reason: impl Into<String>) -> EngineError {
    EngineError::Open {
        locator: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Timestamp in `time_base` units → microseconds.
fn ticks_to_us(ticks: i64, time_base: Rational) -> i64 {
    (i128::from(ticks) * i128::from(time_base.num) * 1_000_000 / i128::from(time_base.den)) as i64
}

/// Microseconds → nearest timestamp in `time_base` units.
fn us_to_ticks(us: i64, time_base: Rational) -> i64 {
    let num = i128::from(us) * i128::from(time_base.den);
    let den = i128::from(time_base.num) * 1_000_000;
    ((num + den / 2).div_euclid(den)) as i64
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// [`BitstreamSource`] over an IVF file.
pub struct IvfReader {
    reader: BufReader<File>,
    params: MuxingParams,
    path: PathBuf,
    declared_frames: u32,
    packets_read: u64,
}

impl IvfReader {
    /// Open `path` and parse the file header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| open_error(path, e.to_string()))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; FILE_HEADER_LEN];
        reader
            .read_exact(&mut header)
            .map_err(|e| open_error(path, format!("IVF header unreadable: {e}")))?;

        if &header[..4] != SIGNATURE {
            return Err(open_error(path, "missing DKIF signature"));
        }
        let header_len = le_u16(&header, 6) as usize;
        if header_len < FILE_HEADER_LEN {
            return Err(open_error(path, format!("IVF header length {header_len} < 32")));
        }
        // Skip any vendor extension of the header.
        if header_len > FILE_HEADER_LEN {
            let extra = (header_len - FILE_HEADER_LEN) as u64;
            reader
                .seek(SeekFrom::Current(extra as i64))
                .map_err(|e| open_error(path, e.to_string()))?;
        }

        let fourcc = [header[8], header[9], header[10], header[11]];
        let codec = CodecId::from_fourcc(fourcc).ok_or_else(|| {
            open_error(
                path,
                format!("unknown fourcc `{}`", String::from_utf8_lossy(&fourcc)),
            )
        })?;
        let width = u32::from(le_u16(&header, 12));
        let height = u32::from(le_u16(&header, 14));
        let rate = le_u32(&header, 16);
        let scale = le_u32(&header, 20);
        let time_base = Rational::new(scale, rate);
        if width == 0 || height == 0 || !time_base.is_valid() {
            return Err(open_error(
                path,
                format!("invalid stream header: {width}x{height}, time base {scale}/{rate}"),
            ));
        }
        let params = MuxingParams {
            codec,
            width,
            height,
            framerate: Rational::new(rate, scale),
            time_base,
            audio: None,
        };
        let declared_frames = le_u32(&header, 24);
        info!(
            path = %path.display(),
            ?codec,
            width,
            height,
            framerate = %params.framerate,
            frames = declared_frames,
            "IVF source opened"
        );
        Ok(Self {
            reader,
            params,
            path: path.to_path_buf(),
            declared_frames,
            packets_read: 0,
        })
    }

    /// Frame count written in the file header (0 when the writer did not finalize).
    pub fn declared_frames(&self) -> u32 {
        self.declared_frames
    }

    /// Read as many bytes as available into `buf`; returns the count.
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl BitstreamSource for IvfReader {
    fn params(&self) -> &MuxingParams {
        &self.params
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match self.read_up_to(&mut header)? {
            0 => {
                debug!(path = %self.path.display(), packets = self.packets_read, "IVF source exhausted");
                return Ok(None);
            }
            FRAME_HEADER_LEN => {}
            n => {
                return Err(EngineError::Demux(format!(
                    "truncated frame header after packet {} ({n} of {FRAME_HEADER_LEN} bytes)",
                    self.packets_read
                )));
            }
        }
        let size = le_u32(&header, 0) as usize;
        if size == 0 || size > MAX_FRAME_BYTES {
            return Err(EngineError::Demux(format!(
                "frame {} has implausible size {size}",
                self.packets_read
            )));
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&header[4..12]);
        let ticks = i64::from_le_bytes(ts);

        let mut data = vec![0u8; size];
        let got = self.read_up_to(&mut data)?;
        if got != size {
            return Err(EngineError::Demux(format!(
                "truncated frame {}: {got} of {size} bytes",
                self.packets_read
            )));
        }

        let pts = ticks_to_us(ticks, self.params.time_base);
        let packet = Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration: self.params.framerate.frame_duration_us(),
            // IVF has no keyframe flag; the first frame of a stream is one.
            is_keyframe: self.packets_read == 0,
            stream: StreamKind::Video,
        };
        self.packets_read += 1;
        Ok(Some(packet))
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// [`BitstreamSink`] writing an IVF file.
///
/// The file is created by [`IvfWriter::create`]; the header goes out with
/// the first packet and its frame count is patched by `finish`.
pub struct IvfWriter {
    writer: BufWriter<File>,
    params: MuxingParams,
    time_base: Rational,
    path: PathBuf,
    frames: u32,
    bytes_written: u64,
    header_written: bool,
    finished: bool,
}

impl IvfWriter {
    pub fn create(path: &Path, params: &MuxingParams) -> Result<Self> {
        if params.audio.is_some() {
            return Err(EngineError::Unsupported(format!(
                "IVF cannot carry audio ({})",
                path.display()
            )));
        }
        if params.width > u32::from(u16::MAX) || params.height > u32::from(u16::MAX) {
            return Err(EngineError::InvalidParameter(format!(
                "{}x{} exceeds the IVF 16-bit size fields",
                params.width, params.height
            )));
        }
        // Packets are timed in microseconds; IVF stores ticks of the time base.
        // Readers take the frame rate from the header, so prefer 1/framerate.
        let time_base = if params.framerate.is_valid() {
            Rational::new(params.framerate.den, params.framerate.num)
        } else if params.time_base.is_valid() {
            params.time_base
        } else {
            return Err(EngineError::InvalidParameter(
                "IVF output needs a valid time base or framerate".into(),
            ));
        };
        let file = File::create(path).map_err(|e| open_error(path, e.to_string()))?;
        info!(path = %path.display(), codec = ?params.codec, time_base = %time_base, "IVF sink opened");
        Ok(Self {
            writer: BufWriter::with_capacity(1024 * 1024, file),
            params: params.clone(),
            time_base,
            path: path.to_path_buf(),
            frames: 0,
            bytes_written: 0,
            header_written: false,
            finished: false,
        })
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = [0u8; FILE_HEADER_LEN];
        header[..4].copy_from_slice(SIGNATURE);
        header[6..8].copy_from_slice(&(FILE_HEADER_LEN as u16).to_le_bytes());
        header[8..12].copy_from_slice(&self.params.codec.fourcc());
        header[12..14].copy_from_slice(&(self.params.width as u16).to_le_bytes());
        header[14..16].copy_from_slice(&(self.params.height as u16).to_le_bytes());
        header[16..20].copy_from_slice(&self.time_base.den.to_le_bytes());
        header[20..24].copy_from_slice(&self.time_base.num.to_le_bytes());
        self.writer.write_all(&header)?;
        self.header_written = true;
        debug!(path = %self.path.display(), "IVF header written");
        Ok(())
    }
}

impl BitstreamSink for IvfWriter {
    fn supports_audio(&self) -> bool {
        false
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.finished {
            return Err(EngineError::Mux(format!(
                "{} is already finalized",
                self.path.display()
            )));
        }
        if packet.stream != StreamKind::Video {
            return Err(EngineError::Mux("IVF cannot carry audio packets".into()));
        }
        if !self.header_written {
            self.write_header()?;
        }
        let size = u32::try_from(packet.data.len())
            .map_err(|_| EngineError::Mux(format!("packet of {} bytes", packet.data.len())))?;
        let ticks = us_to_ticks(packet.pts, self.time_base);
        self.writer.write_all(&size.to_le_bytes())?;
        self.writer.write_all(&ticks.to_le_bytes())?;
        self.writer.write_all(&packet.data)?;
        self.frames += 1;
        self.bytes_written += u64::from(size);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.header_written {
            self.write_header()?;
        }
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        file.write_all(&self.frames.to_le_bytes())?;
        file.seek(SeekFrom::End(0))?;
        file.sync_all()?;
        self.finished = true;
        info!(
            path = %self.path.display(),
            frames = self.frames,
            bytes = self.bytes_written,
            "IVF sink finalized"
        );
        Ok(())
    }
}
