//! Pixel formats, codec identifiers and stream parameters.
//!
//! # Plane model
//!
//! Every [`PixelFormat`] is described by a static list of [`PlaneLayout`]s.
//! Planes are stored back to back in one allocation and share a single row
//! pitch, so a surface is fully described by `(width, height, pitch, format)`:
//!
//! ```text
//! NV12, pitch p, height h
//!   rows [0, h)        Y   (1 byte/pixel)
//!   rows [h, h + h/2)  UV  (interleaved Cb Cr, 2×2 sub-sampled)
//! ```
//!
//! All samples are 8-bit; element size is always one byte.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Pixel format ────────────────────────────────────────────────────────────

/// One plane of a [`PixelFormat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Horizontal sub-sampling divisor.
    pub width_div: u32,
    /// Vertical sub-sampling divisor.
    pub height_div: u32,
    /// Interleaved samples per plane pixel.
    pub channels: u32,
}

const fn plane(width_div: u32, height_div: u32, channels: u32) -> PlaneLayout {
    PlaneLayout {
        width_div,
        height_div,
        channels,
    }
}

const FULL: PlaneLayout = plane(1, 1, 1);
const HALF_UV: PlaneLayout = plane(2, 2, 2);
const HALF_C: PlaneLayout = plane(2, 2, 1);
const RGB3: PlaneLayout = plane(1, 1, 3);

const Y_PLANES: &[PlaneLayout] = &[FULL];
const NV12_PLANES: &[PlaneLayout] = &[FULL, HALF_UV];
const YUV420_PLANES: &[PlaneLayout] = &[FULL, HALF_C, HALF_C];
const PLANAR3_PLANES: &[PlaneLayout] = &[FULL, FULL, FULL];
const PACKED3_PLANES: &[PlaneLayout] = &[RGB3];

/// Largest width or height accepted for any surface, frame or coded stream.
pub const MAX_DIMENSION: u32 = 16_384;

/// Reject a width or height above [`MAX_DIMENSION`].
pub fn check_max_dimension(width: u32, height: u32) -> crate::error::Result<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(crate::error::EngineError::InvalidParameter(format!(
            "{width}x{height} exceeds the {MAX_DIMENSION}x{MAX_DIMENSION} limit"
        )));
    }
    Ok(())
}

/// Frame pixel format shared by every stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Luma only.
    Y,
    /// **NVDEC native output.** Y plane then interleaved UV at half resolution.
    Nv12,
    /// Three planes Y, U, V; chroma at half resolution.
    Yuv420,
    /// Three full-resolution planes Y, U, V.
    Yuv444,
    /// Interleaved `[R G B R G B ...]`.
    Rgb,
    /// Interleaved `[B G R B G R ...]`.
    Bgr,
    /// Three full-resolution planes R, G, B.
    RgbPlanar,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 7] = [
        Self::Y,
        Self::Nv12,
        Self::Yuv420,
        Self::Yuv444,
        Self::Rgb,
        Self::Bgr,
        Self::RgbPlanar,
    ];

    /// Plane list in storage order.
    pub const fn planes(self) -> &'static [PlaneLayout] {
        match self {
            Self::Y => Y_PLANES,
            Self::Nv12 => NV12_PLANES,
            Self::Yuv420 => YUV420_PLANES,
            Self::Yuv444 | Self::RgbPlanar => PLANAR3_PLANES,
            Self::Rgb | Self::Bgr => PACKED3_PLANES,
        }
    }

    /// Whether chroma is 2×2 sub-sampled (width and height must be even).
    pub const fn is_subsampled(self) -> bool {
        matches!(self, Self::Nv12 | Self::Yuv420)
    }

    /// Bytes per sample. Every supported format is 8-bit.
    #[inline]
    pub const fn element_bytes(self) -> usize {
        1
    }

    /// Number of colour channels.
    #[inline]
    pub const fn channels(self) -> usize {
        match self {
            Self::Y => 1,
            _ => 3,
        }
    }

    /// Row length in bytes of the widest plane. Device pitch must be at least this.
    #[inline]
    pub fn row_bytes(self, width: u32) -> usize {
        self.plane_row_bytes(0, width)
    }

    /// Row length in bytes of plane `index`.
    #[inline]
    pub fn plane_row_bytes(self, index: usize, width: u32) -> usize {
        let p = self.planes()[index];
        (width / p.width_div) as usize * p.channels as usize
    }

    /// Number of rows in plane `index`.
    #[inline]
    pub fn plane_rows(self, index: usize, height: u32) -> usize {
        (height / self.planes()[index].height_div) as usize
    }

    /// Total number of pitched rows across all planes.
    pub fn total_rows(self, height: u32) -> usize {
        (0..self.planes().len()).map(|i| self.plane_rows(i, height)).sum()
    }

    /// Device allocation size in bytes for a surface with the given row pitch.
    #[inline]
    pub fn byte_size(self, height: u32, pitch: usize) -> usize {
        pitch * self.total_rows(height)
    }

    /// Byte offset of plane `index` in a pitched device surface.
    pub fn plane_offset(self, index: usize, height: u32, pitch: usize) -> usize {
        (0..index).map(|i| self.plane_rows(i, height) * pitch).sum()
    }

    /// Packed host size in bytes: every plane stored without row padding.
    pub fn dense_size(self, width: u32, height: u32) -> usize {
        (0..self.planes().len())
            .map(|i| self.plane_row_bytes(i, width) * self.plane_rows(i, height))
            .sum()
    }

    /// Byte offset of plane `index` in a packed host frame.
    pub fn dense_plane_offset(self, index: usize, width: u32, height: u32) -> usize {
        (0..index)
            .map(|i| self.plane_row_bytes(i, width) * self.plane_rows(i, height))
            .sum()
    }

    /// Packed host size, or `InvalidParameter` when it overflows `usize`.
    pub fn checked_dense_size(self, width: u32, height: u32) -> crate::error::Result<usize> {
        let overflow = || {
            crate::error::EngineError::InvalidParameter(format!(
                "{self:?} frame of {width}x{height} overflows the address space"
            ))
        };
        let mut total = 0usize;
        for (i, p) in self.planes().iter().enumerate() {
            let row = ((width / p.width_div) as usize)
                .checked_mul(p.channels as usize)
                .ok_or_else(overflow)?;
            let bytes = row
                .checked_mul(self.plane_rows(i, height))
                .ok_or_else(overflow)?;
            total = total.checked_add(bytes).ok_or_else(overflow)?;
        }
        Ok(total)
    }

    /// Validate that `(width, height)` can hold this format.
    ///
    /// Each side must be in `1..=MAX_DIMENSION`, even for sub-sampled formats.
    pub fn check_dimensions(self, width: u32, height: u32) -> crate::error::Result<()> {
        if width == 0 || height == 0 {
            return Err(crate::error::EngineError::InvalidParameter(format!(
                "{self:?} surface needs non-zero dimensions, got {width}x{height}"
            )));
        }
        check_max_dimension(width, height)?;
        if self.is_subsampled() && (width % 2 != 0 || height % 2 != 0) {
            return Err(crate::error::EngineError::InvalidParameter(format!(
                "{self:?} requires even dimensions, got {width}x{height}"
            )));
        }
        self.checked_dense_size(width, height)?;
        Ok(())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Y => "y",
            Self::Nv12 => "nv12",
            Self::Yuv420 => "yuv420",
            Self::Yuv444 => "yuv444",
            Self::Rgb => "rgb",
            Self::Bgr => "bgr",
            Self::RgbPlanar => "rgb_planar",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                crate::error::EngineError::InvalidParameter(format!("unknown pixel format `{s}`"))
            })
    }
}

// ─── Channel addressing ──────────────────────────────────────────────────────

/// Addressing of one colour channel: sample `(x, y)` lives at
/// `offset + y * pitch + x * step`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    pub offset: usize,
    pub pitch: usize,
    pub step: usize,
}

impl Channel {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> usize {
        self.offset + y * self.pitch + x * self.step
    }
}

/// Channel addressing of a whole surface, shared by every backend's kernels.
///
/// YUV formats list `[Y, U, V]`, RGB formats list `[R, G, B]`; `Y` has a
/// single channel. `chroma_shift` is 1 when U/V are 2×2 sub-sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMap {
    pub channels: [Channel; 3],
    pub count: usize,
    pub chroma_shift: u32,
}

/// Family a format belongs to for conversion purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFamily {
    Luma,
    Yuv,
    Rgb,
}

impl PixelFormat {
    pub const fn family(self) -> ColorFamily {
        match self {
            Self::Y => ColorFamily::Luma,
            Self::Nv12 | Self::Yuv420 | Self::Yuv444 => ColorFamily::Yuv,
            Self::Rgb | Self::Bgr | Self::RgbPlanar => ColorFamily::Rgb,
        }
    }

    /// Channel addressing for a surface of this format with the given pitch.
    pub fn channel_map(self, height: u32, pitch: usize) -> ChannelMap {
        let plane = |i: usize| self.plane_offset(i, height, pitch);
        let ch = |offset: usize, step: usize| Channel {
            offset,
            pitch,
            step,
        };
        let (channels, count, chroma_shift) = match self {
            Self::Y => ([ch(0, 1), Channel::default(), Channel::default()], 1, 0),
            Self::Nv12 => ([ch(0, 1), ch(plane(1), 2), ch(plane(1) + 1, 2)], 3, 1),
            Self::Yuv420 => ([ch(0, 1), ch(plane(1), 1), ch(plane(2), 1)], 3, 1),
            Self::Yuv444 | Self::RgbPlanar => {
                ([ch(0, 1), ch(plane(1), 1), ch(plane(2), 1)], 3, 0)
            }
            Self::Rgb => ([ch(0, 3), ch(1, 3), ch(2, 3)], 3, 0),
            Self::Bgr => ([ch(2, 3), ch(1, 3), ch(0, 3)], 3, 0),
        };
        ChannelMap {
            channels,
            count,
            chroma_shift,
        }
    }

    /// Channel addressing for a packed host frame of this format.
    pub fn dense_channel_map(self, width: u32, height: u32) -> ChannelMap {
        let mut map = self.channel_map(height, self.row_bytes(width));
        for (i, c) in map.channels.iter_mut().enumerate().take(map.count) {
            let plane_index = match self {
                Self::Nv12 => i.min(1),
                Self::Yuv420 | Self::Yuv444 | Self::RgbPlanar => i,
                _ => 0,
            };
            let inner = c.offset - self.plane_offset(plane_index, height, self.row_bytes(width));
            c.offset = self.dense_plane_offset(plane_index, width, height) + inner;
            c.pitch = self.plane_row_bytes(plane_index, width);
        }
        map
    }
}

/// How a backend carries out a `from → to` conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionKind {
    /// Same format: bit-identical copy.
    Copy,
    /// Luma copied, chroma samples re-packed without arithmetic.
    Repack,
    /// Luma plane extracted.
    ExtractLuma,
    /// RGB channel reorder.
    Shuffle,
    YuvToRgb,
    RgbToYuv,
}

/// The conversion table every backend implements.
pub fn conversion_kind(from: PixelFormat, to: PixelFormat) -> Option<ConversionKind> {
    use PixelFormat::*;
    match (from, to) {
        (a, b) if a == b => Some(ConversionKind::Copy),
        (Nv12, Yuv420) | (Yuv420, Nv12) => Some(ConversionKind::Repack),
        (Nv12 | Yuv420, Y) => Some(ConversionKind::ExtractLuma),
        (Nv12, Rgb | Bgr | RgbPlanar) | (Yuv420, Rgb) => Some(ConversionKind::YuvToRgb),
        (Rgb, Bgr) | (Bgr, Rgb) | (Rgb, RgbPlanar) | (RgbPlanar, Rgb) => {
            Some(ConversionKind::Shuffle)
        }
        (Rgb, Nv12 | Yuv420) | (Bgr, Nv12) => Some(ConversionKind::RgbToYuv),
        _ => None,
    }
}

// ─── Colour conversion parameters ────────────────────────────────────────────

/// YUV↔RGB matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Bt601,
    #[default]
    Bt709,
}

/// Sample range of the YUV side of a conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRange {
    /// Y in [16, 235], chroma in [16, 240].
    #[default]
    Limited,
    /// Y and chroma use the whole [0, 255] range.
    Full,
}

/// Colour parameters for a conversion stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSpec {
    #[serde(default)]
    pub space: ColorSpace,
    #[serde(default)]
    pub range: ColorRange,
}

impl ColorSpec {
    /// `(kr, kb)` luma coefficients of the matrix.
    pub const fn luma_coefficients(self) -> (f32, f32) {
        match self.space {
            ColorSpace::Bt601 => (0.299, 0.114),
            ColorSpace::Bt709 => (0.2126, 0.0722),
        }
    }
}

/// Resampling filter for the resize stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

// ─── Codec and stream parameters ─────────────────────────────────────────────

/// Video codec identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    H264,
    Hevc,
    Av1,
    Vp8,
    Vp9,
    /// Uncompressed NV12 pictures with explicit coding order, produced and
    /// consumed by the host backend's reference codec.
    Raw,
}

impl CodecId {
    /// IVF four-character code.
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::H264 => *b"H264",
            Self::Hevc => *b"H265",
            Self::Av1 => *b"AV01",
            Self::Vp8 => *b"VP80",
            Self::Vp9 => *b"VP90",
            Self::Raw => *b"VTCR",
        }
    }

    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"H264" | b"h264" | b"AVC1" => Some(Self::H264),
            b"H265" | b"HEVC" | b"hevc" => Some(Self::Hevc),
            b"AV01" => Some(Self::Av1),
            b"VP80" => Some(Self::Vp8),
            b"VP90" => Some(Self::Vp9),
            b"VTCR" => Some(Self::Raw),
            _ => None,
        }
    }
}

impl std::str::FromStr for CodecId {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "hevc" | "h265" => Ok(Self::Hevc),
            "av1" => Ok(Self::Av1),
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            "raw" => Ok(Self::Raw),
            other => Err(crate::error::EngineError::InvalidParameter(format!(
                "unknown codec `{other}`"
            ))),
        }
    }
}

/// A positive rational number (frame rate or time base).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Duration of one unit of `1 / self` in microseconds.
    pub fn frame_duration_us(self) -> i64 {
        if self.num == 0 {
            0
        } else {
            (self.den as i64 * 1_000_000) / self.num as i64
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// `N/D` or a bare integer `N` (meaning `N/1`).
impl std::str::FromStr for Rational {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || crate::error::EngineError::InvalidParameter(format!("invalid rational `{s}`"));
        let (num, den) = s.split_once('/').unwrap_or((s, "1"));
        Ok(Self::new(
            num.trim().parse().map_err(|_| bad())?,
            den.trim().parse().map_err(|_| bad())?,
        ))
    }
}

/// Audio stream description carried alongside video for muxing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Codec name as understood by the container backend (e.g. `aac`).
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Stream parameters discovered by the demuxer and required by the muxer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxingParams {
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    pub framerate: Rational,
    /// Container time base of the packet timestamps before conversion.
    pub time_base: Rational,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioParams>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_tables_are_usable_in_const_context() {
        const NV12: &[PlaneLayout] = PixelFormat::Nv12.planes();
        const RGB: &[PlaneLayout] = PixelFormat::Rgb.planes();
        assert_eq!(NV12.len(), 2);
        assert_eq!(NV12[1], plane(2, 2, 2));
        assert_eq!(RGB, &[plane(1, 1, 3)]);
        assert_eq!(PixelFormat::Yuv420.planes()[2], plane(2, 2, 1));
        assert_eq!(PixelFormat::RgbPlanar.planes().len(), 3);
    }

    #[test]
    fn nv12_layout_matches_decoder_output() {
        let f = PixelFormat::Nv12;
        assert_eq!(f.total_rows(1080), 1620);
        assert_eq!(f.byte_size(1080, 2048), 2048 * 1620);
        assert_eq!(f.plane_offset(1, 1080, 2048), 2048 * 1080);
        assert_eq!(f.dense_size(1920, 1080), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn yuv420_chroma_planes_follow_luma() {
        let f = PixelFormat::Yuv420;
        assert_eq!(f.plane_offset(1, 4, 8), 32);
        assert_eq!(f.plane_offset(2, 4, 8), 48);
        assert_eq!(f.byte_size(4, 8), 64);
        assert_eq!(f.dense_size(8, 4), 32 + 8 + 8);
        assert_eq!(f.dense_plane_offset(2, 8, 4), 40);
    }

    #[test]
    fn interleaved_rgb_rows_are_three_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgb.row_bytes(1280), 3840);
        assert_eq!(PixelFormat::Bgr.dense_size(1280, 720), 1280 * 720 * 3);
        assert_eq!(PixelFormat::RgbPlanar.dense_size(4, 2), 24);
    }

    #[test]
    fn subsampled_formats_reject_odd_dimensions() {
        let err = PixelFormat::Nv12
            .check_dimensions(1921, 1080)
            .expect_err("odd width must fail");
        assert!(err.to_string().contains("even dimensions"));
        assert!(PixelFormat::Rgb.check_dimensions(1921, 1081).is_ok());
        assert!(PixelFormat::Y.check_dimensions(0, 10).is_err());
    }

    #[test]
    fn oversized_dimensions_are_rejected_before_any_allocation() {
        assert!(PixelFormat::Rgb.check_dimensions(MAX_DIMENSION, MAX_DIMENSION).is_ok());
        let err = PixelFormat::Rgb
            .check_dimensions(u32::MAX - 1, u32::MAX - 1)
            .expect_err("far beyond the cap");
        assert_eq!(err.error_code(), 200);
        assert!(err.to_string().contains("exceeds the 16384x16384 limit"));
        assert!(PixelFormat::Nv12.check_dimensions(MAX_DIMENSION + 2, 16).is_err());
        assert_eq!(
            PixelFormat::Nv12.checked_dense_size(1920, 1080).ok(),
            Some(PixelFormat::Nv12.dense_size(1920, 1080))
        );
    }

    #[test]
    fn pixel_format_parses_display_names() {
        for f in PixelFormat::ALL {
            assert_eq!(f.to_string().parse::<PixelFormat>().ok(), Some(f));
        }
        assert!("p010".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn nv12_channel_map_interleaves_chroma() {
        let map = PixelFormat::Nv12.channel_map(4, 256);
        assert_eq!(map.count, 3);
        assert_eq!(map.chroma_shift, 1);
        assert_eq!(map.channels[1].at(1, 1), 1024 + 256 + 2);
        assert_eq!(map.channels[2].at(0, 0), 1025);

        let dense = PixelFormat::Nv12.dense_channel_map(4, 4);
        assert_eq!(dense.channels[1].at(1, 1), 16 + 4 + 2);
        assert_eq!(dense.channels[2].pitch, 4);
    }

    #[test]
    fn bgr_channel_map_reverses_order() {
        let map = PixelFormat::Bgr.channel_map(2, 8);
        assert_eq!(map.channels[0].offset, 2);
        assert_eq!(map.channels[2].offset, 0);
        let planar = PixelFormat::RgbPlanar.dense_channel_map(4, 2);
        assert_eq!(planar.channels[2].offset, 16);
    }

    #[test]
    fn conversion_table_covers_pipeline_pairs() {
        use PixelFormat::*;
        assert_eq!(conversion_kind(Nv12, Rgb), Some(ConversionKind::YuvToRgb));
        assert_eq!(conversion_kind(Rgb, Rgb), Some(ConversionKind::Copy));
        assert_eq!(conversion_kind(Yuv420, Nv12), Some(ConversionKind::Repack));
        assert_eq!(conversion_kind(Rgb, Nv12), Some(ConversionKind::RgbToYuv));
        assert_eq!(conversion_kind(Y, Rgb), None);
        assert_eq!(conversion_kind(Yuv444, Nv12), None);
    }

    #[test]
    fn fourcc_maps_back_to_codec() {
        for c in [CodecId::H264, CodecId::Hevc, CodecId::Av1, CodecId::Vp9, CodecId::Raw] {
            assert_eq!(CodecId::from_fourcc(c.fourcc()), Some(c));
        }
        assert_eq!(CodecId::from_fourcc(*b"MJPG"), None);
    }

    #[test]
    fn rational_parses_fraction_or_integer() {
        assert_eq!("30000/1001".parse::<Rational>().ok(), Some(Rational::new(30000, 1001)));
        assert_eq!("25".parse::<Rational>().ok(), Some(Rational::new(25, 1)));
        assert!("fast".parse::<Rational>().is_err());
    }

    #[test]
    fn rational_frame_duration() {
        assert_eq!(Rational::new(30, 1).frame_duration_us(), 33_333);
        assert_eq!(Rational::new(30000, 1001).frame_duration_us(), 33_366);
        assert!(!Rational::new(0, 1).is_valid());
    }
}
