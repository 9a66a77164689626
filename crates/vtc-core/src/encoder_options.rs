//! Structured encoder options, validated once when an encode task is built.
//!
//! Options can be written directly, deserialized from a pipeline graph, or
//! parsed from `key=value` pairs:
//!
//! ```text
//! codec=hevc preset=p5 rc=vbr bitrate=8M maxbitrate=12M gop=60 bf=2 fps=30000/1001
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{CodecId, PixelFormat, Rational};

/// Quality/speed preset, `P1` (fastest) to `P7` (slowest, best quality).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    P1,
    P2,
    P3,
    #[default]
    P4,
    P5,
    P6,
    P7,
}

impl Preset {
    /// Index 1..=7.
    pub const fn level(self) -> u32 {
        match self {
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P3 => 3,
            Self::P4 => 4,
            Self::P5 => 5,
            Self::P6 => 6,
            Self::P7 => 7,
        }
    }
}

/// Codec profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Let the encoder pick.
    #[default]
    Auto,
    /// H.264 only; no B-frames.
    Baseline,
    Main,
    /// H.264 only.
    High,
    /// H.264 only; required for 4:4:4 input.
    High444,
}

/// Rate-control mode and its targets. Bitrates are in bits/sec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateControl {
    ConstQp { qp: u32 },
    Cbr { bitrate: u32 },
    /// `max_bitrate == 0` leaves the peak unconstrained.
    Vbr { bitrate: u32, max_bitrate: u32 },
}

impl Default for RateControl {
    fn default() -> Self {
        Self::Vbr {
            bitrate: 10_000_000,
            max_bitrate: 0,
        }
    }
}

/// Encoder options object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderOptions {
    pub codec: CodecId,
    pub preset: Preset,
    pub profile: Profile,
    pub rate_control: RateControl,
    /// Frames between intra pictures.
    pub gop_length: u32,
    /// Consecutive B-frames between anchors (0 = none).
    pub b_frames: u32,
    /// Frames between IDR pictures; 0 = every GOP starts with an IDR.
    pub idr_period: u32,
    pub framerate: Rational,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            codec: CodecId::H264,
            preset: Preset::default(),
            profile: Profile::default(),
            rate_control: RateControl::default(),
            gop_length: 60,
            b_frames: 0,
            idr_period: 0,
            framerate: Rational::new(30, 1),
        }
    }
}

/// Longest run of B-frames any supported encoder accepts.
pub const MAX_B_FRAMES: u32 = 4;
const MAX_QP: u32 = 51;

impl EncoderOptions {
    /// Parse `key=value` pairs on top of the defaults.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Self::default();
        let mut mode: Option<String> = None;
        let mut bitrate: Option<u32> = None;
        let mut max_bitrate: Option<u32> = None;
        let mut qp: Option<u32> = None;

        for (key, value) in pairs {
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "codec" => opts.codec = value.parse()?,
                "preset" => opts.preset = parse_preset(value)?,
                "profile" => opts.profile = parse_profile(value)?,
                "rc" => mode = Some(value.to_ascii_lowercase()),
                "bitrate" => bitrate = Some(parse_bitrate(value)?),
                "maxbitrate" => max_bitrate = Some(parse_bitrate(value)?),
                "qp" => qp = Some(parse_u32(key, value)?),
                "gop" => opts.gop_length = parse_u32(key, value)?,
                "bf" => opts.b_frames = parse_u32(key, value)?,
                "idrperiod" => opts.idr_period = parse_u32(key, value)?,
                "fps" => opts.framerate = value.parse()?,
                other => {
                    return Err(EngineError::InvalidParameter(format!(
                        "unknown encoder option `{other}`"
                    )));
                }
            }
        }

        let mode = mode.unwrap_or_else(|| {
            if qp.is_some() && bitrate.is_none() {
                "constqp".into()
            } else {
                "vbr".into()
            }
        });
        opts.rate_control = match mode.as_str() {
            "constqp" | "cqp" => RateControl::ConstQp { qp: qp.unwrap_or(25) },
            "cbr" => RateControl::Cbr {
                bitrate: bitrate.unwrap_or(10_000_000),
            },
            "vbr" => RateControl::Vbr {
                bitrate: bitrate.unwrap_or(10_000_000),
                max_bitrate: max_bitrate.unwrap_or(0),
            },
            other => {
                return Err(EngineError::InvalidParameter(format!(
                    "unknown rate control mode `{other}` (expected constqp, cbr or vbr)"
                )));
            }
        };
        Ok(opts)
    }

    /// Reject inconsistent combinations.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EngineError::InvalidParameter(msg));

        if !self.framerate.is_valid() {
            return invalid(format!("framerate {} must be positive", self.framerate));
        }
        if self.gop_length == 0 {
            return invalid("gop_length must be at least 1".into());
        }
        if self.b_frames > MAX_B_FRAMES {
            return invalid(format!(
                "b_frames {} exceeds the maximum of {MAX_B_FRAMES}",
                self.b_frames
            ));
        }
        if self.b_frames > 0 && self.b_frames >= self.gop_length {
            return invalid(format!(
                "b_frames {} must be smaller than gop_length {}",
                self.b_frames, self.gop_length
            ));
        }
        if self.idr_period != 0 && self.idr_period < self.gop_length {
            return invalid(format!(
                "idr_period {} must be 0 or at least gop_length {}",
                self.idr_period, self.gop_length
            ));
        }

        match self.rate_control {
            RateControl::ConstQp { qp } if qp > MAX_QP => {
                return invalid(format!("qp {qp} exceeds {MAX_QP}"));
            }
            RateControl::Cbr { bitrate } | RateControl::Vbr { bitrate, .. } if bitrate == 0 => {
                return invalid("bitrate must be positive for cbr/vbr".into());
            }
            RateControl::Vbr {
                bitrate,
                max_bitrate,
            } if max_bitrate != 0 && max_bitrate < bitrate => {
                return invalid(format!(
                    "max_bitrate {max_bitrate} is below bitrate {bitrate}"
                ));
            }
            _ => {}
        }

        let h264_only = matches!(
            self.profile,
            Profile::Baseline | Profile::High | Profile::High444
        );
        if h264_only && self.codec != CodecId::H264 {
            return invalid(format!(
                "profile {:?} is only valid for h264, not {:?}",
                self.profile, self.codec
            ));
        }
        if self.profile == Profile::Baseline && self.b_frames > 0 {
            return invalid("baseline profile does not allow b_frames".into());
        }
        if self.codec == CodecId::Raw && self.profile != Profile::Auto {
            return invalid("raw codec takes no profile".into());
        }
        if matches!(self.codec, CodecId::Vp8) {
            return Err(EngineError::Unsupported("vp8 encoding".into()));
        }
        Ok(())
    }

    /// Smallest upstream decode pool that keeps this encoder fed.
    ///
    /// A hardware encoder holds up to `b_frames + 1` input surfaces while it
    /// reorders, and the decoder needs one more slot to make progress.
    pub fn min_decode_pool(&self) -> usize {
        self.b_frames as usize + 2
    }

    /// Check that frames of `format` can be fed to this encoder.
    pub fn validate_input(&self, format: PixelFormat) -> Result<()> {
        let ok = match format {
            PixelFormat::Nv12 => true,
            PixelFormat::Yuv420 => self.codec != CodecId::Raw,
            PixelFormat::Yuv444 => match self.codec {
                CodecId::H264 => self.profile == Profile::High444,
                CodecId::Hevc | CodecId::Av1 => true,
                _ => false,
            },
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::Unsupported(format!(
                "{format} input for {:?} encoding with profile {:?}",
                self.codec, self.profile
            )))
        }
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| EngineError::InvalidParameter(format!("`{key}` expects an integer, got `{value}`")))
}

/// `8000000`, `8000k`, `8M`.
fn parse_bitrate(value: &str) -> Result<u32> {
    let (digits, scale) = match value.chars().last() {
        Some('k' | 'K') => (&value[..value.len() - 1], 1_000u64),
        Some('m' | 'M') => (&value[..value.len() - 1], 1_000_000u64),
        _ => (value, 1u64),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(scale))
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| EngineError::InvalidParameter(format!("invalid bitrate `{value}`")))
}

fn parse_preset(value: &str) -> Result<Preset> {
    Ok(match value.to_ascii_lowercase().as_str() {
        "p1" => Preset::P1,
        "p2" => Preset::P2,
        "p3" => Preset::P3,
        "p4" => Preset::P4,
        "p5" => Preset::P5,
        "p6" => Preset::P6,
        "p7" => Preset::P7,
        other => {
            return Err(EngineError::InvalidParameter(format!(
                "unknown preset `{other}` (expected p1..p7)"
            )));
        }
    })
}

fn parse_profile(value: &str) -> Result<Profile> {
    Ok(match value.to_ascii_lowercase().as_str() {
        "auto" => Profile::Auto,
        "baseline" => Profile::Baseline,
        "main" => Profile::Main,
        "high" => Profile::High,
        "high444" => Profile::High444,
        other => {
            return Err(EngineError::InvalidParameter(format!(
                "unknown profile `{other}`"
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EncoderOptions::default()
            .validate()
            .expect("defaults must be valid");
    }

    #[test]
    fn pairs_parse_bitrate_suffixes_and_rate_control() {
        let opts = EncoderOptions::from_pairs([
            ("codec", "hevc"),
            ("preset", "P5"),
            ("rc", "vbr"),
            ("bitrate", "8M"),
            ("maxbitrate", "12000k"),
            ("gop", "60"),
            ("bf", "2"),
            ("fps", "30000/1001"),
        ])
        .expect("valid pairs");
        assert_eq!(opts.codec, CodecId::Hevc);
        assert_eq!(opts.preset, Preset::P5);
        assert_eq!(
            opts.rate_control,
            RateControl::Vbr {
                bitrate: 8_000_000,
                max_bitrate: 12_000_000
            }
        );
        assert_eq!(opts.framerate, Rational::new(30000, 1001));
        opts.validate().expect("consistent options");
    }

    #[test]
    fn qp_alone_selects_constqp() {
        let opts = EncoderOptions::from_pairs([("qp", "30")]).expect("valid");
        assert_eq!(opts.rate_control, RateControl::ConstQp { qp: 30 });
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = EncoderOptions::from_pairs([("tuning", "ll")]).expect_err("unknown key");
        assert!(err.to_string().contains("unknown encoder option `tuning`"));
    }

    #[test]
    fn decode_pool_floor_grows_with_lookahead() {
        assert_eq!(EncoderOptions::default().min_decode_pool(), 2);
        let opts = EncoderOptions {
            b_frames: 3,
            ..Default::default()
        };
        assert_eq!(opts.min_decode_pool(), 5);
    }

    #[test]
    fn inconsistent_combinations_fail_validation() {
        let cases = [
            (
                EncoderOptions {
                    gop_length: 0,
                    ..Default::default()
                },
                "gop_length must be at least 1",
            ),
            (
                EncoderOptions {
                    gop_length: 2,
                    b_frames: 2,
                    ..Default::default()
                },
                "must be smaller than gop_length",
            ),
            (
                EncoderOptions {
                    rate_control: RateControl::Cbr { bitrate: 0 },
                    ..Default::default()
                },
                "bitrate must be positive",
            ),
            (
                EncoderOptions {
                    rate_control: RateControl::Vbr {
                        bitrate: 5_000_000,
                        max_bitrate: 1_000_000,
                    },
                    ..Default::default()
                },
                "below bitrate",
            ),
            (
                EncoderOptions {
                    rate_control: RateControl::ConstQp { qp: 60 },
                    ..Default::default()
                },
                "qp 60 exceeds",
            ),
            (
                EncoderOptions {
                    codec: CodecId::Hevc,
                    profile: Profile::High,
                    ..Default::default()
                },
                "only valid for h264",
            ),
            (
                EncoderOptions {
                    profile: Profile::Baseline,
                    b_frames: 1,
                    ..Default::default()
                },
                "baseline profile does not allow b_frames",
            ),
            (
                EncoderOptions {
                    framerate: Rational::new(0, 1),
                    ..Default::default()
                },
                "framerate",
            ),
        ];
        for (opts, needle) in cases {
            let err = opts.validate().expect_err("must be rejected");
            assert!(
                err.to_string().contains(needle),
                "expected `{needle}` in `{err}`"
            );
        }
    }

    #[test]
    fn yuv444_input_requires_high444_for_h264() {
        let opts = EncoderOptions::default();
        assert!(opts.validate_input(PixelFormat::Nv12).is_ok());
        assert!(opts.validate_input(PixelFormat::Yuv444).is_err());
        assert!(opts.validate_input(PixelFormat::Rgb).is_err());
        let opts = EncoderOptions {
            profile: Profile::High444,
            ..Default::default()
        };
        assert!(opts.validate_input(PixelFormat::Yuv444).is_ok());
    }

    #[test]
    fn options_round_trip_through_json() {
        let json = r#"{"codec":"raw","rate_control":{"mode":"const_qp","qp":20},"b_frames":2}"#;
        let opts: EncoderOptions = serde_json::from_str(json).expect("parse");
        assert_eq!(opts.codec, CodecId::Raw);
        assert_eq!(opts.b_frames, 2);
        assert_eq!(opts.gop_length, 60);
        opts.validate().expect("valid");
    }
}
