//! Channel video formats
//!
//! A channel format fixes the output raster, the frame (or field) cadence the
//! producer must deliver at, and the audio sample cadence that keeps audio
//! aligned to those frames on fractional rates.

use crate::timing::Rational;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default channel audio sample rate (Hz)
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Which field of an interlaced frame a channel tick asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoField {
    /// Progressive formats: every tick is a whole frame
    Progressive,
    /// First field of an interlaced frame
    A,
    /// Second field of an interlaced frame
    B,
}

/// Standard broadcast channel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    Pal,
    Ntsc,
    X720p5000,
    X720p5994,
    X720p6000,
    X1080i5000,
    X1080i5994,
    X1080i6000,
    X1080p2398,
    X1080p2400,
    X1080p2500,
    X1080p2997,
    X1080p3000,
    X1080p5000,
    X1080p5994,
    X1080p6000,
    X2160p2500,
    X2160p5000,
}

struct FormatEntry {
    format: VideoFormat,
    name: &'static str,
    width: u32,
    height: u32,
    field_count: u32,
    time_scale: i64,
    duration: i64,
}

const FORMATS: [FormatEntry; 18] = [
    FormatEntry { format: VideoFormat::Pal, name: "PAL", width: 720, height: 576, field_count: 2, time_scale: 25000, duration: 1000 },
    FormatEntry { format: VideoFormat::Ntsc, name: "NTSC", width: 720, height: 486, field_count: 2, time_scale: 30000, duration: 1001 },
    FormatEntry { format: VideoFormat::X720p5000, name: "720p5000", width: 1280, height: 720, field_count: 1, time_scale: 50000, duration: 1000 },
    FormatEntry { format: VideoFormat::X720p5994, name: "720p5994", width: 1280, height: 720, field_count: 1, time_scale: 60000, duration: 1001 },
    FormatEntry { format: VideoFormat::X720p6000, name: "720p6000", width: 1280, height: 720, field_count: 1, time_scale: 60000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080i5000, name: "1080i5000", width: 1920, height: 1080, field_count: 2, time_scale: 25000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080i5994, name: "1080i5994", width: 1920, height: 1080, field_count: 2, time_scale: 30000, duration: 1001 },
    FormatEntry { format: VideoFormat::X1080i6000, name: "1080i6000", width: 1920, height: 1080, field_count: 2, time_scale: 30000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080p2398, name: "1080p2398", width: 1920, height: 1080, field_count: 1, time_scale: 24000, duration: 1001 },
    FormatEntry { format: VideoFormat::X1080p2400, name: "1080p2400", width: 1920, height: 1080, field_count: 1, time_scale: 24000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080p2500, name: "1080p2500", width: 1920, height: 1080, field_count: 1, time_scale: 25000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080p2997, name: "1080p2997", width: 1920, height: 1080, field_count: 1, time_scale: 30000, duration: 1001 },
    FormatEntry { format: VideoFormat::X1080p3000, name: "1080p3000", width: 1920, height: 1080, field_count: 1, time_scale: 30000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080p5000, name: "1080p5000", width: 1920, height: 1080, field_count: 1, time_scale: 50000, duration: 1000 },
    FormatEntry { format: VideoFormat::X1080p5994, name: "1080p5994", width: 1920, height: 1080, field_count: 1, time_scale: 60000, duration: 1001 },
    FormatEntry { format: VideoFormat::X1080p6000, name: "1080p6000", width: 1920, height: 1080, field_count: 1, time_scale: 60000, duration: 1000 },
    FormatEntry { format: VideoFormat::X2160p2500, name: "2160p2500", width: 3840, height: 2160, field_count: 1, time_scale: 25000, duration: 1000 },
    FormatEntry { format: VideoFormat::X2160p5000, name: "2160p5000", width: 3840, height: 2160, field_count: 1, time_scale: 50000, duration: 1000 },
];

impl VideoFormat {
    fn entry(&self) -> &'static FormatEntry {
        FORMATS
            .iter()
            .find(|e| e.format == *self)
            .unwrap_or(&FORMATS[0])
    }

    /// Canonical format name, e.g. `1080i5000`
    pub fn name(&self) -> &'static str {
        self.entry().name
    }

    /// All known formats in table order
    pub fn all() -> impl Iterator<Item = VideoFormat> {
        FORMATS.iter().map(|e| e.format)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VideoFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        FORMATS
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(wanted))
            .map(|e| e.format)
            .ok_or_else(|| Error::UnknownFormat(s.to_string()))
    }
}

/// Full description of a channel format
///
/// `framerate` counts whole frames; `hz` counts producer output units, which
/// are fields on interlaced formats (`field_count == 2`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormatDesc {
    pub format: VideoFormat,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub field_count: u32,
    pub time_scale: i64,
    pub duration: i64,
    /// Whole frames per second (`time_scale / duration`)
    pub framerate: Rational,
    /// Whole frames per second as f64
    pub fps: f64,
    /// Output units (frames or fields) per second as f64
    pub hz: f64,
    pub audio_sample_rate: u32,
    /// Samples per output unit, repeating
    pub audio_cadence: Vec<usize>,
}

impl VideoFormatDesc {
    /// Describe `format` at the default 48 kHz channel audio rate
    pub fn new(format: VideoFormat) -> Self {
        Self::with_sample_rate(format, DEFAULT_AUDIO_SAMPLE_RATE)
    }

    /// Describe `format` at an explicit channel audio rate
    pub fn with_sample_rate(format: VideoFormat, audio_sample_rate: u32) -> Self {
        let e = format.entry();
        let framerate = Rational::new(e.time_scale, e.duration).reduced();
        let fps = framerate.as_f64();
        let output_rate = Rational::new(e.time_scale * e.field_count as i64, e.duration);

        Self {
            format,
            name: e.name.to_string(),
            width: e.width,
            height: e.height,
            field_count: e.field_count,
            time_scale: e.time_scale,
            duration: e.duration,
            framerate,
            fps,
            hz: fps * e.field_count as f64,
            audio_sample_rate,
            audio_cadence: audio_cadence(audio_sample_rate, output_rate),
        }
    }

    /// Timebase of one caller-facing channel unit (one frame, or one field on
    /// interlaced formats)
    pub fn time_base(&self) -> Rational {
        Rational::new(self.duration, self.time_scale * self.field_count as i64)
    }

    /// Output units per second as a rational
    pub fn output_rate(&self) -> Rational {
        self.time_base().inv()
    }

    /// True for two-field formats
    pub fn is_interlaced(&self) -> bool {
        self.field_count == 2
    }
}

/// Build the repeating samples-per-unit pattern for `sample_rate` at
/// `output_rate` units per second.
///
/// The cumulative sum after `k` units equals `round(k × sample_rate / rate)`,
/// so over one full cycle no sample is gained or lost.
///
/// ```rust
/// use bcast_common::format::audio_cadence;
/// use bcast_common::timing::Rational;
///
/// assert_eq!(audio_cadence(48000, Rational::new(25, 1)), vec![1920]);
/// assert_eq!(
///     audio_cadence(48000, Rational::new(30000, 1001)),
///     vec![1602, 1601, 1602, 1601, 1602]
/// );
/// ```
pub fn audio_cadence(sample_rate: u32, output_rate: Rational) -> Vec<usize> {
    let rate = output_rate.reduced();
    if !rate.is_valid() || sample_rate == 0 {
        return vec![0];
    }

    // samples per unit = sample_rate * den / num
    let total = sample_rate as i64 * rate.den;
    let reduced = Rational::new(total, rate.num).reduced();
    let cycle = reduced.den.max(1);

    let round_div = |n: i64, d: i64| (n + d / 2) / d;

    (0..cycle)
        .map(|k| {
            let hi = round_div((k + 1) * total, rate.num);
            let lo = round_div(k * total, rate.num);
            (hi - lo) as usize
        })
        .collect()
}
