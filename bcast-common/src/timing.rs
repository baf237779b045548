//! Tick-based global timebase and rational rescaling
//!
//! Every timestamp inside the producer pipeline is expressed in **ticks** of a
//! single fixed timebase of 28,224,000 Hz, independent of the timebases used by
//! containers, codecs and filter sinks.
//!
//! # Architecture
//!
//! bcast uses three time representations:
//!
//! 1. **Ticks (Internal)**: i64 values at 28,224,000 Hz, used for all pts and
//!    duration arithmetic between pipeline stages
//! 2. **Native timebases (Streams)**: each stream, decoder and filter sink
//!    carries its own [`Rational`] unit; values are converted with
//!    [`rescale_q`] at stage boundaries
//! 3. **Channel units (API)**: frames (or fields on interlaced formats) of the
//!    output channel, see [`crate::format::VideoFormatDesc::time_base`]
//!
//! ## Tick Rate Selection
//!
//! 28,224,000 Hz divides evenly into every common audio sample rate
//! (8 kHz to 192 kHz) and every integer broadcast frame/field rate
//! (24, 25, 30, 50, 60), so sample and frame boundaries land on exact ticks.
//! NTSC rates (x/1001) round to the nearest tick.
//!
//! # Conversion Flow
//!
//! ```text
//! Caller (channel frames)
//!     ↓  rescale_q(v, format_tb, TICK_BASE)
//! TransportState (ticks)
//!     ↓  rescale_q(v, TICK_BASE, stream_tb)
//! Demuxer seek / filter start offsets (native units)
//!     ↓  rescale_q(pts, sink_tb, TICK_BASE)
//! Buffered Frame (ticks)
//! ```
//!
//! # Precision and Overflow
//!
//! - i64::MAX ticks = ~10.36 years of media
//! - [`rescale_q`] computes in i128 and rounds to nearest, ties away from zero
//! - Millisecond conversions use truncating division
//!
//! # Examples
//!
//! ```rust
//! use bcast_common::timing::*;
//!
//! // One PAL frame (1/25 s) in ticks
//! let frame = rescale_q(1, Rational::new(1, 25), TICK_BASE);
//! assert_eq!(frame, 1_128_960);
//!
//! // 1024 samples at 48 kHz
//! assert_eq!(samples_to_ticks(1024, 48000), 602_112);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Tick rate: 28,224,000 Hz
///
/// LCM of the common audio sample rates; also an integer multiple of every
/// integer broadcast frame rate.
pub const TICK_RATE: i64 = 28_224_000;

/// Ticks per millisecond: 28,224
pub const TICKS_PER_MS: i64 = 28_224;

/// The global timebase as a rational unit (1 / TICK_RATE seconds)
pub const TICK_BASE: Rational = Rational {
    num: 1,
    den: TICK_RATE,
};

/// Lookup table for ticks per sample at common sample rates
///
/// | Rate (Hz) | Ticks/Sample |
/// |-----------|--------------|
/// | 8,000     | 3,528        |
/// | 16,000    | 1,764        |
/// | 32,000    | 882          |
/// | 44,100    | 640          |
/// | 48,000    | 588          |
/// | 96,000    | 294          |
/// | 192,000   | 147          |
pub const TICKS_PER_SAMPLE_TABLE: [(u32, i64); 7] = [
    (8000, 3528),
    (16000, 1764),
    (32000, 882),
    (44100, 640),
    (48000, 588),
    (96000, 294),
    (192000, 147),
];

// ============================================================================
// Rational
// ============================================================================

/// Exact rational number used for timebases, frame rates and aspect ratios
///
/// A timebase `num/den` means one unit equals `num/den` seconds. A frame rate
/// `num/den` means `num/den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Reciprocal (`den/num`)
    ///
    /// Used to turn a frame rate into the duration of one frame.
    pub const fn inv(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// True when both terms are strictly positive
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Floating point value, for display and logging only
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Reduce to lowest terms with a positive denominator
    pub fn reduced(self) -> Self {
        fn gcd(mut a: i64, mut b: i64) -> i64 {
            while b != 0 {
                let t = a % b;
                a = b;
                b = t;
            }
            a.abs()
        }

        let g = gcd(self.num, self.den);
        if g == 0 {
            return self;
        }
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Core Conversion Functions
// ============================================================================

/// Rescale `value` from timebase `from` to timebase `to`
///
/// Computes `value × from / to` exactly in 128-bit arithmetic and rounds to
/// the nearest integer, halfway cases away from zero. Results that do not fit
/// an i64 saturate.
///
/// # Panics
///
/// Panics if either timebase has a zero term.
///
/// # Examples
///
/// ```rust
/// use bcast_common::timing::{rescale_q, Rational, TICK_BASE};
///
/// // 90 kHz MPEG-TS clock: one second
/// assert_eq!(rescale_q(90_000, Rational::new(1, 90_000), TICK_BASE), 28_224_000);
///
/// // Back to 25 fps frames
/// assert_eq!(rescale_q(28_224_000, TICK_BASE, Rational::new(1, 25)), 25);
///
/// // Rounds to nearest: 1.5 frames -> 2
/// assert_eq!(rescale_q(1_693_440, TICK_BASE, Rational::new(1, 25)), 2);
/// ```
pub fn rescale_q(value: i64, from: Rational, to: Rational) -> i64 {
    assert!(
        from.num != 0 && from.den != 0 && to.num != 0 && to.den != 0,
        "timebase terms must be non-zero"
    );

    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };

    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        -((-num + half) / den)
    };

    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// [`rescale_q`] for optional timestamps (`None` = no timestamp)
pub fn rescale_opt(value: Option<i64>, from: Rational, to: Rational) -> Option<i64> {
    value.map(|v| rescale_q(v, from, to))
}

/// Convert milliseconds to ticks
///
/// ```rust
/// use bcast_common::timing::ms_to_ticks;
///
/// assert_eq!(ms_to_ticks(1), 28_224);
/// assert_eq!(ms_to_ticks(-1000), -28_224_000);
/// ```
pub fn ms_to_ticks(milliseconds: i64) -> i64 {
    milliseconds * TICKS_PER_MS
}

/// Convert ticks to milliseconds (truncating division)
pub fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / TICKS_PER_MS
}

/// Convert samples to ticks at a given sample rate
///
/// Exact for every rate that divides TICK_RATE; other rates fall back to
/// [`rescale_q`].
///
/// # Panics
///
/// Panics if `sample_rate` is 0
///
/// ```rust
/// use bcast_common::timing::samples_to_ticks;
///
/// assert_eq!(samples_to_ticks(1, 44100), 640);
/// assert_eq!(samples_to_ticks(48000, 48000), 28_224_000);
/// ```
pub fn samples_to_ticks(samples: i64, sample_rate: u32) -> i64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");

    if TICK_RATE % sample_rate as i64 == 0 {
        return samples * ticks_per_sample(sample_rate);
    }
    rescale_q(samples, Rational::new(1, sample_rate as i64), TICK_BASE)
}

/// Convert ticks to samples at a given sample rate (rounded to nearest)
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn ticks_to_samples(ticks: i64, sample_rate: u32) -> i64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");
    rescale_q(ticks, TICK_BASE, Rational::new(1, sample_rate as i64))
}

/// Convert ticks to seconds (f64), for display and filter arguments
///
/// ```rust
/// use bcast_common::timing::ticks_to_seconds;
///
/// assert_eq!(ticks_to_seconds(28_224_000), 1.0);
/// ```
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICK_RATE as f64
}

/// Convert seconds to ticks (rounded to nearest tick)
pub fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * TICK_RATE as f64).round() as i64
}

/// Get ticks per sample for a given sample rate
///
/// Checks the lookup table first, then falls back to division.
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn ticks_per_sample(sample_rate: u32) -> i64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");

    if let Some(&(_, ticks)) = TICKS_PER_SAMPLE_TABLE
        .iter()
        .find(|(rate, _)| *rate == sample_rate)
    {
        return ticks;
    }

    TICK_RATE / sample_rate as i64
}

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
