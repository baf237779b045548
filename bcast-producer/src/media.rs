//! Media data model and collaborator traits
//!
//! The producer never touches containers, codecs or filter primitives
//! directly. It drives them through the traits in this module:
//!
//! ```text
//! Demuxer ──Packet──▶ Codec (per stream) ──DecodedFrame──▶ CompiledGraph ──▶ FrameFactory
//! ```
//!
//! Timestamps on [`Packet`] and [`DecodedFrame`] are in the owning stream's
//! native timebase ([`StreamInfo::time_base`]); frames pulled from a graph
//! are in the graph sink's timebase. Demuxer-level times (`start_time`,
//! `duration`, `seek`) are in ticks of the global timebase.

use crate::error::Result;
use bcast_common::timing::Rational;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Streams
// ============================================================================

/// Elementary stream media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
        };
        f.write_str(name)
    }
}

/// Container-level stream disposition flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Disposition(pub u32);

impl Disposition {
    pub const NONE: Disposition = Disposition(0);
    pub const DEFAULT: Disposition = Disposition(0x0001);
    pub const DUB: Disposition = Disposition(0x0002);
    pub const ORIGINAL: Disposition = Disposition(0x0004);
    pub const COMMENT: Disposition = Disposition(0x0008);
    pub const HEARING_IMPAIRED: Disposition = Disposition(0x0080);
    pub const VISUAL_IMPAIRED: Disposition = Disposition(0x0100);
    pub const ATTACHED_PIC: Disposition = Disposition(0x0400);

    pub fn contains(&self, other: Disposition) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Disposition {
    type Output = Disposition;

    fn bitor(self, rhs: Self) -> Self::Output {
        Disposition(self.0 | rhs.0)
    }
}

/// Raw video pixel layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Bgra,
    Argb,
    Rgba,
    Abgr,
    Yuv444p,
    Yuv422p,
    Yuv420p,
    Yuv410p,
    Yuva444p,
    Yuva422p,
    Yuva420p,
    Uyvy422,
}

impl PixelFormat {
    /// Formats a video graph sink accepts, in order of preference
    pub const SINK_FORMATS: [PixelFormat; 14] = [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Bgra,
        PixelFormat::Argb,
        PixelFormat::Rgba,
        PixelFormat::Abgr,
        PixelFormat::Yuv444p,
        PixelFormat::Yuv422p,
        PixelFormat::Yuv420p,
        PixelFormat::Yuv410p,
        PixelFormat::Yuva444p,
        PixelFormat::Yuva422p,
        PixelFormat::Yuva420p,
        PixelFormat::Uyvy422,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Argb => "argb",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Abgr => "abgr",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuv410p => "yuv410p",
            PixelFormat::Yuva444p => "yuva444p",
            PixelFormat::Yuva422p => "yuva422p",
            PixelFormat::Yuva420p => "yuva420p",
            PixelFormat::Uyvy422 => "uyvy422",
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(
            self,
            PixelFormat::Bgra
                | PixelFormat::Argb
                | PixelFormat::Rgba
                | PixelFormat::Abgr
                | PixelFormat::Yuva444p
                | PixelFormat::Yuva422p
                | PixelFormat::Yuva420p
        )
    }

    /// Bytes needed for one `width` x `height` picture
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        let luma = w * h;
        let chroma = |sx: usize, sy: usize| w.div_ceil(sx) * h.div_ceil(sy);
        match self {
            PixelFormat::Gray8 => luma,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => luma * 3,
            PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Rgba | PixelFormat::Abgr => {
                luma * 4
            }
            PixelFormat::Uyvy422 => luma * 2,
            PixelFormat::Yuv444p => luma * 3,
            PixelFormat::Yuv422p => luma + 2 * chroma(2, 1),
            PixelFormat::Yuv420p => luma + 2 * chroma(2, 2),
            PixelFormat::Yuv410p => luma + 2 * chroma(4, 4),
            PixelFormat::Yuva444p => luma * 4,
            PixelFormat::Yuva422p => 2 * luma + 2 * chroma(2, 1),
            PixelFormat::Yuva420p => 2 * luma + 2 * chroma(2, 2),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Video stream parameters as declared by the container
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Sample aspect ratio, `0/1` when unknown
    pub sample_aspect_ratio: Rational,
    /// Guessed frame rate, `None` when the container has no idea
    pub frame_rate: Option<Rational>,
}

/// Audio stream parameters as declared by the container
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub sample_rate: u32,
    /// Zero for streams the container could not describe
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecParams {
    Video(VideoParams),
    Audio(AudioParams),
    Other(MediaType),
}

/// One elementary stream of a demuxed input
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Position of the stream in the container
    pub index: usize,
    /// Unit of every timestamp carried by this stream's packets and frames
    pub time_base: Rational,
    pub start_time: Option<i64>,
    pub duration: Option<i64>,
    pub disposition: Disposition,
    pub params: CodecParams,
}

impl StreamInfo {
    pub fn media_type(&self) -> MediaType {
        match &self.params {
            CodecParams::Video(_) => MediaType::Video,
            CodecParams::Audio(_) => MediaType::Audio,
            CodecParams::Other(media_type) => *media_type,
        }
    }

    pub fn video(&self) -> Option<&VideoParams> {
        match &self.params {
            CodecParams::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioParams> {
        match &self.params {
            CodecParams::Audio(a) => Some(a),
            _ => None,
        }
    }

    /// Guessed frame rate, `0/1` for streams without one
    pub fn guessed_frame_rate(&self) -> Rational {
        self.video()
            .and_then(|v| v.frame_rate)
            .unwrap_or(Rational::new(0, 1))
    }
}

// ============================================================================
// Packets and frames
// ============================================================================

/// Compressed unit read from the demuxer
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<i64>,
    pub data: Vec<u8>,
}

/// Raw picture
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPlane {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// All planes, back to back, tightly packed
    pub data: Arc<[u8]>,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub sample_aspect_ratio: Rational,
}

/// Interleaved signed 32-bit PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Vec<i32>,
}

impl AudioSamples {
    /// Samples per channel
    pub fn nb_samples(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / self.channels as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Video(VideoPlane),
    Audio(AudioSamples),
}

/// Decoded or filtered unit
///
/// A frame without payload is the terminal frame: it marks end of stream and
/// its `pts` (when known) is where the stream ends.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub pts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub duration: Option<i64>,
    pub payload: Option<Payload>,
}

impl DecodedFrame {
    pub fn video(pts: Option<i64>, plane: VideoPlane) -> Self {
        Self {
            pts,
            best_effort_timestamp: pts,
            duration: None,
            payload: Some(Payload::Video(plane)),
        }
    }

    pub fn audio(pts: Option<i64>, samples: AudioSamples) -> Self {
        Self {
            pts,
            best_effort_timestamp: pts,
            duration: None,
            payload: Some(Payload::Audio(samples)),
        }
    }

    /// End-of-stream marker ending at `pts`
    pub fn terminal(pts: Option<i64>) -> Self {
        Self {
            pts,
            best_effort_timestamp: None,
            duration: None,
            payload: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_none()
    }

    pub fn video_plane(&self) -> Option<&VideoPlane> {
        match &self.payload {
            Some(Payload::Video(v)) => Some(v),
            _ => None,
        }
    }

    pub fn video_plane_mut(&mut self) -> Option<&mut VideoPlane> {
        match &mut self.payload {
            Some(Payload::Video(v)) => Some(v),
            _ => None,
        }
    }

    pub fn audio_samples(&self) -> Option<&AudioSamples> {
        match &self.payload {
            Some(Payload::Audio(a)) => Some(a),
            _ => None,
        }
    }

    /// Samples per channel for audio frames, 0 otherwise
    pub fn nb_samples(&self) -> usize {
        self.audio_samples().map(|a| a.nb_samples()).unwrap_or(0)
    }
}

// ============================================================================
// Demuxer
// ============================================================================

/// Result of one demuxer read
#[derive(Debug, Clone, PartialEq)]
pub enum Demuxed {
    Packet(Packet),
    /// Input exhausted; reported once per read-through
    Eof,
}

/// Container reader
///
/// Owned and driven by a single producer worker thread.
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    /// Timestamp of the first packet, in ticks
    fn start_time(&self) -> Option<i64>;

    /// Total input duration, in ticks
    fn duration(&self) -> Option<i64>;

    /// Non-blocking read; `Ok(None)` when nothing is available yet
    fn try_pop(&mut self) -> Result<Option<Demuxed>>;

    /// Reposition to `ticks` (absolute, including the start offset)
    fn seek(&mut self, ticks: i64) -> Result<()>;

    /// Abandon any blocking I/O; subsequent reads report nothing
    fn abort(&mut self);
}

// ============================================================================
// Codec
// ============================================================================

/// Outcome of asking a codec for output
#[derive(Debug)]
pub enum DecodeStatus {
    Frame(DecodedFrame),
    /// Submit another packet before asking again
    NeedInput,
    /// Fully drained after a flush packet
    Eof,
}

/// Stateful decoder for one stream, send/receive style
pub trait Codec: Send {
    /// Submit a packet; `None` starts draining
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()>;

    fn receive_frame(&mut self) -> Result<DecodeStatus>;

    /// Drop internal state so decoding can restart
    fn flush(&mut self);

    /// Frame rate guessed from container and codec, if any
    fn framerate(&self) -> Option<Rational> {
        None
    }

    /// Codec ticks per frame (2 for field-coded H.264)
    fn ticks_per_frame(&self) -> i64 {
        1
    }

    /// Parser repeat count of the last packet, `None` without a parser
    fn repeat_pict(&self) -> Option<i32> {
        None
    }
}

/// Opens codecs for demuxed streams
pub trait CodecFactory: Send + Sync {
    /// Open a decoder for `stream`; `threads` is a hint (0 = auto)
    fn open(&self, stream: &StreamInfo, threads: usize) -> Result<Box<dyn Codec>>;
}

// ============================================================================
// Filter execution
// ============================================================================

/// Pads of a parsed filter description
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGraph {
    /// Media type of every unconnected input pad, in declaration order
    pub inputs: Vec<MediaType>,
    /// Media type of every unconnected output pad
    pub outputs: Vec<MediaType>,
}

impl ParsedGraph {
    pub fn count_inputs(&self, media_type: MediaType) -> usize {
        self.inputs.iter().filter(|t| **t == media_type).count()
    }
}

/// Parameters of a graph source fed by one decoder
#[derive(Debug, Clone, PartialEq)]
pub enum SourceParams {
    Video {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        time_base: Rational,
        sample_aspect_ratio: Rational,
        frame_rate: Option<Rational>,
    },
    Audio {
        time_base: Rational,
        sample_rate: u32,
        channels: u16,
    },
}

impl SourceParams {
    pub fn time_base(&self) -> Rational {
        match self {
            SourceParams::Video { time_base, .. } | SourceParams::Audio { time_base, .. } => {
                *time_base
            }
        }
    }
}

/// Graph source bound to input pad `pad` of the parsed description
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub pad: usize,
    pub stream_index: usize,
    /// Filter instance name, `in_<stream index>`
    pub name: String,
    pub params: SourceParams,
}

/// Terminal sink constraints
#[derive(Debug, Clone, PartialEq)]
pub enum SinkSpec {
    /// Video sink accepting any of `pixel_formats`
    Video { pixel_formats: Vec<PixelFormat> },
    /// Audio sink producing interleaved S32 at `sample_rate`
    Audio { sample_rate: u32 },
}

/// Outcome of pulling the sink of a compiled graph
#[derive(Debug)]
pub enum PullStatus {
    Frame(DecodedFrame),
    /// More input is needed
    Again,
    Eof,
}

/// A configured filter graph
pub trait CompiledGraph: Send {
    /// Feed one frame into the source bound to `stream_index`
    fn write(&mut self, stream_index: usize, frame: DecodedFrame) -> Result<()>;

    /// Close the source bound to `stream_index`; the stream ends at `pts`
    fn close(&mut self, stream_index: usize, pts: Option<i64>) -> Result<()>;

    /// Times the graph wanted input from this source and found none since
    /// the last write
    fn failed_requests(&self, stream_index: usize) -> u32;

    /// Pull one frame, or exactly `nb_samples` per channel from an audio sink
    fn pull(&mut self, nb_samples: Option<usize>) -> Result<PullStatus>;

    fn time_base(&self) -> Rational;

    fn frame_rate(&self) -> Rational;

    fn sample_rate(&self) -> u32;

    /// Human-readable description for debug logging
    fn dump(&self) -> String;
}

/// Filter description parser and graph compiler
pub trait FilterBackend: Send + Sync {
    fn parse(&self, spec: &str) -> Result<ParsedGraph>;

    /// Compile `spec`; `sources` are ordered by input pad
    fn build(
        &self,
        spec: &str,
        sources: &[SourceSpec],
        sink: &SinkSpec,
    ) -> Result<Box<dyn CompiledGraph>>;
}
