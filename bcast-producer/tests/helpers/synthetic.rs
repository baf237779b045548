//! Synthetic input for producer tests
//!
//! [`SyntheticInput`] describes a clip of constant-rate video and audio
//! streams. It produces a seekable [`Demuxer`], interleaved frame by frame
//! or in chunks of several frames per stream, and a matching
//! [`CodecFactory`] whose codecs turn every packet into exactly one frame.

use bcast_common::timing::{rescale_q, Rational, TICK_BASE};
use bcast_producer::error::{Error, Result};
use bcast_producer::frame::{DrawFrame, FrameFactory, PassthroughFactory};
use bcast_producer::media::{
    AudioParams, AudioSamples, Codec, CodecFactory, CodecParams, CompiledGraph, DecodeStatus,
    DecodedFrame, Demuxed, Demuxer, Disposition, FilterBackend, MediaType, Packet, ParsedGraph,
    PixelFormat, SinkSpec, SourceSpec, StreamInfo, VideoParams, VideoPlane,
};
use bcast_producer::backend::NativeBackend;
use bcast_producer::Backends;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const VIDEO_FPS: i64 = 25;
pub const SAMPLE_RATE: u32 = 48_000;
/// Audio samples per video frame at 25 fps / 48 kHz
pub const SAMPLES_PER_FRAME: usize = 1920;
/// Longest a stalled codec blocks
pub const STALL_LIMIT: Duration = Duration::from_secs(10);

/// Test clip description
#[derive(Debug, Clone)]
pub struct SyntheticInput {
    /// (width, height, disposition) per video stream
    pub video: Vec<(u32, u32, Disposition)>,
    /// Channel count per audio stream
    pub audio: Vec<u16>,
    /// Length in video frames
    pub frames: i64,
    pub seekable: bool,
    /// Consecutive frames each stream contributes before the next stream
    pub chunk: i64,
}

impl SyntheticInput {
    /// 25 fps video with one stereo 48 kHz audio stream
    pub fn av(seconds: i64) -> Self {
        Self {
            video: vec![(8, 8, Disposition::DEFAULT)],
            audio: vec![2],
            frames: seconds * VIDEO_FPS,
            seekable: true,
            chunk: 1,
        }
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::new();
        for (width, height, disposition) in &self.video {
            streams.push(StreamInfo {
                index: streams.len(),
                time_base: Rational::new(1, VIDEO_FPS),
                start_time: Some(0),
                duration: Some(self.frames),
                disposition: *disposition,
                params: CodecParams::Video(VideoParams {
                    width: *width,
                    height: *height,
                    pixel_format: PixelFormat::Yuv420p,
                    sample_aspect_ratio: Rational::new(1, 1),
                    frame_rate: Some(Rational::new(VIDEO_FPS, 1)),
                }),
            });
        }
        for channels in &self.audio {
            streams.push(StreamInfo {
                index: streams.len(),
                time_base: Rational::new(1, SAMPLE_RATE as i64),
                start_time: Some(0),
                duration: Some(self.frames * SAMPLES_PER_FRAME as i64),
                disposition: Disposition::NONE,
                params: CodecParams::Audio(AudioParams {
                    sample_rate: SAMPLE_RATE,
                    channels: *channels,
                }),
            });
        }
        streams
    }

    pub fn demuxer(&self) -> SyntheticDemuxer {
        SyntheticDemuxer {
            streams: self.streams(),
            frames: self.frames,
            seekable: self.seekable,
            chunk: self.chunk.max(1),
            position: 0,
            offset: 0,
            stream_cursor: 0,
            eof_reported: false,
            seeks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Software backends over this clip
    pub fn backends(&self) -> Backends {
        self.backends_with(ScriptedCodecs::default(), Arc::new(NativeBackend::new()))
    }

    pub fn backends_with(&self, codecs: ScriptedCodecs, filters: Arc<dyn FilterBackend>) -> Backends {
        Backends {
            demuxer: Box::new(self.demuxer()),
            codecs: Arc::new(codecs),
            filters,
            frames: Arc::new(PassthroughFactory),
        }
    }
}

/// Interleaved, seekable demuxer over a [`SyntheticInput`]
pub struct SyntheticDemuxer {
    streams: Vec<StreamInfo>,
    frames: i64,
    seekable: bool,
    chunk: i64,
    /// First video frame slot of the current chunk
    position: i64,
    /// Next slot within the chunk, for the current stream
    offset: i64,
    /// Stream currently emitting its part of the chunk
    stream_cursor: usize,
    eof_reported: bool,
    pub seeks: Arc<AtomicUsize>,
}

impl Demuxer for SyntheticDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn start_time(&self) -> Option<i64> {
        Some(0)
    }

    fn duration(&self) -> Option<i64> {
        Some(rescale_q(self.frames, Rational::new(1, VIDEO_FPS), TICK_BASE))
    }

    fn try_pop(&mut self) -> Result<Option<Demuxed>> {
        if self.position >= self.frames {
            if self.eof_reported {
                return Ok(None);
            }
            self.eof_reported = true;
            return Ok(Some(Demuxed::Eof));
        }

        let slot = self.position + self.offset;
        let stream = &self.streams[self.stream_cursor];
        let (pts, duration) = match stream.media_type() {
            MediaType::Audio => (slot * SAMPLES_PER_FRAME as i64, SAMPLES_PER_FRAME as i64),
            _ => (slot, 1),
        };
        let packet = Packet {
            stream_index: stream.index,
            pts: Some(pts),
            dts: Some(pts),
            duration: Some(duration),
            data: vec![(slot % 256) as u8],
        };

        let chunk_end = (self.position + self.chunk).min(self.frames);
        self.offset += 1;
        if self.position + self.offset >= chunk_end {
            self.offset = 0;
            self.stream_cursor += 1;
            if self.stream_cursor == self.streams.len() {
                self.stream_cursor = 0;
                self.position = chunk_end;
            }
        }

        Ok(Some(Demuxed::Packet(packet)))
    }

    fn seek(&mut self, ticks: i64) -> Result<()> {
        if !self.seekable {
            return Err(Error::Demux("input is not seekable".to_string()));
        }
        self.seeks.fetch_add(1, Ordering::SeqCst);
        self.position = rescale_q(ticks, TICK_BASE, Rational::new(1, VIDEO_FPS)).clamp(0, self.frames);
        self.offset = 0;
        self.stream_cursor = 0;
        self.eof_reported = false;
        Ok(())
    }

    fn abort(&mut self) {
        self.position = self.frames;
        self.eof_reported = true;
    }
}

/// Codec factory for synthetic streams
///
/// While `stall` is raised, codecs block on every packet (for at most
/// [`STALL_LIMIT`]), so nothing decodes and the decoder queues fill up.
#[derive(Clone, Default)]
pub struct ScriptedCodecs {
    pub stall: Arc<AtomicBool>,
}

impl ScriptedCodecs {
    pub fn stalled() -> Self {
        Self {
            stall: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl CodecFactory for ScriptedCodecs {
    fn open(&self, stream: &StreamInfo, _threads: usize) -> Result<Box<dyn Codec>> {
        Ok(Box::new(ScriptedCodec {
            stream: stream.clone(),
            pending: VecDeque::new(),
            draining: false,
            stall: Arc::clone(&self.stall),
        }))
    }
}

struct ScriptedCodec {
    stream: StreamInfo,
    pending: VecDeque<Packet>,
    draining: bool,
    stall: Arc<AtomicBool>,
}

impl ScriptedCodec {
    fn decode(&self, packet: Packet) -> DecodedFrame {
        let fill = packet.data.first().copied().unwrap_or(0);
        let mut frame = match &self.stream.params {
            CodecParams::Video(v) => DecodedFrame::video(
                packet.pts,
                VideoPlane {
                    width: v.width,
                    height: v.height,
                    format: v.pixel_format,
                    data: vec![fill; v.pixel_format.buffer_size(v.width, v.height)].into(),
                    interlaced: false,
                    top_field_first: false,
                    sample_aspect_ratio: v.sample_aspect_ratio,
                },
            ),
            CodecParams::Audio(a) => {
                let samples = packet.duration.unwrap_or(0) as usize;
                DecodedFrame::audio(
                    packet.pts,
                    AudioSamples {
                        sample_rate: a.sample_rate,
                        channels: a.channels,
                        data: vec![fill as i32; samples * a.channels as usize],
                    },
                )
            }
            CodecParams::Other(_) => DecodedFrame::terminal(packet.pts),
        };
        frame.duration = packet.duration;
        frame
    }
}

impl Codec for ScriptedCodec {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let deadline = Instant::now() + STALL_LIMIT;
        while self.stall.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        match packet {
            Some(packet) => self.pending.push_back(packet.clone()),
            None => self.draining = true,
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(DecodeStatus::Frame(self.decode(packet)));
        }
        if self.draining {
            return Ok(DecodeStatus::Eof);
        }
        Ok(DecodeStatus::NeedInput)
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }

    fn framerate(&self) -> Option<Rational> {
        self.stream.video().and_then(|v| v.frame_rate)
    }
}

/// Frame factory counting every frame it builds
#[derive(Default)]
pub struct CountingFactory {
    pub made: AtomicUsize,
}

impl FrameFactory for CountingFactory {
    fn make_frame(
        &self,
        tag: Uuid,
        video: Option<&VideoPlane>,
        audio: Option<&AudioSamples>,
    ) -> DrawFrame {
        self.made.fetch_add(1, Ordering::SeqCst);
        PassthroughFactory.make_frame(tag, video, audio)
    }
}

/// Backend that parses like the native one but refuses to build graphs
pub struct FailingBackend;

impl FilterBackend for FailingBackend {
    fn parse(&self, spec: &str) -> Result<ParsedGraph> {
        NativeBackend::new().parse(spec)
    }

    fn build(
        &self,
        _spec: &str,
        _sources: &[SourceSpec],
        _sink: &SinkSpec,
    ) -> Result<Box<dyn CompiledGraph>> {
        Err(Error::Filter("graph construction refused".to_string()))
    }
}
