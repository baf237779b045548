//! Per-media-type filter graph
//!
//! A [`FilterGraph`] wraps one compiled graph for either video or audio. On
//! construction it extends the user's filter description with the defaults
//! the channel needs (deinterlace and frame rate lock for video, resampling
//! and fixed-size chunking for audio), binds every declared input to a
//! demuxed stream and opens the decoders those streams need.
//!
//! # Stream selection
//!
//! Candidate streams are those with no disposition or exactly the default
//! disposition; audio streams without channels are skipped.
//!
//! - One declared audio input but several candidate audio streams: the
//!   description is prefixed with `amerge=inputs=<n>,`.
//! - One declared video input: candidates are ordered tallest first and, when
//!   the two tallest video streams have the same height, the description is
//!   prefixed with `alphamerge,` (fill + key pair).
//!
//! Each input then takes the first unused candidate of its media type. If an
//! input cannot be bound, the graph is left empty and reports end of stream
//! on its first pull.

use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::media::{
    CodecFactory, CompiledGraph, DecodedFrame, Disposition, FilterBackend, MediaType, PixelFormat,
    PullStatus, SinkSpec, SourceParams, SourceSpec, StreamInfo,
};
use bcast_common::config::Deinterlace;
use bcast_common::format::VideoFormatDesc;
use bcast_common::params::PARAMS;
use bcast_common::timing::{rescale_q, ticks_to_seconds, Rational, TICK_BASE};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything a graph needs from its producer while being built
pub struct BuildContext<'a> {
    pub streams: &'a [StreamInfo],
    pub format: &'a VideoFormatDesc,
    pub backend: &'a dyn FilterBackend,
    pub codecs: &'a dyn CodecFactory,
    /// Open decoders by stream index; missing ones are opened on demand
    pub decoders: &'a mut BTreeMap<usize, Decoder>,
}

/// Append the channel defaults to a user filter description
///
/// `start` is in ticks and anchors the output timestamps of both graphs.
pub fn derive_spec(
    user_spec: &str,
    media_type: MediaType,
    start: i64,
    streams: &[StreamInfo],
    format: &VideoFormatDesc,
    deinterlace: Deinterlace,
) -> String {
    let user_spec = user_spec.trim();
    match media_type {
        MediaType::Video => {
            let mut spec = if user_spec.is_empty() { "null".to_string() } else { user_spec.to_string() };
            if deinterlace != Deinterlace::None {
                spec.push_str(&format!(",bwdif=mode=send_field:parity=auto:deint={}", deinterlace));
            }
            spec.push_str(&format!(
                ",fps=fps={}/{}:start_time={:.6}",
                format.framerate.num * format.field_count as i64,
                format.framerate.den,
                ticks_to_seconds(start)
            ));
            spec
        }
        _ => {
            let mut spec = if user_spec.is_empty() { "anull".to_string() } else { user_spec.to_string() };
            let sample_rate = streams
                .iter()
                .filter_map(StreamInfo::audio)
                .find(|a| a.channels > 0)
                .map(|a| a.sample_rate)
                .filter(|sr| *sr > 0)
                .unwrap_or(format.audio_sample_rate);
            let first_pts = rescale_q(start, TICK_BASE, Rational::new(1, sample_rate as i64));
            spec.push_str(&format!(
                ",aresample=async=1000:first_pts={}:min_comp=0.01:osr={},asetnsamples=n=1024:p=0",
                first_pts, format.audio_sample_rate
            ));
            spec
        }
    }
}

/// Streams eligible for binding, in binding order
fn candidates(streams: &[StreamInfo]) -> Vec<&StreamInfo> {
    streams
        .iter()
        .filter(|s| !s.audio().is_some_and(|a| a.channels == 0))
        .filter(|s| s.disposition == Disposition::NONE || s.disposition == Disposition::DEFAULT)
        .collect()
}

fn source_params(stream: &StreamInfo, decoder: &Decoder) -> Result<SourceParams> {
    if let Some(video) = stream.video() {
        return Ok(SourceParams::Video {
            width: video.width,
            height: video.height,
            pixel_format: video.pixel_format,
            time_base: decoder.time_base(),
            sample_aspect_ratio: video.sample_aspect_ratio,
            frame_rate: decoder.framerate(),
        });
    }
    if let Some(audio) = stream.audio() {
        return Ok(SourceParams::Audio {
            time_base: decoder.time_base(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        });
    }
    Err(Error::Filter(format!(
        "Stream {} ({}) cannot feed a filter graph",
        stream.index,
        stream.media_type()
    )))
}

/// Filter graph for one media type
pub struct FilterGraph {
    media_type: MediaType,
    spec: String,
    graph: Option<Box<dyn CompiledGraph>>,
    /// Stream index feeding each input pad
    sources: Vec<usize>,
    frame: Option<DecodedFrame>,
    eof: bool,
}

impl FilterGraph {
    /// Graph without inputs; at end of stream from the first pull
    pub fn empty(media_type: MediaType) -> Self {
        Self {
            media_type,
            spec: String::new(),
            graph: None,
            sources: Vec::new(),
            frame: None,
            eof: false,
        }
    }

    /// Build the graph for `media_type` starting at `start` (ticks)
    pub fn new(user_spec: &str, media_type: MediaType, start: i64, ctx: &mut BuildContext<'_>) -> Result<Self> {
        if !matches!(media_type, MediaType::Video | MediaType::Audio) {
            return Err(Error::Filter(format!("Unsupported graph media type: {}", media_type)));
        }

        let mut spec = derive_spec(
            user_spec,
            media_type,
            start,
            ctx.streams,
            ctx.format,
            PARAMS.auto_deinterlace(),
        );

        let parsed = ctx.backend.parse(&spec)?;
        if let Some(other) = parsed
            .inputs
            .iter()
            .find(|t| !matches!(t, MediaType::Video | MediaType::Audio))
        {
            return Err(Error::Filter(format!("Unsupported filter input type: {}", other)));
        }

        let mut candidates = candidates(ctx.streams);

        if parsed.count_inputs(MediaType::Audio) == 1 {
            let count = candidates.iter().filter(|s| s.media_type() == MediaType::Audio).count();
            if count > 1 {
                spec = format!("amerge=inputs={},{}", count, spec);
            }
        }

        if parsed.count_inputs(MediaType::Video) == 1 {
            candidates.sort_by_key(|s| std::cmp::Reverse(s.video().map(|v| v.height).unwrap_or(0)));
            let heights: Vec<u32> = candidates.iter().filter_map(|s| s.video()).map(|v| v.height).take(2).collect();
            if let [first, second] = heights[..] {
                if first == second {
                    spec = format!("alphamerge,{}", spec);
                }
            }
        }

        let parsed = ctx.backend.parse(&spec)?;

        let mut used = vec![false; candidates.len()];
        let mut bound = Vec::with_capacity(parsed.inputs.len());
        for input_type in &parsed.inputs {
            let slot = candidates
                .iter()
                .enumerate()
                .find(|(i, s)| !used[*i] && s.media_type() == *input_type)
                .map(|(i, _)| i);
            match slot {
                Some(i) => {
                    used[i] = true;
                    bound.push(candidates[i]);
                }
                None => {
                    debug!("No {} stream for filter '{}'; graph left empty", input_type, spec);
                    return Ok(Self::empty(media_type));
                }
            }
        }

        match parsed.outputs[..] {
            [output] if output == media_type => {}
            _ => {
                return Err(Error::Filter(format!(
                    "Filter '{}' must have exactly one {} output",
                    spec, media_type
                )))
            }
        }

        let mut sources = Vec::with_capacity(bound.len());
        for (pad, stream) in bound.iter().enumerate() {
            if !ctx.decoders.contains_key(&stream.index) {
                let decoder = Decoder::new(stream, ctx.codecs)?;
                ctx.decoders.insert(stream.index, decoder);
            }
            let decoder = ctx
                .decoders
                .get(&stream.index)
                .ok_or_else(|| Error::InvalidState(format!("Decoder {} missing", stream.index)))?;
            sources.push(SourceSpec {
                pad,
                stream_index: stream.index,
                name: format!("in_{}", stream.index),
                params: source_params(stream, decoder)?,
            });
        }

        let sink = match media_type {
            MediaType::Video => SinkSpec::Video {
                pixel_formats: PixelFormat::SINK_FORMATS.to_vec(),
            },
            _ => SinkSpec::Audio {
                sample_rate: ctx.format.audio_sample_rate,
            },
        };

        let graph = ctx.backend.build(&spec, &sources, &sink)?;
        debug!("Filter graph ({}):\n{}", media_type, graph.dump());

        Ok(Self {
            media_type,
            spec,
            graph: Some(graph),
            sources: sources.iter().map(|s| s.stream_index).collect(),
            frame: None,
            eof: false,
        })
    }

    /// Try to produce one frame without blocking
    ///
    /// `nb_samples` asks an audio graph for exactly that many samples per
    /// channel. Returns `true` when a frame became available or end of stream
    /// was just reached, `false` when a frame is already held, the graph
    /// already ended, or it needs more input.
    pub fn pull(&mut self, nb_samples: Option<usize>) -> Result<bool> {
        if self.frame.is_some() || self.eof {
            return Ok(false);
        }

        let Some(graph) = self.graph.as_mut() else {
            self.eof = true;
            return Ok(true);
        };

        match graph.pull(nb_samples)? {
            PullStatus::Again => Ok(false),
            PullStatus::Eof => {
                self.eof = true;
                Ok(true)
            }
            PullStatus::Frame(frame) => {
                self.frame = Some(frame);
                Ok(true)
            }
        }
    }

    pub fn take_frame(&mut self) -> Option<DecodedFrame> {
        self.frame.take()
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Final filter description, including derived defaults and prefixes
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Stream indices bound to the graph inputs
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Feed a decoded frame; a terminal frame closes the stream's source
    pub fn write(&mut self, stream_index: usize, frame: DecodedFrame) -> Result<()> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(());
        };
        if frame.is_terminal() {
            return graph.close(stream_index, frame.pts);
        }
        graph.write(stream_index, frame)
    }

    pub fn failed_requests(&self, stream_index: usize) -> u32 {
        self.graph
            .as_ref()
            .map(|g| g.failed_requests(stream_index))
            .unwrap_or(0)
    }

    pub fn time_base(&self) -> Option<Rational> {
        self.graph.as_ref().map(|g| g.time_base())
    }

    pub fn frame_rate(&self) -> Option<Rational> {
        self.graph.as_ref().map(|g| g.frame_rate())
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.graph.as_ref().map(|g| g.sample_rate())
    }
}
