//! Native filter backend
//!
//! Compiles comma-separated filter chains into in-process graphs without any
//! external library. A chain is linear: frames written to a source run
//! through every filter in order and collect in the sink until pulled.
//!
//! ```text
//! in_0 ─┐
//!       ├─▶ [merge] ─▶ filter ─▶ filter ─▶ … ─▶ sink
//! in_1 ─┘
//! ```
//!
//! Only the first filter may take several inputs (`amerge`, `alphamerge`).
//! Labels (`[in]`) and multiple chains (`;`) are rejected.
//!
//! | Filter         | Media | Notes                                             |
//! |----------------|-------|---------------------------------------------------|
//! | `null`         | video | identity                                          |
//! | `anull`        | audio | identity                                          |
//! | `bwdif`        | video | field-rate doubling, no spatial interpolation     |
//! | `fps`          | video | constant rate by dropping/duplicating frames      |
//! | `alphamerge`   | video | second input's luma becomes the alpha plane       |
//! | `aresample`    | audio | rubato resampling, hard timestamp compensation    |
//! | `asetnsamples` | audio | fixed-size audio frames                           |
//! | `amerge`       | audio | channel-wise merge of N inputs                    |

mod audio;
mod video;

use crate::error::{Error, Result};
use crate::media::{
    CompiledGraph, DecodedFrame, FilterBackend, MediaType, ParsedGraph, PixelFormat, PullStatus,
    SinkSpec, SourceParams, SourceSpec,
};
use bcast_common::timing::{rescale_q, Rational};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::str::FromStr;

// ============================================================================
// Links
// ============================================================================

/// Properties of the connection between two filters
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Link {
    pub media_type: MediaType,
    pub time_base: Rational,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Option<PixelFormat>,
    pub sample_aspect_ratio: Rational,
    /// `0/1` when unknown
    pub frame_rate: Rational,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Link {
    fn from_source(params: &SourceParams) -> Self {
        match params {
            SourceParams::Video {
                width,
                height,
                pixel_format,
                time_base,
                sample_aspect_ratio,
                frame_rate,
            } => Link {
                media_type: MediaType::Video,
                time_base: *time_base,
                width: *width,
                height: *height,
                pixel_format: Some(*pixel_format),
                sample_aspect_ratio: *sample_aspect_ratio,
                frame_rate: frame_rate.unwrap_or(Rational::new(0, 1)),
                sample_rate: 0,
                channels: 0,
            },
            SourceParams::Audio {
                time_base,
                sample_rate,
                channels,
            } => Link {
                media_type: MediaType::Audio,
                time_base: *time_base,
                width: 0,
                height: 0,
                pixel_format: None,
                sample_aspect_ratio: Rational::new(0, 1),
                frame_rate: Rational::new(0, 1),
                sample_rate: *sample_rate,
                channels: *channels,
            },
        }
    }

    fn expect(&self, filter: &str, media_type: MediaType) -> Result<()> {
        if self.media_type != media_type {
            return Err(Error::Filter(format!(
                "{}: expected {} input, got {}",
                filter, media_type, self.media_type
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.media_type {
            MediaType::Video => write!(
                f,
                "video {}x{} {} tb={} fr={}",
                self.width,
                self.height,
                self.pixel_format.map(|p| p.name()).unwrap_or("none"),
                self.time_base,
                self.frame_rate
            ),
            _ => write!(
                f,
                "audio {}Hz {}ch s32 tb={}",
                self.sample_rate, self.channels, self.time_base
            ),
        }
    }
}

// ============================================================================
// Filter stages
// ============================================================================

/// Single-input filter
pub(crate) trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Negotiate the output link from the input link; called once
    fn configure(&mut self, input: &Link) -> Result<Link>;

    fn push(&mut self, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()>;

    /// Input ended at `eof_pts` (input timebase). Flushes remaining output and
    /// returns where the output ends (output timebase).
    fn finish(&mut self, eof_pts: Option<i64>, out: &mut Vec<DecodedFrame>) -> Result<Option<i64>>;
}

/// Output of a merge stage ended at the given pts
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Ended(pub Option<i64>);

/// Multi-input filter at the head of a chain
pub(crate) trait MergeStage: Send {
    fn name(&self) -> &'static str;

    fn configure(&mut self, inputs: &[Link]) -> Result<Link>;

    fn push(&mut self, pad: usize, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()>;

    /// Input `pad` ended at `eof_pts`; returns `Some` once the output ended
    fn close(
        &mut self,
        pad: usize,
        eof_pts: Option<i64>,
        out: &mut Vec<DecodedFrame>,
    ) -> Result<Option<Ended>>;

    /// True when output is blocked on this input
    fn needs_input(&self, pad: usize) -> bool;
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKind {
    Null,
    Anull,
    Bwdif,
    Fps,
    Alphamerge,
    Aresample,
    Asetnsamples,
    Amerge,
}

impl FilterKind {
    fn lookup(name: &str) -> Result<Self> {
        match name {
            "null" => Ok(FilterKind::Null),
            "anull" => Ok(FilterKind::Anull),
            "bwdif" => Ok(FilterKind::Bwdif),
            "fps" => Ok(FilterKind::Fps),
            "alphamerge" => Ok(FilterKind::Alphamerge),
            "aresample" => Ok(FilterKind::Aresample),
            "asetnsamples" => Ok(FilterKind::Asetnsamples),
            "amerge" => Ok(FilterKind::Amerge),
            other => Err(Error::Filter(format!("No such filter: '{}'", other))),
        }
    }

    fn output_type(&self) -> MediaType {
        match self {
            FilterKind::Null | FilterKind::Bwdif | FilterKind::Fps | FilterKind::Alphamerge => {
                MediaType::Video
            }
            _ => MediaType::Audio,
        }
    }

    fn is_merge(&self) -> bool {
        matches!(self, FilterKind::Alphamerge | FilterKind::Amerge)
    }
}

/// Raw `key=value` / positional filter arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Options {
    entries: Vec<(Option<String>, String)>,
}

impl Options {
    fn parse(args: &str) -> Self {
        let entries = args
            .split(':')
            .filter(|s| !s.is_empty())
            .map(|item| match item.split_once('=') {
                Some((k, v)) => (Some(k.trim().to_string()), v.trim().to_string()),
                None => (None, item.trim().to_string()),
            })
            .collect();
        Self { entries }
    }

    /// Map arguments onto `known` option names; positional arguments take
    /// the names in order. Unknown names are an error.
    pub fn resolve(&self, filter: &str, known: &[&'static str]) -> Result<ResolvedOptions> {
        let mut values = BTreeMap::new();
        for (position, (key, value)) in self.entries.iter().enumerate() {
            let name = match key {
                Some(key) => *known.iter().find(|k| *k == key).ok_or_else(|| {
                    Error::Filter(format!("{}: unknown option '{}'", filter, key))
                })?,
                None => *known.get(position).ok_or_else(|| {
                    Error::Filter(format!("{}: too many arguments", filter))
                })?,
            };
            values.insert(name, value.clone());
        }
        Ok(ResolvedOptions {
            filter: filter.to_string(),
            values,
        })
    }
}

/// Options of one filter, keyed by canonical name
pub(crate) struct ResolvedOptions {
    filter: String,
    values: BTreeMap<&'static str, String>,
}

impl ResolvedOptions {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Parse the first present option among `names`
    pub fn parse<T: FromStr>(&self, names: &[&str]) -> Result<Option<T>> {
        for name in names {
            if let Some(raw) = self.get(name) {
                return raw.parse::<T>().map(Some).map_err(|_| {
                    Error::Filter(format!("{}: invalid value '{}' for {}", self.filter, raw, name))
                });
            }
        }
        Ok(None)
    }

    pub fn rational(&self, name: &str) -> Result<Option<Rational>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => parse_rational(raw).map(Some).ok_or_else(|| {
                Error::Filter(format!("{}: invalid rate '{}'", self.filter, raw))
            }),
        }
    }
}

/// `num/den` or an integer
fn parse_rational(raw: &str) -> Option<Rational> {
    let r = match raw.split_once('/') {
        Some((n, d)) => Rational::new(n.trim().parse().ok()?, d.trim().parse().ok()?),
        None => Rational::new(raw.trim().parse().ok()?, 1),
    };
    r.is_valid().then(|| r.reduced())
}

#[derive(Debug, Clone)]
struct FilterDesc {
    name: String,
    kind: FilterKind,
    options: Options,
}

fn parse_chain(spec: &str) -> Result<Vec<FilterDesc>> {
    if spec.contains(['[', ']', ';']) {
        return Err(Error::Filter(format!(
            "Labelled or multi-chain graphs are not supported: '{}'",
            spec
        )));
    }

    spec.split(',')
        .map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(Error::Filter(format!("Empty filter in '{}'", spec)));
            }
            let (name, args) = segment.split_once('=').unwrap_or((segment, ""));
            Ok(FilterDesc {
                name: name.trim().to_string(),
                kind: FilterKind::lookup(name.trim())?,
                options: Options::parse(args),
            })
        })
        .collect()
}

fn input_types(desc: &FilterDesc) -> Result<Vec<MediaType>> {
    match desc.kind {
        FilterKind::Amerge => Ok(vec![MediaType::Audio; audio::Amerge::input_count(&desc.options)?]),
        FilterKind::Alphamerge => Ok(vec![MediaType::Video; 2]),
        kind => Ok(vec![kind.output_type()]),
    }
}

fn describe(chain: &[FilterDesc]) -> Result<ParsedGraph> {
    let Some(first) = chain.first() else {
        return Err(Error::Filter("Empty filter graph".to_string()));
    };

    let inputs = input_types(first)?;
    let mut current = first.kind.output_type();

    for desc in &chain[1..] {
        if desc.kind.is_merge() {
            return Err(Error::Filter(format!(
                "{} must be the first filter of the chain",
                desc.name
            )));
        }
        let expected = input_types(desc)?;
        if expected != [current] {
            return Err(Error::Filter(format!(
                "{}: cannot link {} output to {} input",
                desc.name, current, expected[0]
            )));
        }
        current = desc.kind.output_type();
    }

    Ok(ParsedGraph {
        inputs,
        outputs: vec![current],
    })
}

fn make_stage(desc: &FilterDesc) -> Result<Box<dyn Stage>> {
    Ok(match desc.kind {
        FilterKind::Null => Box::new(Identity::new("null", MediaType::Video, &desc.options)?),
        FilterKind::Anull => Box::new(Identity::new("anull", MediaType::Audio, &desc.options)?),
        FilterKind::Bwdif => Box::new(video::Bwdif::new(&desc.options)?),
        FilterKind::Fps => Box::new(video::Fps::new(&desc.options)?),
        FilterKind::Aresample => Box::new(audio::Aresample::new(&desc.options)?),
        FilterKind::Asetnsamples => Box::new(audio::Asetnsamples::new(&desc.options)?),
        FilterKind::Alphamerge | FilterKind::Amerge => {
            return Err(Error::Filter(format!(
                "{} must be the first filter of the chain",
                desc.name
            )))
        }
    })
}

fn make_merge(desc: &FilterDesc) -> Result<Option<Box<dyn MergeStage>>> {
    Ok(match desc.kind {
        FilterKind::Amerge => Some(Box::new(audio::Amerge::new(&desc.options)?)),
        FilterKind::Alphamerge => Some(Box::new(video::Alphamerge::new(&desc.options)?)),
        _ => None,
    })
}

/// `null` / `anull`
struct Identity {
    name: &'static str,
    media_type: MediaType,
}

impl Identity {
    fn new(name: &'static str, media_type: MediaType, options: &Options) -> Result<Self> {
        options.resolve(name, &[])?;
        Ok(Self { name, media_type })
    }
}

impl Stage for Identity {
    fn name(&self) -> &'static str {
        self.name
    }

    fn configure(&mut self, input: &Link) -> Result<Link> {
        input.expect(self.name, self.media_type)?;
        Ok(input.clone())
    }

    fn push(&mut self, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        out.push(frame);
        Ok(())
    }

    fn finish(&mut self, eof_pts: Option<i64>, _out: &mut Vec<DecodedFrame>) -> Result<Option<i64>> {
        Ok(eof_pts)
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Pure-Rust [`FilterBackend`]
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl FilterBackend for NativeBackend {
    fn parse(&self, spec: &str) -> Result<ParsedGraph> {
        describe(&parse_chain(spec)?)
    }

    fn build(
        &self,
        spec: &str,
        sources: &[SourceSpec],
        sink: &SinkSpec,
    ) -> Result<Box<dyn CompiledGraph>> {
        Ok(Box::new(NativeGraph::build(spec, sources, sink)?))
    }
}

struct Pad {
    stream_index: usize,
    name: String,
    closed: bool,
    failed_requests: u32,
}

/// Compiled linear chain
pub struct NativeGraph {
    pads: Vec<Pad>,
    merge: Option<Box<dyn MergeStage>>,
    stages: Vec<Box<dyn Stage>>,
    sink: Sink,
    /// Output ended; later input is discarded
    ended: bool,
    description: String,
}

impl NativeGraph {
    fn build(spec: &str, sources: &[SourceSpec], sink_spec: &SinkSpec) -> Result<Self> {
        let chain = parse_chain(spec)?;
        let parsed = describe(&chain)?;

        if sources.len() != parsed.inputs.len() {
            return Err(Error::Filter(format!(
                "Graph '{}' declares {} inputs, {} sources given",
                spec,
                parsed.inputs.len(),
                sources.len()
            )));
        }

        let mut ordered: Vec<&SourceSpec> = sources.iter().collect();
        ordered.sort_by_key(|s| s.pad);

        let mut description = String::new();
        let mut input_links = Vec::with_capacity(ordered.len());
        for (pad, (source, media_type)) in ordered.iter().zip(&parsed.inputs).enumerate() {
            if source.pad != pad {
                return Err(Error::Filter(format!("Input pad {} has no source", pad)));
            }
            let link = Link::from_source(&source.params);
            link.expect(&source.name, *media_type)?;
            let _ = writeln!(description, "{} (buffer): {}", source.name, link);
            input_links.push(link);
        }

        let mut merge = make_merge(&chain[0])?;
        let (mut link, rest) = match merge.as_mut() {
            Some(m) => {
                let link = m.configure(&input_links)?;
                let _ = writeln!(description, "  -> {}: {}", m.name(), link);
                (link, &chain[1..])
            }
            None => (input_links[0].clone(), &chain[..]),
        };

        let mut stages = Vec::with_capacity(rest.len());
        for desc in rest {
            let mut stage = make_stage(desc)?;
            link = stage.configure(&link)?;
            let _ = writeln!(description, "  -> {}: {}", stage.name(), link);
            stages.push(stage);
        }

        let sink = Sink::new(&link, sink_spec)?;
        let _ = write!(description, "out (buffersink): {}", link);

        let pads = ordered
            .iter()
            .map(|s| Pad {
                stream_index: s.stream_index,
                name: s.name.clone(),
                closed: false,
                failed_requests: 0,
            })
            .collect();

        Ok(Self {
            pads,
            merge,
            stages,
            sink,
            ended: false,
            description,
        })
    }

    fn pad_index(&self, stream_index: usize) -> Result<usize> {
        self.pads
            .iter()
            .position(|p| p.stream_index == stream_index)
            .ok_or_else(|| Error::Filter(format!("No source for stream {}", stream_index)))
    }

    /// Run frames through the stages starting at `start`, into the sink
    fn run_from(&mut self, start: usize, mut frames: Vec<DecodedFrame>) -> Result<()> {
        for stage in self.stages[start..].iter_mut() {
            if frames.is_empty() {
                return Ok(());
            }
            let mut next = Vec::with_capacity(frames.len());
            for frame in frames {
                stage.push(frame, &mut next)?;
            }
            frames = next;
        }
        for frame in frames {
            self.sink.push(frame);
        }
        Ok(())
    }

    /// Flush every stage in order, then end the sink
    fn finish_from(&mut self, start: usize, mut eof_pts: Option<i64>) -> Result<()> {
        for i in start..self.stages.len() {
            let mut out = Vec::new();
            eof_pts = self.stages[i].finish(eof_pts, &mut out)?;
            self.run_from(i + 1, out)?;
        }
        self.sink.finish();
        self.ended = true;
        Ok(())
    }
}

impl CompiledGraph for NativeGraph {
    fn write(&mut self, stream_index: usize, frame: DecodedFrame) -> Result<()> {
        if frame.is_terminal() {
            return self.close(stream_index, frame.pts);
        }

        let pad = self.pad_index(stream_index)?;
        if self.pads[pad].closed {
            return Err(Error::Filter(format!(
                "Write to closed source {}",
                self.pads[pad].name
            )));
        }
        self.pads[pad].failed_requests = 0;

        if self.ended {
            return Ok(());
        }

        let mut frames = Vec::new();
        match self.merge.as_mut() {
            Some(m) => m.push(pad, frame, &mut frames)?,
            None => frames.push(frame),
        }
        self.run_from(0, frames)
    }

    fn close(&mut self, stream_index: usize, pts: Option<i64>) -> Result<()> {
        let pad = self.pad_index(stream_index)?;
        if self.pads[pad].closed {
            return Ok(());
        }
        self.pads[pad].closed = true;

        if self.ended {
            return Ok(());
        }

        match self.merge.as_mut() {
            None => self.finish_from(0, pts),
            Some(m) => {
                let mut out = Vec::new();
                let mut ended = m.close(pad, pts, &mut out)?;
                if ended.is_none() && self.pads.iter().all(|p| p.closed) {
                    ended = Some(Ended(None));
                }
                self.run_from(0, out)?;
                match ended {
                    Some(Ended(end)) => self.finish_from(0, end),
                    None => Ok(()),
                }
            }
        }
    }

    fn failed_requests(&self, stream_index: usize) -> u32 {
        self.pads
            .iter()
            .find(|p| p.stream_index == stream_index)
            .map(|p| p.failed_requests)
            .unwrap_or(0)
    }

    fn pull(&mut self, nb_samples: Option<usize>) -> Result<PullStatus> {
        if let Some(frame) = self.sink.pull(nb_samples) {
            return Ok(PullStatus::Frame(frame));
        }
        if self.sink.finished {
            return Ok(PullStatus::Eof);
        }

        let merge = self.merge.as_deref();
        let mut requested = false;
        for (i, pad) in self.pads.iter_mut().enumerate() {
            if !pad.closed && merge.map_or(true, |m| m.needs_input(i)) {
                pad.failed_requests += 1;
                requested = true;
            }
        }
        if !requested {
            for pad in self.pads.iter_mut().filter(|p| !p.closed) {
                pad.failed_requests += 1;
            }
        }

        Ok(PullStatus::Again)
    }

    fn time_base(&self) -> Rational {
        self.sink.link.time_base
    }

    fn frame_rate(&self) -> Rational {
        self.sink.link.frame_rate
    }

    fn sample_rate(&self) -> u32 {
        self.sink.link.sample_rate
    }

    fn dump(&self) -> String {
        self.description.clone()
    }
}

// ============================================================================
// Sink
// ============================================================================

struct Sink {
    link: Link,
    frames: VecDeque<DecodedFrame>,
    /// Interleaved audio left over from exact-size pulls
    samples: VecDeque<i32>,
    /// Pts of the first sample in `samples`
    samples_pts: Option<i64>,
    finished: bool,
}

impl Sink {
    fn new(link: &Link, spec: &SinkSpec) -> Result<Self> {
        match spec {
            SinkSpec::Video { pixel_formats } => {
                link.expect("buffersink", MediaType::Video)?;
                let format = link.pixel_format.ok_or_else(|| {
                    Error::Filter("buffersink: input has no pixel format".to_string())
                })?;
                if !pixel_formats.contains(&format) {
                    return Err(Error::Filter(format!(
                        "buffersink: no conversion from {} to an accepted format",
                        format
                    )));
                }
            }
            SinkSpec::Audio { sample_rate } => {
                link.expect("abuffersink", MediaType::Audio)?;
                if link.sample_rate != *sample_rate {
                    return Err(Error::Filter(format!(
                        "abuffersink: input is {} Hz, sink requires {} Hz",
                        link.sample_rate, sample_rate
                    )));
                }
            }
        }

        Ok(Self {
            link: link.clone(),
            frames: VecDeque::new(),
            samples: VecDeque::new(),
            samples_pts: None,
            finished: false,
        })
    }

    fn push(&mut self, frame: DecodedFrame) {
        self.frames.push_back(frame);
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn channels(&self) -> usize {
        self.link.channels.max(1) as usize
    }

    fn pull(&mut self, nb_samples: Option<usize>) -> Option<DecodedFrame> {
        if self.link.media_type != MediaType::Audio {
            return self.frames.pop_front();
        }

        let Some(wanted) = nb_samples.filter(|n| *n > 0) else {
            if self.samples.is_empty() {
                return self.frames.pop_front();
            }
            let available = self.samples.len() / self.channels();
            return Some(self.take_samples(available));
        };

        while self.samples.len() / self.channels() < wanted {
            let Some(frame) = self.frames.pop_front() else {
                break;
            };
            let Some(audio) = frame.audio_samples() else {
                continue;
            };
            if self.samples.is_empty() {
                self.samples_pts = frame.pts;
            }
            self.samples.extend(audio.data.iter().copied());
        }

        let available = self.samples.len() / self.channels();
        if available >= wanted {
            Some(self.take_samples(wanted))
        } else if self.finished && available > 0 {
            Some(self.take_samples(available))
        } else {
            None
        }
    }

    fn take_samples(&mut self, count: usize) -> DecodedFrame {
        let data: Vec<i32> = self.samples.drain(..count * self.channels()).collect();
        let pts = self.samples_pts;
        let duration = rescale_q(
            count as i64,
            Rational::new(1, self.link.sample_rate.max(1) as i64),
            self.link.time_base,
        );
        self.samples_pts = pts.map(|p| p + duration);

        let mut frame = DecodedFrame::audio(
            pts,
            crate::media::AudioSamples {
                sample_rate: self.link.sample_rate,
                channels: self.link.channels,
                data,
            },
        );
        frame.duration = Some(duration);
        frame
    }
}

#[cfg(test)]
mod tests;
