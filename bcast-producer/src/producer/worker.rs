//! Producer worker loop
//!
//! One thread per producer. Each pass applies a pending seek, checks the clip
//! window, moves packets and decoded frames into the filter graphs, pulls one
//! video and one audio unit, and pushes the synchronized pair to the buffer.

use super::buffer::Frame;
use super::{Backends, ProducerOptions, Seekable, Shared};
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::filter::{BuildContext, FilterGraph};
use crate::frame::FrameFactory;
use crate::media::{CodecFactory, Demuxed, Demuxer, FilterBackend, MediaType, Packet};
use bcast_common::telemetry;
use bcast_common::timing::{rescale_q, Rational, TICK_BASE};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Idle passes after which the back-off sleep grows
const FAST_RETRIES: u64 = 25;
const SHORT_BACKOFF: Duration = Duration::from_millis(5);
const LONG_BACKOFF: Duration = Duration::from_millis(20);
/// Sleep while the clip is fully buffered
const EOF_BACKOFF: Duration = Duration::from_millis(10);
/// Packets held per stream while its decoder is full; covers inputs that
/// interleave streams in chunks of several seconds
const BACKLOG_LIMIT: usize = 512;

pub(crate) struct Worker {
    shared: Arc<Shared>,
    tag: Uuid,
    vfilter: String,
    afilter: String,
    seekable: Seekable,

    demuxer: Box<dyn Demuxer>,
    codecs: Arc<dyn CodecFactory>,
    filters: Arc<dyn FilterBackend>,
    frames: Arc<dyn FrameFactory>,

    decoders: BTreeMap<usize, Decoder>,
    video: FilterGraph,
    audio: FilterGraph,
    /// Graph each live stream feeds
    routes: BTreeMap<usize, MediaType>,
    /// Packets read for a stream whose decoder had no room yet; `None`
    /// is the end-of-input flush
    backlog: BTreeMap<usize, VecDeque<Option<Packet>>>,

    frame_count: i64,
    /// pts and duration of the last frame built in this epoch
    last: Option<(i64, i64)>,
    cadence: Vec<usize>,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Shared>, options: &ProducerOptions, backends: Backends, tag: Uuid) -> Self {
        let cadence = shared.format.audio_cadence.clone();
        Self {
            shared,
            tag,
            vfilter: options.vfilter.clone(),
            afilter: options.afilter.clone(),
            seekable: options.seekable,
            demuxer: backends.demuxer,
            codecs: backends.codecs,
            filters: backends.filters,
            frames: backends.frames,
            decoders: BTreeMap::new(),
            video: FilterGraph::empty(MediaType::Video),
            audio: FilterGraph::empty(MediaType::Audio),
            routes: BTreeMap::new(),
            backlog: BTreeMap::new(),
            frame_count: 0,
            last: None,
            cadence,
        }
    }

    /// Thread entry; `first_seek` is in ticks
    pub(crate) fn run(mut self, first_seek: Option<i64>) {
        match self.run_loop(first_seek) {
            Ok(()) | Err(Error::Interrupted) => {}
            Err(e) => error!("{} {}", self.shared.print(), e),
        }

        self.demuxer.abort();
        self.decoders.clear();
        debug!("{} worker stopped", self.shared.print());
    }

    fn stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    fn start_time(&self) -> i64 {
        self.demuxer.start_time().unwrap_or(0)
    }

    fn open(&mut self, first_seek: Option<i64>) -> Result<()> {
        {
            let mut monitor = self.shared.monitor.lock().unwrap();
            for stream in self.demuxer.streams() {
                let fps = stream.guessed_frame_rate();
                monitor.insert(format!("file/streams/{}/fps", stream.index), json!([fps.num, fps.den]));
            }
        }

        let transport = &self.shared.transport;
        transport.init_input_duration(self.demuxer.duration());

        let start = first_seek.or(transport.start());
        if transport.duration().is_none() {
            if let Some(input) = self.demuxer.duration().filter(|d| *d > 0) {
                transport.set_duration(Some(match start {
                    Some(start) => input - start,
                    None => input,
                }));
            }
        }

        match start {
            Some(start) => self.seek_internal(Some(start))?,
            None => self.reset(self.start_time())?,
        }

        self.shared.buffer.clear();
        self.shared.publish_buffer(0);
        Ok(())
    }

    fn run_loop(&mut self, first_seek: Option<i64>) -> Result<()> {
        self.cadence.rotate_right(1);
        self.open(first_seek)?;

        let mut frame_timer = Instant::now();
        let mut decode_timer = Instant::now();
        let mut warning_debounce: u64 = 0;

        while !self.stopped() {
            if let Some(target) = self.shared.transport.take_seek() {
                self.seek_internal(Some(target))?;
                self.last = None;
                continue;
            }

            let (start, end) = self.shared.transport.window();
            // The next frame would cover [pts + d, pts + 2d)
            let past_end = match (self.last, end) {
                (Some((pts, duration)), Some(end)) => pts + 2 * duration > end,
                _ => false,
            };
            let buffer_eof = (self.video.is_eof() && self.audio.is_eof()) || past_end;
            self.shared.buffer_eof.store(buffer_eof, Ordering::Release);

            if buffer_eof {
                if self.shared.transport.looping() && self.frame_count > 2 {
                    self.last = None;
                    self.seek_internal(Some(start))?;
                } else {
                    thread::sleep(EOF_BACKOFF);
                }
                continue;
            }

            let mut progress = self.schedule()?;
            progress |= self.pull()?;

            let video_waiting = !self.video.has_frame() && !self.video.is_eof();
            let audio_waiting = !self.audio.has_frame() && !self.audio.is_eof();
            if video_waiting || audio_waiting {
                if !progress {
                    if warning_debounce % 500 == 100 {
                        let what = if video_waiting {
                            "Waiting for video frame..."
                        } else if audio_waiting {
                            "Waiting for audio frame..."
                        } else {
                            "Waiting for frame..."
                        };
                        warn!("{} {}", self.shared.print(), what);
                    }
                    warning_debounce += 1;
                    thread::sleep(if warning_debounce > FAST_RETRIES { LONG_BACKOFF } else { SHORT_BACKOFF });
                }
                continue;
            }

            warning_debounce = 0;

            let Some(frame) = self.build_frame() else {
                continue;
            };

            let format = &self.shared.format;
            self.shared
                .telemetry
                .value(telemetry::DECODE_TIME, decode_timer.elapsed().as_secs_f64() * format.fps * 0.5);

            let transport = &self.shared.transport;
            self.shared
                .buffer
                .push(frame, &self.shared.stop, || transport.seek_pending())?;

            if !format.is_interlaced() || self.frame_count % 2 == 1 {
                // Every other field on interlaced formats
                self.shared
                    .telemetry
                    .value(telemetry::FRAME_TIME, frame_timer.elapsed().as_secs_f64() * format.hz * 0.5);
                frame_timer = Instant::now();
            }

            decode_timer = Instant::now();
            self.shared.publish_buffer(self.shared.buffer.len());
            self.cadence.rotate_right(1);
        }

        Err(Error::Interrupted)
    }

    /// Synchronize the held video and audio units into one frame
    fn build_frame(&mut self) -> Option<Frame> {
        let start_time = self.start_time();
        let video = self.video.take_frame();
        let audio = self.audio.take_frame();

        if video.is_none() && audio.is_none() {
            // Both graphs ended in the same pass
            return None;
        }

        let mut pts = None;
        let mut duration = rescale_q(1, self.shared.format_tb, TICK_BASE);

        if let (Some(v), Some(tb)) = (&video, self.video.time_base()) {
            pts = v.pts.map(|p| rescale_q(p, tb, TICK_BASE) - start_time);
            if let Some(rate) = self.video.frame_rate().filter(Rational::is_valid) {
                duration = rescale_q(1, rate.inv(), TICK_BASE);
            }
        }

        if let (Some(a), Some(tb)) = (&audio, self.audio.time_base()) {
            pts = a.pts.map(|p| rescale_q(p, tb, TICK_BASE) - start_time);
            if let Some(sr) = self.audio.sample_rate().filter(|sr| *sr > 0) {
                duration = rescale_q(a.nb_samples() as i64, Rational::new(1, sr as i64), TICK_BASE);
            }
        }

        let draw = self.frames.make_frame(
            self.tag,
            video.as_ref().and_then(|f| f.video_plane()),
            audio.as_ref().and_then(|f| f.audio_samples()),
        );

        let frame_count = self.frame_count;
        self.frame_count += 1;
        if let Some(pts) = pts {
            self.last = Some((pts, duration));
        }

        Some(Frame {
            video,
            audio,
            frame: draw,
            start_time,
            pts,
            duration,
            frame_count,
        })
    }

    /// Pull both graphs; the pulls run in parallel when both need one
    fn pull(&mut self) -> Result<bool> {
        let nb_samples = self.cadence.first().copied();
        let video = &mut self.video;
        let audio = &mut self.audio;

        let (video_result, audio_result) = if !video.has_frame() && !audio.has_frame() {
            thread::scope(|s| {
                let handle = s.spawn(|| video.pull(None));
                let audio_result = audio.pull(nb_samples);
                let video_result = handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::Filter("Video filter pull panicked".to_string())));
                (video_result, audio_result)
            })
        } else {
            (video.pull(None), audio.pull(nb_samples))
        };

        Ok(video_result? | audio_result?)
    }

    /// True while some decoder has room and no backlog is full
    fn want_packet(&self) -> bool {
        let full = self.backlog.values().any(|b| b.len() >= BACKLOG_LIMIT);
        !full && self.decoders.values().any(Decoder::want_packet)
    }

    /// Hand `packet` to its decoder, or queue it behind earlier packets
    fn route(&mut self, stream_index: usize, packet: Option<Packet>) {
        let Some(decoder) = self.decoders.get(&stream_index) else {
            return;
        };
        if decoder.is_eof() {
            return;
        }
        let backlog = self.backlog.entry(stream_index).or_default();
        if backlog.is_empty() && decoder.want_packet() {
            decoder.push(packet);
        } else {
            backlog.push_back(packet);
        }
    }

    /// Move queued packets into decoders that have room again
    fn drain_backlog(&mut self) -> bool {
        let mut moved = false;
        for (stream_index, backlog) in &mut self.backlog {
            let Some(decoder) = self.decoders.get(stream_index) else {
                backlog.clear();
                continue;
            };
            while decoder.want_packet() {
                let Some(packet) = backlog.pop_front() else {
                    break;
                };
                decoder.push(packet);
                moved = true;
            }
            if decoder.is_eof() {
                backlog.clear();
            }
        }
        moved
    }

    /// Move packets to decoders and decoded frames to graph sources
    fn schedule(&mut self) -> Result<bool> {
        let mut result = self.drain_backlog();

        while self.want_packet() {
            match self.demuxer.try_pop()? {
                None => break,
                Some(Demuxed::Eof) => {
                    result = true;
                    let streams: Vec<usize> = self.decoders.keys().copied().collect();
                    for stream_index in streams {
                        self.route(stream_index, None);
                    }
                }
                Some(Demuxed::Packet(packet)) => {
                    result = true;
                    if self.routes.contains_key(&packet.stream_index) {
                        self.route(packet.stream_index, Some(packet));
                    }
                }
            }
        }

        let mut ended = Vec::new();
        for (&stream_index, &media_type) in &self.routes {
            let graph = match media_type {
                MediaType::Video => &mut self.video,
                _ => &mut self.audio,
            };
            if graph.failed_requests(stream_index) == 0 {
                continue;
            }
            let Some(decoder) = self.decoders.get(&stream_index) else {
                continue;
            };
            let Some(frame) = decoder.pop()? else {
                continue;
            };

            if frame.is_terminal() {
                ended.push(stream_index);
            }
            graph.write(stream_index, frame)?;
            result = true;
        }

        for stream_index in ended {
            self.routes.remove(&stream_index);
        }

        Ok(result)
    }

    /// Start a new epoch at `time` (ticks, relative to the media start)
    fn seek_internal(&mut self, time: Option<i64>) -> Result<()> {
        let time = time.unwrap_or(0) + self.start_time();

        match self.seekable {
            Seekable::Never => {}
            Seekable::Yes => self.demuxer.seek(time)?,
            Seekable::Auto => {
                if let Err(e) = self.demuxer.seek(time) {
                    warn!("{} seek failed, rebuilding in place: {}", self.shared.print(), e);
                }
            }
        }

        self.shared.frame_flush.store(true, Ordering::Release);
        self.shared.buffer_eof.store(false, Ordering::Release);
        self.frame_count = 0;
        self.backlog.clear();
        self.decoders.clear();

        self.reset(time)
    }

    /// Rebuild both graphs starting at `start_time` (absolute ticks)
    fn reset(&mut self, start_time: i64) -> Result<()> {
        // Old graphs reference decoders about to be replaced
        self.video = FilterGraph::empty(MediaType::Video);
        self.audio = FilterGraph::empty(MediaType::Audio);

        let streams = self.demuxer.streams().to_vec();
        {
            let mut ctx = BuildContext {
                streams: &streams,
                format: &self.shared.format,
                backend: self.filters.as_ref(),
                codecs: self.codecs.as_ref(),
                decoders: &mut self.decoders,
            };
            self.video = FilterGraph::new(&self.vfilter, MediaType::Video, start_time, &mut ctx)?;
            self.audio = FilterGraph::new(&self.afilter, MediaType::Audio, start_time, &mut ctx)?;
        }

        self.routes.clear();
        for &index in self.video.sources() {
            self.routes.insert(index, MediaType::Video);
        }
        for &index in self.audio.sources() {
            self.routes.insert(index, MediaType::Audio);
        }

        let routes = &self.routes;
        self.decoders.retain(|index, _| routes.contains_key(index));

        debug!(
            "{} reset at {} ticks ({} streams routed)",
            self.shared.print(),
            start_time,
            self.routes.len()
        );
        Ok(())
    }
}
