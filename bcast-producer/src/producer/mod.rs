//! Media producer
//!
//! A [`Producer`] plays one input into a channel. It owns a worker thread
//! that demuxes, decodes and filters the input into synchronized
//! video + audio frames, and hands them to the channel through a small
//! bounded buffer.
//!
//! ```text
//!                      ┌──────────── worker thread ────────────┐
//! Demuxer ─▶ schedule ─┼▶ Decoder(s) ─▶ FilterGraph (video) ─┐ │
//!                      │            └─▶ FilterGraph (audio) ─┼─┼▶ Buffer ─▶ next_frame()
//!                      └─────────────────────────────────────┘ │
//! seek / loop / start / duration ──▶ TransportState ───────────┘
//! ```
//!
//! # Units
//!
//! Public times (`seek`, `start`, `duration`, `time`, `file_duration`) are
//! channel units: frames on progressive formats, fields on interlaced ones.
//! Internally every time is in ticks of the global timebase.
//!
//! # Failure
//!
//! Errors while opening or running the pipeline stop the worker and are
//! logged. The producer then stays empty: every `next_frame` underflows.

mod buffer;
mod transport;
mod worker;

pub use buffer::{capacity_for, Buffer, Frame, StillFrame};
pub use transport::TransportState;

use crate::backend::{NativeBackend, SymphoniaDemuxer};
use crate::error::{Error, Result};
use crate::frame::{DrawFrame, FrameFactory, PassthroughFactory};
use crate::media::{CodecFactory, Demuxer, FilterBackend};
use bcast_common::format::{VideoField, VideoFormatDesc};
use bcast_common::telemetry::{self, Severity, TelemetryBus};
use bcast_common::timing::{rescale_opt, rescale_q, ticks_to_seconds, Rational, TICK_BASE};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker::Worker;

/// Whether the demuxer is repositioned on seek
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Seekable {
    /// Never seek the demuxer; only the pipeline is rebuilt
    Never,
    /// Seek the demuxer; a failed seek is fatal
    Yes,
    /// Seek the demuxer; on failure only the pipeline is rebuilt
    #[default]
    Auto,
}

impl Seekable {
    pub fn seeks_demuxer(&self) -> bool {
        !matches!(self, Seekable::Never)
    }
}

impl FromStr for Seekable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "never" | "false" | "no" => Ok(Seekable::Never),
            "1" | "yes" | "true" => Ok(Seekable::Yes),
            "2" | "auto" => Ok(Seekable::Auto),
            other => Err(Error::Config(format!("Invalid seekable value: {}", other))),
        }
    }
}

/// Producer settings; times are channel units
#[derive(Debug, Clone, Default)]
pub struct ProducerOptions {
    /// Display name
    pub name: String,
    pub path: String,
    /// User video filter description; empty for none
    pub vfilter: String,
    /// User audio filter description; empty for none
    pub afilter: String,
    /// Clip start
    pub start: Option<i64>,
    /// First position to play, if different from `start`
    pub seek: Option<i64>,
    /// Clip length; defaults to the rest of the input
    pub duration: Option<i64>,
    pub looping: bool,
    pub seekable: Seekable,
}

/// Collaborators a producer drives
pub struct Backends {
    pub demuxer: Box<dyn Demuxer>,
    pub codecs: Arc<dyn CodecFactory>,
    pub filters: Arc<dyn FilterBackend>,
    pub frames: Arc<dyn FrameFactory>,
}

impl Backends {
    /// Software stack for a local audio file
    pub fn open_file(path: &Path) -> Result<Self> {
        let demuxer = SymphoniaDemuxer::open(path)?;
        let codecs = demuxer.codec_factory();
        Ok(Self {
            demuxer: Box::new(demuxer),
            codecs: Arc::new(codecs),
            filters: Arc::new(NativeBackend::new()),
            frames: Arc::new(PassthroughFactory),
        })
    }
}

/// State shared by the facade and the worker
pub(crate) struct Shared {
    name: String,
    format: VideoFormatDesc,
    /// Channel unit timebase
    format_tb: Rational,
    transport: TransportState,
    buffer: Buffer,
    /// A new epoch started; the next delivery replaces the still frame
    frame_flush: AtomicBool,
    /// Nothing more will be buffered in this epoch
    buffer_eof: AtomicBool,
    stop: AtomicBool,
    underflows: AtomicU64,
    monitor: Mutex<Map<String, Value>>,
    telemetry: TelemetryBus,
}

impl Shared {
    fn to_ticks(&self, units: i64) -> i64 {
        rescale_q(units, self.format_tb, TICK_BASE)
    }

    fn to_units(&self, ticks: Option<i64>) -> Option<i64> {
        rescale_opt(ticks, TICK_BASE, self.format_tb)
    }

    fn time(&self) -> i64 {
        self.to_units(self.transport.frame_time()).unwrap_or(0)
    }

    fn units_to_seconds(&self, units: i64) -> f64 {
        units as f64 * self.format_tb.as_f64()
    }

    /// `producer[<name>|<position>/<duration>]`, seconds with four decimals
    pub(crate) fn print(&self) -> String {
        let start = self.to_units(self.transport.start()).unwrap_or(0);
        let duration = self.to_units(self.transport.duration()).unwrap_or(0);
        let position = (self.time() - start).max(0);
        format!(
            "producer[{}|{:.4}/{:.4}]",
            self.name,
            self.units_to_seconds(position),
            self.units_to_seconds(duration)
        )
    }

    fn publish_buffer(&self, len: usize) {
        self.telemetry.value(telemetry::BUFFER, self.buffer.ratio(len));
    }

    fn update_state(&self) {
        let seconds = |ticks: Option<i64>| ticks_to_seconds(ticks.unwrap_or(0));
        let time = ticks_to_seconds(self.to_ticks(self.time()));

        let mut monitor = self.monitor.lock().unwrap();
        monitor.insert(
            "file/clip".to_string(),
            json!([seconds(self.transport.start()), seconds(self.transport.duration())]),
        );
        monitor.insert(
            "file/time".to_string(),
            json!([time, seconds(self.transport.input_duration())]),
        );
        monitor.insert("loop".to_string(), json!(self.transport.looping()));
    }
}

/// Plays one input into a channel
///
/// All methods take `&self`, never block, and may be called from any thread.
pub struct Producer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Producer {
    /// Start producing `options.path` for a channel of `format`
    pub fn new(
        format: VideoFormatDesc,
        options: ProducerOptions,
        backends: Backends,
        telemetry: TelemetryBus,
    ) -> Result<Self> {
        if !format.framerate.is_valid() || format.field_count == 0 {
            return Err(Error::Config(format!("Invalid channel format: {}", format.name)));
        }

        let format_tb = format.time_base();
        let to_ticks = |units: Option<i64>| rescale_opt(units, format_tb, TICK_BASE);

        let transport = TransportState::new(options.looping);
        transport.set_start(to_ticks(options.start));
        transport.set_duration(to_ticks(options.duration));

        let mut monitor = Map::new();
        monitor.insert("file/name".to_string(), json!(options.name));
        monitor.insert("file/path".to_string(), json!(options.path));
        monitor.insert("loop".to_string(), json!(options.looping));

        let shared = Arc::new(Shared {
            name: options.name.clone(),
            buffer: Buffer::new(capacity_for(&format)),
            format,
            format_tb,
            transport,
            frame_flush: AtomicBool::new(false),
            buffer_eof: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            underflows: AtomicU64::new(0),
            monitor: Mutex::new(monitor),
            telemetry: telemetry.with_source(options.name.clone()),
        });
        shared.update_state();

        debug!("{} seekable: {:?}", shared.print(), options.seekable);

        let worker = Worker::new(Arc::clone(&shared), &options, backends, Uuid::new_v4());
        let first_seek = to_ticks(options.seek);

        let thread = thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || worker.run(first_seek))?;

        info!("{} started", shared.print());

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Next frame for `field`, or `None` when nothing is ready
    ///
    /// Returns `None` at the end of the clip too; the reported time keeps
    /// advancing until the clip end.
    pub fn next_frame(&self, field: VideoField) -> Option<DrawFrame> {
        let shared = &self.shared;
        let result = self.take_frame(field);
        shared.update_state();
        result
    }

    fn take_frame(&self, field: VideoField) -> Option<DrawFrame> {
        let shared = &self.shared;
        let transport = &shared.transport;
        let mut state = shared.buffer.lock();

        let flush = shared.frame_flush.load(Ordering::Acquire);
        let eof = shared.buffer_eof.load(Ordering::Acquire);
        let refill = 4.min(shared.buffer.capacity());

        if state.frames.is_empty() || (flush && !eof && state.frames.len() < refill) {
            if eof && !flush {
                let (_, end) = transport.window();
                let end = end.unwrap_or(i64::MAX);
                let frame_time = transport.frame_time().unwrap_or(0);
                let frame_duration = transport.frame_duration();
                if frame_time < end {
                    if frame_duration > 0 {
                        transport.set_frame_time(Some((frame_time + frame_duration).min(end)));
                    } else {
                        transport.set_frame_time(transport.input_duration());
                    }
                }
                return None;
            }

            self.underflow(&mut state.latency);
            return None;
        }

        if shared.format.is_interlaced() {
            let first_field = state.frames.front().map(|f| f.frame_count % 2 == 0).unwrap_or(true);
            let mismatch = match field {
                VideoField::A => !first_field,
                VideoField::B => first_field,
                VideoField::Progressive => false,
            };
            if mismatch {
                self.underflow(&mut state.latency);
                return None;
            }
        }

        if let Some(latency) = state.latency.take() {
            warn!("{} Latency: {}", shared.print(), latency);
        }

        let frame = state.frames.pop_front()?;
        transport.set_frame(frame.pts, frame.duration);
        shared.frame_flush.store(false, Ordering::Release);
        state.still = Some(StillFrame::latch(&frame));

        let len = state.frames.len();
        drop(state);

        shared.buffer.notify();
        shared.publish_buffer(len);

        Some(frame.frame)
    }

    fn underflow(&self, latency: &mut Option<u64>) {
        self.shared.telemetry.tag(telemetry::UNDERFLOW, Severity::Warning);
        self.shared.underflows.fetch_add(1, Ordering::Relaxed);
        *latency = Some(latency.unwrap_or(0) + 1);
    }

    /// Repeat of the current frame, with its audio muted
    ///
    /// Outside the second field, a pending refresh (or an empty cache) picks
    /// up the oldest buffered frame without consuming it.
    pub fn prev_frame(&self, field: VideoField) -> DrawFrame {
        let shared = &self.shared;
        let mut state = shared.buffer.lock();

        if field != VideoField::B
            && (shared.frame_flush.load(Ordering::Acquire) || state.still.is_none())
        {
            if let Some(still) = state.frames.front().map(StillFrame::latch) {
                shared.transport.set_frame(still.pts, still.duration);
                shared.frame_flush.store(false, Ordering::Release);
                state.still = Some(still);
            }
        }

        let frame = state
            .still
            .as_ref()
            .map(|s| s.frame.still())
            .unwrap_or_default();
        drop(state);

        shared.update_state();
        frame
    }

    /// Jump to `time`, relative to the media start
    pub fn seek(&self, time: i64) {
        let shared = &self.shared;
        shared.transport.post_seek(shared.to_ticks(time));
        shared.buffer.clear();
        shared.publish_buffer(0);
        shared.update_state();
    }

    pub fn set_loop(&self, looping: bool) {
        self.shared.transport.set_looping(looping);
        self.shared.update_state();
    }

    pub fn looping(&self) -> bool {
        self.shared.transport.looping()
    }

    pub fn set_start(&self, start: i64) {
        let shared = &self.shared;
        shared.transport.set_start(Some(shared.to_ticks(start)));
        shared.update_state();
    }

    pub fn start(&self) -> Option<i64> {
        self.shared.to_units(self.shared.transport.start())
    }

    pub fn set_duration(&self, duration: i64) {
        let shared = &self.shared;
        shared.transport.set_duration(Some(shared.to_ticks(duration)));
        shared.update_state();
    }

    pub fn duration(&self) -> Option<i64> {
        self.shared.to_units(self.shared.transport.duration())
    }

    /// Position of the last delivered frame, 0 before the first
    pub fn time(&self) -> i64 {
        self.shared.time()
    }

    /// Length of the whole input, when known
    pub fn file_duration(&self) -> Option<i64> {
        self.shared.to_units(self.shared.transport.input_duration())
    }

    /// Monitor snapshot (`file/name`, `file/path`, `file/clip`, `file/time`,
    /// `file/streams/<n>/fps`, `loop`)
    pub fn state(&self) -> Value {
        Value::Object(self.shared.monitor.lock().unwrap().clone())
    }

    pub fn display_name(&self) -> String {
        self.shared.print()
    }

    /// True once the current clip has been fully buffered
    pub fn is_eof(&self) -> bool {
        self.shared.buffer_eof.load(Ordering::Acquire)
    }

    /// Total number of underflows since creation
    pub fn underflow_count(&self) -> u64 {
        self.shared.underflows.load(Ordering::Relaxed)
    }

    pub fn format(&self) -> &VideoFormatDesc {
        &self.shared.format
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.buffer.notify();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("{} worker panicked", self.shared.print());
            }
        }

        debug!("{} Joined", self.shared.print());
    }
}
