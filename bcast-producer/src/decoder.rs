//! Per-stream decode worker
//!
//! Each open elementary stream gets one [`Decoder`]: a bounded packet queue
//! in front of a codec, a bounded frame queue behind it, and a dedicated
//! thread moving data between the two.
//!
//! ```text
//! push(Packet) ──▶ [input ≤ 2] ──▶ decode thread ──▶ [output ≤ 8] ──▶ pop()
//! ```
//!
//! The producer worker never blocks on a decoder: it checks
//! [`Decoder::want_packet`] before pushing and treats an empty
//! [`Decoder::pop`] as "not ready yet". Only the decode thread blocks, on an
//! empty input queue or a full output queue, and it abandons either wait as
//! soon as the decoder is dropped.

use crate::error::{Error, Result};
use crate::media::{Codec, CodecFactory, DecodeStatus, DecodedFrame, MediaType, Packet, StreamInfo};
use bcast_common::params::PARAMS;
use bcast_common::timing::{rescale_q, Rational};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// How long a blocked decode thread sleeps before re-checking the stop flag
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Interlaced frames wider than this are always top field first
const FORCE_TFF_MIN_WIDTH: u32 = 1024;

/// Microsecond unit used for the frame-rate duration guess
const MICROS: Rational = Rational::new(1, 1_000_000);

struct InputQueue {
    packets: VecDeque<Packet>,
    /// Demuxer reached end of input; drain the codec once packets run out
    flush: bool,
}

/// Shared state between the owner and the decode thread
struct SharedDecoderState {
    input: Mutex<InputQueue>,
    input_cond: Condvar,

    output: Mutex<VecDeque<DecodedFrame>>,
    output_cond: Condvar,

    input_capacity: usize,
    output_capacity: usize,

    eof: AtomicBool,
    stop_flag: AtomicBool,

    /// Fatal codec error, reported by the next `pop`
    error: Mutex<Option<Error>>,
}

/// Decoder for one elementary stream
pub struct Decoder {
    stream_index: usize,
    media_type: MediaType,
    time_base: Rational,
    framerate: Option<Rational>,
    state: Arc<SharedDecoderState>,
    thread: Option<JoinHandle<()>>,
}

impl Decoder {
    /// Open a decoder with queue capacities from [`PARAMS`]
    pub fn new(stream: &StreamInfo, codecs: &dyn CodecFactory) -> Result<Self> {
        Self::with_capacity(
            stream,
            codecs,
            PARAMS.decoder_input_capacity(),
            PARAMS.decoder_output_capacity(),
        )
    }

    /// Open a decoder with explicit queue capacities
    pub fn with_capacity(
        stream: &StreamInfo,
        codecs: &dyn CodecFactory,
        input_capacity: usize,
        output_capacity: usize,
    ) -> Result<Self> {
        let codec = codecs.open(stream, PARAMS.threads())?;

        let framerate = codec
            .framerate()
            .or_else(|| stream.video().and_then(|v| v.frame_rate))
            .filter(|r| r.is_valid());

        let state = Arc::new(SharedDecoderState {
            input: Mutex::new(InputQueue {
                packets: VecDeque::with_capacity(input_capacity),
                flush: false,
            }),
            input_cond: Condvar::new(),
            output: Mutex::new(VecDeque::with_capacity(output_capacity)),
            output_cond: Condvar::new(),
            input_capacity: input_capacity.max(1),
            output_capacity: output_capacity.max(1),
            eof: AtomicBool::new(false),
            stop_flag: AtomicBool::new(false),
            error: Mutex::new(None),
        });

        let worker = DecodeWorker {
            stream_index: stream.index,
            media_type: stream.media_type(),
            time_base: stream.time_base,
            framerate,
            codec,
            next_pts: None,
            state: Arc::clone(&state),
        };

        let handle = thread::Builder::new()
            .name(format!("decoder-{}", stream.index))
            .spawn(move || worker.run())?;

        debug!(
            "Decoder opened for {} stream {} (time_base={}, capacity={}/{})",
            stream.media_type(),
            stream.index,
            stream.time_base,
            input_capacity,
            output_capacity
        );

        Ok(Self {
            stream_index: stream.index,
            media_type: stream.media_type(),
            time_base: stream.time_base,
            framerate,
            state,
            thread: Some(handle),
        })
    }

    /// True iff the input queue has room and end of stream was not reached
    pub fn want_packet(&self) -> bool {
        if self.state.eof.load(Ordering::Acquire) {
            return false;
        }
        let input = self.state.input.lock().unwrap();
        !input.flush && input.packets.len() < self.state.input_capacity
    }

    /// Queue a packet; `None` means no more input will follow
    ///
    /// Ignored once the decoder reached end of stream. Callers check
    /// [`want_packet`](Self::want_packet) first so the queue stays bounded.
    pub fn push(&self, packet: Option<Packet>) {
        if self.state.eof.load(Ordering::Acquire) {
            return;
        }

        {
            let mut input = self.state.input.lock().unwrap();
            match packet {
                Some(packet) => input.packets.push_back(packet),
                None => input.flush = true,
            }
        }

        self.state.input_cond.notify_all();
    }

    /// Take the next decoded frame without blocking
    ///
    /// Returns `Ok(None)` when nothing is ready. After end of stream, once the
    /// queue is drained, every call returns a terminal frame.
    pub fn pop(&self) -> Result<Option<DecodedFrame>> {
        let frame = self.state.output.lock().unwrap().pop_front();

        if let Some(frame) = frame {
            self.state.output_cond.notify_all();
            return Ok(Some(frame));
        }

        if let Some(e) = self.state.error.lock().unwrap().take() {
            return Err(e);
        }

        if self.state.eof.load(Ordering::Acquire) {
            return Ok(Some(DecodedFrame::terminal(None)));
        }

        Ok(None)
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Frame rate guessed at open time
    pub fn framerate(&self) -> Option<Rational> {
        self.framerate
    }

    pub fn is_eof(&self) -> bool {
        self.state.eof.load(Ordering::Acquire)
    }

    /// Packets waiting to be decoded
    pub fn input_len(&self) -> usize {
        self.state.input.lock().unwrap().packets.len()
    }

    /// Decoded frames waiting to be popped
    pub fn output_len(&self) -> usize {
        self.state.output.lock().unwrap().len()
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.state.stop_flag.store(true, Ordering::Release);
        self.state.input_cond.notify_all();
        self.state.output_cond.notify_all();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Decoder thread for stream {} panicked", self.stream_index);
            }
        }
    }
}

/// State owned by the decode thread
struct DecodeWorker {
    stream_index: usize,
    media_type: MediaType,
    time_base: Rational,
    framerate: Option<Rational>,
    codec: Box<dyn Codec>,
    /// Predicted pts of the frame after the last one emitted
    next_pts: Option<i64>,
    state: Arc<SharedDecoderState>,
}

impl DecodeWorker {
    fn run(mut self) {
        match self.decode_loop() {
            Ok(()) => debug!("Decoder for stream {} reached end of stream", self.stream_index),
            Err(Error::Interrupted) => {}
            Err(e) => {
                error!("Decoder for stream {} failed: {}", self.stream_index, e);
                *self.state.error.lock().unwrap() = Some(e);
                self.state.eof.store(true, Ordering::Release);
            }
        }
    }

    fn decode_loop(&mut self) -> Result<()> {
        while !self.stopped() {
            match self.codec.receive_frame()? {
                DecodeStatus::NeedInput => {
                    let packet = self.wait_for_input()?;
                    self.codec.send_packet(packet.as_ref())?;
                }
                DecodeStatus::Eof => {
                    self.codec.flush();
                    let terminal = DecodedFrame::terminal(self.next_pts.take());
                    self.push_output(terminal)?;
                    self.state.eof.store(true, Ordering::Release);
                    return Ok(());
                }
                DecodeStatus::Frame(frame) => {
                    let frame = self.normalize(frame);
                    self.push_output(frame)?;
                }
            }
        }

        Err(Error::Interrupted)
    }

    fn stopped(&self) -> bool {
        self.state.stop_flag.load(Ordering::Acquire)
    }

    /// Block until a packet (or the flush marker) is available
    fn wait_for_input(&self) -> Result<Option<Packet>> {
        let mut input = self.state.input.lock().unwrap();
        loop {
            if self.stopped() {
                return Err(Error::Interrupted);
            }
            if let Some(packet) = input.packets.pop_front() {
                return Ok(Some(packet));
            }
            if input.flush {
                input.flush = false;
                return Ok(None);
            }
            input = self
                .state
                .input_cond
                .wait_timeout(input, WAIT_SLICE)
                .unwrap()
                .0;
        }
    }

    /// Block while the output queue is full, then enqueue
    fn push_output(&self, frame: DecodedFrame) -> Result<()> {
        let mut output = self.state.output.lock().unwrap();
        while output.len() >= self.state.output_capacity {
            if self.stopped() {
                return Err(Error::Interrupted);
            }
            output = self
                .state
                .output_cond
                .wait_timeout(output, WAIT_SLICE)
                .unwrap()
                .0;
        }
        output.push_back(frame);
        Ok(())
    }

    /// Settle pts and duration of a freshly decoded frame
    fn normalize(&mut self, mut frame: DecodedFrame) -> DecodedFrame {
        if let Some(plane) = frame.video_plane_mut() {
            if plane.width > FORCE_TFF_MIN_WIDTH && plane.interlaced {
                plane.top_field_first = true;
            }
        }

        frame.pts = frame.best_effort_timestamp;

        let duration = match frame.duration.filter(|d| *d > 0) {
            Some(d) => Some(d),
            None => self.guess_duration(&frame),
        };
        frame.duration = duration;

        self.next_pts = match (frame.pts, duration) {
            (Some(pts), Some(d)) => Some(pts + d),
            _ => None,
        };

        frame
    }

    /// Duration from the frame rate (video) or sample count (audio), in the
    /// stream timebase
    fn guess_duration(&self, frame: &DecodedFrame) -> Option<i64> {
        let duration = match self.media_type {
            MediaType::Video => {
                let rate = self.framerate?;
                let ticks_per_frame = self.codec.ticks_per_frame().max(1);
                let ticks = self
                    .codec
                    .repeat_pict()
                    .map(|r| r as i64 + 1)
                    .unwrap_or(ticks_per_frame);
                let micros = 1_000_000 * rate.den * ticks / rate.num / ticks_per_frame;
                rescale_q(micros, MICROS, self.time_base)
            }
            MediaType::Audio => {
                let samples = frame.audio_samples()?;
                if samples.sample_rate == 0 {
                    return None;
                }
                rescale_q(
                    samples.nb_samples() as i64,
                    Rational::new(1, samples.sample_rate as i64),
                    self.time_base,
                )
            }
            _ => return None,
        };

        Some(duration).filter(|d| *d > 0)
    }
}
