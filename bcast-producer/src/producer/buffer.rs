//! Bounded frame FIFO between the worker and the facade
//!
//! The worker is the only writer and blocks while the buffer is full; the
//! facade pops under the same lock and never blocks. The last delivered
//! frame (the still cache) and the underflow latency counter live under that
//! lock too, so a delivery and its bookkeeping are observed together.

use crate::error::{Error, Result};
use crate::frame::DrawFrame;
use crate::media::DecodedFrame;
use bcast_common::format::VideoFormatDesc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How long a blocked push sleeps before re-checking for shutdown or seek
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// One synchronized output unit
#[derive(Debug, Clone)]
pub struct Frame {
    pub video: Option<DecodedFrame>,
    pub audio: Option<DecodedFrame>,
    /// Displayable content built from `video` and `audio`
    pub frame: DrawFrame,
    /// Demuxer start offset subtracted from `pts`, in ticks
    pub start_time: i64,
    /// Presentation time in ticks, relative to the media start
    pub pts: Option<i64>,
    /// Ticks
    pub duration: i64,
    /// Sequence number within the current epoch
    pub frame_count: i64,
}

/// Last delivered frame, repeated when nothing new is ready
#[derive(Debug, Clone, Default)]
pub struct StillFrame {
    pub frame: DrawFrame,
    pub pts: Option<i64>,
    pub duration: i64,
}

impl StillFrame {
    pub fn latch(frame: &Frame) -> Self {
        Self {
            frame: frame.frame.clone(),
            pts: frame.pts,
            duration: frame.duration,
        }
    }
}

#[derive(Debug, Default)]
pub struct BufferState {
    pub frames: VecDeque<Frame>,
    pub still: Option<StillFrame>,
    /// Consecutive underflows since the last delivery, `None` when none
    pub latency: Option<u64>,
}

/// Frame FIFO with blocking backpressure on the writer side
#[derive(Debug)]
pub struct Buffer {
    state: Mutex<BufferState>,
    space: Condvar,
    capacity: usize,
}

/// Buffer depth for a channel: a quarter second of output units, at least 2
pub fn capacity_for(format: &VideoFormatDesc) -> usize {
    ((format.hz / 4.0) as usize).max(2)
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                frames: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
            space: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap()
    }

    /// Append a frame, waiting for space
    ///
    /// Returns `Ok(false)` when the frame was discarded because
    /// `seek_pending` reported a seek waiting to be applied, and
    /// `Err(Interrupted)` once `stop` is raised.
    pub fn push(&self, frame: Frame, stop: &AtomicBool, seek_pending: impl Fn() -> bool) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        while state.frames.len() >= self.capacity {
            if stop.load(Ordering::Acquire) {
                return Err(Error::Interrupted);
            }
            if seek_pending() {
                return Ok(false);
            }
            state = self.space.wait_timeout(state, WAIT_SLICE).unwrap().0;
        }

        if seek_pending() {
            return Ok(false);
        }

        state.frames.push_back(frame);
        Ok(true)
    }

    /// Drop every queued frame and wake the writer
    pub fn clear(&self) {
        self.state.lock().unwrap().frames.clear();
        self.space.notify_all();
    }

    /// Wake a writer waiting for space
    pub fn notify(&self) {
        self.space.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill level in `[0, 1]` for a known length
    pub fn ratio(&self, len: usize) -> f64 {
        len as f64 / self.capacity as f64
    }

    pub fn fill_ratio(&self) -> f64 {
        self.ratio(self.len())
    }
}
