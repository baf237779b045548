//! Cross-thread transport commands
//!
//! Facade calls (seek, loop, start, duration) land here and are picked up by
//! the worker once per iteration. Every field is an independent atomic; an
//! unset time is stored as [`UNSET`].
//!
//! All times are ticks of the global timebase. Seek targets are relative to
//! the media start; the worker adds the demuxer start offset when applying.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Sentinel for "no value"
const UNSET: i64 = i64::MIN;

fn load(cell: &AtomicI64) -> Option<i64> {
    match cell.load(Ordering::Acquire) {
        UNSET => None,
        v => Some(v),
    }
}

fn store(cell: &AtomicI64, value: Option<i64>) {
    cell.store(value.unwrap_or(UNSET), Ordering::Release);
}

/// Atomic transport state shared by the facade and the worker
#[derive(Debug)]
pub struct TransportState {
    start: AtomicI64,
    duration: AtomicI64,
    input_duration: AtomicI64,
    seek: AtomicI64,
    /// Timestamp of the last delivered frame
    frame_time: AtomicI64,
    /// Duration of the last delivered frame
    frame_duration: AtomicI64,
    looping: AtomicBool,
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TransportState {
    pub fn new(looping: bool) -> Self {
        Self {
            start: AtomicI64::new(UNSET),
            duration: AtomicI64::new(UNSET),
            input_duration: AtomicI64::new(UNSET),
            seek: AtomicI64::new(UNSET),
            frame_time: AtomicI64::new(UNSET),
            frame_duration: AtomicI64::new(0),
            looping: AtomicBool::new(looping),
        }
    }

    /// Request a seek; replaces any request not yet applied
    pub fn post_seek(&self, target: i64) {
        self.seek.store(target, Ordering::Release);
    }

    /// Take the pending seek target, clearing it
    pub fn take_seek(&self) -> Option<i64> {
        match self.seek.swap(UNSET, Ordering::AcqRel) {
            UNSET => None,
            v => Some(v),
        }
    }

    pub fn seek_pending(&self) -> bool {
        self.seek.load(Ordering::Acquire) != UNSET
    }

    pub fn start(&self) -> Option<i64> {
        load(&self.start)
    }

    pub fn set_start(&self, start: Option<i64>) {
        store(&self.start, start);
    }

    pub fn duration(&self) -> Option<i64> {
        load(&self.duration)
    }

    pub fn set_duration(&self, duration: Option<i64>) {
        store(&self.duration, duration);
    }

    pub fn input_duration(&self) -> Option<i64> {
        load(&self.input_duration)
    }

    pub fn set_input_duration(&self, duration: Option<i64>) {
        store(&self.input_duration, duration);
    }

    /// Set the input duration unless one is already known
    pub fn init_input_duration(&self, duration: Option<i64>) {
        if let Some(d) = duration {
            let _ = self
                .input_duration
                .compare_exchange(UNSET, d, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    pub fn looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    pub fn frame_time(&self) -> Option<i64> {
        load(&self.frame_time)
    }

    pub fn frame_duration(&self) -> i64 {
        self.frame_duration.load(Ordering::Acquire)
    }

    /// Latch the position of the frame just delivered
    pub fn set_frame(&self, time: Option<i64>, duration: i64) {
        store(&self.frame_time, time);
        self.frame_duration.store(duration, Ordering::Release);
    }

    pub fn set_frame_time(&self, time: Option<i64>) {
        store(&self.frame_time, time);
    }

    /// Playback window `[start, end)`; `end` is `None` when unbounded
    pub fn window(&self) -> (i64, Option<i64>) {
        let start = self.start().unwrap_or(0);
        let end = self.duration().map(|d| start.saturating_add(d));
        (start, end)
    }
}
