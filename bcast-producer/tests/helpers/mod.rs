//! Test helpers for producer integration tests
//!
//! - `synthetic`: scripted demuxer, codecs, frame factory and filter backend
//! - `audio_generator`: WAV files for the symphonia input

#![allow(dead_code)]

pub mod audio_generator;
pub mod synthetic;

pub use audio_generator::generate_sine_wav;
pub use synthetic::{
    CountingFactory, FailingBackend, ScriptedCodecs, SyntheticInput, SAMPLES_PER_FRAME, SAMPLE_RATE,
};

use bcast_common::format::{VideoField, VideoFormat, VideoFormatDesc};
use bcast_common::telemetry::TelemetryBus;
use bcast_producer::frame::ComposedFrame;
use bcast_producer::{Backends, DrawFrame, Producer, ProducerOptions};
use std::time::{Duration, Instant};

/// Poll interval used while waiting on a producer
pub const POLL: Duration = Duration::from_millis(2);

pub fn progressive_25() -> VideoFormatDesc {
    VideoFormatDesc::new(VideoFormat::X1080p2500)
}

pub fn options(name: &str) -> ProducerOptions {
    ProducerOptions {
        name: name.to_string(),
        path: format!("synthetic://{}", name),
        ..Default::default()
    }
}

pub fn start(format: VideoFormatDesc, options: ProducerOptions, backends: Backends) -> Producer {
    Producer::new(format, options, backends, TelemetryBus::default()).unwrap()
}

/// One delivered frame and the producer time right after it
pub struct Delivered {
    pub frame: DrawFrame,
    pub time: i64,
}

impl Delivered {
    pub fn composed(&self) -> &ComposedFrame {
        self.frame.downcast_ref::<ComposedFrame>().unwrap()
    }
}

/// Poll `next_frame` until `count` frames arrived or `timeout` elapsed
pub fn collect(producer: &Producer, count: usize, timeout: Duration) -> Vec<Delivered> {
    let deadline = Instant::now() + timeout;
    let mut frames = Vec::with_capacity(count);
    while frames.len() < count && Instant::now() < deadline {
        match producer.next_frame(VideoField::Progressive) {
            Some(frame) => frames.push(Delivered {
                frame,
                time: producer.time(),
            }),
            None => std::thread::sleep(POLL),
        }
    }
    frames
}

/// Poll `next_frame` for `window`, counting delivered frames
pub fn drain_for(producer: &Producer, window: Duration) -> usize {
    let deadline = Instant::now() + window;
    let mut delivered = 0;
    while Instant::now() < deadline {
        if producer.next_frame(VideoField::Progressive).is_some() {
            delivered += 1;
        } else {
            std::thread::sleep(POLL);
        }
    }
    delivered
}
