//! Audio filters: `aresample`, `asetnsamples`, `amerge`
//!
//! All audio inside a native graph is interleaved S32.

use super::{Ended, Link, MergeStage, Options, Stage};
use crate::error::{Error, Result};
use crate::media::{AudioSamples, DecodedFrame, MediaType};
use bcast_common::timing::{rescale_q, Rational};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::VecDeque;
use tracing::{debug, warn};

const I32_SCALE: f32 = 2_147_483_648.0;

/// Input frames per resampler call
const RESAMPLE_CHUNK: usize = 1024;

/// Longest gap filled with silence; larger jumps are treated as a clock
/// discontinuity and the output simply continues
const MAX_PAD_SECONDS: i64 = 10;

fn audio_frame(pts: Option<i64>, sample_rate: u32, channels: u16, data: Vec<i32>, duration: i64) -> DecodedFrame {
    let mut frame = DecodedFrame::audio(
        pts,
        AudioSamples {
            sample_rate,
            channels,
            data,
        },
    );
    frame.duration = Some(duration);
    frame
}

// ============================================================================
// aresample
// ============================================================================

/// Sample rate converter with timestamp compensation
///
/// Output timestamps are continuous at the output rate. When compensation is
/// enabled and an input frame's timestamp drifts from the expected position by
/// more than `min_comp` seconds, silence is inserted or samples are dropped
/// so the output stays aligned to the input clock. `first_pts` (in input
/// samples) fixes where the output must begin.
pub(crate) struct Aresample {
    out_rate: Option<u32>,
    compensate: bool,
    min_comp: f64,
    first_pts: Option<i64>,

    input_time_base: Rational,
    in_rate: u32,
    channels: u16,

    /// Next expected input position, in input samples
    expected: Option<i64>,
    /// Next output timestamp, in output samples
    out_next: Option<i64>,

    resampler: Option<FastFixedIn<f32>>,
    /// Planar input waiting for a full chunk
    pending: Vec<Vec<f32>>,
    /// Leading output samples still to discard (resampler delay)
    skip_out: usize,
    total_in: u64,
    total_out: u64,
}

impl Aresample {
    pub fn new(options: &Options) -> Result<Self> {
        let opts = options.resolve(
            "aresample",
            &[
                "sample_rate",
                "async",
                "first_pts",
                "min_comp",
                "min_hard_comp",
                "osr",
                "out_sample_rate",
            ],
        )?;

        let out_rate = opts.parse::<u32>(&["osr", "out_sample_rate", "sample_rate"])?;
        let async_rate = opts.parse::<f64>(&["async"])?.unwrap_or(0.0);
        let min_comp = opts.parse::<f64>(&["min_comp"])?;
        let first_pts = opts.parse::<i64>(&["first_pts"])?;
        opts.parse::<f64>(&["min_hard_comp"])?;

        if out_rate == Some(0) {
            return Err(Error::Filter("aresample: output rate must be positive".to_string()));
        }

        Ok(Self {
            out_rate,
            compensate: async_rate > 0.0 || min_comp.is_some(),
            min_comp: min_comp.unwrap_or(0.001),
            first_pts,
            input_time_base: Rational::new(1, 1),
            in_rate: 0,
            channels: 0,
            expected: None,
            out_next: None,
            resampler: None,
            pending: Vec::new(),
            skip_out: 0,
            total_in: 0,
            total_out: 0,
        })
    }

    fn out_rate(&self) -> u32 {
        self.out_rate.unwrap_or(self.in_rate)
    }

    fn ratio(&self) -> f64 {
        self.out_rate() as f64 / self.in_rate as f64
    }

    /// Emit interleaved output, advancing the output clock
    fn emit(&mut self, data: Vec<i32>, out: &mut Vec<DecodedFrame>) {
        let channels = self.channels.max(1) as usize;
        let n = data.len() / channels;
        if n == 0 {
            return;
        }
        let pts = self.out_next;
        self.out_next = pts.map(|p| p + n as i64);
        self.total_out += n as u64;
        out.push(audio_frame(pts, self.out_rate(), self.channels, data, n as i64));
    }

    /// Emit planar resampler output, dropping the leading delay
    fn emit_planar(&mut self, mut planar: Vec<Vec<f32>>, limit: Option<u64>, out: &mut Vec<DecodedFrame>) {
        let available = planar.first().map(Vec::len).unwrap_or(0);
        let skip = self.skip_out.min(available);
        self.skip_out -= skip;

        let mut end = available;
        if let Some(limit) = limit {
            let room = limit.saturating_sub(self.total_out) as usize;
            end = end.min(skip + room);
        }
        if end <= skip {
            return;
        }
        for channel in planar.iter_mut() {
            channel.truncate(end);
        }

        let data = interleave(&planar, skip);
        self.emit(data, out);
    }

    fn run_resampler(&mut self, out: &mut Vec<DecodedFrame>) -> Result<()> {
        while self.pending.first().map(Vec::len).unwrap_or(0) >= RESAMPLE_CHUNK {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|c| c.drain(..RESAMPLE_CHUNK).collect())
                .collect();
            let Some(resampler) = self.resampler.as_mut() else {
                return Ok(());
            };
            let planar = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Filter(format!("aresample: {}", e)))?;
            self.emit_planar(planar, None, out);
        }
        Ok(())
    }
}

impl Stage for Aresample {
    fn name(&self) -> &'static str {
        "aresample"
    }

    fn configure(&mut self, input: &Link) -> Result<Link> {
        input.expect("aresample", MediaType::Audio)?;
        if input.sample_rate == 0 || input.channels == 0 {
            return Err(Error::Filter(format!("aresample: invalid input {}", input)));
        }

        self.input_time_base = input.time_base;
        self.in_rate = input.sample_rate;
        self.channels = input.channels;

        let out_rate = self.out_rate();
        if out_rate != self.in_rate {
            let resampler = FastFixedIn::<f32>::new(
                self.ratio(),
                1.0,
                PolynomialDegree::Septic,
                RESAMPLE_CHUNK,
                input.channels as usize,
            )
            .map_err(|e| Error::Filter(format!("aresample: {}", e)))?;
            self.skip_out = resampler.output_delay();
            self.resampler = Some(resampler);
            self.pending = vec![Vec::new(); input.channels as usize];
            debug!("aresample: {} Hz -> {} Hz ({} channels)", self.in_rate, out_rate, self.channels);
        }

        let mut output = input.clone();
        output.sample_rate = out_rate;
        output.time_base = Rational::new(1, out_rate as i64);
        Ok(output)
    }

    fn push(&mut self, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        let Some(samples) = frame.audio_samples() else {
            return Ok(());
        };
        let channels = self.channels as usize;
        if samples.channels != self.channels {
            return Err(Error::Filter(format!(
                "aresample: channel count changed from {} to {}",
                self.channels, samples.channels
            )));
        }

        let in_unit = Rational::new(1, self.in_rate as i64);
        let pts = frame.pts.map(|p| rescale_q(p, self.input_time_base, in_unit));

        let mut expected = match self.expected {
            Some(e) => e,
            None => {
                let start = self.first_pts.or(pts).unwrap_or(0);
                self.out_next = Some(rescale_q(start, in_unit, Rational::new(1, self.out_rate() as i64)));
                start
            }
        };

        let mut data = samples.data.clone();
        if let (true, Some(pts)) = (self.compensate, pts) {
            let delta = pts - expected;
            let threshold = (self.min_comp * self.in_rate as f64) as i64;
            let max_pad = MAX_PAD_SECONDS * self.in_rate as i64;
            if delta > max_pad {
                warn!(
                    "aresample: timestamp jump of {} samples, not padding",
                    delta
                );
                expected = pts;
            } else if delta.abs() > threshold {
                if delta > 0 {
                    debug!("aresample: padding {} samples of silence", delta);
                    let mut padded = vec![0i32; delta as usize * channels];
                    padded.extend_from_slice(&data);
                    data = padded;
                } else {
                    let trim = ((-delta) as usize).min(data.len() / channels);
                    debug!("aresample: dropping {} samples", trim);
                    data.drain(..trim * channels);
                }
            }
        }

        let n = data.len() / channels;
        self.expected = Some(expected + n as i64);
        if n == 0 {
            return Ok(());
        }

        if self.resampler.is_none() {
            self.emit(data, out);
            return Ok(());
        }

        self.total_in += n as u64;
        for frame in data.chunks_exact(channels) {
            for (c, sample) in frame.iter().enumerate() {
                self.pending[c].push(*sample as f32 / I32_SCALE);
            }
        }
        self.run_resampler(out)
    }

    fn finish(&mut self, eof_pts: Option<i64>, out: &mut Vec<DecodedFrame>) -> Result<Option<i64>> {
        if self.resampler.is_some() {
            let target = (self.total_in as f64 * self.ratio()).round() as u64;

            let pending = std::mem::take(&mut self.pending);
            if pending.first().is_some_and(|c| !c.is_empty()) {
                let planar = self
                    .resampler
                    .as_mut()
                    .map(|r| r.process_partial(Some(pending.as_slice()), None))
                    .transpose()
                    .map_err(|e| Error::Filter(format!("aresample: {}", e)))?;
                if let Some(planar) = planar {
                    self.emit_planar(planar, Some(target), out);
                }
            }

            // Drain the resampler's internal delay
            for _ in 0..4 {
                if self.total_out >= target {
                    break;
                }
                let Some(resampler) = self.resampler.as_mut() else {
                    break;
                };
                let planar = resampler
                    .process_partial(None::<&[Vec<f32>]>, None)
                    .map_err(|e| Error::Filter(format!("aresample: {}", e)))?;
                self.emit_planar(planar, Some(target), out);
            }
        }

        Ok(self.out_next.or_else(|| {
            eof_pts.map(|p| rescale_q(p, self.input_time_base, Rational::new(1, self.out_rate().max(1) as i64)))
        }))
    }
}

fn interleave(planar: &[Vec<f32>], skip: usize) -> Vec<i32> {
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    let mut data = Vec::with_capacity(frames.saturating_sub(skip) * planar.len());
    for i in skip..frames {
        for channel in planar {
            data.push((channel[i] * I32_SCALE).clamp(i32::MIN as f32, i32::MAX as f32) as i32);
        }
    }
    data
}

// ============================================================================
// asetnsamples
// ============================================================================

/// Repackage audio into frames of exactly `nb_out_samples`
pub(crate) struct Asetnsamples {
    nb_out_samples: usize,
    pad: bool,
    link: Option<Link>,
    fifo: Vec<i32>,
    fifo_pts: Option<i64>,
}

impl Asetnsamples {
    pub fn new(options: &Options) -> Result<Self> {
        let opts = options.resolve("asetnsamples", &["nb_out_samples", "pad", "n", "p"])?;
        let nb_out_samples = opts.parse::<usize>(&["nb_out_samples", "n"])?.unwrap_or(1024);
        let pad = opts.parse::<i64>(&["pad", "p"])?.unwrap_or(1) != 0;

        if nb_out_samples == 0 {
            return Err(Error::Filter("asetnsamples: n must be positive".to_string()));
        }

        Ok(Self {
            nb_out_samples,
            pad,
            link: None,
            fifo: Vec::new(),
            fifo_pts: None,
        })
    }

    fn emit(&mut self, mut data: Vec<i32>, out: &mut Vec<DecodedFrame>) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let channels = link.channels.max(1) as usize;
        let n = data.len() / channels;
        if self.pad && n < self.nb_out_samples {
            data.resize(self.nb_out_samples * channels, 0);
        }
        let duration = rescale_q(n as i64, Rational::new(1, link.sample_rate as i64), link.time_base);
        let pts = self.fifo_pts;
        self.fifo_pts = pts.map(|p| p + duration);
        out.push(audio_frame(pts, link.sample_rate, link.channels, data, duration));
    }
}

impl Stage for Asetnsamples {
    fn name(&self) -> &'static str {
        "asetnsamples"
    }

    fn configure(&mut self, input: &Link) -> Result<Link> {
        input.expect("asetnsamples", MediaType::Audio)?;
        if input.sample_rate == 0 || input.channels == 0 {
            return Err(Error::Filter(format!("asetnsamples: invalid input {}", input)));
        }
        self.link = Some(input.clone());
        Ok(input.clone())
    }

    fn push(&mut self, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        let Some(samples) = frame.audio_samples() else {
            return Ok(());
        };
        if self.fifo.is_empty() {
            self.fifo_pts = frame.pts;
        }
        self.fifo.extend_from_slice(&samples.data);

        let chunk = self.nb_out_samples * samples.channels.max(1) as usize;
        while self.fifo.len() >= chunk {
            let data: Vec<i32> = self.fifo.drain(..chunk).collect();
            self.emit(data, out);
        }
        Ok(())
    }

    fn finish(&mut self, eof_pts: Option<i64>, out: &mut Vec<DecodedFrame>) -> Result<Option<i64>> {
        if !self.fifo.is_empty() {
            let data = std::mem::take(&mut self.fifo);
            self.emit(data, out);
        }
        Ok(self.fifo_pts.or(eof_pts))
    }
}

// ============================================================================
// amerge
// ============================================================================

/// Merge N audio inputs into one stream carrying all their channels
pub(crate) struct Amerge {
    inputs: usize,
    links: Vec<Link>,
    queues: Vec<VecDeque<i32>>,
    closed: Vec<bool>,
    sample_rate: u32,
    channels: u16,
    out_pts: Option<i64>,
}

impl Amerge {
    /// Number of input pads declared by `options`
    pub fn input_count(options: &Options) -> Result<usize> {
        let opts = options.resolve("amerge", &["inputs"])?;
        let inputs = opts.parse::<usize>(&["inputs"])?.unwrap_or(2);
        if !(1..=64).contains(&inputs) {
            return Err(Error::Filter(format!("amerge: invalid inputs {}", inputs)));
        }
        Ok(inputs)
    }

    pub fn new(options: &Options) -> Result<Self> {
        let inputs = Self::input_count(options)?;
        Ok(Self {
            inputs,
            links: Vec::new(),
            queues: vec![VecDeque::new(); inputs],
            closed: vec![false; inputs],
            sample_rate: 0,
            channels: 0,
            out_pts: None,
        })
    }

    fn available(&self, pad: usize) -> usize {
        self.queues[pad].len() / self.links[pad].channels.max(1) as usize
    }

    fn drain(&mut self, out: &mut Vec<DecodedFrame>) {
        let n = (0..self.inputs).map(|pad| self.available(pad)).min().unwrap_or(0);
        if n == 0 {
            return;
        }

        let mut data = Vec::with_capacity(n * self.channels as usize);
        for _ in 0..n {
            for (pad, queue) in self.queues.iter_mut().enumerate() {
                data.extend(queue.drain(..self.links[pad].channels as usize));
            }
        }

        let pts = self.out_pts;
        self.out_pts = pts.map(|p| p + n as i64);
        out.push(audio_frame(pts, self.sample_rate, self.channels, data, n as i64));
    }
}

impl MergeStage for Amerge {
    fn name(&self) -> &'static str {
        "amerge"
    }

    fn configure(&mut self, inputs: &[Link]) -> Result<Link> {
        if inputs.len() != self.inputs {
            return Err(Error::Filter(format!(
                "amerge: {} inputs declared, {} connected",
                self.inputs,
                inputs.len()
            )));
        }
        for link in inputs {
            link.expect("amerge", MediaType::Audio)?;
        }

        let sample_rate = inputs[0].sample_rate;
        if let Some(other) = inputs.iter().find(|l| l.sample_rate != sample_rate) {
            return Err(Error::Filter(format!(
                "amerge: inputs must share one sample rate ({} vs {})",
                sample_rate, other.sample_rate
            )));
        }

        self.channels = inputs.iter().map(|l| l.channels).sum();
        self.sample_rate = sample_rate;
        self.links = inputs.to_vec();

        let mut output = inputs[0].clone();
        output.channels = self.channels;
        output.time_base = Rational::new(1, sample_rate.max(1) as i64);
        Ok(output)
    }

    fn push(&mut self, pad: usize, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        let Some(samples) = frame.audio_samples() else {
            return Ok(());
        };
        if self.out_pts.is_none() {
            self.out_pts = frame
                .pts
                .map(|p| rescale_q(p, self.links[pad].time_base, Rational::new(1, self.sample_rate as i64)));
        }
        self.queues[pad].extend(samples.data.iter().copied());
        self.drain(out);
        Ok(())
    }

    fn close(
        &mut self,
        pad: usize,
        _eof_pts: Option<i64>,
        out: &mut Vec<DecodedFrame>,
    ) -> Result<Option<Ended>> {
        self.closed[pad] = true;
        self.drain(out);

        let exhausted = (0..self.inputs).any(|p| self.closed[p] && self.available(p) == 0);
        Ok(exhausted.then_some(Ended(self.out_pts)))
    }

    fn needs_input(&self, pad: usize) -> bool {
        !self.closed[pad] && self.queues[pad].is_empty()
    }
}
