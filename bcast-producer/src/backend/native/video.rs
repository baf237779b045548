//! Video filters: `bwdif`, `fps`, `alphamerge`

use super::{Ended, Link, MergeStage, Options, Stage};
use crate::error::{Error, Result};
use crate::media::{DecodedFrame, MediaType, PixelFormat, VideoPlane};
use bcast_common::timing::{rescale_q, Rational};
use std::collections::VecDeque;
use std::sync::Arc;

// ============================================================================
// bwdif
// ============================================================================

/// Field-rate deinterlacer
///
/// Output timebase is half the input timebase. In `send_field` mode every
/// frame that needs deinterlacing becomes two progressive frames, one per
/// field period. Pictures are passed through unchanged; only timing and the
/// interlaced flag are rewritten.
pub(crate) struct Bwdif {
    send_field: bool,
    all_frames: bool,
    input: Option<Link>,
}

impl Bwdif {
    pub fn new(options: &Options) -> Result<Self> {
        let opts = options.resolve("bwdif", &["mode", "parity", "deint"])?;

        let send_field = match opts.get("mode").unwrap_or("send_field") {
            "send_field" | "1" => true,
            "send_frame" | "0" => false,
            other => return Err(Error::Filter(format!("bwdif: invalid mode '{}'", other))),
        };
        match opts.get("parity").unwrap_or("auto") {
            "auto" | "tff" | "bff" | "-1" | "0" | "1" => {}
            other => return Err(Error::Filter(format!("bwdif: invalid parity '{}'", other))),
        }
        let all_frames = match opts.get("deint").unwrap_or("all") {
            "all" | "0" => true,
            "interlaced" | "1" => false,
            other => return Err(Error::Filter(format!("bwdif: invalid deint '{}'", other))),
        };

        Ok(Self {
            send_field,
            all_frames,
            input: None,
        })
    }

    /// Length of one input frame in input timebase units
    fn frame_duration(&self, frame: &DecodedFrame) -> Option<i64> {
        if let Some(d) = frame.duration.filter(|d| *d > 0) {
            return Some(d);
        }
        let link = self.input.as_ref()?;
        link.frame_rate
            .is_valid()
            .then(|| rescale_q(1, link.frame_rate.inv(), link.time_base))
            .filter(|d| *d > 0)
    }
}

impl Stage for Bwdif {
    fn name(&self) -> &'static str {
        "bwdif"
    }

    fn configure(&mut self, input: &Link) -> Result<Link> {
        input.expect("bwdif", MediaType::Video)?;
        let mut output = input.clone();
        output.time_base = Rational::new(input.time_base.num, input.time_base.den * 2).reduced();
        if self.send_field && input.frame_rate.is_valid() {
            output.frame_rate = Rational::new(input.frame_rate.num * 2, input.frame_rate.den).reduced();
        }
        self.input = Some(input.clone());
        Ok(output)
    }

    fn push(&mut self, mut frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        let interlaced = frame.video_plane().map(|v| v.interlaced).unwrap_or(false);
        let deinterlace = self.all_frames || interlaced;
        let duration = self.frame_duration(&frame);

        frame.pts = frame.pts.map(|p| p * 2);
        frame.best_effort_timestamp = frame.pts;
        frame.duration = duration.map(|d| d * 2);

        if !deinterlace {
            out.push(frame);
            return Ok(());
        }

        if let Some(plane) = frame.video_plane_mut() {
            plane.interlaced = false;
        }

        match (self.send_field, frame.pts, duration) {
            (true, Some(pts), Some(d)) => {
                let mut first = frame.clone();
                first.duration = Some(d);
                let mut second = frame;
                second.pts = Some(pts + d);
                second.best_effort_timestamp = second.pts;
                second.duration = Some(d);
                out.push(first);
                out.push(second);
            }
            _ => out.push(frame),
        }
        Ok(())
    }

    fn finish(&mut self, eof_pts: Option<i64>, _out: &mut Vec<DecodedFrame>) -> Result<Option<i64>> {
        Ok(eof_pts.map(|p| p * 2))
    }
}

// ============================================================================
// fps
// ============================================================================

/// Constant frame rate converter
///
/// Output timestamps count frames at the target rate. A frame is emitted at
/// every output slot before the next input frame's timestamp, so frames are
/// duplicated to fill gaps and dropped when several land in one slot.
pub(crate) struct Fps {
    rate: Rational,
    start_time: Option<f64>,
    input_time_base: Rational,
    output_time_base: Rational,
    next_pts: Option<i64>,
    /// At most two pending frames, timestamps in output units
    frames: VecDeque<DecodedFrame>,
    /// The front frame was emitted at least once
    front_emitted: bool,
    dropped: u64,
    duplicated: u64,
}

impl Fps {
    pub fn new(options: &Options) -> Result<Self> {
        let opts = options.resolve("fps", &["fps", "start_time", "round", "eof_action"])?;
        let rate = opts.rational("fps")?.unwrap_or(Rational::new(25, 1));
        let start_time = opts.parse::<f64>(&["start_time"])?;

        match opts.get("round").unwrap_or("near") {
            "near" | "zero" | "inf" | "down" | "up" => {}
            other => return Err(Error::Filter(format!("fps: invalid round '{}'", other))),
        }
        match opts.get("eof_action").unwrap_or("round") {
            "round" | "pass" => {}
            other => return Err(Error::Filter(format!("fps: invalid eof_action '{}'", other))),
        }

        Ok(Self {
            rate,
            start_time,
            input_time_base: Rational::new(1, 1),
            output_time_base: rate.inv(),
            next_pts: None,
            frames: VecDeque::with_capacity(2),
            front_emitted: false,
            dropped: 0,
            duplicated: 0,
        })
    }

    fn emit_front(&mut self, out: &mut Vec<DecodedFrame>) -> bool {
        let (Some(front), Some(next)) = (self.frames.front(), self.next_pts) else {
            return false;
        };
        let mut frame = front.clone();
        frame.pts = Some(next);
        frame.best_effort_timestamp = Some(next);
        frame.duration = Some(1);
        out.push(frame);

        if self.front_emitted {
            self.duplicated += 1;
        }
        self.front_emitted = true;
        self.next_pts = Some(next + 1);
        true
    }
}

impl Stage for Fps {
    fn name(&self) -> &'static str {
        "fps"
    }

    fn configure(&mut self, input: &Link) -> Result<Link> {
        input.expect("fps", MediaType::Video)?;
        self.input_time_base = input.time_base;
        let mut output = input.clone();
        output.time_base = self.output_time_base;
        output.frame_rate = self.rate;
        Ok(output)
    }

    fn push(&mut self, mut frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        let Some(pts) = frame.pts else {
            self.dropped += 1;
            return Ok(());
        };
        let pts = rescale_q(pts, self.input_time_base, self.output_time_base);
        frame.pts = Some(pts);

        if self.next_pts.is_none() {
            self.next_pts = Some(match self.start_time {
                Some(start) => rescale_q(
                    (start * 1e6).round() as i64,
                    Rational::new(1, 1_000_000),
                    self.output_time_base,
                ),
                None => pts,
            });
        }

        self.frames.push_back(frame);

        while self.frames.len() >= 2 {
            let next = self.next_pts.unwrap_or(pts);
            let second = self.frames[1].pts.unwrap_or(i64::MIN);
            if second <= next {
                if !self.front_emitted {
                    self.dropped += 1;
                }
                self.frames.pop_front();
                self.front_emitted = false;
            } else {
                self.emit_front(out);
            }
        }
        Ok(())
    }

    fn finish(&mut self, eof_pts: Option<i64>, out: &mut Vec<DecodedFrame>) -> Result<Option<i64>> {
        let end = match eof_pts {
            Some(p) => Some(rescale_q(p, self.input_time_base, self.output_time_base)),
            None => self.frames.back().and_then(|f| f.pts).map(|p| p + 1),
        };

        if let Some(end) = end {
            while self.next_pts.is_some_and(|n| n < end) && self.emit_front(out) {}
        }
        self.frames.clear();

        tracing::trace!(
            "fps: {} frames dropped, {} duplicated",
            self.dropped,
            self.duplicated
        );
        Ok(self.next_pts.or(end))
    }
}

// ============================================================================
// alphamerge
// ============================================================================

/// Replace the alpha of the first input with the luma of the second
pub(crate) struct Alphamerge {
    output_format: Option<PixelFormat>,
    main: VecDeque<DecodedFrame>,
    alpha: VecDeque<Vec<u8>>,
    last_alpha: Option<Vec<u8>>,
    main_closed: bool,
    alpha_closed: bool,
}

impl Alphamerge {
    pub fn new(options: &Options) -> Result<Self> {
        options.resolve("alphamerge", &[])?;
        Ok(Self {
            output_format: None,
            main: VecDeque::new(),
            alpha: VecDeque::new(),
            last_alpha: None,
            main_closed: false,
            alpha_closed: false,
        })
    }

    fn alpha_variant(format: PixelFormat) -> Option<PixelFormat> {
        match format {
            PixelFormat::Yuv420p => Some(PixelFormat::Yuva420p),
            PixelFormat::Yuv422p => Some(PixelFormat::Yuva422p),
            PixelFormat::Yuv444p => Some(PixelFormat::Yuva444p),
            PixelFormat::Rgb24 => Some(PixelFormat::Rgba),
            PixelFormat::Bgr24 => Some(PixelFormat::Bgra),
            f if f.has_alpha() => Some(f),
            _ => None,
        }
    }

    /// Merge every main frame that has an alpha picture available
    fn drain(&mut self, out: &mut Vec<DecodedFrame>) {
        while !self.main.is_empty() {
            let alpha = match self.alpha.pop_front() {
                Some(a) => {
                    self.last_alpha = Some(a.clone());
                    Some(a)
                }
                None if self.alpha_closed => self.last_alpha.clone(),
                None => return,
            };
            let Some(mut frame) = self.main.pop_front() else {
                return;
            };
            if let (Some(format), Some(plane)) = (self.output_format, frame.video_plane_mut()) {
                *plane = merge_alpha(plane, format, alpha.as_deref());
            }
            out.push(frame);
        }
    }
}

impl MergeStage for Alphamerge {
    fn name(&self) -> &'static str {
        "alphamerge"
    }

    fn configure(&mut self, inputs: &[Link]) -> Result<Link> {
        let [main, alpha] = inputs else {
            return Err(Error::Filter("alphamerge: requires exactly 2 inputs".to_string()));
        };
        main.expect("alphamerge", MediaType::Video)?;
        alpha.expect("alphamerge", MediaType::Video)?;

        if (main.width, main.height) != (alpha.width, alpha.height) {
            return Err(Error::Filter(format!(
                "alphamerge: input sizes differ ({}x{} vs {}x{})",
                main.width, main.height, alpha.width, alpha.height
            )));
        }

        let format = main
            .pixel_format
            .and_then(Self::alpha_variant)
            .ok_or_else(|| {
                Error::Filter(format!(
                    "alphamerge: unsupported main format {}",
                    main.pixel_format.map(|p| p.name()).unwrap_or("none")
                ))
            })?;
        self.output_format = Some(format);

        let mut output = main.clone();
        output.pixel_format = Some(format);
        Ok(output)
    }

    fn push(&mut self, pad: usize, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> Result<()> {
        match pad {
            0 => self.main.push_back(frame),
            _ => {
                if let Some(plane) = frame.video_plane() {
                    self.alpha.push_back(luma_of(plane));
                }
            }
        }
        self.drain(out);
        Ok(())
    }

    fn close(
        &mut self,
        pad: usize,
        eof_pts: Option<i64>,
        out: &mut Vec<DecodedFrame>,
    ) -> Result<Option<Ended>> {
        match pad {
            0 => self.main_closed = true,
            _ => self.alpha_closed = true,
        }

        if self.main_closed {
            // Remaining main frames take the freshest alpha seen
            self.alpha_closed = true;
            self.drain(out);
            return Ok(Some(Ended(eof_pts)));
        }

        self.drain(out);
        Ok(None)
    }

    fn needs_input(&self, pad: usize) -> bool {
        match pad {
            0 => !self.main_closed && self.main.is_empty(),
            _ => !self.alpha_closed && self.alpha.is_empty(),
        }
    }
}

/// Luma plane of any supported picture, `width * height` bytes
fn luma_of(plane: &VideoPlane) -> Vec<u8> {
    let pixels = (plane.width * plane.height) as usize;
    let data = &plane.data[..];

    let packed = |stride: usize, rgb: [usize; 3]| -> Vec<u8> {
        data.chunks_exact(stride)
            .take(pixels)
            .map(|px| ((px[rgb[0]] as u16 + px[rgb[1]] as u16 + px[rgb[2]] as u16) / 3) as u8)
            .collect()
    };

    let mut luma = match plane.format {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => packed(3, [0, 1, 2]),
        PixelFormat::Rgba | PixelFormat::Bgra => packed(4, [0, 1, 2]),
        PixelFormat::Argb | PixelFormat::Abgr => packed(4, [1, 2, 3]),
        PixelFormat::Uyvy422 => data.iter().skip(1).step_by(2).take(pixels).copied().collect(),
        _ => data.iter().take(pixels).copied().collect(),
    };
    luma.resize(pixels, 0);
    luma
}

/// Attach `alpha` to `plane` as `format`; missing alpha means opaque
fn merge_alpha(plane: &VideoPlane, format: PixelFormat, alpha: Option<&[u8]>) -> VideoPlane {
    let pixels = (plane.width * plane.height) as usize;
    let opaque = vec![255u8; pixels];
    let alpha = alpha.filter(|a| a.len() == pixels).unwrap_or(&opaque);
    let src = &plane.data[..];

    let data: Vec<u8> = match (plane.format, format) {
        (PixelFormat::Rgb24, _) | (PixelFormat::Bgr24, _) => src
            .chunks_exact(3)
            .zip(alpha)
            .flat_map(|(px, a)| [px[0], px[1], px[2], *a])
            .collect(),
        (PixelFormat::Rgba, _) | (PixelFormat::Bgra, _) | (PixelFormat::Argb, _) | (PixelFormat::Abgr, _) => {
            let index = if matches!(plane.format, PixelFormat::Argb | PixelFormat::Abgr) { 0 } else { 3 };
            let mut data = src.to_vec();
            for (px, a) in data.chunks_exact_mut(4).zip(alpha) {
                px[index] = *a;
            }
            data
        }
        (main, _) if main.has_alpha() => {
            // Planar with alpha: alpha is the last plane
            let mut data = src.to_vec();
            let offset = data.len().saturating_sub(pixels);
            let n = data.len() - offset;
            data[offset..].copy_from_slice(&alpha[..n]);
            data
        }
        _ => {
            let mut data = src.to_vec();
            data.extend_from_slice(alpha);
            data
        }
    };

    VideoPlane {
        width: plane.width,
        height: plane.height,
        format,
        data: Arc::from(data),
        interlaced: plane.interlaced,
        top_field_first: plane.top_field_first,
        sample_aspect_ratio: plane.sample_aspect_ratio,
    }
}
