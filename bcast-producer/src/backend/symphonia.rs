//! Audio file input through symphonia
//!
//! [`SymphoniaDemuxer`] exposes every track of a probed file as a stream;
//! [`SymphoniaCodecs`] opens symphonia decoders for those streams and hands
//! out interleaved S32 frames.

use crate::error::{Error, Result};
use crate::media::{
    AudioParams, AudioSamples, Codec, CodecFactory, CodecParams, DecodeStatus, DecodedFrame, Demuxed,
    Demuxer, Disposition, MediaType, Packet, StreamInfo,
};
use bcast_common::timing::{rescale_q, ticks_to_seconds, Rational, TICK_BASE};
use ::symphonia::core::audio::SampleBuffer;
use ::symphonia::core::codecs::{CodecParameters, Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL};
use ::symphonia::core::errors::Error as SymphoniaError;
use ::symphonia::core::formats::{FormatOptions, FormatReader, Packet as SymphoniaPacket, SeekMode, SeekTo};
use ::symphonia::core::io::MediaSourceStream;
use ::symphonia::core::meta::MetadataOptions;
use ::symphonia::core::probe::Hint;
use ::symphonia::core::units::Time;
use std::path::Path;
use tracing::{debug, warn};

/// Container reader over a local file
pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    /// symphonia track id of each stream, by stream index
    track_ids: Vec<u32>,
    codec_params: Vec<CodecParameters>,
    start_time: Option<i64>,
    duration: Option<i64>,
    eof_reported: bool,
    aborted: bool,
}

impl SymphoniaDemuxer {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Demux(format!("Failed to open {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = ::symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Demux(format!("Failed to probe {}: {}", path.display(), e)))?;
        let format = probed.format;

        let default_track = format.default_track().map(|t| t.id);
        let mut streams = Vec::new();
        let mut track_ids = Vec::new();
        let mut codec_params = Vec::new();
        let mut start_time: Option<i64> = None;
        let mut duration: Option<i64> = None;

        for (index, track) in format.tracks().iter().enumerate() {
            let params = &track.codec_params;
            let time_base = match (params.time_base, params.sample_rate) {
                (Some(tb), _) => Rational::new(tb.numer as i64, tb.denom as i64),
                (None, Some(sr)) => Rational::new(1, sr as i64),
                (None, None) => Rational::new(1, 1),
            };

            let codec = match params.sample_rate {
                Some(sample_rate) if params.codec != CODEC_TYPE_NULL => CodecParams::Audio(AudioParams {
                    sample_rate,
                    channels: params.channels.map(|c| c.count() as u16).unwrap_or(0),
                }),
                _ => CodecParams::Other(MediaType::Data),
            };

            let track_start = params.start_ts as i64;
            let track_duration = params.n_frames.map(|n| n as i64);

            if time_base.is_valid() {
                let start_ticks = rescale_q(track_start, time_base, TICK_BASE);
                start_time = Some(start_time.map_or(start_ticks, |s| s.min(start_ticks)));
                if let Some(d) = track_duration {
                    let ticks = rescale_q(d, time_base, TICK_BASE);
                    duration = Some(duration.map_or(ticks, |cur| cur.max(ticks)));
                }
            }

            streams.push(StreamInfo {
                index,
                time_base,
                start_time: Some(track_start),
                duration: track_duration,
                disposition: if Some(track.id) == default_track {
                    Disposition::DEFAULT
                } else {
                    Disposition::NONE
                },
                params: codec,
            });
            track_ids.push(track.id);
            codec_params.push(params.clone());
        }

        debug!(
            "Opened {}: {} streams, duration {:.3}s",
            path.display(),
            streams.len(),
            duration.map(ticks_to_seconds).unwrap_or(0.0)
        );

        Ok(Self {
            format,
            streams,
            track_ids,
            codec_params,
            start_time,
            duration,
            eof_reported: false,
            aborted: false,
        })
    }

    /// Codec factory for this file's streams
    pub fn codec_factory(&self) -> SymphoniaCodecs {
        SymphoniaCodecs {
            tracks: self
                .track_ids
                .iter()
                .copied()
                .zip(self.codec_params.iter().cloned())
                .collect(),
        }
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    fn duration(&self) -> Option<i64> {
        self.duration
    }

    fn try_pop(&mut self) -> Result<Option<Demuxed>> {
        if self.aborted {
            return Ok(None);
        }

        loop {
            match self.format.next_packet() {
                Ok(packet) => {
                    let Some(stream_index) = self.track_ids.iter().position(|id| *id == packet.track_id()) else {
                        continue;
                    };
                    return Ok(Some(Demuxed::Packet(Packet {
                        stream_index,
                        pts: Some(packet.ts() as i64),
                        dts: Some(packet.ts() as i64),
                        duration: Some(packet.dur() as i64),
                        data: packet.buf().to_vec(),
                    })));
                }
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if self.eof_reported {
                        return Ok(None);
                    }
                    self.eof_reported = true;
                    return Ok(Some(Demuxed::Eof));
                }
                Err(e) => return Err(Error::Demux(format!("Error reading packet: {}", e))),
            }
        }
    }

    fn seek(&mut self, ticks: i64) -> Result<()> {
        self.eof_reported = false;
        let seconds = ticks_to_seconds(ticks.max(0));
        if let Err(e) = self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::from(seconds),
                track_id: None,
            },
        ) {
            warn!("Seek to {:.3}s failed: {}", seconds, e);
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

/// Opens symphonia decoders for the tracks of one file
#[derive(Clone)]
pub struct SymphoniaCodecs {
    tracks: Vec<(u32, CodecParameters)>,
}

impl CodecFactory for SymphoniaCodecs {
    fn open(&self, stream: &StreamInfo, _threads: usize) -> Result<Box<dyn Codec>> {
        let (track_id, params) = self
            .tracks
            .get(stream.index)
            .ok_or_else(|| Error::Codec(format!("No track for stream {}", stream.index)))?;

        let decoder = ::symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Codec(format!("Failed to create decoder: {}", e)))?;

        Ok(Box::new(SymphoniaCodec {
            decoder,
            track_id: *track_id,
            ready: None,
            draining: false,
        }))
    }
}

struct SymphoniaCodec {
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    ready: Option<DecodedFrame>,
    draining: bool,
}

impl Codec for SymphoniaCodec {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };

        let input = SymphoniaPacket::new_from_slice(
            self.track_id,
            packet.pts.unwrap_or(0).max(0) as u64,
            packet.duration.unwrap_or(0).max(0) as u64,
            &packet.data,
        );

        match self.decoder.decode(&input) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);

                self.ready = Some(DecodedFrame::audio(
                    packet.pts,
                    AudioSamples {
                        sample_rate: spec.rate,
                        channels: spec.channels.count() as u16,
                        data: buffer.samples().to_vec(),
                    },
                ));
                Ok(())
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Decode error (packet skipped): {}", e);
                Ok(())
            }
            Err(e) => Err(Error::Codec(e.to_string())),
        }
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        if let Some(frame) = self.ready.take() {
            return Ok(DecodeStatus::Frame(frame));
        }
        if self.draining {
            return Ok(DecodeStatus::Eof);
        }
        Ok(DecodeStatus::NeedInput)
    }

    fn flush(&mut self) {
        self.decoder.reset();
        self.ready = None;
        self.draining = false;
    }
}
