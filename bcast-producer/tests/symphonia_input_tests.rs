//! Producer over a real WAV file decoded by symphonia

mod helpers;

use bcast_common::format::{VideoFormat, VideoFormatDesc};
use bcast_producer::backend::SymphoniaDemuxer;
use bcast_producer::media::{Demuxer, MediaType};
use bcast_producer::{Backends, Error};
use helpers::*;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn one_second_wav(dir: &TempDir, sample_rate: u32) -> std::path::PathBuf {
    let path = dir.path().join(format!("tone_{}.wav", sample_rate));
    generate_sine_wav(&path, sample_rate, sample_rate, 440.0).unwrap();
    path
}

#[test]
fn test_demuxer_describes_wav() {
    let dir = TempDir::new().unwrap();
    let path = one_second_wav(&dir, 48_000);

    let demuxer = SymphoniaDemuxer::open(&path).unwrap();
    let streams = demuxer.streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].media_type(), MediaType::Audio);

    let audio = streams[0].audio().unwrap();
    assert_eq!(audio.sample_rate, 48_000);
    assert_eq!(audio.channels, 2);

    assert_eq!(demuxer.start_time(), Some(0));
    assert_eq!(demuxer.duration(), Some(bcast_common::TICK_RATE));
}

#[test]
fn test_missing_file_is_a_demux_error() {
    let result = Backends::open_file(Path::new("/nonexistent/clip.wav"));
    assert!(matches!(result, Err(Error::Demux(_))));
}

#[test]
fn test_plays_wav_as_audio_only_frames() {
    let dir = TempDir::new().unwrap();
    let path = one_second_wav(&dir, 48_000);

    let backends = Backends::open_file(&path).unwrap();
    let producer = start(progressive_25(), options("tone"), backends);

    let frames = collect(&producer, 30, Duration::from_secs(10));
    assert_eq!(frames.len(), 25);

    for (n, delivered) in frames.iter().enumerate() {
        assert_eq!(delivered.time, n as i64);
        let composed = delivered.composed();
        assert!(composed.video.is_none());
        let audio = composed.audio.as_ref().unwrap();
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.nb_samples(), SAMPLES_PER_FRAME);
    }

    // Tone is audible, not padding
    let middle = frames[12].composed().audio.as_ref().unwrap();
    assert!(middle.data.iter().any(|s| s.unsigned_abs() > 1 << 24));

    assert_eq!(producer.file_duration(), Some(25));
    assert!(producer.is_eof());
}

#[test]
fn test_resamples_cd_rate_to_channel_rate() {
    let dir = TempDir::new().unwrap();
    let path = one_second_wav(&dir, 44_100);

    let backends = Backends::open_file(&path).unwrap();
    let format = VideoFormatDesc::new(VideoFormat::X1080p2500);
    let producer = start(format, options("cd"), backends);

    let frames = collect(&producer, 30, Duration::from_secs(10));
    assert!(frames.len() >= 24, "only {} frames", frames.len());

    for delivered in &frames[..24] {
        let audio = delivered.composed().audio.as_ref().unwrap();
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.nb_samples(), SAMPLES_PER_FRAME);
    }
}
