use super::*;
use crate::media::{AudioSamples, VideoPlane};
use std::sync::Arc;

fn video_source(stream_index: usize, pad: usize, height: u32, format: PixelFormat) -> SourceSpec {
    SourceSpec {
        pad,
        stream_index,
        name: format!("in_{}", stream_index),
        params: SourceParams::Video {
            width: 4,
            height,
            pixel_format: format,
            time_base: Rational::new(1, 25),
            sample_aspect_ratio: Rational::new(1, 1),
            frame_rate: Some(Rational::new(25, 1)),
        },
    }
}

fn audio_source(stream_index: usize, pad: usize, sample_rate: u32, channels: u16) -> SourceSpec {
    SourceSpec {
        pad,
        stream_index,
        name: format!("in_{}", stream_index),
        params: SourceParams::Audio {
            time_base: Rational::new(1, sample_rate as i64),
            sample_rate,
            channels,
        },
    }
}

fn video_frame(pts: i64, height: u32, format: PixelFormat, fill: u8, interlaced: bool) -> DecodedFrame {
    let mut frame = DecodedFrame::video(
        Some(pts),
        VideoPlane {
            width: 4,
            height,
            format,
            data: Arc::from(vec![fill; format.buffer_size(4, height)]),
            interlaced,
            top_field_first: true,
            sample_aspect_ratio: Rational::new(1, 1),
        },
    );
    frame.duration = Some(1);
    frame
}

fn audio_frame(pts: i64, sample_rate: u32, channels: u16, nb_samples: usize, value: i32) -> DecodedFrame {
    DecodedFrame::audio(
        Some(pts),
        AudioSamples {
            sample_rate,
            channels,
            data: vec![value; nb_samples * channels as usize],
        },
    )
}

fn video_sink() -> SinkSpec {
    SinkSpec::Video {
        pixel_formats: PixelFormat::SINK_FORMATS.to_vec(),
    }
}

fn drain(graph: &mut dyn CompiledGraph, nb_samples: Option<usize>) -> (Vec<DecodedFrame>, bool) {
    let mut frames = Vec::new();
    loop {
        match graph.pull(nb_samples).unwrap() {
            PullStatus::Frame(f) => frames.push(f),
            PullStatus::Again => return (frames, false),
            PullStatus::Eof => return (frames, true),
        }
    }
}

#[test]
fn test_parse_counts_pads() {
    let backend = NativeBackend::new();

    let parsed = backend.parse("null").unwrap();
    assert_eq!(parsed.inputs, vec![MediaType::Video]);
    assert_eq!(parsed.outputs, vec![MediaType::Video]);

    let parsed = backend.parse("amerge=inputs=3,anull,asetnsamples=n=1024:p=0").unwrap();
    assert_eq!(parsed.count_inputs(MediaType::Audio), 3);
    assert_eq!(parsed.outputs, vec![MediaType::Audio]);

    let parsed = backend.parse("alphamerge,fps=fps=25").unwrap();
    assert_eq!(parsed.count_inputs(MediaType::Video), 2);
}

#[test]
fn test_parse_rejects_malformed_chains() {
    let backend = NativeBackend::new();

    assert!(matches!(backend.parse("[in]null[out]"), Err(Error::Filter(_))));
    assert!(matches!(backend.parse("null;anull"), Err(Error::Filter(_))));
    assert!(matches!(backend.parse("scale=1280:720"), Err(Error::Filter(_))));
    assert!(matches!(backend.parse("null,,null"), Err(Error::Filter(_))));
    assert!(matches!(backend.parse("null,anull"), Err(Error::Filter(_))));
    assert!(matches!(backend.parse("anull,amerge"), Err(Error::Filter(_))));
    assert!(matches!(backend.parse("amerge=inputs=0"), Err(Error::Filter(_))));
}

#[test]
fn test_options_positional_and_named() {
    let options = Options::parse("50/1:start_time=1.5");
    let resolved = options.resolve("fps", &["fps", "start_time"]).unwrap();
    assert_eq!(resolved.rational("fps").unwrap(), Some(Rational::new(50, 1)));
    assert_eq!(resolved.parse::<f64>(&["start_time"]).unwrap(), Some(1.5));

    let unknown = Options::parse("bogus=1").resolve("fps", &["fps"]);
    assert!(unknown.is_err());

    let too_many = Options::parse("1:2:3").resolve("fps", &["fps", "start_time"]);
    assert!(too_many.is_err());
}

#[test]
fn test_null_graph_passes_frames_then_ends() {
    let mut graph = NativeBackend
        .build("null", &[video_source(0, 0, 4, PixelFormat::Yuv420p)], &video_sink())
        .unwrap();

    assert!(matches!(graph.pull(None).unwrap(), PullStatus::Again));
    assert_eq!(graph.failed_requests(0), 1);

    graph.write(0, video_frame(0, 4, PixelFormat::Yuv420p, 1, false)).unwrap();
    assert_eq!(graph.failed_requests(0), 0);
    graph.write(0, video_frame(1, 4, PixelFormat::Yuv420p, 2, false)).unwrap();
    graph.write(0, DecodedFrame::terminal(Some(2))).unwrap();

    let (frames, eof) = drain(graph.as_mut(), None);
    assert!(eof);
    assert_eq!(frames.iter().map(|f| f.pts).collect::<Vec<_>>(), vec![Some(0), Some(1)]);
    assert_eq!(graph.time_base(), Rational::new(1, 25));
}

#[test]
fn test_sink_rejects_unoffered_pixel_format() {
    let result = NativeBackend.build("null", &[video_source(0, 0, 4, PixelFormat::Gray8)], &video_sink());
    assert!(matches!(result, Err(Error::Filter(_))));
}

#[test]
fn test_fps_duplicates_to_double_rate() {
    let mut graph = NativeBackend
        .build(
            "fps=fps=50/1:start_time=0.000000",
            &[video_source(0, 0, 4, PixelFormat::Yuv420p)],
            &video_sink(),
        )
        .unwrap();

    for pts in 0..3 {
        graph.write(0, video_frame(pts, 4, PixelFormat::Yuv420p, pts as u8, false)).unwrap();
    }
    graph.close(0, Some(3)).unwrap();

    let (frames, eof) = drain(graph.as_mut(), None);
    assert!(eof);
    assert_eq!(graph.time_base(), Rational::new(1, 50));
    assert_eq!(graph.frame_rate(), Rational::new(50, 1));
    assert_eq!(
        frames.iter().map(|f| f.pts.unwrap()).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4, 5]
    );
    // Each input picture shows up twice
    let fills: Vec<u8> = frames.iter().map(|f| f.video_plane().unwrap().data[0]).collect();
    assert_eq!(fills, vec![0, 0, 1, 1, 2, 2]);
}

#[test]
fn test_fps_fills_from_start_time() {
    let mut graph = NativeBackend
        .build(
            "fps=fps=25:start_time=0.0",
            &[video_source(0, 0, 4, PixelFormat::Yuv420p)],
            &video_sink(),
        )
        .unwrap();

    // First picture arrives late; the gap before it repeats it
    graph.write(0, video_frame(2, 4, PixelFormat::Yuv420p, 7, false)).unwrap();
    graph.write(0, video_frame(3, 4, PixelFormat::Yuv420p, 8, false)).unwrap();
    graph.close(0, Some(4)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    let pts: Vec<i64> = frames.iter().map(|f| f.pts.unwrap()).collect();
    assert_eq!(pts, vec![0, 1, 2, 3]);
    assert_eq!(frames[0].video_plane().unwrap().data[0], 7);
    assert_eq!(frames[3].video_plane().unwrap().data[0], 8);
}

#[test]
fn test_bwdif_doubles_interlaced_frames() {
    let mut graph = NativeBackend
        .build(
            "null,bwdif=mode=send_field:parity=auto:deint=interlaced",
            &[video_source(0, 0, 4, PixelFormat::Yuv420p)],
            &video_sink(),
        )
        .unwrap();
    assert_eq!(graph.time_base(), Rational::new(1, 50));
    assert_eq!(graph.frame_rate(), Rational::new(50, 1));

    graph.write(0, video_frame(0, 4, PixelFormat::Yuv420p, 0, true)).unwrap();
    graph.write(0, video_frame(1, 4, PixelFormat::Yuv420p, 0, false)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    let pts: Vec<i64> = frames.iter().map(|f| f.pts.unwrap()).collect();
    assert_eq!(pts, vec![0, 1, 2]);
    assert!(frames.iter().all(|f| !f.video_plane().unwrap().interlaced));
    assert_eq!(frames[2].duration, Some(2));
}

#[test]
fn test_alphamerge_attaches_luma_as_alpha() {
    let sources = [
        video_source(0, 0, 4, PixelFormat::Yuv420p),
        video_source(1, 1, 4, PixelFormat::Yuv420p),
    ];
    let mut graph = NativeBackend.build("alphamerge", &sources, &video_sink()).unwrap();

    graph.write(0, video_frame(0, 4, PixelFormat::Yuv420p, 10, false)).unwrap();
    assert!(matches!(graph.pull(None).unwrap(), PullStatus::Again));
    // Only the alpha input is starving
    assert_eq!(graph.failed_requests(0), 0);
    assert_eq!(graph.failed_requests(1), 1);

    graph.write(1, video_frame(0, 4, PixelFormat::Yuv420p, 200, false)).unwrap();
    let (frames, _) = drain(graph.as_mut(), None);
    assert_eq!(frames.len(), 1);

    let plane = frames[0].video_plane().unwrap();
    assert_eq!(plane.format, PixelFormat::Yuva420p);
    assert_eq!(plane.data.len(), PixelFormat::Yuva420p.buffer_size(4, 4));
    assert_eq!(plane.data[0], 10);
    assert_eq!(*plane.data.last().unwrap(), 200);
}

#[test]
fn test_alphamerge_rejects_mismatched_sizes() {
    let sources = [
        video_source(0, 0, 4, PixelFormat::Yuv420p),
        video_source(1, 1, 2, PixelFormat::Yuv420p),
    ];
    assert!(matches!(
        NativeBackend.build("alphamerge", &sources, &video_sink()),
        Err(Error::Filter(_))
    ));
}

#[test]
fn test_audio_sink_exact_pulls_and_remainder() {
    let mut graph = NativeBackend
        .build(
            "anull",
            &[audio_source(1, 0, 48000, 2)],
            &SinkSpec::Audio { sample_rate: 48000 },
        )
        .unwrap();

    graph.write(1, audio_frame(0, 48000, 2, 1024, 5)).unwrap();
    graph.write(1, audio_frame(1024, 48000, 2, 1024, 5)).unwrap();

    let PullStatus::Frame(frame) = graph.pull(Some(1920)).unwrap() else {
        panic!("expected a frame");
    };
    assert_eq!(frame.nb_samples(), 1920);
    assert_eq!(frame.pts, Some(0));
    assert!(matches!(graph.pull(Some(1920)).unwrap(), PullStatus::Again));

    graph.close(1, Some(2048)).unwrap();
    let PullStatus::Frame(rest) = graph.pull(Some(1920)).unwrap() else {
        panic!("expected the remainder");
    };
    assert_eq!(rest.nb_samples(), 128);
    assert_eq!(rest.pts, Some(1920));
    assert!(matches!(graph.pull(Some(1920)).unwrap(), PullStatus::Eof));
}

#[test]
fn test_audio_sink_requires_channel_rate() {
    let result = NativeBackend.build(
        "anull",
        &[audio_source(1, 0, 44100, 2)],
        &SinkSpec::Audio { sample_rate: 48000 },
    );
    assert!(matches!(result, Err(Error::Filter(_))));
}

#[test]
fn test_aresample_pads_to_first_pts() {
    let mut graph = NativeBackend
        .build(
            "anull,aresample=async=1000:first_pts=0:min_comp=0.01:osr=48000,asetnsamples=n=1024:p=0",
            &[audio_source(1, 0, 48000, 2)],
            &SinkSpec::Audio { sample_rate: 48000 },
        )
        .unwrap();

    // Audio starts 960 samples (20 ms) late
    graph.write(1, audio_frame(960, 48000, 2, 1024, 9)).unwrap();
    graph.write(1, audio_frame(1984, 48000, 2, 1024, 9)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].pts, Some(0));
    assert_eq!(frames[1].pts, Some(1024));

    let first = frames[0].audio_samples().unwrap();
    assert_eq!(first.data[0], 0);
    assert_eq!(first.data[960 * 2], 9);
}

#[test]
fn test_aresample_drops_overlap() {
    let mut graph = NativeBackend
        .build(
            "aresample=async=1:min_comp=0.01",
            &[audio_source(1, 0, 48000, 1)],
            &SinkSpec::Audio { sample_rate: 48000 },
        )
        .unwrap();

    graph.write(1, audio_frame(0, 48000, 1, 1000, 1)).unwrap();
    // Overlaps the previous frame by 600 samples
    graph.write(1, audio_frame(400, 48000, 1, 1000, 2)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    let total: usize = frames.iter().map(|f| f.nb_samples()).sum();
    assert_eq!(total, 1400);
    assert_eq!(frames.last().unwrap().pts, Some(1000));
}

#[test]
fn test_aresample_converts_rate() {
    let mut graph = NativeBackend
        .build(
            "aresample=osr=48000",
            &[audio_source(1, 0, 44100, 2)],
            &SinkSpec::Audio { sample_rate: 48000 },
        )
        .unwrap();
    assert_eq!(graph.sample_rate(), 48000);

    for i in 0..10 {
        graph.write(1, audio_frame(i * 4410, 44100, 2, 4410, 1 << 20)).unwrap();
    }
    graph.close(1, Some(44100)).unwrap();

    let (frames, eof) = drain(graph.as_mut(), None);
    assert!(eof);
    let total: usize = frames.iter().map(|f| f.nb_samples()).sum();
    assert_eq!(total, 48000);
    assert_eq!(frames[0].pts, Some(0));
}

#[test]
fn test_amerge_interleaves_inputs() {
    let sources = [audio_source(1, 0, 48000, 2), audio_source(2, 1, 48000, 1)];
    let mut graph = NativeBackend
        .build("amerge=inputs=2", &sources, &SinkSpec::Audio { sample_rate: 48000 })
        .unwrap();

    graph.write(1, audio_frame(0, 48000, 2, 4, 1)).unwrap();
    graph.write(2, audio_frame(0, 48000, 1, 2, 3)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    assert_eq!(frames.len(), 1);
    let merged = frames[0].audio_samples().unwrap();
    assert_eq!(merged.channels, 3);
    assert_eq!(merged.data, vec![1, 1, 3, 1, 1, 3]);

    graph.close(2, None).unwrap();
    let (_, eof) = drain(graph.as_mut(), None);
    assert!(eof);
}

#[test]
fn test_writes_after_end_are_ignored() {
    let sources = [audio_source(1, 0, 48000, 1), audio_source(2, 1, 48000, 1)];
    let mut graph = NativeBackend
        .build("amerge", &sources, &SinkSpec::Audio { sample_rate: 48000 })
        .unwrap();

    graph.close(1, None).unwrap();
    graph.write(2, audio_frame(0, 48000, 1, 16, 1)).unwrap();
    assert!(matches!(graph.pull(None).unwrap(), PullStatus::Eof));
    assert!(graph.dump().contains("amerge"));
}

#[test]
fn test_alphamerge_replaces_existing_alpha_plane() {
    let sources = [
        video_source(0, 0, 4, PixelFormat::Yuva420p),
        video_source(1, 1, 4, PixelFormat::Yuv420p),
    ];
    let mut graph = NativeBackend.build("alphamerge", &sources, &video_sink()).unwrap();

    graph.write(0, video_frame(0, 4, PixelFormat::Yuva420p, 10, false)).unwrap();
    graph.write(1, video_frame(0, 4, PixelFormat::Yuv420p, 200, false)).unwrap();
    let (frames, _) = drain(graph.as_mut(), None);
    assert_eq!(frames.len(), 1);

    let plane = frames[0].video_plane().unwrap();
    let size = PixelFormat::Yuva420p.buffer_size(4, 4);
    assert_eq!(plane.format, PixelFormat::Yuva420p);
    assert_eq!(plane.data.len(), size);
    assert_eq!(plane.data[0], 10);
    assert!(plane.data[size - 16..].iter().all(|a| *a == 200));
    assert_eq!(plane.data[size - 17], 10);
}

#[test]
fn test_aresample_does_not_pad_huge_jumps() {
    let mut graph = NativeBackend
        .build(
            "aresample=async=1000:min_comp=0.01",
            &[audio_source(1, 0, 48000, 1)],
            &SinkSpec::Audio { sample_rate: 48000 },
        )
        .unwrap();

    graph.write(1, audio_frame(0, 48000, 1, 1000, 1)).unwrap();
    // A clock jump of an hour
    graph.write(1, audio_frame(48000 * 3600, 48000, 1, 1000, 2)).unwrap();
    // Continues from the new position
    graph.write(1, audio_frame(48000 * 3600 + 1000, 48000, 1, 1000, 3)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    let total: usize = frames.iter().map(|f| f.nb_samples()).sum();
    assert_eq!(total, 3000);
    assert_eq!(frames.last().unwrap().pts, Some(2000));
}

#[test]
fn test_aresample_pads_moderate_gaps() {
    let mut graph = NativeBackend
        .build(
            "aresample=async=1000:min_comp=0.01",
            &[audio_source(1, 0, 48000, 1)],
            &SinkSpec::Audio { sample_rate: 48000 },
        )
        .unwrap();

    graph.write(1, audio_frame(0, 48000, 1, 1000, 1)).unwrap();
    // One second missing
    graph.write(1, audio_frame(49000, 48000, 1, 1000, 2)).unwrap();

    let (frames, _) = drain(graph.as_mut(), None);
    let total: usize = frames.iter().map(|f| f.nb_samples()).sum();
    assert_eq!(total, 50000);
}
