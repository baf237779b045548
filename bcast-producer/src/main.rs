//! bcast-play - plays a media file against a channel format
//!
//! Pulls frames from a [`Producer`] at the channel's real-time cadence and
//! logs progress. Useful to exercise the pipeline without a mixer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bcast_common::config::resolve_config;
use bcast_common::format::{VideoField, VideoFormat, VideoFormatDesc};
use bcast_common::params::PARAMS;
use bcast_common::telemetry::{self, TelemetryBus, TelemetryEvent};
use bcast_producer::{Backends, Producer, ProducerOptions, Seekable};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for bcast-play
#[derive(Parser, Debug)]
#[command(name = "bcast-play")]
#[command(about = "Play a media file through the bcast producer pipeline")]
#[command(version)]
struct Args {
    /// Input file
    path: PathBuf,

    /// Channel format (e.g. 1080i5000, 720p5994)
    #[arg(short, long, default_value = "1080p2500", env = "BCAST_FORMAT")]
    format: VideoFormat,

    /// Video filter description
    #[arg(long = "vf", default_value = "")]
    vfilter: String,

    /// Audio filter description
    #[arg(long = "af", default_value = "")]
    afilter: String,

    /// Clip start, in channel frames
    #[arg(long)]
    start: Option<i64>,

    /// First position to play, in channel frames
    #[arg(long)]
    seek: Option<i64>,

    /// Clip length, in channel frames
    #[arg(long)]
    duration: Option<i64>,

    /// Restart at the clip start when the end is reached
    #[arg(long = "loop")]
    looping: bool,

    /// Whether the input may be seeked (never, yes, auto)
    #[arg(long, default_value = "auto")]
    seekable: Seekable,

    /// Stop after this many channel frames
    #[arg(long)]
    frames: Option<u64>,

    /// Config file path
    #[arg(short, long, env = "BCAST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = resolve_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("bcast_producer=debug,bcast_common={}", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    PARAMS.apply(&config.producer);

    let format = VideoFormatDesc::new(args.format);
    info!(
        "Playing {} as {} ({} Hz output)",
        args.path.display(),
        format.name,
        format.hz
    );

    let backends = Backends::open_file(&args.path)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;

    let name = args
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.path.display().to_string());

    let options = ProducerOptions {
        name,
        path: args.path.display().to_string(),
        vfilter: args.vfilter.clone(),
        afilter: args.afilter.clone(),
        start: args.start,
        seek: args.seek,
        duration: args.duration,
        looping: args.looping,
        seekable: args.seekable,
    };

    let bus = TelemetryBus::default();
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TelemetryEvent::Tag { source, channel, .. }) if channel == telemetry::UNDERFLOW => {
                    debug!("{}: underflow", source);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("Telemetry lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let producer = Producer::new(format.clone(), options, backends, bus)
        .context("Failed to start producer")?;

    let period = Duration::from_secs_f64(1.0 / format.hz);
    let mut ticker = tokio::time::interval(period);
    let report_every = format.hz.round().max(1.0) as u64;
    let mut ticks: u64 = 0;
    let mut delivered: u64 = 0;
    let mut idle: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
        }

        let field = match (format.is_interlaced(), ticks % 2) {
            (false, _) => VideoField::Progressive,
            (true, 0) => VideoField::A,
            (true, _) => VideoField::B,
        };

        if producer.next_frame(field).is_some() {
            delivered += 1;
            idle = 0;
        } else {
            idle += 1;
        }
        ticks += 1;

        if ticks % report_every == 0 {
            info!(
                "{} delivered {}/{} underflows {}",
                producer.display_name(),
                delivered,
                ticks,
                producer.underflow_count()
            );
        }

        if args.frames.is_some_and(|limit| ticks >= limit) {
            break;
        }

        if producer.is_eof() && !producer.looping() && idle > report_every {
            info!("{} reached end of clip", producer.display_name());
            break;
        }
    }

    debug!("Final state: {}", producer.state());
    // Joins the worker and decoder threads
    tokio::task::spawn_blocking(move || drop(producer))
        .await
        .context("Failed to stop producer")?;
    info!("Done");
    Ok(())
}
