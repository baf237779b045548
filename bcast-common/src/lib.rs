//! # bcast Common Library
//!
//! Shared code for the bcast producer pipeline:
//! - Tick-based global timebase and rational rescaling
//! - Channel video format table (frame rate, fields, audio cadence)
//! - Configuration loading and process-wide parameters
//! - Telemetry bus (fire-and-forget diagnostic channels)
//! - Common error type

pub mod config;
pub mod error;
pub mod format;
pub mod params;
pub mod telemetry;
pub mod timing;

pub use error::{Error, Result};
pub use format::{VideoField, VideoFormat, VideoFormatDesc};
pub use timing::{Rational, TICK_RATE};
