//! # bcast Producer Library
//!
//! Plays a media file into a broadcast channel as a stream of synchronized
//! video + audio frames.
//!
//! **Pipeline:** Demuxer → per-stream Decoder threads → per-media-type
//! FilterGraph → synchronizer → bounded Buffer → [`Producer`] facade
//!
//! Containers, codecs and filters sit behind the traits in [`media`];
//! [`backend`] provides a software filter engine and a symphonia based
//! audio input.

pub mod backend;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod frame;
pub mod media;
pub mod producer;

pub use error::{Error, Result};
pub use frame::{DrawFrame, FrameFactory};
pub use producer::{Backends, Producer, ProducerOptions, Seekable};
