//! Concrete implementations of the collaborator traits
//!
//! - [`native`]: pure-Rust filter graphs for linear filter chains
//! - [`symphonia`]: audio file demuxing and decoding

pub mod native;
pub mod symphonia;

pub use self::native::NativeBackend;
pub use self::symphonia::{SymphoniaCodecs, SymphoniaDemuxer};
