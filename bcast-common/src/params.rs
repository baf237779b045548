//! Global parameter management
//!
//! Process-wide producer tunables, read by decoders and filter graphs at
//! construction time. Read-frequently, write-rarely access pattern using
//! RwLock.
//!
//! # Usage
//!
//! ```rust
//! use bcast_common::params::PARAMS;
//!
//! // Read (fast, uncontended)
//! let capacity = PARAMS.decoder_input_capacity();
//! assert!(capacity > 0);
//! ```

use crate::config::{Deinterlace, ProducerSettings};
use once_cell::sync::Lazy;
use std::sync::RwLock;
use tracing::info;

/// Global parameters singleton
///
/// Initialized with built-in defaults, overwritten once from configuration.
pub static PARAMS: Lazy<GlobalParams> = Lazy::new(GlobalParams::default);

/// Global parameter storage
pub struct GlobalParams {
    /// Codec worker threads hint
    ///
    /// Default: 0 (backend decides)
    pub threads: RwLock<usize>,

    /// Deinterlacer mode for video filter graphs
    ///
    /// Default: interlaced
    pub auto_deinterlace: RwLock<Deinterlace>,

    /// Decoder input queue capacity (packets)
    ///
    /// Valid range: [1, 64]
    /// Default: 2
    pub decoder_input_capacity: RwLock<usize>,

    /// Decoder output queue capacity (frames)
    ///
    /// Valid range: [1, 64]
    /// Default: 8
    pub decoder_output_capacity: RwLock<usize>,
}

impl Default for GlobalParams {
    fn default() -> Self {
        let defaults = ProducerSettings::default();
        Self {
            threads: RwLock::new(defaults.threads),
            auto_deinterlace: RwLock::new(defaults.auto_deinterlace),
            decoder_input_capacity: RwLock::new(defaults.decoder_input_capacity),
            decoder_output_capacity: RwLock::new(defaults.decoder_output_capacity),
        }
    }
}

impl GlobalParams {
    /// Overwrite all parameters from loaded settings
    ///
    /// Capacities are clamped to [1, 64].
    pub fn apply(&self, settings: &ProducerSettings) {
        *self.threads.write().unwrap() = settings.threads;
        *self.auto_deinterlace.write().unwrap() = settings.auto_deinterlace;
        *self.decoder_input_capacity.write().unwrap() = settings.decoder_input_capacity.clamp(1, 64);
        *self.decoder_output_capacity.write().unwrap() =
            settings.decoder_output_capacity.clamp(1, 64);

        info!(
            "Producer parameters: threads={}, auto_deinterlace={}, decoder_capacity={}/{}",
            settings.threads,
            settings.auto_deinterlace,
            self.decoder_input_capacity(),
            self.decoder_output_capacity()
        );
    }

    pub fn threads(&self) -> usize {
        *self.threads.read().unwrap()
    }

    pub fn auto_deinterlace(&self) -> Deinterlace {
        *self.auto_deinterlace.read().unwrap()
    }

    pub fn decoder_input_capacity(&self) -> usize {
        *self.decoder_input_capacity.read().unwrap()
    }

    pub fn decoder_output_capacity(&self) -> usize {
        *self.decoder_output_capacity.read().unwrap()
    }
}
