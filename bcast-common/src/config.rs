//! Configuration loading and config file resolution
//!
//! Bootstrap configuration is a small TOML file. Resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<config_dir>/bcast/config.toml` (then `/etc/bcast/config.toml` on Linux)
//! 4. Built-in defaults (no file)
//!
//! ```toml
//! [producer]
//! threads = 0
//! auto_deinterlace = "interlaced"
//! decoder_input_capacity = 2
//! decoder_output_capacity = 8
//!
//! [logging]
//! level = "info"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BCAST_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TomlConfig {
    /// Producer pipeline tuning
    #[serde(default)]
    pub producer: ProducerSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Producer pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProducerSettings {
    /// Codec worker threads hint (0 = backend decides)
    #[serde(default)]
    pub threads: usize,

    /// Deinterlacer mode appended to every video filter graph
    #[serde(default)]
    pub auto_deinterlace: Deinterlace,

    /// Packets a decoder may hold before the scheduler stops feeding it
    #[serde(default = "default_decoder_input_capacity")]
    pub decoder_input_capacity: usize,

    /// Decoded frames a decoder may hold before its thread blocks
    #[serde(default = "default_decoder_output_capacity")]
    pub decoder_output_capacity: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            auto_deinterlace: Deinterlace::default(),
            decoder_input_capacity: default_decoder_input_capacity(),
            decoder_output_capacity: default_decoder_output_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Automatic deinterlacing mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Deinterlace {
    /// Never deinterlace (no deinterlacer in the graph)
    None,
    /// Deinterlace frames flagged as interlaced
    #[default]
    Interlaced,
    /// Deinterlace every frame
    All,
}

impl Deinterlace {
    /// Value used in the deinterlacer filter arguments
    pub fn as_str(&self) -> &'static str {
        match self {
            Deinterlace::None => "none",
            Deinterlace::Interlaced => "interlaced",
            Deinterlace::All => "all",
        }
    }
}

impl fmt::Display for Deinterlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Deinterlace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Deinterlace::None),
            "interlaced" => Ok(Deinterlace::Interlaced),
            "all" => Ok(Deinterlace::All),
            other => Err(Error::Config(format!("Invalid auto_deinterlace '{}'", other))),
        }
    }
}

fn default_decoder_input_capacity() -> usize {
    2
}

fn default_decoder_output_capacity() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.producer.decoder_input_capacity == 0 {
            return Err(Error::Config(
                "decoder_input_capacity must be at least 1".to_string(),
            ));
        }
        if self.producer.decoder_output_capacity == 0 {
            return Err(Error::Config(
                "decoder_output_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve and load configuration following the priority order above
///
/// A missing file at priorities 3-4 is not an error (defaults are used); a
/// file named explicitly by argument or environment must exist and parse.
pub fn resolve_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return TomlConfig::load(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return TomlConfig::load(Path::new(&path));
    }

    // Priority 3: Platform config file
    if let Some(path) = default_config_file() {
        return TomlConfig::load(&path);
    }

    // Priority 4: Built-in defaults
    debug!("No config file found, using built-in defaults");
    Ok(TomlConfig::default())
}

/// Find the platform config file, if one exists
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("bcast").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/bcast/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}
