//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! sample_rate = 44100
//! fuel_per_call = 2000000
//! unit_dirs = ["units"]
//! sample_files = ["samples/kick.raw"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::Error, DEFAULT_SAMPLE_RATE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Output channel count; `None` uses the device default.
    pub channels: Option<u16>,
    /// Capacity of the control → audio command ring.
    pub command_capacity: usize,
    /// Capacity of the audio → control diagnostics ring.
    pub event_capacity: usize,
    /// Highest number of unit ids handed out over the engine's lifetime,
    /// the sink included.
    pub max_units: usize,
    pub max_scheduled_events: usize,
    /// Fuel granted to each call into a unit. `None` disables metering.
    pub fuel_per_call: Option<u64>,
    /// Linear memory cap per unit instance, in bytes.
    pub max_unit_memory: usize,
    /// Seed sample ids 0..4 with single-cycle sine/square/triangle/saw waves.
    pub builtin_waves: bool,
    pub unit_dirs: Vec<PathBuf>,
    pub sample_files: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: None,
            command_capacity: 1024,
            event_capacity: 256,
            max_units: 256,
            max_scheduled_events: 4096,
            fuel_per_call: Some(5_000_000),
            max_unit_memory: 16 * 1024 * 1024,
            builtin_waves: true,
            unit_dirs: Vec::new(),
            sample_files: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
