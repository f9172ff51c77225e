use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use nullunit::EngineConfig;

/// Host sandboxed WebAssembly audio units and play the graph on the default
/// output device.
#[derive(Parser, Debug)]
#[command(name = "nullunit", version, about)]
pub struct Cli {
    /// TOML config file; flags below extend it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of `*.wasm` units (repeatable; earlier directories win)
    #[arg(short = 'u', long = "unit")]
    pub unit_dirs: Vec<PathBuf>,

    /// Raw native-endian f32 sample file (repeatable)
    #[arg(short = 'd', long = "data")]
    pub data_files: Vec<PathBuf>,

    /// Unit to load at startup and connect to the output (repeatable)
    #[arg(short = 'l', long = "load")]
    pub load: Vec<String>,

    /// Override the engine sample rate
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Print the discovered units and exit
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// The config file (or defaults) with command-line values applied.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };

        config.unit_dirs.extend(self.unit_dirs.iter().cloned());
        config.sample_files.extend(self.data_files.iter().cloned());
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        Ok(config)
    }
}
