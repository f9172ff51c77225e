//! nullunit - play a graph of sandboxed audio units
//!
//! Run with: cargo run -- -u units -l osc

mod cli;

use std::{thread, time::Duration};

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use nullunit::{engine::stream, io::UnitRegistry, Manager, SINK_ID};

use cli::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = cli.engine_config()?;

    if cli.list {
        let mut registry = UnitRegistry::new();
        for dir in &config.unit_dirs {
            registry.add_dir(dir)?;
        }
        for unit in registry.iter() {
            println!("{:<24} {}", unit.name, unit.path.display());
        }
        return Ok(());
    }

    // The engine renders at whatever rate the device accepts.
    let (device, stream_config) = stream::open_output(&config)?;
    config.sample_rate = stream_config.sample_rate.0;
    config.channels = Some(stream_config.channels);

    let (mut manager, engine) = Manager::from_config(config)?;
    let _output = stream::start(&device, &stream_config, engine)?;

    for name in &cli.load {
        let id = manager
            .load_unit(name)
            .wrap_err_with(|| format!("failed to load unit '{name}'"))?;
        if manager.unit_info(id).is_some_and(|info| info.channels_out > 0) {
            manager.connect(id, 0, SINK_ID, 0)?;
        }
    }

    log::info!("running, press Ctrl+C to stop");
    loop {
        manager.poll_events();
        thread::sleep(Duration::from_millis(100));
    }
}
