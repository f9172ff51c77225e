//! Control side of the host.
//!
//! The [`Manager`] is the only way in: it resolves, compiles and describes
//! units, validates requests, and posts commands to the [`AudioEngine`]
//! running in the device callback.
//!
//! # Example
//!
//! ```ignore
//! use nullunit::{engine::stream, EngineConfig, Manager, SINK_ID};
//!
//! fn main() -> color_eyre::Result<()> {
//!     let config = EngineConfig::load("nullunit.toml".as_ref())?;
//!     let (device, stream_config) = stream::open_output(&config)?;
//!     let (mut manager, engine) = Manager::from_config(config)?;
//!     let _output = stream::start(&device, &stream_config, engine)?;
//!
//!     let osc = manager.load_unit("osc")?;
//!     manager.connect(osc, 0, SINK_ID, 0)?;
//!     manager.set_param(osc, 0, 69.0, 0.0)?;
//!     Ok(())
//! }
//! ```
//!
//! [`AudioEngine`]: crate::engine::AudioEngine

mod manager;

pub use manager::Manager;
