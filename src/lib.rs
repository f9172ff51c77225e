pub mod config;
pub mod engine; // Audio callback, command queue, parameter scheduling
pub mod error;
pub mod graph; // Unit graph and per-sample evaluation
pub mod io; // Unit discovery, sample store, byte conversion
pub mod runtime; // Control-side manager
pub mod sandbox; // WebAssembly isolation for units
pub mod unit;

pub use config::EngineConfig;
pub use engine::AudioEngine;
pub use error::{Error, Missing, Result, SandboxError};
pub use graph::{Connection, SignalGraph};
pub use runtime::Manager;
pub use unit::{ControlValue, ParamType, ParamValue, UnitId};

/// Upper bound on input/output ports per unit.
pub const MAX_PORTS: usize = 8;
/// Unit id of the audio output sink.
pub const SINK_ID: UnitId = 0;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
