//! Error taxonomy shared by the control side and the audio side.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::{io::samples::SampleId, unit::UnitId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The referenced unit, parameter, port or sample does not exist.
    /// Never fatal: the operation is a no-op.
    #[error("{0} not found")]
    NotFound(Missing),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The command queue is full; the newest command was rejected.
    #[error("command queue is full")]
    Overflow,

    /// The parameter schedule is at capacity; the event was dropped.
    #[error("parameter schedule is full ({0} events)")]
    SchedulerFull(usize),

    #[error("sample data is {len} bytes, not a multiple of 4")]
    MalformedSample { len: usize },

    #[error("unit id {0} is already loaded")]
    DuplicateUnit(UnitId),

    #[error("unit limit of {0} reached")]
    UnitLimit(usize),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("audio device: {0}")]
    Audio(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// What a [`Error::NotFound`] was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Unit(UnitId),
    UnitName(String),
    Param { unit: UnitId, param: u8 },
    Port { unit: UnitId, port: u8 },
    Sample(SampleId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Unit(id) => write!(f, "unit {id}"),
            Missing::UnitName(name) => write!(f, "unit '{name}'"),
            Missing::Param { unit, param } => write!(f, "param {param} of unit {unit}"),
            Missing::Port { unit, port } => write!(f, "port {port} of unit {unit}"),
            Missing::Sample(id) => write!(f, "sample {id}"),
        }
    }
}

impl From<Missing> for Error {
    fn from(missing: Missing) -> Self {
        Error::NotFound(missing)
    }
}

/// Failures raised at the sandbox boundary.
///
/// Traps and resource exhaustion inside a unit arrive here as values; they
/// never unwind into the caller.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("failed to compile unit module: {0}")]
    Compile(String),

    #[error("failed to instantiate unit: {0}")]
    Instantiate(String),

    #[error("unit does not export `{0}`")]
    MissingExport(&'static str),

    #[error("malformed unit descriptor: {0}")]
    Abi(String),

    #[error("unit trapped in `{export}`: {message}")]
    Trap {
        export: &'static str,
        message: String,
    },

    #[error("unit ran out of fuel in `{export}`")]
    FuelExhausted { export: &'static str },
}
