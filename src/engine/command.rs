//! Messages crossing between the control thread and the audio thread.
//!
//! Both directions are bounded `rtrb` rings. Commands flow control → audio and
//! are drained at the start of every block; events flow audio → control and
//! are drained by [`Manager::poll_events`](crate::runtime::Manager::poll_events).

use crate::{
    error::{Error, SandboxError},
    graph::Connection,
    unit::{ControlValue, ParamValue, UnitId, UnitInstance},
};

/// A request for the audio thread. Takes effect at the next block boundary,
/// in the order it was pushed.
#[derive(Debug)]
pub enum Command {
    /// Add a unit that was compiled, instantiated and described on the
    /// control side.
    Load(Box<UnitInstance>),
    Unload(UnitId),
    Connect(Connection),
    Disconnect(Connection),
    /// Apply `value` to `param` of `unit` `seconds` from the moment the
    /// command is drained. Zero or negative applies immediately.
    ScheduleParam {
        unit: UnitId,
        param: u8,
        value: ControlValue,
        seconds: f64,
    },
    /// Read `param` back from the unit itself. Answered with
    /// [`EngineEvent::ParamValue`].
    QueryParam { unit: UnitId, param: u8 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Load(_) => "load",
            Command::Unload(_) => "unload",
            Command::Connect(_) => "connect",
            Command::Disconnect(_) => "disconnect",
            Command::ScheduleParam { .. } => "schedule_param",
            Command::QueryParam { .. } => "query_param",
        }
    }
}

/// What the audio thread reports back.
#[derive(Debug)]
pub enum EngineEvent {
    /// A unit trapped or ran out of fuel and was marked faulty.
    UnitFaulted { unit: UnitId, error: SandboxError },
    /// An unloaded unit, handed back so it is released off the audio thread.
    Retired(Box<UnitInstance>),
    /// The value a unit reported for one of its parameters.
    ParamValue {
        unit: UnitId,
        param: u8,
        value: ParamValue,
    },
    /// A parameter change was dropped because the schedule was full.
    SchedulerFull { unit: UnitId, param: u8 },
    /// A command could not be applied; the graph is unchanged.
    Rejected {
        command: &'static str,
        error: Error,
    },
}
