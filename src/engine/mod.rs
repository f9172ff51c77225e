//! The audio-thread half of the host.
//!
//! [`AudioEngine`] owns the signal graph and the parameter scheduler. The
//! device callback hands it one interleaved buffer per block; for each block
//! it drains pending commands, then for each frame runs the scheduler, renders
//! the graph and copies the sink's value to every output channel.
//!
//! Nothing here blocks. Commands arrive on a wait-free ring and diagnostics
//! leave on another; if the diagnostics ring is full the event is dropped and
//! counted in [`EngineStatus::dropped_events`].

pub mod command;
pub mod scheduler;
pub mod stream;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use rtrb::{Consumer, Producer, PushError};

use crate::{
    config::EngineConfig,
    error::{Error, SandboxError},
    graph::SignalGraph,
    unit::{RenderCtx, UnitId, UnitInstance},
};

pub use command::{Command, EngineEvent};
pub use scheduler::{ParamChange, Scheduled, Scheduler};

/// Counters the audio thread publishes for the control side.
#[derive(Debug, Default)]
pub struct EngineStatus {
    /// Frames rendered, updated once per block.
    pub playhead: AtomicU64,
    /// Events lost because the event ring was full.
    pub dropped_events: AtomicU64,
}

pub struct AudioEngine {
    graph: SignalGraph,
    scheduler: Scheduler,
    commands: Consumer<Command>,
    events: Producer<EngineEvent>,
    sample_rate: f32,
    sample_index: u64,
    status: Arc<EngineStatus>,
}

impl AudioEngine {
    pub fn new(
        config: &EngineConfig,
        commands: Consumer<Command>,
        events: Producer<EngineEvent>,
        status: Arc<EngineStatus>,
    ) -> Self {
        Self {
            graph: SignalGraph::new(config.max_units),
            scheduler: Scheduler::new(config.sample_rate, config.max_scheduled_events),
            commands,
            events,
            sample_rate: config.sample_rate as f32,
            sample_index: 0,
            status,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Frames rendered since the engine started.
    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    /// Render one block of interleaved audio. Every channel of a frame gets
    /// the same (mono) sink value.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();

        let Self {
            graph,
            scheduler,
            events,
            sample_rate,
            sample_index,
            status,
            ..
        } = self;
        let mut report = |unit: UnitId, error: SandboxError| {
            emit(events, status, EngineEvent::UnitFaulted { unit, error });
        };

        for (frame_in_block, frame) in out.chunks_mut(channels.max(1)).enumerate() {
            scheduler.tick(*sample_index, graph, &mut report);

            let ctx = RenderCtx::at_sample(*sample_index, frame_in_block, *sample_rate);
            let value = graph.render_frame(&ctx, &mut report);
            frame.fill(value);

            *sample_index += 1;
        }

        self.status.playhead.store(self.sample_index, Ordering::Relaxed);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        let name = command.name();
        let Self {
            graph,
            scheduler,
            events,
            sample_index,
            status,
            ..
        } = self;

        let result = match command {
            Command::Load(unit) => graph.insert(unit).map_err(|unit| {
                let id = unit.id();
                retire(events, status, unit);
                Error::DuplicateUnit(id)
            }),
            Command::Unload(id) => {
                let mut report = |unit: UnitId, error: SandboxError| {
                    emit(events, status, EngineEvent::UnitFaulted { unit, error });
                };
                let unloaded = graph.unload(id, &mut report);
                unloaded.map(|unit| retire(events, status, unit))
            }
            Command::Connect(connection) => graph.connect(connection).map(drop),
            Command::Disconnect(connection) => graph.disconnect(connection).map(drop),
            Command::ScheduleParam {
                unit,
                param,
                value,
                seconds,
            } => {
                let change = ParamChange { unit, param, value };
                match scheduler.schedule(graph, *sample_index, change, seconds) {
                    Ok(_) => Ok(()),
                    Err(Error::Sandbox(error)) => {
                        emit(events, status, EngineEvent::UnitFaulted { unit, error });
                        Ok(())
                    }
                    Err(Error::SchedulerFull(_)) => {
                        emit(events, status, EngineEvent::SchedulerFull { unit, param });
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Command::QueryParam { unit, param } => match graph.get_param(unit, param) {
                Ok(value) => {
                    emit(events, status, EngineEvent::ParamValue { unit, param, value });
                    Ok(())
                }
                Err(Error::Sandbox(error)) => {
                    emit(events, status, EngineEvent::UnitFaulted { unit, error });
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        if let Err(error) = result {
            emit(
                events,
                status,
                EngineEvent::Rejected {
                    command: name,
                    error,
                },
            );
        }
    }
}

/// Diagnostics are best effort: a full ring drops the event and counts it.
fn emit(events: &mut Producer<EngineEvent>, status: &EngineStatus, event: EngineEvent) {
    if events.push(event).is_err() {
        status.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hand a released unit to the control side so it is freed there. If the
/// ring is full it is dropped here instead.
fn retire(events: &mut Producer<EngineEvent>, status: &EngineStatus, unit: Box<UnitInstance>) {
    if let Err(PushError::Full(event)) = events.push(EngineEvent::Retired(unit)) {
        status.dropped_events.fetch_add(1, Ordering::Relaxed);
        drop(event);
    }
}