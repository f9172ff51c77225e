use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{atomic::Ordering, Arc},
};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::{
    config::EngineConfig,
    engine::{AudioEngine, Command, EngineEvent, EngineStatus},
    error::{Error, Missing},
    graph::Connection,
    io::{SampleId, SampleStore, UnitRegistry},
    sandbox::{Sandbox, UnitModule},
    unit::{ControlValue, ParamValue, UnitId, UnitInfo, UnitInstance, UnitProcessor},
    SINK_ID,
};

/// Control-side handle to a running engine.
///
/// Everything that may block or allocate happens here: reading unit files,
/// compiling and instantiating them, calling `get_info`. The audio thread only
/// ever receives finished instances. The manager also keeps its own copy of
/// each live unit's descriptor, so bad ids, ports and params are reported
/// synchronously instead of surfacing later as rejected commands.
pub struct Manager {
    config: EngineConfig,
    registry: UnitRegistry,
    samples: Arc<SampleStore>,
    sandbox: Sandbox,
    modules: HashMap<String, UnitModule>,
    commands: Producer<Command>,
    events: Consumer<EngineEvent>,
    status: Arc<EngineStatus>,
    dropped_seen: u64,
    next_id: UnitId,
    units: BTreeMap<UnitId, UnitInfo>,
    /// Values read back from units by [`Manager::query_param`].
    reported: HashMap<(UnitId, u8), ParamValue>,
}

impl Manager {
    /// Build a manager and the engine it drives. The engine goes to the
    /// audio callback; see [`crate::engine::stream::start`].
    pub fn new(
        config: EngineConfig,
        registry: UnitRegistry,
        samples: Arc<SampleStore>,
    ) -> Result<(Self, AudioEngine), Error> {
        let sandbox = Sandbox::new(&config, Arc::clone(&samples))?;
        let (commands, command_rx) = RingBuffer::new(config.command_capacity.max(1));
        let (event_tx, events) = RingBuffer::new(config.event_capacity.max(1));
        let status = Arc::new(EngineStatus::default());

        let engine = AudioEngine::new(&config, command_rx, event_tx, Arc::clone(&status));

        let mut units = BTreeMap::new();
        units.insert(SINK_ID, UnitInfo::sink());

        let manager = Self {
            config,
            registry,
            samples,
            sandbox,
            modules: HashMap::new(),
            commands,
            events,
            status,
            dropped_seen: 0,
            next_id: SINK_ID + 1,
            units,
            reported: HashMap::new(),
        };
        Ok((manager, engine))
    }

    /// Scan the configured unit directories and sample files, then build.
    pub fn from_config(config: EngineConfig) -> Result<(Self, AudioEngine), Error> {
        let mut registry = UnitRegistry::new();
        for dir in &config.unit_dirs {
            let added = registry.add_dir(dir)?;
            log::info!("found {added} units in {}", dir.display());
        }

        let samples = if config.builtin_waves {
            SampleStore::with_builtin_waves()
        } else {
            SampleStore::new()
        };
        for path in &config.sample_files {
            match samples.load_file(path) {
                Ok(id) => log::info!("sample {id}: {}", path.display()),
                Err(e) => log::error!("skipping sample file: {e}"),
            }
        }

        Self::new(config, registry, Arc::new(samples))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    pub fn samples(&self) -> &Arc<SampleStore> {
        &self.samples
    }

    /// Load a registered unit by name and return its id.
    ///
    /// Ids are never reused, so `max_units` bounds the number of loads over
    /// the engine's lifetime, not the number of units alive at once. Once it
    /// is reached every load fails with [`Error::UnitLimit`], even after
    /// unloading.
    pub fn load_unit(&mut self, name: &str) -> Result<UnitId, Error> {
        let module = match self.modules.get(name) {
            Some(module) => module.clone(),
            None => {
                let descriptor = self
                    .registry
                    .resolve(name)
                    .ok_or_else(|| Missing::UnitName(name.to_string()))?;
                let bytes = std::fs::read(&descriptor.path).map_err(|source| Error::Io {
                    path: descriptor.path.clone(),
                    source,
                })?;
                let module = self.sandbox.compile(&bytes)?;
                self.modules.insert(name.to_string(), module.clone());
                module
            }
        };

        let mut instance = self.sandbox.instantiate(&module)?;
        let info = instance.get_info()?;
        self.install(info, Box::new(instance))
    }

    /// Load a unit from an in-memory module (binary or text format). The
    /// compiled module is kept under `name`, so later `load_unit(name)` calls
    /// reuse it.
    pub fn load_unit_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<UnitId, Error> {
        let module = self.sandbox.compile(bytes)?;
        self.modules.insert(name.to_string(), module.clone());

        let mut instance = self.sandbox.instantiate(&module)?;
        let info = instance.get_info()?;
        self.install(info, Box::new(instance))
    }

    /// Load a unit implemented on the host side.
    pub fn load_processor(
        &mut self,
        info: UnitInfo,
        processor: Box<dyn UnitProcessor>,
    ) -> Result<UnitId, Error> {
        self.install(info, processor)
    }

    fn install(&mut self, info: UnitInfo, processor: Box<dyn UnitProcessor>) -> Result<UnitId, Error> {
        let id = self.next_id;
        if id as usize >= self.config.max_units {
            return Err(Error::UnitLimit(self.config.max_units));
        }

        let unit = UnitInstance::new(id, info.clone(), processor);
        self.send(Command::Load(Box::new(unit)))?;

        log::info!(
            "loaded unit {id} '{}' ({} in, {} out, {} params)",
            info.name,
            info.channels_in,
            info.channels_out,
            info.params.len()
        );
        self.units.insert(id, info);
        self.next_id += 1;
        Ok(id)
    }

    pub fn unload_unit(&mut self, id: UnitId) -> Result<(), Error> {
        if id == SINK_ID || !self.units.contains_key(&id) {
            return Err(Missing::Unit(id).into());
        }
        self.send(Command::Unload(id))?;
        self.units.remove(&id);
        self.reported.retain(|&(unit, _), _| unit != id);
        log::info!("unloaded unit {id}");
        Ok(())
    }

    pub fn connect(&mut self, src: UnitId, src_port: u8, dst: UnitId, dst_port: u8) -> Result<(), Error> {
        let connection = Connection::new(src, src_port, dst, dst_port);
        self.check_ports(&connection)?;
        self.send(Command::Connect(connection))
    }

    pub fn disconnect(&mut self, src: UnitId, src_port: u8, dst: UnitId, dst_port: u8) -> Result<(), Error> {
        let connection = Connection::new(src, src_port, dst, dst_port);
        self.check_ports(&connection)?;
        self.send(Command::Disconnect(connection))
    }

    fn check_ports(&self, c: &Connection) -> Result<(), Error> {
        let src = self.units.get(&c.src).ok_or(Missing::Unit(c.src))?;
        if c.src_port >= src.channels_out {
            return Err(Missing::Port {
                unit: c.src,
                port: c.src_port,
            }
            .into());
        }
        let dst = self.units.get(&c.dst).ok_or(Missing::Unit(c.dst))?;
        if c.dst_port >= dst.channels_in {
            return Err(Missing::Port {
                unit: c.dst,
                port: c.dst_port,
            }
            .into());
        }
        Ok(())
    }

    /// Set `param` of `unit` to `value`, `seconds` from when the audio thread
    /// picks the request up. Zero or negative applies at the next block.
    pub fn set_param(
        &mut self,
        unit: UnitId,
        param: u8,
        value: impl Into<ControlValue>,
        seconds: f64,
    ) -> Result<(), Error> {
        let value = value.into();
        let descriptor = self
            .units
            .get(&unit)
            .ok_or(Missing::Unit(unit))?
            .params
            .get(param as usize)
            .ok_or(Missing::Param { unit, param })?;
        let requested = descriptor.resolve(value);

        self.send(Command::ScheduleParam {
            unit,
            param,
            value,
            seconds,
        })?;

        if let Some(info) = self.units.get_mut(&unit) {
            info.params[param as usize].value = requested;
        }
        Ok(())
    }

    /// Ask the engine to read `param` back from the unit itself. The answer
    /// arrives through [`Manager::poll_events`] and is then available from
    /// [`Manager::reported_param`].
    pub fn query_param(&mut self, unit: UnitId, param: u8) -> Result<(), Error> {
        self.units
            .get(&unit)
            .ok_or(Missing::Unit(unit))?
            .params
            .get(param as usize)
            .ok_or(Missing::Param { unit, param })?;
        self.send(Command::QueryParam { unit, param })
    }

    /// Last value a unit reported for `param`.
    pub fn reported_param(&self, unit: UnitId, param: u8) -> Option<ParamValue> {
        self.reported.get(&(unit, param)).copied()
    }

    /// Descriptor of a live unit. Param values are the latest requested,
    /// which may not have fired yet.
    pub fn unit_info(&self, id: UnitId) -> Option<&UnitInfo> {
        self.units.get(&id)
    }

    /// Live units, the sink included, by ascending id.
    pub fn units(&self) -> impl Iterator<Item = (UnitId, &UnitInfo)> {
        self.units.iter().map(|(&id, info)| (id, info))
    }

    pub fn add_sample(&self, bytes: &[u8]) -> Result<SampleId, Error> {
        self.samples.add_sample(bytes)
    }

    pub fn load_sample_file(&self, path: &Path) -> Result<SampleId, Error> {
        self.samples.load_file(path)
    }

    pub fn get_sample(&self, id: SampleId, offset: usize, length: usize) -> Result<Vec<f32>, Error> {
        self.samples.get(id, offset, length)
    }

    /// Frames rendered so far, as of the last completed block.
    pub fn sample_position(&self) -> u64 {
        self.status.playhead.load(Ordering::Relaxed)
    }

    /// Events the engine could not report because the event ring was full.
    pub fn dropped_events(&self) -> u64 {
        self.status.dropped_events.load(Ordering::Relaxed)
    }

    /// Drain diagnostics from the audio thread, logging each one. Retired
    /// units are released here. Returns how many events were handled.
    pub fn poll_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.pop() {
            handled += 1;
            match event {
                EngineEvent::UnitFaulted { unit, error } => {
                    log::warn!("unit {unit} faulted and was silenced: {error}");
                }
                EngineEvent::ParamValue { unit, param, value } => {
                    log::debug!("unit {unit} param {param} = {value:?}");
                    if self.units.contains_key(&unit) {
                        self.reported.insert((unit, param), value);
                    }
                }
                EngineEvent::Retired(unit) => {
                    log::debug!("released unit {} '{}'", unit.id(), unit.name());
                }
                EngineEvent::SchedulerFull { unit, param } => {
                    log::warn!("parameter schedule full, dropped change to param {param} of unit {unit}");
                }
                EngineEvent::Rejected { command, error } => {
                    log::warn!("{command} rejected by the engine: {error}");
                }
            }
        }

        let dropped = self.dropped_events();
        if dropped > self.dropped_seen {
            log::warn!(
                "event queue full, {} engine events lost",
                dropped - self.dropped_seen
            );
            self.dropped_seen = dropped;
        }
        handled
    }

    /// Push a command, rejecting it if the queue is full.
    fn send(&mut self, command: Command) -> Result<(), Error> {
        self.commands.push(command).map_err(|_| {
            log::warn!("command queue full, rejecting newest command");
            Error::Overflow
        })
    }
}
