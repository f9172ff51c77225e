//! WebAssembly isolation for units.
//!
//! Each unit gets its own [`Store`], so its linear memory and globals are
//! private. Every call into a unit is refuelled first, and memory growth is
//! capped by a [`wasmtime::StoreLimits`]; a unit that spins forever or traps comes back
//! as a [`SandboxError`] value instead of taking the host down.
//!
//! Exports a unit provides:
//!
//! ```text
//! get_info()                                        -> i32   descriptor pointer
//! process(position i32, input f32, channel i32,
//!         sample_rate f32, time f64)                -> f32
//! param_set(param_id i32, type_code i32, bits i64)
//! param_get(param_id i32)                           -> i64
//! destroy()                                                  optional
//! memory                                                     linear memory
//! ```
//!
//! `param_set`/`param_get` are only required when the unit declares params.
//! A `_initialize` or `_start` export runs once right after instantiation.

pub mod abi;
pub mod host;

use std::sync::Arc;

use wasmtime::{
    Config, Engine, Instance, Linker, Memory, Module, Store, Trap, TypedFunc, WasmParams,
    WasmResults,
};

use crate::{
    config::EngineConfig,
    error::SandboxError,
    io::SampleStore,
    unit::{ParamType, ParamValue, RenderCtx, UnitInfo, UnitProcessor},
};

pub use host::HostState;

type ProcessFn = TypedFunc<(i32, f32, i32, f32, f64), f32>;

/// Compiles and instantiates units. One per manager; cheap to share
/// compiled modules between instances.
pub struct Sandbox {
    engine: Engine,
    linker: Linker<HostState>,
    samples: Arc<SampleStore>,
    fuel_per_call: Option<u64>,
    max_unit_memory: usize,
}

/// A compiled unit binary, ready to instantiate.
#[derive(Clone)]
pub struct UnitModule {
    module: Module,
}

impl Sandbox {
    pub fn new(config: &EngineConfig, samples: Arc<SampleStore>) -> Result<Self, SandboxError> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(config.fuel_per_call.is_some());

        let engine = Engine::new(&wasm_config).map_err(|e| SandboxError::Compile(format!("{e:#}")))?;
        let mut linker = Linker::new(&engine);
        host::link(&mut linker).map_err(|e| SandboxError::Instantiate(format!("{e:#}")))?;

        Ok(Self {
            engine,
            linker,
            samples,
            fuel_per_call: config.fuel_per_call,
            max_unit_memory: config.max_unit_memory,
        })
    }

    /// Compile a binary module (or its text form).
    pub fn compile(&self, bytes: &[u8]) -> Result<UnitModule, SandboxError> {
        let module =
            Module::new(&self.engine, bytes).map_err(|e| SandboxError::Compile(format!("{e:#}")))?;
        Ok(UnitModule { module })
    }

    pub fn instantiate(&self, unit: &UnitModule) -> Result<SandboxInstance, SandboxError> {
        let instantiate_err = |e: wasmtime::Error| SandboxError::Instantiate(format!("{e:#}"));

        let mut store = Store::new(
            &self.engine,
            HostState::new(Arc::clone(&self.samples), self.max_unit_memory),
        );
        store.limiter(|state| &mut state.limits);
        if let Some(fuel) = self.fuel_per_call {
            store.set_fuel(fuel).map_err(instantiate_err)?;
        }

        // Imports the host does not provide trap when called rather than
        // failing the whole load.
        let mut linker = self.linker.clone();
        linker
            .define_unknown_imports_as_traps(&unit.module)
            .map_err(instantiate_err)?;
        let instance = linker
            .instantiate(&mut store, &unit.module)
            .map_err(instantiate_err)?;

        let memory = instance.get_memory(&mut store, "memory");
        let exports = Exports {
            get_info: typed(&mut store, &instance, "get_info")?
                .ok_or(SandboxError::MissingExport("get_info"))?,
            process: typed(&mut store, &instance, "process")?
                .ok_or(SandboxError::MissingExport("process"))?,
            param_set: typed(&mut store, &instance, "param_set")?,
            param_get: typed(&mut store, &instance, "param_get")?,
            destroy: typed(&mut store, &instance, "destroy")?,
        };
        let init: Option<TypedFunc<(), ()>> = match typed(&mut store, &instance, "_initialize")? {
            Some(init) => Some(init),
            None => typed(&mut store, &instance, "_start")?,
        };

        if let Some(init) = init {
            invoke(&mut store, self.fuel_per_call, "_initialize", &init, ())?;
        }

        Ok(SandboxInstance {
            store,
            memory,
            exports,
            fuel_per_call: self.fuel_per_call,
        })
    }

    /// Compile, instantiate and describe a unit in one go.
    pub fn load(&self, bytes: &[u8]) -> Result<(UnitInfo, SandboxInstance), SandboxError> {
        let module = self.compile(bytes)?;
        let mut instance = self.instantiate(&module)?;
        let info = instance.get_info()?;
        Ok((info, instance))
    }
}

struct Exports {
    get_info: TypedFunc<(), i32>,
    process: ProcessFn,
    param_set: Option<TypedFunc<(i32, i32, i64), ()>>,
    param_get: Option<TypedFunc<i32, i64>>,
    destroy: Option<TypedFunc<(), ()>>,
}

/// A live unit instance and its private store.
pub struct SandboxInstance {
    store: Store<HostState>,
    memory: Option<Memory>,
    exports: Exports,
    fuel_per_call: Option<u64>,
}

impl SandboxInstance {
    /// Call `get_info` and decode the descriptor it points at.
    pub fn get_info(&mut self) -> Result<UnitInfo, SandboxError> {
        let ptr = invoke(
            &mut self.store,
            self.fuel_per_call,
            "get_info",
            &self.exports.get_info,
            (),
        )?;
        let memory = self.memory.ok_or(SandboxError::MissingExport("memory"))?;
        let info = abi::read_info(memory.data(&self.store), ptr as u32)?;

        if !info.params.is_empty() {
            if self.exports.param_set.is_none() {
                return Err(SandboxError::MissingExport("param_set"));
            }
            if self.exports.param_get.is_none() {
                return Err(SandboxError::MissingExport("param_get"));
            }
        }
        Ok(info)
    }
}

impl UnitProcessor for SandboxInstance {
    fn process(&mut self, ctx: &RenderCtx, input: f32, channel: u8) -> Result<f32, SandboxError> {
        invoke(
            &mut self.store,
            self.fuel_per_call,
            "process",
            &self.exports.process,
            (
                ctx.position as i32,
                input,
                channel as i32,
                ctx.sample_rate,
                ctx.time,
            ),
        )
    }

    fn param_set(&mut self, param_id: u8, value: ParamValue) -> Result<(), SandboxError> {
        let func = self
            .exports
            .param_set
            .as_ref()
            .ok_or(SandboxError::MissingExport("param_set"))?;
        invoke(
            &mut self.store,
            self.fuel_per_call,
            "param_set",
            func,
            (param_id as i32, value.ty().code(), value.to_bits()),
        )
    }

    fn param_get(&mut self, param_id: u8, ty: ParamType) -> Result<ParamValue, SandboxError> {
        let func = self
            .exports
            .param_get
            .as_ref()
            .ok_or(SandboxError::MissingExport("param_get"))?;
        let bits = invoke(
            &mut self.store,
            self.fuel_per_call,
            "param_get",
            func,
            param_id as i32,
        )?;
        Ok(ParamValue::from_bits(ty, bits))
    }

    fn destroy(&mut self) -> Result<(), SandboxError> {
        match self.exports.destroy.as_ref() {
            Some(func) => invoke(&mut self.store, self.fuel_per_call, "destroy", func, ()),
            None => Ok(()),
        }
    }
}

/// Look up an optional export with a fixed signature. A present export with
/// the wrong signature is an ABI error.
fn typed<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &'static str,
) -> Result<Option<TypedFunc<P, R>>, SandboxError> {
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store)
        .map(Some)
        .map_err(|e| SandboxError::Abi(format!("`{name}` has the wrong signature: {e:#}")))
}

fn invoke<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    fuel: Option<u64>,
    export: &'static str,
    func: &TypedFunc<P, R>,
    params: P,
) -> Result<R, SandboxError> {
    if let Some(fuel) = fuel {
        store.set_fuel(fuel).map_err(|e| trap(export, e))?;
    }
    func.call(&mut *store, params).map_err(|e| trap(export, e))
}

fn trap(export: &'static str, err: wasmtime::Error) -> SandboxError {
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => SandboxError::FuelExhausted { export },
        _ => SandboxError::Trap {
            export,
            message: format!("{err:#}"),
        },
    }
}
