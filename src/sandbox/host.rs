//! Host functions imported by units from the `env` module.
//!
//! - `get_data_floats(sample_id, offset, length, out_ptr)` copies floats from
//!   the sample store into unit memory, zero-filling past the sample's end.
//! - `trace(str_ptr)` logs a NUL-terminated string at trace level.
//!
//! Both run on whichever thread calls into the unit, usually the audio
//! thread, so neither allocates on the hot path.

use std::sync::Arc;

use wasmtime::{Caller, Extern, Linker, Memory, StoreLimits, StoreLimitsBuilder};

use crate::{io::SampleStore, sandbox::abi};

pub(crate) const HOST_MODULE: &str = "env";
pub(crate) const TRACE_TARGET: &str = "nullunit::unit";
const MAX_TRACE_LEN: usize = 1024;

/// Per-instance store data.
pub struct HostState {
    pub(crate) samples: Arc<SampleStore>,
    pub(crate) limits: StoreLimits,
}

impl HostState {
    pub(crate) fn new(samples: Arc<SampleStore>, max_memory: usize) -> Self {
        Self {
            samples,
            limits: StoreLimitsBuilder::new().memory_size(max_memory).build(),
        }
    }
}

pub(crate) fn link(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(HOST_MODULE, "get_data_floats", get_data_floats)?;
    linker.func_wrap(HOST_MODULE, "trace", trace)?;
    Ok(())
}

fn exported_memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("unit does not export `memory`"))
}

fn get_data_floats(
    mut caller: Caller<'_, HostState>,
    sample_id: u32,
    offset: u32,
    length: u32,
    out_ptr: u32,
) -> wasmtime::Result<()> {
    let memory = exported_memory(&mut caller)?;
    let start = out_ptr as usize;
    let end = (length as usize)
        .checked_mul(4)
        .and_then(|bytes| start.checked_add(bytes));

    let (data, state) = memory.data_and_store_mut(&mut caller);
    let dest = end.and_then(|end| data.get_mut(start..end)).ok_or_else(|| {
        wasmtime::Error::msg(format!(
            "get_data_floats: {length} floats at {out_ptr:#x} exceed unit memory"
        ))
    })?;

    state.samples.copy_le_bytes(sample_id, offset as usize, dest);
    Ok(())
}

fn trace(mut caller: Caller<'_, HostState>, ptr: u32) -> wasmtime::Result<()> {
    if !log::log_enabled!(target: TRACE_TARGET, log::Level::Trace) {
        return Ok(());
    }
    let memory = exported_memory(&mut caller)?;
    let message = abi::read_cstr(memory.data(&caller), ptr, MAX_TRACE_LEN);
    log::trace!(target: TRACE_TARGET, "{message}");
    Ok(())
}
