//! Decoding of the descriptor a unit returns from `get_info`.
//!
//! ```text
//! info (12 bytes)                 param record (40 bytes)
//! +0  u32 name_ptr                +0   i32 type code
//! +4  u8  channels_in             +8   min   (8-byte slot)
//! +5  u8  channels_out            +16  max   (8-byte slot)
//! +6  u8  param_count             +24  value (8-byte slot)
//! +8  u32 params_ptr              +32  u32 name_ptr
//! ```
//!
//! Everything is little-endian. A value slot holds the value in its low
//! bytes, so reading the whole slot as an i64 and truncating to the declared
//! type recovers it for every type.

use crate::{
    error::SandboxError,
    unit::{ParamDescriptor, ParamType, ParamValue, UnitInfo},
    MAX_PORTS,
};

pub(crate) const INFO_SIZE: usize = 12;
pub(crate) const PARAM_SIZE: usize = 40;
pub(crate) const MAX_NAME_LEN: usize = 64;

pub(crate) fn read_info(mem: &[u8], ptr: u32) -> Result<UnitInfo, SandboxError> {
    let info = region(mem, ptr, INFO_SIZE)?;

    let name = read_str(mem, le_u32(info, 0));
    let channels_in = info[4];
    let channels_out = info[5];
    let param_count = info[6] as u32;
    let params_ptr = le_u32(info, 8);

    if channels_in as usize > MAX_PORTS || channels_out as usize > MAX_PORTS {
        return Err(SandboxError::Abi(format!(
            "{channels_in} inputs / {channels_out} outputs exceeds {MAX_PORTS} ports"
        )));
    }

    let params = (0..param_count)
        .map(|i| {
            let ptr = params_ptr
                .checked_add(i * PARAM_SIZE as u32)
                .ok_or_else(|| SandboxError::Abi(format!("param {i} address overflows")))?;
            read_param(mem, ptr)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UnitInfo {
        name,
        channels_in,
        channels_out,
        params,
    })
}

fn read_param(mem: &[u8], ptr: u32) -> Result<ParamDescriptor, SandboxError> {
    let record = region(mem, ptr, PARAM_SIZE)?;

    let code = le_u32(record, 0) as i32;
    let ty = ParamType::from_code(code)
        .ok_or_else(|| SandboxError::Abi(format!("unknown param type {code}")))?;

    let slot = |offset: usize| ParamValue::from_bits(ty, le_i64(record, offset));
    let name = read_str(mem, le_u32(record, 32));

    Ok(ParamDescriptor::new(name, slot(8), slot(16), slot(24)))
}

/// NUL-terminated name, at most [`MAX_NAME_LEN`] bytes.
pub(crate) fn read_str(mem: &[u8], ptr: u32) -> String {
    read_cstr(mem, ptr, MAX_NAME_LEN)
}

/// NUL-terminated string of at most `max` bytes. A null or out-of-bounds
/// pointer reads as empty.
pub(crate) fn read_cstr(mem: &[u8], ptr: u32, max: usize) -> String {
    if ptr == 0 {
        return String::new();
    }
    let start = ptr as usize;
    let bytes = mem.get(start..).unwrap_or(&[]);
    let bytes = &bytes[..bytes.len().min(max)];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn region(mem: &[u8], ptr: u32, len: usize) -> Result<&[u8], SandboxError> {
    let start = ptr as usize;
    start
        .checked_add(len)
        .and_then(|end| mem.get(start..end))
        .ok_or_else(|| {
            SandboxError::Abi(format!(
                "{len} bytes at {ptr:#x} fall outside {} bytes of memory",
                mem.len()
            ))
        })
}

#[inline]
fn le_u32(b: &[u8], o: usize) -> u32 {
    u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
}

#[inline]
fn le_i64(b: &[u8], o: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[o..o + 8]);
    i64::from_le_bytes(bytes)
}
