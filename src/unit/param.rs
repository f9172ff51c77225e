//! Tagged parameter values.
//!
//! Every value carries its own type, both in the host and when it crosses
//! into a unit: `param_set` receives the type code next to an 8-byte payload,
//! so nothing is ever reinterpreted under a different type.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
}

impl ParamType {
    /// Decode the type code units write into their descriptors.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ParamType::Bool,
            1 => ParamType::U8,
            2 => ParamType::I8,
            3 => ParamType::U16,
            4 => ParamType::I16,
            5 => ParamType::U32,
            6 => ParamType::I32,
            7 => ParamType::F32,
            8 => ParamType::U64,
            9 => ParamType::I64,
            10 => ParamType::F64,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            ParamType::Bool => 0,
            ParamType::U8 => 1,
            ParamType::I8 => 2,
            ParamType::U16 => 3,
            ParamType::I16 => 4,
            ParamType::U32 => 5,
            ParamType::I32 => 6,
            ParamType::F32 => 7,
            ParamType::U64 => 8,
            ParamType::I64 => 9,
            ParamType::F64 => 10,
        }
    }

    /// Convert a control-side value into this type. Floats headed for an
    /// integer type are rounded; out-of-range values saturate.
    pub fn coerce(self, value: ControlValue) -> ParamValue {
        match value {
            ControlValue::Int(i) => match self {
                ParamType::Bool => ParamValue::Bool(i != 0),
                ParamType::U8 => ParamValue::U8(i.clamp(0, u8::MAX as i64) as u8),
                ParamType::I8 => ParamValue::I8(i.clamp(i8::MIN as i64, i8::MAX as i64) as i8),
                ParamType::U16 => ParamValue::U16(i.clamp(0, u16::MAX as i64) as u16),
                ParamType::I16 => {
                    ParamValue::I16(i.clamp(i16::MIN as i64, i16::MAX as i64) as i16)
                }
                ParamType::U32 => ParamValue::U32(i.clamp(0, u32::MAX as i64) as u32),
                ParamType::I32 => {
                    ParamValue::I32(i.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                }
                ParamType::F32 => ParamValue::F32(i as f32),
                ParamType::U64 => ParamValue::U64(i.max(0) as u64),
                ParamType::I64 => ParamValue::I64(i),
                ParamType::F64 => ParamValue::F64(i as f64),
            },
            // `as` from float saturates and maps NaN to 0
            ControlValue::Float(f) => {
                let r = f.round();
                match self {
                    ParamType::Bool => ParamValue::Bool(f != 0.0),
                    ParamType::U8 => ParamValue::U8(r as u8),
                    ParamType::I8 => ParamValue::I8(r as i8),
                    ParamType::U16 => ParamValue::U16(r as u16),
                    ParamType::I16 => ParamValue::I16(r as i16),
                    ParamType::U32 => ParamValue::U32(r as u32),
                    ParamType::I32 => ParamValue::I32(r as i32),
                    ParamType::F32 => ParamValue::F32(f as f32),
                    ParamType::U64 => ParamValue::U64(r as u64),
                    ParamType::I64 => ParamValue::I64(r as i64),
                    ParamType::F64 => ParamValue::F64(f),
                }
            }
        }
    }
}

/// A value as it arrives from the control protocol: integer or float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    Int(i64),
    Float(f64),
}

impl From<i32> for ControlValue {
    fn from(value: i32) -> Self {
        ControlValue::Int(value as i64)
    }
}

impl From<i64> for ControlValue {
    fn from(value: i64) -> Self {
        ControlValue::Int(value)
    }
}

impl From<f32> for ControlValue {
    fn from(value: f32) -> Self {
        ControlValue::Float(value as f64)
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        ControlValue::Float(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl ParamValue {
    pub fn ty(self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::U8(_) => ParamType::U8,
            ParamValue::I8(_) => ParamType::I8,
            ParamValue::U16(_) => ParamType::U16,
            ParamValue::I16(_) => ParamType::I16,
            ParamValue::U32(_) => ParamType::U32,
            ParamValue::I32(_) => ParamType::I32,
            ParamValue::F32(_) => ParamType::F32,
            ParamValue::U64(_) => ParamType::U64,
            ParamValue::I64(_) => ParamType::I64,
            ParamValue::F64(_) => ParamType::F64,
        }
    }

    /// 8-byte payload passed to `param_set`: integers are sign- or
    /// zero-extended, floats travel as their IEEE bits.
    pub fn to_bits(self) -> i64 {
        match self {
            ParamValue::Bool(b) => b as i64,
            ParamValue::U8(v) => v as i64,
            ParamValue::I8(v) => v as i64,
            ParamValue::U16(v) => v as i64,
            ParamValue::I16(v) => v as i64,
            ParamValue::U32(v) => v as i64,
            ParamValue::I32(v) => v as i64,
            ParamValue::F32(v) => v.to_bits() as i64,
            ParamValue::U64(v) => v as i64,
            ParamValue::I64(v) => v,
            ParamValue::F64(v) => v.to_bits() as i64,
        }
    }

    /// Inverse of [`ParamValue::to_bits`]; only the low bits a type needs
    /// are read.
    pub fn from_bits(ty: ParamType, bits: i64) -> Self {
        match ty {
            ParamType::Bool => ParamValue::Bool(bits as u8 != 0),
            ParamType::U8 => ParamValue::U8(bits as u8),
            ParamType::I8 => ParamValue::I8(bits as i8),
            ParamType::U16 => ParamValue::U16(bits as u16),
            ParamType::I16 => ParamValue::I16(bits as i16),
            ParamType::U32 => ParamValue::U32(bits as u32),
            ParamType::I32 => ParamValue::I32(bits as i32),
            ParamType::F32 => ParamValue::F32(f32::from_bits(bits as u32)),
            ParamType::U64 => ParamValue::U64(bits as u64),
            ParamType::I64 => ParamValue::I64(bits),
            ParamType::F64 => ParamValue::F64(f64::from_bits(bits as u64)),
        }
    }

    /// Lossy numeric view, for display and comparisons across types.
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Bool(b) => b as u8 as f64,
            ParamValue::U8(v) => v as f64,
            ParamValue::I8(v) => v as f64,
            ParamValue::U16(v) => v as f64,
            ParamValue::I16(v) => v as f64,
            ParamValue::U32(v) => v as f64,
            ParamValue::I32(v) => v as f64,
            ParamValue::F32(v) => v as f64,
            ParamValue::U64(v) => v as f64,
            ParamValue::I64(v) => v as f64,
            ParamValue::F64(v) => v,
        }
    }

    /// Clamp into `[min, max]`. Bounds of a different type are ignored.
    /// A NaN float clamps to `min`.
    pub fn clamp(self, min: ParamValue, max: ParamValue) -> Self {
        use ParamValue::*;

        match (self, min, max) {
            (Bool(v), Bool(lo), Bool(hi)) => Bool(bound(v, lo, hi)),
            (U8(v), U8(lo), U8(hi)) => U8(bound(v, lo, hi)),
            (I8(v), I8(lo), I8(hi)) => I8(bound(v, lo, hi)),
            (U16(v), U16(lo), U16(hi)) => U16(bound(v, lo, hi)),
            (I16(v), I16(lo), I16(hi)) => I16(bound(v, lo, hi)),
            (U32(v), U32(lo), U32(hi)) => U32(bound(v, lo, hi)),
            (I32(v), I32(lo), I32(hi)) => I32(bound(v, lo, hi)),
            (U64(v), U64(lo), U64(hi)) => U64(bound(v, lo, hi)),
            (I64(v), I64(lo), I64(hi)) => I64(bound(v, lo, hi)),
            (F32(v), F32(lo), F32(hi)) => F32(if v.is_nan() { lo } else { bound(v, lo, hi) }),
            (F64(v), F64(lo), F64(hi)) => F64(if v.is_nan() { lo } else { bound(v, lo, hi) }),
            _ => self,
        }
    }
}

// Unlike `Ord::clamp`, never panics on inverted bounds; `lo` wins.
#[inline]
fn bound<T: PartialOrd>(v: T, lo: T, hi: T) -> T {
    if v < lo {
        lo
    } else if v > hi {
        if hi < lo {
            lo
        } else {
            hi
        }
    } else {
        v
    }
}

/// Description of one unit parameter, decoded from the unit's `get_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub ty: ParamType,
    pub min: ParamValue,
    pub max: ParamValue,
    /// Last value written, always within `[min, max]`.
    pub value: ParamValue,
    pub name: String,
}

impl ParamDescriptor {
    pub fn new(name: impl Into<String>, min: ParamValue, max: ParamValue, value: ParamValue) -> Self {
        let mut param = Self {
            ty: value.ty(),
            min,
            max,
            value,
            name: name.into(),
        };
        param.value = param.clamp(value);
        param
    }

    pub fn clamp(&self, value: ParamValue) -> ParamValue {
        value.clamp(self.min, self.max)
    }

    /// Coerce a control value into this parameter's type and clamp it.
    pub fn resolve(&self, value: ControlValue) -> ParamValue {
        self.clamp(self.ty.coerce(value))
    }
}
