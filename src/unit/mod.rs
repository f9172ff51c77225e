//! Units: active processing instances and the contract they satisfy.
//!
//! A unit is anything implementing [`UnitProcessor`]. Loaded units are
//! sandboxed WebAssembly instances; the graph does not care, it only sees the
//! call contract (`process`, `param_set`, `param_get`, `destroy`).

pub mod param;

pub use param::{ControlValue, ParamDescriptor, ParamType, ParamValue};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Missing, SandboxError},
    MAX_PORTS, SINK_ID,
};

/// Dense unit id. `0` is the audio-output sink; ids are never reused.
pub type UnitId = u32;

/// Context passed to a unit for each sample.
#[derive(Debug, Clone, Copy)]
pub struct RenderCtx {
    /// Frame index within the current block, modulo 256.
    pub position: u8,
    pub sample_rate: f32,
    /// Absolute engine time in seconds.
    pub time: f64,
}

impl RenderCtx {
    pub fn at_sample(sample_index: u64, frame_in_block: usize, sample_rate: f32) -> Self {
        Self {
            position: (frame_in_block & 0xff) as u8,
            sample_rate,
            time: sample_index as f64 / sample_rate as f64,
        }
    }
}

/// The call contract every unit satisfies.
pub trait UnitProcessor: Send {
    /// Produce one output value for `channel` from its summed input.
    fn process(&mut self, ctx: &RenderCtx, input: f32, channel: u8) -> Result<f32, SandboxError>;

    fn param_set(&mut self, param_id: u8, value: ParamValue) -> Result<(), SandboxError>;

    /// Read a parameter back; `ty` is the type its descriptor declares.
    fn param_get(&mut self, param_id: u8, ty: ParamType) -> Result<ParamValue, SandboxError>;

    /// Called once, just before the unit is released.
    fn destroy(&mut self) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Static description of a unit, as reported by `get_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub channels_in: u8,
    pub channels_out: u8,
    pub params: Vec<ParamDescriptor>,
}

impl UnitInfo {
    /// The fixed audio-output sink: one input, no outputs, no params.
    pub fn sink() -> Self {
        Self {
            name: "audio-out".to_string(),
            channels_in: 1,
            channels_out: 0,
            params: Vec::new(),
        }
    }

    /// Number of times `process` runs per sample.
    pub fn lanes(&self) -> usize {
        (self.channels_in.max(self.channels_out) as usize).clamp(1, MAX_PORTS)
    }
}

/// One loaded unit, owned by the signal graph.
pub struct UnitInstance {
    id: UnitId,
    info: UnitInfo,
    /// `None` only for the sink.
    processor: Option<Box<dyn UnitProcessor>>,
    active: bool,
    faulty: bool,
    /// Most recent output per port. Until a unit runs in the current pass this
    /// still holds the previous sample, which is what feedback edges read.
    outputs: [f32; MAX_PORTS],
}

impl UnitInstance {
    pub fn new(id: UnitId, info: UnitInfo, processor: Box<dyn UnitProcessor>) -> Self {
        Self {
            id,
            info,
            processor: Some(processor),
            active: true,
            faulty: false,
            outputs: [0.0; MAX_PORTS],
        }
    }

    pub fn sink() -> Self {
        Self {
            id: SINK_ID,
            info: UnitInfo::sink(),
            processor: None,
            active: true,
            faulty: false,
            outputs: [0.0; MAX_PORTS],
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn info(&self) -> &UnitInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn channels_in(&self) -> u8 {
        self.info.channels_in
    }

    pub fn channels_out(&self) -> u8 {
        self.info.channels_out
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.info.params
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_faulty(&self) -> bool {
        self.faulty
    }

    pub fn is_sink(&self) -> bool {
        self.processor.is_none()
    }

    /// Whether the unit takes part in evaluation.
    pub fn is_running(&self) -> bool {
        self.active && !self.faulty
    }

    /// Output of `port`, zero for ports the unit does not have.
    #[inline]
    pub fn output(&self, port: u8) -> f32 {
        if port < self.info.channels_out {
            self.outputs[port as usize]
        } else {
            0.0
        }
    }

    /// Exclude the unit from evaluation; its outputs fall silent.
    pub fn mark_faulty(&mut self) {
        self.faulty = true;
        self.outputs = [0.0; MAX_PORTS];
    }

    /// Run every lane of the unit for one sample. On a trap the unit is
    /// marked faulty and the error returned; it is never called again.
    pub fn render(&mut self, ctx: &RenderCtx, inputs: &[f32; MAX_PORTS]) -> Result<(), SandboxError> {
        if !self.is_running() {
            return Ok(());
        }
        let Some(processor) = self.processor.as_mut() else {
            return Ok(());
        };

        let channels_out = self.info.channels_out as usize;
        for lane in 0..self.info.lanes() {
            match processor.process(ctx, inputs[lane], lane as u8) {
                Ok(value) => {
                    if lane < channels_out {
                        self.outputs[lane] = value;
                    }
                }
                Err(e) => {
                    self.mark_faulty();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Coerce a control value into the parameter's type, clamp it into
    /// `[min, max]` and hand it to the unit. Returns the value applied.
    pub fn set_param(&mut self, param_id: u8, value: ControlValue) -> Result<ParamValue, Error> {
        let unit = self.id;
        let resolved = self
            .info
            .params
            .get(param_id as usize)
            .ok_or(Missing::Param {
                unit,
                param: param_id,
            })?
            .resolve(value);

        if !self.is_running() {
            return Err(Missing::Unit(unit).into());
        }
        let processor = self.processor.as_mut().ok_or(Missing::Unit(unit))?;

        if let Err(e) = processor.param_set(param_id, resolved) {
            self.mark_faulty();
            return Err(e.into());
        }
        self.info.params[param_id as usize].value = resolved;
        Ok(resolved)
    }

    /// Read a parameter from the unit itself.
    pub fn get_param(&mut self, param_id: u8) -> Result<ParamValue, Error> {
        let unit = self.id;
        let ty = self
            .info
            .params
            .get(param_id as usize)
            .ok_or(Missing::Param {
                unit,
                param: param_id,
            })?
            .ty;

        if !self.is_running() {
            return Err(Missing::Unit(unit).into());
        }
        let processor = self.processor.as_mut().ok_or(Missing::Unit(unit))?;

        match processor.param_get(param_id, ty) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.mark_faulty();
                Err(e.into())
            }
        }
    }

    /// Deactivate and call `destroy`. The instance stays allocated until it
    /// is dropped.
    pub fn deactivate(&mut self) -> Result<(), SandboxError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.outputs = [0.0; MAX_PORTS];
        match self.processor.as_mut() {
            Some(processor) if !self.faulty => processor.destroy(),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for UnitInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitInstance")
            .field("id", &self.id)
            .field("name", &self.info.name)
            .field("active", &self.active)
            .field("faulty", &self.faulty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Doubles its input; counts `destroy` calls.
    struct Doubler {
        destroyed: Arc<AtomicUsize>,
    }

    impl UnitProcessor for Doubler {
        fn process(&mut self, _: &RenderCtx, input: f32, _: u8) -> Result<f32, SandboxError> {
            Ok(input * 2.0)
        }

        fn param_set(&mut self, _: u8, _: ParamValue) -> Result<(), SandboxError> {
            Ok(())
        }

        fn param_get(&mut self, _: u8, ty: ParamType) -> Result<ParamValue, SandboxError> {
            Ok(ParamValue::from_bits(ty, 0))
        }

        fn destroy(&mut self) -> Result<(), SandboxError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stereo(destroyed: &Arc<AtomicUsize>) -> UnitInstance {
        let info = UnitInfo {
            name: "doubler".into(),
            channels_in: 2,
            channels_out: 2,
            params: vec![ParamDescriptor::new(
                "mode",
                ParamValue::I8(-2),
                ParamValue::I8(2),
                ParamValue::I8(0),
            )],
        };
        let processor = Doubler {
            destroyed: Arc::clone(destroyed),
        };
        UnitInstance::new(4, info, Box::new(processor))
    }

    #[test]
    fn test_render_ctx_wraps_position() {
        let ctx = RenderCtx::at_sample(48_000, 300, 48_000.0);
        assert_eq!(ctx.position, 44);
        assert_eq!(ctx.time, 1.0);
    }

    #[test]
    fn test_lanes_cover_widest_side() {
        assert_eq!(UnitInfo::sink().lanes(), 1);
        let info = UnitInfo {
            channels_in: 0,
            channels_out: 3,
            ..UnitInfo::sink()
        };
        assert_eq!(info.lanes(), 3);
    }

    #[test]
    fn test_render_runs_each_lane() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut unit = stereo(&destroyed);
        let mut inputs = [0.0; MAX_PORTS];
        inputs[0] = 0.25;
        inputs[1] = -0.5;

        unit.render(&RenderCtx::at_sample(0, 0, 48_000.0), &inputs).unwrap();

        assert_eq!(unit.output(0), 0.5);
        assert_eq!(unit.output(1), -1.0);
        assert_eq!(unit.output(2), 0.0, "ports past channels_out read as silence");
    }

    #[test]
    fn test_set_param_resolves_into_range() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut unit = stereo(&destroyed);

        assert_eq!(unit.set_param(0, ControlValue::Float(-7.6)).unwrap(), ParamValue::I8(-2));
        assert_eq!(unit.set_param(0, ControlValue::Float(1.4)).unwrap(), ParamValue::I8(1));
        assert_eq!(unit.params()[0].value, ParamValue::I8(1));
        assert!(unit.set_param(1, ControlValue::Int(0)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_deactivate_destroys_once() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut unit = stereo(&destroyed);

        unit.deactivate().unwrap();
        unit.deactivate().unwrap();

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!unit.is_running());
        assert!(unit.set_param(0, ControlValue::Int(1)).unwrap_err().is_not_found());
        assert!(unit.get_param(0).unwrap_err().is_not_found());
    }
}
