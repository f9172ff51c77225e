//! The signal graph: loaded units, the edges between them, and per-sample
//! evaluation.
//!
//! The graph lives on the audio thread and is only ever touched from there;
//! the control side reaches it through engine commands.

/// Directed port-to-port edges.
pub mod connection;
/// Deterministic evaluation order with cycle breaking.
mod order;

pub use connection::Connection;

use crate::{
    error::{Error, Missing, SandboxError},
    unit::{ControlValue, ParamValue, RenderCtx, UnitId, UnitInstance},
    MAX_PORTS, SINK_ID,
};
use order::EvalOrder;

/*
Evaluation
==========

Each output sample runs every running unit exactly once, then reads the sink:

  1. Visit units in evaluation order (topological, smallest id first among
     equals). The sink is never part of the order; it is read last.
  2. A unit's input on port p is the sum of output(src, src_port) over every
     connection (src, src_port) -> (unit, p), in ascending src order.
  3. Outputs live on the unit and are overwritten when it runs. A source that
     has not run yet this pass (a feedback edge, or a self-loop) still holds
     last sample's value, so every cycle costs exactly one sample of delay
     and evaluation always terminates. A unit fed by a cycle runs after the
     whole cycle, so edges outside a cycle are never delayed.

        ┌────────────┐
        │            ▼
      [ 1 ] ──▶ [ 2 ] ──▶ [ 0 sink ]
        ▲         │
        └─────────┘   2 → 1 is a back-edge: 1 hears 2 from one sample ago

  4. The sink's summed input on port 0 is the sample handed to the device.

A unit that traps is marked faulty. Its outputs read as zero from then on and
it is skipped until unloaded.
*/

pub struct SignalGraph {
    /// Indexed by id. Slot 0 is the sink; unloaded ids stay `None`.
    units: Vec<Option<Box<UnitInstance>>>,
    /// Sorted by `(dst, dst_port, src, src_port)`, no duplicates.
    connections: Vec<Connection>,
    order: EvalOrder,
    order_stale: bool,
}

impl SignalGraph {
    /// A graph holding only the sink, with room for `max_units` ids.
    pub fn new(max_units: usize) -> Self {
        let max_units = max_units.max(1);
        let mut units = Vec::with_capacity(max_units);
        units.push(Some(Box::new(UnitInstance::sink())));

        Self {
            units,
            connections: Vec::with_capacity(max_units * 4),
            order: EvalOrder::with_capacity(max_units),
            order_stale: true,
        }
    }

    /// Add a loaded unit under its id. If the id is already taken (or is the
    /// sink) the unit is handed back untouched.
    pub fn insert(&mut self, unit: Box<UnitInstance>) -> Result<(), Box<UnitInstance>> {
        let id = unit.id() as usize;
        if id == SINK_ID as usize || self.units.get(id).is_some_and(Option::is_some) {
            return Err(unit);
        }
        if id >= self.units.len() {
            self.units.resize_with(id + 1, || None);
        }
        self.units[id] = Some(unit);
        self.order_stale = true;
        Ok(())
    }

    /// Deactivate a unit, drop its connections, call `destroy` and hand the
    /// instance back for release. A failing `destroy` is reported but does
    /// not stop the unload.
    pub fn unload(
        &mut self,
        id: UnitId,
        report: &mut dyn FnMut(UnitId, SandboxError),
    ) -> Result<Box<UnitInstance>, Error> {
        if id == SINK_ID {
            return Err(Missing::Unit(id).into());
        }
        let mut unit = self
            .units
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(Missing::Unit(id))?;

        if let Err(e) = unit.deactivate() {
            report(id, e);
        }
        self.connections.retain(|c| !c.touches(id));
        self.order_stale = true;
        Ok(unit)
    }

    /// Add an edge. Returns `false` if it already existed.
    pub fn connect(&mut self, connection: Connection) -> Result<bool, Error> {
        self.validate(&connection)?;
        match self.connections.binary_search(&connection) {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.connections.insert(pos, connection);
                self.order_stale = true;
                Ok(true)
            }
        }
    }

    /// Remove an edge. Returns `false` if there was none.
    pub fn disconnect(&mut self, connection: Connection) -> Result<bool, Error> {
        self.validate(&connection)?;
        match self.connections.binary_search(&connection) {
            Ok(pos) => {
                self.connections.remove(pos);
                self.order_stale = true;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn validate(&self, c: &Connection) -> Result<(), Error> {
        let src = self.active(c.src)?;
        if c.src_port >= src.channels_out() {
            return Err(Missing::Port {
                unit: c.src,
                port: c.src_port,
            }
            .into());
        }
        let dst = self.active(c.dst)?;
        if c.dst_port >= dst.channels_in() {
            return Err(Missing::Port {
                unit: c.dst,
                port: c.dst_port,
            }
            .into());
        }
        Ok(())
    }

    fn active(&self, id: UnitId) -> Result<&UnitInstance, Error> {
        self.get(id)
            .filter(|unit| unit.is_active())
            .ok_or_else(|| Missing::Unit(id).into())
    }

    /// Apply a parameter value now, coerced and clamped into its range.
    pub fn set_param(&mut self, id: UnitId, param: u8, value: ControlValue) -> Result<ParamValue, Error> {
        let unit = self.get_mut(id).ok_or(Missing::Unit(id))?;
        let was_running = unit.is_running();
        let result = unit.set_param(param, value);
        if was_running && !unit.is_running() {
            self.order_stale = true;
        }
        result
    }

    /// Read a parameter back from the unit.
    pub fn get_param(&mut self, id: UnitId, param: u8) -> Result<ParamValue, Error> {
        let unit = self.get_mut(id).ok_or(Missing::Unit(id))?;
        let was_running = unit.is_running();
        let result = unit.get_param(param);
        if was_running && !unit.is_running() {
            self.order_stale = true;
        }
        result
    }

    pub fn get(&self, id: UnitId) -> Option<&UnitInstance> {
        self.units.get(id as usize).and_then(Option::as_deref)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut UnitInstance> {
        self.units.get_mut(id as usize).and_then(Option::as_deref_mut)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.get(id).is_some()
    }

    /// Loaded units, the sink included, by ascending id.
    pub fn units(&self) -> impl Iterator<Item = &UnitInstance> {
        self.units.iter().filter_map(Option::as_deref)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Current evaluation order, recomputed if the topology changed.
    pub fn evaluation_order(&mut self) -> &[UnitId] {
        self.refresh_order();
        self.order.as_slice()
    }

    fn refresh_order(&mut self) {
        if self.order_stale {
            self.order.rebuild(&self.units, &self.connections);
            self.order_stale = false;
        }
    }

    /// Evaluate one sample and return the sink's input. Units that trap are
    /// reported through `report` and marked faulty.
    pub fn render_frame(
        &mut self,
        ctx: &RenderCtx,
        report: &mut dyn FnMut(UnitId, SandboxError),
    ) -> f32 {
        self.refresh_order();

        for &id in self.order.as_slice() {
            let inputs = gather(&self.units, &self.connections, id);
            let Some(unit) = self.units.get_mut(id as usize).and_then(Option::as_deref_mut) else {
                continue;
            };
            if let Err(e) = unit.render(ctx, &inputs) {
                report(id, e);
                self.order_stale = true;
            }
        }

        gather(&self.units, &self.connections, SINK_ID)[0]
    }
}

/// Sum every connection into `dst`, per input port.
fn gather(units: &[Option<Box<UnitInstance>>], connections: &[Connection], dst: UnitId) -> [f32; MAX_PORTS] {
    let mut inputs = [0.0; MAX_PORTS];
    let start = connections.partition_point(|c| c.dst < dst);

    for c in connections[start..].iter().take_while(|c| c.dst == dst) {
        let Some(src) = units.get(c.src as usize).and_then(Option::as_deref) else {
            continue;
        };
        if src.is_running() {
            inputs[c.dst_port as usize] += src.output(c.src_port);
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{ParamDescriptor, ParamType, UnitInfo, UnitProcessor};
    use std::sync::{Arc, Mutex};

    /// Emits a constant, ignoring its input.
    struct Constant(f32);

    impl UnitProcessor for Constant {
        fn process(&mut self, _: &RenderCtx, _: f32, _: u8) -> Result<f32, SandboxError> {
            Ok(self.0)
        }

        fn param_set(&mut self, _: u8, value: ParamValue) -> Result<(), SandboxError> {
            self.0 = value.as_f64() as f32;
            Ok(())
        }

        fn param_get(&mut self, _: u8, _: ParamType) -> Result<ParamValue, SandboxError> {
            Ok(ParamValue::F32(self.0))
        }
    }

    /// `out = in + 1`, recording the evaluation order in a shared log.
    struct AddOne {
        id: UnitId,
        log: Arc<Mutex<Vec<UnitId>>>,
    }

    impl UnitProcessor for AddOne {
        fn process(&mut self, _: &RenderCtx, input: f32, _: u8) -> Result<f32, SandboxError> {
            self.log.lock().unwrap().push(self.id);
            Ok(input + 1.0)
        }

        fn param_set(&mut self, _: u8, _: ParamValue) -> Result<(), SandboxError> {
            Ok(())
        }

        fn param_get(&mut self, _: u8, ty: ParamType) -> Result<ParamValue, SandboxError> {
            Ok(ParamValue::from_bits(ty, 0))
        }
    }

    /// Traps on the first call.
    struct Broken;

    impl UnitProcessor for Broken {
        fn process(&mut self, _: &RenderCtx, _: f32, _: u8) -> Result<f32, SandboxError> {
            Err(SandboxError::Trap {
                export: "process",
                message: "unreachable".into(),
            })
        }

        fn param_set(&mut self, _: u8, _: ParamValue) -> Result<(), SandboxError> {
            Ok(())
        }

        fn param_get(&mut self, _: u8, ty: ParamType) -> Result<ParamValue, SandboxError> {
            Ok(ParamValue::from_bits(ty, 0))
        }
    }

    fn info(name: &str, channels_in: u8, channels_out: u8) -> UnitInfo {
        UnitInfo {
            name: name.into(),
            channels_in,
            channels_out,
            params: vec![ParamDescriptor::new(
                "level",
                ParamValue::F32(-1.0),
                ParamValue::F32(1.0),
                ParamValue::F32(0.0),
            )],
        }
    }

    fn constant(id: UnitId, value: f32) -> Box<UnitInstance> {
        Box::new(UnitInstance::new(id, info("const", 0, 1), Box::new(Constant(value))))
    }

    fn add_one(id: UnitId, log: &Arc<Mutex<Vec<UnitId>>>) -> Box<UnitInstance> {
        let processor = AddOne {
            id,
            log: Arc::clone(log),
        };
        Box::new(UnitInstance::new(id, info("add", 1, 1), Box::new(processor)))
    }

    fn ctx() -> RenderCtx {
        RenderCtx::at_sample(0, 0, 48_000.0)
    }

    fn render(graph: &mut SignalGraph) -> f32 {
        graph.render_frame(&ctx(), &mut |id, e| panic!("unit {id} failed: {e}"))
    }

    #[test]
    fn test_sums_into_sink_port() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 0.25)).unwrap();
        graph.insert(constant(2, 0.5)).unwrap();
        graph.connect(Connection::new(2, 0, 0, 0)).unwrap();
        graph.connect(Connection::new(1, 0, 0, 0)).unwrap();

        assert_eq!(render(&mut graph), 0.75);

        let sources: Vec<_> = graph.connections().iter().map(|c| c.src).collect();
        assert_eq!(sources, [1, 2], "sink inputs are summed by ascending source id");
    }

    #[test]
    fn test_chain_is_evaluated_in_topological_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = SignalGraph::new(16);
        // 3 -> 1 -> 2 -> sink, inserted out of order
        graph.insert(add_one(2, &log)).unwrap();
        graph.insert(add_one(1, &log)).unwrap();
        graph.insert(add_one(3, &log)).unwrap();
        graph.connect(Connection::new(1, 0, 2, 0)).unwrap();
        graph.connect(Connection::new(3, 0, 1, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 0, 0)).unwrap();

        assert_eq!(graph.evaluation_order(), &[3, 1, 2]);
        assert_eq!(render(&mut graph), 3.0, "each stage adds one within the same sample");
        assert_eq!(*log.lock().unwrap(), [3, 1, 2]);
    }

    #[test]
    fn test_feedback_cycle_delays_by_one_sample() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = SignalGraph::new(16);
        graph.insert(add_one(1, &log)).unwrap();
        graph.insert(add_one(2, &log)).unwrap();
        graph.connect(Connection::new(1, 0, 2, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 1, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 0, 0)).unwrap();

        assert_eq!(graph.evaluation_order(), &[1, 2], "cycle is broken at the smallest id");

        // Unit 1 reads unit 2's previous output: 0 -> 1 -> 2, then 2 -> 3 -> 4.
        assert_eq!(render(&mut graph), 2.0);
        assert_eq!(render(&mut graph), 4.0);
        assert_eq!(render(&mut graph), 6.0);
    }

    #[test]
    fn test_unit_fed_by_a_cycle_hears_it_in_the_same_sample() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = SignalGraph::new(16);
        for id in 2..=4 {
            graph.insert(add_one(id, &log)).unwrap();
        }
        // 3 <-> 4 feed each other; 2 only listens to 3.
        graph.connect(Connection::new(3, 0, 4, 0)).unwrap();
        graph.connect(Connection::new(4, 0, 3, 0)).unwrap();
        graph.connect(Connection::new(3, 0, 2, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 0, 0)).unwrap();

        let order = graph.evaluation_order().to_vec();
        let pos = |id| order.iter().position(|&u| u == id).unwrap();
        assert!(pos(3) < pos(2), "the tail runs after the cycle: {order:?}");
        assert_eq!(order, [3, 2, 4]);

        // 3 reads 4 from one sample ago (0), 2 reads 3 from this sample.
        assert_eq!(render(&mut graph), 2.0);
        // 4 became 2 last sample: 3 -> 3, 2 -> 4.
        assert_eq!(render(&mut graph), 4.0);
    }

    #[test]
    fn test_chain_downstream_of_two_cycles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = SignalGraph::new(16);
        for id in 1..=5 {
            graph.insert(add_one(id, &log)).unwrap();
        }
        // cycle 4 <-> 5 feeds 1, which feeds cycle 2 <-> 3.
        graph.connect(Connection::new(4, 0, 5, 0)).unwrap();
        graph.connect(Connection::new(5, 0, 4, 0)).unwrap();
        graph.connect(Connection::new(5, 0, 1, 0)).unwrap();
        graph.connect(Connection::new(1, 0, 2, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 3, 0)).unwrap();
        graph.connect(Connection::new(3, 0, 2, 0)).unwrap();

        assert_eq!(graph.evaluation_order(), &[4, 5, 1, 2, 3]);
    }

    #[test]
    fn test_self_loop_accumulates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = SignalGraph::new(16);
        graph.insert(add_one(1, &log)).unwrap();
        graph.connect(Connection::new(1, 0, 1, 0)).unwrap();
        graph.connect(Connection::new(1, 0, 0, 0)).unwrap();

        let outputs: Vec<_> = (0..4).map(|_| render(&mut graph)).collect();
        assert_eq!(outputs, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_rejects_invalid_edges() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 1.0)).unwrap();

        let unknown = graph.connect(Connection::new(7, 0, 0, 0)).unwrap_err();
        assert!(unknown.is_not_found());
        assert!(graph.connect(Connection::new(1, 1, 0, 0)).is_err(), "unit 1 has one output");
        assert!(graph.connect(Connection::new(0, 0, 1, 0)).is_err(), "sink has no outputs");
        assert!(graph.connect(Connection::new(1, 0, 0, 1)).is_err(), "sink has one input");

        assert!(graph.connect(Connection::new(1, 0, 0, 0)).unwrap());
        assert!(!graph.connect(Connection::new(1, 0, 0, 0)).unwrap(), "duplicate is ignored");
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_disconnect() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 1.0)).unwrap();
        graph.connect(Connection::new(1, 0, 0, 0)).unwrap();
        assert_eq!(render(&mut graph), 1.0);

        assert!(graph.disconnect(Connection::new(1, 0, 0, 0)).unwrap());
        assert!(!graph.disconnect(Connection::new(1, 0, 0, 0)).unwrap());
        assert_eq!(render(&mut graph), 0.0);
    }

    #[test]
    fn test_unload_prunes_connections_and_ids_stay_retired() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 1.0)).unwrap();
        graph.insert(constant(2, 0.5)).unwrap();
        graph.connect(Connection::new(1, 0, 0, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 0, 0)).unwrap();

        let unit = graph.unload(1, &mut |_, _| {}).unwrap();
        assert!(!unit.is_active());
        assert_eq!(graph.connections().len(), 1);
        assert_eq!(render(&mut graph), 0.5);

        assert!(graph.connect(Connection::new(1, 0, 0, 0)).is_err());
        assert!(graph.set_param(1, 0, ControlValue::Float(0.3)).unwrap_err().is_not_found());
        assert!(graph.unload(1, &mut |_, _| {}).is_err());
        assert!(graph.unload(SINK_ID, &mut |_, _| {}).is_err(), "the sink cannot be unloaded");
    }

    #[test]
    fn test_faulty_unit_falls_silent() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 0.25)).unwrap();
        let broken = UnitInstance::new(2, info("broken", 0, 1), Box::new(Broken));
        graph.insert(Box::new(broken)).unwrap();
        graph.connect(Connection::new(1, 0, 0, 0)).unwrap();
        graph.connect(Connection::new(2, 0, 0, 0)).unwrap();

        let mut faults = Vec::new();
        let first = graph.render_frame(&ctx(), &mut |id, _| faults.push(id));
        let second = graph.render_frame(&ctx(), &mut |id, _| faults.push(id));

        assert_eq!((first, second), (0.25, 0.25));
        assert_eq!(faults, [2], "a faulty unit is reported once and then skipped");
        assert!(graph.get(2).unwrap().is_faulty());
        assert!(graph.get(2).unwrap().is_active(), "faulty units stay loaded");
    }

    #[test]
    fn test_set_param_clamps() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 0.0)).unwrap();
        graph.connect(Connection::new(1, 0, 0, 0)).unwrap();

        let applied = graph.set_param(1, 0, ControlValue::Float(5.0)).unwrap();
        assert_eq!(applied, ParamValue::F32(1.0));
        assert_eq!(render(&mut graph), 1.0);
        assert!(graph.set_param(1, 9, ControlValue::Int(0)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_insert_hands_unit_back() {
        let mut graph = SignalGraph::new(16);
        graph.insert(constant(1, 0.0)).unwrap();
        let rejected = graph.insert(constant(1, 1.0)).unwrap_err();
        assert_eq!(rejected.id(), 1);
        assert!(graph.insert(constant(SINK_ID, 1.0)).is_err());
    }
}
