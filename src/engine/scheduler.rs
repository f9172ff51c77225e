//! Sample-accurate parameter automation.
//!
//! Requests arrive as "seconds from now" and are turned into an absolute
//! sample index when the audio thread drains them:
//!
//! ```text
//! fire_at = now + ceil(seconds * sample_rate)
//! ```
//!
//! [`Scheduler::tick`] runs once per sample, so a change lands on its exact
//! sample no matter where block boundaries fall. Events due on the same sample
//! fire in the order they were scheduled.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use crate::{
    error::{Error, Missing, SandboxError},
    graph::SignalGraph,
    unit::{ControlValue, ParamValue, UnitId},
};

/// A parameter change waiting for its sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamChange {
    pub unit: UnitId,
    pub param: u8,
    pub value: ControlValue,
}

/// Outcome of [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scheduled {
    /// Applied on the spot; carries the value after coercion and clamping.
    Applied(ParamValue),
    /// Queued to fire at this sample index.
    At(u64),
}

#[derive(Debug)]
struct Pending {
    fire_at: u64,
    seq: u64,
    change: ParamChange,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

pub struct Scheduler {
    queue: BinaryHeap<Reverse<Pending>>,
    capacity: usize,
    next_seq: u64,
    sample_rate: f64,
}

impl Scheduler {
    /// Room for `capacity` pending events is reserved up front; the queue
    /// never grows past it.
    pub fn new(sample_rate: u32, capacity: usize) -> Self {
        Self {
            queue: BinaryHeap::with_capacity(capacity),
            capacity,
            next_seq: 0,
            sample_rate: sample_rate as f64,
        }
    }

    /// Absolute sample index for an event `seconds` after `now`, or `None`
    /// if it is due immediately.
    pub fn fire_index(&self, now: u64, seconds: f64) -> Option<u64> {
        // NaN counts as "now"
        if !(seconds > 0.0) {
            return None;
        }
        let offset = (seconds * self.sample_rate).ceil();
        Some(now.saturating_add(offset as u64))
    }

    /// Apply `change` now or queue it. Changes for units the graph does not
    /// hold are rejected up front.
    pub fn schedule(
        &mut self,
        graph: &mut SignalGraph,
        now: u64,
        change: ParamChange,
        seconds: f64,
    ) -> Result<Scheduled, Error> {
        let Some(fire_at) = self.fire_index(now, seconds) else {
            let applied = graph.set_param(change.unit, change.param, change.value)?;
            return Ok(Scheduled::Applied(applied));
        };

        let unit = graph.get(change.unit).ok_or(Missing::Unit(change.unit))?;
        if change.param as usize >= unit.params().len() {
            return Err(Missing::Param {
                unit: change.unit,
                param: change.param,
            }
            .into());
        }
        if self.queue.len() >= self.capacity {
            return Err(Error::SchedulerFull(self.capacity));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Pending {
            fire_at,
            seq,
            change,
        }));
        Ok(Scheduled::At(fire_at))
    }

    /// Apply every change due at or before `sample_index`. Changes whose unit
    /// has since been unloaded are dropped; a unit that traps while taking a
    /// change goes through `report`.
    pub fn tick(
        &mut self,
        sample_index: u64,
        graph: &mut SignalGraph,
        report: &mut dyn FnMut(UnitId, SandboxError),
    ) {
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.fire_at > sample_index {
                break;
            }
            let Some(Reverse(Pending { change, .. })) = self.queue.pop() else {
                break;
            };
            if let Err(Error::Sandbox(e)) = graph.set_param(change.unit, change.param, change.value) {
                report(change.unit, e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Sample index of the next pending change.
    pub fn next_due(&self) -> Option<u64> {
        self.queue.peek().map(|Reverse(p)| p.fire_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{ParamDescriptor, ParamType, RenderCtx, UnitInfo, UnitInstance, UnitProcessor};
    use std::sync::{Arc, Mutex};

    /// Records every value it receives.
    struct Recorder(Arc<Mutex<Vec<f32>>>);

    impl UnitProcessor for Recorder {
        fn process(&mut self, _: &RenderCtx, _: f32, _: u8) -> Result<f32, SandboxError> {
            Ok(0.0)
        }

        fn param_set(&mut self, _: u8, value: ParamValue) -> Result<(), SandboxError> {
            self.0.lock().unwrap().push(value.as_f64() as f32);
            Ok(())
        }

        fn param_get(&mut self, _: u8, ty: ParamType) -> Result<ParamValue, SandboxError> {
            Ok(ParamValue::from_bits(ty, 0))
        }
    }

    fn graph_with_recorder() -> (SignalGraph, Arc<Mutex<Vec<f32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let info = UnitInfo {
            name: "rec".into(),
            channels_in: 0,
            channels_out: 1,
            params: vec![ParamDescriptor::new(
                "value",
                ParamValue::F32(0.0),
                ParamValue::F32(100.0),
                ParamValue::F32(0.0),
            )],
        };
        let mut graph = SignalGraph::new(8);
        graph
            .insert(Box::new(UnitInstance::new(1, info, Box::new(Recorder(Arc::clone(&seen))))))
            .unwrap();
        (graph, seen)
    }

    fn change(value: f64) -> ParamChange {
        ParamChange {
            unit: 1,
            param: 0,
            value: ControlValue::Float(value),
        }
    }

    fn no_faults() -> impl FnMut(UnitId, SandboxError) {
        |unit, e| panic!("unit {unit} faulted: {e}")
    }

    #[test]
    fn fire_index_rounds_up() {
        let scheduler = Scheduler::new(1000, 16);
        assert_eq!(scheduler.fire_index(0, 0.25), Some(250));
        assert_eq!(scheduler.fire_index(100, 0.0105), Some(111));
        assert_eq!(scheduler.fire_index(5, 0.0), None);
        assert_eq!(scheduler.fire_index(5, -1.0), None);
        assert_eq!(scheduler.fire_index(5, f64::NAN), None);
    }

    #[test]
    fn fires_on_its_exact_sample() {
        let (mut graph, seen) = graph_with_recorder();
        let mut scheduler = Scheduler::new(1000, 16);
        let mut report = no_faults();

        assert_eq!(
            scheduler.schedule(&mut graph, 0, change(7.0), 0.25).unwrap(),
            Scheduled::At(250)
        );

        for sample in 0..250 {
            scheduler.tick(sample, &mut graph, &mut report);
        }
        assert!(seen.lock().unwrap().is_empty(), "nothing fires before sample 250");

        scheduler.tick(250, &mut graph, &mut report);
        assert_eq!(*seen.lock().unwrap(), [7.0]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn immediate_changes_apply_during_schedule() {
        let (mut graph, seen) = graph_with_recorder();
        let mut scheduler = Scheduler::new(48_000, 16);

        let outcome = scheduler.schedule(&mut graph, 10, change(250.0), 0.0).unwrap();

        assert_eq!(outcome, Scheduled::Applied(ParamValue::F32(100.0)), "clamped to max");
        assert_eq!(*seen.lock().unwrap(), [100.0]);
    }

    #[test]
    fn same_sample_changes_keep_their_order() {
        let (mut graph, seen) = graph_with_recorder();
        let mut scheduler = Scheduler::new(1000, 16);

        for value in [3.0, 1.0, 2.0] {
            scheduler.schedule(&mut graph, 0, change(value), 0.25).unwrap();
        }
        scheduler.schedule(&mut graph, 0, change(9.0), 0.125).unwrap();
        scheduler.tick(250, &mut graph, &mut no_faults());

        assert_eq!(*seen.lock().unwrap(), [9.0, 3.0, 1.0, 2.0]);
    }

    #[test]
    fn unloaded_unit_cancels_its_changes() {
        let (mut graph, seen) = graph_with_recorder();
        let mut scheduler = Scheduler::new(1000, 16);
        scheduler.schedule(&mut graph, 0, change(1.0), 0.001).unwrap();

        graph.unload(1, &mut |_, _| {}).unwrap();
        scheduler.tick(1, &mut graph, &mut no_faults());

        assert!(seen.lock().unwrap().is_empty());
        assert!(scheduler.is_empty(), "the stale change is consumed");
        assert!(scheduler
            .schedule(&mut graph, 1, change(1.0), 0.5)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn full_queue_rejects() {
        let (mut graph, _) = graph_with_recorder();
        let mut scheduler = Scheduler::new(1000, 2);

        scheduler.schedule(&mut graph, 0, change(1.0), 1.0).unwrap();
        scheduler.schedule(&mut graph, 0, change(2.0), 1.0).unwrap();
        let err = scheduler.schedule(&mut graph, 0, change(3.0), 1.0).unwrap_err();

        assert!(matches!(err, Error::SchedulerFull(2)));
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.next_due(), Some(1000));
    }
}
