//! Evaluation order over the running units.

use std::{cmp::Reverse, collections::BinaryHeap};

use crate::{graph::Connection, unit::UnitInstance, unit::UnitId, SINK_ID};

const UNVISITED: u32 = u32::MAX;

/// Topological order of the running, non-sink units.
///
/// Kahn's algorithm, always taking the smallest ready id so equal graphs give
/// equal orders. Feedback is found first as strongly connected components
/// (Tarjan). When every remaining unit waits on another, the smallest unit of
/// a cycle whose outside inputs have all run is forced; only its inputs from
/// inside that cycle read the previous sample. Self-loops never count as
/// dependencies.
///
/// All buffers are reserved up front, so rebuilding on the audio thread does
/// not allocate while the unit count stays within capacity.
pub(crate) struct EvalOrder {
    order: Vec<UnitId>,
    indegree: Vec<u32>,
    /// Unplaced inputs reaching each component from outside it, indexed by
    /// the component's root id.
    outside: Vec<u32>,
    placed: Vec<bool>,
    ready: BinaryHeap<Reverse<UnitId>>,
    scc: Tarjan,
}

/// Iterative Tarjan over input edges, so it never recurses on the audio
/// thread. Each unit is labelled with the root id of its component.
struct Tarjan {
    index: Vec<u32>,
    low: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<UnitId>,
    /// `(unit, cursor into the connection list)`
    calls: Vec<(UnitId, usize)>,
    component: Vec<UnitId>,
}

impl EvalOrder {
    pub(crate) fn with_capacity(units: usize) -> Self {
        Self {
            order: Vec::with_capacity(units),
            indegree: Vec::with_capacity(units),
            outside: Vec::with_capacity(units),
            placed: Vec::with_capacity(units),
            ready: BinaryHeap::with_capacity(units),
            scc: Tarjan::with_capacity(units),
        }
    }

    pub(crate) fn as_slice(&self) -> &[UnitId] {
        &self.order
    }

    pub(crate) fn rebuild(&mut self, units: &[Option<Box<UnitInstance>>], connections: &[Connection]) {
        let live = |id: UnitId| {
            id != SINK_ID
                && units
                    .get(id as usize)
                    .and_then(Option::as_deref)
                    .is_some_and(UnitInstance::is_running)
        };
        let counts = |c: &Connection| !c.is_self_loop() && live(c.src) && live(c.dst);

        self.scc.run(units.len(), connections, &live, &counts);
        let component = &self.scc.component;

        self.order.clear();
        self.ready.clear();
        self.indegree.clear();
        self.indegree.resize(units.len(), 0);
        self.outside.clear();
        self.outside.resize(units.len(), 0);
        self.placed.clear();
        self.placed.resize(units.len(), false);

        for c in connections.iter().filter(|c| counts(c)) {
            self.indegree[c.dst as usize] += 1;
            let group = component[c.dst as usize];
            if component[c.src as usize] != group {
                self.outside[group as usize] += 1;
            }
        }

        let mut total = 0;
        for id in (0..units.len() as UnitId).filter(|&id| live(id)) {
            total += 1;
            if self.indegree[id as usize] == 0 {
                self.ready.push(Reverse(id));
            }
        }

        while self.order.len() < total {
            let next = match self.ready.pop() {
                Some(Reverse(id)) => id,
                // Stalled on feedback: enter the first cycle with nothing
                // left upstream of it.
                None => match (0..units.len() as UnitId).find(|&id| {
                    live(id)
                        && !self.placed[id as usize]
                        && self.outside[component[id as usize] as usize] == 0
                }) {
                    Some(id) => id,
                    None => break,
                },
            };
            if self.placed[next as usize] {
                continue;
            }
            self.placed[next as usize] = true;
            self.order.push(next);

            for c in connections.iter().filter(|c| c.src == next && counts(c)) {
                let dst = c.dst as usize;
                if self.placed[dst] {
                    continue;
                }
                let group = component[dst] as usize;
                if component[next as usize] as usize != group {
                    self.outside[group] = self.outside[group].saturating_sub(1);
                }
                self.indegree[dst] = self.indegree[dst].saturating_sub(1);
                if self.indegree[dst] == 0 {
                    self.ready.push(Reverse(c.dst));
                }
            }
        }
    }
}

impl Tarjan {
    fn with_capacity(units: usize) -> Self {
        Self {
            index: Vec::with_capacity(units),
            low: Vec::with_capacity(units),
            on_stack: Vec::with_capacity(units),
            stack: Vec::with_capacity(units),
            calls: Vec::with_capacity(units),
            component: Vec::with_capacity(units),
        }
    }

    fn run(
        &mut self,
        len: usize,
        connections: &[Connection],
        live: &dyn Fn(UnitId) -> bool,
        counts: &dyn Fn(&Connection) -> bool,
    ) {
        let Self {
            index,
            low,
            on_stack,
            stack,
            calls,
            component,
        } = self;

        index.clear();
        index.resize(len, UNVISITED);
        low.clear();
        low.resize(len, 0);
        on_stack.clear();
        on_stack.resize(len, false);
        component.clear();
        component.extend(0..len as UnitId);
        stack.clear();
        calls.clear();

        // Connections are sorted by destination, so a unit's inputs are one run.
        let inputs = |id: UnitId| connections.partition_point(|c| c.dst < id);
        let mut next_index = 0;

        for root in (0..len as UnitId).filter(|&id| live(id)) {
            if index[root as usize] != UNVISITED {
                continue;
            }
            index[root as usize] = next_index;
            low[root as usize] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root as usize] = true;
            calls.push((root, inputs(root)));

            while let Some((v, cursor)) = calls.last_mut() {
                let v = *v;
                let mut descend = None;
                while let Some(c) = connections.get(*cursor).filter(|c| c.dst == v) {
                    *cursor += 1;
                    if !counts(c) {
                        continue;
                    }
                    let w = c.src as usize;
                    if index[w] == UNVISITED {
                        descend = Some(c.src);
                        break;
                    }
                    if on_stack[w] {
                        low[v as usize] = low[v as usize].min(index[w]);
                    }
                }

                if let Some(w) = descend {
                    index[w as usize] = next_index;
                    low[w as usize] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w as usize] = true;
                    calls.push((w, inputs(w)));
                    continue;
                }

                calls.pop();
                if let Some(&(parent, _)) = calls.last() {
                    low[parent as usize] = low[parent as usize].min(low[v as usize]);
                }
                if low[v as usize] == index[v as usize] {
                    while let Some(member) = stack.pop() {
                        on_stack[member as usize] = false;
                        component[member as usize] = v;
                        if member == v {
                            break;
                        }
                    }
                }
            }
        }
    }
}
