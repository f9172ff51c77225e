use std::fmt;

use serde::{Deserialize, Serialize};

use crate::unit::UnitId;

/// A directed edge from an output port to an input port.
///
/// Field order is the sort order: connections into the same port sit next to
/// each other, by ascending source id, which is the order they are summed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub dst: UnitId,
    pub dst_port: u8,
    pub src: UnitId,
    pub src_port: u8,
}

impl Connection {
    pub fn new(src: UnitId, src_port: u8, dst: UnitId, dst_port: u8) -> Self {
        Self {
            dst,
            dst_port,
            src,
            src_port,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.src == self.dst
    }

    pub fn touches(&self, unit: UnitId) -> bool {
        self.src == unit || self.dst == unit
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src, self.src_port, self.dst, self.dst_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_destination_then_source() {
        let mut edges = vec![
            Connection::new(3, 0, 0, 0),
            Connection::new(1, 0, 2, 0),
            Connection::new(1, 0, 0, 0),
            Connection::new(2, 0, 0, 0),
        ];
        edges.sort();

        let sources: Vec<_> = edges.iter().map(|c| (c.dst, c.src)).collect();
        assert_eq!(sources, [(0, 1), (0, 2), (0, 3), (2, 1)]);
    }
}
