//! Edges and delays of the PiSDF graph.

use crate::expr::Expression;

use super::VertexId;

/// Initial-token storage attached to an edge.
///
/// A persistent delay keeps its buffer across iterations in memory reserved
/// at application start; a non-persistent one is re-initialized every
/// iteration, from its setter actor when one is attached.
#[derive(Clone, Debug)]
pub struct Delay {
    pub value: Expression,
    pub persistent: bool,
    /// Virtual DELAY vertex carrying the setter and getter connections.
    pub vertex: Option<VertexId>,
}

/// A directed edge between two vertex ports, with optional delay.
///
/// Rates are symbolic; once a firing has resolved its parameters the
/// balance `q(src)·src_rate = q(snk)·snk_rate` holds for every edge of a
/// consistent level.
#[derive(Clone, Debug)]
pub struct Edge {
    pub source: VertexId,
    pub source_port: usize,
    pub source_rate: Expression,
    pub sink: VertexId,
    pub sink_port: usize,
    pub sink_rate: Expression,
    pub delay: Option<Delay>,
}

impl Edge {
    pub fn delay_value(&self, lookup: &dyn Fn(usize) -> Option<i64>) -> crate::error::Result<i64> {
        match &self.delay {
            None => Ok(0),
            Some(d) => d.value.value(lookup),
        }
    }
}
