//! Vertices of the PiSDF graph and their runtime information.

use crate::error::Result;
use crate::expr::Expression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::EdgeId;

/// Default timing, in cost units, for vertices without a timing expression.
pub const DEFAULT_TIMING: u64 = 100;

/// Kind tag of a vertex. Rate computation, expansion and allocation dispatch
/// on this tag with exhaustive matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexKind {
    /// Regular actor backed by a kernel.
    Normal,
    /// Actor that produces dynamic parameter values.
    Config,
    /// Splits one input window into consecutive output windows.
    Fork,
    /// Concatenates consecutive input windows into one output.
    Join,
    /// Broadcasts one input window to every output.
    Duplicate,
    /// Keeps the suffix of its input.
    Tail,
    /// Keeps the prefix of its input.
    Head,
    /// Cycles its input to fill a larger output.
    Repeat,
    /// Produces the initial tokens of a delay.
    Init,
    /// Consumes the final tokens of a delay.
    End,
    /// Virtual attach point for a delay's setter and getter actors.
    Delay,
    /// Reads from memory the runtime does not manage.
    ExternIn,
    /// Writes to memory the runtime does not manage.
    ExternOut,
    /// Instance of a subgraph; the payload indexes the parent's subgraph
    /// list.
    Graph(usize),
    /// Input port of the enclosing subgraph; payload is the interface index.
    InputInterface(usize),
    /// Output port of the enclosing subgraph; payload is the interface index.
    OutputInterface(usize),
}

impl VertexKind {
    /// True for kinds that become schedulable tasks.
    pub fn executable(self) -> bool {
        !matches!(
            self,
            VertexKind::Graph(_)
                | VertexKind::Delay
                | VertexKind::InputInterface(_)
                | VertexKind::OutputInterface(_)
        )
    }

    /// True for the rate-adaptation kinds inserted by the expander.
    pub fn special(self) -> bool {
        matches!(
            self,
            VertexKind::Fork
                | VertexKind::Join
                | VertexKind::Duplicate
                | VertexKind::Tail
                | VertexKind::Head
                | VertexKind::Repeat
                | VertexKind::Init
                | VertexKind::End
        )
    }

    pub fn interface(self) -> bool {
        matches!(self, VertexKind::InputInterface(_) | VertexKind::OutputInterface(_))
    }
}

/// Mapping constraints and timing expressions of a vertex.
///
/// Constraints are a per-PE whitelist (absent means mappable everywhere);
/// timings are one expression per cluster, falling back to
/// [`DEFAULT_TIMING`].
#[derive(Clone, Debug, Default)]
pub struct RtInfo {
    pub(crate) allowed_pes: Option<Vec<usize>>,
    pub(crate) timings: HashMap<usize, Expression>,
}

impl RtInfo {
    pub fn mappable_on(&self, pe_ix: usize) -> bool {
        match &self.allowed_pes {
            None => true,
            Some(allowed) => allowed.contains(&pe_ix),
        }
    }

    pub fn timing_on(&self, cluster_ix: usize, lookup: &dyn Fn(usize) -> Option<i64>) -> Result<u64> {
        match self.timings.get(&cluster_ix) {
            None => Ok(DEFAULT_TIMING),
            Some(expr) => Ok(expr.value(lookup)?.max(0) as u64),
        }
    }
}

/// One vertex of a PiSDF graph. Port indices are dense: port `i` of `n`
/// occupies slot `i` of the input (output) edge array.
#[derive(Clone, Debug)]
pub struct Vertex {
    pub name: String,
    pub kind: VertexKind,
    pub(crate) inputs: Vec<Option<EdgeId>>,
    pub(crate) outputs: Vec<Option<EdgeId>>,
    /// Kernel index in the platform's kernel table, for executable kinds.
    pub kernel: Option<usize>,
    pub rt: RtInfo,
    /// Parameters this vertex sets at runtime (config actors only).
    pub config_params: Vec<usize>,
    /// Parameter values handed to the kernel as inputs.
    pub kernel_params: Vec<usize>,
    /// External buffer address for EXTERN_IN / EXTERN_OUT vertices.
    pub extern_address: Option<u64>,
}

impl Vertex {
    pub(crate) fn new(name: &str, kind: VertexKind, n_in: usize, n_out: usize) -> Self {
        Vertex {
            name: name.to_string(),
            kind,
            inputs: vec![None; n_in],
            outputs: vec![None; n_out],
            kernel: None,
            rt: RtInfo::default(),
            config_params: Vec::new(),
            kernel_params: Vec::new(),
            extern_address: None,
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_edge(&self, port: usize) -> Option<EdgeId> {
        self.inputs.get(port).copied().flatten()
    }

    pub fn output_edge(&self, port: usize) -> Option<EdgeId> {
        self.outputs.get(port).copied().flatten()
    }

    pub fn input_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.inputs.iter().filter_map(|e| *e)
    }

    pub fn output_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.outputs.iter().filter_map(|e| *e)
    }
}
