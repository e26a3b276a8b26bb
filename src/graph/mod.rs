//! In-memory representation of a hierarchical PiSDF graph.
//!
//! A [`Graph`] owns its vertices, edges, parameters and nested subgraphs.
//! Applications build it once through the methods here and never mutate it
//! afterwards; all per-iteration state (parameter values, repetition
//! vectors) lives in the [`handler`](crate::handler) tree.
//!
//! Subgraphs appear in their parent as a vertex of kind
//! [`VertexKind::Graph`] whose port `i` corresponds to interface `i` of the
//! nested graph. Connecting an edge to the wrong side of an interface is a
//! configuration error caught at build time.

mod edge;
mod param;
mod vertex;

pub use edge::{Delay, Edge};
pub use param::{Param, ParamKind};
pub use vertex::{DEFAULT_TIMING, RtInfo, Vertex, VertexKind};

use crate::error::{Error, Result};
use crate::expr::Expression;
use serde::{Deserialize, Serialize};

/// Index of a vertex within its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub(crate) u32);

impl VertexId {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn ix(self) -> usize {
        self.0 as usize
    }
}

/// Index of an edge within its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub(crate) u32);

impl EdgeId {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn ix(self) -> usize {
        self.0 as usize
    }
}

/// One level of a hierarchical PiSDF application.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub name: String,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    params: Vec<Param>,
    subgraphs: Vec<Graph>,
    input_interfaces: Vec<VertexId>,
    output_interfaces: Vec<VertexId>,
}

impl Graph {
    pub fn new(name: &str) -> Self {
        Graph {
            name: name.to_string(),
            ..Graph::default()
        }
    }

    /* === Construction === */

    /// Declare a parameter. Static expressions may reference parameters
    /// declared earlier in the same graph.
    pub fn add_param(&mut self, name: &str, kind: ParamKind) -> usize {
        self.params.push(Param {
            name: name.to_string(),
            kind,
        });
        self.params.len() - 1
    }

    /// Add a vertex with dense input and output ports.
    pub fn add_vertex(&mut self, name: &str, kind: VertexKind, n_in: usize, n_out: usize) -> VertexId {
        assert!(
            !kind.interface(),
            "interfaces are added through add_input_interface / add_output_interface"
        );
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex::new(name, kind, n_in, n_out));
        id
    }

    /// Add a config actor that sets `sets` parameters of this graph.
    pub fn add_config(&mut self, name: &str, n_in: usize, n_out: usize, sets: Vec<usize>) -> VertexId {
        let id = self.add_vertex(name, VertexKind::Config, n_in, n_out);
        self.vertices[id.ix()].config_params = sets;
        id
    }

    /// Declare an input interface of this graph. Inside the graph it acts as
    /// a source with a single output port.
    pub fn add_input_interface(&mut self, name: &str) -> VertexId {
        let ix = self.input_interfaces.len();
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex::new(name, VertexKind::InputInterface(ix), 0, 1));
        self.input_interfaces.push(id);
        id
    }

    /// Declare an output interface of this graph; a sink with one input.
    pub fn add_output_interface(&mut self, name: &str) -> VertexId {
        let ix = self.output_interfaces.len();
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex::new(name, VertexKind::OutputInterface(ix), 1, 0));
        self.output_interfaces.push(id);
        id
    }

    /// Nest `subgraph` under this graph. The returned vertex exposes one
    /// input port per input interface and one output port per output
    /// interface of the nested graph, in interface declaration order.
    pub fn add_subgraph(&mut self, subgraph: Graph) -> VertexId {
        let n_in = subgraph.input_interfaces.len();
        let n_out = subgraph.output_interfaces.len();
        let sub_ix = self.subgraphs.len();
        let name = subgraph.name.clone();
        let id = self.add_vertex(&name, VertexKind::Graph(sub_ix), n_in, n_out);
        self.subgraphs.push(subgraph);
        id
    }

    pub fn set_kernel(&mut self, vertex: VertexId, kernel_ix: usize) {
        self.vertices[vertex.ix()].kernel = Some(kernel_ix);
    }

    /// Restrict `vertex` to the given PEs. Absent constraint means mappable
    /// everywhere.
    pub fn set_allowed_pes(&mut self, vertex: VertexId, pes: Vec<usize>) {
        self.vertices[vertex.ix()].rt.allowed_pes = Some(pes);
    }

    pub fn set_timing(&mut self, vertex: VertexId, cluster_ix: usize, timing: Expression) {
        self.vertices[vertex.ix()].rt.timings.insert(cluster_ix, timing);
    }

    /// Declare which parameter values are passed to the vertex kernel.
    pub fn set_kernel_params(&mut self, vertex: VertexId, params: Vec<usize>) {
        self.vertices[vertex.ix()].kernel_params = params;
    }

    /// Bind an EXTERN_IN / EXTERN_OUT vertex to an external buffer address.
    pub fn set_extern_address(&mut self, vertex: VertexId, address: u64) {
        self.vertices[vertex.ix()].extern_address = Some(address);
    }

    /// Connect `source` port to `sink` port with the given rate expressions.
    pub fn connect(
        &mut self,
        source: VertexId,
        source_port: usize,
        source_rate: impl Into<Expression>,
        sink: VertexId,
        sink_port: usize,
        sink_rate: impl Into<Expression>,
    ) -> Result<EdgeId> {
        self.connect_inner(source, source_port, source_rate.into(), sink, sink_port, sink_rate.into(), None)
    }

    /// Connect with a delay of `delay` initial tokens.
    pub fn connect_delayed(
        &mut self,
        source: VertexId,
        source_port: usize,
        source_rate: impl Into<Expression>,
        sink: VertexId,
        sink_port: usize,
        sink_rate: impl Into<Expression>,
        delay: impl Into<Expression>,
        persistent: bool,
    ) -> Result<EdgeId> {
        self.connect_inner(
            source,
            source_port,
            source_rate.into(),
            sink,
            sink_port,
            sink_rate.into(),
            Some(Delay {
                value: delay.into(),
                persistent,
                vertex: None,
            }),
        )
    }

    /// Attach setter and getter actors to the delay of `edge`. The actors
    /// connect through a virtual DELAY vertex whose ports carry the delay
    /// value as rate.
    pub fn attach_delay_actors(
        &mut self,
        edge: EdgeId,
        setter: Option<(VertexId, usize, Expression)>,
        getter: Option<(VertexId, usize, Expression)>,
    ) -> Result<()> {
        let delay_expr = match &self.edges[edge.ix()].delay {
            Some(d) => d.value.clone(),
            None => {
                return Err(Error::PipelineInconsistent {
                    graph: self.name.clone(),
                    reason: "delay actors on an edge without delay".into(),
                });
            }
        };
        let n_in = usize::from(setter.is_some());
        let n_out = usize::from(getter.is_some());
        let delay_vertex = self.add_vertex("delay", VertexKind::Delay, n_in, n_out);
        if let Some((v, port, rate)) = setter {
            self.connect_inner(v, port, rate, delay_vertex, 0, delay_expr.clone(), None)?;
        }
        if let Some((v, port, rate)) = getter {
            self.connect_inner(delay_vertex, 0, delay_expr, v, port, rate, None)?;
        }
        self.edges[edge.ix()].delay.as_mut().expect("delay checked").vertex = Some(delay_vertex);
        Ok(())
    }

    fn connect_inner(
        &mut self,
        source: VertexId,
        source_port: usize,
        source_rate: Expression,
        sink: VertexId,
        sink_port: usize,
        sink_rate: Expression,
        delay: Option<Delay>,
    ) -> Result<EdgeId> {
        // An input interface only produces inside its graph, an output
        // interface only consumes.
        if matches!(self.vertices[sink.ix()].kind, VertexKind::InputInterface(_)) {
            return Err(Error::InterfaceMisconnected {
                interface: self.vertices[sink.ix()].name.clone(),
            });
        }
        if matches!(self.vertices[source.ix()].kind, VertexKind::OutputInterface(_)) {
            return Err(Error::InterfaceMisconnected {
                interface: self.vertices[source.ix()].name.clone(),
            });
        }
        let id = EdgeId(self.edges.len() as u32);
        let src_slot = &mut self.vertices[source.ix()].outputs[source_port];
        assert!(src_slot.is_none(), "output port already connected");
        *src_slot = Some(id);
        let snk_slot = &mut self.vertices[sink.ix()].inputs[sink_port];
        assert!(snk_slot.is_none(), "input port already connected");
        *snk_slot = Some(id);
        self.edges.push(Edge {
            source,
            source_port,
            source_rate,
            sink,
            sink_port,
            sink_rate,
            delay,
        });
        Ok(id)
    }

    /* === Accessors === */

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.ix()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.ix()]
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> {
        (0..self.vertices.len() as u32).map(VertexId)
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
        (0..self.edges.len() as u32).map(EdgeId)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param(&self, ix: usize) -> &Param {
        &self.params[ix]
    }

    pub fn subgraph(&self, ix: usize) -> &Graph {
        &self.subgraphs[ix]
    }

    pub fn subgraph_count(&self) -> usize {
        self.subgraphs.len()
    }

    pub fn input_interfaces(&self) -> &[VertexId] {
        &self.input_interfaces
    }

    pub fn output_interfaces(&self) -> &[VertexId] {
        &self.output_interfaces
    }

    /// Config actors of this level, in declaration order.
    pub fn config_vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertex_ids()
            .filter(|id| self.vertices[id.ix()].kind == VertexKind::Config)
    }

    /// True if any parameter of this level is dynamic.
    pub fn has_dynamic_params(&self) -> bool {
        self.params.iter().any(Param::dynamic)
    }

    /// True if no level of the hierarchy carries a dynamic parameter.
    pub fn fully_static(&self) -> bool {
        !self.has_dynamic_params() && self.subgraphs.iter().all(Graph::fully_static)
    }
}
