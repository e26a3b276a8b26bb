//! Single-rate expansion of a resolved hierarchical graph.
//!
//! The expander unrolls every vertex into `q` copies and re-links each edge
//! through the partial single-rate worker: sources and sinks become linker
//! arrays, token windows are matched piecewise, and FORK / JOIN vertices are
//! inserted where a window spans more than one counterpart. Delays
//! materialize as INIT and END vertices, subgraph instances as placeholders
//! that their child job dissolves, and interfaces as REPEAT / TAIL / HEAD
//! adapters on the outer link point.
//!
//! The result is an acyclic single-rate graph whose vertices carry resolved
//! timing and constraint information, ready for scheduling without touching
//! the PiSDF tree again.

pub mod optims;

use crate::error::{Error, Result};
use crate::graph::{DEFAULT_TIMING, EdgeId, RtInfo, VertexId, VertexKind};
use crate::handler::{GraphFiring, GraphHandler};
use std::collections::HashMap;
use std::collections::VecDeque;

/// Back-reference of an SRDAG vertex into the PiSDF world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SrdagOrigin {
    /// Copy `firing` of a PiSDF vertex inside the firing scope `firing_uid`.
    Vertex {
        firing_uid: usize,
        vertex: VertexId,
        firing: u32,
    },
    /// Initial tokens of a delayed edge.
    DelayInit {
        firing_uid: usize,
        edge: EdgeId,
        persistent: bool,
    },
    /// Final tokens of a delayed edge.
    DelayEnd {
        firing_uid: usize,
        edge: EdgeId,
        persistent: bool,
    },
    /// Rate adapter inserted during expansion.
    Adapter,
}

/// Constraints and timings of an SRDAG vertex, resolved against the firing
/// scope it was expanded in.
#[derive(Clone, Debug, Default)]
pub struct ResolvedRt {
    pub allowed_pes: Option<Vec<usize>>,
    pub timings: HashMap<usize, u64>,
}

impl ResolvedRt {
    pub fn resolve(rt: &RtInfo, lookup: &dyn Fn(usize) -> Option<i64>) -> Result<Self> {
        let mut timings = HashMap::new();
        for (&cluster, _) in &rt.timings {
            timings.insert(cluster, rt.timing_on(cluster, lookup)?);
        }
        Ok(ResolvedRt {
            allowed_pes: rt.allowed_pes.clone(),
            timings,
        })
    }

    pub fn mappable_on(&self, pe_ix: usize) -> bool {
        match &self.allowed_pes {
            None => true,
            Some(allowed) => allowed.contains(&pe_ix),
        }
    }

    pub fn timing_on(&self, cluster_ix: usize) -> u64 {
        self.timings.get(&cluster_ix).copied().unwrap_or(DEFAULT_TIMING)
    }
}

/// A vertex of the expanded graph.
#[derive(Clone, Debug)]
pub struct SrdagVertex {
    pub name: String,
    pub kind: VertexKind,
    pub origin: SrdagOrigin,
    pub(crate) inputs: Vec<Option<usize>>,
    pub(crate) outputs: Vec<Option<usize>>,
    pub kernel: Option<usize>,
    pub rt: ResolvedRt,
    /// Parameter values handed to the kernel.
    pub params: Vec<i64>,
    /// Dynamic parameters this job sets (config copies only).
    pub out_param_count: u32,
    /// Address for EXTERN_IN / EXTERN_OUT anchors.
    pub extern_address: Option<u64>,
}

impl SrdagVertex {
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_edge(&self, port: usize) -> Option<usize> {
        self.inputs.get(port).copied().flatten()
    }

    pub fn output_edge(&self, port: usize) -> Option<usize> {
        self.outputs.get(port).copied().flatten()
    }

    /// True if a scheduler should turn this vertex into a task.
    pub fn schedulable(&self) -> bool {
        self.kind.executable() && !matches!(self.kind, VertexKind::ExternIn | VertexKind::ExternOut)
    }
}

/// A single-rate edge: production always equals consumption.
#[derive(Clone, Copy, Debug)]
pub struct SrdagEdge {
    pub source: usize,
    pub source_port: usize,
    pub sink: usize,
    pub sink_port: usize,
    pub rate: i64,
}

/// The expanded graph. Slots are tombstoned so optimizer removals never
/// shift indices out from under the schedule.
#[derive(Debug, Default)]
pub struct SrdagGraph {
    vertices: Vec<Option<SrdagVertex>>,
    edges: Vec<Option<SrdagEdge>>,
}

impl SrdagGraph {
    pub fn new() -> Self {
        SrdagGraph::default()
    }

    pub fn add_vertex(&mut self, vertex: SrdagVertex) -> usize {
        self.vertices.push(Some(vertex));
        self.vertices.len() - 1
    }

    /// Add a bare vertex with empty port maps, default constraints and no
    /// PiSDF back-reference.
    pub fn add_node(&mut self, name: &str, kind: VertexKind, n_in: usize, n_out: usize) -> usize {
        self.add_vertex(SrdagVertex {
            name: name.to_string(),
            kind,
            origin: SrdagOrigin::Adapter,
            inputs: vec![None; n_in],
            outputs: vec![None; n_out],
            kernel: None,
            rt: ResolvedRt::default(),
            params: Vec::new(),
            out_param_count: 0,
            extern_address: None,
        })
    }

    pub(crate) fn adapter(&mut self, name: String, kind: VertexKind, n_in: usize, n_out: usize) -> usize {
        self.add_node(&name, kind, n_in, n_out)
    }

    pub fn connect(&mut self, source: usize, source_port: usize, sink: usize, sink_port: usize, rate: i64) -> usize {
        let ix = self.edges.len();
        self.edges.push(Some(SrdagEdge {
            source,
            source_port,
            sink,
            sink_port,
            rate,
        }));
        let src_slot = &mut self.vertices[source].as_mut().expect("live vertex").outputs[source_port];
        debug_assert!(src_slot.is_none(), "output port already connected");
        *src_slot = Some(ix);
        let snk_slot = &mut self.vertices[sink].as_mut().expect("live vertex").inputs[sink_port];
        debug_assert!(snk_slot.is_none(), "input port already connected");
        *snk_slot = Some(ix);
        ix
    }

    /// Detach and drop an edge, clearing both port slots.
    pub fn remove_edge(&mut self, edge_ix: usize) {
        let Some(edge) = self.edges[edge_ix].take() else {
            return;
        };
        if let Some(v) = self.vertices[edge.source].as_mut() {
            v.outputs[edge.source_port] = None;
        }
        if let Some(v) = self.vertices[edge.sink].as_mut() {
            v.inputs[edge.sink_port] = None;
        }
    }

    /// Drop a vertex after detaching whatever is still connected.
    pub fn remove_vertex(&mut self, vertex_ix: usize) {
        let Some(vertex) = self.vertices[vertex_ix].take() else {
            return;
        };
        for edge_ix in vertex.inputs.iter().chain(&vertex.outputs).filter_map(|e| *e) {
            if let Some(edge) = self.edges[edge_ix].take() {
                if edge.source != vertex_ix {
                    if let Some(v) = self.vertices[edge.source].as_mut() {
                        v.outputs[edge.source_port] = None;
                    }
                }
                if edge.sink != vertex_ix {
                    if let Some(v) = self.vertices[edge.sink].as_mut() {
                        v.inputs[edge.sink_port] = None;
                    }
                }
            }
        }
    }

    /// Redirect the sink endpoint of `edge_ix`.
    pub fn set_sink(&mut self, edge_ix: usize, sink: usize, sink_port: usize) {
        let edge = self.edges[edge_ix].as_mut().expect("live edge");
        let old = (edge.sink, edge.sink_port);
        edge.sink = sink;
        edge.sink_port = sink_port;
        if let Some(v) = self.vertices[old.0].as_mut() {
            if v.inputs[old.1] == Some(edge_ix) {
                v.inputs[old.1] = None;
            }
        }
        self.vertices[sink].as_mut().expect("live vertex").inputs[sink_port] = Some(edge_ix);
    }

    /// Redirect the source endpoint of `edge_ix`.
    pub fn set_source(&mut self, edge_ix: usize, source: usize, source_port: usize) {
        let edge = self.edges[edge_ix].as_mut().expect("live edge");
        let old = (edge.source, edge.source_port);
        edge.source = source;
        edge.source_port = source_port;
        if let Some(v) = self.vertices[old.0].as_mut() {
            if v.outputs[old.1] == Some(edge_ix) {
                v.outputs[old.1] = None;
            }
        }
        self.vertices[source].as_mut().expect("live vertex").outputs[source_port] = Some(edge_ix);
    }

    pub fn vertex(&self, ix: usize) -> &SrdagVertex {
        self.vertices[ix].as_ref().expect("live vertex")
    }

    pub fn try_vertex(&self, ix: usize) -> Option<&SrdagVertex> {
        self.vertices.get(ix).and_then(Option::as_ref)
    }

    pub fn edge(&self, ix: usize) -> &SrdagEdge {
        self.edges[ix].as_ref().expect("live edge")
    }

    pub fn try_edge(&self, ix: usize) -> Option<&SrdagEdge> {
        self.edges.get(ix).and_then(Option::as_ref)
    }

    /// Live vertex indices in insertion order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.vertices.iter().enumerate().filter_map(|(ix, v)| v.as_ref().map(|_| ix))
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().enumerate().filter_map(|(ix, e)| e.as_ref().map(|_| ix))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.iter().flatten().count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.vertices.len()
    }
}

/// One link point of the partial single-rate worker.
#[derive(Clone, Copy, Debug)]
struct EdgeLinker {
    vertex: usize,
    port: usize,
    rate: i64,
}

struct TransfoJob<'a, 'g> {
    firing: &'a GraphFiring<'g>,
    /// Placeholder vertex this job replaces, `None` for the root level.
    instance: Option<usize>,
}

/// Expand the resolved handler tree into a single-rate graph.
pub fn expand(root: &GraphHandler<'_>) -> Result<SrdagGraph> {
    let mut srdag = SrdagGraph::new();
    let mut jobs: VecDeque<TransfoJob> = VecDeque::new();
    for firing in root.firings() {
        jobs.push_back(TransfoJob { firing, instance: None });
    }
    while let Some(job) = jobs.pop_front() {
        expand_level(&mut srdag, &job, &mut jobs)?;
    }
    tracing::debug!(
        vertices = srdag.vertex_count(),
        edges = srdag.edge_count(),
        "single-rate expansion complete"
    );
    Ok(srdag)
}

fn expand_level<'a, 'g>(
    srdag: &mut SrdagGraph,
    job: &TransfoJob<'a, 'g>,
    jobs: &mut VecDeque<TransfoJob<'a, 'g>>,
) -> Result<()> {
    let firing = job.firing;
    let graph = firing.graph();
    if !firing.resolved() {
        return Err(Error::ParamNotReady {
            param: format!("{} firing {}", graph.name, firing.firing()),
        });
    }
    let lookup = firing.param_lookup();

    // Copies of every expandable vertex, one per firing.
    let mut copies: HashMap<(VertexId, u32), usize> = HashMap::new();
    for id in graph.vertex_ids() {
        let vertex = graph.vertex(id);
        if vertex.kind.interface() || vertex.kind == VertexKind::Delay {
            continue;
        }
        let q = firing.repetitions(id) as u32;
        for k in 0..q {
            let ix = match vertex.kind {
                VertexKind::Graph(_) => {
                    let placeholder = srdag.adapter(
                        format!("{}:{k}", vertex.name),
                        vertex.kind,
                        vertex.input_count(),
                        vertex.output_count(),
                    );
                    let child = firing.child(id).ok_or_else(|| Error::PipelineInconsistent {
                        graph: graph.name.clone(),
                        reason: format!("unresolved subgraph `{}`", vertex.name),
                    })?;
                    jobs.push_back(TransfoJob {
                        firing: child.firing(k),
                        instance: Some(placeholder),
                    });
                    placeholder
                }
                _ => {
                    let mut params = Vec::with_capacity(vertex.kernel_params.len());
                    for &p in &vertex.kernel_params {
                        params.push(firing.param_value(p)?);
                    }
                    srdag.add_vertex(SrdagVertex {
                        name: format!("{}:{k}", vertex.name),
                        kind: vertex.kind,
                        origin: SrdagOrigin::Vertex {
                            firing_uid: firing.uid(),
                            vertex: id,
                            firing: k,
                        },
                        inputs: vec![None; vertex.input_count()],
                        outputs: vec![None; vertex.output_count()],
                        kernel: vertex.kernel,
                        rt: ResolvedRt::resolve(&vertex.rt, &lookup)?,
                        params,
                        out_param_count: vertex.config_params.len() as u32,
                        extern_address: vertex.extern_address,
                    })
                }
            };
            copies.insert((id, k), ix);
        }
    }

    // INIT / END pairs for delayed edges.
    let mut delay_specials: HashMap<EdgeId, (usize, usize)> = HashMap::new();
    for edge_id in graph.edge_ids() {
        let edge = graph.edge(edge_id);
        let Some(delay) = &edge.delay else { continue };
        let value = delay.value.value(&lookup)?;
        if value <= 0 {
            continue;
        }
        let has_setter = delay
            .vertex
            .is_some_and(|v| graph.vertex(v).input_count() > 0);
        let has_getter = delay
            .vertex
            .is_some_and(|v| graph.vertex(v).output_count() > 0);
        let base = format!(
            "{}->{}",
            graph.vertex(edge.source).name,
            graph.vertex(edge.sink).name
        );
        let init = srdag.adapter(format!("init::{base}"), VertexKind::Init, usize::from(has_setter), 1);
        let end = srdag.adapter(format!("end::{base}"), VertexKind::End, 1, usize::from(has_getter));
        srdag.vertices[init].as_mut().expect("live vertex").origin = SrdagOrigin::DelayInit {
            firing_uid: firing.uid(),
            edge: edge_id,
            persistent: delay.persistent,
        };
        srdag.vertices[end].as_mut().expect("live vertex").origin = SrdagOrigin::DelayEnd {
            firing_uid: firing.uid(),
            edge: edge_id,
            persistent: delay.persistent,
        };
        delay_specials.insert(edge_id, (init, end));
    }

    // Re-link every edge through the piecewise worker.
    for edge_id in graph.edge_ids() {
        link_edge(srdag, job, edge_id, &copies, &delay_specials)?;
    }

    // The placeholder is fully dissolved once its ports are re-linked.
    if let Some(placeholder) = job.instance {
        srdag.remove_vertex(placeholder);
    }
    Ok(())
}

fn link_edge(
    srdag: &mut SrdagGraph,
    job: &TransfoJob<'_, '_>,
    edge_id: EdgeId,
    copies: &HashMap<(VertexId, u32), usize>,
    delay_specials: &HashMap<EdgeId, (usize, usize)>,
) -> Result<()> {
    let firing = job.firing;
    let graph = firing.graph();
    let edge = graph.edge(edge_id);
    let lookup = firing.param_lookup();
    let src_rate = edge.source_rate.value(&lookup)?;
    let snk_rate = edge.sink_rate.value(&lookup)?;
    let delay = edge.delay_value(&lookup)?;

    let mut sources: Vec<EdgeLinker> = Vec::new();
    let mut sinks: Vec<EdgeLinker> = Vec::new();

    if let Some(&(init, _)) = delay_specials.get(&edge_id) {
        sources.push(EdgeLinker {
            vertex: init,
            port: 0,
            rate: delay,
        });
    }

    let src_vertex = graph.vertex(edge.source);
    match src_vertex.kind {
        VertexKind::InputInterface(iface_ix) => {
            let sink_total: i64 = match graph.vertex(edge.sink).kind {
                VertexKind::Delay | VertexKind::Config => snk_rate,
                _ => firing.repetitions(edge.sink) as i64 * snk_rate,
            };
            if let Some(outer) = outer_source(srdag, job, iface_ix)? {
                sources.push(adapt_input_interface(srdag, outer, sink_total, &src_vertex.name));
            }
        }
        VertexKind::Delay => {
            let delayed = graph
                .edge_ids()
                .find(|id| graph.edge(*id).delay.as_ref().and_then(|d| d.vertex) == Some(edge.source))
                .ok_or_else(|| Error::PipelineInconsistent {
                    graph: graph.name.clone(),
                    reason: "delay vertex without delayed edge".into(),
                })?;
            if let Some(&(_, end)) = delay_specials.get(&delayed) {
                sources.push(EdgeLinker {
                    vertex: end,
                    port: 0,
                    rate: src_rate,
                });
            }
        }
        _ => {
            let q = firing.repetitions(edge.source) as u32;
            for k in 0..q {
                sources.push(EdgeLinker {
                    vertex: copies[&(edge.source, k)],
                    port: edge.source_port,
                    rate: src_rate,
                });
            }
        }
    }

    let snk_vertex = graph.vertex(edge.sink);
    match snk_vertex.kind {
        VertexKind::OutputInterface(iface_ix) => {
            let source_total: i64 = sources.iter().map(|s| s.rate).sum();
            if let Some(outer) = outer_sink(srdag, job, iface_ix)? {
                sinks.push(adapt_output_interface(srdag, outer, source_total, &snk_vertex.name));
            }
        }
        VertexKind::Delay => {
            let delayed = graph
                .edge_ids()
                .find(|id| graph.edge(*id).delay.as_ref().and_then(|d| d.vertex) == Some(edge.sink))
                .ok_or_else(|| Error::PipelineInconsistent {
                    graph: graph.name.clone(),
                    reason: "delay vertex without delayed edge".into(),
                })?;
            if let Some(&(init, _)) = delay_specials.get(&delayed) {
                sinks.push(EdgeLinker {
                    vertex: init,
                    port: 0,
                    rate: snk_rate,
                });
            }
        }
        _ => {
            let q = firing.repetitions(edge.sink) as u32;
            for k in 0..q {
                sinks.push(EdgeLinker {
                    vertex: copies[&(edge.sink, k)],
                    port: edge.sink_port,
                    rate: snk_rate,
                });
            }
        }
    }

    if let Some(&(_, end)) = delay_specials.get(&edge_id) {
        sinks.push(EdgeLinker {
            vertex: end,
            port: 0,
            rate: delay,
        });
    }

    link_pieces(srdag, &sources, &sinks, &graph.name)
}

/// Take the srdag edge feeding the placeholder's interface port, remove it
/// and return its producer endpoint.
fn outer_source(srdag: &mut SrdagGraph, job: &TransfoJob<'_, '_>, iface_ix: usize) -> Result<Option<EdgeLinker>> {
    let Some(placeholder) = job.instance else {
        return Ok(None);
    };
    let Some(edge_ix) = srdag.vertex(placeholder).input_edge(iface_ix) else {
        return Ok(None);
    };
    let edge = *srdag.edge(edge_ix);
    srdag.remove_edge(edge_ix);
    Ok(Some(EdgeLinker {
        vertex: edge.source,
        port: edge.source_port,
        rate: edge.rate,
    }))
}

fn outer_sink(srdag: &mut SrdagGraph, job: &TransfoJob<'_, '_>, iface_ix: usize) -> Result<Option<EdgeLinker>> {
    let Some(placeholder) = job.instance else {
        return Ok(None);
    };
    let Some(edge_ix) = srdag.vertex(placeholder).output_edge(iface_ix) else {
        return Ok(None);
    };
    let edge = *srdag.edge(edge_ix);
    srdag.remove_edge(edge_ix);
    Ok(Some(EdgeLinker {
        vertex: edge.sink,
        port: edge.sink_port,
        rate: edge.rate,
    }))
}

/// Wrap the outer producer when the level consumes a different token count
/// than the interface provides: REPEAT broadcasts, HEAD carves a prefix.
fn adapt_input_interface(
    srdag: &mut SrdagGraph,
    outer: EdgeLinker,
    sink_total: i64,
    name: &str,
) -> EdgeLinker {
    if sink_total == outer.rate {
        return outer;
    }
    let kind = if sink_total > outer.rate { VertexKind::Repeat } else { VertexKind::Head };
    let adapter = srdag.adapter(format!("{}::{name}", if sink_total > outer.rate { "repeat" } else { "head" }), kind, 1, 1);
    srdag.connect(outer.vertex, outer.port, adapter, 0, outer.rate);
    EdgeLinker {
        vertex: adapter,
        port: 0,
        rate: sink_total,
    }
}

/// Wrap the outer consumer when the level produces more than the interface
/// forwards: TAIL keeps the last window.
fn adapt_output_interface(
    srdag: &mut SrdagGraph,
    outer: EdgeLinker,
    source_total: i64,
    name: &str,
) -> EdgeLinker {
    if source_total == outer.rate {
        return outer;
    }
    let adapter = srdag.adapter(format!("tail::{name}"), VertexKind::Tail, 1, 1);
    srdag.connect(adapter, 0, outer.vertex, outer.port, outer.rate);
    EdgeLinker {
        vertex: adapter,
        port: 0,
        rate: source_total,
    }
}

/// Re-link raw `(vertex, port, rate)` endpoints through the piecewise
/// worker. Used by the pattern optimizer when dissolving join-fork pairs.
pub(crate) fn relink(
    srdag: &mut SrdagGraph,
    sources: &[(usize, usize, i64)],
    sinks: &[(usize, usize, i64)],
) -> Result<()> {
    let sources: Vec<EdgeLinker> = sources
        .iter()
        .map(|&(vertex, port, rate)| EdgeLinker { vertex, port, rate })
        .collect();
    let sinks: Vec<EdgeLinker> = sinks
        .iter()
        .map(|&(vertex, port, rate)| EdgeLinker { vertex, port, rate })
        .collect();
    link_pieces(srdag, &sources, &sinks, "srdag")
}

/// Piecewise linkage: walk the token stream, pair source and sink windows,
/// and insert FORK / JOIN where a window spans several counterparts.
fn link_pieces(srdag: &mut SrdagGraph, sources: &[EdgeLinker], sinks: &[EdgeLinker], graph_name: &str) -> Result<()> {
    let sources: Vec<EdgeLinker> = sources.iter().copied().filter(|l| l.rate > 0).collect();
    let sinks: Vec<EdgeLinker> = sinks.iter().copied().filter(|l| l.rate > 0).collect();
    let produced: i64 = sources.iter().map(|l| l.rate).sum();
    let consumed: i64 = sinks.iter().map(|l| l.rate).sum();
    if produced != consumed {
        return Err(Error::PipelineInconsistent {
            graph: graph_name.to_string(),
            reason: format!("linkage imbalance ({produced} produced, {consumed} consumed)"),
        });
    }
    if produced == 0 {
        return Ok(());
    }

    // pieces[(i, j, n)]: n tokens flowing from source i to sink j
    let mut pieces: Vec<(usize, usize, i64)> = Vec::new();
    let (mut si, mut ki) = (0usize, 0usize);
    let mut s_rem = sources[0].rate;
    let mut k_rem = sinks[0].rate;
    while si < sources.len() && ki < sinks.len() {
        let n = s_rem.min(k_rem);
        pieces.push((si, ki, n));
        s_rem -= n;
        k_rem -= n;
        if s_rem == 0 {
            si += 1;
            if si < sources.len() {
                s_rem = sources[si].rate;
            }
        }
        if k_rem == 0 {
            ki += 1;
            if ki < sinks.len() {
                k_rem = sinks[ki].rate;
            }
        }
    }

    // Sources spanning several sinks fork, sinks gathering several sources
    // join.
    let mut forks: HashMap<usize, (usize, usize)> = HashMap::new();
    let mut joins: HashMap<usize, (usize, usize)> = HashMap::new();
    for i in 0..sources.len() {
        let outs = pieces.iter().filter(|p| p.0 == i).count();
        if outs > 1 {
            let fork = srdag.adapter(format!("fork::{}", srdag.slot_count()), VertexKind::Fork, 1, outs);
            srdag.connect(sources[i].vertex, sources[i].port, fork, 0, sources[i].rate);
            forks.insert(i, (fork, 0));
        }
    }
    for j in 0..sinks.len() {
        let ins = pieces.iter().filter(|p| p.1 == j).count();
        if ins > 1 {
            let join = srdag.adapter(format!("join::{}", srdag.slot_count()), VertexKind::Join, ins, 1);
            srdag.connect(join, 0, sinks[j].vertex, sinks[j].port, sinks[j].rate);
            joins.insert(j, (join, 0));
        }
    }
    for (i, j, n) in pieces {
        let (sv, sp) = match forks.get_mut(&i) {
            Some((fork, next)) => {
                let port = *next;
                *next += 1;
                (*fork, port)
            }
            None => (sources[i].vertex, sources[i].port),
        };
        let (kv, kp) = match joins.get_mut(&j) {
            Some((join, next)) => {
                let port = *next;
                *next += 1;
                (*join, port)
            }
            None => (sinks[j].vertex, sinks[j].port),
        };
        srdag.connect(sv, sp, kv, kp, n);
    }
    Ok(())
}
