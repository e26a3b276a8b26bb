//! Dependency resolution over the hierarchical graph.
//!
//! For a given (vertex, firing, input port), the iterator enumerates the
//! producing (vertex, firing range, token range) tuples the firing depends
//! on, traversing delays, subgraph entry and exit, and interfaces. Ranges
//! are expressed in tokens: `memory_start` is the offset inside the first
//! producing firing's window, `memory_end` the offset inside the last.
//!
//! The iterator is finite and restartable: dependencies are resolved once
//! at construction and replayed on demand; cloning rewinds it.

use crate::error::{Error, Result};
use crate::graph::{EdgeId, VertexId, VertexKind};
use crate::handler::GraphFiring;

/// Where a dependency's tokens come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    /// A regular producing task.
    Task,
    /// The initial tokens of a delay.
    Delay { persistent: bool },
    /// External memory through an EXTERN_IN vertex.
    Extern,
}

/// One resolved dependency of a (vertex, firing, port) triple.
#[derive(Clone, Copy, Debug)]
pub struct Dependency {
    pub kind: DependencyKind,
    /// Uid of the firing scope the producer lives in.
    pub firing_uid: usize,
    /// Producing vertex, or the delayed edge's sink level vertex for
    /// `Delay` dependencies.
    pub vertex: VertexId,
    /// Edge at the producer's level carrying the tokens.
    pub edge: EdgeId,
    /// Producing output port.
    pub port: usize,
    /// Tokens produced per producing firing.
    pub rate: i64,
    pub firing_start: u32,
    pub firing_end: u32,
    /// Token offset inside `firing_start`'s production window.
    pub memory_start: i64,
    /// Token offset inside `firing_end`'s production window, inclusive.
    pub memory_end: i64,
}

impl Dependency {
    /// Number of tokens this dependency covers.
    pub fn token_count(&self) -> i64 {
        if self.firing_start == self.firing_end {
            self.memory_end - self.memory_start + 1
        } else {
            let firings = i64::from(self.firing_end - self.firing_start);
            (self.rate - self.memory_start) + (firings - 1) * self.rate + self.memory_end + 1
        }
    }
}

/// One level of the scope stack used while resolving across hierarchy.
#[derive(Clone, Copy)]
pub struct ScopeFrame<'a, 'g> {
    pub firing: &'a GraphFiring<'g>,
    /// Instance vertex in the parent frame and its firing index; `None` at
    /// the root.
    pub via: Option<(VertexId, u32)>,
}

/// Restartable sequence of [`Dependency`] items.
#[derive(Clone, Debug)]
pub struct DependencyIterator {
    deps: Vec<Dependency>,
    pos: usize,
}

impl DependencyIterator {
    /// Dependencies of one input port of `(vertex, firing)` resolved in the
    /// innermost frame of `scope`.
    pub fn for_port(
        scope: &[ScopeFrame<'_, '_>],
        vertex: VertexId,
        firing: u32,
        port: usize,
    ) -> Result<Self> {
        let mut stack: Vec<ScopeFrame> = scope.to_vec();
        let frame = *stack.last().expect("non-empty scope");
        let graph = frame.firing.graph();
        let mut deps = Vec::new();
        if let Some(edge_id) = graph.vertex(vertex).input_edge(port) {
            let rate = graph
                .edge(edge_id)
                .sink_rate
                .value(&frame.firing.param_lookup())?;
            if rate > 0 {
                let lo = i64::from(firing) * rate;
                resolve_edge(&mut stack, edge_id, lo, lo + rate - 1, &mut deps)?;
            }
        }
        Ok(DependencyIterator { deps, pos: 0 })
    }

    /// Dependencies across every input port of `(vertex, firing)`.
    pub fn for_vertex(scope: &[ScopeFrame<'_, '_>], vertex: VertexId, firing: u32) -> Result<Self> {
        let graph = scope.last().expect("non-empty scope").firing.graph();
        let mut deps = Vec::new();
        for port in 0..graph.vertex(vertex).input_count() {
            deps.extend(Self::for_port(scope, vertex, firing, port)?.deps);
        }
        Ok(DependencyIterator { deps, pos: 0 })
    }

    /// Rewind to the first dependency.
    pub fn restart(&mut self) {
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn as_slice(&self) -> &[Dependency] {
        &self.deps
    }
}

impl Iterator for DependencyIterator {
    type Item = Dependency;

    fn next(&mut self) -> Option<Dependency> {
        let dep = self.deps.get(self.pos).copied();
        self.pos += usize::from(dep.is_some());
        dep
    }
}

/// Resolve the consumption window `[token_lo, token_hi]` of `edge` in the
/// innermost frame of `stack`, appending dependencies to `out`.
fn resolve_edge(
    stack: &mut Vec<ScopeFrame<'_, '_>>,
    edge_id: EdgeId,
    token_lo: i64,
    token_hi: i64,
    out: &mut Vec<Dependency>,
) -> Result<()> {
    if token_hi < token_lo {
        return Ok(());
    }
    let frame = *stack.last().expect("non-empty scope");
    let graph = frame.firing.graph();
    let edge = graph.edge(edge_id);
    let lookup = frame.firing.param_lookup();
    let delay = edge.delay_value(&lookup)?;

    // Tokens below the delay value come from the delay storage or from the
    // setter chain through the virtual delay vertex.
    if token_lo < delay {
        let hi = token_hi.min(delay - 1);
        match edge.delay.as_ref().and_then(|d| d.vertex) {
            Some(delay_vertex) if graph.vertex(delay_vertex).input_count() > 0 => {
                let setter_edge = graph
                    .vertex(delay_vertex)
                    .input_edge(0)
                    .expect("delay setter edge");
                resolve_edge(stack, setter_edge, token_lo, hi, out)?;
            }
            _ => {
                let persistent = edge.delay.as_ref().is_some_and(|d| d.persistent);
                out.push(Dependency {
                    kind: DependencyKind::Delay { persistent },
                    firing_uid: frame.firing.uid(),
                    vertex: edge.sink,
                    edge: edge_id,
                    port: edge.source_port,
                    rate: delay,
                    firing_start: 0,
                    firing_end: 0,
                    memory_start: token_lo,
                    memory_end: hi,
                });
            }
        }
        if token_hi < delay {
            return Ok(());
        }
    }

    let lo = token_lo.max(delay) - delay;
    let hi = token_hi - delay;
    let src = edge.source;
    let src_rate = edge.source_rate.value(&lookup)?;
    if src_rate <= 0 {
        return Err(Error::PipelineInconsistent {
            graph: graph.name.clone(),
            reason: format!("`{}` produces nothing yet is depended upon", graph.vertex(src).name),
        });
    }

    match graph.vertex(src).kind {
        VertexKind::InputInterface(iface_ix) => {
            // Ascend: the interface repeats the tokens of the external edge
            // in the parent firing, wrapping modulo its production window.
            let (instance, instance_firing) = frame.via.ok_or_else(|| Error::InterfaceMisconnected {
                interface: graph.vertex(src).name.clone(),
            })?;
            let parent_depth = stack.len() - 1;
            let parent_graph = stack[parent_depth - 1].firing.graph();
            let outer_edge = parent_graph
                .vertex(instance)
                .input_edge(iface_ix)
                .ok_or_else(|| Error::InterfaceMisconnected {
                    interface: graph.vertex(src).name.clone(),
                })?;
            let window = src_rate;
            let base = i64::from(instance_firing) * window;
            let mut chunk_lo = lo;
            while chunk_lo <= hi {
                let wrapped = chunk_lo % window;
                let chunk_hi = (chunk_lo + (window - 1 - wrapped)).min(hi);
                let popped = stack.pop().expect("frame present");
                resolve_edge(stack, outer_edge, base + wrapped, base + wrapped + (chunk_hi - chunk_lo), out)?;
                stack.push(popped);
                chunk_lo = chunk_hi + 1;
            }
        }
        VertexKind::Graph(_) => {
            // Descend: tokens come out of the child's output interface, which
            // keeps the last `src_rate` tokens produced inside.
            let child = frame.firing.child(src).ok_or_else(|| Error::PipelineInconsistent {
                graph: graph.name.clone(),
                reason: format!("unresolved subgraph `{}`", graph.vertex(src).name),
            })?;
            let sub = child.graph();
            let mut f = (lo / src_rate) as u32;
            let mut chunk_lo = lo;
            while chunk_lo <= hi {
                let chunk_hi = ((i64::from(f) + 1) * src_rate - 1).min(hi);
                let iface_vertex = sub.output_interfaces()[edge.source_port];
                let inner_edge = sub
                    .vertex(iface_vertex)
                    .input_edge(0)
                    .ok_or_else(|| Error::InterfaceMisconnected {
                        interface: sub.vertex(iface_vertex).name.clone(),
                    })?;
                let child_firing = child.firing(f);
                if !child_firing.resolved() {
                    return Err(Error::ParamNotReady {
                        param: format!("{} firing {f}", sub.name),
                    });
                }
                let inner = sub.edge(inner_edge);
                let inner_rate = inner.source_rate.value(&child_firing.param_lookup())?;
                let produced = child_firing.repetitions(inner.source) as i64 * inner_rate;
                let shift = produced - src_rate;
                let in_lo = chunk_lo - i64::from(f) * src_rate + shift;
                let in_hi = chunk_hi - i64::from(f) * src_rate + shift;
                stack.push(ScopeFrame {
                    firing: child_firing,
                    via: Some((src, f)),
                });
                resolve_edge(stack, inner_edge, in_lo, in_hi, out)?;
                stack.pop();
                chunk_lo = chunk_hi + 1;
                f += 1;
            }
        }
        VertexKind::Delay => {
            // Getter side of a delay: the last `delay` tokens of the delayed
            // edge's production in the same round.
            let delayed = graph
                .edge_ids()
                .find(|id| {
                    graph.edge(*id).delay.as_ref().and_then(|d| d.vertex) == Some(src)
                })
                .ok_or_else(|| Error::PipelineInconsistent {
                    graph: graph.name.clone(),
                    reason: "delay vertex without delayed edge".into(),
                })?;
            let de = graph.edge(delayed);
            let de_src_rate = de.source_rate.value(&lookup)?;
            let produced = frame.firing.repetitions(de.source) as i64 * de_src_rate;
            // getter token j is produced index (produced - delay + j), which
            // sits at consumed index (produced + j) on the delayed edge
            resolve_edge(stack, delayed, produced + lo, produced + hi, out)?;
        }
        VertexKind::ExternIn => {
            out.push(Dependency {
                kind: DependencyKind::Extern,
                firing_uid: frame.firing.uid(),
                vertex: src,
                edge: edge_id,
                port: edge.source_port,
                rate: src_rate,
                firing_start: 0,
                firing_end: 0,
                memory_start: lo,
                memory_end: hi,
            });
        }
        _ => {
            out.push(Dependency {
                kind: DependencyKind::Task,
                firing_uid: frame.firing.uid(),
                vertex: src,
                edge: edge_id,
                port: edge.source_port,
                rate: src_rate,
                firing_start: (lo / src_rate) as u32,
                firing_end: (hi / src_rate) as u32,
                memory_start: lo % src_rate,
                memory_end: hi % src_rate,
            });
        }
    }
    Ok(())
}
