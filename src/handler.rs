//! Per-firing state of the hierarchical graph.
//!
//! A [`GraphHandler`] owns one [`GraphFiring`] per firing of its graph
//! inside the enclosing scope. Each firing holds the resolved parameter
//! values, the repetition vector and, for every subgraph vertex, a child
//! handler with `q(vertex)` firings of its own. Static firings resolve
//! eagerly at construction; firings with dynamic parameters stay pending
//! until every config actor of the level has delivered its values.
//!
//! Firings are tagged with a dense `uid` assigned in construction order so
//! schedulers can key per-firing state without holding references into the
//! tree.

use crate::brv::compute_brv;
use crate::error::{Error, Result};
use crate::graph::{Graph, ParamKind, VertexId, VertexKind};

/// Allocates dense firing uids across one handler tree.
#[derive(Debug, Default)]
pub struct UidPool {
    next: usize,
}

impl UidPool {
    pub fn new() -> Self {
        UidPool::default()
    }

    fn take(&mut self) -> usize {
        let uid = self.next;
        self.next += 1;
        uid
    }

    pub fn allocated(&self) -> usize {
        self.next
    }
}

/// Handler of one subgraph instance: one firing per repetition.
#[derive(Debug)]
pub struct GraphHandler<'g> {
    graph: &'g Graph,
    firings: Vec<GraphFiring<'g>>,
}

impl<'g> GraphHandler<'g> {
    /// Build the handler with `repetition_count` firings. `parent_values`
    /// supplies the parent scope's resolved parameters for inheritance.
    pub fn new(
        graph: &'g Graph,
        parent_values: &[Option<i64>],
        repetition_count: u32,
        uids: &mut UidPool,
    ) -> Result<Self> {
        let mut firings = Vec::with_capacity(repetition_count as usize);
        for k in 0..repetition_count {
            firings.push(GraphFiring::new(graph, parent_values, k, uids)?);
        }
        Ok(GraphHandler { graph, firings })
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn firings(&self) -> &[GraphFiring<'g>] {
        &self.firings
    }

    pub fn firings_mut(&mut self) -> &mut [GraphFiring<'g>] {
        &mut self.firings
    }

    pub fn firing(&self, k: u32) -> &GraphFiring<'g> {
        &self.firings[k as usize]
    }

    pub fn firing_mut(&mut self, k: u32) -> &mut GraphFiring<'g> {
        &mut self.firings[k as usize]
    }

    /// True once every firing of the subtree has a resolved BRV.
    pub fn fully_resolved(&self) -> bool {
        self.firings.iter().all(GraphFiring::subtree_resolved)
    }

    /// Reset per-iteration state. Static firings keep their BRV; dynamic
    /// ones drop parameter values, BRV and children and go back to pending.
    pub fn clear(&mut self) {
        for firing in &mut self.firings {
            firing.clear();
        }
    }

    /// Find a firing anywhere in the subtree by its uid.
    pub fn firing_by_uid(&self, uid: usize) -> Option<&GraphFiring<'g>> {
        for firing in &self.firings {
            if firing.uid() == uid {
                return Some(firing);
            }
            for child in firing.children() {
                if let Some(found) = child.firing_by_uid(uid) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Mutable lookup by uid, resolved through an explicit path so the
    /// borrow stays linear.
    pub fn firing_by_uid_mut(&mut self, uid: usize) -> Option<&mut GraphFiring<'g>> {
        let (path, last) = self.path_to(uid)?;
        let mut handler = self;
        for (firing_ix, vertex) in path {
            handler = handler.firing_mut(firing_ix).child_mut(vertex)?;
        }
        Some(handler.firing_mut(last))
    }

    fn path_to(&self, uid: usize) -> Option<(Vec<(u32, VertexId)>, u32)> {
        for (k, firing) in self.firings.iter().enumerate() {
            if firing.uid() == uid {
                return Some((Vec::new(), k as u32));
            }
            for id in self.graph.vertex_ids() {
                if !matches!(self.graph.vertex(id).kind, VertexKind::Graph(_)) {
                    continue;
                }
                if let Some(child) = firing.child(id) {
                    if let Some((mut path, last)) = child.path_to(uid) {
                        path.insert(0, (k as u32, id));
                        return Some((path, last));
                    }
                }
            }
        }
        None
    }
}

/// One firing of a subgraph: parameter snapshot, BRV and child handlers.
#[derive(Debug)]
pub struct GraphFiring<'g> {
    graph: &'g Graph,
    firing: u32,
    uid: usize,
    values: Vec<Option<i64>>,
    brv: Vec<u64>,
    resolved: bool,
    is_static: bool,
    children: Vec<Option<GraphHandler<'g>>>,
}

impl<'g> GraphFiring<'g> {
    fn new(
        graph: &'g Graph,
        parent_values: &[Option<i64>],
        firing: u32,
        uids: &mut UidPool,
    ) -> Result<Self> {
        let mut values: Vec<Option<i64>> = vec![None; graph.params().len()];
        for ix in 0..graph.params().len() {
            let value = match &graph.param(ix).kind {
                ParamKind::Static(expr) => Some(expr.value(&|i| values.get(i).copied().flatten())?),
                ParamKind::Inherited(parent_ix) => {
                    let v = parent_values.get(*parent_ix).copied().flatten();
                    if v.is_none() {
                        return Err(Error::ParamNotReady {
                            param: graph.param(ix).name.clone(),
                        });
                    }
                    v
                }
                ParamKind::Dynamic => None,
            };
            values[ix] = value;
        }
        let mut firing = GraphFiring {
            graph,
            firing,
            uid: uids.take(),
            values,
            brv: Vec::new(),
            resolved: false,
            is_static: !graph.has_dynamic_params(),
            children: (0..graph.subgraph_count()).map(|_| None).collect(),
        };
        if firing.is_static {
            firing.resolve(uids)?;
        }
        Ok(firing)
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Firing index within the enclosing handler.
    pub fn firing(&self) -> u32 {
        self.firing
    }

    /// Dense tree-wide tag, stable until the next rebuild.
    pub fn uid(&self) -> usize {
        self.uid
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn resolved(&self) -> bool {
        self.resolved
    }

    fn subtree_resolved(&self) -> bool {
        self.resolved
            && self
                .children
                .iter()
                .flatten()
                .all(GraphHandler::fully_resolved)
    }

    /// Resolved value of parameter `ix`.
    pub fn param_value(&self, ix: usize) -> Result<i64> {
        self.values[ix].ok_or_else(|| Error::ParamNotReady {
            param: self.graph.param(ix).name.clone(),
        })
    }

    /// Lookup closure over the current parameter snapshot.
    pub fn param_lookup(&self) -> impl Fn(usize) -> Option<i64> + '_ {
        |ix| self.values.get(ix).copied().flatten()
    }

    pub(crate) fn values(&self) -> &[Option<i64>] {
        &self.values
    }

    /// Write a dynamic parameter value delivered by a config actor.
    pub fn set_param(&mut self, ix: usize, value: i64) {
        debug_assert!(self.graph.param(ix).dynamic(), "only dynamic parameters are set at runtime");
        self.values[ix] = value.into();
    }

    /// True once every dynamic parameter of this firing has a value.
    pub fn params_ready(&self) -> bool {
        self.graph
            .params()
            .iter()
            .zip(&self.values)
            .all(|(p, v)| !p.dynamic() || v.is_some())
    }

    /// Compute the BRV from the parameter snapshot and instantiate child
    /// handlers for subgraph vertices. Fails with `ParamNotReady` while a
    /// dynamic parameter is missing.
    pub fn resolve(&mut self, uids: &mut UidPool) -> Result<()> {
        if self.resolved {
            return Ok(());
        }
        for (ix, value) in self.values.iter().enumerate() {
            if value.is_none() {
                return Err(Error::ParamNotReady {
                    param: self.graph.param(ix).name.clone(),
                });
            }
        }
        let brv = compute_brv(self.graph, &|ix| self.values.get(ix).copied().flatten())?;
        for id in self.graph.vertex_ids() {
            if let VertexKind::Graph(sub_ix) = self.graph.vertex(id).kind {
                let q = brv[id.ix()] as u32;
                self.children[sub_ix] = if q > 0 {
                    Some(GraphHandler::new(self.graph.subgraph(sub_ix), &self.values, q, uids)?)
                } else {
                    None
                };
            }
        }
        self.brv = brv;
        self.resolved = true;
        Ok(())
    }

    /// Firing count of `vertex` for the current parameter values.
    pub fn repetitions(&self, vertex: VertexId) -> u64 {
        debug_assert!(self.resolved, "BRV read before resolution");
        self.brv[vertex.ix()]
    }

    pub fn brv(&self) -> &[u64] {
        &self.brv
    }

    /// Child handler of the subgraph instantiated by `vertex`, if any.
    pub fn child(&self, vertex: VertexId) -> Option<&GraphHandler<'g>> {
        match self.graph.vertex(vertex).kind {
            VertexKind::Graph(sub_ix) => self.children[sub_ix].as_ref(),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, vertex: VertexId) -> Option<&mut GraphHandler<'g>> {
        match self.graph.vertex(vertex).kind {
            VertexKind::Graph(sub_ix) => self.children[sub_ix].as_mut(),
            _ => None,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &GraphHandler<'g>> {
        self.children.iter().flatten()
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut GraphHandler<'g>> {
        self.children.iter_mut().flatten()
    }

    fn clear(&mut self) {
        if self.is_static {
            for child in self.children.iter_mut().flatten() {
                child.clear();
            }
            return;
        }
        for (ix, param) in self.graph.params().iter().enumerate() {
            if param.dynamic() {
                self.values[ix] = None;
            }
        }
        self.brv.clear();
        self.resolved = false;
        self.children = (0..self.graph.subgraph_count()).map(|_| None).collect();
    }
}
