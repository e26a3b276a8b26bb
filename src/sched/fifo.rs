//! Virtual FIFO allocation.
//!
//! Buffers get virtual addresses from a monotonically increasing cursor.
//! Persistent delays are reserved below the watermark once per application
//! and zero-initialized through the GRT cluster's memory interface;
//! `clear()` rewinds the cursor to the watermark so per-iteration buffers
//! are recycled while the delay region survives.
//!
//! Copy semantics are expressed as [`AllocationRule`]s: fork, duplicate,
//! head and tail tasks never get buffers of their own, they alias a slice
//! of their input. The no-sync variant goes further and removes those copy
//! tasks from dispatch entirely when every consumer runs on the source's
//! cluster.

use crate::archi::Platform;
use crate::deps::{Dependency, DependencyKind};
use crate::error::{Error, Result};
use crate::graph::{EdgeId, VertexKind};
use crate::handler::{GraphFiring, GraphHandler};
use crate::sched::schedule::Schedule;
use crate::sched::task::TaskRef;
use crate::srdag::{SrdagGraph, SrdagOrigin};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ownership semantics of a FIFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FifoAttribute {
    /// The task owns the memory: allocated before write, freed after the
    /// last read.
    #[default]
    RwOwn,
    /// Alias into memory owned by another FIFO; never freed by its reader.
    RwOnly,
    /// External memory the runtime does not manage.
    RwExt,
}

/// One virtual buffer handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fifo {
    pub address: u64,
    pub size: u32,
    pub offset: u32,
    /// Remaining reader count for shared buffers.
    pub count: u32,
    pub attribute: FifoAttribute,
}

/// Input and output FIFO handles of one job. Each port may be covered by
/// several pieces which the runner concatenates in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFifos {
    pub inputs: Vec<Vec<Fifo>>,
    pub outputs: Vec<Vec<Fifo>>,
}

/// How a task's output buffer relates to its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationRule {
    /// Fresh allocation of the given size.
    New { size: u32 },
    /// Alias into the input FIFO at an offset.
    SameIn { offset: u32, size: u32 },
    /// Alias into an already-allocated output FIFO at an offset.
    SameOut { offset: u32, size: u32 },
    /// Point at external memory.
    Ext { address: u64, size: u32 },
    /// Output gathers several input pieces; the buffer is fresh and the
    /// kernel concatenates.
    Merge { size: u32 },
    /// Output cycles the input; fresh buffer, kernel repeats.
    Repeat { size: u32 },
}

/// Flavour of the allocator, selected in the runtime configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FifoAllocatorKind {
    /// Piecewise allocation against the hierarchical graph.
    #[default]
    Default,
    /// SRDAG allocation plus elision of same-cluster copy tasks.
    DefaultNoSync,
    /// Plain SRDAG allocation.
    SrdagDefault,
}

/// Extra scheduling context the single-rate-less allocator needs: the
/// dependencies of every task, grouped `[task][input port][piece]`, exactly
/// as the scheduler resolved them.
#[derive(Clone, Debug, Default)]
pub struct SrlessTaskMeta {
    pub port_deps: Vec<Vec<Vec<Dependency>>>,
}

/// The virtual-address allocator.
pub struct FifoAllocator {
    kind: FifoAllocatorKind,
    cursor: u64,
    reserved: u64,
    reserved_done: bool,
    persistent: HashMap<(usize, EdgeId), u64>,
    /// Per-iteration buffers of non-persistent delays (single-rate-less
    /// path only).
    delay_buffers: HashMap<(usize, EdgeId), u64>,
}

impl FifoAllocator {
    pub fn new(kind: FifoAllocatorKind) -> Self {
        FifoAllocator {
            kind,
            cursor: 0,
            reserved: 0,
            reserved_done: false,
            persistent: HashMap::new(),
            delay_buffers: HashMap::new(),
        }
    }

    pub fn kind(&self) -> FifoAllocatorKind {
        self.kind
    }

    /// Hand out `size` bytes of virtual address space.
    pub fn allocate(&mut self, size: u64) -> u64 {
        let address = self.cursor;
        tracing::debug!(size, address, "virtual allocation");
        self.cursor += size;
        address
    }

    /// Rewind the cursor to the persistent watermark.
    pub fn clear(&mut self) {
        self.cursor = self.reserved;
        self.delay_buffers.clear();
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Reserve and zero the buffers of every persistent delay in the
    /// resolved tree, through the GRT cluster's memory interface. Runs once;
    /// later calls are no-ops so `clear()` keeps the region alive.
    pub fn allocate_persistent_delays(&mut self, root: &GraphHandler<'_>, platform: &Platform) -> Result<()> {
        if self.reserved_done {
            return Ok(());
        }
        self.reserve_level(root, platform)?;
        self.reserved_done = true;
        self.cursor = self.cursor.max(self.reserved);
        Ok(())
    }

    fn reserve_level(&mut self, handler: &GraphHandler<'_>, platform: &Platform) -> Result<()> {
        let memory = platform.grt_memory();
        for firing in handler.firings() {
            if !firing.resolved() {
                continue;
            }
            let graph = firing.graph();
            for edge_id in graph.edge_ids() {
                let edge = graph.edge(edge_id);
                let Some(delay) = &edge.delay else { continue };
                if !delay.persistent {
                    continue;
                }
                let value = delay.value.value(&firing.param_lookup())? as u64;
                let address = self.reserved;
                memory.allocate(address, value)?;
                memory.zero(address, value)?;
                tracing::info!(bytes = value, address, "reserving persistent delay memory");
                self.persistent.insert((firing.uid(), edge_id), address);
                self.reserved += value;
            }
            for child in firing.children() {
                self.reserve_level(child, platform)?;
            }
        }
        Ok(())
    }

    /// Reserved address of a persistent delay.
    pub fn persistent_address(&self, firing_uid: usize, edge: EdgeId) -> Option<u64> {
        self.persistent.get(&(firing_uid, edge)).copied()
    }

    /* === SRDAG allocation === */

    /// Allocation rule for output `port` of an SRDAG vertex.
    fn srdag_rule(&self, srdag: &SrdagGraph, vertex_ix: usize, port: usize) -> AllocationRule {
        let vertex = srdag.vertex(vertex_ix);
        let out_rate = vertex
            .output_edge(port)
            .map_or(0, |e| srdag.edge(e).rate as u32);
        let in_rate = vertex
            .input_edge(0)
            .map_or(0, |e| srdag.edge(e).rate as u32);
        match vertex.kind {
            VertexKind::Fork => {
                let offset: u32 = (0..port)
                    .filter_map(|p| vertex.output_edge(p))
                    .map(|e| srdag.edge(e).rate as u32)
                    .sum();
                AllocationRule::SameIn { offset, size: out_rate }
            }
            VertexKind::Duplicate => AllocationRule::SameIn { offset: 0, size: out_rate },
            VertexKind::Head => AllocationRule::SameIn { offset: 0, size: out_rate },
            VertexKind::Tail => AllocationRule::SameIn {
                offset: in_rate.saturating_sub(out_rate),
                size: out_rate,
            },
            VertexKind::Join => AllocationRule::Merge { size: out_rate },
            VertexKind::Repeat => AllocationRule::Repeat { size: out_rate },
            VertexKind::Init => match &vertex.origin {
                SrdagOrigin::DelayInit {
                    firing_uid,
                    edge,
                    persistent: true,
                } => match self.persistent_address(*firing_uid, *edge) {
                    Some(address) => AllocationRule::Ext { address, size: out_rate },
                    None => AllocationRule::New { size: out_rate },
                },
                _ => AllocationRule::New { size: out_rate },
            },
            _ => AllocationRule::New { size: out_rate },
        }
    }

    /// Build every task's FIFO handles after SRDAG scheduling. Tasks must
    /// already be in dependency order.
    pub fn allocate_srdag(&mut self, srdag: &SrdagGraph, platform: &Platform, schedule: &mut Schedule) -> Result<()> {
        let mut edge_fifos: HashMap<usize, Fifo> = HashMap::new();
        let mut task_of_vertex: HashMap<usize, u32> = HashMap::new();
        for task in schedule.tasks() {
            if let TaskRef::Srdag(v) = task.reference {
                task_of_vertex.insert(v, task.ix);
            }
        }

        for task_ix in 0..schedule.task_count() as u32 {
            let TaskRef::Srdag(vertex_ix) = schedule.task(task_ix).reference else {
                continue;
            };
            let vertex = srdag.vertex(vertex_ix);

            // inputs first: aliases reference them
            let mut inputs: Vec<Vec<Fifo>> = Vec::with_capacity(vertex.input_count());
            for port in 0..vertex.input_count() {
                let mut pieces = Vec::new();
                if let Some(edge_ix) = vertex.input_edge(port) {
                    let edge = srdag.edge(edge_ix);
                    let producer = srdag.vertex(edge.source);
                    if producer.kind == VertexKind::ExternIn {
                        pieces.push(Fifo {
                            address: producer.extern_address.unwrap_or(0),
                            size: edge.rate as u32,
                            offset: 0,
                            count: 1,
                            attribute: FifoAttribute::RwExt,
                        });
                    } else {
                        let fifo = edge_fifos.get(&edge_ix).copied().ok_or_else(|| {
                            Error::PoolExhausted {
                                pool: format!("fifo for edge into `{}`", vertex.name),
                                capacity: edge_fifos.len(),
                            }
                        })?;
                        pieces.push(fifo);
                    }
                }
                inputs.push(pieces);
            }

            let mut outputs: Vec<Vec<Fifo>> = Vec::with_capacity(vertex.output_count());
            for port in 0..vertex.output_count() {
                let Some(edge_ix) = vertex.output_edge(port) else {
                    outputs.push(Vec::new());
                    continue;
                };
                let edge = srdag.edge(edge_ix);
                let consumer = srdag.vertex(edge.sink);
                let rule = if consumer.kind == VertexKind::ExternOut {
                    AllocationRule::Ext {
                        address: consumer.extern_address.unwrap_or(0),
                        size: edge.rate as u32,
                    }
                } else {
                    self.srdag_rule(srdag, vertex_ix, port)
                };
                let mut fifo = self.apply_rule(rule, inputs.first().and_then(|p| p.first()).copied())?;
                if vertex.kind == VertexKind::Duplicate {
                    // read-only share: freed when the last reader is done
                    fifo.count = vertex.output_count() as u32;
                }
                edge_fifos.insert(edge_ix, fifo);
                outputs.push(vec![fifo]);
            }

            // a persistent END writes its tokens back into the reserved
            // delay region for the next iteration
            if let SrdagOrigin::DelayEnd {
                firing_uid,
                edge,
                persistent: true,
            } = &vertex.origin
            {
                if let Some(address) = self.persistent_address(*firing_uid, *edge) {
                    let size = vertex.input_edge(0).map_or(0, |e| srdag.edge(e).rate as u32);
                    outputs.push(vec![Fifo {
                        address,
                        size,
                        offset: 0,
                        count: 1,
                        attribute: FifoAttribute::RwExt,
                    }]);
                }
            }

            let task = schedule.task_mut(task_ix);
            task.fifos = JobFifos { inputs, outputs };
        }

        if self.kind == FifoAllocatorKind::DefaultNoSync {
            self.elide_copy_tasks(srdag, platform, schedule, &task_of_vertex);
        }
        Ok(())
    }

    fn apply_rule(&mut self, rule: AllocationRule, input: Option<Fifo>) -> Result<Fifo> {
        let fifo = match rule {
            AllocationRule::New { size }
            | AllocationRule::Merge { size }
            | AllocationRule::Repeat { size } => Fifo {
                address: self.allocate(u64::from(size)),
                size,
                offset: 0,
                count: 1,
                attribute: FifoAttribute::RwOwn,
            },
            AllocationRule::SameIn { offset, size } => {
                let base = input.ok_or_else(|| Error::PoolExhausted {
                    pool: "alias without input fifo".into(),
                    capacity: 0,
                })?;
                Fifo {
                    address: base.address,
                    size,
                    offset: base.offset + offset,
                    count: 1,
                    attribute: FifoAttribute::RwOnly,
                }
            }
            AllocationRule::SameOut { offset, size } => {
                let base = input.ok_or_else(|| Error::PoolExhausted {
                    pool: "alias without output fifo".into(),
                    capacity: 0,
                })?;
                Fifo {
                    address: base.address,
                    size,
                    offset: base.offset + offset,
                    count: 1,
                    attribute: FifoAttribute::RwOnly,
                }
            }
            AllocationRule::Ext { address, size } => Fifo {
                address,
                size,
                offset: 0,
                count: 1,
                attribute: FifoAttribute::RwExt,
            },
        };
        Ok(fifo)
    }

    /// Remove fork and duplicate tasks from dispatch when their slices stay
    /// on one cluster. Legal only if every consumer of the source FIFO is
    /// mapped to the same cluster as the copy task's producer.
    fn elide_copy_tasks(
        &self,
        srdag: &SrdagGraph,
        platform: &Platform,
        schedule: &mut Schedule,
        task_of_vertex: &HashMap<usize, u32>,
    ) {
        for task_ix in 0..schedule.task_count() as u32 {
            let TaskRef::Srdag(vertex_ix) = schedule.task(task_ix).reference else {
                continue;
            };
            let vertex = srdag.vertex(vertex_ix);
            if !matches!(vertex.kind, VertexKind::Fork | VertexKind::Duplicate) {
                continue;
            }
            let Some(in_edge) = vertex.input_edge(0) else { continue };
            let Some(&producer_task) = task_of_vertex.get(&srdag.edge(in_edge).source) else {
                continue;
            };
            let cluster = platform.cluster_of(schedule.task(producer_task).mapped_pe);
            let consumers: Vec<u32> = (0..vertex.output_count())
                .filter_map(|p| vertex.output_edge(p))
                .filter_map(|e| task_of_vertex.get(&srdag.edge(e).sink).copied())
                .collect();
            let same_cluster = consumers
                .iter()
                .all(|&t| platform.cluster_of(schedule.task(t).mapped_pe) == cluster)
                && platform.cluster_of(schedule.task(task_ix).mapped_pe) == cluster;
            if !same_cluster {
                continue;
            }
            schedule.task_mut(task_ix).elided = true;
            for consumer in consumers {
                for dep in &mut schedule.task_mut(consumer).exec_deps {
                    if dep.task == task_ix {
                        dep.task = producer_task;
                    }
                }
            }
            tracing::debug!(task = task_ix, "copy task elided by no-sync allocation");
        }
    }

    /* === Single-rate-less allocation === */

    /// Build FIFO handles for tasks scheduled directly on the hierarchical
    /// graph, from the dependencies the scheduler resolved.
    pub fn allocate_srless(
        &mut self,
        firings: &HashMap<usize, &GraphFiring<'_>>,
        schedule: &mut Schedule,
        meta: &SrlessTaskMeta,
    ) -> Result<()> {
        // output buffers first, keyed by producer coordinates
        let mut out_fifos: HashMap<(usize, u32, u32, usize), Fifo> = HashMap::new();
        for task_ix in 0..schedule.task_count() as u32 {
            let TaskRef::Firing {
                firing_uid,
                vertex,
                firing,
            } = schedule.task(task_ix).reference
            else {
                continue;
            };
            let firing_ref = firings[&firing_uid];
            let graph = firing_ref.graph();
            let v = graph.vertex(vertex);
            let mut outputs: Vec<Vec<Fifo>> = Vec::with_capacity(v.output_count());
            for port in 0..v.output_count() {
                let mut pieces = Vec::new();
                if let Some(edge_id) = v.output_edge(port) {
                    let edge = graph.edge(edge_id);
                    let rate = edge.source_rate.value(&firing_ref.param_lookup())?;
                    if rate > 0 {
                        let fifo = Fifo {
                            address: self.allocate(rate as u64),
                            size: rate as u32,
                            offset: 0,
                            count: 1,
                            attribute: FifoAttribute::RwOwn,
                        };
                        out_fifos.insert((firing_uid, vertex.raw(), firing, port), fifo);
                        pieces.push(fifo);
                        // tail tokens of a persistent delay are written back
                        // to the reserved region for the next iteration
                        if let Some(delay) = &edge.delay {
                            if delay.persistent {
                                let d = delay.value.value(&firing_ref.param_lookup())?;
                                let total = firing_ref.repetitions(edge.source) as i64 * rate;
                                let lo = i64::from(firing) * rate;
                                let hi = lo + rate;
                                let tail_lo = (total - d).max(lo);
                                if tail_lo < hi {
                                    if let Some(address) = self.persistent_address(firing_uid, edge_id) {
                                        pieces.push(Fifo {
                                            address,
                                            size: (hi - tail_lo) as u32,
                                            offset: (tail_lo - (total - d)) as u32,
                                            count: 1,
                                            attribute: FifoAttribute::RwExt,
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
                outputs.push(pieces);
            }
            schedule.task_mut(task_ix).fifos.outputs = outputs;
        }

        // inputs from the resolved dependencies
        for task_ix in 0..schedule.task_count() as u32 {
            if !matches!(schedule.task(task_ix).reference, TaskRef::Firing { .. }) {
                continue;
            }
            let ports = &meta.port_deps[task_ix as usize];
            let mut inputs: Vec<Vec<Fifo>> = Vec::with_capacity(ports.len());
            for deps in ports {
                let mut pieces = Vec::new();
                for dep in deps {
                    self.dep_pieces(dep, firings, &out_fifos, &mut pieces)?;
                }
                inputs.push(pieces);
            }
            schedule.task_mut(task_ix).fifos.inputs = inputs;
        }
        Ok(())
    }

    fn dep_pieces(
        &mut self,
        dep: &Dependency,
        firings: &HashMap<usize, &GraphFiring<'_>>,
        out_fifos: &HashMap<(usize, u32, u32, usize), Fifo>,
        pieces: &mut Vec<Fifo>,
    ) -> Result<()> {
        match dep.kind {
            DependencyKind::Task => {
                for f in dep.firing_start..=dep.firing_end {
                    let offset = if f == dep.firing_start { dep.memory_start } else { 0 };
                    let end = if f == dep.firing_end { dep.memory_end } else { dep.rate - 1 };
                    let base = out_fifos
                        .get(&(dep.firing_uid, dep.vertex.raw(), f, dep.port))
                        .copied()
                        .ok_or_else(|| Error::PoolExhausted {
                            pool: "producer fifo not allocated".into(),
                            capacity: out_fifos.len(),
                        })?;
                    pieces.push(Fifo {
                        address: base.address,
                        size: (end - offset + 1) as u32,
                        offset: offset as u32,
                        count: 1,
                        attribute: FifoAttribute::RwOnly,
                    });
                }
            }
            DependencyKind::Delay { persistent } => {
                let key = (dep.firing_uid, dep.edge);
                let address = if persistent {
                    self.persistent.get(&key).copied().ok_or_else(|| Error::PoolExhausted {
                        pool: "persistent delay not reserved".into(),
                        capacity: self.persistent.len(),
                    })?
                } else {
                    match self.delay_buffers.get(&key) {
                        Some(&a) => a,
                        None => {
                            let a = self.allocate(dep.rate as u64);
                            self.delay_buffers.insert(key, a);
                            a
                        }
                    }
                };
                pieces.push(Fifo {
                    address,
                    size: (dep.memory_end - dep.memory_start + 1) as u32,
                    offset: dep.memory_start as u32,
                    count: 1,
                    attribute: if persistent { FifoAttribute::RwExt } else { FifoAttribute::RwOnly },
                });
            }
            DependencyKind::Extern => {
                let address = firings
                    .get(&dep.firing_uid)
                    .and_then(|f| f.graph().vertex(dep.vertex).extern_address)
                    .unwrap_or(0);
                pieces.push(Fifo {
                    address,
                    size: (dep.memory_end - dep.memory_start + 1) as u32,
                    offset: dep.memory_start as u32,
                    count: 1,
                    attribute: FifoAttribute::RwExt,
                });
            }
        }
        Ok(())
    }
}
