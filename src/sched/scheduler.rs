//! List scheduling over the expanded graph and over the hierarchical graph.
//!
//! Every policy maps through the best-fit mapper; they differ in the order
//! tasks are offered to it:
//!
//! - `List`: topological source order.
//! - `ListBestFit` (default): topological order sorted by decreasing bottom
//!   level, so long chains get placed first.
//! - `Greedy`: depth-first from the sinks, scheduling a vertex once all its
//!   predecessors are scheduled.
//! - `SrlessListBestFit`: list-best-fit against (vertex, firing) pairs of
//!   the handler tree, resolving dependencies through the dependency
//!   iterator instead of an expanded graph.

use crate::archi::Platform;
use crate::deps::{DependencyIterator, DependencyKind, ScopeFrame};
use crate::error::{Error, Result};
use crate::graph::{VertexId, VertexKind};
use crate::handler::{GraphFiring, GraphHandler};
use crate::sched::fifo::SrlessTaskMeta;
use crate::sched::mapper::best_fit;
use crate::sched::schedule::Schedule;
use crate::sched::task::{ExecDependency, Task, TaskRef};
use crate::srdag::{ResolvedRt, SrdagGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task-ordering policy of the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPolicy {
    List,
    #[default]
    ListBestFit,
    Greedy,
    SrlessListBestFit,
}

/// Which vertices a scheduling pass considers. Dynamic iterations run
/// config actors in a first pass and everything else in a second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    ConfigsOnly,
    SkipConfigs,
}

impl TaskFilter {
    fn keep(self, kind: VertexKind) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::ConfigsOnly => kind == VertexKind::Config,
            TaskFilter::SkipConfigs => kind != VertexKind::Config,
        }
    }
}

pub struct Scheduler {
    policy: SchedulingPolicy,
}

impl Scheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Scheduler { policy }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /* === SRDAG path === */

    /// Schedule every schedulable vertex of `srdag` onto `schedule`.
    pub fn schedule_srdag(
        &self,
        srdag: &SrdagGraph,
        platform: &Platform,
        schedule: &mut Schedule,
        filter: TaskFilter,
    ) -> Result<()> {
        let order = match self.policy {
            SchedulingPolicy::Greedy => greedy_order(srdag)?,
            SchedulingPolicy::List => topo_order(srdag)?,
            SchedulingPolicy::ListBestFit | SchedulingPolicy::SrlessListBestFit => {
                let mut order = topo_order(srdag)?;
                let levels = bottom_levels(srdag, &order);
                order.sort_by_key(|&v| std::cmp::Reverse(levels[&v]));
                order
            }
        };

        let mut task_of_vertex: HashMap<usize, u32> = HashMap::new();
        for vertex_ix in order {
            let vertex = srdag.vertex(vertex_ix);
            if !filter.keep(vertex.kind) {
                continue;
            }
            let mut task = Task::new(TaskRef::Srdag(vertex_ix), vertex.name.clone());
            task.kernel = vertex.kernel;
            task.params = vertex.params.clone();
            task.out_param_count = vertex.out_param_count;

            // (predecessor task, bytes moved) pairs for ready-time purposes
            let mut timed_deps: Vec<(u32, u64)> = Vec::new();
            for port in 0..vertex.input_count() {
                let Some(edge_ix) = vertex.input_edge(port) else { continue };
                let edge = srdag.edge(edge_ix);
                if let Some(&pred) = task_of_vertex.get(&edge.source) {
                    task.exec_deps.push(ExecDependency {
                        task: pred,
                        port: port as u32,
                    });
                    timed_deps.push((pred, edge.rate as u64));
                }
            }

            let rt = vertex.rt.clone();
            let mapping = best_fit(
                platform,
                schedule.stats(),
                &task.name,
                &|pe| rt.mappable_on(pe),
                &|pe| {
                    timed_deps
                        .iter()
                        .map(|&(pred, size)| {
                            let p = schedule.task(pred);
                            p.end + platform.comm_cost(p.mapped_pe, pe, size)
                        })
                        .max()
                        .unwrap_or(0)
                },
                &|cluster| rt.timing_on(cluster),
            )?;
            task.mapped_pe = mapping.pe;
            task.start = mapping.start;
            task.end = mapping.end;
            let ix = schedule.add_task(task);
            task_of_vertex.insert(vertex_ix, ix);
        }
        Ok(())
    }

    /* === Single-rate-less path === */

    /// Schedule (vertex, firing) pairs directly against the resolved parts
    /// of the handler tree. Returns the firing map and the dependency
    /// context the allocator consumes.
    pub fn schedule_srless<'a, 'g>(
        &self,
        root: &'a GraphHandler<'g>,
        platform: &Platform,
        schedule: &mut Schedule,
        filter: TaskFilter,
    ) -> Result<(HashMap<usize, &'a GraphFiring<'g>>, SrlessTaskMeta)> {
        let mut seeds: Vec<Seed> = Vec::new();
        let mut firings: HashMap<usize, &'a GraphFiring<'g>> = HashMap::new();
        let mut scope: Vec<ScopeFrame<'a, 'g>> = Vec::new();
        for firing in root.firings() {
            scope.push(ScopeFrame { firing, via: None });
            collect_seeds(&mut scope, filter, &mut seeds, &mut firings)?;
            scope.pop();
        }

        // topological order over the seeds' dependency keys
        let key_of = |s: &Seed| (s.firing_uid, s.vertex, s.firing);
        let index: HashMap<(usize, VertexId, u32), usize> =
            seeds.iter().enumerate().map(|(i, s)| (key_of(s), i)).collect();
        let mut indegree = vec![0usize; seeds.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); seeds.len()];
        for (i, seed) in seeds.iter().enumerate() {
            for dep in seed.port_deps.iter().flatten() {
                if dep.kind != DependencyKind::Task {
                    continue;
                }
                for f in dep.firing_start..=dep.firing_end {
                    if let Some(&p) = index.get(&(dep.firing_uid, dep.vertex, f)) {
                        successors[p].push(i);
                        indegree[i] += 1;
                    }
                }
            }
        }
        let mut ready: Vec<usize> = (0..seeds.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order: Vec<usize> = Vec::with_capacity(seeds.len());
        while let Some(i) = ready.pop() {
            order.push(i);
            for &s in &successors[i] {
                indegree[s] -= 1;
                if indegree[s] == 0 {
                    ready.push(s);
                }
            }
        }
        if order.len() != seeds.len() {
            return Err(Error::PipelineInconsistent {
                graph: root.graph().name.clone(),
                reason: "cyclic firing dependencies without delay".into(),
            });
        }

        let mut meta = SrlessTaskMeta::default();
        let mut task_of_key: HashMap<(usize, VertexId, u32), u32> = HashMap::new();
        for i in order {
            let seed = &seeds[i];
            let mut task = Task::new(
                TaskRef::Firing {
                    firing_uid: seed.firing_uid,
                    vertex: seed.vertex,
                    firing: seed.firing,
                },
                seed.name.clone(),
            );
            task.kernel = seed.kernel;
            task.params = seed.params.clone();
            task.out_param_count = seed.out_param_count;

            let mut timed_deps: Vec<(u32, u64)> = Vec::new();
            for (port, deps) in seed.port_deps.iter().enumerate() {
                for dep in deps {
                    if dep.kind != DependencyKind::Task {
                        continue;
                    }
                    for f in dep.firing_start..=dep.firing_end {
                        if let Some(&pred) = task_of_key.get(&(dep.firing_uid, dep.vertex, f)) {
                            task.exec_deps.push(ExecDependency {
                                task: pred,
                                port: port as u32,
                            });
                            timed_deps.push((pred, dep.token_count() as u64));
                        }
                    }
                }
            }

            let rt = seed.rt.clone();
            let mapping = best_fit(
                platform,
                schedule.stats(),
                &task.name,
                &|pe| rt.mappable_on(pe),
                &|pe| {
                    timed_deps
                        .iter()
                        .map(|&(pred, size)| {
                            let p = schedule.task(pred);
                            p.end + platform.comm_cost(p.mapped_pe, pe, size)
                        })
                        .max()
                        .unwrap_or(0)
                },
                &|cluster| rt.timing_on(cluster),
            )?;
            task.mapped_pe = mapping.pe;
            task.start = mapping.start;
            task.end = mapping.end;
            let ix = schedule.add_task(task);
            task_of_key.insert((seed.firing_uid, seed.vertex, seed.firing), ix);
            meta.port_deps.push(seed.port_deps.clone());
        }
        Ok((firings, meta))
    }
}

struct Seed {
    firing_uid: usize,
    vertex: VertexId,
    firing: u32,
    name: String,
    kernel: Option<usize>,
    params: Vec<i64>,
    out_param_count: u32,
    rt: ResolvedRt,
    port_deps: Vec<Vec<crate::deps::Dependency>>,
}

fn collect_seeds<'a, 'g>(
    scope: &mut Vec<ScopeFrame<'a, 'g>>,
    filter: TaskFilter,
    seeds: &mut Vec<Seed>,
    firings: &mut HashMap<usize, &'a GraphFiring<'g>>,
) -> Result<()> {
    let frame = *scope.last().expect("non-empty scope");
    let firing = frame.firing;
    firings.insert(firing.uid(), firing);
    if !firing.resolved() {
        // pending levels only expose their config actors
        if filter != TaskFilter::ConfigsOnly {
            return Ok(());
        }
        let graph = firing.graph();
        for id in graph.config_vertices() {
            seeds.push(make_seed(scope, id, 0)?);
        }
        return Ok(());
    }
    let graph = firing.graph();
    for id in graph.vertex_ids() {
        let vertex = graph.vertex(id);
        match vertex.kind {
            VertexKind::Graph(_) => {
                let Some(child) = firing.child(id) else { continue };
                for k in 0..child.firings().len() as u32 {
                    scope.push(ScopeFrame {
                        firing: child.firing(k),
                        via: Some((id, k)),
                    });
                    collect_seeds(scope, filter, seeds, firings)?;
                    scope.pop();
                }
            }
            // configs of a resolved level already ran during resolution
            _ if filter == TaskFilter::ConfigsOnly => {}
            kind if kind.executable()
                && !matches!(kind, VertexKind::ExternIn | VertexKind::ExternOut)
                && filter.keep(kind) =>
            {
                for k in 0..firing.repetitions(id) as u32 {
                    seeds.push(make_seed(scope, id, k)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn make_seed(scope: &[ScopeFrame<'_, '_>], vertex: VertexId, firing: u32) -> Result<Seed> {
    let frame = scope.last().expect("non-empty scope");
    let graph = frame.firing.graph();
    let v = graph.vertex(vertex);
    let lookup = frame.firing.param_lookup();
    let mut params = Vec::with_capacity(v.kernel_params.len());
    for &p in &v.kernel_params {
        params.push(frame.firing.param_value(p)?);
    }
    let mut port_deps = Vec::with_capacity(v.input_count());
    for port in 0..v.input_count() {
        let it = DependencyIterator::for_port(scope, vertex, firing, port)?;
        port_deps.push(it.as_slice().to_vec());
    }
    Ok(Seed {
        firing_uid: frame.firing.uid(),
        vertex,
        firing,
        name: format!("{}:{firing}", v.name),
        kernel: v.kernel,
        params,
        out_param_count: v.config_params.len() as u32,
        rt: ResolvedRt::resolve(&v.rt, &lookup)?,
        port_deps,
    })
}

/// Kahn topological order over the schedulable part of the graph, stable in
/// insertion order.
pub fn topo_order(srdag: &SrdagGraph) -> Result<Vec<usize>> {
    let ids: Vec<usize> = srdag.vertex_ids().collect();
    let mut indegree: HashMap<usize, usize> = ids.iter().map(|&v| (v, 0)).collect();
    for e in srdag.edge_ids() {
        let edge = srdag.edge(e);
        *indegree.get_mut(&edge.sink).expect("live sink") += 1;
    }
    let mut ready: std::collections::VecDeque<usize> = ids
        .iter()
        .copied()
        .filter(|v| indegree[v] == 0)
        .collect();
    let mut order = Vec::with_capacity(ids.len());
    while let Some(v) = ready.pop_front() {
        order.push(v);
        for port in 0..srdag.vertex(v).output_count() {
            if let Some(e) = srdag.vertex(v).output_edge(port) {
                let sink = srdag.edge(e).sink;
                let d = indegree.get_mut(&sink).expect("live sink");
                *d -= 1;
                if *d == 0 {
                    ready.push_back(sink);
                }
            }
        }
    }
    if order.len() != ids.len() {
        return Err(Error::PipelineInconsistent {
            graph: "srdag".into(),
            reason: "expansion produced a cycle".into(),
        });
    }
    order.retain(|&v| srdag.vertex(v).schedulable());
    Ok(order)
}

/// Depth-first order from the sinks, predecessors first.
fn greedy_order(srdag: &SrdagGraph) -> Result<Vec<usize>> {
    let mut order = Vec::new();
    let mut seen: HashMap<usize, bool> = HashMap::new();
    fn visit(srdag: &SrdagGraph, v: usize, seen: &mut HashMap<usize, bool>, order: &mut Vec<usize>) {
        if seen.contains_key(&v) {
            return;
        }
        seen.insert(v, true);
        for port in 0..srdag.vertex(v).input_count() {
            if let Some(e) = srdag.vertex(v).input_edge(port) {
                visit(srdag, srdag.edge(e).source, seen, order);
            }
        }
        order.push(v);
    }
    for v in srdag.vertex_ids() {
        let is_sink = (0..srdag.vertex(v).output_count()).all(|p| srdag.vertex(v).output_edge(p).is_none());
        if is_sink {
            visit(srdag, v, &mut seen, &mut order);
        }
    }
    // vertices on cycles or unreachable from any sink would be missed;
    // sweep the rest in declaration order
    for v in srdag.vertex_ids() {
        visit(srdag, v, &mut seen, &mut order);
    }
    order.retain(|&v| srdag.vertex(v).schedulable());
    Ok(order)
}

fn bottom_levels(srdag: &SrdagGraph, topo: &[usize]) -> HashMap<usize, u64> {
    let mut levels: HashMap<usize, u64> = HashMap::new();
    for &v in topo.iter().rev() {
        let own = srdag.vertex(v).rt.timing_on(0);
        let below = (0..srdag.vertex(v).output_count())
            .filter_map(|p| srdag.vertex(v).output_edge(p))
            .filter_map(|e| levels.get(&srdag.edge(e).sink).copied())
            .max()
            .unwrap_or(0);
        levels.insert(v, own + below);
    }
    levels
}
