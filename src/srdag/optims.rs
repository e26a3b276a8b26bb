//! Pattern optimizations on the expanded graph.
//!
//! Applied after expansion in a fixed order: unitary elimination first, then
//! fork-fork, join-join and join-fork to a fixed point, then join-end and
//! init-end cleanup. The passes are idempotent: re-running the optimizer on
//! an already optimized graph performs no rewrite.

use crate::error::Result;
use crate::graph::VertexKind;
use crate::srdag::{SrdagGraph, SrdagOrigin, relink};

/// Run every optimization pass over `srdag`.
pub fn optimize(srdag: &mut SrdagGraph) -> Result<()> {
    unitary(srdag);
    loop {
        let mut changed = fork_fork(srdag);
        changed |= join_join(srdag);
        changed |= join_fork(srdag)?;
        if !changed {
            break;
        }
    }
    join_end(srdag);
    init_end(srdag);
    unitary(srdag);
    Ok(())
}

/// Bypass adapters whose single input window equals their single output
/// window.
pub fn unitary(srdag: &mut SrdagGraph) -> bool {
    let mut changed = false;
    for ix in 0..srdag.slot_count() {
        let Some(vertex) = srdag.try_vertex(ix) else { continue };
        let removable = match vertex.kind {
            VertexKind::Fork | VertexKind::Duplicate => vertex.output_count() == 1,
            VertexKind::Join | VertexKind::Tail | VertexKind::Head => vertex.input_count() == 1,
            VertexKind::Repeat => true,
            _ => false,
        };
        if !removable {
            continue;
        }
        let (Some(in_e), Some(out_e)) = (vertex.input_edge(0), vertex.output_edge(0)) else {
            continue;
        };
        if srdag.edge(in_e).rate != srdag.edge(out_e).rate {
            continue;
        }
        let sink = (srdag.edge(out_e).sink, srdag.edge(out_e).sink_port);
        srdag.remove_edge(out_e);
        srdag.set_sink(in_e, sink.0, sink.1);
        srdag.remove_vertex(ix);
        changed = true;
    }
    changed
}

/// Merge a FORK feeding another FORK into one FORK with the combined port
/// map, preserving downstream port order.
pub fn fork_fork(srdag: &mut SrdagGraph) -> bool {
    let mut changed = false;
    'scan: loop {
        for edge_ix in srdag.edge_ids().collect::<Vec<_>>() {
            let edge = *srdag.edge(edge_ix);
            let src_fork = srdag.vertex(edge.source).kind == VertexKind::Fork;
            let snk_fork = srdag.try_vertex(edge.sink).is_some_and(|v| v.kind == VertexKind::Fork);
            if !(src_fork && snk_fork && edge.sink_port == 0) {
                continue;
            }
            let upper = edge.source;
            let lower = edge.sink;
            let junction = edge.source_port;

            // combined outputs: upper[..junction], lower[..], upper[junction+1..]
            let mut moved: Vec<usize> = Vec::new();
            for port in 0..junction {
                moved.push(srdag.vertex(upper).output_edge(port).expect("connected fork port"));
            }
            for port in 0..srdag.vertex(lower).output_count() {
                moved.push(srdag.vertex(lower).output_edge(port).expect("connected fork port"));
            }
            for port in junction + 1..srdag.vertex(upper).output_count() {
                moved.push(srdag.vertex(upper).output_edge(port).expect("connected fork port"));
            }
            let in_e = srdag.vertex(upper).input_edge(0).expect("connected fork input");
            let merged = srdag.adapter(format!("fork::{}", srdag.slot_count()), VertexKind::Fork, 1, moved.len());
            srdag.remove_edge(edge_ix);
            for (port, out_e) in moved.into_iter().enumerate() {
                srdag.set_source(out_e, merged, port);
            }
            srdag.set_sink(in_e, merged, 0);
            srdag.remove_vertex(upper);
            srdag.remove_vertex(lower);
            changed = true;
            continue 'scan;
        }
        break;
    }
    changed
}

/// Merge a JOIN fed by another JOIN, mirroring [`fork_fork`].
pub fn join_join(srdag: &mut SrdagGraph) -> bool {
    let mut changed = false;
    'scan: loop {
        for edge_ix in srdag.edge_ids().collect::<Vec<_>>() {
            let edge = *srdag.edge(edge_ix);
            let src_join = srdag.vertex(edge.source).kind == VertexKind::Join;
            let snk_join = srdag.try_vertex(edge.sink).is_some_and(|v| v.kind == VertexKind::Join);
            if !(src_join && snk_join && edge.source_port == 0) {
                continue;
            }
            let upper = edge.source;
            let lower = edge.sink;
            let junction = edge.sink_port;

            let mut moved: Vec<usize> = Vec::new();
            for port in 0..junction {
                moved.push(srdag.vertex(lower).input_edge(port).expect("connected join port"));
            }
            for port in 0..srdag.vertex(upper).input_count() {
                moved.push(srdag.vertex(upper).input_edge(port).expect("connected join port"));
            }
            for port in junction + 1..srdag.vertex(lower).input_count() {
                moved.push(srdag.vertex(lower).input_edge(port).expect("connected join port"));
            }
            let out_e = srdag.vertex(lower).output_edge(0).expect("connected join output");
            let merged = srdag.adapter(format!("join::{}", srdag.slot_count()), VertexKind::Join, moved.len(), 1);
            srdag.remove_edge(edge_ix);
            for (port, in_e) in moved.into_iter().enumerate() {
                srdag.set_sink(in_e, merged, port);
            }
            srdag.set_source(out_e, merged, 0);
            srdag.remove_vertex(upper);
            srdag.remove_vertex(lower);
            changed = true;
            continue 'scan;
        }
        break;
    }
    changed
}

/// Dissolve a JOIN directly feeding a FORK by re-linking the JOIN's
/// producers to the FORK's consumers.
pub fn join_fork(srdag: &mut SrdagGraph) -> Result<bool> {
    let mut changed = false;
    'scan: loop {
        for edge_ix in srdag.edge_ids().collect::<Vec<_>>() {
            let edge = *srdag.edge(edge_ix);
            if srdag.vertex(edge.source).kind != VertexKind::Join {
                continue;
            }
            if srdag.try_vertex(edge.sink).map(|v| v.kind) != Some(VertexKind::Fork) {
                continue;
            }
            let join = edge.source;
            let fork = edge.sink;
            let mut sources = Vec::new();
            for port in 0..srdag.vertex(join).input_count() {
                let in_e = srdag.vertex(join).input_edge(port).expect("connected join port");
                let e = *srdag.edge(in_e);
                sources.push((e.source, e.source_port, e.rate));
                srdag.remove_edge(in_e);
            }
            let mut sinks = Vec::new();
            for port in 0..srdag.vertex(fork).output_count() {
                let out_e = srdag.vertex(fork).output_edge(port).expect("connected fork port");
                let e = *srdag.edge(out_e);
                sinks.push((e.sink, e.sink_port, e.rate));
                srdag.remove_edge(out_e);
            }
            srdag.remove_edge(edge_ix);
            srdag.remove_vertex(join);
            srdag.remove_vertex(fork);
            relink(srdag, &sources, &sinks)?;
            changed = true;
            continue 'scan;
        }
        break;
    }
    Ok(changed)
}

fn transient_end(srdag: &SrdagGraph, ix: usize) -> bool {
    srdag.try_vertex(ix).is_some_and(|v| {
        v.kind == VertexKind::End
            && v.output_count() == 0
            && matches!(v.origin, SrdagOrigin::DelayEnd { persistent: false, .. })
    })
}

/// Split a JOIN whose only consumer is a discarding END into one END per
/// input. Persistent delays keep their END since its buffer offsets matter.
pub fn join_end(srdag: &mut SrdagGraph) -> bool {
    let mut changed = false;
    for ix in 0..srdag.slot_count() {
        let Some(vertex) = srdag.try_vertex(ix) else { continue };
        if vertex.kind != VertexKind::Join {
            continue;
        }
        let Some(out_e) = vertex.output_edge(0) else { continue };
        let end = srdag.edge(out_e).sink;
        if !transient_end(srdag, end) {
            continue;
        }
        let origin = srdag.vertex(end).origin.clone();
        let inputs: Vec<usize> = (0..srdag.vertex(ix).input_count())
            .filter_map(|p| srdag.vertex(ix).input_edge(p))
            .collect();
        for in_e in inputs {
            let split = srdag.adapter(format!("end::{}", srdag.slot_count()), VertexKind::End, 1, 0);
            srdag.vertices[split].as_mut().expect("live vertex").origin = origin.clone();
            srdag.set_sink(in_e, split, 0);
        }
        srdag.remove_vertex(end);
        srdag.remove_vertex(ix);
        changed = true;
    }
    changed
}

/// Remove an INIT whose tokens flow straight into a discarding END with the
/// same rate.
pub fn init_end(srdag: &mut SrdagGraph) -> bool {
    let mut changed = false;
    for ix in 0..srdag.slot_count() {
        let Some(vertex) = srdag.try_vertex(ix) else { continue };
        let plain_init = vertex.kind == VertexKind::Init
            && vertex.input_count() == 0
            && matches!(vertex.origin, SrdagOrigin::DelayInit { persistent: false, .. });
        if !plain_init {
            continue;
        }
        let Some(out_e) = vertex.output_edge(0) else { continue };
        let end = srdag.edge(out_e).sink;
        if !transient_end(srdag, end) {
            continue;
        }
        srdag.remove_vertex(end);
        srdag.remove_vertex(ix);
        changed = true;
    }
    changed
}
