//! Repetition-vector computation for one graph level.
//!
//! Given resolved rates, the solver finds the least positive integer firing
//! count per vertex such that token production equals consumption on every
//! edge. Connected components are solved independently with a rational walk
//! and scaled to integers by the LCM of the denominators; interface and
//! config-actor edges then scale whole components so the level consumes what
//! its boundary supplies.
//!
//! Config actors always fire once per graph firing, interfaces are boundary
//! conditions rather than vector entries, and a zero rate collapses the
//! affected vertices out of the vector entirely.

use crate::error::{Error, Result};
use crate::graph::{Graph, VertexKind};

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 { 0 } else { a / gcd(a, b) * b }
}

/// Reduced positive rational.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Ratio {
    num: i64,
    den: i64,
}

impl Ratio {
    fn new(num: i64, den: i64) -> Self {
        let g = gcd(num, den).max(1);
        Ratio {
            num: num / g,
            den: den / g,
        }
    }

    fn mul(self, num: i64, den: i64) -> Self {
        // cross-reduce before multiplying to keep products small
        let g1 = gcd(self.num, den).max(1);
        let g2 = gcd(num, self.den).max(1);
        Ratio::new((self.num / g1) * (num / g2), (self.den / g2) * (den / g1))
    }
}

/// Repetition vector of one level; `q[v] == 0` means vertex `v` is disabled
/// for the current parameter values.
pub fn compute_brv(graph: &Graph, lookup: &dyn Fn(usize) -> Option<i64>) -> Result<Vec<u64>> {
    let n = graph.vertices().len();
    let mut q = vec![0u64; n];
    if n == 0 {
        return Ok(q);
    }

    let inconsistent = |reason: String| Error::PipelineInconsistent {
        graph: graph.name.clone(),
        reason,
    };

    // Resolve every rate once. A failing rate expression surfaces as an
    // inconsistency naming the offending vertex.
    let mut rates = Vec::with_capacity(graph.edges().len());
    for edge in graph.edges() {
        let src = edge.source_rate.value(lookup).map_err(|e| {
            inconsistent(format!("rate of `{}`: {e}", graph.vertex(edge.source).name))
        })?;
        let snk = edge.sink_rate.value(lookup).map_err(|e| {
            inconsistent(format!("rate of `{}`: {e}", graph.vertex(edge.sink).name))
        })?;
        if src < 0 || snk < 0 {
            return Err(inconsistent(format!(
                "negative rate on edge `{}` -> `{}`",
                graph.vertex(edge.source).name,
                graph.vertex(edge.sink).name
            )));
        }
        rates.push((src, snk));
    }

    // Vertices pinned outside the component solve.
    let pinned = |kind: VertexKind| {
        matches!(kind, VertexKind::Config | VertexKind::Delay) || kind.interface()
    };

    // An edge with a zero rate on exactly one side disables both endpoints,
    // then the disabling cascades along non-zero edges.
    let mut disabled = vec![false; n];
    let mut worklist: Vec<usize> = Vec::new();
    for (edge, &(src, snk)) in graph.edges().iter().zip(&rates) {
        if (src == 0) == (snk == 0) {
            continue;
        }
        for v in [edge.source, edge.sink] {
            if !pinned(graph.vertex(v).kind) && !disabled[v.ix()] {
                disabled[v.ix()] = true;
                worklist.push(v.ix());
            }
        }
    }
    while let Some(v) = worklist.pop() {
        for (edge, &(src, snk)) in graph.edges().iter().zip(&rates) {
            let neighbor = if edge.source.ix() == v && snk > 0 {
                edge.sink.ix()
            } else if edge.sink.ix() == v && src > 0 {
                edge.source.ix()
            } else {
                continue;
            };
            if !disabled[neighbor] && !pinned(graph.vertices()[neighbor].kind) {
                disabled[neighbor] = true;
                worklist.push(neighbor);
            }
        }
    }

    let is_solvable: Vec<bool> = (0..n)
        .map(|v| !disabled[v] && !pinned(graph.vertices()[v].kind))
        .collect();
    let solvable: Vec<usize> = (0..n).filter(|&v| is_solvable[v]).collect();

    // Rational walk per connected component, in declaration order.
    let mut ratio: Vec<Option<Ratio>> = vec![None; n];
    let mut component: Vec<Option<usize>> = vec![None; n];
    let mut component_count = 0usize;
    for &start in &solvable {
        if ratio[start].is_some() {
            continue;
        }
        let comp = component_count;
        component_count += 1;
        ratio[start] = Some(Ratio::new(1, 1));
        component[start] = Some(comp);
        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            let here = ratio[v].expect("visited vertex has a ratio");
            for (edge, &(src, snk)) in graph.edges().iter().zip(&rates) {
                let (neighbor, num, den) = if edge.source.ix() == v {
                    (edge.sink.ix(), src, snk)
                } else if edge.sink.ix() == v {
                    (edge.source.ix(), snk, src)
                } else {
                    continue;
                };
                if num == 0 || den == 0 || !is_solvable[neighbor] {
                    continue;
                }
                // q(neighbor) = q(v) * rate(v side) / rate(neighbor side)
                let propagated = here.mul(num, den);
                match ratio[neighbor] {
                    None => {
                        ratio[neighbor] = Some(propagated);
                        component[neighbor] = Some(comp);
                        stack.push(neighbor);
                    }
                    Some(existing) if existing != propagated => {
                        return Err(inconsistent(format!(
                            "no integer repetition vector around `{}`",
                            graph.vertices()[neighbor].name
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    // Scale each component to the least positive integer vector.
    let mut scale_den = vec![1i64; component_count];
    for &v in &solvable {
        if let (Some(r), Some(c)) = (ratio[v], component[v]) {
            scale_den[c] = lcm(scale_den[c], r.den);
        }
    }
    for &v in &solvable {
        if let (Some(r), Some(c)) = (ratio[v], component[v]) {
            q[v] = (r.num * (scale_den[c] / r.den)) as u64;
        }
    }
    for c in 0..component_count {
        let g = solvable
            .iter()
            .filter(|&&v| component[v] == Some(c))
            .fold(0i64, |acc, &v| gcd(acc, q[v] as i64));
        if g > 1 {
            for &v in &solvable {
                if component[v] == Some(c) {
                    q[v] /= g as u64;
                }
            }
        }
    }

    // Boundary scaling: interfaces supply (expect) a fixed token count per
    // graph firing; config actors and delay endpoints fire exactly once.
    let mut factor = vec![1u64; component_count];
    for (edge, &(src, snk)) in graph.edges().iter().zip(&rates) {
        let src_kind = graph.vertex(edge.source).kind;
        let snk_kind = graph.vertex(edge.sink).kind;
        let (boundary_rate, inner_v, inner_rate) = if pinned(src_kind) && !pinned(snk_kind) {
            (src, edge.sink.ix(), snk)
        } else if pinned(snk_kind) && !pinned(src_kind) {
            (snk, edge.source.ix(), src)
        } else {
            continue;
        };
        if inner_rate == 0 || disabled[inner_v] {
            continue;
        }
        let Some(c) = component[inner_v] else { continue };
        let inner_total = (q[inner_v] * factor[c]).saturating_mul(inner_rate as u64);
        if inner_total < boundary_rate as u64 {
            let needed = (boundary_rate as u64).div_ceil(q[inner_v] * inner_rate as u64);
            factor[c] = factor[c].max(needed);
        }
    }
    for &v in &solvable {
        if let Some(c) = component[v] {
            q[v] *= factor[c];
        }
    }

    for v in 0..n {
        if pinned(graph.vertices()[v].kind) {
            // one firing per graph firing; not part of the solved vector
            q[v] = 1;
        }
    }
    // Final consistency check over non-boundary edges.
    for (edge, &(src, snk)) in graph.edges().iter().zip(&rates) {
        let src_kind = graph.vertex(edge.source).kind;
        let snk_kind = graph.vertex(edge.sink).kind;
        let produced = q[edge.source.ix()] as i128 * src as i128;
        let consumed = q[edge.sink.ix()] as i128 * snk as i128;
        if pinned(src_kind) && !pinned(snk_kind) {
            // interface or pinned producer: the level must absorb at least
            // what the boundary supplies
            if consumed < src as i128 && !disabled[edge.sink.ix()] {
                return Err(inconsistent(format!(
                    "`{}` under-consumes its boundary",
                    graph.vertex(edge.sink).name
                )));
            }
        } else if pinned(snk_kind) && !pinned(src_kind) {
            if produced < snk as i128 && !disabled[edge.source.ix()] {
                return Err(inconsistent(format!(
                    "`{}` under-produces its boundary",
                    graph.vertex(edge.source).name
                )));
            }
        } else if !pinned(src_kind) && !pinned(snk_kind) && produced != consumed {
            return Err(inconsistent(format!(
                "unbalanced edge `{}` -> `{}` ({produced} != {consumed})",
                graph.vertex(edge.source).name,
                graph.vertex(edge.sink).name
            )));
        }
    }

    tracing::debug!(graph = %graph.name, brv = ?q, "repetition vector resolved");
    Ok(q)
}
