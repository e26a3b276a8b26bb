use anyhow::Result;
use tokenloom::brv::compute_brv;
use tokenloom::graph::{Graph, ParamKind, VertexKind};
use tokenloom::handler::{GraphHandler, UidPool};
use tokenloom::testing::{hierarchical_graph, producer_consumer};
use tokenloom::Error;

fn no_params(_: usize) -> Option<i64> {
    None
}

#[test]
fn two_three_producer_consumer() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let brv = compute_brv(&graph, &no_params)?;
    assert_eq!(brv, vec![3, 2]);
    Ok(())
}

#[test]
fn chain_balances_every_edge() -> Result<()> {
    let mut graph = Graph::new("chain");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 1);
    let c = graph.add_vertex("C", VertexKind::Normal, 1, 0);
    graph.connect(a, 0, 2, b, 0, 3)?;
    graph.connect(b, 0, 1, c, 0, 2)?;
    let brv = compute_brv(&graph, &no_params)?;
    assert_eq!(brv, vec![3, 2, 1]);
    for edge in graph.edges() {
        let produced = brv[edge.source.raw() as usize] as i64 * edge.source_rate.value(&no_params)?;
        let consumed = brv[edge.sink.raw() as usize] as i64 * edge.sink_rate.value(&no_params)?;
        assert_eq!(produced, consumed);
    }
    Ok(())
}

#[test]
fn inconsistent_rates_are_fatal() -> Result<()> {
    let mut graph = Graph::new("triangle");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 2);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 1);
    let c = graph.add_vertex("C", VertexKind::Normal, 2, 0);
    graph.connect(a, 0, 1, b, 0, 1)?;
    graph.connect(b, 0, 1, c, 0, 1)?;
    graph.connect(a, 1, 2, c, 1, 1)?;
    assert!(matches!(
        compute_brv(&graph, &no_params),
        Err(Error::PipelineInconsistent { .. })
    ));
    Ok(())
}

#[test]
fn zero_rate_disables_both_endpoints_and_cascades() -> Result<()> {
    let mut graph = Graph::new("zeros");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 1);
    let c = graph.add_vertex("C", VertexKind::Normal, 1, 0);
    graph.connect(a, 0, 0, b, 0, 1)?;
    graph.connect(b, 0, 1, c, 0, 1)?;
    let brv = compute_brv(&graph, &no_params)?;
    assert_eq!(brv, vec![0, 0, 0]);
    Ok(())
}

#[test]
fn config_actors_fire_once_per_graph_firing() -> Result<()> {
    let mut graph = Graph::new("with-config");
    let p = graph.add_param("p", ParamKind::Dynamic);
    graph.add_config("cfg", 0, 0, vec![p]);
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph.connect(a, 0, 4, b, 0, 2)?;
    let brv = compute_brv(&graph, &|_| Some(1))?;
    assert_eq!(brv, vec![1, 1, 2]);
    Ok(())
}

#[test]
fn interface_rates_scale_the_inner_level() -> Result<()> {
    let graph = hierarchical_graph();
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let top = root.firing(0);
    assert!(top.resolved());

    // the instance fires once; inside, the filter must consume the 4
    // interface tokens two tokens at a time
    let instance = graph
        .vertex_ids()
        .find(|id| matches!(graph.vertex(*id).kind, VertexKind::Graph(_)))
        .expect("subgraph instance");
    assert_eq!(top.repetitions(instance), 1);
    let child = top.child(instance).expect("child handler");
    let sub = child.graph();
    let filter = sub
        .vertex_ids()
        .find(|id| sub.vertex(*id).name == "filter")
        .expect("filter vertex");
    assert_eq!(child.firing(0).repetitions(filter), 2);
    Ok(())
}

#[test]
fn identical_resolution_is_bit_identical() -> Result<()> {
    let graph = tokenloom::testing::dynamic_rate_graph();
    let mut uids = UidPool::new();
    let mut root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    root.firing_mut(0).set_param(0, 3);
    root.firing_mut(0).resolve(&mut uids)?;
    let first = root.firing(0).brv().to_vec();

    root.clear();
    assert!(!root.firing(0).resolved());
    root.firing_mut(0).set_param(0, 3);
    root.firing_mut(0).resolve(&mut uids)?;
    assert_eq!(root.firing(0).brv(), first.as_slice());
    Ok(())
}
