use anyhow::Result;
use tokenloom::config::{RuntimeConfig, RuntimeKind};
use tokenloom::graph::{Graph, ParamKind, VertexKind};
use tokenloom::sched::{FifoAllocatorKind, SchedulingPolicy};
use tokenloom::Error;

#[test]
fn wrong_side_interface_connections_are_rejected() -> Result<()> {
    let mut graph = Graph::new("iface");
    let input = graph.add_input_interface("in");
    let output = graph.add_output_interface("out");
    let v = graph.add_vertex("v", VertexKind::Normal, 1, 1);

    // an input interface cannot consume, an output interface cannot produce
    assert!(matches!(
        graph.connect(v, 0, 1, input, 0, 1),
        Err(Error::InterfaceMisconnected { .. })
    ));
    assert!(matches!(
        graph.connect(output, 0, 1, v, 0, 1),
        Err(Error::InterfaceMisconnected { .. })
    ));

    graph.connect(input, 0, 1, v, 0, 1)?;
    graph.connect(v, 0, 1, output, 0, 1)?;
    Ok(())
}

#[test]
fn subgraph_ports_mirror_interface_order() {
    let mut sub = Graph::new("sub");
    sub.add_input_interface("x");
    sub.add_input_interface("y");
    sub.add_output_interface("z");
    let mut graph = Graph::new("top");
    let instance = graph.add_subgraph(sub);
    let vertex = graph.vertex(instance);
    assert_eq!(vertex.input_count(), 2);
    assert_eq!(vertex.output_count(), 1);
    assert!(matches!(vertex.kind, VertexKind::Graph(0)));
}

#[test]
fn static_flags_follow_the_hierarchy() {
    let mut sub = Graph::new("sub");
    let p = sub.add_param("p", ParamKind::Dynamic);
    sub.add_config("cfg", 0, 0, vec![p]);
    let mut graph = Graph::new("top");
    assert!(graph.fully_static());
    graph.add_subgraph(sub);
    assert!(!graph.fully_static());
    assert!(!graph.has_dynamic_params());
}

#[test]
fn inherited_parameters_alias_the_parent_scope() -> Result<()> {
    use tokenloom::handler::{GraphHandler, UidPool};

    let mut sub = Graph::new("sub");
    let inherited = sub.add_param("n", ParamKind::Inherited(0));
    let a = sub.add_vertex("a", VertexKind::Normal, 0, 1);
    let b = sub.add_vertex("b", VertexKind::Normal, 1, 0);
    sub.connect(
        a,
        0,
        tokenloom::Expression::Dynamic(vec![tokenloom::ExprToken::Param(inherited)]),
        b,
        0,
        1,
    )?;

    let mut graph = Graph::new("top");
    graph.add_param(
        "n",
        ParamKind::Static(tokenloom::Expression::Value(3)),
    );
    graph.add_subgraph(sub);

    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let instance = graph.vertex_ids().next().expect("instance");
    let child = root.firing(0).child(instance).expect("child");
    assert_eq!(child.firing(0).param_value(0)?, 3);
    assert_eq!(child.firing(0).repetitions(a), 1);
    assert_eq!(child.firing(0).repetitions(b), 3);
    Ok(())
}

#[test]
fn config_normalization_aligns_dependent_choices() {
    let srless = RuntimeConfig {
        runtime_kind: RuntimeKind::JitSrless,
        scheduling_policy: SchedulingPolicy::List,
        fifo_allocator: FifoAllocatorKind::SrdagDefault,
        ..RuntimeConfig::default()
    }
    .normalized();
    assert_eq!(srless.scheduling_policy, SchedulingPolicy::SrlessListBestFit);
    assert_eq!(srless.fifo_allocator, FifoAllocatorKind::Default);

    let srdag = RuntimeConfig {
        runtime_kind: RuntimeKind::FastJit,
        scheduling_policy: SchedulingPolicy::SrlessListBestFit,
        ..RuntimeConfig::default()
    }
    .normalized();
    assert_eq!(srdag.scheduling_policy, SchedulingPolicy::ListBestFit);
    assert_eq!(srdag.fifo_allocator, FifoAllocatorKind::SrdagDefault);
}

#[test]
fn config_round_trips_through_json() -> Result<()> {
    let config = RuntimeConfig::default();
    let text = serde_json::to_string(&config)?;
    let back: RuntimeConfig = serde_json::from_str(&text)?;
    assert_eq!(back.runtime_kind, config.runtime_kind);
    assert_eq!(back.scheduling_policy, config.scheduling_policy);
    Ok(())
}
