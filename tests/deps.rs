use anyhow::Result;
use tokenloom::deps::{DependencyIterator, DependencyKind, ScopeFrame};
use tokenloom::graph::{Graph, VertexKind};
use tokenloom::handler::{GraphHandler, UidPool};
use tokenloom::testing::{delayed_chain, hierarchical_graph, producer_consumer};

#[test]
fn straight_edge_maps_token_windows_to_source_firings() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let scope = [ScopeFrame {
        firing: root.firing(0),
        via: None,
    }];
    let b = graph.vertex_ids().nth(1).expect("vertex B");

    let deps: Vec<_> = DependencyIterator::for_port(&scope, b, 0, 0)?.collect();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].kind, DependencyKind::Task);
    assert_eq!((deps[0].firing_start, deps[0].firing_end), (0, 1));
    assert_eq!((deps[0].memory_start, deps[0].memory_end), (0, 0));
    assert_eq!(deps[0].token_count(), 3);

    let deps: Vec<_> = DependencyIterator::for_port(&scope, b, 1, 0)?.collect();
    assert_eq!((deps[0].firing_start, deps[0].firing_end), (1, 2));
    assert_eq!((deps[0].memory_start, deps[0].memory_end), (1, 1));
    assert_eq!(deps[0].token_count(), 3);
    Ok(())
}

#[test]
fn dependency_ranges_cover_the_whole_consumption() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let scope = [ScopeFrame {
        firing: root.firing(0),
        via: None,
    }];
    let b = graph.vertex_ids().nth(1).expect("vertex B");

    let mut covered = 0i64;
    for firing in 0..root.firing(0).repetitions(b) as u32 {
        for dep in DependencyIterator::for_vertex(&scope, b, firing)? {
            covered += dep.token_count();
        }
    }
    assert_eq!(covered, 6);
    Ok(())
}

#[test]
fn delay_serves_the_first_tokens() -> Result<()> {
    // rate 2 both sides, delay 1: firing 0 reads one delay token and one
    // fresh token
    let mut graph = Graph::new("delayed");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph.connect_delayed(a, 0, 2, b, 0, 2, 1, false)?;
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let scope = [ScopeFrame {
        firing: root.firing(0),
        via: None,
    }];

    let deps: Vec<_> = DependencyIterator::for_port(&scope, b, 0, 0)?.collect();
    assert_eq!(deps.len(), 2);
    assert_eq!(deps[0].kind, DependencyKind::Delay { persistent: false });
    assert_eq!((deps[0].memory_start, deps[0].memory_end), (0, 0));
    assert_eq!(deps[1].kind, DependencyKind::Task);
    assert_eq!((deps[1].firing_start, deps[1].firing_end), (0, 0));
    assert_eq!((deps[1].memory_start, deps[1].memory_end), (0, 0));
    Ok(())
}

#[test]
fn one_to_one_delay_reads_only_the_delay() -> Result<()> {
    let graph = delayed_chain(2, false);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let scope = [ScopeFrame {
        firing: root.firing(0),
        via: None,
    }];
    let b = graph.vertex_ids().nth(1).expect("vertex B");
    let deps: Vec<_> = DependencyIterator::for_port(&scope, b, 0, 0)?.collect();
    assert_eq!(deps.len(), 1);
    assert!(matches!(deps[0].kind, DependencyKind::Delay { persistent: false }));
    Ok(())
}

#[test]
fn iterator_is_restartable() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let scope = [ScopeFrame {
        firing: root.firing(0),
        via: None,
    }];
    let b = graph.vertex_ids().nth(1).expect("vertex B");
    let mut it = DependencyIterator::for_port(&scope, b, 0, 0)?;
    let first: Vec<_> = it.clone().collect();
    assert!(it.next().is_some());
    it.restart();
    let second: Vec<_> = it.collect();
    assert_eq!(first.len(), second.len());
    assert_eq!(first[0].firing_start, second[0].firing_start);
    Ok(())
}

#[test]
fn dependencies_traverse_hierarchy_both_ways() -> Result<()> {
    let graph = hierarchical_graph();
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let top = root.firing(0);
    let instance = graph
        .vertex_ids()
        .find(|id| matches!(graph.vertex(*id).kind, VertexKind::Graph(_)))
        .expect("subgraph instance");
    let child = top.child(instance).expect("child handler");
    let sub = child.graph();
    let filter = sub
        .vertex_ids()
        .find(|id| sub.vertex(*id).name == "filter")
        .expect("filter");

    // inward: the filter's tokens come from the top-level source
    let scope = [
        ScopeFrame { firing: top, via: None },
        ScopeFrame {
            firing: child.firing(0),
            via: Some((instance, 0)),
        },
    ];
    let deps: Vec<_> = DependencyIterator::for_port(&scope, filter, 0, 0)?.collect();
    assert_eq!(deps.len(), 1);
    let source = graph
        .vertex_ids()
        .find(|id| graph.vertex(*id).name == "source")
        .expect("source");
    assert_eq!(deps[0].vertex, source);
    assert_eq!((deps[0].memory_start, deps[0].memory_end), (0, 1));

    // outward: the top-level sink depends on the filter inside the subgraph
    let sink = graph
        .vertex_ids()
        .find(|id| graph.vertex(*id).name == "sink")
        .expect("sink");
    let top_scope = [ScopeFrame { firing: top, via: None }];
    let deps: Vec<_> = DependencyIterator::for_port(&top_scope, sink, 0, 0)?.collect();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].vertex, filter);
    assert_eq!((deps[0].firing_start, deps[0].firing_end), (0, 1));
    Ok(())
}
