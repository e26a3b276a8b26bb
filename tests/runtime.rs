use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokenloom::graph::VertexKind;
use tokenloom::runtime::{KernelTable, RtPlatform, Runtime, RunnerMessage};
use tokenloom::testing::{dynamic_rate_graph, producer_consumer, test_platform, MockCommunicator};
use tokenloom::{Error, Graph, RuntimeConfig, RuntimeKind};

type Collected = Arc<Mutex<Vec<Vec<u8>>>>;

fn instrumented_graph(kernels: &mut KernelTable, collected: &Collected) -> Graph {
    let produce = kernels.register(Arc::new(
        |_p: &[i64], _o: &mut [i64], _i: &[Vec<u8>], outputs: &mut [Vec<u8>]| {
            outputs[0].fill(7);
            Ok(())
        },
    ));
    let sink = collected.clone();
    let consume = kernels.register(Arc::new(
        move |_p: &[i64], _o: &mut [i64], inputs: &[Vec<u8>], _out: &mut [Vec<u8>]| {
            sink.lock().expect("collector lock").push(inputs[0].clone());
            Ok(())
        },
    ));
    let mut graph = producer_consumer(2, 3);
    let a = graph.vertex_ids().next().expect("A");
    let b = graph.vertex_ids().nth(1).expect("B");
    graph.set_kernel(a, produce);
    graph.set_kernel(b, consume);
    graph
}

#[test]
fn static_runtime_moves_tokens_through_adapters() -> Result<()> {
    let platform = test_platform(2);
    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let mut kernels = KernelTable::new();
    let graph = instrumented_graph(&mut kernels, &collected);

    let rt = RtPlatform::start(&platform, kernels, false);
    let config = RuntimeConfig {
        runtime_kind: RuntimeKind::Static,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(&graph, &platform, rt.communicator(), config);
    runtime.execute()?;

    let received = collected.lock().expect("collector lock").clone();
    assert_eq!(received.len(), 2);
    for window in &received {
        assert_eq!(window.as_slice(), &[7u8; 3]);
    }

    // a second iteration reuses the same schedule and fifos
    runtime.execute()?;
    assert_eq!(collected.lock().expect("collector lock").len(), 4);
    assert_eq!(runtime.iteration(), 2);
    Ok(())
}

#[test]
fn srless_runtime_produces_the_same_windows() -> Result<()> {
    let platform = test_platform(2);
    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let mut kernels = KernelTable::new();
    let graph = instrumented_graph(&mut kernels, &collected);

    let rt = RtPlatform::start(&platform, kernels, false);
    let config = RuntimeConfig {
        runtime_kind: RuntimeKind::JitSrless,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(&graph, &platform, rt.communicator(), config);
    runtime.execute()?;

    let received = collected.lock().expect("collector lock").clone();
    assert_eq!(received.len(), 2);
    for window in &received {
        assert_eq!(window.as_slice(), &[7u8; 3]);
    }
    Ok(())
}

#[test]
fn jobs_reach_each_runner_in_schedule_order() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let platform = test_platform(2);
    let mock = Arc::new(MockCommunicator::new(2));
    let config = RuntimeConfig {
        runtime_kind: RuntimeKind::FastJit,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(&graph, &platform, mock.clone(), config);
    runtime.execute()?;

    let mut total = 0;
    for runner in 0..2 {
        for (pos, job) in mock.jobs_for(runner).iter().enumerate() {
            assert_eq!(job.job_ix, pos as u32);
            total += 1;
        }
    }
    assert_eq!(total, 8); // 3 A + 2 B + 1 fork + 2 joins
    Ok(())
}

#[test]
fn cross_pe_dependencies_become_job_constraints() -> Result<()> {
    let mut graph = Graph::new("pinned");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph.connect(a, 0, 4, b, 0, 4)?;
    graph.set_allowed_pes(a, vec![0]);
    graph.set_allowed_pes(b, vec![1]);

    let platform = test_platform(2);
    let mock = Arc::new(MockCommunicator::new(2));
    let mut runtime = Runtime::new(&graph, &platform, mock.clone(), RuntimeConfig::default());
    runtime.execute()?;

    let jobs_b = mock.jobs_for(1);
    assert_eq!(jobs_b.len(), 1);
    assert_eq!(jobs_b[0].constraints.len(), 1);
    assert_eq!(jobs_b[0].constraints[0].runner_ix, 0);
    assert_eq!(jobs_b[0].constraints[0].job_ix, 0);
    Ok(())
}

#[test]
fn dynamic_parameter_gates_resolution() -> Result<()> {
    let graph = dynamic_rate_graph();
    let platform = test_platform(2);
    let mock = Arc::new(MockCommunicator::with_responder(2, Box::new(|_| vec![4])));
    let mut runtime = Runtime::new(&graph, &platform, mock.clone(), RuntimeConfig::default());
    runtime.execute()?;

    let jobs: usize = (0..2)
        .map(|runner| mock.jobs_for(runner).len())
        .sum();
    // one config job, then A, four B copies and the fork between them
    assert_eq!(jobs, 7);
    Ok(())
}

#[test]
fn zero_valued_parameter_disables_the_subchain() -> Result<()> {
    let graph = dynamic_rate_graph();
    let platform = test_platform(2);
    let mock = Arc::new(MockCommunicator::with_responder(2, Box::new(|_| vec![0])));
    let mut runtime = Runtime::new(&graph, &platform, mock.clone(), RuntimeConfig::default());
    runtime.execute()?;

    let jobs: usize = (0..2)
        .map(|runner| mock.jobs_for(runner).len())
        .sum();
    // the config actor ran, nothing else was schedulable
    assert_eq!(jobs, 1);
    Ok(())
}

#[test]
fn missing_config_actor_is_param_not_ready() -> Result<()> {
    let mut graph = Graph::new("orphan-dynamic");
    let p = graph.add_param("p", tokenloom::ParamKind::Dynamic);
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph.connect(
        a,
        0,
        tokenloom::Expression::Dynamic(vec![tokenloom::ExprToken::Param(p)]),
        b,
        0,
        1,
    )?;

    let platform = test_platform(2);
    let mock = Arc::new(MockCommunicator::new(2));
    let mut runtime = Runtime::new(&graph, &platform, mock, RuntimeConfig::default());
    assert!(matches!(runtime.execute(), Err(Error::ParamNotReady { .. })));
    Ok(())
}

#[test]
fn kernel_failure_aborts_and_resets_runners() -> Result<()> {
    let platform = test_platform(2);
    let mut kernels = KernelTable::new();
    let failing = kernels.register(Arc::new(
        |_p: &[i64], _o: &mut [i64], _i: &[Vec<u8>], _out: &mut [Vec<u8>]| Err("boom".to_string()),
    ));
    let mut graph = Graph::new("failing");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph.connect(a, 0, 1, b, 0, 1)?;
    graph.set_kernel(a, failing);

    let rt = RtPlatform::start(&platform, kernels, false);
    let config = RuntimeConfig {
        runtime_kind: RuntimeKind::Static,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(&graph, &platform, rt.communicator(), config);
    assert!(matches!(runtime.execute(), Err(Error::KernelFailure { .. })));
    Ok(())
}

#[test]
fn static_runtime_rejects_dynamic_graphs() -> Result<()> {
    let graph = dynamic_rate_graph();
    let platform = test_platform(2);
    let mock = Arc::new(MockCommunicator::new(2));
    let config = RuntimeConfig {
        runtime_kind: RuntimeKind::Static,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(&graph, &platform, mock, config);
    assert!(matches!(
        runtime.execute(),
        Err(Error::PipelineInconsistent { .. })
    ));
    Ok(())
}

#[test]
fn traces_are_collected_when_enabled() -> Result<()> {
    let platform = test_platform(2);
    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let mut kernels = KernelTable::new();
    let graph = instrumented_graph(&mut kernels, &collected);

    let rt = RtPlatform::start(&platform, kernels, true);
    let config = RuntimeConfig {
        runtime_kind: RuntimeKind::Static,
        trace: true,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(&graph, &platform, rt.communicator(), config);
    runtime.execute()?;

    let traces = runtime.take_traces();
    assert_eq!(traces.len(), 8); // one per dispatched job
    for trace in &traces {
        assert!(trace.end_ns >= trace.start_ns);
    }
    assert!(runtime.take_traces().is_empty());
    Ok(())
}

#[test]
fn reset_messages_follow_an_aborted_iteration() -> Result<()> {
    let graph = dynamic_rate_graph();
    let platform = test_platform(2);
    // no responder: the config job never answers, so the round errors out
    let mock = Arc::new(MockCommunicator::new(2));
    let mut runtime = Runtime::new(&graph, &platform, mock.clone(), RuntimeConfig::default());
    assert!(runtime.execute().is_err());

    let resets = mock
        .sent()
        .iter()
        .filter(|(_, m)| matches!(m, RunnerMessage::Reset))
        .count();
    assert_eq!(resets, 2);
    Ok(())
}
