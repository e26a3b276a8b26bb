use anyhow::Result;
use tokenloom::archi::MemoryInterface;
use tokenloom::graph::VertexKind;
use tokenloom::handler::{GraphHandler, UidPool};
use tokenloom::sched::{
    FifoAllocator, FifoAllocatorKind, FifoAttribute, Schedule, Scheduler, SchedulingPolicy,
    TaskFilter, TaskRef,
};
use tokenloom::srdag::expand;
use tokenloom::testing::{delayed_chain, producer_consumer, test_platform};

#[test]
fn virtual_addresses_are_monotonic_until_cleared() {
    let mut allocator = FifoAllocator::new(FifoAllocatorKind::SrdagDefault);
    let a = allocator.allocate(64);
    let b = allocator.allocate(16);
    assert_eq!(a, 0);
    assert_eq!(b, 64);
    assert_eq!(allocator.cursor(), 80);
    allocator.clear();
    assert_eq!(allocator.cursor(), 0);
}

#[test]
fn persistent_delay_survives_clear() -> Result<()> {
    let graph = delayed_chain(1024, true);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let platform = test_platform(2);
    let mut allocator = FifoAllocator::new(FifoAllocatorKind::SrdagDefault);
    allocator.allocate_persistent_delays(&root, &platform)?;

    assert_eq!(allocator.reserved(), 1024);
    let edge = graph.edge_ids().next().expect("delayed edge");
    let address = allocator
        .persistent_address(root.firing(0).uid(), edge)
        .expect("reserved address");
    assert_eq!(address, 0);

    // zero-initialized through the GRT memory interface
    let bytes = platform.grt_memory().read(address, 0, 1024);
    assert!(bytes.iter().all(|&b| b == 0));

    // per-iteration allocations land above the watermark and clear()
    // rewinds to it, never below
    let buffer = allocator.allocate(100);
    assert_eq!(buffer, 1024);
    allocator.clear();
    assert_eq!(allocator.cursor(), 1024);

    // a second reservation pass is a no-op
    allocator.allocate_persistent_delays(&root, &platform)?;
    assert_eq!(allocator.reserved(), 1024);
    Ok(())
}

#[test]
fn fork_outputs_alias_their_input_with_offsets() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let srdag = expand(&root)?;
    let platform = test_platform(2);
    let mut schedule = Schedule::new(2);
    Scheduler::new(SchedulingPolicy::ListBestFit)
        .schedule_srdag(&srdag, &platform, &mut schedule, TaskFilter::All)?;
    let mut allocator = FifoAllocator::new(FifoAllocatorKind::SrdagDefault);
    allocator.allocate_srdag(&srdag, &platform, &mut schedule)?;

    let fork_task = schedule
        .tasks()
        .iter()
        .find(|t| matches!(t.reference, TaskRef::Srdag(v) if srdag.vertex(v).kind == VertexKind::Fork))
        .expect("fork task");
    let input = fork_task.fifos.inputs[0][0];
    assert_eq!(input.size, 2);
    let out0 = fork_task.fifos.outputs[0][0];
    let out1 = fork_task.fifos.outputs[1][0];
    assert_eq!(out0.address, input.address);
    assert_eq!(out1.address, input.address);
    assert_eq!(out0.offset, input.offset);
    assert_eq!(out1.offset, input.offset + out0.size);
    assert_eq!(out0.attribute, FifoAttribute::RwOnly);
    Ok(())
}

#[test]
fn fresh_buffers_are_owned_and_distinct() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let srdag = expand(&root)?;
    let platform = test_platform(2);
    let mut schedule = Schedule::new(2);
    Scheduler::new(SchedulingPolicy::ListBestFit)
        .schedule_srdag(&srdag, &platform, &mut schedule, TaskFilter::All)?;
    let mut allocator = FifoAllocator::new(FifoAllocatorKind::SrdagDefault);
    allocator.allocate_srdag(&srdag, &platform, &mut schedule)?;

    let mut owned = Vec::new();
    for task in schedule.tasks() {
        let TaskRef::Srdag(v) = task.reference else { continue };
        if srdag.vertex(v).name.starts_with("A:") {
            let fifo = task.fifos.outputs[0][0];
            assert_eq!(fifo.attribute, FifoAttribute::RwOwn);
            assert_eq!(fifo.size, 2);
            owned.push(fifo.address);
        }
    }
    owned.sort_unstable();
    owned.dedup();
    assert_eq!(owned.len(), 3);
    Ok(())
}

#[test]
fn no_sync_allocation_elides_same_cluster_forks() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let srdag = expand(&root)?;
    let platform = test_platform(2); // single cluster: every elision is legal
    let mut schedule = Schedule::new(2);
    Scheduler::new(SchedulingPolicy::ListBestFit)
        .schedule_srdag(&srdag, &platform, &mut schedule, TaskFilter::All)?;
    let mut allocator = FifoAllocator::new(FifoAllocatorKind::DefaultNoSync);
    allocator.allocate_srdag(&srdag, &platform, &mut schedule)?;

    let fork_task = schedule
        .tasks()
        .iter()
        .find(|t| matches!(t.reference, TaskRef::Srdag(v) if srdag.vertex(v).kind == VertexKind::Fork))
        .expect("fork task");
    assert!(fork_task.elided);

    // consumers were rewired to wait on the fork's producer instead
    for task in schedule.tasks() {
        for dep in &task.exec_deps {
            assert_ne!(dep.task, fork_task.ix, "dependency on an elided task survived");
        }
    }
    Ok(())
}

#[test]
fn srless_allocation_slices_producer_windows() -> Result<()> {
    let graph = producer_consumer(2, 3);
    let mut uids = UidPool::new();
    let root = GraphHandler::new(&graph, &[], 1, &mut uids)?;
    let platform = test_platform(2);
    let mut schedule = Schedule::new(2);
    let (firings, meta) = Scheduler::new(SchedulingPolicy::SrlessListBestFit).schedule_srless(
        &root,
        &platform,
        &mut schedule,
        TaskFilter::All,
    )?;
    let mut allocator = FifoAllocator::new(FifoAllocatorKind::Default);
    allocator.allocate_srless(&firings, &mut schedule, &meta)?;

    for task in schedule.tasks() {
        if task.name.starts_with("B") {
            let pieces = &task.fifos.inputs[0];
            let total: u32 = pieces.iter().map(|f| f.size).sum();
            assert_eq!(total, 3);
            assert!(pieces.iter().all(|f| f.attribute == FifoAttribute::RwOnly));
        }
        if task.name.starts_with("A") {
            assert_eq!(task.fifos.outputs[0][0].size, 2);
            assert_eq!(task.fifos.outputs[0][0].attribute, FifoAttribute::RwOwn);
        }
    }
    Ok(())
}
