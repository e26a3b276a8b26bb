//! The outer execution loop.
//!
//! One [`Runtime`] drives one application graph on one platform. Every
//! iteration walks the same phases: resolve parameters, transform, schedule,
//! allocate, dispatch, complete. The static runtime performs the first four
//! once at setup; the JIT runtimes redo them every iteration; the
//! single-rate-less runtime skips expansion entirely and schedules firings
//! straight off the handler tree.
//!
//! Dynamic graphs add a resolution loop: config-actor jobs are dispatched
//! first, the orchestrator blocks on their parameter messages, newly
//! resolved subtrees expose their own config actors, and the loop repeats
//! until the whole tree is resolved. Any core error aborts the iteration:
//! runners are reset, queues drained, and the error surfaces to the caller.

use crate::archi::Platform;
use crate::config::{ExecutionPolicy, RuntimeConfig, RuntimeKind};
use crate::error::{Error, Result};
use crate::graph::{Graph, VertexKind};
use crate::handler::{GraphHandler, UidPool};
use crate::runtime::comm::Communicator;
use crate::runtime::message::{JobConstraint, JobMessage, JobOp, Notification, RunnerMessage, TraceMessage};
use crate::sched::fifo::FifoAllocator;
use crate::sched::schedule::Schedule;
use crate::sched::scheduler::{Scheduler, TaskFilter};
use crate::sched::task::TaskRef;
use crate::srdag::{self, SrdagGraph, optims};
use std::collections::HashMap;
use std::sync::Arc;

/// Phase of the per-iteration state machine, exposed for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Resolving,
    Transforming,
    Scheduling,
    Allocating,
    Dispatching,
    AwaitingParams,
    Completing,
}

/// The orchestrator.
pub struct Runtime<'g> {
    graph: &'g Graph,
    platform: &'g Platform,
    config: RuntimeConfig,
    communicator: Arc<dyn Communicator>,
    scheduler: Scheduler,
    allocator: FifoAllocator,
    schedule: Schedule,
    root: Option<GraphHandler<'g>>,
    uids: UidPool,
    srdag: Option<SrdagGraph>,
    traces: Vec<TraceMessage>,
    phase: Phase,
    iter: u64,
    setup_done: bool,
}

impl<'g> Runtime<'g> {
    pub fn new(
        graph: &'g Graph,
        platform: &'g Platform,
        communicator: Arc<dyn Communicator>,
        config: RuntimeConfig,
    ) -> Self {
        let config = config.normalized();
        Runtime {
            graph,
            platform,
            scheduler: Scheduler::new(config.scheduling_policy),
            allocator: FifoAllocator::new(config.fifo_allocator),
            schedule: Schedule::new(platform.pe_count()),
            communicator,
            config,
            root: None,
            uids: UidPool::new(),
            srdag: None,
            traces: Vec::new(),
            phase: Phase::Idle,
            iter: 0,
            setup_done: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> u64 {
        self.iter
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn srdag(&self) -> Option<&SrdagGraph> {
        self.srdag.as_ref()
    }

    /// Trace messages collected since the last call.
    pub fn take_traces(&mut self) -> Vec<TraceMessage> {
        std::mem::take(&mut self.traces)
    }

    /// Run one iteration of the application.
    pub fn execute(&mut self) -> Result<()> {
        self.communicator.begin_iteration();
        let result = match self.config.runtime_kind {
            RuntimeKind::Static => self.static_execute(),
            RuntimeKind::FastJit => self.fastjit_execute(),
            RuntimeKind::JitSrless => self.srless_execute(),
        };
        match result {
            Ok(()) => {
                self.phase = Phase::Idle;
                self.iter += 1;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, iteration = self.iter, "iteration aborted");
                self.abort();
                self.phase = Phase::Idle;
                Err(err)
            }
        }
    }

    /* === Static === */

    fn static_execute(&mut self) -> Result<()> {
        if !self.setup_done {
            if !self.graph.fully_static() {
                return Err(Error::PipelineInconsistent {
                    graph: self.graph.name.clone(),
                    reason: "static runtime requires a fully static graph".into(),
                });
            }
            self.phase = Phase::Resolving;
            let root = GraphHandler::new(self.graph, &[], 1, &mut self.uids)?;
            self.allocator.allocate_persistent_delays(&root, self.platform)?;
            self.phase = Phase::Transforming;
            let mut srdag = srdag::expand(&root)?;
            optims::optimize(&mut srdag)?;
            self.phase = Phase::Scheduling;
            self.scheduler
                .schedule_srdag(&srdag, self.platform, &mut self.schedule, TaskFilter::All)?;
            self.phase = Phase::Allocating;
            self.allocator
                .allocate_srdag(&srdag, self.platform, &mut self.schedule)?;
            self.root = Some(root);
            self.srdag = Some(srdag);
            self.setup_done = true;
        }
        self.phase = Phase::Dispatching;
        self.dispatch()?;
        self.phase = Phase::Completing;
        self.await_flush()
    }

    /* === SRDAG JIT === */

    fn fastjit_execute(&mut self) -> Result<()> {
        self.phase = Phase::Resolving;
        self.prepare_tree()?;
        self.resolve_dynamics()?;
        let root = self.root.as_ref().expect("tree prepared");
        self.phase = Phase::Transforming;
        let mut srdag = srdag::expand(root)?;
        optims::optimize(&mut srdag)?;
        self.phase = Phase::Scheduling;
        self.schedule.clear();
        self.allocator.clear();
        let filter = if self.graph.fully_static() {
            TaskFilter::All
        } else {
            TaskFilter::SkipConfigs
        };
        self.scheduler
            .schedule_srdag(&srdag, self.platform, &mut self.schedule, filter)?;
        self.phase = Phase::Allocating;
        self.allocator
            .allocate_srdag(&srdag, self.platform, &mut self.schedule)?;
        self.srdag = Some(srdag);
        self.phase = Phase::Dispatching;
        self.dispatch()?;
        self.phase = Phase::Completing;
        self.await_flush()
    }

    /* === Single-rate-less JIT === */

    fn srless_execute(&mut self) -> Result<()> {
        self.phase = Phase::Resolving;
        self.prepare_tree()?;
        self.resolve_dynamics()?;
        self.phase = Phase::Scheduling;
        self.schedule.clear();
        self.allocator.clear();
        let filter = if self.graph.fully_static() {
            TaskFilter::All
        } else {
            TaskFilter::SkipConfigs
        };
        let root = self.root.as_ref().expect("tree prepared");
        let (firings, meta) =
            self.scheduler
                .schedule_srless(root, self.platform, &mut self.schedule, filter)?;
        self.phase = Phase::Allocating;
        self.allocator
            .allocate_srless(&firings, &mut self.schedule, &meta)?;
        drop(firings);
        self.phase = Phase::Dispatching;
        self.dispatch()?;
        self.phase = Phase::Completing;
        self.await_flush()
    }

    /* === Shared machinery === */

    fn prepare_tree(&mut self) -> Result<()> {
        match self.root.as_mut() {
            None => {
                self.root = Some(GraphHandler::new(self.graph, &[], 1, &mut self.uids)?);
            }
            Some(root) => root.clear(),
        }
        Ok(())
    }

    /// Resolve the whole tree, dispatching config-actor jobs round by round
    /// until every dynamic parameter has arrived.
    fn resolve_dynamics(&mut self) -> Result<()> {
        loop {
            let root = self.root.as_mut().expect("tree prepared");
            resolve_ready(root, &mut self.uids)?;
            let root = self.root.as_ref().expect("tree prepared");
            self.allocator.allocate_persistent_delays(root, self.platform)?;
            if root.fully_resolved() {
                return Ok(());
            }

            // one round of config jobs for the still-pending levels
            let mut cfg_schedule = Schedule::new(self.platform.pe_count());
            let (firings, meta) = self.scheduler.schedule_srless(
                root,
                self.platform,
                &mut cfg_schedule,
                TaskFilter::ConfigsOnly,
            )?;
            if cfg_schedule.task_count() == 0 {
                return Err(Error::ParamNotReady {
                    param: format!("unresolved parameters of `{}` have no config actor", self.graph.name),
                });
            }
            self.allocator
                .allocate_srless(&firings, &mut cfg_schedule, &meta)?;
            drop(firings);
            self.dispatch_tasks(&cfg_schedule)?;

            self.phase = Phase::AwaitingParams;
            let mut awaited: Vec<u32> = cfg_schedule.tasks().iter().map(|t| t.ix).collect();
            while !awaited.is_empty() {
                match self.communicator.recv_notification()? {
                    Notification::Param(msg) => {
                        let Some(at) = awaited.iter().position(|&ix| ix == msg.task_ix) else {
                            continue;
                        };
                        awaited.swap_remove(at);
                        let TaskRef::Firing { firing_uid, vertex, .. } =
                            cfg_schedule.task(msg.task_ix).reference
                        else {
                            continue;
                        };
                        let root = self.root.as_mut().expect("tree prepared");
                        let firing = root.firing_by_uid_mut(firing_uid).ok_or_else(|| {
                            Error::Transport(format!("parameter message for unknown firing {firing_uid}"))
                        })?;
                        let setters = firing.graph().vertex(vertex).config_params.clone();
                        for (param_ix, value) in setters.into_iter().zip(&msg.values) {
                            firing.set_param(param_ix, *value);
                        }
                    }
                    Notification::Trace(t) => self.traces.push(t),
                    Notification::Flushed { .. } | Notification::ResetDone { .. } => {}
                    Notification::KernelError {
                        runner_ix,
                        task_ix,
                        message,
                    } => {
                        return Err(Error::KernelFailure {
                            runner: runner_ix,
                            task_ix,
                            message,
                        });
                    }
                }
            }
            self.phase = Phase::Resolving;
        }
    }

    fn job_op(&self, task_ix: u32, schedule: &Schedule) -> JobOp {
        let task = schedule.task(task_ix);
        match task.reference {
            TaskRef::Srdag(v) => {
                let vertex = self.srdag.as_ref().map(|s| s.vertex(v));
                match vertex.map(|vx| vx.kind) {
                    Some(VertexKind::Fork | VertexKind::Duplicate | VertexKind::Head | VertexKind::Tail) => {
                        JobOp::None
                    }
                    Some(VertexKind::Join) => JobOp::Copy,
                    Some(VertexKind::Repeat) => JobOp::Repeat,
                    Some(VertexKind::Init) => {
                        if vertex.is_some_and(|vx| vx.input_count() > 0) {
                            JobOp::Copy
                        } else {
                            JobOp::None
                        }
                    }
                    Some(VertexKind::End) => {
                        if task.fifos.outputs.iter().any(|p| !p.is_empty()) {
                            JobOp::Copy
                        } else {
                            JobOp::None
                        }
                    }
                    _ => task.kernel.map_or(JobOp::None, JobOp::Kernel),
                }
            }
            TaskRef::Firing { .. } => task.kernel.map_or(JobOp::None, JobOp::Kernel),
        }
    }

    fn dispatch(&mut self) -> Result<()> {
        let schedule = std::mem::replace(&mut self.schedule, Schedule::new(self.platform.pe_count()));
        let result = self.dispatch_tasks(&schedule);
        self.schedule = schedule;
        result
    }

    /// Build and send one job message per non-elided task, in schedule
    /// order. Jobs to a given runner are never reordered.
    fn dispatch_tasks(&self, schedule: &Schedule) -> Result<()> {
        let mut per_pe = vec![0u32; self.platform.pe_count()];
        let mut job_ix_of = vec![0u32; schedule.task_count()];
        let mut delayed: Vec<(usize, JobMessage)> = Vec::new();
        for task in schedule.tasks() {
            if task.elided {
                continue;
            }
            let job_ix = per_pe[task.mapped_pe];
            per_pe[task.mapped_pe] += 1;
            job_ix_of[task.ix as usize] = job_ix;

            // one constraint per predecessor PE: the highest job to wait for
            let mut waits: HashMap<usize, u32> = HashMap::new();
            for dep in &task.exec_deps {
                let pred = schedule.task(dep.task);
                if pred.elided || pred.mapped_pe == task.mapped_pe {
                    continue;
                }
                let entry = waits.entry(pred.mapped_pe).or_insert(0);
                *entry = (*entry).max(job_ix_of[pred.ix as usize]);
            }
            let mut constraints: Vec<JobConstraint> = waits
                .into_iter()
                .map(|(runner_ix, job_ix)| JobConstraint { runner_ix, job_ix })
                .collect();
            constraints.sort_by_key(|c| c.runner_ix);

            let msg = JobMessage {
                constraints,
                inputs: task.fifos.inputs.clone(),
                outputs: task.fifos.outputs.clone(),
                op: self.job_op(task.ix, schedule),
                job_ix,
                task_ix: task.ix,
                params: task.params.clone(),
                out_param_count: task.out_param_count,
            };
            match self.config.execution_policy {
                ExecutionPolicy::JitSend => self.communicator.send_job(task.mapped_pe, msg)?,
                ExecutionPolicy::Delayed => delayed.push((task.mapped_pe, msg)),
            }
        }
        for (pe, msg) in delayed {
            self.communicator.send_job(pe, msg)?;
        }
        Ok(())
    }

    /// Ask every runner to drain its queue and wait for the
    /// acknowledgements, folding in notifications that arrive meanwhile.
    fn await_flush(&mut self) -> Result<()> {
        for ix in 0..self.communicator.runner_count() {
            self.communicator.send(ix, RunnerMessage::Flush)?;
        }
        let mut pending = self.communicator.runner_count();
        while pending > 0 {
            match self.communicator.recv_notification()? {
                Notification::Flushed { .. } => pending -= 1,
                Notification::Trace(t) => self.traces.push(t),
                Notification::Param(_) | Notification::ResetDone { .. } => {}
                Notification::KernelError {
                    runner_ix,
                    task_ix,
                    message,
                } => {
                    return Err(Error::KernelFailure {
                        runner: runner_ix,
                        task_ix,
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// Reset every runner and drain the acknowledgements. Best effort: a
    /// dead transport cannot be reset any further.
    fn abort(&mut self) {
        let n = self.communicator.runner_count();
        for ix in 0..n {
            let _ = self.communicator.send(ix, RunnerMessage::Reset);
        }
        let mut pending = n;
        while pending > 0 {
            match self.communicator.recv_notification() {
                Ok(Notification::ResetDone { .. }) => pending -= 1,
                Ok(Notification::Trace(t)) => self.traces.push(t),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
}

/// Resolve every pending firing whose parameters are all available.
fn resolve_ready(handler: &mut GraphHandler<'_>, uids: &mut UidPool) -> Result<bool> {
    let mut changed = false;
    for k in 0..handler.firings().len() as u32 {
        {
            let firing = handler.firing_mut(k);
            if !firing.resolved() && firing.params_ready() {
                firing.resolve(uids)?;
                changed = true;
            }
        }
        for child in handler.firing_mut(k).children_mut() {
            changed |= resolve_ready(child, uids)?;
        }
    }
    Ok(changed)
}
