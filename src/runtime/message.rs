//! Messages exchanged between the orchestrator and the runners.

use crate::sched::fifo::Fifo;
use serde::{Deserialize, Serialize};

/// A job the worker must see completed before running its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConstraint {
    pub runner_ix: usize,
    pub job_ix: u32,
}

/// What the runner executes for a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOp {
    /// Pure synchronization point; the data is already in place.
    None,
    /// Concatenate the input stream into the output windows.
    Copy,
    /// Cycle the input stream until the output windows are filled.
    Repeat,
    /// Run the kernel at this index in the platform's kernel table.
    Kernel(usize),
}

/// One job dispatched to a runner.
///
/// Input and output handles are grouped per port; a port covered by several
/// pieces is concatenated in order by the runner. An output port's first
/// piece receives the whole produced window, any extra piece receives the
/// window's suffix (delay write-back).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub constraints: Vec<JobConstraint>,
    pub inputs: Vec<Vec<Fifo>>,
    pub outputs: Vec<Vec<Fifo>>,
    pub op: JobOp,
    /// Index of this job in its runner's queue.
    pub job_ix: u32,
    /// Index of the task in the schedule.
    pub task_ix: u32,
    /// Parameter values handed to the kernel.
    pub params: Vec<i64>,
    /// Number of dynamic parameters the job must produce.
    pub out_param_count: u32,
}

/// Dynamic parameter values produced by a config actor's job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMessage {
    pub task_ix: u32,
    pub values: Vec<i64>,
}

/// Execution timestamps of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMessage {
    pub runner_ix: usize,
    pub task_ix: u32,
    pub start_ns: u64,
    pub end_ns: u64,
}

/// Orchestrator-to-runner control and job stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerMessage {
    Job(JobMessage),
    /// Reply with `Notification::Flushed` once every job so far is done.
    Flush,
    /// Drop pending jobs without executing them, then acknowledge.
    Reset,
    /// Terminate the runner loop.
    Stop,
}

/// Runner-to-orchestrator notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    Param(ParameterMessage),
    Trace(TraceMessage),
    Flushed { runner_ix: usize },
    ResetDone { runner_ix: usize },
    KernelError { runner_ix: usize, task_ix: u32, message: String },
}
