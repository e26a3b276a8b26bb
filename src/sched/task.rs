//! The unit of scheduling.
//!
//! A task is one firing of something executable: either an SRDAG vertex
//! after expansion, or a (vertex, firing) pair scheduled directly against
//! the hierarchical graph. Both flavors share the same record; the
//! discriminant keeps the back-reference.

use crate::graph::VertexId;
use crate::sched::fifo::JobFifos;

/// Back-reference from a task to what it executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskRef {
    /// Vertex index in the expanded graph.
    Srdag(usize),
    /// Firing of a PiSDF vertex inside a firing scope.
    Firing {
        firing_uid: usize,
        vertex: VertexId,
        firing: u32,
    },
}

/// Dependency on an earlier task, remembered with the consuming port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecDependency {
    pub task: u32,
    pub port: u32,
}

/// One scheduled job.
#[derive(Clone, Debug)]
pub struct Task {
    pub reference: TaskRef,
    pub name: String,
    /// Index in the schedule's total order.
    pub ix: u32,
    /// Index in the mapped PE's timeline.
    pub job_ix: u32,
    pub mapped_pe: usize,
    pub start: u64,
    pub end: u64,
    pub exec_deps: Vec<ExecDependency>,
    pub kernel: Option<usize>,
    pub params: Vec<i64>,
    pub out_param_count: u32,
    pub fifos: JobFifos,
    /// Set when the no-sync allocator removed this copy task from dispatch.
    pub elided: bool,
}

impl Task {
    pub fn new(reference: TaskRef, name: String) -> Self {
        Task {
            reference,
            name,
            ix: 0,
            job_ix: 0,
            mapped_pe: 0,
            start: 0,
            end: 0,
            exec_deps: Vec::new(),
            kernel: None,
            params: Vec::new(),
            out_param_count: 0,
            fifos: JobFifos::default(),
            elided: false,
        }
    }
}
