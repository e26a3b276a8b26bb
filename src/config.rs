//! Runtime configuration.

use crate::memory::{AllocatorKind, StackId};
use crate::sched::fifo::FifoAllocatorKind;
use crate::sched::scheduler::SchedulingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outer-loop flavour of the runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeKind {
    /// One transformation at setup, many identical iterations.
    Static,
    /// Re-expand and re-schedule the single-rate graph every iteration.
    #[default]
    FastJit,
    /// Schedule firings directly against the hierarchical graph, resolving
    /// the repetition vector as parameters arrive.
    JitSrless,
}

/// How to pick a PE for each task. Best fit is the only mapping policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingPolicy {
    #[default]
    BestFit,
}

/// When job messages leave the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// Build every message, then send them in schedule order.
    #[default]
    Delayed,
    /// Send each message as soon as it is built.
    JitSend,
}

/// Everything the runtime accepts as configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub runtime_kind: RuntimeKind,
    pub scheduling_policy: SchedulingPolicy,
    pub mapping_policy: MappingPolicy,
    pub execution_policy: ExecutionPolicy,
    pub fifo_allocator: FifoAllocatorKind,
    /// Allocation policy per memory stack; unlisted stacks use the generic
    /// policy.
    pub stacks: HashMap<StackId, AllocatorKind>,
    /// Ask runners for per-job trace messages.
    pub trace: bool,
    /// Hint for the embedding application's log subscriber.
    pub log_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            runtime_kind: RuntimeKind::default(),
            scheduling_policy: SchedulingPolicy::default(),
            mapping_policy: MappingPolicy::default(),
            execution_policy: ExecutionPolicy::default(),
            fifo_allocator: FifoAllocatorKind::default(),
            stacks: HashMap::new(),
            trace: false,
            log_enabled: true,
        }
    }
}

impl RuntimeConfig {
    /// Align dependent choices: the single-rate-less runtime uses the
    /// single-rate-less scheduler and the piecewise allocator, the SRDAG
    /// runtimes an SRDAG allocator.
    pub fn normalized(mut self) -> Self {
        match self.runtime_kind {
            RuntimeKind::JitSrless => {
                self.scheduling_policy = SchedulingPolicy::SrlessListBestFit;
                self.fifo_allocator = FifoAllocatorKind::Default;
            }
            RuntimeKind::Static | RuntimeKind::FastJit => {
                if self.scheduling_policy == SchedulingPolicy::SrlessListBestFit {
                    self.scheduling_policy = SchedulingPolicy::ListBestFit;
                }
                if self.fifo_allocator == FifoAllocatorKind::Default {
                    self.fifo_allocator = FifoAllocatorKind::SrdagDefault;
                }
            }
        }
        self
    }
}
