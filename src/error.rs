//! Error types for graph transformation, scheduling and dispatch.
//!
//! Every failure the runtime can produce is a variant of [`Error`]. All of
//! them are fatal to the current iteration: the orchestrator logs the error,
//! resets the runners and returns it to the caller. There is no internal
//! retry; an application may re-invoke the runtime if it wants one.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds produced by the runtime core.
#[derive(Debug, Error)]
pub enum Error {
    /// The repetition vector of a graph level has no positive integer
    /// solution, or a rate expression failed to resolve.
    #[error("inconsistent graph `{graph}`: {reason}")]
    PipelineInconsistent { graph: String, reason: String },

    /// A dynamic parameter was read before its config actor produced it.
    #[error("parameter `{param}` read before being set")]
    ParamNotReady { param: String },

    /// Expression evaluation failed (division by zero, malformed postfix
    /// stream, unknown parameter index).
    #[error("expression evaluation failed: {0}")]
    Eval(String),

    /// Expression evaluation overflowed i64. The reported value is the
    /// saturated result of the failing operation.
    #[error("expression evaluation overflowed (saturated to {saturated})")]
    EvalOverflow { saturated: i64 },

    /// An edge was attached to the wrong side of a subgraph interface.
    #[error("interface `{interface}` connected on the wrong side")]
    InterfaceMisconnected { interface: String },

    /// The mapper found no enabled PE satisfying a task's constraints.
    #[error("no eligible PE for task `{task}`")]
    NoEligiblePe { task: String },

    /// A memory stack ran out of space.
    #[error("stack {stack:?} exhausted: requested {requested} bytes, {available} available")]
    OutOfStack {
        stack: crate::memory::StackId,
        requested: usize,
        available: usize,
    },

    /// A pre-sized pool was full.
    #[error("pool `{pool}` exhausted (capacity {capacity})")]
    PoolExhausted { pool: String, capacity: usize },

    /// An address was freed on a stack that never allocated it.
    #[error("address {address:#x} does not belong to stack {stack:?}")]
    ForeignFree {
        stack: crate::memory::StackId,
        address: usize,
    },

    /// A runner reported a kernel failure.
    #[error("kernel failure on runner {runner} (task {task_ix}): {message}")]
    KernelFailure {
        runner: usize,
        task_ix: u32,
        message: String,
    },

    /// The communicator failed to move a message.
    #[error("transport error: {0}")]
    Transport(String),
}
