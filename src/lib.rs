//! # Tokenloom
//!
//! A runtime for **dynamic parameterized synchronous dataflow** (PiSDF)
//! applications on heterogeneous multi-core platforms. Given a hierarchical
//! dataflow graph whose rates may depend on parameters resolved at runtime,
//! and a description of the execution platform, tokenloom turns each
//! iteration of the application into scheduled, memory-placed jobs and
//! dispatches them to per-PE worker runners.
//!
//! ## Pipeline
//!
//! 1. **Resolve** - parameter values land in a per-firing snapshot; the
//!    repetition vector of every graph level is solved from the resolved
//!    rates ([`brv`], [`handler`]).
//! 2. **Transform** - either expand the hierarchy into a single-rate DAG
//!    with fork/join adapters and pattern cleanup ([`srdag`]), or skip the
//!    expansion and enumerate firings directly ([`deps`]).
//! 3. **Schedule & map** - list scheduling with best-fit mapping across the
//!    PE fleet, biased away from the orchestrator's own PE ([`sched`]).
//! 4. **Allocate** - every edge buffer gets a virtual address; persistent
//!    delays live below a reservation watermark that survives iterations
//!    ([`sched::fifo`]).
//! 5. **Dispatch** - jobs with FIFO handles and cross-runner constraints go
//!    out through an abstract communicator; config actors feed parameter
//!    values back and re-trigger resolution ([`runtime`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use tokenloom::*;
//! use std::sync::Arc;
//!
//! fn main() -> tokenloom::Result<()> {
//!     // platform: one cluster, four cores, PE 0 is the GRT
//!     let mut platform = Platform::new();
//!     let cluster = platform.add_cluster("host", Arc::new(SharedMemory::new()));
//!     for ix in 0..4 {
//!         platform.add_pe(cluster, &format!("core{ix}"));
//!     }
//!
//!     // kernels
//!     let mut kernels = KernelTable::new();
//!     let produce = kernels.register(Arc::new(
//!         |_params: &[i64], _out: &mut [i64], _inputs: &[Vec<u8>], outputs: &mut [Vec<u8>]| {
//!             outputs[0].fill(1);
//!             Ok(())
//!         },
//!     ));
//!
//!     // graph: A produces 2 tokens per firing, B consumes 3
//!     let mut graph = Graph::new("app");
//!     let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
//!     let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
//!     graph.set_kernel(a, produce);
//!     graph.connect(a, 0, 2, b, 0, 3)?;
//!
//!     // one iteration on thread-backed runners
//!     let rt = RtPlatform::start(&platform, kernels, false);
//!     let mut runtime = Runtime::new(&graph, &platform, rt.communicator(), RuntimeConfig::default());
//!     runtime.execute()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core concepts
//!
//! - [`Graph`]: the immutable application description: vertices with
//!   symbolic rates, edges with optional delays, parameters, interfaces and
//!   nested subgraphs.
//! - [`handler::GraphHandler`] / [`handler::GraphFiring`]: per-iteration
//!   state of the hierarchy. A firing is *static* when no dynamic parameter
//!   reaches it; static firings resolve eagerly, dynamic ones wait for
//!   their config actors.
//! - [`Platform`]: clusters of PEs with memory interfaces and
//!   communication-cost routines.
//! - [`Runtime`]: the orchestrator. [`RuntimeKind`] picks the outer loop:
//!   `Static` transforms once, `FastJit` re-expands every iteration,
//!   `JitSrless` schedules firings without building a single-rate graph.
//! - [`Communicator`]: the transport seam to the runners. The in-process
//!   [`RtPlatform`] spawns one thread per PE; tests use the mock in
//!   [`testing`].

pub mod archi;
pub mod brv;
pub mod config;
pub mod deps;
pub mod error;
pub mod expr;
pub mod graph;
pub mod handler;
pub mod memory;
pub mod runtime;
pub mod sched;
pub mod srdag;
pub mod testing;

pub use archi::{CommCost, MemoryInterface, Platform, SharedMemory};
pub use brv::compute_brv;
pub use config::{ExecutionPolicy, MappingPolicy, RuntimeConfig, RuntimeKind};
pub use error::{Error, Result};
pub use expr::{ExprOp, ExprToken, Expression};
pub use graph::{Graph, ParamKind, VertexKind};
pub use memory::{AllocatorKind, FitPolicy, StackId};
pub use runtime::{Communicator, JobMessage, KernelTable, Notification, RtPlatform, Runtime};
pub use sched::{FifoAllocatorKind, Schedule, SchedulingPolicy};
