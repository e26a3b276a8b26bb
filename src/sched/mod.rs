//! Scheduling: tasks, policies, mapping, FIFO placement.

pub mod fifo;
pub mod mapper;
pub mod schedule;
pub mod scheduler;
pub mod task;

pub use fifo::{AllocationRule, Fifo, FifoAllocator, FifoAllocatorKind, FifoAttribute, JobFifos};
pub use mapper::{GRT_BIAS, Mapping, best_fit};
pub use schedule::{Schedule, Stats};
pub use scheduler::{Scheduler, SchedulingPolicy, TaskFilter};
pub use task::{ExecDependency, Task, TaskRef};
