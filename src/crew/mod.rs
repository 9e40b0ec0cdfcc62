//! Crew: the task-orchestration layer built on top of the coordination core.

pub mod model;
pub mod scheduler;
pub mod store;
pub mod verdict;

pub use model::{Plan, ReviewVerdict, Task, TaskStatus, Verdict};
pub use scheduler::{Scheduler, Worker, WorkerOutcome};
pub use store::CrewStore;
