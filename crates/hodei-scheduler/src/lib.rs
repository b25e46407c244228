//! Job scheduling for Hodei Pipelines.
//!
//! Owns the in-memory job queue, the resource pool registry, and the
//! pluggable placement strategies that decide which pool a queued job lands
//! on each scheduler tick.

pub mod pool_registry;
pub mod queue;
pub mod scheduler;
pub mod strategies;

pub use pool_registry::PoolRegistry;
pub use queue::JobQueue;
pub use scheduler::{Placement, Scheduler};
pub use strategies::SchedulingStrategy;
