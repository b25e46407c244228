//! The Hodei Pipelines worker runtime: connects to an orchestrator over the
//! wire protocol defined in `hodei-protocol`, executes assigned pipelines via
//! `hodei-interpreter`, and caches artifacts locally (spec.md §4.7, §6).

pub mod cache;
pub mod runtime;

pub use cache::ArtifactCache;
pub use runtime::{WorkerIdentity, WorkerRuntime};
