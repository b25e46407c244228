//! Orchestrator for Hodei Pipelines: job submission, scheduling, worker
//! registry, and the worker-facing wire server.

pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod routes;
pub mod state;
pub mod worker_registry;
pub mod ws;

pub use orchestrator::Orchestrator;
pub use state::AppState;
pub use worker_registry::WorkerRegistry;
