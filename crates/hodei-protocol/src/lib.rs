//! The worker-orchestrator wire protocol: message schemas (spec.md §6) and
//! chunked, checksum-verified artifact transfer.

pub mod chunk;
pub mod messages;

pub use messages::{OrchestratorMessage, WorkerMessage};
