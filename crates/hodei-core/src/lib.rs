//! Core domain types and ports for Hodei Pipelines.
//!
//! This crate contains:
//! - Resource identifiers and the shared error taxonomy
//! - The Job/Worker/ResourcePool/PipelineModel/ExecutionEvent/Artifact data
//!   model (spec.md §3)
//! - The Instance Provider Port and Artifact Store port -- interfaces only,
//!   concrete drivers live in `hodei-executor`

pub mod artifact;
pub mod error;
pub mod event;
pub mod job;
pub mod pipeline;
pub mod pool;
pub mod provider;
pub mod id;
pub mod worker;

pub use error::{Error, Result};
pub use id::ResourceId;
