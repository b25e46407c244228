//! The Instance Provider Port and its in-memory reference implementation
//! for Hodei Pipelines (spec.md §4.6). Concrete infrastructure drivers
//! (Docker, Kubernetes, cloud VMs) are deliberately not shipped here --
//! operators supply their own `InstanceProvider` per pool.

pub mod in_memory;

pub use hodei_core::provider::{InstanceHandle, InstanceProvider, InstanceTemplate, UtilizationSample};
pub use in_memory::InMemoryProvider;
