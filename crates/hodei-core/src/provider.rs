//! The Instance Provider Port: a capability interface not tied to any
//! concrete infrastructure (spec.md §4.6). Concrete drivers (Docker,
//! Kubernetes, cloud VMs) are out of scope; `hodei-executor` ships only this
//! trait plus an in-memory reference implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ResourceId, Result};

/// A named instance template an operator configures per pool (image/size
/// hint); opaque to the port itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceTemplate {
    pub id: String,
    pub labels: std::collections::HashSet<String>,
    pub attributes: HashMap<String, String>,
}

/// Handle to a provisioned compute instance, returned by `provisionInstance`
/// and later passed to `deleteInstance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub instance_id: String,
    pub pool_id: ResourceId,
    pub template_id: String,
    pub provisioned_at: DateTime<Utc>,
}

/// A capacity sample for one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub active_instances: u32,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait InstanceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Provisions a new instance in `pool_id` from `template`. Async and may
    /// block within a caller-enforced timeout (spec.md §4.4:
    /// `WorkerProvisioningTimeout`).
    async fn provision_instance(
        &self,
        template: &InstanceTemplate,
        pool_id: ResourceId,
    ) -> Result<InstanceHandle>;

    async fn delete_instance(&self, instance_id: &str) -> Result<()>;

    async fn sample_utilization(&self, pool_id: ResourceId) -> Result<UtilizationSample>;

    async fn list_instances(&self, pool_id: ResourceId) -> Result<Vec<InstanceHandle>>;
}
