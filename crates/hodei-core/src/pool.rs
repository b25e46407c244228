//! Named capacity buckets served by one instance provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Live capacity snapshot for a pool, refreshed by periodic
/// `sampleUtilization` polling (see `hodei_executor::InstanceProvider`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolUtilization {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub active_workers: u32,
    pub queued_for_pool: u32,
    pub sampled_at: DateTime<Utc>,
}

impl PoolUtilization {
    /// A sample older than this is treated as stale and the pool is
    /// deprioritized as if fully loaded (spec.md §4.3 edge cases).
    pub fn is_stale(&self, now: DateTime<Utc>, grace: std::time::Duration) -> bool {
        now.signed_duration_since(self.sampled_at)
            .to_std()
            .map(|age| age > grace)
            .unwrap_or(true)
    }
}

/// Whether a worker provisioned on demand for a single job is torn down
/// immediately after release, or kept warm until it idles out. Left as an
/// explicit per-pool policy since spec.md §9 leaves the default to
/// deployment configuration rather than pinning one behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EphemeralPolicy {
    AfterEachJob,
    AfterIdleTimeout { idle_secs: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePool {
    pub id: ResourceId,
    pub name: String,
    pub provider_kind: String,
    pub max_workers: u32,
    pub labels: std::collections::HashSet<String>,
    pub ephemeral: Option<EphemeralPolicy>,
    pub utilization: Option<PoolUtilization>,
}

impl ResourcePool {
    pub fn new(name: impl Into<String>, provider_kind: impl Into<String>, max_workers: u32) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            provider_kind: provider_kind.into(),
            max_workers,
            labels: std::collections::HashSet::new(),
            ephemeral: None,
            utilization: None,
        }
    }

    /// Pools whose labels satisfy a job's required label set, conjunctively.
    pub fn satisfies_labels(&self, required: &std::collections::HashSet<String>) -> bool {
        required.is_subset(&self.labels)
    }
}
