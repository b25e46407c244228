//! The Resource Pool Registry (spec.md §4.6): set of named pools with cached
//! utilization snapshots, polled from the Instance Provider Port on a bounded
//! cadence by the caller (`hodei-orchestrator`'s provisioning loop).

use std::collections::HashMap;

use hodei_core::pool::{PoolUtilization, ResourcePool};
use hodei_core::ResourceId;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<ResourceId, ResourcePool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, pool: ResourcePool) {
        self.pools.write().await.insert(pool.id, pool);
    }

    pub async fn update_utilization(&self, pool_id: ResourceId, snapshot: PoolUtilization) {
        if let Some(pool) = self.pools.write().await.get_mut(&pool_id) {
            pool.utilization = Some(snapshot);
        }
    }

    pub async fn get(&self, pool_id: ResourceId) -> Option<ResourcePool> {
        self.pools.read().await.get(&pool_id).cloned()
    }

    /// Snapshot of every registered pool, used by the scheduler each tick.
    pub async fn snapshot(&self) -> Vec<ResourcePool> {
        self.pools.read().await.values().cloned().collect()
    }

    /// Pools whose labels satisfy `required` and whose utilization sample is
    /// either absent (never sampled) or fresh within `stale_grace`. Stale
    /// samples are not filtered out here -- the strategy still considers the
    /// pool but treats it as maximally loaded (spec.md §4.3 edge case),
    /// handled by `PoolUtilization::is_stale` at rank time.
    pub async fn eligible(&self, required: &std::collections::HashSet<String>) -> Vec<ResourcePool> {
        self.pools
            .read()
            .await
            .values()
            .filter(|p| p.satisfies_labels(required))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eligible_filters_by_label_superset() {
        let registry = PoolRegistry::new();
        let mut pool = ResourcePool::new("poolA", "docker", 3);
        pool.labels.insert("linux".to_string());
        registry.register(pool).await;

        let mut required = std::collections::HashSet::new();
        required.insert("linux".to_string());
        assert_eq!(registry.eligible(&required).await.len(), 1);

        required.insert("gpu".to_string());
        assert_eq!(registry.eligible(&required).await.len(), 0);
    }
}
