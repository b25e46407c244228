//! A reference `InstanceProvider` that simulates provisioning without
//! touching any real infrastructure: useful for local development and for
//! exercising the scheduler/orchestrator without a Docker or Kubernetes
//! daemon available. Mirrors the naming and state-tracking shape the
//! teacher's Docker driver used, minus any actual container lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use hodei_core::provider::{InstanceHandle, InstanceProvider, InstanceTemplate, UtilizationSample};
use hodei_core::{Error, ResourceId, Result};
use tokio::sync::RwLock;

fn instance_name(pool_id: ResourceId, seq: u32) -> String {
    format!("hodei-sim-{pool_id}-{seq}")
}

#[derive(Default)]
struct State {
    instances: HashMap<String, InstanceHandle>,
}

/// Simulates an elastic pool: `provision_instance` always succeeds and
/// `sample_utilization` reports load proportional to the number of live
/// instances against a fixed assumed capacity of `capacity_hint`.
pub struct InMemoryProvider {
    capacity_hint: u32,
    sequence: AtomicU32,
    state: RwLock<State>,
}

impl InMemoryProvider {
    pub fn new(capacity_hint: u32) -> Self {
        Self {
            capacity_hint,
            sequence: AtomicU32::new(0),
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl InstanceProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn provision_instance(
        &self,
        template: &InstanceTemplate,
        pool_id: ResourceId,
    ) -> Result<InstanceHandle> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let handle = InstanceHandle {
            instance_id: instance_name(pool_id, seq),
            pool_id,
            template_id: template.id.clone(),
            provisioned_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .instances
            .insert(handle.instance_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .instances
            .remove(instance_id)
            .ok_or_else(|| Error::Internal(format!("no such instance '{instance_id}'")))?;
        Ok(())
    }

    async fn sample_utilization(&self, pool_id: ResourceId) -> Result<UtilizationSample> {
        let state = self.state.read().await;
        let active = state
            .instances
            .values()
            .filter(|h| h.pool_id == pool_id)
            .count() as u32;
        let load_pct = (active as f64 / self.capacity_hint.max(1) as f64 * 100.0).min(100.0);
        Ok(UtilizationSample {
            cpu_pct: load_pct,
            mem_pct: load_pct,
            active_instances: active,
            timestamp: Utc::now(),
        })
    }

    async fn list_instances(&self, pool_id: ResourceId) -> Result<Vec<InstanceHandle>> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .filter(|h| h.pool_id == pool_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> InstanceTemplate {
        InstanceTemplate {
            id: "default".to_string(),
            labels: Default::default(),
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn provision_then_list_round_trips() {
        let provider = InMemoryProvider::new(5);
        let pool_id = ResourceId::new();
        let handle = provider.provision_instance(&template(), pool_id).await.unwrap();
        let listed = provider.list_instances(pool_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].instance_id, handle.instance_id);
    }

    #[tokio::test]
    async fn delete_removes_instance() {
        let provider = InMemoryProvider::new(5);
        let pool_id = ResourceId::new();
        let handle = provider.provision_instance(&template(), pool_id).await.unwrap();
        provider.delete_instance(&handle.instance_id).await.unwrap();
        assert!(provider.list_instances(pool_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn utilization_tracks_active_instance_count() {
        let provider = InMemoryProvider::new(4);
        let pool_id = ResourceId::new();
        provider.provision_instance(&template(), pool_id).await.unwrap();
        provider.provision_instance(&template(), pool_id).await.unwrap();
        let sample = provider.sample_utilization(pool_id).await.unwrap();
        assert_eq!(sample.active_instances, 2);
        assert_eq!(sample.cpu_pct, 50.0);
    }

    #[tokio::test]
    async fn deleting_unknown_instance_errors() {
        let provider = InMemoryProvider::new(4);
        assert!(provider.delete_instance("missing").await.is_err());
    }
}
