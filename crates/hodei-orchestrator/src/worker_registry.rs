//! The Worker Registry (spec.md §4.5): tracks connected workers and the
//! outbound channel used to push `OrchestratorMessage`s to each one over
//! its WebSocket connection.

use std::collections::HashMap;
use std::sync::Arc;

use hodei_core::worker::{Capabilities, Worker, WorkerStatus};
use hodei_core::{Error, ResourceId, Result};
use hodei_protocol::OrchestratorMessage;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

pub type WorkerSender = mpsc::Sender<OrchestratorMessage>;

#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<ResourceId, Worker>>,
    connections: RwLock<HashMap<ResourceId, WorkerSender>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, pool_id: ResourceId, capabilities: Capabilities, session_token: String, sender: WorkerSender) -> ResourceId {
        let worker = Worker::new(pool_id, capabilities, session_token);
        let id = worker.id;
        self.workers.write().await.insert(id, worker);
        self.connections.write().await.insert(id, sender);
        id
    }

    pub async fn disconnect(&self, worker_id: ResourceId) {
        self.connections.write().await.remove(&worker_id);
        if let Some(worker) = self.workers.write().await.get_mut(&worker_id) {
            worker.status = WorkerStatus::Offline;
        }
    }

    pub async fn heartbeat(&self, worker_id: ResourceId) {
        if let Some(worker) = self.workers.write().await.get_mut(&worker_id) {
            worker.heartbeat(chrono::Utc::now());
        }
    }

    /// First idle worker belonging to `pool_id`, bound to `job_id` if found.
    pub async fn acquire_idle_in_pool(&self, pool_id: ResourceId, job_id: ResourceId) -> Option<ResourceId> {
        let mut workers = self.workers.write().await;
        let candidate = workers
            .values_mut()
            .find(|w| w.pool_id == pool_id && w.status == WorkerStatus::Idle)?;
        candidate.bind(job_id);
        Some(candidate.id)
    }

    pub async fn release(&self, worker_id: ResourceId) {
        if let Some(worker) = self.workers.write().await.get_mut(&worker_id) {
            worker.release();
        }
    }

    pub async fn send(&self, worker_id: ResourceId, message: OrchestratorMessage) -> Result<()> {
        let connections = self.connections.read().await;
        let sender = connections
            .get(&worker_id)
            .ok_or_else(|| Error::Internal(format!("worker {worker_id} has no open connection")))?;
        sender
            .send(message)
            .await
            .map_err(|_| Error::Internal(format!("worker {worker_id} connection closed")))
    }

    /// Sweeps every registered worker for missed heartbeats, marking
    /// expired ones offline and returning their ids and any job they held
    /// so the caller can fail that job with `WorkerLost` (spec.md §4.5).
    pub async fn sweep_expired(&self, interval: std::time::Duration, missed_beats: u32) -> Vec<(ResourceId, Option<ResourceId>)> {
        let now = chrono::Utc::now();
        let mut workers = self.workers.write().await;
        let mut lost = Vec::new();
        for worker in workers.values_mut() {
            if worker.status != WorkerStatus::Offline && worker.is_expired(now, interval, missed_beats) {
                warn!(worker_id = %worker.id, "worker missed heartbeat threshold, marking offline");
                let job_id = worker.current_job_id;
                worker.status = WorkerStatus::Offline;
                worker.current_job_id = None;
                lost.push((worker.id, job_id));
            }
        }
        lost
    }

    pub async fn get(&self, worker_id: ResourceId) -> Option<Worker> {
        self.workers.read().await.get(&worker_id).cloned()
    }
}

pub type SharedWorkerRegistry = Arc<WorkerRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_idle_binds_job_and_excludes_busy_workers() {
        let registry = WorkerRegistry::new();
        let pool_id = ResourceId::new();
        let (tx, _rx) = mpsc::channel(8);
        let worker_id = registry.register(pool_id, Capabilities::default(), "tok".to_string(), tx).await;

        let job_id = ResourceId::new();
        let acquired = registry.acquire_idle_in_pool(pool_id, job_id).await;
        assert_eq!(acquired, Some(worker_id));

        let again = registry.acquire_idle_in_pool(pool_id, ResourceId::new()).await;
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn disconnect_marks_offline() {
        let registry = WorkerRegistry::new();
        let pool_id = ResourceId::new();
        let (tx, _rx) = mpsc::channel(8);
        let worker_id = registry.register(pool_id, Capabilities::default(), "tok".to_string(), tx).await;
        registry.disconnect(worker_id).await;
        let worker = registry.get(worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
    }
}
