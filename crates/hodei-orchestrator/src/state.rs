//! Shared application state wired together in `main.rs`.

use std::sync::Arc;

use hodei_config::system::SystemConfig;
use hodei_core::ResourceId;
use hodei_scheduler::{JobQueue, PoolRegistry, Scheduler};

use crate::engine::ExecutionEngine;
use crate::orchestrator::Orchestrator;
use crate::worker_registry::WorkerRegistry;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub workers: Arc<WorkerRegistry>,
    pub pools: Arc<PoolRegistry>,
    pub engine: Arc<ExecutionEngine>,
    pub config: Arc<SystemConfig>,
    /// Pool new connections land in when they declare no explicit pool
    /// affinity. Set to the first configured pool, or a synthesized default
    /// if the operator configured none.
    pub default_pool_id: ResourceId,
}

impl AppState {
    pub async fn new(config: SystemConfig) -> Self {
        let queue = Arc::new(JobQueue::new());
        let pools = Arc::new(PoolRegistry::new());
        let workers = Arc::new(WorkerRegistry::new());

        let mut default_pool_id = ResourceId::new();
        for (i, pool_cfg) in config.pools.iter().enumerate() {
            let mut pool = hodei_core::pool::ResourcePool::new(&pool_cfg.name, &pool_cfg.provider, pool_cfg.max_workers);
            pool.labels = pool_cfg.labels.iter().cloned().collect();
            if i == 0 {
                default_pool_id = pool.id;
            }
            pools.register(pool).await;
        }

        let orchestrator = Arc::new(Orchestrator::new(queue.clone()));
        let scheduler = Arc::new(Scheduler::new(queue, pools.clone(), config.scheduler.clone()));
        let engine = Arc::new(ExecutionEngine::new(orchestrator.clone(), scheduler, workers.clone()));

        Self {
            orchestrator,
            workers,
            pools,
            engine,
            config: Arc::new(config),
            default_pool_id,
        }
    }
}
