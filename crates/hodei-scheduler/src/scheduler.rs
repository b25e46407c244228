//! Scheduler tick (spec.md §4.3): drains the job queue in priority order,
//! filters pools by label eligibility, ranks with the configured strategy,
//! and emits placement decisions. Jobs that cannot be placed this round are
//! re-enqueued; jobs past `maxWaitTime` are evicted and failed.

use std::collections::HashMap;
use std::sync::Arc;

use hodei_config::system::SchedulerConfig;
use hodei_core::job::{Job, JobStatus};
use hodei_core::pool::ResourcePool;
use hodei_core::{Error, ResourceId, Result};

use crate::pool_registry::PoolRegistry;
use crate::queue::JobQueue;
use crate::strategies::{build_registry, SchedulingStrategy};

/// One job's placement outcome for a tick.
pub enum Placement {
    Scheduled { job: Job, pool_id: ResourceId },
    TimedOut { job: Job },
    Requeued { job: Job },
}

pub struct Scheduler {
    queue: Arc<JobQueue>,
    pools: Arc<PoolRegistry>,
    strategies: HashMap<&'static str, Box<dyn SchedulingStrategy>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(queue: Arc<JobQueue>, pools: Arc<PoolRegistry>, config: SchedulerConfig) -> Self {
        let strategies = build_registry(config.least_loaded_weights.clone(), config.utilization_max_age);
        Self {
            queue,
            pools,
            strategies,
            config,
        }
    }

    fn active_strategy(&self) -> Result<&dyn SchedulingStrategy> {
        self.strategies
            .get(self.config.strategy.as_str())
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::InvalidDefinition(format!("unknown scheduler strategy '{}'", self.config.strategy)))
    }

    /// Runs one scheduling pass. Jobs that do not place this round are put
    /// back on the queue by the caller via the `Requeued` outcome so a
    /// subsequent tick can retry once utilization changes.
    pub async fn tick(&self) -> Result<Vec<Placement>> {
        let strategy = self.active_strategy()?;
        let expired = self.queue.evict_expired().await;
        let mut outcomes: Vec<Placement> = expired.into_iter().map(|job| Placement::TimedOut { job }).collect();

        let jobs = self.queue.drain_in_order().await;
        for mut job in jobs {
            let eligible: Vec<ResourcePool> = self
                .pools
                .eligible(&job.definition.requirements.labels)
                .await
                .into_iter()
                .filter(|p| {
                    let active = p.utilization.as_ref().map(|u| u.active_workers).unwrap_or(0);
                    active < p.max_workers
                })
                .collect();

            match strategy.select(&eligible) {
                Some(pool) => {
                    job.assigned_pool_id = Some(pool.id);
                    job.transition(JobStatus::Scheduled)?;
                    outcomes.push(Placement::Scheduled { job, pool_id: pool.id });
                }
                None => outcomes.push(Placement::Requeued { job }),
            }
        }

        for outcome in &outcomes {
            if let Placement::Requeued { job } = outcome {
                self.queue.enqueue(job.clone()).await;
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_core::job::JobDefinition;
    use hodei_core::pipeline::PipelineModel;
    use hodei_core::pool::PoolUtilization;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn job_with_label(label: &str) -> Job {
        let mut req = hodei_core::job::WorkerRequirements::default();
        req.labels.insert(label.to_string());
        let def = JobDefinition {
            pipeline: PipelineModel::default(),
            requirements: req,
            parameters: Map::new(),
            env: Map::new(),
        };
        Job::new("test", def, 0)
    }

    #[tokio::test]
    async fn places_job_onto_matching_pool() {
        let queue = Arc::new(JobQueue::new());
        let pools = Arc::new(PoolRegistry::new());
        let mut pool = ResourcePool::new("poolA", "docker", 5);
        pool.labels.insert("linux".to_string());
        pool.utilization = Some(PoolUtilization {
            cpu_pct: 10.0,
            mem_pct: 10.0,
            active_workers: 1,
            queued_for_pool: 0,
            sampled_at: Utc::now(),
        });
        pools.register(pool).await;

        queue.enqueue(job_with_label("linux")).await;

        let scheduler = Scheduler::new(queue, pools, SchedulerConfig::default());
        let outcomes = scheduler.tick().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Placement::Scheduled { .. }));
    }

    #[tokio::test]
    async fn requeues_job_with_no_eligible_pool() {
        let queue = Arc::new(JobQueue::new());
        let pools = Arc::new(PoolRegistry::new());
        queue.enqueue(job_with_label("gpu")).await;

        let scheduler = Scheduler::new(queue.clone(), pools, SchedulerConfig::default());
        let outcomes = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], Placement::Requeued { .. }));
        assert_eq!(queue.size().await, 1);
    }
}
