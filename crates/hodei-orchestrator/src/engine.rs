//! The Execution Engine (spec.md §4.4): acquires a worker for each
//! scheduler placement, dispatches the `ExecutionAssignment`, and reacts to
//! worker liveness loss. One tick drives one round of
//! `Scheduler::tick` + dispatch; callers loop this on an interval.

use std::sync::Arc;

use hodei_core::event::EventKind;
use hodei_core::job::JobDefinition;
use hodei_protocol::OrchestratorMessage;
use hodei_scheduler::{Placement, Scheduler};
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;
use crate::worker_registry::WorkerRegistry;

pub struct ExecutionEngine {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    workers: Arc<WorkerRegistry>,
}

impl ExecutionEngine {
    pub fn new(orchestrator: Arc<Orchestrator>, scheduler: Arc<Scheduler>, workers: Arc<WorkerRegistry>) -> Self {
        Self { orchestrator, scheduler, workers }
    }

    /// Runs one scheduling + dispatch pass. Jobs whose `maxWaitTime` expired
    /// are failed with `SchedulingTimeout`; jobs placed on a pool with no
    /// currently idle worker are left `Scheduled` for a later tick's
    /// dispatch-only pass to pick up once a worker frees.
    pub async fn tick(&self) {
        let placements = match self.scheduler.tick().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "scheduler tick failed");
                return;
            }
        };

        for placement in placements {
            match placement {
                Placement::Scheduled { job, pool_id } => {
                    if let Err(e) = self.orchestrator.mark_scheduled(job.id, pool_id).await {
                        warn!(job_id = %job.id, error = %e, "failed to record scheduling");
                        continue;
                    }
                    self.dispatch_if_possible(job.id, pool_id, job.definition.clone()).await;
                }
                Placement::TimedOut { job } => {
                    let _ = self.orchestrator.mark_failed(job.id, "scheduling timeout: no eligible pool within maxWaitTime").await;
                }
                Placement::Requeued { .. } => {}
            }
        }
    }

    async fn dispatch_if_possible(&self, job_id: hodei_core::ResourceId, pool_id: hodei_core::ResourceId, definition: JobDefinition) {
        let Some(worker_id) = self.workers.acquire_idle_in_pool(pool_id, job_id).await else {
            info!(job_id = %job_id, pool_id = %pool_id, "no idle worker yet, will retry on a later tick");
            return;
        };

        let assignment = OrchestratorMessage::ExecutionAssignment {
            execution_id: job_id.to_string(),
            definition: definition.pipeline,
            env: definition.env,
            required_artifacts: Vec::new(),
        };

        if let Err(e) = self.workers.send(worker_id, assignment).await {
            warn!(worker_id = %worker_id, error = %e, "failed to dispatch assignment, releasing worker");
            self.workers.release(worker_id).await;
            return;
        }

        if let Err(e) = self.orchestrator.mark_running(job_id, worker_id).await {
            warn!(job_id = %job_id, error = %e, "failed to record job start");
        }
    }

    /// Sweeps for workers that stopped heartbeating and fails whatever job
    /// each was holding with `WorkerLost` (spec.md §4.4/§4.5).
    pub async fn sweep_lost_workers(&self, interval: std::time::Duration, missed_beats: u32) {
        for (worker_id, job_id) in self.workers.sweep_expired(interval, missed_beats).await {
            if let Some(job_id) = job_id {
                warn!(worker_id = %worker_id, job_id = %job_id, "worker lost mid-execution");
                self.orchestrator.record(job_id, EventKind::WorkerLost { worker_id }).await;
                let _ = self
                    .orchestrator
                    .mark_failed(job_id, format!("worker {worker_id} lost mid-execution"))
                    .await;
            }
        }
    }
}

