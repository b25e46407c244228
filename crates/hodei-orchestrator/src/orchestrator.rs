//! The Orchestrator (spec.md §4.1): the submit/cancel/describe surface over
//! the job queue, plus the append-only per-job event log.

use std::collections::HashMap;
use std::sync::Arc;

use hodei_core::event::{EventKind, ExecutionEvent};
use hodei_core::job::{Job, JobDefinition, JobStatus};
use hodei_core::{Error, ResourceId, Result};
use hodei_scheduler::JobQueue;
use tokio::sync::RwLock;
use tracing::info;

pub struct Orchestrator {
    queue: Arc<JobQueue>,
    jobs: RwLock<HashMap<ResourceId, Job>>,
    events: RwLock<HashMap<ResourceId, Vec<ExecutionEvent>>>,
}

impl Orchestrator {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            jobs: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    pub async fn submit(&self, name: impl Into<String>, definition: JobDefinition, priority: i32) -> Result<Job> {
        definition.pipeline.validate()?;
        let job = Job::new(name, definition, priority);
        self.jobs.write().await.insert(job.id, job.clone());
        self.record(job.id, EventKind::JobQueued).await;
        self.queue.enqueue(job.clone()).await;
        info!(job_id = %job.id, "job submitted");
        Ok(job)
    }

    pub async fn describe(&self, job_id: ResourceId) -> Option<Job> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn events_for(&self, job_id: ResourceId) -> Vec<ExecutionEvent> {
        self.events.read().await.get(&job_id).cloned().unwrap_or_default()
    }

    /// Cancels a job. Reachable from any non-terminal state per spec.md §3;
    /// the queue entry is removed if still waiting, otherwise the running
    /// worker is expected to be signalled separately by the execution
    /// engine once it observes this transition.
    pub async fn cancel(&self, job_id: ResourceId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or_else(|| Error::Internal(format!("unknown job {job_id}")))?;
        job.cancel_reason = Some(reason.clone());
        job.transition(JobStatus::Cancelled)?;
        drop(jobs);
        self.queue.remove(job_id).await;
        self.record(job_id, EventKind::JobCancelled { reason }).await;
        Ok(())
    }

    pub async fn mark_scheduled(&self, job_id: ResourceId, pool_id: ResourceId) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or_else(|| Error::Internal(format!("unknown job {job_id}")))?;
        job.assigned_pool_id = Some(pool_id);
        job.transition(JobStatus::Scheduled)?;
        drop(jobs);
        self.record(job_id, EventKind::JobScheduled { pool_id }).await;
        Ok(())
    }

    pub async fn mark_running(&self, job_id: ResourceId, worker_id: ResourceId) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or_else(|| Error::Internal(format!("unknown job {job_id}")))?;
        job.assigned_worker_id = Some(worker_id);
        job.transition(JobStatus::Running)?;
        drop(jobs);
        self.record(job_id, EventKind::JobStarted).await;
        self.record(job_id, EventKind::WorkerAssigned { worker_id }).await;
        Ok(())
    }

    pub async fn mark_completed(&self, job_id: ResourceId, exit_code: i32) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or_else(|| Error::Internal(format!("unknown job {job_id}")))?;
        job.exit_code = Some(exit_code);
        job.transition(JobStatus::Completed)?;
        drop(jobs);
        self.record(job_id, EventKind::JobCompleted { exit_code }).await;
        Ok(())
    }

    pub async fn mark_failed(&self, job_id: ResourceId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or_else(|| Error::Internal(format!("unknown job {job_id}")))?;
        job.failure_reason = Some(reason.clone());
        job.transition(JobStatus::Failed)?;
        drop(jobs);
        self.record(job_id, EventKind::JobFailed { reason }).await;
        Ok(())
    }

    pub async fn requeue(&self, job: Job) {
        self.queue.enqueue(job).await;
    }

    pub async fn record(&self, job_id: ResourceId, kind: EventKind) {
        let event = ExecutionEvent::new(job_id, kind);
        self.events.write().await.entry(job_id).or_default().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_core::job::WorkerRequirements;
    use hodei_core::pipeline::PipelineModel;

    fn definition() -> JobDefinition {
        JobDefinition {
            pipeline: PipelineModel::default(),
            requirements: WorkerRequirements::default(),
            parameters: HashMap::new(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn submit_enqueues_and_logs_event() {
        let queue = Arc::new(JobQueue::new());
        let orchestrator = Orchestrator::new(queue.clone());
        let job = orchestrator.submit("demo", definition(), 0).await.unwrap();
        assert_eq!(queue.size().await, 1);
        let events = orchestrator.events_for(job.id).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::JobQueued));
    }

    #[tokio::test]
    async fn cancel_removes_from_queue_and_transitions() {
        let queue = Arc::new(JobQueue::new());
        let orchestrator = Orchestrator::new(queue.clone());
        let job = orchestrator.submit("demo", definition(), 0).await.unwrap();
        orchestrator.cancel(job.id, "operator request").await.unwrap();
        assert_eq!(queue.size().await, 0);
        let described = orchestrator.describe(job.id).await.unwrap();
        assert_eq!(described.status, JobStatus::Cancelled);
    }
}
