//! The in-memory Job Queue (spec.md §4.2): priority-first, FIFO within
//! priority, with `maxWaitTime` eviction. Replaces the `SKIP LOCKED`-over-
//! Postgres claim loop this crate used to drive with a `tokio::sync::Mutex`-
//! guarded binary heap -- the mutex's mutual exclusion gives the same
//! linearizability the SQL transaction isolation provided, and persistence
//! technology is out of scope here (spec.md §1).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::Utc;
use hodei_core::job::Job;
use hodei_core::ResourceId;
use tokio::sync::Mutex;

/// Wraps a `Job` for heap ordering: higher priority first, then earlier
/// `created_at` first (FIFO within priority). `ResourceId` is UUIDv7-backed
/// so it breaks remaining ties in creation order too.
struct QueueEntry(Job);

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.created_at == other.0.created_at
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<QueueEntry>,
}

/// An ordered collection of queued jobs, thread-safe via an internal mutex
/// (spec.md §4.2: "concurrent scheduling ticks are serialized").
pub struct JobQueue {
    inner: Mutex<Inner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn enqueue(&self, job: Job) {
        let mut inner = self.inner.lock().await;
        inner.heap.push(QueueEntry(job));
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    /// Pops every job currently in the queue, highest priority / oldest
    /// first, leaving the queue empty. The scheduler tick re-enqueues
    /// anything it does not place this round.
    pub async fn drain_in_order(&self) -> Vec<Job> {
        let mut inner = self.inner.lock().await;
        let mut out = Vec::with_capacity(inner.heap.len());
        while let Some(QueueEntry(job)) = inner.heap.pop() {
            out.push(job);
        }
        out
    }

    pub async fn remove(&self, job_id: ResourceId) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let items: Vec<QueueEntry> = std::mem::take(&mut inner.heap).into_vec();
        let mut removed = None;
        let mut rest = BinaryHeap::new();
        for entry in items {
            if entry.0.id == job_id {
                removed = Some(entry.0);
            } else {
                rest.push(entry);
            }
        }
        inner.heap = rest;
        removed
    }

    /// Sweeps the queue for jobs whose `maxWaitTime` has elapsed since
    /// `created_at`, removing and returning them so the caller can fail
    /// them with `SchedulingTimeout` (spec.md §4.2).
    pub async fn evict_expired(&self) -> Vec<Job> {
        let mut inner = self.inner.lock().await;
        let items: Vec<QueueEntry> = std::mem::take(&mut inner.heap).into_vec();
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut rest = BinaryHeap::new();
        for entry in items {
            let waited = now.signed_duration_since(entry.0.created_at);
            let max_wait = entry.0.definition.requirements.max_wait_time;
            let elapsed = waited.to_std().unwrap_or_default();
            if elapsed > max_wait {
                expired.push(entry.0);
            } else {
                rest.push(entry);
            }
        }
        inner.heap = rest;
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_core::job::{JobDefinition, WorkerRequirements};
    use hodei_core::pipeline::PipelineModel;
    use std::collections::HashMap;

    fn job(priority: i32) -> Job {
        let def = JobDefinition {
            pipeline: PipelineModel::default(),
            requirements: WorkerRequirements::default(),
            parameters: HashMap::new(),
            env: HashMap::new(),
        };
        Job::new("test", def, priority)
    }

    #[tokio::test]
    async fn higher_priority_drains_first() {
        let queue = JobQueue::new();
        queue.enqueue(job(0)).await;
        queue.enqueue(job(5)).await;
        queue.enqueue(job(1)).await;
        let drained = queue.drain_in_order().await;
        let priorities: Vec<i32> = drained.iter().map(|j| j.priority).collect();
        assert_eq!(priorities, vec![5, 1, 0]);
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let queue = JobQueue::new();
        let a = job(0);
        let a_id = a.id;
        queue.enqueue(a).await;
        let b = job(0);
        let b_id = b.id;
        queue.enqueue(b).await;
        let drained = queue.drain_in_order().await;
        assert_eq!(drained[0].id, a_id);
        assert_eq!(drained[1].id, b_id);
    }

    #[tokio::test]
    async fn evicts_jobs_past_max_wait_time() {
        let queue = JobQueue::new();
        let mut j = job(0);
        j.definition.requirements.max_wait_time = std::time::Duration::from_secs(0);
        j.created_at = Utc::now() - chrono::Duration::seconds(5);
        queue.enqueue(j).await;
        let expired = queue.evict_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(queue.size().await, 0);
    }
}
