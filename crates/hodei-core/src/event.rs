//! The append-only per-job event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventKind {
    JobQueued,
    JobScheduled { pool_id: ResourceId },
    JobStarted,
    StageStarted { stage: String },
    StageCompleted { stage: String, outcome: String },
    StageFailed { stage: String, message: String },
    ParallelGroupStarted { stage: String },
    ParallelGroupCompleted { stage: String },
    StepOutput { stream: String, chunk: String },
    JobCompleted { exit_code: i32 },
    JobFailed { reason: String },
    JobCancelled { reason: String },
    WorkerAssigned { worker_id: ResourceId },
    WorkerLost { worker_id: ResourceId },
}

/// An immutable record appended to a job's event log. The log is
/// append-only and ordered monotonically per job (spec.md §3, P5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub job_id: ResourceId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl ExecutionEvent {
    pub fn new(job_id: ResourceId, kind: EventKind) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}
