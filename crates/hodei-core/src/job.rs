//! The submitted unit of work and its placement constraints.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineModel;
use crate::{Error, ResourceId, Result};
use std::collections::HashMap;

/// Declarative placement constraints attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequirements {
    /// All of these labels must be present in the worker's capability set.
    pub labels: HashSet<String>,
    /// Resource quantity string, e.g. "500m".
    pub min_cpu: Option<String>,
    /// Resource quantity string, e.g. "512Mi".
    pub min_memory: Option<String>,
    /// Soft hint: prefer provisioning from this instance template.
    pub preferred_template_id: Option<String>,
    /// Eviction deadline from the queue.
    pub max_wait_time: std::time::Duration,
}

impl Default for WorkerRequirements {
    fn default() -> Self {
        Self {
            labels: HashSet::new(),
            min_cpu: None,
            min_memory: None,
            preferred_template_id: None,
            max_wait_time: std::time::Duration::from_secs(300),
        }
    }
}

/// Everything submitted with a job: the executable model plus runtime
/// parameters layered on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub pipeline: PipelineModel,
    pub requirements: WorkerRequirements,
    pub parameters: HashMap<String, String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal state machine edge per spec.md §3:
    /// `QUEUED -> SCHEDULED -> RUNNING -> (COMPLETED | FAILED | CANCELLED)`,
    /// with `CANCELLED` reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Queued, Scheduled) => true,
            (Scheduled, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: ResourceId,
    pub name: String,
    pub definition: JobDefinition,
    /// Higher values are scheduled first.
    pub priority: i32,
    pub status: JobStatus,
    pub assigned_worker_id: Option<ResourceId>,
    pub assigned_pool_id: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
    pub cancel_reason: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, definition: JobDefinition, priority: i32) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            definition,
            priority,
            status: JobStatus::Queued,
            assigned_worker_id: None,
            assigned_pool_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            exit_code: None,
            failure_reason: None,
            cancel_reason: None,
        }
    }

    /// Apply a state transition, enforcing the legal-edge invariant and the
    /// attribute invariants tied to it (`startedAt`/`completedAt`/
    /// `assignedWorkerId`). Callers perform the compare-and-set themselves
    /// (see `hodei-orchestrator`'s job repository); this only validates and
    /// mutates a single in-memory `Job`.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal job transition {:?} -> {:?} for job {}",
                self.status, next, self.id
            )));
        }
        if next == JobStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_further_transitions() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn cancel_is_reachable_from_any_non_terminal_state() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Scheduled.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn transition_sets_started_and_completed_timestamps() {
        let def = JobDefinition {
            pipeline: crate::pipeline::PipelineModel { stages: vec![] },
            requirements: WorkerRequirements::default(),
            parameters: HashMap::new(),
            env: HashMap::new(),
        };
        let mut job = Job::new("demo", def, 0);
        assert!(job.started_at.is_none());
        job.transition(JobStatus::Scheduled).unwrap();
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.transition(JobStatus::Running).is_err());
    }
}
