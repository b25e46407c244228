//! Connected execution agents.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// What a worker advertises it can run: a set of labels plus free-form
/// key/value attributes (e.g. `arch=arm64`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub labels: std::collections::HashSet<String>,
    pub attributes: HashMap<String, String>,
}

impl Capabilities {
    pub fn satisfies(&self, required: &std::collections::HashSet<String>) -> bool {
        required.is_subset(&self.labels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Draining,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: ResourceId,
    pub pool_id: ResourceId,
    pub capabilities: Capabilities,
    pub status: WorkerStatus,
    pub current_job_id: Option<ResourceId>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub session_token: String,
    pub connected_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(pool_id: ResourceId, capabilities: Capabilities, session_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            pool_id,
            capabilities,
            status: WorkerStatus::Idle,
            current_job_id: None,
            last_heartbeat_at: now,
            session_token,
            connected_at: now,
        }
    }

    /// `status=BUSY <=> currentJobId != null` is enforced here rather than
    /// left to callers to keep in sync by hand.
    pub fn bind(&mut self, job_id: ResourceId) {
        self.current_job_id = Some(job_id);
        self.status = WorkerStatus::Busy;
    }

    pub fn release(&mut self) {
        self.current_job_id = None;
        if self.status != WorkerStatus::Offline {
            self.status = WorkerStatus::Idle;
        }
    }

    pub fn heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat_at = at;
        if self.status == WorkerStatus::Offline {
            self.status = WorkerStatus::Idle;
        }
    }

    /// A worker missing `N` consecutive heartbeat intervals (default `N=3`,
    /// negotiated interval default 10s, see spec.md §4.5) is considered lost.
    pub fn is_expired(&self, now: DateTime<Utc>, interval: std::time::Duration, missed_beats: u32) -> bool {
        let grace = interval * missed_beats;
        let elapsed = now.signed_duration_since(self.last_heartbeat_at);
        elapsed.to_std().map(|e| e > grace).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_iff_current_job_set() {
        let mut w = Worker::new(ResourceId::new(), Capabilities::default(), "tok".into());
        assert_eq!(w.status, WorkerStatus::Idle);
        w.bind(ResourceId::new());
        assert_eq!(w.status, WorkerStatus::Busy);
        w.release();
        assert_eq!(w.status, WorkerStatus::Idle);
        assert!(w.current_job_id.is_none());
    }

    #[test]
    fn expires_after_missed_beats() {
        let mut w = Worker::new(ResourceId::new(), Capabilities::default(), "tok".into());
        w.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(31);
        assert!(w.is_expired(Utc::now(), std::time::Duration::from_secs(10), 3));
    }
}
