//! The error taxonomy shared across every component boundary.
//!
//! Internal helpers may use whatever error representation is convenient, but
//! anything that crosses a component edge (scheduler -> orchestrator, worker
//! -> protocol, interpreter -> executor) must be mapped into one of these
//! variants first, so every caller can match on a closed set.

use thiserror::Error;

use crate::ResourceId;

#[derive(Debug, Error, Clone)]
pub enum Error {
    /// A `PipelineModel` failed validation (cycle, unknown `needs` target,
    /// unresolvable artifact dependency, duplicate stage name, ...).
    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    /// No resource pool could satisfy a job's requirements within the
    /// configured scheduling deadline.
    #[error("job {job_id} timed out waiting for a schedulable pool after {waited_secs}s")]
    SchedulingTimeout { job_id: ResourceId, waited_secs: u64 },

    /// The instance provider failed to provision a worker instance.
    #[error("failed to provision instance in pool {pool_id}: {cause}")]
    ProvisioningFailed { pool_id: ResourceId, cause: String },

    /// An instance was provisioned but never registered as a live worker
    /// within the configured grace period.
    #[error("worker provisioning for job {job_id} timed out after {waited_secs}s")]
    WorkerProvisioningTimeout { job_id: ResourceId, waited_secs: u64 },

    /// A worker that was bound to a job stopped heartbeating.
    #[error("worker {worker_id} was lost mid-execution of job {job_id}")]
    WorkerLost { worker_id: ResourceId, job_id: ResourceId },

    /// A pipeline step exited with a non-zero/non-success status.
    #[error("stage '{stage}' step '{step}' failed with exit code {exit_code}")]
    StepFailure {
        stage: String,
        step: String,
        exit_code: i32,
    },

    /// A scoped timeout (step, stage, or job) elapsed.
    #[error("timeout exceeded at scope: {0}")]
    Timeout(String),

    /// A stage's `requires` artifact was never produced upstream.
    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    /// Execution was cancelled, cooperatively or forcibly.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Anything else: an invariant violated inside the orchestrator itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable textual code, analogous to an HTTP status but independent of
    /// any transport -- used in logs, events, and job failure records.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidDefinition(_) => "E_INVALID_DEFINITION",
            Error::SchedulingTimeout { .. } => "E_SCHEDULING_TIMEOUT",
            Error::ProvisioningFailed { .. } => "E_PROVISIONING_FAILED",
            Error::WorkerProvisioningTimeout { .. } => "E_WORKER_PROVISIONING_TIMEOUT",
            Error::WorkerLost { .. } => "E_WORKER_LOST",
            Error::StepFailure { .. } => "E_STEP_FAILURE",
            Error::Timeout(_) => "E_TIMEOUT",
            Error::MissingArtifact(_) => "E_MISSING_ARTIFACT",
            Error::Cancelled(_) => "E_CANCELLED",
            Error::Internal(_) => "E_INTERNAL",
        }
    }

    /// Whether retrying the same job is plausibly useful, as opposed to a
    /// definition error the caller must fix before resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SchedulingTimeout { .. }
                | Error::ProvisioningFailed { .. }
                | Error::WorkerProvisioningTimeout { .. }
                | Error::WorkerLost { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Internal("x".into()).code(), "E_INTERNAL");
        assert_eq!(
            Error::MissingArtifact("bin".into()).code(),
            "E_MISSING_ARTIFACT"
        );
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(Error::SchedulingTimeout {
            job_id: ResourceId::new(),
            waited_secs: 5
        }
        .is_retryable());
        assert!(!Error::InvalidDefinition("bad".into()).is_retryable());
    }
}
