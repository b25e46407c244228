//! The single bidirectional streaming RPC between worker and orchestrator
//! (spec.md §6). Every message is one variant of a discriminated union,
//! tagged the same way `hodei-orchestrator`'s (legacy `BroadcastEvent`)
//! dashboard channel tags its events -- `#[serde(tag = "type")]`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hodei_core::artifact::Encoding;
use hodei_core::pipeline::PipelineModel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEventType {
    StageStarted,
    StepStarted,
    StepCompleted,
    StageCompleted,
}

/// Messages a worker sends to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    RegisterRequest {
        worker_id: String,
        capabilities: Vec<String>,
        resources: HashMap<String, String>,
    },
    /// Any message implicitly resets the liveness timer; this variant
    /// exists for the case where the worker has nothing else to report.
    Heartbeat { timestamp: DateTime<Utc> },
    StatusUpdate {
        event_type: StatusEventType,
        name: String,
        timestamp: DateTime<Utc>,
        detail: Option<String>,
    },
    LogChunk {
        stream: LogStream,
        bytes: Vec<u8>,
    },
    ExecutionResult {
        success: bool,
        exit_code: Option<i32>,
        details: Option<String>,
    },
    ArtifactAck {
        artifact_id: String,
        cached: bool,
        checksum: String,
    },
    CacheQueryResponse {
        entries: Vec<CacheEntryStatus>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryStatus {
    pub artifact_id: String,
    pub present: bool,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredArtifact {
    pub id: String,
    pub destination_path: String,
}

/// Messages the orchestrator sends to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorMessage {
    ExecutionAssignment {
        execution_id: String,
        definition: PipelineModel,
        env: HashMap<String, String>,
        required_artifacts: Vec<RequiredArtifact>,
    },
    CancelSignal {
        reason: String,
    },
    /// One chunk of a chunked artifact transfer. `encoding` is per-chunk so
    /// `gzip` can be negotiated additively over the mandatory `raw` default
    /// (spec.md §9).
    Artifact {
        artifact_id: String,
        chunk_index: u32,
        is_last: bool,
        bytes: Vec<u8>,
        encoding: Encoding,
    },
    CacheQuery {
        artifact_ids: Vec<String>,
    },
}
