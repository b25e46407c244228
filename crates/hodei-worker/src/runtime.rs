//! The worker connection loop: registers with the orchestrator, then
//! dispatches `OrchestratorMessage`s to one running pipeline at a time while
//! forwarding its `EventKind` stream back as `WorkerMessage`s.
//!
//! Shaped after `hodei-orchestrator`'s `ws.rs` -- the same `tokio::select!`
//! between inbound frames and an outbound channel -- generalized from the
//! server's per-connection fan-out to a single client-side session that owns
//! exactly one assignment at a time (spec.md §6, P4: at-most-one-assignment).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hodei_config::variables::VariableContextBuilder;
use hodei_core::event::EventKind;
use hodei_interpreter::Interpreter;
use hodei_protocol::messages::{LogStream, OrchestratorMessage, RequiredArtifact, StatusEventType, WorkerMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::ArtifactCache;

pub struct WorkerIdentity {
    pub worker_id: String,
    pub capabilities: Vec<String>,
}

pub struct WorkerRuntime {
    identity: WorkerIdentity,
    interpreter: Arc<Interpreter>,
    cache: Arc<ArtifactCache>,
    work_dir: PathBuf,
    heartbeat_interval: Duration,
}

impl WorkerRuntime {
    pub fn new(identity: WorkerIdentity, work_dir: PathBuf, heartbeat_interval: Duration) -> Self {
        Self {
            identity,
            interpreter: Arc::new(Interpreter::new()),
            cache: Arc::new(ArtifactCache::new()),
            work_dir,
            heartbeat_interval,
        }
    }

    /// Connects to `url`, registers, and runs the session loop until the
    /// connection drops. Callers reconnect around this with their own
    /// backoff; one call is exactly one connection lifetime.
    pub async fn run(&self, url: &str) -> anyhow::Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sender, mut receiver) = ws_stream.split();

        let register = WorkerMessage::RegisterRequest {
            worker_id: self.identity.worker_id.clone(),
            capabilities: self.identity.capabilities.clone(),
            resources: Default::default(),
        };
        send(&mut sender, &register).await?;
        info!(worker_id = %self.identity.worker_id, "registered with orchestrator");

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        let active_job = ActiveJob::default();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = WorkerMessage::Heartbeat { timestamp: chrono::Utc::now() };
                    if send(&mut sender, &beat).await.is_err() {
                        break;
                    }
                }
                outbound = active_job.next_outbound() => {
                    if let Some(message) = outbound {
                        if send(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                }
                frame = receiver.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<OrchestratorMessage>(&text) {
                                Ok(parsed) => {
                                    self.handle_orchestrator_message(parsed, &active_job).await;
                                }
                                Err(e) => warn!(error = %e, "malformed orchestrator message"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("orchestrator closed the connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        active_job.cancel();
        Ok(())
    }

    async fn handle_orchestrator_message(&self, message: OrchestratorMessage, active_job: &ActiveJob) {
        match message {
            OrchestratorMessage::ExecutionAssignment { execution_id, definition, env, required_artifacts } => {
                self.start_execution(execution_id, definition, env, required_artifacts, active_job).await;
            }
            OrchestratorMessage::CancelSignal { reason } => {
                info!(reason = %reason, "cancel signal received");
                active_job.cancel();
            }
            OrchestratorMessage::Artifact { artifact_id, chunk_index, is_last, bytes, .. } => {
                self.receive_artifact_chunk(&artifact_id, chunk_index, is_last, &bytes, active_job).await;
            }
            OrchestratorMessage::CacheQuery { artifact_ids } => {
                self.answer_cache_query(artifact_ids, active_job).await;
            }
        }
    }

    async fn start_execution(
        &self,
        execution_id: String,
        definition: hodei_core::pipeline::PipelineModel,
        env: std::collections::HashMap<String, String>,
        required_artifacts: Vec<RequiredArtifact>,
        active_job: &ActiveJob,
    ) {
        for required in &required_artifacts {
            if !self.cache.contains(&required.id).await {
                warn!(artifact = %required.id, "required artifact not yet in local cache; job may stall awaiting transfer");
            }
        }

        let mut ctx_builder = VariableContextBuilder::new();
        for (k, v) in &env {
            ctx_builder = ctx_builder.with_env(k, v);
        }
        let mut ctx = ctx_builder.build();
        ctx.populate_process_env();

        let cancel = CancellationToken::new();
        let job_id = hodei_core::ResourceId::new();
        let (rx, handle) = self.interpreter.clone().execute(
            job_id,
            definition,
            ctx,
            self.work_dir.join(&execution_id),
            cancel.clone(),
        );

        active_job.install(cancel, rx, handle).await;
    }

    async fn receive_artifact_chunk(&self, artifact_id: &str, chunk_index: u32, is_last: bool, bytes: &[u8], active_job: &ActiveJob) {
        match self.cache.feed(artifact_id, chunk_index, is_last, bytes).await {
            Ok(Some(_)) => {
                // Just reassembled from transferred chunks, never a cache hit;
                // a hit is reported via CacheQuery/CacheQueryResponse instead.
                active_job.queue_outbound(WorkerMessage::ArtifactAck {
                    artifact_id: artifact_id.to_string(),
                    cached: false,
                    checksum: artifact_id.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) => warn!(artifact = %artifact_id, error = %e, "artifact reassembly failed"),
        }
    }

    async fn answer_cache_query(&self, artifact_ids: Vec<String>, active_job: &ActiveJob) {
        let mut entries = Vec::with_capacity(artifact_ids.len());
        for id in artifact_ids {
            let present = self.cache.contains(&id).await;
            entries.push(hodei_protocol::messages::CacheEntryStatus { artifact_id: id, present, checksum: None });
        }
        active_job.queue_outbound(WorkerMessage::CacheQueryResponse { entries });
    }
}

async fn send(
    sender: &mut futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    message: &WorkerMessage,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Tracks the single in-flight pipeline execution, if any, bridging its
/// `EventKind` stream and final result into outbound `WorkerMessage`s.
#[derive(Default)]
struct ActiveJob {
    inner: tokio::sync::Mutex<Option<Inner>>,
    notify: tokio::sync::Notify,
}

struct Inner {
    cancel: CancellationToken,
    rx: mpsc::Receiver<EventKind>,
    handle: tokio::task::JoinHandle<hodei_core::Result<hodei_interpreter::PipelineResult>>,
    pending: Vec<WorkerMessage>,
    done: bool,
}

impl ActiveJob {
    async fn install(
        &self,
        cancel: CancellationToken,
        rx: mpsc::Receiver<EventKind>,
        handle: tokio::task::JoinHandle<hodei_core::Result<hodei_interpreter::PipelineResult>>,
    ) {
        let mut guard = self.inner.lock().await;
        *guard = Some(Inner { cancel, rx, handle, pending: Vec::new(), done: false });
        drop(guard);
        self.notify.notify_one();
    }

    fn cancel(&self) {
        if let Ok(guard) = self.inner.try_lock() {
            if let Some(job) = guard.as_ref() {
                job.cancel.cancel();
            }
        }
    }

    fn queue_outbound(&self, message: WorkerMessage) {
        if let Ok(mut guard) = self.inner.try_lock() {
            if let Some(job) = guard.as_mut() {
                job.pending.push(message);
                self.notify.notify_one();
                return;
            }
        }
        // No execution in flight to attach the message to (e.g. an artifact
        // ack before any job started); drop it, mirroring how an idle
        // worker has nothing to report against.
        let _ = message;
    }

    /// Waits for the next message to send, parking on `notify` while no
    /// execution is installed rather than spinning the caller's select loop.
    async fn next_outbound(&self) -> Option<WorkerMessage> {
        loop {
            let mut guard = self.inner.lock().await;
            let Some(job) = guard.as_mut() else {
                drop(guard);
                self.notify.notified().await;
                continue;
            };

            if let Some(message) = job.pending.pop() {
                return Some(message);
            }
            if job.done {
                drop(guard);
                self.notify.notified().await;
                continue;
            }

            match job.rx.recv().await {
                Some(kind) => return Some(event_to_message(kind)),
                None => {
                    let result = (&mut job.handle).await;
                    job.done = true;
                    return Some(result_to_message(result));
                }
            }
        }
    }
}

fn event_to_message(kind: EventKind) -> WorkerMessage {
    match kind {
        EventKind::StageStarted { stage } => WorkerMessage::StatusUpdate {
            event_type: StatusEventType::StageStarted,
            name: stage,
            timestamp: chrono::Utc::now(),
            detail: None,
        },
        EventKind::StageCompleted { stage, outcome } => WorkerMessage::StatusUpdate {
            event_type: StatusEventType::StageCompleted,
            name: stage,
            timestamp: chrono::Utc::now(),
            detail: Some(outcome),
        },
        EventKind::StageFailed { stage, message } => WorkerMessage::StatusUpdate {
            event_type: StatusEventType::StageCompleted,
            name: stage,
            timestamp: chrono::Utc::now(),
            detail: Some(message),
        },
        EventKind::StepOutput { stream, chunk } => WorkerMessage::LogChunk {
            stream: if stream == "Stderr" { LogStream::Stderr } else { LogStream::Stdout },
            bytes: chunk.into_bytes(),
        },
        other => WorkerMessage::StatusUpdate {
            event_type: StatusEventType::StepCompleted,
            name: format!("{other:?}"),
            timestamp: chrono::Utc::now(),
            detail: None,
        },
    }
}

fn result_to_message(result: Result<hodei_core::Result<hodei_interpreter::PipelineResult>, tokio::task::JoinError>) -> WorkerMessage {
    match result {
        Ok(Ok(pipeline_result)) => WorkerMessage::ExecutionResult {
            success: pipeline_result.success,
            exit_code: Some(if pipeline_result.success { 0 } else { 1 }),
            details: None,
        },
        Ok(Err(e)) => WorkerMessage::ExecutionResult { success: false, exit_code: None, details: Some(e.to_string()) },
        Err(e) => WorkerMessage::ExecutionResult { success: false, exit_code: None, details: Some(format!("interpreter task panicked: {e}")) },
    }
}
