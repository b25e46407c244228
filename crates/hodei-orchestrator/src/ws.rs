//! The worker connection endpoint (spec.md §6): one WebSocket per worker,
//! carrying the bidirectional `WorkerMessage`/`OrchestratorMessage` wire
//! protocol. Shaped after the teacher's `handle_socket` -- a `tokio::select!`
//! between inbound client frames and an outbound channel -- generalized
//! from one-way broadcast to per-connection dispatch.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use hodei_core::event::EventKind;
use hodei_protocol::{OrchestratorMessage, WorkerMessage};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // The first frame must be a RegisterRequest; anything else is a
    // protocol violation and the connection is dropped.
    let Some(Ok(Message::Text(text))) = receiver.next().await else {
        warn!("worker connection closed before registering");
        return;
    };
    let Ok(WorkerMessage::RegisterRequest { worker_id: declared_id, capabilities, .. }) =
        serde_json::from_str::<WorkerMessage>(&text)
    else {
        warn!("first frame from worker was not a RegisterRequest");
        return;
    };

    let (tx, mut rx) = mpsc::channel::<OrchestratorMessage>(256);
    let caps = hodei_core::worker::Capabilities {
        labels: capabilities.into_iter().collect(),
        attributes: Default::default(),
    };
    // A worker with no pre-assigned pool registers into the default pool;
    // production deployments pin pool membership via the declared worker id
    // prefix or an out-of-band pool token (left to the operator's config).
    let pool_id = state.default_pool_id;
    let worker_id = state
        .workers
        .register(pool_id, caps, declared_id, tx)
        .await;
    info!(worker_id = %worker_id, "worker registered");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WorkerMessage>(&text) {
                            Ok(parsed) => handle_worker_message(&state, worker_id, parsed).await,
                            Err(e) => warn!(worker_id = %worker_id, error = %e, "malformed worker message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(worker_id = %worker_id, "worker disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(worker_id = %worker_id, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        if let Ok(json) = serde_json::to_string(&message) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.workers.disconnect(worker_id).await;
}

async fn handle_worker_message(state: &AppState, worker_id: hodei_core::ResourceId, message: WorkerMessage) {
    match message {
        WorkerMessage::RegisterRequest { .. } => {
            warn!(worker_id = %worker_id, "unexpected repeated RegisterRequest, ignoring");
        }
        WorkerMessage::Heartbeat { .. } => {
            state.workers.heartbeat(worker_id).await;
        }
        WorkerMessage::StatusUpdate { .. } => {
            state.workers.heartbeat(worker_id).await;
        }
        WorkerMessage::LogChunk { stream, bytes } => {
            if let Some(job_id) = state
                .workers
                .get(worker_id)
                .await
                .and_then(|w| w.current_job_id)
            {
                let chunk = String::from_utf8_lossy(&bytes).to_string();
                state
                    .orchestrator
                    .record(job_id, EventKind::StepOutput { stream: format!("{stream:?}"), chunk })
                    .await;
            }
        }
        WorkerMessage::ExecutionResult { success, exit_code, details } => {
            if let Some(job_id) = state
                .workers
                .get(worker_id)
                .await
                .and_then(|w| w.current_job_id)
            {
                let result = if success {
                    state.orchestrator.mark_completed(job_id, exit_code.unwrap_or(0)).await
                } else {
                    state
                        .orchestrator
                        .mark_failed(job_id, details.unwrap_or_else(|| "execution failed".to_string()))
                        .await
                };
                if let Err(e) = result {
                    warn!(job_id = %job_id, error = %e, "failed to record execution result");
                }
            }
            state.workers.release(worker_id).await;
        }
        WorkerMessage::ArtifactAck { .. } | WorkerMessage::CacheQueryResponse { .. } => {
            state.workers.heartbeat(worker_id).await;
        }
    }
}
