//! The operator-facing HTTP surface: health check and job submission.
//! Everything else (status, logs) flows over the worker wire protocol and
//! is read back via `Orchestrator::describe`/`events_for` from whatever
//! consumer embeds this crate -- no REST CRUD surface ships here (spec.md
//! §1 excludes a dashboard/API product).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hodei_core::job::JobDefinition;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::ws_handler;

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub name: String,
    pub definition: JobDefinition,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Result<Json<SubmitResponse>, ApiError> {
    let job = state
        .orchestrator
        .submit(req.name, req.definition, req.priority)
        .await?;
    Ok(Json(SubmitResponse { job_id: job.id.to_string() }))
}

async fn describe(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let job_id: hodei_core::ResourceId = job_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;
    let job = state
        .orchestrator
        .describe(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no such job {job_id}")))?;
    Ok(Json(serde_json::to_value(job).expect("Job serializes")))
}

async fn cancel(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    let job_id: hodei_core::ResourceId = job_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;
    state.orchestrator.cancel(job_id, "operator cancel").await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/jobs", post(submit))
        .route("/jobs/{job_id}", get(describe))
        .route("/jobs/{job_id}/cancel", post(cancel))
        .route("/worker/ws", get(ws_handler))
        .with_state(state)
}
