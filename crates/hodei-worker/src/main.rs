//! Hodei Pipelines worker.

use std::path::PathBuf;
use std::time::Duration;

use hodei_worker::{WorkerIdentity, WorkerRuntime};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let url = std::env::var("HODEI_ORCHESTRATOR_URL").unwrap_or_else(|_| "ws://127.0.0.1:7700/worker/ws".to_string());
    let worker_id = std::env::var("HODEI_WORKER_ID").unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4()));
    let capabilities = std::env::var("HODEI_WORKER_CAPABILITIES")
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let work_dir = std::env::var("HODEI_WORKER_WORKDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("hodei-worker"));
    let heartbeat_secs: u64 = std::env::var("HODEI_WORKER_HEARTBEAT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    std::fs::create_dir_all(&work_dir)?;

    info!(worker_id = %worker_id, url = %url, "starting worker");

    let runtime = WorkerRuntime::new(
        WorkerIdentity { worker_id, capabilities },
        work_dir,
        Duration::from_secs(heartbeat_secs),
    );

    let mut backoff = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);
    loop {
        match runtime.run(&url).await {
            Ok(()) => {
                info!("connection closed, reconnecting");
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                error!(error = %e, "connection failed");
            }
        }
        warn!(seconds = backoff.as_secs(), "retrying connection");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
