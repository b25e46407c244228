//! Hodei Pipelines orchestrator.

use std::net::SocketAddr;
use std::time::Duration;

use hodei_config::system::{parse_system_config, SystemConfig};
use hodei_orchestrator::{routes, AppState};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = load_config()?;
    info!(pools = config.pools.len(), strategy = %config.scheduler.strategy, "loaded system configuration");

    let state = AppState::new(config).await;

    spawn_scheduler_loop(state.clone());
    spawn_heartbeat_sweep(state.clone());

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = SocketAddr::from(([0, 0, 0, 0], 7700));
    info!("starting orchestrator on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn load_config() -> anyhow::Result<SystemConfig> {
    match std::env::var("HODEI_CONFIG_PATH") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)?;
            Ok(parse_system_config(&text)?)
        }
        Err(_) => Ok(SystemConfig::default()),
    }
}

fn spawn_scheduler_loop(state: AppState) {
    let interval = state.config.scheduler.tick_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            state.engine.tick().await;
        }
    });
}

fn spawn_heartbeat_sweep(state: AppState) {
    let interval = state.config.heartbeat.interval;
    let missed_beats = state.config.heartbeat.missed_beats;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            state.engine.sweep_lost_workers(interval, missed_beats).await;
        }
    });
}
