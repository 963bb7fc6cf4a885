use anyhow::Result;
use std::time::Duration;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    log_requests, make_scan_routes, metrics::metrics_handler, state::*, RequestsLoggingLevel,
    ServerConfig,
};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

pub fn make_app(
    config: ServerConfig,
    scan_manager: GuardedScanManager,
    task_executor: GuardedTaskExecutor,
) -> Router {
    let state = ServerState::new(config, scan_manager, task_executor);

    let home_router: Router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    home_router
        .nest("/v1", make_scan_routes(state.clone()))
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    scan_manager: GuardedScanManager,
    task_executor: GuardedTaskExecutor,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let config = ServerConfig {
        port,
        requests_logging_level,
    };
    let app = make_app(config, scan_manager, task_executor);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
