//! HTTP route handlers.

use anyhow::Context;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use envrun::core::request::{JobRequest, JobResponse};
use envrun::core::types::PackageRecord;
use envrun::job::{environment_snapshot, known_environments, run_job};
use serde::Serialize;
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the application with its middleware.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/health", get(health))
        .route("/envs", get(list_envs))
        .route("/envs/{name}/packages", get(get_packages))
}

async fn health() -> &'static str {
    "ok"
}

/// POST / - install (optional), run, and return the combined result.
///
/// Subprocess calls block, so the job runs on the blocking pool.
async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let response =
        task::spawn_blocking(move || run_job(state.runner.as_ref(), &state.config, &request))
            .await
            .context("join job task")??;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Serialize)]
struct EnvsResponse {
    envs: Vec<String>,
}

/// GET /envs - environment names jobs may target.
async fn list_envs(State(state): State<AppState>) -> Result<Json<EnvsResponse>, ApiError> {
    let envs = task::spawn_blocking(move || known_environments(state.runner.as_ref(), &state.config))
        .await
        .context("join listing task")??;
    Ok(Json(EnvsResponse { envs }))
}

/// GET /envs/{name}/packages - current package snapshot of one environment.
async fn get_packages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<PackageRecord>>, ApiError> {
    let snapshot = task::spawn_blocking(move || {
        environment_snapshot(state.runner.as_ref(), &state.config, &name)
    })
    .await
    .context("join snapshot task")??;
    Ok(Json(snapshot.records().to_vec()))
}
