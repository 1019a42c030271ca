//! Thin REST mirror of the WebSocket operations.
//!
//! Every handler delegates to the same `ThreadManager` methods — no business
//! logic lives here. Errors surface as JSON `{ "error": ... }` bodies.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::manager::ThreadManager;
use crate::threads::lifecycle::AcceptOutcome;
use crate::tools::WorkerSpawner;

pub fn router(manager: Arc<ThreadManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/threads", get(list_threads).post(create_thread))
        .route("/api/threads/{id}", get(get_thread).delete(delete_thread))
        .route("/api/threads/{id}/messages", get(list_messages))
        .route("/api/threads/{id}/accept", post(accept_thread))
        .route("/api/threads/{id}/reject", post(reject_thread))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_threads(
    State(manager): State<Arc<ThreadManager>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let threads = manager.list_threads().await?;
    Ok(Json(json!({ "threads": threads })))
}

#[derive(Deserialize)]
struct CreateThread {
    name: String,
    goal: String,
    #[serde(default = "default_owner")]
    owner_id: String,
}

fn default_owner() -> String {
    "api".to_string()
}

async fn create_thread(
    State(manager): State<Arc<ThreadManager>>,
    Json(req): Json<CreateThread>,
) -> Result<Response, ApiError> {
    let thread = manager
        .spawn_worker(&req.owner_id, &req.name, &req.goal)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "thread": thread }))).into_response())
}

async fn get_thread(
    State(manager): State<Arc<ThreadManager>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match manager.get_thread(&id).await? {
        Some(thread) => Ok(Json(json!({ "thread": thread })).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("thread '{id}' not found") })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
struct MessagesQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_messages(
    State(manager): State<Arc<ThreadManager>>,
    Path(id): Path<String>,
    Query(q): Query<MessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let messages = manager.list_thread_messages(&id, q.limit).await?;
    Ok(Json(json!({ "messages": messages })))
}

async fn accept_thread(
    State(manager): State<Arc<ThreadManager>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = manager.accept_thread(&id).await?;
    let (code, body) = match outcome {
        AcceptOutcome::Merged => (StatusCode::OK, json!({ "result": "merged" })),
        AcceptOutcome::Conflict { message } => (
            StatusCode::CONFLICT,
            json!({ "result": "conflict", "message": message }),
        ),
        AcceptOutcome::Error { message } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "result": "error", "message": message }),
        ),
    };
    Ok((code, Json(body)).into_response())
}

async fn reject_thread(
    State(manager): State<Arc<ThreadManager>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rejected = manager.reject_thread(&id).await?;
    Ok(Json(json!({ "rejected": rejected })))
}

async fn delete_thread(
    State(manager): State<Arc<ThreadManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    manager.delete_thread(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
