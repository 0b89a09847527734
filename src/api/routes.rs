//! Route table and request handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{
    error::AppError,
    router::RouterState,
    types::{ExecuteRequest, RouteRequest, RunRequest},
};

/// Build the axum router for the service port.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/health", get(crate::api::health::health))
        .route("/route", post(route))
        .route("/execute", post(execute))
        .route("/run", post(run))
        .with_state(state)
}

/// 422 with a JSON error body; validation failures never reach the executor.
fn validation_error(message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// `POST /run` — the full pipeline: route → execute → log → structured result.
async fn run(
    State(state): State<Arc<RouterState>>,
    Json(request): Json<RunRequest>,
) -> Result<Response, AppError> {
    if let Err(message) = request.validate() {
        return Ok(validation_error(message));
    }
    let result = crate::router::handle_run(&state, request).await;
    Ok(Json(result).into_response())
}

/// `POST /route` — routing decision only, no execution.
async fn route(
    State(state): State<Arc<RouterState>>,
    Json(request): Json<RouteRequest>,
) -> Result<Response, AppError> {
    if let Err(message) = request.validate() {
        return Ok(validation_error(message));
    }
    let body = crate::router::handle_route(&state, request).await;
    Ok(Json(body).into_response())
}

/// `POST /execute` — direct execution on a specific tier.
async fn execute(
    State(state): State<Arc<RouterState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, AppError> {
    if let Err(message) = request.validate() {
        return Ok(validation_error(message));
    }
    let body = crate::router::handle_execute(&state, request).await;
    Ok(Json(body).into_response())
}
