//! Service health endpoint.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::router::RouterState;

/// `GET /health` — service liveness plus live dependency probes.
///
/// `supabase_connected` and `ollama_reachable` are checked per call; the
/// endpoint itself always answers 200 so orchestrators can distinguish
/// "service down" from "dependency down".
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let supabase_connected = state.registry.is_connected().await;
    let ollama_reachable = state.adapters.local.is_reachable().await;

    Json(json!({
        "status": "ok",
        "service": "tier-router",
        "supabase_connected": supabase_connected,
        "ollama_reachable": ollama_reachable,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
