use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::core::asr::PoolStats;
use crate::state::AppState;

pub async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "OK"
    })))
}

/// Snapshot of the ASR connection pool.
pub async fn pool_stats(State(state): State<Arc<AppState>>) -> Json<PoolStats> {
    Json(state.pool.stats().await)
}
