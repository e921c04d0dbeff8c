use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;
use std::sync::Arc;

/// Create the websocket router
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/stream", get(ws::ws_stream_handler))
        .route("/ws/upload", get(ws::ws_upload_handler))
        .layer(TraceLayer::new_for_http())
}
