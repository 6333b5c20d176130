use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;
use crate::websocket::{chat_session, presence_session};

pub mod presence_rest;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/ws/chat/:conversation_id",
            get(chat_session::chat_ws_handler),
        )
        .route(
            "/api/v1/presence/ws",
            get(presence_session::presence_ws_handler),
        )
        .route(
            "/api/v1/presence/following/online",
            get(presence_rest::online_following),
        )
}
