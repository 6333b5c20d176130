use std::sync::Arc;

use vextra_realtime_service::{
    config::Config,
    error::AppError,
    logging, routes,
    services::{auth_gate::JwtAuthGate, follow_graph::PgFollowGraph, message_store::PgMessageStore},
    state::AppState,
    websocket::{presence::PresenceRegistry, ConversationRegistry},
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Config::from_env()?;

    let db = sqlx::postgres::PgPoolOptions::new()
        .max_connections(cfg.database_max_connections)
        .connect(&cfg.database_url)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    let state = AppState {
        rooms: ConversationRegistry::new(),
        presence: PresenceRegistry::new(),
        auth: Arc::new(JwtAuthGate::new(&cfg.jwt_secret, db.clone())),
        store: Arc::new(PgMessageStore::new(db.clone())),
        follows: Arc::new(PgFollowGraph::new(db)),
    };

    let app = routes::build_router().with_state(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting vextra-realtime-service");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;

    Ok(())
}
