use std::sync::Arc;

use crate::services::{AuthGate, FollowGraph, MessageStore};
use crate::websocket::presence::PresenceRegistry;
use crate::websocket::ConversationRegistry;

/// Shared handles injected into every session handler. Registries are
/// created once at process start; collaborators are trait objects so tests
/// can swap in-memory fakes for the Postgres-backed implementations.
#[derive(Clone)]
pub struct AppState {
    pub rooms: ConversationRegistry,
    pub presence: PresenceRegistry,
    pub auth: Arc<dyn AuthGate>,
    pub store: Arc<dyn MessageStore>,
    pub follows: Arc<dyn FollowGraph>,
}
