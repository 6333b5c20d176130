use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{ConversationId, UserId};
use crate::websocket::frames::{encode, ChatEvent};

pub mod chat_session;
pub mod frames;
pub mod presence;
pub mod presence_session;

/// Close code sent when the bearer credential is missing or invalid.
pub const CLOSE_INVALID_TOKEN: u16 = 4001;
/// Close code sent when the authenticated user is not a conversation
/// participant (chat endpoint only).
pub const CLOSE_NOT_PARTICIPANT: u16 = 4004;

/// Sender half of one live chat socket, tagged with the session that owns it.
/// The session task owns the socket itself and pumps queued frames into it.
#[derive(Debug, Clone)]
pub struct RoomConnection {
    pub session_id: Uuid,
    pub tx: UnboundedSender<Message>,
}

impl RoomConnection {
    pub fn new(session_id: Uuid, tx: UnboundedSender<Message>) -> Self {
        Self { session_id, tx }
    }
}

/// Live connections per conversation: conversation_id -> user_id -> connection.
/// A user holds at most one connection per room.
#[derive(Default, Clone)]
pub struct ConversationRegistry {
    inner: Arc<RwLock<HashMap<ConversationId, HashMap<UserId, RoomConnection>>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `conn` for the user, returning any superseded connection.
    /// Last writer wins; closing the superseded socket is the caller's job.
    pub async fn register(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        conn: RoomConnection,
    ) -> Option<RoomConnection> {
        let mut guard = self.inner.write().await;
        let replaced = guard
            .entry(conversation_id)
            .or_default()
            .insert(user_id, conn);
        if replaced.is_some() {
            debug!(conversation_id, user_id, "replacing existing room connection");
        }
        replaced
    }

    /// Removes the user's entry if it still belongs to `session_id`, pruning
    /// the room once it has no connections left. Returns whether an entry was
    /// removed; a superseded session's cleanup finds someone else's entry and
    /// removes nothing.
    pub async fn unregister(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        session_id: Uuid,
    ) -> bool {
        let mut guard = self.inner.write().await;
        let Some(room) = guard.get_mut(&conversation_id) else {
            return false;
        };
        let removed = match room.get(&user_id) {
            Some(conn) if conn.session_id == session_id => {
                room.remove(&user_id);
                true
            }
            _ => false,
        };
        if room.is_empty() {
            guard.remove(&conversation_id);
        }
        removed
    }

    /// Best-effort delivery to a single participant. An offline recipient is
    /// a silent no-op; a dead channel is logged and swallowed.
    pub async fn send_to(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        event: &ChatEvent,
    ) {
        let Some(payload) = encode(event) else { return };
        let conn = {
            let guard = self.inner.read().await;
            guard
                .get(&conversation_id)
                .and_then(|room| room.get(&user_id))
                .cloned()
        };
        if let Some(conn) = conn {
            if conn.tx.send(Message::Text(payload)).is_err() {
                warn!(conversation_id, user_id, "dropping frame for dead chat connection");
            }
        }
    }

    /// Best-effort fan-out to every participant except `exclude`. Recipients
    /// are snapshotted under the lock and delivered after it is released, so
    /// one slow or dead connection cannot stall the room; per-recipient
    /// failures are logged and skipped.
    pub async fn broadcast(
        &self,
        conversation_id: ConversationId,
        event: &ChatEvent,
        exclude: Option<UserId>,
    ) {
        let Some(payload) = encode(event) else { return };
        let recipients: Vec<(UserId, RoomConnection)> = {
            let guard = self.inner.read().await;
            match guard.get(&conversation_id) {
                Some(room) => room
                    .iter()
                    .filter(|(id, _)| exclude != Some(**id))
                    .map(|(id, conn)| (*id, conn.clone()))
                    .collect(),
                None => return,
            }
        };
        for (user_id, conn) in recipients {
            if conn.tx.send(Message::Text(payload.clone())).is_err() {
                warn!(conversation_id, user_id, "dropping frame for dead chat connection");
            }
        }
    }

    pub async fn online_user_ids(&self, conversation_id: ConversationId) -> HashSet<UserId> {
        let guard = self.inner.read().await;
        guard
            .get(&conversation_id)
            .map(|room| room.keys().copied().collect())
            .unwrap_or_default()
    }
}
