//! Per-connection control loop for the global presence endpoint.
//!
//! On entering `Active` the handler snapshots the user's follower set, hands
//! it to the presence registry (which broadcasts the online transition), and
//! answers with the currently-online subset of the user's followees. After
//! that the only inbound frame is `heartbeat`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::UserId;
use crate::state::AppState;
use crate::websocket::chat_session::TokenParams;
use crate::websocket::frames::{encode, PresenceEvent, PresenceFrame};
use crate::websocket::presence::{PresenceConnection, PresenceRegistry};
use crate::websocket::CLOSE_INVALID_TOKEN;

pub async fn presence_ws_handler(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| presence_session(state, params.token, socket))
}

async fn presence_session(state: AppState, token: String, mut socket: WebSocket) {
    let user = match state.auth.authenticate(&token).await {
        Ok(user) => user,
        Err(_) => {
            let _ = socket
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: CLOSE_INVALID_TOKEN,
                    reason: "Invalid token".into(),
                })))
                .await;
            return;
        }
    };

    // Both follow-graph reads happen before registration so a failing
    // collaborator closes the socket without ever marking the user online.
    let follower_ids = match state.follows.follower_ids(user.id).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(error = %e, user_id = user.id, "follower lookup failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let followee_ids = match state.follows.followee_ids(user.id).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(error = %e, user_id = user.id, "followee lookup failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let session_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    state
        .presence
        .connect(
            user.id,
            PresenceConnection::new(session_id, tx),
            follower_ids,
            user.profile.clone(),
        )
        .await;
    info!(user_id = user.id, "user connected to presence");

    let _guard = PresenceGuard {
        registry: state.presence.clone(),
        user_id: user.id,
        session_id,
    };

    let online = state.presence.online_subset_of(&followee_ids).await;
    let online_users = state.presence.online_profiles(&online).await;
    if let Some(payload) = encode(&PresenceEvent::InitialOnlineList { online_users }) {
        if socket.send(Message::Text(payload)).await.is_err() {
            return;
        }
    }

    run_presence_loop(socket, rx).await;
}

async fn run_presence_loop(socket: WebSocket, mut rx: UnboundedReceiver<Message>) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    Some(msg) => {
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(PresenceFrame::Heartbeat) =
                            serde_json::from_str::<PresenceFrame>(&text)
                        {
                            let Some(payload) = encode(&PresenceEvent::HeartbeatAck) else {
                                continue;
                            };
                            if sender.send(Message::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

/// Mirrors `RoomGuard` in the chat session: the disconnect (and the offline
/// broadcast it triggers for the last socket) runs on a spawned task so it
/// cannot be cancelled partway.
struct PresenceGuard {
    registry: PresenceRegistry,
    user_id: UserId,
    session_id: Uuid,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let user_id = self.user_id;
        let session_id = self.session_id;
        tokio::spawn(async move {
            registry.disconnect(user_id, session_id).await;
        });
    }
}
