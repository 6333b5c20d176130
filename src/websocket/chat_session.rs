//! Per-connection control loop for the conversation chat endpoint.
//!
//! `Authenticating -> Active -> Closed`: the credential is resolved and the
//! user's membership verified before the session registers with the room;
//! from then on the loop multiplexes queued room frames with inbound client
//! frames until the socket closes.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::message::NewMessage;
use crate::models::user::AuthenticatedUser;
use crate::models::{ConversationId, UserId};
use crate::state::AppState;
use crate::websocket::frames::{ChatEvent, ChatFrame, MessageBroadcast};
use crate::websocket::{
    ConversationRegistry, RoomConnection, CLOSE_INVALID_TOKEN, CLOSE_NOT_PARTICIPANT,
};

#[derive(Debug, Deserialize)]
pub struct TokenParams {
    #[serde(default)]
    pub token: String,
}

pub async fn chat_ws_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Query(params): Query<TokenParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| chat_session(state, conversation_id, params.token, socket))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn chat_session(
    state: AppState,
    conversation_id: ConversationId,
    token: String,
    mut socket: WebSocket,
) {
    let user = match state.auth.authenticate(&token).await {
        Ok(user) => user,
        Err(_) => {
            close_with(&mut socket, CLOSE_INVALID_TOKEN, "Invalid token").await;
            return;
        }
    };

    match state.store.participant_ids(conversation_id).await {
        Ok(participants) if participants.contains(&user.id) => {}
        Ok(_) => {
            close_with(&mut socket, CLOSE_NOT_PARTICIPANT, "Not a participant").await;
            return;
        }
        Err(e) => {
            error!(error = %e, conversation_id, "participant lookup failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    let session_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(replaced) = state
        .rooms
        .register(conversation_id, user.id, RoomConnection::new(session_id, tx))
        .await
    {
        // Last writer wins; the superseded socket is closed here rather than
        // left to leak. Its unregister is session-id-guarded and will not
        // touch this session's entry.
        warn!(conversation_id, user_id = user.id, "closing superseded chat connection");
        let _ = replaced.tx.send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: "Connection superseded".into(),
        })));
    }
    info!(conversation_id, user_id = user.id, "user connected to chat");

    // Deregistration must survive any exit from the loop below, including
    // cancellation of this task.
    let _guard = RoomGuard {
        registry: state.rooms.clone(),
        conversation_id,
        user_id: user.id,
        session_id,
    };

    state
        .rooms
        .broadcast(
            conversation_id,
            &ChatEvent::OnlineStatus {
                user_id: user.id,
                is_online: true,
            },
            Some(user.id),
        )
        .await;

    run_chat_loop(&state, conversation_id, &user, socket, rx).await;
}

async fn run_chat_loop(
    state: &AppState,
    conversation_id: ConversationId,
    user: &AuthenticatedUser,
    socket: WebSocket,
    mut rx: UnboundedReceiver<Message>,
) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if sender.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<ChatFrame>(&text) else {
                            continue;
                        };
                        if handle_chat_frame(state, conversation_id, user, frame).await.is_err() {
                            // Store failures surface as a closed session; a
                            // half-applied batch is never broadcast.
                            break;
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

async fn handle_chat_frame(
    state: &AppState,
    conversation_id: ConversationId,
    user: &AuthenticatedUser,
    frame: ChatFrame,
) -> AppResult<()> {
    match frame {
        ChatFrame::Message {
            content,
            media_url,
            message_type,
        } => {
            if is_blank(&content) && is_blank(&media_url) {
                // Nothing to deliver; the frame is dropped without a reply.
                return Ok(());
            }
            let stored = state
                .store
                .create_message(NewMessage {
                    conversation_id,
                    sender_id: user.id,
                    content,
                    media_url,
                    kind: message_type,
                })
                .await
                .map_err(|e| {
                    error!(error = %e, conversation_id, "failed to persist message");
                    e
                })?;
            let event = ChatEvent::Message(MessageBroadcast::new(stored, user.profile.clone()));
            // The sender is included: clients render from the server echo.
            state.rooms.broadcast(conversation_id, &event, None).await;
        }
        ChatFrame::ReadReceipt { message_ids } => {
            if message_ids.is_empty() {
                return Ok(());
            }
            let read_at = Utc::now();
            state
                .store
                .mark_read(conversation_id, user.id, &message_ids, read_at)
                .await
                .map_err(|e| {
                    error!(error = %e, conversation_id, "failed to apply read receipt");
                    e
                })?;
            let event = ChatEvent::ReadReceipt {
                user_id: user.id,
                message_ids,
                read_at,
            };
            state
                .rooms
                .broadcast(conversation_id, &event, Some(user.id))
                .await;
        }
        ChatFrame::Typing { is_typing } => {
            let event = ChatEvent::Typing {
                user_id: user.id,
                is_typing,
            };
            state
                .rooms
                .broadcast(conversation_id, &event, Some(user.id))
                .await;
        }
        ChatFrame::Unknown => {}
    }
    Ok(())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.is_empty())
}

/// Deregisters the session when the connection task ends, however it ends.
/// Cleanup runs on a spawned task so cancellation cannot leave a stale room
/// entry; the offline broadcast only fires when this session's entry was the
/// one removed.
struct RoomGuard {
    registry: ConversationRegistry,
    conversation_id: ConversationId,
    user_id: UserId,
    session_id: Uuid,
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let conversation_id = self.conversation_id;
        let user_id = self.user_id;
        let session_id = self.session_id;
        tokio::spawn(async move {
            if registry.unregister(conversation_id, user_id, session_id).await {
                info!(conversation_id, user_id, "user disconnected from chat");
                registry
                    .broadcast(
                        conversation_id,
                        &ChatEvent::OnlineStatus {
                            user_id,
                            is_online: false,
                        },
                        None,
                    )
                    .await;
            }
        });
    }
}
