#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vextra_realtime_service::error::{AppError, AppResult};
use vextra_realtime_service::models::message::{MessageKind, NewMessage, StoredMessage};
use vextra_realtime_service::models::user::{AuthenticatedUser, ProfileSummary};
use vextra_realtime_service::models::{ConversationId, MessageId, UserId};
use vextra_realtime_service::routes;
use vextra_realtime_service::services::{AuthGate, FollowGraph, MessageStore};
use vextra_realtime_service::state::AppState;
use vextra_realtime_service::websocket::presence::PresenceRegistry;
use vextra_realtime_service::websocket::ConversationRegistry;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_user(id: UserId, username: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        id,
        profile: ProfileSummary {
            id,
            username: Some(username.to_string()),
            full_name: None,
            profile_picture: None,
        },
    }
}

/// Token -> identity table standing in for the auth service.
pub struct StaticAuthGate {
    users: HashMap<String, AuthenticatedUser>,
}

impl StaticAuthGate {
    pub fn new(users: impl IntoIterator<Item = (&'static str, AuthenticatedUser)>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|(token, user)| (token.to_string(), user))
                .collect(),
        }
    }
}

#[async_trait]
impl AuthGate for StaticAuthGate {
    async fn authenticate(&self, token: &str) -> AppResult<AuthenticatedUser> {
        self.users.get(token).cloned().ok_or(AppError::Unauthorized)
    }
}

/// Fixed follow edges, stored as (follower, followee).
pub struct InMemoryFollowGraph {
    edges: HashSet<(UserId, UserId)>,
}

impl InMemoryFollowGraph {
    pub fn new(edges: impl IntoIterator<Item = (UserId, UserId)>) -> Self {
        Self {
            edges: edges.into_iter().collect(),
        }
    }
}

#[async_trait]
impl FollowGraph for InMemoryFollowGraph {
    async fn follower_ids(&self, user_id: UserId) -> AppResult<HashSet<UserId>> {
        Ok(self
            .edges
            .iter()
            .filter(|(_, followee)| *followee == user_id)
            .map(|(follower, _)| *follower)
            .collect())
    }

    async fn followee_ids(&self, user_id: UserId) -> AppResult<HashSet<UserId>> {
        Ok(self
            .edges
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, followee)| *followee)
            .collect())
    }
}

pub struct InMemoryMessageStore {
    participants: HashMap<ConversationId, HashSet<UserId>>,
    messages: Mutex<Vec<StoredMessage>>,
    last_message_at: Mutex<HashMap<ConversationId, DateTime<Utc>>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl InMemoryMessageStore {
    pub fn new(
        participants: impl IntoIterator<Item = (ConversationId, Vec<UserId>)>,
    ) -> Self {
        Self {
            participants: participants
                .into_iter()
                .map(|(conversation, users)| (conversation, users.into_iter().collect()))
                .collect(),
            messages: Mutex::new(Vec::new()),
            last_message_at: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn seed_message(
        &self,
        conversation_id: ConversationId,
        sender_id: Option<UserId>,
        content: &str,
    ) -> MessageId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(StoredMessage {
            id,
            conversation_id,
            sender_id,
            content: Some(content.to_string()),
            message_type: MessageKind::Text,
            media_url: None,
            created_at: Utc::now(),
            is_read: false,
            read_at: None,
        });
        id
    }

    pub fn message(&self, id: MessageId) -> Option<StoredMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn last_message_at(&self, conversation_id: ConversationId) -> Option<DateTime<Utc>> {
        self.last_message_at
            .lock()
            .unwrap()
            .get(&conversation_id)
            .copied()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn participant_ids(
        &self,
        conversation_id: ConversationId,
    ) -> AppResult<HashSet<UserId>> {
        Ok(self
            .participants
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(&self, message: NewMessage) -> AppResult<StoredMessage> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = StoredMessage {
            id,
            conversation_id: message.conversation_id,
            sender_id: Some(message.sender_id),
            content: message.content,
            message_type: message.kind,
            media_url: message.media_url,
            created_at: Utc::now(),
            is_read: false,
            read_at: None,
        };
        self.messages.lock().unwrap().push(stored.clone());
        self.last_message_at
            .lock()
            .unwrap()
            .insert(message.conversation_id, stored.created_at);
        Ok(stored)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        actor_id: UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal);
        }
        let mut messages = self.messages.lock().unwrap();
        for message in messages.iter_mut() {
            if message.conversation_id == conversation_id
                && message_ids.contains(&message.id)
                && message.sender_id != Some(actor_id)
            {
                message.is_read = true;
                message.read_at = Some(read_at);
            }
        }
        Ok(())
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryMessageStore>,
    pub base_http: String,
    pub base_ws: String,
}

pub async fn spawn_app(
    auth: StaticAuthGate,
    follows: InMemoryFollowGraph,
    store: InMemoryMessageStore,
) -> TestApp {
    let store = Arc::new(store);
    let state = AppState {
        rooms: ConversationRegistry::new(),
        presence: PresenceRegistry::new(),
        auth: Arc::new(auth),
        store: store.clone(),
        follows: Arc::new(follows),
    };
    let app = routes::build_router().with_state(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    TestApp {
        store,
        base_http: format!("http://{addr}"),
        base_ws: format!("ws://{addr}"),
    }
}

impl TestApp {
    pub async fn connect_chat(&self, conversation_id: ConversationId, token: &str) -> WsClient {
        let url = format!(
            "{}/api/v1/ws/chat/{conversation_id}?token={token}",
            self.base_ws
        );
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    pub async fn connect_presence(&self, token: &str) -> WsClient {
        let url = format!("{}/api/v1/presence/ws?token={token}", self.base_ws);
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }
}

/// Next text frame, parsed. Panics on timeout or a closed socket.
pub async fn next_json(socket: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed while waiting for frame")
            .expect("socket error while waiting for frame");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skips frames until one with the given envelope `type` arrives.
pub async fn next_json_of_type(socket: &mut WsClient, frame_type: &str) -> serde_json::Value {
    loop {
        let value = next_json(socket).await;
        if value["type"] == frame_type {
            return value;
        }
    }
}

/// Expects the server to close the connection with the given close code.
pub async fn expect_close(socket: &mut WsClient, code: u16) {
    let msg = tokio::time::timeout(RECV_TIMEOUT, socket.next())
        .await
        .expect("timed out waiting for close frame");
    match msg {
        Some(Ok(WsMessage::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), code);
        }
        Some(Ok(other)) => panic!("expected close frame, got {other:?}"),
        Some(Err(e)) => panic!("socket error while waiting for close: {e:?}"),
        None => panic!("socket ended without a close frame"),
    }
}

/// Expects the connection to end one way or another (close frame, error, or
/// plain stream end) without another text frame arriving first.
pub async fn expect_disconnect(socket: &mut WsClient) {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for disconnect");
        match msg {
            Some(Ok(WsMessage::Text(text))) => panic!("expected disconnect, got frame {text}"),
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    }
}
