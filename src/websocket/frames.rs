//! Frame envelope for both endpoints: `{"type": <string>, "data": <object>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::models::message::{MessageKind, StoredMessage};
use crate::models::user::ProfileSummary;
use crate::models::{ConversationId, MessageId, UserId};

/// Inbound frames on a chat connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatFrame {
    Message {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        message_type: MessageKind,
    },
    ReadReceipt {
        #[serde(default)]
        message_ids: Vec<MessageId>,
    },
    Typing {
        #[serde(default)]
        is_typing: bool,
    },
    /// Any unrecognized `type`; the session loop ignores these.
    #[serde(other)]
    Unknown,
}

/// Outbound frames on a chat connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(MessageBroadcast),
    ReadReceipt {
        user_id: UserId,
        message_ids: Vec<MessageId>,
        read_at: DateTime<Utc>,
    },
    Typing {
        user_id: UserId,
        is_typing: bool,
    },
    OnlineStatus {
        user_id: UserId,
        is_online: bool,
    },
}

/// A stored message plus the sender profile, echoed to the whole room
/// (including the sender, whose client renders from the echo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBroadcast {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: Option<UserId>,
    pub sender: ProfileSummary,
    pub content: Option<String>,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl MessageBroadcast {
    pub fn new(message: StoredMessage, sender: ProfileSummary) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender,
            content: message.content,
            message_type: message.message_type,
            media_url: message.media_url,
            created_at: message.created_at,
            is_read: message.is_read,
            read_at: message.read_at,
        }
    }
}

/// Inbound frames on a presence connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresenceFrame {
    Heartbeat,
    #[serde(other)]
    Unknown,
}

/// Outbound frames on a presence connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresenceEvent {
    HeartbeatAck,
    InitialOnlineList {
        online_users: Vec<ProfileSummary>,
    },
    PresenceChange {
        user_id: UserId,
        is_online: bool,
        username: Option<String>,
        full_name: Option<String>,
        profile_picture: Option<String>,
    },
}

impl PresenceEvent {
    pub fn presence_change(user_id: UserId, is_online: bool, profile: &ProfileSummary) -> Self {
        PresenceEvent::PresenceChange {
            user_id,
            is_online,
            username: profile.username.clone(),
            full_name: profile.full_name.clone(),
            profile_picture: profile.profile_picture.clone(),
        }
    }
}

pub(crate) fn encode(event: &impl Serialize) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(error = %e, "failed to serialize outbound frame");
            None
        }
    }
}
