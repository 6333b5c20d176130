//! Global presence tracking: who is online anywhere in the process, and
//! fan-out of online/offline transitions to connected followers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::user::ProfileSummary;
use crate::models::UserId;
use crate::websocket::frames::{encode, PresenceEvent};

/// Sender half of one live presence socket.
#[derive(Debug, Clone)]
pub struct PresenceConnection {
    pub session_id: Uuid,
    pub tx: UnboundedSender<Message>,
}

impl PresenceConnection {
    pub fn new(session_id: Uuid, tx: UnboundedSender<Message>) -> Self {
        Self { session_id, tx }
    }
}

/// One user's presence state. A user may hold several presence sockets at
/// once (two devices); they are online while `connections` is non-empty.
/// The follower set is a snapshot taken at connect time so broadcasts never
/// have to hit the follow graph; it goes stale until the next connect.
struct PresenceEntry {
    connections: Vec<PresenceConnection>,
    follower_ids: HashSet<UserId>,
    profile: ProfileSummary,
}

/// All presence state lives behind a single lock: connect, disconnect and
/// broadcast each touch both the connection list and the follower caches.
#[derive(Default, Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, PresenceEntry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a presence socket. The follower cache and profile snapshot
    /// are refreshed on every connect; the online broadcast fires only on the
    /// offline -> online transition. Reconnect after a disconnect is a fresh
    /// transition and broadcasts again.
    pub async fn connect(
        &self,
        user_id: UserId,
        conn: PresenceConnection,
        follower_ids: HashSet<UserId>,
        profile: ProfileSummary,
    ) {
        let came_online = {
            let mut guard = self.inner.write().await;
            match guard.get_mut(&user_id) {
                Some(entry) => {
                    let came_online = entry.connections.is_empty();
                    entry.connections.push(conn);
                    entry.follower_ids = follower_ids;
                    entry.profile = profile.clone();
                    came_online
                }
                None => {
                    guard.insert(
                        user_id,
                        PresenceEntry {
                            connections: vec![conn],
                            follower_ids,
                            profile: profile.clone(),
                        },
                    );
                    true
                }
            }
        };
        if came_online {
            info!(user_id, "user online");
            self.broadcast_presence_change(user_id, true, &profile).await;
        }
    }

    /// Removes one presence socket. When the last socket for the user goes,
    /// the cached follower set is read before the entry is dropped and the
    /// offline broadcast goes to that set.
    pub async fn disconnect(&self, user_id: UserId, session_id: Uuid) {
        let (profile, recipients) = {
            let mut guard = self.inner.write().await;
            let Some(entry) = guard.get_mut(&user_id) else {
                return;
            };
            entry.connections.retain(|c| c.session_id != session_id);
            if !entry.connections.is_empty() {
                return;
            }
            let follower_ids = std::mem::take(&mut entry.follower_ids);
            let profile = entry.profile.clone();
            guard.remove(&user_id);
            let recipients = connected_recipients(&guard, &follower_ids);
            (profile, recipients)
        };
        info!(user_id, "user offline");
        deliver(
            recipients,
            &PresenceEvent::presence_change(user_id, false, &profile),
        );
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&user_id)
            .map(|entry| !entry.connections.is_empty())
            .unwrap_or(false)
    }

    /// Intersection of a candidate set with the live presence set. Never
    /// contains an id whose last connection has closed.
    pub async fn online_subset_of(&self, candidate_ids: &HashSet<UserId>) -> HashSet<UserId> {
        let guard = self.inner.read().await;
        candidate_ids
            .iter()
            .filter(|id| guard.contains_key(id))
            .copied()
            .collect()
    }

    /// Connect-time profile snapshots for the online members of a candidate
    /// set.
    pub async fn online_profiles(&self, candidate_ids: &HashSet<UserId>) -> Vec<ProfileSummary> {
        let guard = self.inner.read().await;
        candidate_ids
            .iter()
            .filter_map(|id| guard.get(id).map(|entry| entry.profile.clone()))
            .collect()
    }

    /// Delivers a `presence_change` event to the cached followers of
    /// `user_id` who are themselves currently connected. Followers who are
    /// offline are skipped, not queued.
    pub async fn broadcast_presence_change(
        &self,
        user_id: UserId,
        is_online: bool,
        profile: &ProfileSummary,
    ) {
        let recipients = {
            let guard = self.inner.read().await;
            let Some(entry) = guard.get(&user_id) else {
                return;
            };
            connected_recipients(&guard, &entry.follower_ids)
        };
        deliver(
            recipients,
            &PresenceEvent::presence_change(user_id, is_online, profile),
        );
    }
}

/// Snapshot of the sockets of every follower that is currently connected.
/// Taken under the lock; delivery happens after it is released.
fn connected_recipients(
    guard: &HashMap<UserId, PresenceEntry>,
    follower_ids: &HashSet<UserId>,
) -> Vec<(UserId, Vec<PresenceConnection>)> {
    follower_ids
        .iter()
        .filter_map(|id| guard.get(id).map(|entry| (*id, entry.connections.clone())))
        .collect()
}

fn deliver(recipients: Vec<(UserId, Vec<PresenceConnection>)>, event: &PresenceEvent) {
    let Some(payload) = encode(event) else { return };
    for (user_id, connections) in recipients {
        for conn in connections {
            if conn.tx.send(Message::Text(payload.clone())).is_err() {
                warn!(user_id, "dropping presence event for dead connection");
            }
        }
    }
}
