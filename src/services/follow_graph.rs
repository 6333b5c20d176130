use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::AppResult;
use crate::models::UserId;

/// Read-only view of the asymmetric follow graph.
#[async_trait]
pub trait FollowGraph: Send + Sync {
    /// Users who follow `user_id`.
    async fn follower_ids(&self, user_id: UserId) -> AppResult<HashSet<UserId>>;
    /// Users `user_id` follows.
    async fn followee_ids(&self, user_id: UserId) -> AppResult<HashSet<UserId>>;
}

pub struct PgFollowGraph {
    db: Pool<Postgres>,
}

impl PgFollowGraph {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FollowGraph for PgFollowGraph {
    async fn follower_ids(&self, user_id: UserId) -> AppResult<HashSet<UserId>> {
        let ids: Vec<UserId> =
            sqlx::query_scalar("SELECT follower_id FROM follows WHERE following_id = $1")
                .bind(user_id)
                .fetch_all(&self.db)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn followee_ids(&self, user_id: UserId) -> AppResult<HashSet<UserId>> {
        let ids: Vec<UserId> =
            sqlx::query_scalar("SELECT following_id FROM follows WHERE follower_id = $1")
                .bind(user_id)
                .fetch_all(&self.db)
                .await?;
        Ok(ids.into_iter().collect())
    }
}
