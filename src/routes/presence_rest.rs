use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::user::ProfileSummary;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineFollowingResponse {
    pub online_users: Vec<ProfileSummary>,
    pub total: usize,
}

/// Currently-online subset of the users the caller follows. Backs the
/// initial load of the online-users bar.
pub async fn online_following(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<OnlineFollowingResponse>> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;
    let user = state.auth.authenticate(token).await?;

    let followees = state.follows.followee_ids(user.id).await?;
    let online = state.presence.online_subset_of(&followees).await;
    let online_users = state.presence.online_profiles(&online).await;

    Ok(Json(OnlineFollowingResponse {
        total: online_users.len(),
        online_users,
    }))
}
