use serde::{Deserialize, Serialize};

use crate::models::UserId;

/// The public slice of a user profile carried in presence events and message
/// broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: UserId,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub profile_picture: Option<String>,
}

/// Identity resolved from a bearer credential by the auth gate.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub profile: ProfileSummary,
}
