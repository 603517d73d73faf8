use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::UserEntity,
    dto::{format_system_time, validation::{validate_avatar_url, validate_not_blank}},
    services::user_service::{ProfileUpdate, RankingEntry},
};

/// Public profile of a user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    /// User id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// Elo rating.
    pub rating: i32,
    /// Session the user currently takes part in.
    pub session_id: Option<Uuid>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last change.
    pub updated_at: String,
}

impl From<UserEntity> for UserProfile {
    fn from(user: UserEntity) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            rating: user.rating,
            session_id: user.session_id,
            created_at: format_system_time(user.created_at),
            updated_at: format_system_time(user.updated_at),
        }
    }
}

/// Body of `PUT /users/me`. Omitted fields are left unchanged.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateProfileRequest {
    /// New display name.
    #[validate(length(min = 1, max = 64), custom(function = "validate_not_blank"))]
    #[serde(default)]
    pub display_name: Option<String>,
    /// New avatar URL; an empty string removes it.
    #[validate(length(max = 2048), custom(function = "validate_avatar_url"))]
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(dto: UpdateProfileRequest) -> Self {
        Self {
            display_name: dto.display_name,
            avatar_url: dto.avatar_url,
        }
    }
}

/// Query of `GET /rankings`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct RankingsQuery {
    /// Number of entries; capped by the server configuration.
    pub limit: Option<usize>,
}

/// Entry of the rankings listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct RankingItem {
    /// 1-based rank; equal ratings share a rank.
    pub rank: usize,
    /// User id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// Elo rating.
    pub rating: i32,
}

impl From<RankingEntry> for RankingItem {
    fn from(entry: RankingEntry) -> Self {
        Self {
            rank: entry.rank,
            user_id: entry.user.id,
            display_name: entry.user.display_name,
            avatar_url: entry.user.avatar_url,
            rating: entry.user.rating,
        }
    }
}
