use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::WaitingEntryEntity,
    dto::{format_system_time, validation::validate_not_blank},
    services::matchmaker::{EnqueueOutcome, EnqueueRequest},
};

/// Body of `POST /matchmaking/enqueue`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct EnqueueRequestDto {
    /// Debate topic; users are only paired on the exact same topic.
    #[validate(length(min = 1, max = 300), custom(function = "validate_not_blank"))]
    pub topic: String,
    /// Join this room instead of the oldest one of the topic.
    #[serde(default)]
    pub room_id: Option<Uuid>,
}

impl From<EnqueueRequestDto> for EnqueueRequest {
    fn from(dto: EnqueueRequestDto) -> Self {
        Self {
            topic: dto.topic,
            room_id: dto.room_id,
        }
    }
}

/// Result of an enqueue call.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueResponse {
    /// Paired; open the session.
    Matched {
        /// New session.
        session_id: Uuid,
    },
    /// Parked in a room until someone joins.
    Waiting {
        /// Room other users can join.
        room_id: Uuid,
    },
}

impl From<EnqueueOutcome> for EnqueueResponse {
    fn from(outcome: EnqueueOutcome) -> Self {
        match outcome {
            EnqueueOutcome::Matched { session_id } => EnqueueResponse::Matched { session_id },
            EnqueueOutcome::Waiting { room_id } => EnqueueResponse::Waiting { room_id },
        }
    }
}

/// Open room in the lobby.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    /// Room id, usable as `room_id` when enqueuing.
    pub room_id: Uuid,
    /// Waiting user.
    pub user_id: String,
    /// Display name of the waiting user.
    pub user_name: String,
    /// Debate topic.
    pub topic: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl From<WaitingEntryEntity> for RoomSummary {
    fn from(entry: WaitingEntryEntity) -> Self {
        Self {
            room_id: entry.id,
            user_id: entry.user_id,
            user_name: entry.user_name,
            topic: entry.topic,
            created_at: format_system_time(entry.created_at),
        }
    }
}

/// Result of `DELETE /rooms/mine`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CancelWaitingResponse {
    /// Whether a waiting entry was removed.
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_response_is_tagged_by_status() {
        let id = Uuid::nil();
        let matched = serde_json::to_value(EnqueueResponse::Matched { session_id: id }).unwrap();
        assert_eq!(
            matched,
            serde_json::json!({"status": "matched", "session_id": id})
        );
        let waiting = serde_json::to_value(EnqueueResponse::Waiting { room_id: id }).unwrap();
        assert_eq!(waiting["status"], "waiting");
    }

    #[test]
    fn blank_topic_fails_validation() {
        let dto = EnqueueRequestDto {
            topic: "   ".into(),
            room_id: None,
        };
        assert!(dto.validate().is_err());
    }
}
