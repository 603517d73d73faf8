use std::str::FromStr;

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::{
    models::{
        EvaluationClaimEntity, EvaluationOutcomeEntity, EvaluationRecordEntity, LobbyEntity,
        MessageEntity, MessageKind, Position, SessionEntity, SessionPhaseEntity, UserEntity,
        WaitingEntryEntity,
    },
    storage::{StorageError, StorageResult},
};

/// Projection used to read the revision of any versioned document.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    pub rev: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub rev: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub rating: i32,
    pub session_id: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl MongoUserDocument {
    pub fn from_entity(user: &UserEntity, rev: i64) -> Self {
        Self {
            id: user.id.clone(),
            rev,
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            rating: user.rating,
            session_id: user.session_id.map(|id| id.to_string()),
            created_at: DateTime::from_system_time(user.created_at),
            updated_at: DateTime::from_system_time(user.updated_at),
        }
    }

    pub fn into_entity(self) -> StorageResult<UserEntity> {
        let key = format!("users/{}", self.id);
        Ok(UserEntity {
            session_id: self
                .session_id
                .as_deref()
                .map(|raw| parse_uuid(&key, raw))
                .transpose()?,
            id: self.id,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            rating: self.rating,
            created_at: self.created_at.to_system_time(),
            updated_at: self.updated_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoWaitingDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub rev: i64,
    pub user_id: String,
    pub user_name: String,
    pub topic: String,
    pub created_at: DateTime,
}

impl MongoWaitingDocument {
    pub fn from_entity(entry: &WaitingEntryEntity, rev: i64) -> Self {
        Self {
            id: entry.id.to_string(),
            rev,
            user_id: entry.user_id.clone(),
            user_name: entry.user_name.clone(),
            topic: entry.topic.clone(),
            created_at: DateTime::from_system_time(entry.created_at),
        }
    }

    pub fn into_entity(self) -> StorageResult<WaitingEntryEntity> {
        Ok(WaitingEntryEntity {
            id: parse_uuid(&format!("waiting/{}", self.id), &self.id)?,
            user_id: self.user_id,
            user_name: self.user_name,
            topic: self.topic,
            created_at: self.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoLobbyDocument {
    #[serde(rename = "_id")]
    pub topic: String,
    pub rev: i64,
    pub updated_at: DateTime,
}

impl MongoLobbyDocument {
    pub fn from_entity(lobby: &LobbyEntity, rev: i64) -> Self {
        Self {
            topic: lobby.topic.clone(),
            rev,
            updated_at: DateTime::from_system_time(lobby.updated_at),
        }
    }

    pub fn into_entity(self) -> LobbyEntity {
        LobbyEntity {
            topic: self.topic,
            updated_at: self.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoClaimDocument {
    pub claim_id: String,
    pub claimed_by: String,
    pub claimed_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoOutcomeDocument {
    pub totals: [i64; 2],
    pub rating_before: [i32; 2],
    pub rating_after: [i32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoEvaluationDocument {
    pub phase: SessionPhaseEntity,
    pub claim: Option<MongoClaimDocument>,
    pub completed_at: Option<DateTime>,
    pub outcome: Option<MongoOutcomeDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub rev: i64,
    pub participants: [String; 2],
    pub participant_names: [String; 2],
    pub topic: String,
    pub is_active: bool,
    pub start_time: DateTime,
    pub current_turn: Option<String>,
    pub evaluation: MongoEvaluationDocument,
}

impl MongoSessionDocument {
    pub fn from_entity(session: &SessionEntity, rev: i64) -> Self {
        let evaluation = &session.evaluation;
        Self {
            id: session.id.to_string(),
            rev,
            participants: session.participants.clone(),
            participant_names: session.participant_names.clone(),
            topic: session.topic.clone(),
            is_active: session.is_active,
            start_time: DateTime::from_system_time(session.start_time),
            current_turn: session.current_turn.clone(),
            evaluation: MongoEvaluationDocument {
                phase: evaluation.phase,
                claim: evaluation.claim.as_ref().map(|claim| MongoClaimDocument {
                    claim_id: claim.claim_id.to_string(),
                    claimed_by: claim.claimed_by.clone(),
                    claimed_at: DateTime::from_system_time(claim.claimed_at),
                }),
                completed_at: evaluation.completed_at.map(DateTime::from_system_time),
                outcome: evaluation.outcome.as_ref().map(|outcome| MongoOutcomeDocument {
                    totals: outcome.totals.map(i64::from),
                    rating_before: outcome.rating_before,
                    rating_after: outcome.rating_after,
                }),
            },
        }
    }

    pub fn into_entity(self) -> StorageResult<SessionEntity> {
        let key = format!("sessions/{}", self.id);
        let evaluation = self.evaluation;
        let claim = match evaluation.claim {
            Some(claim) => Some(EvaluationClaimEntity {
                claim_id: parse_uuid(&key, &claim.claim_id)?,
                claimed_by: claim.claimed_by,
                claimed_at: claim.claimed_at.to_system_time(),
            }),
            None => None,
        };
        Ok(SessionEntity {
            id: parse_uuid(&key, &self.id)?,
            participants: self.participants,
            participant_names: self.participant_names,
            topic: self.topic,
            is_active: self.is_active,
            start_time: self.start_time.to_system_time(),
            current_turn: self.current_turn,
            evaluation: EvaluationRecordEntity {
                phase: evaluation.phase,
                claim,
                completed_at: evaluation.completed_at.map(DateTime::to_system_time),
                outcome: evaluation.outcome.map(|outcome| EvaluationOutcomeEntity {
                    totals: outcome
                        .totals
                        .map(|total| u32::try_from(total).unwrap_or_default()),
                    rating_before: outcome.rating_before,
                    rating_after: outcome.rating_after,
                }),
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMessageDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub seq: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub kind: MessageKind,
    pub position: Option<Position>,
    pub timestamp: DateTime,
}

impl From<&MessageEntity> for MongoMessageDocument {
    fn from(message: &MessageEntity) -> Self {
        Self {
            id: message.id.to_string(),
            session_id: message.session_id.to_string(),
            seq: i64::try_from(message.seq).unwrap_or(i64::MAX),
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            text: message.text.clone(),
            kind: message.kind,
            position: message.position,
            timestamp: DateTime::from_system_time(message.timestamp),
        }
    }
}

impl MongoMessageDocument {
    pub fn into_entity(self) -> StorageResult<MessageEntity> {
        let key = format!("messages/{}", self.id);
        Ok(MessageEntity {
            id: parse_uuid(&key, &self.id)?,
            session_id: parse_uuid(&key, &self.session_id)?,
            seq: u64::try_from(self.seq).unwrap_or_default(),
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            text: self.text,
            kind: self.kind,
            position: self.position,
            timestamp: self.timestamp.to_system_time(),
        })
    }
}

/// Per-session sequence counter backing the message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCounterDocument {
    #[serde(rename = "_id")]
    pub session_id: String,
    pub seq: i64,
    pub last_timestamp: DateTime,
}

fn parse_uuid(key: &str, raw: &str) -> StorageResult<Uuid> {
    Uuid::from_str(raw)
        .map_err(|err| StorageError::corrupted(key, format!("invalid uuid `{raw}`: {err}")))
}
