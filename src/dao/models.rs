use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};
use uuid::Uuid;

/// Registered debater. Created the first time an identity touches a core operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Identity reference handed over by the authentication proxy.
    pub id: String,
    /// Name shown to opponents and in transcripts.
    pub display_name: String,
    /// Optional avatar picture.
    pub avatar_url: Option<String>,
    /// Current Elo rating.
    pub rating: i32,
    /// Session the user currently belongs to, if any.
    pub session_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the user document was rewritten.
    pub updated_at: SystemTime,
}

impl UserEntity {
    /// Build a fresh user with the starting rating.
    pub fn new(id: String, display_name: String, rating: i32, now: SystemTime) -> Self {
        Self {
            id,
            display_name,
            avatar_url: None,
            rating,
            session_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Pending matchmaking request, advertised to other users as a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitingEntryEntity {
    /// Room identifier other users may target when joining.
    pub id: Uuid,
    /// Owner of the room.
    pub user_id: String,
    /// Owner display name, kept for room listings.
    pub user_name: String,
    /// Debate topic.
    pub topic: String,
    /// When the user started waiting.
    pub created_at: SystemTime,
}

/// Per-topic marker rewritten by every enqueue on that topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyEntity {
    /// Topic this marker guards.
    pub topic: String,
    /// Last enqueue that touched the topic.
    pub updated_at: SystemTime,
}

/// Debate role derived from the participant order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// `participants[0]`.
    Proponent,
    /// `participants[1]`.
    Opponent,
}

impl Position {
    /// Position held by the participant at `index`.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Position::Proponent),
            1 => Some(Position::Opponent),
            _ => None,
        }
    }

    /// Slot of this position in the participant array.
    pub fn index(self) -> usize {
        match self {
            Position::Proponent => 0,
            Position::Opponent => 1,
        }
    }

    /// Capitalised label used in transcripts and system messages.
    pub fn label(self) -> &'static str {
        match self {
            Position::Proponent => "Proponent",
            Position::Opponent => "Opponent",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persisted evaluation phase of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhaseEntity {
    /// Debate running or waiting for someone to trigger the evaluation.
    #[default]
    Active,
    /// A participant holds the evaluation claim.
    Evaluating,
    /// Evaluation finished (or skipped for an empty debate).
    Complete,
}

/// Evaluation claim written by the participant that runs the scoring call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationClaimEntity {
    /// Unique token guarding the completion transaction.
    pub claim_id: Uuid,
    /// Participant that took the claim.
    pub claimed_by: String,
    /// When the claim was taken; used for lease expiry.
    pub claimed_at: SystemTime,
}

/// Audit record of an applied evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationOutcomeEntity {
    /// Weighted totals, indexed like `participants`.
    pub totals: [u32; 2],
    /// Ratings before the update.
    pub rating_before: [i32; 2],
    /// Ratings after the update.
    pub rating_after: [i32; 2],
}

/// Evaluation bookkeeping embedded in the session document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EvaluationRecordEntity {
    /// Current phase.
    pub phase: SessionPhaseEntity,
    /// Live claim, present only while evaluating.
    pub claim: Option<EvaluationClaimEntity>,
    /// When the session reached `Complete`.
    pub completed_at: Option<SystemTime>,
    /// Applied result; absent for empty debates.
    pub outcome: Option<EvaluationOutcomeEntity>,
}

/// Two-party debate record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key.
    pub id: Uuid,
    /// Ordered, distinct participants. Index 0 is the proponent.
    pub participants: [String; 2],
    /// Display names captured when the pair was formed.
    pub participant_names: [String; 2],
    /// Debate topic.
    pub topic: String,
    /// Flips to false exactly once, on leave or completion.
    pub is_active: bool,
    /// Sole time basis of the debate timer.
    pub start_time: SystemTime,
    /// Whose turn it is for turn-based clients.
    pub current_turn: Option<String>,
    /// Evaluation phase, claim and outcome.
    pub evaluation: EvaluationRecordEntity,
}

impl SessionEntity {
    /// Position of `user_id` in this session, if they take part.
    pub fn position_of(&self, user_id: &str) -> Option<Position> {
        self.participants
            .iter()
            .position(|participant| participant == user_id)
            .and_then(Position::from_index)
    }

    /// Whether `user_id` is one of the two participants.
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.position_of(user_id).is_some()
    }
}

/// Kind of a message in the session log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Counts toward the transcript and the character budget.
    Debate,
    /// Side chat between participants.
    Meta,
    /// Written by the evaluation coordinator.
    System,
}

/// Entry of the append-only session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEntity {
    /// Primary key.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Store-assigned sequence number, strictly increasing per session.
    pub seq: u64,
    /// Author user id, or `system`.
    pub sender_id: String,
    /// Author display name.
    pub sender_name: String,
    /// Message body.
    pub text: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Position of the author (or the subject of a scorecard).
    pub position: Option<Position>,
    /// Store-assigned timestamp, monotonic per session.
    pub timestamp: SystemTime,
}

/// Message content before the store assigns id, sequence and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Owning session.
    pub session_id: Uuid,
    /// Author user id.
    pub sender_id: String,
    /// Author display name.
    pub sender_name: String,
    /// Message body.
    pub text: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Position tag.
    pub position: Option<Position>,
}

impl MessageDraft {
    /// Finalise the draft with the values assigned by the store.
    pub fn into_entity(self, seq: u64, timestamp: SystemTime) -> MessageEntity {
        MessageEntity {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            seq,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            text: self.text,
            kind: self.kind,
            position: self.position,
            timestamp,
        }
    }
}
