use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{EvaluationOutcomeEntity, MessageEntity, Position},
    dto::{
        common::{MessageKindDto, PositionDto, SessionPhaseDto},
        format_system_time,
        validation::validate_not_blank,
    },
    services::{
        evaluation::{EvaluationOutcome, ParticipantResult},
        session_service::{LeaveOutcome, RemainingTime, SessionView, SubmitMessage},
    },
};

/// Debater as listed in a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantSummary {
    /// User id.
    pub user_id: String,
    /// Display name captured at pairing time.
    pub name: String,
    /// Role.
    pub position: PositionDto,
}

/// Applied evaluation stored on the session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionOutcomeSummary {
    /// Weighted totals, proponent first.
    pub totals: Vec<u32>,
    /// Ratings before the update, proponent first.
    pub rating_before: Vec<i32>,
    /// Ratings after the update, proponent first.
    pub rating_after: Vec<i32>,
}

impl From<EvaluationOutcomeEntity> for SessionOutcomeSummary {
    fn from(outcome: EvaluationOutcomeEntity) -> Self {
        Self {
            totals: outcome.totals.to_vec(),
            rating_before: outcome.rating_before.to_vec(),
            rating_after: outcome.rating_after.to_vec(),
        }
    }
}

/// Server timer snapshot.
#[derive(Debug, Serialize, ToSchema)]
pub struct RemainingTimeResponse {
    /// Whole seconds left; zero once the deadline passed.
    pub remaining_seconds: u64,
    /// Milliseconds left.
    pub remaining_ms: u64,
    /// RFC 3339 deadline.
    pub deadline: String,
    /// RFC 3339 server time of the snapshot; clients use it to correct their clock.
    pub server_time: String,
}

impl From<RemainingTime> for RemainingTimeResponse {
    fn from(timer: RemainingTime) -> Self {
        Self {
            remaining_seconds: timer.remaining_secs,
            remaining_ms: u64::try_from(timer.remaining.as_millis()).unwrap_or(u64::MAX),
            deadline: format_system_time(timer.deadline),
            server_time: format_system_time(timer.server_time),
        }
    }
}

/// Participant view of a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Session id.
    pub id: Uuid,
    /// Debate topic.
    pub topic: String,
    /// Both debaters, proponent first.
    pub participants: Vec<ParticipantSummary>,
    /// Caller's role.
    pub your_position: PositionDto,
    /// False once somebody left or the evaluation completed.
    pub is_active: bool,
    /// RFC 3339 start time.
    pub start_time: String,
    /// User whose turn it is, for turn-based clients.
    pub current_turn: Option<String>,
    /// Evaluation phase.
    pub phase: SessionPhaseDto,
    /// Timer snapshot.
    pub timer: RemainingTimeResponse,
    /// Result, once evaluated.
    pub outcome: Option<SessionOutcomeSummary>,
}

impl From<SessionView> for SessionSummary {
    fn from(view: SessionView) -> Self {
        let session = view.session;
        let participants = [Position::Proponent, Position::Opponent]
            .into_iter()
            .map(|position| ParticipantSummary {
                user_id: session.participants[position.index()].clone(),
                name: session.participant_names[position.index()].clone(),
                position: position.into(),
            })
            .collect();

        Self {
            id: session.id,
            topic: session.topic,
            participants,
            your_position: view.position.into(),
            is_active: session.is_active,
            start_time: format_system_time(session.start_time),
            current_turn: session.current_turn,
            phase: SessionPhaseDto::from(&view.phase),
            timer: view.timer.into(),
            outcome: session.evaluation.outcome.map(SessionOutcomeSummary::from),
        }
    }
}

/// Result of `POST /sessions/{id}/leave`.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveResponse {
    /// `left`, or `already_inactive` when the call changed nothing.
    pub status: String,
}

impl From<LeaveOutcome> for LeaveResponse {
    fn from(outcome: LeaveOutcome) -> Self {
        let status = match outcome {
            LeaveOutcome::Left => "left",
            LeaveOutcome::AlreadyInactive => "already_inactive",
        };
        Self {
            status: status.to_string(),
        }
    }
}

fn default_kind() -> MessageKindDto {
    MessageKindDto::Debate
}

/// Body of `POST /sessions/{id}/messages`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitMessageRequest {
    /// Message body; limits depend on the kind and are enforced by the server.
    #[validate(length(min = 1, max = 4000), custom(function = "validate_not_blank"))]
    pub text: String,
    /// `debate` (default) or `meta`.
    #[serde(default = "default_kind")]
    pub kind: MessageKindDto,
}

impl From<SubmitMessageRequest> for SubmitMessage {
    fn from(dto: SubmitMessageRequest) -> Self {
        Self {
            text: dto.text,
            kind: dto.kind.into(),
        }
    }
}

/// Entry of the session log.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageSummary {
    /// Message id.
    pub id: Uuid,
    /// Per-session sequence number.
    pub seq: u64,
    /// Author user id, or `system`.
    pub sender_id: String,
    /// Author display name.
    pub sender_name: String,
    /// Body.
    pub text: String,
    /// Kind.
    pub kind: MessageKindDto,
    /// Role of the author, or the subject of a scorecard.
    pub position: Option<PositionDto>,
    /// RFC 3339 server timestamp.
    pub timestamp: String,
}

impl From<MessageEntity> for MessageSummary {
    fn from(message: MessageEntity) -> Self {
        Self {
            id: message.id,
            seq: message.seq,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            text: message.text,
            kind: message.kind.into(),
            position: message.position.map(PositionDto::from),
            timestamp: format_system_time(message.timestamp),
        }
    }
}

/// One debater in an evaluation result.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantResultSummary {
    /// User id.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Role.
    pub position: PositionDto,
    /// Weighted rubric total.
    pub total: u32,
    /// `win`, `draw` or `loss`.
    pub result: String,
    /// Rating before the update.
    pub rating_before: i32,
    /// Rating after the update.
    pub rating_after: i32,
}

impl From<ParticipantResult> for ParticipantResultSummary {
    fn from(result: ParticipantResult) -> Self {
        Self {
            user_id: result.user_id,
            name: result.name,
            position: result.position.into(),
            total: result.total,
            result: result.result.label().to_string(),
            rating_before: result.rating_before,
            rating_after: result.rating_after,
        }
    }
}

/// Result of `POST /sessions/{id}/evaluate`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EvaluationResponse {
    /// `evaluated`, `completed_without_debate`, `already_handled` or `deferred`.
    pub status: String,
    /// Both debaters, present when this call applied the evaluation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ParticipantResultSummary>,
}

impl From<EvaluationOutcome> for EvaluationResponse {
    fn from(outcome: EvaluationOutcome) -> Self {
        let (status, results) = match outcome {
            EvaluationOutcome::Evaluated(report) => (
                "evaluated",
                report.participants.into_iter().map(Into::into).collect(),
            ),
            EvaluationOutcome::CompletedWithoutDebate => ("completed_without_debate", Vec::new()),
            EvaluationOutcome::AlreadyHandled => ("already_handled", Vec::new()),
            EvaluationOutcome::Deferred => ("deferred", Vec::new()),
        };
        Self {
            status: status.to_string(),
            results,
        }
    }
}
