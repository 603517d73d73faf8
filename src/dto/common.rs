use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::models::{MessageKind, Position},
    state::state_machine::SessionPhase,
};

/// Debate role exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PositionDto {
    /// Argues for the topic; the user that was waiting.
    Proponent,
    /// Argues against the topic; the user that joined.
    Opponent,
}

impl From<Position> for PositionDto {
    fn from(position: Position) -> Self {
        match position {
            Position::Proponent => PositionDto::Proponent,
            Position::Opponent => PositionDto::Opponent,
        }
    }
}

/// Message kind exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKindDto {
    /// Argument that counts toward the transcript.
    Debate,
    /// Side chat.
    Meta,
    /// Written by the server (scorecards, announcements).
    System,
}

impl From<MessageKind> for MessageKindDto {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Debate => MessageKindDto::Debate,
            MessageKind::Meta => MessageKindDto::Meta,
            MessageKind::System => MessageKindDto::System,
        }
    }
}

impl From<MessageKindDto> for MessageKind {
    fn from(kind: MessageKindDto) -> Self {
        match kind {
            MessageKindDto::Debate => MessageKind::Debate,
            MessageKindDto::Meta => MessageKind::Meta,
            MessageKindDto::System => MessageKind::System,
        }
    }
}

/// Evaluation phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhaseDto {
    /// Debating, or finished and not yet claimed.
    Active,
    /// A participant is running the scoring call.
    Evaluating,
    /// Ratings applied, or closed without debate messages.
    Complete,
}

impl From<&SessionPhase> for SessionPhaseDto {
    fn from(phase: &SessionPhase) -> Self {
        match phase {
            SessionPhase::Active => SessionPhaseDto::Active,
            SessionPhase::Evaluating(_) => SessionPhaseDto::Evaluating,
            SessionPhase::Complete => SessionPhaseDto::Complete,
        }
    }
}
