use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{Position, SessionEntity},
    dto::{
        common::SessionPhaseDto,
        format_system_time,
        session::{ParticipantSummary, SessionOutcomeSummary},
    },
    state::state_machine::SessionPhase,
};

/// Event names written to the SSE streams.
pub mod names {
    /// A user document changed.
    pub const USER_UPDATED: &str = "user.updated";
    /// A session document changed.
    pub const SESSION_UPDATED: &str = "session.updated";
    /// A message was appended to a session log.
    pub const MESSAGE_CREATED: &str = "message.created";
    /// The set of open rooms changed.
    pub const ROOMS_UPDATED: &str = "rooms.updated";
    /// Events may have been missed; refetch state.
    pub const RESYNC: &str = "resync";
}

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// Serialised payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent on (re)subscription and after the stream fell behind.
pub struct ResyncEvent {
    /// `subscribed`, `lagged` or `reconnected`.
    pub reason: String,
    /// Whether the backend currently runs without a store.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Participant-agnostic session snapshot pushed on `session.updated`.
pub struct SessionUpdatedEvent {
    /// Session id.
    pub id: Uuid,
    /// Debate topic.
    pub topic: String,
    /// Both debaters, proponent first.
    pub participants: Vec<ParticipantSummary>,
    /// Activity flag.
    pub is_active: bool,
    /// RFC 3339 start time.
    pub start_time: String,
    /// Evaluation phase.
    pub phase: SessionPhaseDto,
    /// Result, once evaluated.
    pub outcome: Option<SessionOutcomeSummary>,
}

impl From<SessionEntity> for SessionUpdatedEvent {
    fn from(session: SessionEntity) -> Self {
        let phase = SessionPhase::from_record(&session.evaluation);
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
            is_active: session.is_active,
            start_time: format_system_time(session.start_time),
            phase: SessionPhaseDto::from(&phase),
            outcome: session.evaluation.outcome.map(SessionOutcomeSummary::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use serde_json::json;

    use super::*;
    use crate::dao::models::{EvaluationOutcomeEntity, EvaluationRecordEntity, SessionPhaseEntity};

    #[test]
    fn completed_session_carries_its_outcome() {
        let session = SessionEntity {
            id: Uuid::new_v4(),
            participants: ["a".into(), "b".into()],
            participant_names: ["Ann".into(), "Ben".into()],
            topic: "Zoos".into(),
            is_active: false,
            start_time: SystemTime::UNIX_EPOCH,
            current_turn: None,
            evaluation: EvaluationRecordEntity {
                phase: SessionPhaseEntity::Complete,
                claim: None,
                completed_at: Some(SystemTime::UNIX_EPOCH),
                outcome: Some(EvaluationOutcomeEntity {
                    totals: [48, 36],
                    rating_before: [1500, 1500],
                    rating_after: [1516, 1484],
                }),
            },
        };

        let event = SessionUpdatedEvent::from(session);
        assert_eq!(event.phase, SessionPhaseDto::Complete);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value["outcome"],
            json!({
                "totals": [48, 36],
                "rating_before": [1500, 1500],
                "rating_after": [1516, 1484],
            })
        );
        assert_eq!(value["participants"][1]["name"], "Ben");
        assert_eq!(value["participants"][0]["position"], "proponent");
    }
}
