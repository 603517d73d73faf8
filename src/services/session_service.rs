use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            EvaluationRecordEntity, MessageDraft, MessageEntity, MessageKind, Position,
            SessionEntity, UserEntity,
        },
        store::{DebateStore, DocKey, Document, transaction::{Transaction, run_transaction}},
    },
    error::ServiceError,
    identity::Identity,
    state::{SharedState, state_machine::SessionPhase},
};

/// Time left before the debate deadline; never negative.
///
/// A server clock behind `start` counts as zero elapsed time.
pub fn remaining_time(start: SystemTime, now: SystemTime, duration: Duration) -> Duration {
    let elapsed = now.duration_since(start).unwrap_or(Duration::ZERO);
    duration.saturating_sub(elapsed)
}

/// Whole-second view of [`remaining_time`], counting down from the duration.
pub fn remaining_seconds(start: SystemTime, now: SystemTime, duration: Duration) -> u64 {
    let elapsed = now.duration_since(start).unwrap_or(Duration::ZERO);
    duration.as_secs().saturating_sub(elapsed.as_secs())
}

/// Timer snapshot of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingTime {
    /// Exact remaining time.
    pub remaining: Duration,
    /// Remaining whole seconds.
    pub remaining_secs: u64,
    /// Absolute deadline.
    pub deadline: SystemTime,
    /// Server time the snapshot was taken at.
    pub server_time: SystemTime,
}

impl RemainingTime {
    /// Compute the snapshot of `session` at `now`.
    pub fn of(session: &SessionEntity, now: SystemTime, duration: Duration) -> Self {
        Self {
            remaining: remaining_time(session.start_time, now, duration),
            remaining_secs: remaining_seconds(session.start_time, now, duration),
            deadline: session.start_time + duration,
            server_time: now,
        }
    }

    /// Whether the deadline has passed.
    pub fn is_over(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Participant view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Stored session.
    pub session: SessionEntity,
    /// Role of the caller.
    pub position: Position,
    /// Timer snapshot.
    pub timer: RemainingTime,
    /// Evaluation phase.
    pub phase: SessionPhase,
}

/// Result of [`leave_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The call changed something.
    Left,
    /// The session was already inactive and the caller already detached.
    AlreadyInactive,
}

/// Message submitted by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitMessage {
    /// Raw body; trimmed before storage.
    pub text: String,
    /// `Debate` or `Meta`.
    pub kind: MessageKind,
}

/// Build a fresh session for a matched pair and stage it in `tx`.
///
/// The waiting owner becomes the proponent, the joining user the opponent.
pub fn create_session(
    tx: &mut Transaction,
    proponent: &UserEntity,
    opponent: &UserEntity,
    topic: &str,
    now: SystemTime,
) -> SessionEntity {
    let session = SessionEntity {
        id: Uuid::new_v4(),
        participants: [proponent.id.clone(), opponent.id.clone()],
        participant_names: [proponent.display_name.clone(), opponent.display_name.clone()],
        topic: topic.to_owned(),
        is_active: true,
        start_time: now,
        current_turn: Some(proponent.id.clone()),
        evaluation: EvaluationRecordEntity::default(),
    };
    tx.insert(Document::Session(session.clone()));
    session
}

/// Clear the session pointer of a user if it still references `session_id`.
pub async fn detach_user(
    tx: &mut Transaction,
    user_id: &str,
    session_id: Uuid,
    now: SystemTime,
) -> Result<bool, ServiceError> {
    let Some(mut user) = tx.user(user_id).await? else {
        return Ok(false);
    };
    if user.session_id != Some(session_id) {
        return Ok(false);
    }
    user.session_id = None;
    user.updated_at = now;
    tx.put(Document::User(user));
    Ok(true)
}

/// Fetch a session outside of any transaction.
pub(crate) async fn load_session(
    store: &Arc<dyn DebateStore>,
    session_id: Uuid,
) -> Result<SessionEntity, ServiceError> {
    let key = DocKey::Session(session_id);
    match store.get(key).await? {
        Some(versioned) => match versioned.value {
            Document::Session(session) => Ok(session),
            _ => Err(ServiceError::NotFound(format!("session `{session_id}`"))),
        },
        None => Err(ServiceError::NotFound(format!("session `{session_id}`"))),
    }
}

/// Position of the caller, or [`ServiceError::Forbidden`] for outsiders.
pub(crate) fn require_participant(
    session: &SessionEntity,
    identity: &Identity,
) -> Result<Position, ServiceError> {
    session.position_of(&identity.user_id).ok_or_else(|| {
        ServiceError::Forbidden(format!(
            "user `{}` is not a participant of session `{}`",
            identity.user_id, session.id
        ))
    })
}

/// Participant view of a session.
pub async fn get_session(
    state: &SharedState,
    identity: &Identity,
    session_id: Uuid,
) -> Result<SessionView, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let position = require_participant(&session, identity)?;
    let timer = RemainingTime::of(&session, state.now(), state.config().debate.duration);
    let phase = SessionPhase::from_record(&session.evaluation);

    Ok(SessionView {
        session,
        position,
        timer,
        phase,
    })
}

/// Remaining debate time according to the server clock.
pub async fn get_remaining_time(
    state: &SharedState,
    identity: &Identity,
    session_id: Uuid,
) -> Result<RemainingTime, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    require_participant(&session, identity)?;
    Ok(RemainingTime::of(
        &session,
        state.now(),
        state.config().debate.duration,
    ))
}

/// Leave a session: detach the caller and mark the session inactive.
///
/// Allowed at any time, never touches the message log, and repeating it is a
/// successful no-op. An evaluation already underway still completes.
pub async fn leave_session(
    state: &SharedState,
    identity: &Identity,
    session_id: Uuid,
) -> Result<LeaveOutcome, ServiceError> {
    let store = state.require_store().await?;
    let now = state.now();

    let outcome = run_transaction(&store, &state.config().store.retry, move |tx| {
        let identity = identity.clone();
        Box::pin(async move {
            let mut session = tx
                .session(session_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?;
            require_participant(&session, &identity)?;

            let detached = detach_user(tx, &identity.user_id, session_id, now).await?;
            let deactivated = session.is_active;
            if deactivated {
                session.is_active = false;
                tx.put(Document::Session(session));
            }

            Ok::<_, ServiceError>(if detached || deactivated {
                LeaveOutcome::Left
            } else {
                LeaveOutcome::AlreadyInactive
            })
        })
    })
    .await?;

    info!(%session_id, user_id = %identity.user_id, ?outcome, "left session");
    Ok(outcome)
}

/// Append a message to the session log.
pub async fn submit_message(
    state: &SharedState,
    identity: &Identity,
    session_id: Uuid,
    message: SubmitMessage,
) -> Result<MessageEntity, ServiceError> {
    let settings = &state.config().debate;
    let text = message.text.trim().to_owned();
    if text.is_empty() {
        return Err(ServiceError::InvalidArgument("message text is empty".into()));
    }
    let length = text.chars().count();
    match message.kind {
        MessageKind::Debate if length > settings.max_debate_chars => {
            return Err(ServiceError::InvalidArgument(format!(
                "debate messages are limited to {} characters",
                settings.max_debate_chars
            )));
        }
        MessageKind::Meta if length > settings.max_meta_chars => {
            return Err(ServiceError::InvalidArgument(format!(
                "chat messages are limited to {} characters",
                settings.max_meta_chars
            )));
        }
        MessageKind::System => {
            return Err(ServiceError::InvalidArgument(
                "system messages cannot be submitted".into(),
            ));
        }
        _ => {}
    }

    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let position = require_participant(&session, identity)?;

    if message.kind == MessageKind::Debate {
        let timer = RemainingTime::of(&session, state.now(), settings.duration);
        if !session.is_active || timer.is_over() {
            return Err(ServiceError::InvalidState("the debate is closed".into()));
        }

        let used: usize = store
            .list_messages(session_id)
            .await?
            .iter()
            .filter(|logged| logged.kind == MessageKind::Debate && logged.sender_id == identity.user_id)
            .map(|logged| logged.text.chars().count())
            .sum();
        if used + length > settings.max_debate_chars {
            return Err(ServiceError::InvalidArgument(format!(
                "character budget exceeded: {} characters left",
                settings.max_debate_chars.saturating_sub(used)
            )));
        }
    }

    let stored = store
        .append_message(MessageDraft {
            session_id,
            sender_id: identity.user_id.clone(),
            sender_name: identity.display_name.clone(),
            text,
            kind: message.kind,
            position: Some(position),
        })
        .await?;

    debug!(%session_id, seq = stored.seq, kind = ?stored.kind, "message appended");
    Ok(stored)
}

/// Session log in store order.
pub async fn list_messages(
    state: &SharedState,
    identity: &Identity,
    session_id: Uuid,
) -> Result<Vec<MessageEntity>, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    require_participant(&session, identity)?;
    Ok(store.list_messages(session_id).await?)
}
