use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    time::sleep,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::SessionEntity,
        store::{ChangeEvent, DocKey, Document},
    },
    dto::{
        session::MessageSummary,
        sse::{ResyncEvent, ServerEvent, SessionUpdatedEvent, names},
        user::UserProfile,
    },
    error::ServiceError,
    identity::Identity,
    services::session_service,
    state::SharedState,
};

const INITIAL_RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(10);

/// What a stream follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamScope {
    /// A user's profile, the sessions they take part in and the lobby.
    User(String),
    /// One session document and its message log.
    Session(Uuid),
}

impl StreamScope {
    fn label(&self) -> String {
        match self {
            StreamScope::User(user_id) => format!("users/{user_id}"),
            StreamScope::Session(session_id) => format!("sessions/{session_id}"),
        }
    }

    /// Translate a change into an SSE event, or `None` when it is out of scope.
    fn render(&self, change: &ChangeEvent) -> Option<ServerEvent> {
        match (self, change) {
            (StreamScope::User(user_id), ChangeEvent::User(user)) if user.id == *user_id => {
                ServerEvent::json(names::USER_UPDATED.to_string(), &UserProfile::from(user.clone())).ok()
            }
            (StreamScope::User(user_id), ChangeEvent::Session(session))
                if session.is_participant(user_id) =>
            {
                session_event(session.clone())
            }
            (StreamScope::User(_), ChangeEvent::Rooms) => Some(ServerEvent {
                event: Some(names::ROOMS_UPDATED.to_string()),
                data: "{}".to_string(),
            }),
            (StreamScope::Session(session_id), ChangeEvent::Session(session))
                if session.id == *session_id =>
            {
                session_event(session.clone())
            }
            (StreamScope::Session(session_id), ChangeEvent::Message(message))
                if message.session_id == *session_id =>
            {
                ServerEvent::json(
                    names::MESSAGE_CREATED.to_string(),
                    &MessageSummary::from(message.clone()),
                )
                .ok()
            }
            _ => None,
        }
    }
}

fn session_event(session: SessionEntity) -> Option<ServerEvent> {
    ServerEvent::json(
        names::SESSION_UPDATED.to_string(),
        &SessionUpdatedEvent::from(session),
    )
    .ok()
}

/// Check the caller may follow `scope`.
pub async fn authorize(
    state: &SharedState,
    identity: &Identity,
    scope: &StreamScope,
) -> Result<(), ServiceError> {
    match scope {
        StreamScope::User(user_id) if *user_id != identity.user_id => {
            return Err(ServiceError::Forbidden("cannot follow another user".into()));
        }
        StreamScope::User(_) => {}
        StreamScope::Session(session_id) => {
            let store = state.require_store().await?;
            let session = session_service::load_session(&store, *session_id).await?;
            session_service::require_participant(&session, identity)?;
        }
    }
    info!(scope = %scope.label(), user_id = %identity.user_id, "new SSE connection");
    Ok(())
}

/// Forward store changes matching `scope` until the client disconnects.
///
/// The forwarder resubscribes with exponential backoff whenever the change
/// feed closes or no store is installed, and emits a `resync` event followed
/// by a fresh snapshot each time it (re)subscribes or falls behind.
pub fn to_sse_stream(
    state: SharedState,
    scope: StreamScope,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);

    tokio::spawn(async move {
        let mut delay = INITIAL_RESUBSCRIBE_DELAY;
        let mut reason = "subscribed";

        'subscribe: loop {
            let Some(store) = state.store().await else {
                debug!(scope = %scope.label(), "no store installed; waiting before resubscribing");
                tokio::select! {
                    _ = tx.closed() => break 'subscribe,
                    _ = sleep(delay) => {}
                }
                delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
                reason = "reconnected";
                continue;
            };

            let mut receiver = store.subscribe();
            if !send_resync(&tx, &state, &scope, reason).await {
                break;
            }
            delay = INITIAL_RESUBSCRIBE_DELAY;

            loop {
                tokio::select! {
                    _ = tx.closed() => break 'subscribe,
                    received = receiver.recv() => match received {
                        Ok(change) => {
                            let Some(payload) = scope.render(&change) else {
                                continue;
                            };
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break 'subscribe;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(scope = %scope.label(), skipped, "SSE forwarder lagged");
                            if !send_resync(&tx, &state, &scope, "lagged").await {
                                break 'subscribe;
                            }
                        }
                        Err(RecvError::Closed) => {
                            warn!(scope = %scope.label(), "change feed closed; resubscribing");
                            reason = "reconnected";
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = tx.closed() => break 'subscribe,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
        }

        info!(scope = %scope.label(), "SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Emit a `resync` marker and the current snapshot. Returns false once the client is gone.
async fn send_resync(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    state: &SharedState,
    scope: &StreamScope,
    reason: &str,
) -> bool {
    let marker = ResyncEvent {
        reason: reason.to_string(),
        degraded: state.is_degraded().await,
    };
    if let Ok(payload) = ServerEvent::json(names::RESYNC.to_string(), &marker) {
        if tx.send(Ok(to_event(payload))).await.is_err() {
            return false;
        }
    }

    if let Some(payload) = snapshot(state, scope).await {
        return tx.send(Ok(to_event(payload))).await.is_ok();
    }
    true
}

async fn snapshot(state: &SharedState, scope: &StreamScope) -> Option<ServerEvent> {
    let store = state.store().await?;
    let key = match scope {
        StreamScope::User(user_id) => DocKey::User(user_id.clone()),
        StreamScope::Session(session_id) => DocKey::Session(*session_id),
    };
    let change = match store.get(key).await {
        Ok(Some(versioned)) => match versioned.value {
            Document::User(user) => ChangeEvent::User(user),
            Document::Session(session) => ChangeEvent::Session(session),
            _ => return None,
        },
        Ok(None) => return None,
        Err(err) => {
            warn!(scope = %scope.label(), error = %err, "failed to load SSE snapshot");
            return None;
        }
    };
    scope.render(&change)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{EvaluationRecordEntity, MessageEntity, MessageKind, UserEntity};

    fn session(id: Uuid) -> SessionEntity {
        SessionEntity {
            id,
            participants: ["a".into(), "b".into()],
            participant_names: ["A".into(), "B".into()],
            topic: "t".into(),
            is_active: true,
            start_time: SystemTime::UNIX_EPOCH,
            current_turn: None,
            evaluation: EvaluationRecordEntity::default(),
        }
    }

    #[test]
    fn user_scope_follows_own_profile_and_sessions() {
        let scope = StreamScope::User("a".into());
        let own = ChangeEvent::User(UserEntity::new("a".into(), "A".into(), 1500, SystemTime::now()));
        let other = ChangeEvent::User(UserEntity::new("c".into(), "C".into(), 1500, SystemTime::now()));

        assert_eq!(
            scope.render(&own).and_then(|event| event.event).as_deref(),
            Some(names::USER_UPDATED)
        );
        assert!(scope.render(&other).is_none());
        assert!(scope.render(&ChangeEvent::Session(session(Uuid::new_v4()))).is_some());
        assert!(scope.render(&ChangeEvent::Rooms).is_some());
    }

    #[test]
    fn session_scope_filters_messages_by_session() {
        let id = Uuid::new_v4();
        let scope = StreamScope::Session(id);
        let message = |session_id| MessageEntity {
            id: Uuid::new_v4(),
            session_id,
            seq: 1,
            sender_id: "a".into(),
            sender_name: "A".into(),
            text: "hi".into(),
            kind: MessageKind::Debate,
            position: None,
            timestamp: SystemTime::now(),
        };

        let rendered = scope.render(&ChangeEvent::Message(message(id))).unwrap();
        assert_eq!(rendered.event.as_deref(), Some(names::MESSAGE_CREATED));
        assert!(rendered.data.contains("\"text\":\"hi\""));
        assert!(scope.render(&ChangeEvent::Message(message(Uuid::new_v4()))).is_none());
        assert!(scope.render(&ChangeEvent::Session(session(Uuid::new_v4()))).is_none());
        assert!(scope.render(&ChangeEvent::Rooms).is_none());
    }
}
