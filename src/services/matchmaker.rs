use std::time::SystemTime;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{LobbyEntity, UserEntity, WaitingEntryEntity},
        store::{DocKey, Document, transaction::{Transaction, run_transaction}},
    },
    error::ServiceError,
    identity::Identity,
    services::{session_service, user_service},
    state::SharedState,
};

/// Matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    /// Debate topic, matched by exact string equality after trimming.
    pub topic: String,
    /// Specific room to join instead of the oldest one.
    pub room_id: Option<Uuid>,
}

/// Result of [`enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A partner was found and the session created.
    Matched {
        /// New session.
        session_id: Uuid,
    },
    /// The caller now waits in a room of their own.
    Waiting {
        /// Room other users may join.
        room_id: Uuid,
    },
}

/// Pair the caller with a waiting user of the same topic, or park them.
///
/// Reading the candidates, creating the session, deleting the consumed entry
/// and pointing both users at the session commit as one transaction. The
/// topic lobby marker is rewritten on every call so two enqueues on the same
/// topic always conflict and one of them retries against the other's result.
pub async fn enqueue(
    state: &SharedState,
    identity: &Identity,
    request: EnqueueRequest,
) -> Result<EnqueueOutcome, ServiceError> {
    let topic = normalize_topic(&request.topic, state.config().debate.max_topic_chars)?;
    let store = state.require_store().await?;
    let now = state.now();
    let initial_rating = state.config().rating.initial;
    let room_id = request.room_id;

    let outcome = run_transaction(&store, &state.config().store.retry, move |tx| {
        let identity = identity.clone();
        let topic = topic.clone();
        Box::pin(async move {
            plan_enqueue(tx, &identity, &topic, room_id, now, initial_rating).await
        })
    })
    .await?;

    match outcome {
        EnqueueOutcome::Matched { session_id } => {
            info!(user_id = %identity.user_id, %session_id, "matched")
        }
        EnqueueOutcome::Waiting { room_id } => {
            info!(user_id = %identity.user_id, %room_id, "waiting for a partner")
        }
    }
    Ok(outcome)
}

async fn plan_enqueue(
    tx: &mut Transaction,
    identity: &Identity,
    topic: &str,
    room_id: Option<Uuid>,
    now: SystemTime,
    initial_rating: i32,
) -> Result<EnqueueOutcome, ServiceError> {
    let mut caller = user_service::ensure_user(tx, identity, now, initial_rating).await?;
    if let Some(active) = active_session(tx, &caller).await? {
        return Err(ServiceError::InvalidState(format!(
            "already taking part in session `{active}`"
        )));
    }
    touch_lobby(tx, topic, now).await?;

    let stale = tx.waiting_for_user(&caller.id).await?;
    let partner = match room_id {
        Some(room_id) => Some(join_room(tx, &caller, topic, room_id).await?),
        None => find_partner(tx, &caller, topic).await?,
    };

    for entry in &stale {
        tx.delete(DocKey::Waiting(entry.id));
    }

    caller.updated_at = now;
    let Some((entry, mut owner)) = partner else {
        let entry = WaitingEntryEntity {
            id: Uuid::new_v4(),
            user_id: caller.id.clone(),
            user_name: caller.display_name.clone(),
            topic: topic.to_owned(),
            created_at: now,
        };
        let room_id = entry.id;
        caller.session_id = None;
        tx.insert(Document::Waiting(entry));
        tx.put(Document::User(caller));
        return Ok(EnqueueOutcome::Waiting { room_id });
    };

    tx.delete(DocKey::Waiting(entry.id));
    let session = session_service::create_session(tx, &owner, &caller, topic, now);

    owner.session_id = Some(session.id);
    owner.updated_at = now;
    caller.session_id = Some(session.id);
    tx.put(Document::User(owner));
    tx.put(Document::User(caller));

    Ok(EnqueueOutcome::Matched {
        session_id: session.id,
    })
}

/// Active session the user is bound to, if any.
async fn active_session(
    tx: &mut Transaction,
    user: &UserEntity,
) -> Result<Option<Uuid>, ServiceError> {
    let Some(session_id) = user.session_id else {
        return Ok(None);
    };
    let active = tx
        .session(session_id)
        .await?
        .is_some_and(|session| session.is_active);
    Ok(active.then_some(session_id))
}

async fn touch_lobby(tx: &mut Transaction, topic: &str, now: SystemTime) -> Result<(), ServiceError> {
    tx.lobby(topic).await?;
    tx.put(Document::Lobby(LobbyEntity {
        topic: topic.to_owned(),
        updated_at: now,
    }));
    Ok(())
}

async fn join_room(
    tx: &mut Transaction,
    caller: &UserEntity,
    topic: &str,
    room_id: Uuid,
) -> Result<(WaitingEntryEntity, UserEntity), ServiceError> {
    let not_found = || ServiceError::NotFound("room not found or topic mismatch".into());
    let entry = tx
        .waiting(room_id)
        .await?
        .filter(|entry| entry.topic == topic)
        .ok_or_else(not_found)?;
    if entry.user_id == caller.id {
        return Err(ServiceError::InvalidArgument(
            "cannot join your own room".into(),
        ));
    }
    let owner = tx.user(&entry.user_id).await?.ok_or_else(not_found)?;
    if active_session(tx, &owner).await?.is_some() {
        return Err(not_found());
    }
    Ok((entry, owner))
}

/// Oldest waiting entry of the topic whose owner is free. Entries of owners
/// already in an active session are stale and removed on the way.
async fn find_partner(
    tx: &mut Transaction,
    caller: &UserEntity,
    topic: &str,
) -> Result<Option<(WaitingEntryEntity, UserEntity)>, ServiceError> {
    for entry in tx.waiting_for_topic(topic).await? {
        if entry.user_id == caller.id {
            continue;
        }
        let Some(owner) = tx.user(&entry.user_id).await? else {
            debug!(room_id = %entry.id, "dropping room of unknown user");
            tx.delete(DocKey::Waiting(entry.id));
            continue;
        };
        if active_session(tx, &owner).await?.is_some() {
            debug!(room_id = %entry.id, owner = %owner.id, "dropping room of busy user");
            tx.delete(DocKey::Waiting(entry.id));
            continue;
        }
        return Ok(Some((entry, owner)));
    }
    Ok(None)
}

fn normalize_topic(raw: &str, max_chars: usize) -> Result<String, ServiceError> {
    let topic = raw.trim();
    if topic.is_empty() {
        return Err(ServiceError::InvalidArgument("topic is empty".into()));
    }
    if topic.chars().count() > max_chars {
        return Err(ServiceError::InvalidArgument(format!(
            "topic is limited to {max_chars} characters"
        )));
    }
    Ok(topic.to_owned())
}

/// Open rooms the caller could join.
pub async fn list_rooms(
    state: &SharedState,
    identity: &Identity,
) -> Result<Vec<WaitingEntryEntity>, ServiceError> {
    let store = state.require_store().await?;
    let rooms = store.list_waiting().await?;
    Ok(rooms
        .into_iter()
        .filter(|room| room.user_id != identity.user_id)
        .collect())
}

/// Withdraw the caller's waiting entry. Returns whether one existed.
pub async fn cancel_waiting(state: &SharedState, identity: &Identity) -> Result<bool, ServiceError> {
    let store = state.require_store().await?;
    let now = state.now();

    let removed = run_transaction(&store, &state.config().store.retry, move |tx| {
        let user_id = identity.user_id.clone();
        Box::pin(async move {
            let entries = tx.waiting_for_user(&user_id).await?;
            for entry in &entries {
                touch_lobby(tx, &entry.topic, now).await?;
                tx.delete(DocKey::Waiting(entry.id));
            }
            Ok::<_, ServiceError>(!entries.is_empty())
        })
    })
    .await?;

    if removed {
        info!(user_id = %identity.user_id, "left the waiting list");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_trimmed_and_bounded() {
        assert_eq!(normalize_topic("  tax  ", 300).unwrap(), "tax");
        assert!(matches!(
            normalize_topic("   ", 300),
            Err(ServiceError::InvalidArgument(_))
        ));
        let long = "あ".repeat(301);
        assert!(normalize_topic(&long, 300).is_err());
        assert!(normalize_topic(&long[..long.len() - 3], 300).is_ok());
    }
}
