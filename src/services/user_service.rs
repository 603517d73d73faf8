use std::time::SystemTime;

use tracing::info;

use crate::{
    dao::{
        models::UserEntity,
        storage::StorageResult,
        store::{Document, transaction::{Transaction, run_transaction}},
    },
    error::ServiceError,
    identity::{Identity, MAX_DISPLAY_NAME_CHARS},
    state::SharedState,
};

const MAX_AVATAR_URL_CHARS: usize = 2048;

/// Read the caller's user document, creating it on first use.
pub async fn ensure_user(
    tx: &mut Transaction,
    identity: &Identity,
    now: SystemTime,
    initial_rating: i32,
) -> StorageResult<UserEntity> {
    if let Some(user) = tx.user(&identity.user_id).await? {
        return Ok(user);
    }
    let user = UserEntity::new(
        identity.user_id.clone(),
        identity.display_name.clone(),
        initial_rating,
        now,
    );
    tx.insert(Document::User(user.clone()));
    Ok(user)
}

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// New display name.
    pub display_name: Option<String>,
    /// New avatar URL; an empty string clears it.
    pub avatar_url: Option<String>,
}

/// Entry of the rankings listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    /// 1-based rank; equal ratings share a rank.
    pub rank: usize,
    /// Ranked user.
    pub user: UserEntity,
}

/// Caller's profile, created with the initial rating if needed.
pub async fn get_profile(state: &SharedState, identity: &Identity) -> Result<UserEntity, ServiceError> {
    let store = state.require_store().await?;
    let now = state.now();
    let initial = state.config().rating.initial;

    run_transaction(&store, &state.config().store.retry, move |tx| {
        let identity = identity.clone();
        Box::pin(async move { Ok::<_, ServiceError>(ensure_user(tx, &identity, now, initial).await?) })
    })
    .await
}

/// Apply a profile update.
pub async fn update_profile(
    state: &SharedState,
    identity: &Identity,
    update: ProfileUpdate,
) -> Result<UserEntity, ServiceError> {
    let display_name = match update.display_name {
        Some(name) => {
            let name = name.trim().to_owned();
            if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_CHARS {
                return Err(ServiceError::InvalidArgument(format!(
                    "display name must be 1 to {MAX_DISPLAY_NAME_CHARS} characters"
                )));
            }
            Some(name)
        }
        None => None,
    };
    let avatar_url = match update.avatar_url {
        Some(url) if url.chars().count() > MAX_AVATAR_URL_CHARS => {
            return Err(ServiceError::InvalidArgument("avatar url is too long".into()));
        }
        Some(url) => {
            let url = url.trim().to_owned();
            Some((!url.is_empty()).then_some(url))
        }
        None => None,
    };

    let store = state.require_store().await?;
    let now = state.now();
    let initial = state.config().rating.initial;

    let user = run_transaction(&store, &state.config().store.retry, move |tx| {
        let identity = identity.clone();
        let display_name = display_name.clone();
        let avatar_url = avatar_url.clone();
        Box::pin(async move {
            let mut user = ensure_user(tx, &identity, now, initial).await?;
            if let Some(name) = display_name {
                user.display_name = name;
            }
            if let Some(avatar) = avatar_url {
                user.avatar_url = avatar;
            }
            user.updated_at = now;
            tx.put(Document::User(user.clone()));
            Ok::<_, ServiceError>(user)
        })
    })
    .await?;

    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

/// Users with the highest ratings.
pub async fn rankings(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<Vec<RankingEntry>, ServiceError> {
    let max = state.config().rating.max_rankings;
    let limit = limit.unwrap_or(max).clamp(1, max.max(1));
    let store = state.require_store().await?;
    let users = store.top_users(limit).await?;
    Ok(rank(users))
}

fn rank(users: Vec<UserEntity>) -> Vec<RankingEntry> {
    let mut ranked: Vec<RankingEntry> = Vec::with_capacity(users.len());
    for (index, user) in users.into_iter().enumerate() {
        let rank = match ranked.last() {
            Some(previous) if previous.user.rating == user.rating => previous.rank,
            _ => index + 1,
        };
        ranked.push(RankingEntry { rank, user });
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_share_rank() {
        let now = SystemTime::now();
        let users = [("a", 1600), ("b", 1550), ("c", 1550), ("d", 1500)]
            .into_iter()
            .map(|(id, rating)| UserEntity::new(id.into(), id.into(), rating, now))
            .collect();
        let ranks: Vec<_> = rank(users).into_iter().map(|entry| entry.rank).collect();
        assert_eq!(ranks, [1, 2, 2, 4]);
    }
}
