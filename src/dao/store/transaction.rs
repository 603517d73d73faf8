use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use rand::Rng;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::debug;

use super::{DebateStore, DocKey, Document, Precondition, WriteBatch, WriteOp, unexpected_kind};
use crate::dao::{
    models::{LobbyEntity, MessageDraft, SessionEntity, UserEntity, WaitingEntryEntity},
    storage::{StorageError, StorageResult},
};

/// Bounded exponential backoff applied to conflicting transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Pause after the first conflict, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the pause, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 25,
            max_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Read set and pending writes of one attempt.
///
/// Every document read records the revision it was seen at; the commit turns
/// those into preconditions so a concurrent writer makes the attempt fail with
/// [`StorageError::Conflict`] instead of silently overwriting it.
pub struct Transaction {
    store: Arc<dyn DebateStore>,
    reads: HashMap<DocKey, Option<u64>>,
    pending: HashMap<DocKey, Option<Document>>,
    writes: Vec<WriteOp>,
}

impl Transaction {
    /// Open an empty transaction against `store`.
    pub fn new(store: Arc<dyn DebateStore>) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            pending: HashMap::new(),
            writes: Vec::new(),
        }
    }

    fn observe(&mut self, key: DocKey, revision: Option<u64>) {
        self.reads.entry(key).or_insert(revision);
    }

    async fn read(&mut self, key: DocKey) -> StorageResult<Option<Document>> {
        if let Some(pending) = self.pending.get(&key) {
            return Ok(pending.clone());
        }
        let fetched = self.store.get(key.clone()).await?;
        self.observe(key, fetched.as_ref().map(|versioned| versioned.revision));
        Ok(fetched.map(|versioned| versioned.value))
    }

    /// Read a user document.
    pub async fn user(&mut self, id: &str) -> StorageResult<Option<UserEntity>> {
        let key = DocKey::User(id.to_owned());
        match self.read(key.clone()).await? {
            Some(Document::User(user)) => Ok(Some(user)),
            Some(other) => Err(unexpected_kind(&key, &other)),
            None => Ok(None),
        }
    }

    /// Read a session document.
    pub async fn session(&mut self, id: uuid::Uuid) -> StorageResult<Option<SessionEntity>> {
        let key = DocKey::Session(id);
        match self.read(key.clone()).await? {
            Some(Document::Session(session)) => Ok(Some(session)),
            Some(other) => Err(unexpected_kind(&key, &other)),
            None => Ok(None),
        }
    }

    /// Read a waiting entry by room id.
    pub async fn waiting(&mut self, id: uuid::Uuid) -> StorageResult<Option<WaitingEntryEntity>> {
        let key = DocKey::Waiting(id);
        match self.read(key.clone()).await? {
            Some(Document::Waiting(entry)) => Ok(Some(entry)),
            Some(other) => Err(unexpected_kind(&key, &other)),
            None => Ok(None),
        }
    }

    /// Read the lobby marker of a topic.
    pub async fn lobby(&mut self, topic: &str) -> StorageResult<Option<LobbyEntity>> {
        let key = DocKey::Lobby(topic.to_owned());
        match self.read(key.clone()).await? {
            Some(Document::Lobby(lobby)) => Ok(Some(lobby)),
            Some(other) => Err(unexpected_kind(&key, &other)),
            None => Ok(None),
        }
    }

    /// Waiting entries of a topic, oldest first. Each returned entry joins the read set.
    pub async fn waiting_for_topic(&mut self, topic: &str) -> StorageResult<Vec<WaitingEntryEntity>> {
        let entries = self.store.waiting_for_topic(topic.to_owned()).await?;
        Ok(self.observe_entries(entries))
    }

    /// Waiting entries owned by `user_id`. Each returned entry joins the read set.
    pub async fn waiting_for_user(&mut self, user_id: &str) -> StorageResult<Vec<WaitingEntryEntity>> {
        let entries = self.store.waiting_for_user(user_id.to_owned()).await?;
        Ok(self.observe_entries(entries))
    }

    fn observe_entries(
        &mut self,
        entries: Vec<super::Versioned<WaitingEntryEntity>>,
    ) -> Vec<WaitingEntryEntity> {
        entries
            .into_iter()
            .filter_map(|versioned| {
                let key = DocKey::Waiting(versioned.value.id);
                if let Some(pending) = self.pending.get(&key) {
                    return match pending {
                        Some(Document::Waiting(entry)) => Some(entry.clone()),
                        _ => None,
                    };
                }
                self.observe(key, Some(versioned.revision));
                Some(versioned.value)
            })
            .collect()
    }

    /// Create a document that must not exist yet.
    pub fn insert(&mut self, document: Document) {
        let key = document.key();
        self.reads.entry(key.clone()).or_insert(None);
        self.pending.insert(key, Some(document.clone()));
        self.writes.push(WriteOp::Put(document));
    }

    /// Write a document, guarded by the revision it was read at (if it was read).
    pub fn put(&mut self, document: Document) {
        self.pending.insert(document.key(), Some(document.clone()));
        self.writes.push(WriteOp::Put(document));
    }

    /// Remove a document.
    pub fn delete(&mut self, key: DocKey) {
        self.pending.insert(key.clone(), None);
        self.writes.push(WriteOp::Delete(key));
    }

    /// Append to a session log as part of this commit.
    pub fn append(&mut self, draft: MessageDraft) {
        self.writes.push(WriteOp::Append(draft));
    }

    /// Whether the attempt would write anything.
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    fn into_batch(self) -> WriteBatch {
        let preconditions = self
            .reads
            .into_iter()
            .map(|(key, revision)| match revision {
                Some(revision) => Precondition::Revision(key, revision),
                None => Precondition::Absent(key),
            })
            .collect();
        WriteBatch {
            preconditions,
            writes: self.writes,
        }
    }

    /// Commit the pending writes. A read-only attempt commits nothing.
    pub async fn commit(self) -> StorageResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        let store = Arc::clone(&self.store);
        store.commit(self.into_batch()).await
    }
}

/// Run `work` inside an optimistic transaction, retrying on conflicts.
///
/// `work` may run several times and must therefore only mutate the store
/// through the transaction it is handed. Errors returned by `work` abort
/// without retry; a conflict on the final attempt is surfaced as
/// [`StorageError::Conflict`].
pub async fn run_transaction<T, E, F>(
    store: &Arc<dyn DebateStore>,
    retry: &RetryPolicy,
    mut work: F,
) -> Result<T, E>
where
    F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<StorageError>,
{
    let mut attempt = 1;
    let mut delay = retry.initial_delay();

    loop {
        let mut transaction = Transaction::new(Arc::clone(store));
        let value = work(&mut transaction).await?;

        match transaction.commit().await {
            Ok(()) => return Ok(value),
            Err(StorageError::Conflict { key }) if attempt < retry.max_attempts => {
                debug!(%key, attempt, "transaction conflict; retrying");
                sleep(jittered(delay)).await;
                delay = retry.next_delay(delay);
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let spread = u64::try_from(delay.as_millis() / 2).unwrap_or(0);
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::store::memory::MemoryStore;

    fn store() -> Arc<dyn DebateStore> {
        Arc::new(MemoryStore::new())
    }

    fn user(id: &str, rating: i32) -> UserEntity {
        UserEntity::new(id.to_owned(), id.to_owned(), rating, SystemTime::now())
    }

    #[tokio::test]
    async fn stale_read_conflicts() {
        let store = store();
        store
            .commit(WriteBatch {
                preconditions: vec![],
                writes: vec![WriteOp::Put(Document::User(user("a", 1500)))],
            })
            .await
            .unwrap();

        let mut first = Transaction::new(Arc::clone(&store));
        let mut seen = first.user("a").await.unwrap().unwrap();

        let mut second = Transaction::new(Arc::clone(&store));
        let mut other = second.user("a").await.unwrap().unwrap();
        other.rating = 1600;
        second.put(Document::User(other));
        second.commit().await.unwrap();

        seen.rating = 1400;
        first.put(Document::User(seen));
        let err = first.commit().await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn insert_conflicts_when_document_appeared() {
        let store = store();
        let mut first = Transaction::new(Arc::clone(&store));
        first.insert(Document::User(user("b", 1500)));

        let mut second = Transaction::new(Arc::clone(&store));
        second.insert(Document::User(user("b", 1500)));
        second.commit().await.unwrap();

        assert!(first.commit().await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn reads_see_pending_writes() {
        let store = store();
        let mut transaction = Transaction::new(Arc::clone(&store));
        transaction.insert(Document::User(user("c", 1500)));
        let read = transaction.user("c").await.unwrap();
        assert_eq!(read.map(|user| user.rating), Some(1500));
        assert!(store.get(DocKey::User("c".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_transaction_retries_injected_conflicts() {
        let memory = MemoryStore::new();
        memory.inject_conflicts(2);
        let store: Arc<dyn DebateStore> = Arc::new(memory);
        let retry = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        };

        let mut attempts = 0;
        let result: Result<u32, StorageError> = run_transaction(&store, &retry, |tx| {
            attempts += 1;
            let attempt = attempts;
            Box::pin(async move {
                tx.insert(Document::User(user("d", 1500)));
                Ok(attempt)
            })
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn run_transaction_gives_up_after_max_attempts() {
        let memory = MemoryStore::new();
        memory.inject_conflicts(10);
        let store: Arc<dyn DebateStore> = Arc::new(memory);
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
        };

        let result: Result<(), StorageError> = run_transaction(&store, &retry, |tx| {
            Box::pin(async move {
                tx.insert(Document::User(user("e", 1500)));
                Ok(())
            })
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
    }
}
