use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;
use uuid::Uuid;

use super::{
    ChangeEvent, DebateStore, DocKey, Document, Precondition, Versioned, WriteBatch, WriteOp,
};
use crate::{
    clock::{Clock, SystemClock},
    dao::{
        models::{MessageDraft, MessageEntity, UserEntity, WaitingEntryEntity},
        storage::{StorageError, StorageResult},
    },
};

const CHANGE_FEED_CAPACITY: usize = 256;

/// Document store kept entirely in process memory.
///
/// Commits are serialised by one lock over the document map, which makes the
/// precondition check and the writes a single atomic step. Session logs live in
/// a separate concurrent map so plain appends never wait on a commit.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    documents: Mutex<HashMap<DocKey, Versioned<Document>>>,
    messages: DashMap<Uuid, Vec<MessageEntity>>,
    changes: broadcast::Sender<ChangeEvent>,
    clock: Arc<dyn Clock>,
    injected_conflicts: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store using the system clock for message timestamps.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store stamping messages with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                documents: Mutex::new(HashMap::new()),
                messages: DashMap::new(),
                changes,
                clock,
                injected_conflicts: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `count` commits fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.inner.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.inner
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    async fn get(&self, key: DocKey) -> Option<Versioned<Document>> {
        self.inner.documents.lock().await.get(&key).cloned()
    }

    async fn waiting_matching(
        &self,
        filter: impl Fn(&WaitingEntryEntity) -> bool,
    ) -> Vec<Versioned<WaitingEntryEntity>> {
        let documents = self.inner.documents.lock().await;
        let mut entries: Vec<_> = documents
            .values()
            .filter_map(|versioned| match &versioned.value {
                Document::Waiting(entry) if filter(entry) => Some(Versioned {
                    revision: versioned.revision,
                    value: entry.clone(),
                }),
                _ => None,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.value
                .created_at
                .cmp(&b.value.created_at)
                .then_with(|| a.value.id.cmp(&b.value.id))
        });
        entries
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.take_injected_conflict() {
            let key = batch
                .preconditions
                .first()
                .map(|precondition| precondition.key().to_string())
                .unwrap_or_else(|| "injected".to_owned());
            return Err(StorageError::Conflict { key });
        }

        let mut events = Vec::new();
        {
            let mut documents = self.inner.documents.lock().await;

            for precondition in &batch.preconditions {
                let current = documents.get(precondition.key()).map(|doc| doc.revision);
                let holds = match precondition {
                    Precondition::Absent(_) => current.is_none(),
                    Precondition::Revision(_, expected) => current == Some(*expected),
                };
                if !holds {
                    debug!(key = %precondition.key(), "precondition failed");
                    return Err(StorageError::conflict(precondition.key()));
                }
            }

            for write in batch.writes {
                match write {
                    WriteOp::Put(document) => {
                        let key = document.key();
                        let revision = documents.get(&key).map_or(1, |doc| doc.revision + 1);
                        events.push(change_for(&document));
                        documents.insert(
                            key,
                            Versioned {
                                revision,
                                value: document,
                            },
                        );
                    }
                    WriteOp::Delete(key) => {
                        let removed_room = documents
                            .remove(&key)
                            .is_some_and(|removed| matches!(removed.value, Document::Waiting(_)));
                        if removed_room {
                            events.push(ChangeEvent::Rooms);
                        }
                    }
                    WriteOp::Append(draft) => {
                        events.push(ChangeEvent::Message(self.append(draft)));
                    }
                }
            }
        }

        events.dedup();
        for event in events {
            let _ = self.inner.changes.send(event);
        }
        Ok(())
    }

    fn append(&self, draft: MessageDraft) -> MessageEntity {
        let now = self.inner.clock.now();
        let mut log = self.inner.messages.entry(draft.session_id).or_default();
        let (seq, timestamp) = match log.last() {
            Some(last) => (
                last.seq + 1,
                now.max(last.timestamp + Duration::from_micros(1)),
            ),
            None => (1, now),
        };
        let message = draft.into_entity(seq, timestamp);
        log.push(message.clone());
        message
    }

    async fn top_users(&self, limit: usize) -> Vec<UserEntity> {
        let documents = self.inner.documents.lock().await;
        let mut users: Vec<UserEntity> = documents
            .values()
            .filter_map(|versioned| match &versioned.value {
                Document::User(user) => Some(user.clone()),
                _ => None,
            })
            .collect();
        users.sort_by(|a, b| b.rating.cmp(&a.rating).then_with(|| a.id.cmp(&b.id)));
        users.truncate(limit);
        users
    }

    fn list_messages(&self, session_id: Uuid) -> Vec<MessageEntity> {
        self.inner
            .messages
            .get(&session_id)
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

fn change_for(document: &Document) -> ChangeEvent {
    match document {
        Document::User(user) => ChangeEvent::User(user.clone()),
        Document::Session(session) => ChangeEvent::Session(session.clone()),
        Document::Waiting(_) | Document::Lobby(_) => ChangeEvent::Rooms,
    }
}

impl DebateStore for MemoryStore {
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Versioned<Document>>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.get(key).await) })
    }

    fn waiting_for_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<WaitingEntryEntity>>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.waiting_matching(|entry| entry.topic == topic).await) })
    }

    fn waiting_for_user(
        &self,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<WaitingEntryEntity>>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.waiting_matching(|entry| entry.user_id == user_id).await) })
    }

    fn list_waiting(&self) -> BoxFuture<'static, StorageResult<Vec<WaitingEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .waiting_matching(|_| true)
                .await
                .into_iter()
                .map(|versioned| versioned.value)
                .collect())
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(batch).await })
    }

    fn append_message(&self, draft: MessageDraft) -> BoxFuture<'static, StorageResult<MessageEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let message = store.append(draft);
            let _ = store.inner.changes.send(ChangeEvent::Message(message.clone()));
            Ok(message)
        })
    }

    fn list_messages(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.list_messages(session_id)) })
    }

    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.top_users(limit).await) })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
