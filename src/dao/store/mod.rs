/// In-process document store.
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
/// Optimistic transactions on top of [`DebateStore::commit`].
pub mod transaction;

use std::fmt;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::{
    models::{
        LobbyEntity, MessageDraft, MessageEntity, SessionEntity, UserEntity, WaitingEntryEntity,
    },
    storage::{StorageError, StorageResult},
};

/// Address of a mutable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    /// `users/{id}`
    User(String),
    /// `waiting/{room id}`
    Waiting(Uuid),
    /// `sessions/{id}`
    Session(Uuid),
    /// `lobbies/{topic}`
    Lobby(String),
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::User(id) => write!(f, "users/{id}"),
            DocKey::Waiting(id) => write!(f, "waiting/{id}"),
            DocKey::Session(id) => write!(f, "sessions/{id}"),
            DocKey::Lobby(topic) => write!(f, "lobbies/{topic}"),
        }
    }
}

/// Any mutable document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    /// User profile and rating.
    User(UserEntity),
    /// Waiting entry (room).
    Waiting(WaitingEntryEntity),
    /// Debate session.
    Session(SessionEntity),
    /// Per-topic enqueue marker.
    Lobby(LobbyEntity),
}

impl Document {
    /// Key under which the document lives.
    pub fn key(&self) -> DocKey {
        match self {
            Document::User(user) => DocKey::User(user.id.clone()),
            Document::Waiting(entry) => DocKey::Waiting(entry.id),
            Document::Session(session) => DocKey::Session(session.id),
            Document::Lobby(lobby) => DocKey::Lobby(lobby.topic.clone()),
        }
    }
}

/// Document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Monotonic per-document revision, starting at 1.
    pub revision: u64,
    /// Document body.
    pub value: T,
}

/// Condition every commit checks before applying its writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The document must not exist.
    Absent(DocKey),
    /// The document must still be at this revision.
    Revision(DocKey, u64),
}

impl Precondition {
    /// Key the condition applies to.
    pub fn key(&self) -> &DocKey {
        match self {
            Precondition::Absent(key) | Precondition::Revision(key, _) => key,
        }
    }
}

/// Single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Create or replace a document.
    Put(Document),
    /// Remove a document; removing a missing document is a no-op.
    Delete(DocKey),
    /// Append to a session log.
    Append(MessageDraft),
}

/// Atomic unit of work: either every write lands or none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Checked first, all-or-nothing.
    pub preconditions: Vec<Precondition>,
    /// Applied in order once the preconditions hold.
    pub writes: Vec<WriteOp>,
}

impl WriteBatch {
    /// Whether the batch carries no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Notification published after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A user document was written.
    User(UserEntity),
    /// A session document was written.
    Session(SessionEntity),
    /// A message was appended.
    Message(MessageEntity),
    /// The set of open rooms changed.
    Rooms,
}

/// Abstraction over the persistence layer for users, rooms, sessions and message logs.
pub trait DebateStore: Send + Sync {
    /// Read one document with its revision.
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Versioned<Document>>>>;
    /// Waiting entries for a topic, oldest first.
    fn waiting_for_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<WaitingEntryEntity>>>>;
    /// Waiting entries owned by a user (normally zero or one).
    fn waiting_for_user(
        &self,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<WaitingEntryEntity>>>>;
    /// Every open room, oldest first.
    fn list_waiting(&self) -> BoxFuture<'static, StorageResult<Vec<WaitingEntryEntity>>>;
    /// Apply a batch atomically; fails with [`StorageError::Conflict`] when a
    /// precondition does not hold.
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>>;
    /// Append outside of any transaction.
    fn append_message(&self, draft: MessageDraft) -> BoxFuture<'static, StorageResult<MessageEntity>>;
    /// Session log in store order.
    fn list_messages(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>>;
    /// Users ordered by descending rating.
    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>>;
    /// Subscribe to the change feed.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
    /// Check the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Reject a document that decoded as the wrong kind for its key.
pub(crate) fn unexpected_kind(key: &DocKey, document: &Document) -> StorageError {
    StorageError::corrupted(
        key,
        format!("unexpected document kind under key: {:?}", document.key()),
    )
}
