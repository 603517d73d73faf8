use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{DateTime, doc},
    options::{ClientOptions, IndexOptions, ReturnDocument},
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{RwLock, broadcast},
    time::sleep,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoCounterDocument, MongoLobbyDocument, MongoMessageDocument, MongoSessionDocument,
        MongoUserDocument, MongoWaitingDocument, RevisionOnly,
    },
};
use crate::dao::{
    models::{MessageDraft, MessageEntity, UserEntity, WaitingEntryEntity},
    storage::{StorageError, StorageResult},
    store::{
        ChangeEvent, DebateStore, DocKey, Document, Precondition, Versioned, WriteBatch, WriteOp,
    },
};

const USER_COLLECTION: &str = "users";
const WAITING_COLLECTION: &str = "waiting_entries";
const SESSION_COLLECTION: &str = "sessions";
const LOBBY_COLLECTION: &str = "lobbies";
const MESSAGE_COLLECTION: &str = "messages";
const COUNTER_COLLECTION: &str = "message_counters";

const MAX_CONNECT_ATTEMPTS: u32 = 10;
const INITIAL_CONNECT_DELAY_MS: u64 = 250;
const CHANGE_FEED_CAPACITY: usize = 256;

/// [`DebateStore`] backed by MongoDB.
///
/// Every revisioned document carries a `rev` field. A commit runs inside a
/// driver transaction and turns each precondition into a filtered write on
/// `{_id, rev}`, so a lost race shows up as an unmatched write and aborts the
/// whole batch.
#[derive(Clone)]
pub struct MongoDebateStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    changes: broadcast::Sender<ChangeEvent>,
}

struct MongoState {
    client: Client,
    database: Database,
}

async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempts = 0;
    let mut delay = Duration::from_millis(INITIAL_CONNECT_DELAY_MS);
    while let Err(source) = database.run_command(doc! { "ping": 1 }).await {
        attempts += 1;
        if attempts >= MAX_CONNECT_ATTEMPTS {
            return Err(MongoDaoError::InitialPing { attempts, source });
        }
        debug!(attempts, error = %source, "MongoDB not reachable yet");
        sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(5));
    }

    Ok((client, database))
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoDebateStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
                changes,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        let indexes: [(&'static str, &'static str, mongodb::bson::Document, bool); 4] = [
            (WAITING_COLLECTION, "waiting_user_idx", doc! {"user_id": 1}, true),
            (
                WAITING_COLLECTION,
                "waiting_topic_idx",
                doc! {"topic": 1, "created_at": 1},
                false,
            ),
            (USER_COLLECTION, "user_rating_idx", doc! {"rating": -1}, false),
            (
                MESSAGE_COLLECTION,
                "message_seq_idx",
                doc! {"session_id": 1, "seq": 1},
                true,
            ),
        ];

        for (collection, name, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(name.to_owned()))
                        .unique(Some(unique))
                        .build(),
                )
                .build();
            database
                .collection::<mongodb::bson::Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: name,
                    source,
                })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn handles(&self) -> (Client, Database) {
        let guard = self.inner.state.read().await;
        (guard.client.clone(), guard.database.clone())
    }

    async fn find_by_id<T>(&self, collection: &str, key: &DocKey, id: &str) -> MongoResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        self.database()
            .await
            .collection::<T>(collection)
            .find_one(doc! {"_id": id})
            .await
            .map_err(|source| MongoDaoError::read(key, source))
    }

    async fn get(&self, key: DocKey) -> StorageResult<Option<Versioned<Document>>> {
        let (collection, id) = locate(&key);
        let versioned = match &key {
            DocKey::User(_) => self
                .find_by_id::<MongoUserDocument>(collection, &key, &id)
                .await?
                .map(|doc| {
                    let revision = to_revision(doc.rev);
                    doc.into_entity().map(|user| Versioned {
                        revision,
                        value: Document::User(user),
                    })
                })
                .transpose()?,
            DocKey::Waiting(_) => self
                .find_by_id::<MongoWaitingDocument>(collection, &key, &id)
                .await?
                .map(|doc| {
                    let revision = to_revision(doc.rev);
                    doc.into_entity().map(|entry| Versioned {
                        revision,
                        value: Document::Waiting(entry),
                    })
                })
                .transpose()?,
            DocKey::Session(_) => self
                .find_by_id::<MongoSessionDocument>(collection, &key, &id)
                .await?
                .map(|doc| {
                    let revision = to_revision(doc.rev);
                    doc.into_entity().map(|session| Versioned {
                        revision,
                        value: Document::Session(session),
                    })
                })
                .transpose()?,
            DocKey::Lobby(_) => self
                .find_by_id::<MongoLobbyDocument>(collection, &key, &id)
                .await?
                .map(|doc| Versioned {
                    revision: to_revision(doc.rev),
                    value: Document::Lobby(doc.into_entity()),
                }),
        };
        Ok(versioned)
    }

    async fn find_waiting(
        &self,
        filter: mongodb::bson::Document,
    ) -> StorageResult<Vec<Versioned<WaitingEntryEntity>>> {
        let documents: Vec<MongoWaitingDocument> = self
            .database()
            .await
            .collection::<MongoWaitingDocument>(WAITING_COLLECTION)
            .find(filter)
            .sort(doc! {"created_at": 1, "_id": 1})
            .await
            .map_err(|source| MongoDaoError::read(WAITING_COLLECTION, source))?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::read(WAITING_COLLECTION, source))?;

        documents
            .into_iter()
            .map(|doc| {
                let revision = to_revision(doc.rev);
                doc.into_entity().map(|value| Versioned { revision, value })
            })
            .collect()
    }

    async fn top_users(&self, limit: usize) -> StorageResult<Vec<UserEntity>> {
        let documents: Vec<MongoUserDocument> = self
            .database()
            .await
            .collection::<MongoUserDocument>(USER_COLLECTION)
            .find(doc! {})
            .sort(doc! {"rating": -1, "_id": 1})
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|source| MongoDaoError::read(USER_COLLECTION, source))?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::read(USER_COLLECTION, source))?;

        documents
            .into_iter()
            .map(MongoUserDocument::into_entity)
            .collect()
    }

    async fn list_messages(&self, session_id: Uuid) -> StorageResult<Vec<MessageEntity>> {
        let documents: Vec<MongoMessageDocument> = self
            .database()
            .await
            .collection::<MongoMessageDocument>(MESSAGE_COLLECTION)
            .find(doc! {"session_id": session_id.to_string()})
            .sort(doc! {"seq": 1})
            .await
            .map_err(|source| MongoDaoError::read(MESSAGE_COLLECTION, source))?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::read(MESSAGE_COLLECTION, source))?;

        documents
            .into_iter()
            .map(MongoMessageDocument::into_entity)
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<Vec<ChangeEvent>> {
        let (client, database) = self.handles().await;
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                stage: "session start",
                source,
            })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                stage: "transaction start",
                source,
            })?;

        match apply_batch(&database, &mut session, batch).await {
            Ok(events) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|source| MongoDaoError::Transaction {
                        stage: "commit",
                        source,
                    })?;
                for event in &events {
                    let _ = self.inner.changes.send(event.clone());
                }
                Ok(events)
            }
            Err(err) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!(error = %abort, "failed to abort MongoDB transaction");
                }
                Err(err)
            }
        }
    }
}

fn locate(key: &DocKey) -> (&'static str, String) {
    match key {
        DocKey::User(id) => (USER_COLLECTION, id.clone()),
        DocKey::Waiting(id) => (WAITING_COLLECTION, id.to_string()),
        DocKey::Session(id) => (SESSION_COLLECTION, id.to_string()),
        DocKey::Lobby(topic) => (LOBBY_COLLECTION, topic.clone()),
    }
}

fn to_revision(rev: i64) -> u64 {
    u64::try_from(rev).unwrap_or_default()
}

fn to_rev(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

async fn apply_batch(
    database: &Database,
    session: &mut ClientSession,
    batch: WriteBatch,
) -> StorageResult<Vec<ChangeEvent>> {
    let mut guards: HashMap<DocKey, Precondition> = batch
        .preconditions
        .into_iter()
        .map(|precondition| (precondition.key().clone(), precondition))
        .collect();
    let mut events = Vec::with_capacity(batch.writes.len());

    for write in batch.writes {
        match write {
            WriteOp::Put(document) => {
                let key = document.key();
                let guard = guards.remove(&key);
                match &document {
                    Document::User(user) => {
                        put_document(database, session, &key, guard, |rev| {
                            MongoUserDocument::from_entity(user, rev)
                        })
                        .await?;
                        events.push(ChangeEvent::User(user.clone()));
                    }
                    Document::Waiting(entry) => {
                        put_document(database, session, &key, guard, |rev| {
                            MongoWaitingDocument::from_entity(entry, rev)
                        })
                        .await?;
                        events.push(ChangeEvent::Rooms);
                    }
                    Document::Session(value) => {
                        put_document(database, session, &key, guard, |rev| {
                            MongoSessionDocument::from_entity(value, rev)
                        })
                        .await?;
                        events.push(ChangeEvent::Session(value.clone()));
                    }
                    Document::Lobby(lobby) => {
                        put_document(database, session, &key, guard, |rev| {
                            MongoLobbyDocument::from_entity(lobby, rev)
                        })
                        .await?;
                    }
                }
            }
            WriteOp::Delete(key) => {
                let guard = guards.remove(&key);
                if delete_document(database, session, &key, guard).await?
                    && matches!(key, DocKey::Waiting(_))
                {
                    events.push(ChangeEvent::Rooms);
                }
            }
            WriteOp::Append(draft) => {
                let message = append(database, session, draft).await?;
                events.push(ChangeEvent::Message(message));
            }
        }
    }

    for (_, guard) in guards {
        check_untouched(database, session, guard).await?;
    }

    events.dedup();
    Ok(events)
}

async fn put_document<T>(
    database: &Database,
    session: &mut ClientSession,
    key: &DocKey,
    guard: Option<Precondition>,
    build: impl FnOnce(i64) -> T,
) -> StorageResult<()>
where
    T: Serialize + Send + Sync,
{
    let (name, id) = locate(key);
    let collection: Collection<T> = database.collection(name);

    match guard {
        Some(Precondition::Absent(_)) => {
            collection
                .insert_one(build(1))
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::write(key, source))?;
        }
        Some(Precondition::Revision(_, revision)) => {
            let rev = to_rev(revision);
            let result = collection
                .replace_one(doc! {"_id": id.as_str(), "rev": rev}, build(rev + 1))
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::write(key, source))?;
            if result.matched_count == 0 {
                return Err(StorageError::conflict(key));
            }
        }
        None => {
            let current = database
                .collection::<RevisionOnly>(name)
                .find_one(doc! {"_id": id.as_str()})
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::read(key, source))?;
            let rev = current.map_or(1, |current| current.rev + 1);
            collection
                .replace_one(doc! {"_id": id.as_str()}, build(rev))
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::write(key, source))?;
        }
    }
    Ok(())
}

/// Returns whether a document was removed.
async fn delete_document(
    database: &Database,
    session: &mut ClientSession,
    key: &DocKey,
    guard: Option<Precondition>,
) -> StorageResult<bool> {
    let (name, id) = locate(key);
    let collection = database.collection::<mongodb::bson::Document>(name);
    let filter = match guard {
        Some(Precondition::Absent(_)) => return Ok(false),
        Some(Precondition::Revision(_, revision)) => doc! {"_id": id.as_str(), "rev": to_rev(revision)},
        None => doc! {"_id": id.as_str()},
    };
    let guarded = filter.contains_key("rev");

    let result = collection
        .delete_one(filter)
        .session(&mut *session)
        .await
        .map_err(|source| MongoDaoError::write(key, source))?;
    if guarded && result.deleted_count == 0 {
        return Err(StorageError::conflict(key));
    }
    Ok(result.deleted_count > 0)
}

/// Enforce a precondition on a document the batch read but does not write.
async fn check_untouched(
    database: &Database,
    session: &mut ClientSession,
    guard: Precondition,
) -> StorageResult<()> {
    let key = guard.key().clone();
    let (name, id) = locate(&key);
    match guard {
        Precondition::Absent(_) => {
            let existing = database
                .collection::<RevisionOnly>(name)
                .find_one(doc! {"_id": id.as_str()})
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::read(&key, source))?;
            if existing.is_some() {
                return Err(StorageError::conflict(&key));
            }
        }
        Precondition::Revision(_, revision) => {
            // Bumping the revision makes concurrent writers of this document conflict too.
            let result = database
                .collection::<mongodb::bson::Document>(name)
                .update_one(
                    doc! {"_id": id.as_str(), "rev": to_rev(revision)},
                    doc! {"$inc": {"rev": 1_i64}},
                )
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::write(&key, source))?;
            if result.matched_count == 0 {
                return Err(StorageError::conflict(&key));
            }
        }
    }
    Ok(())
}

async fn append(
    database: &Database,
    session: &mut ClientSession,
    draft: MessageDraft,
) -> StorageResult<MessageEntity> {
    let target = format!("{COUNTER_COLLECTION}/{}", draft.session_id);
    let counter = database
        .collection::<MongoCounterDocument>(COUNTER_COLLECTION)
        .find_one_and_update(
            doc! {"_id": draft.session_id.to_string()},
            doc! {
                "$inc": {"seq": 1_i64},
                "$max": {"last_timestamp": DateTime::now()},
            },
        )
        .upsert(true)
        .return_document(ReturnDocument::After)
        .session(&mut *session)
        .await
        .map_err(|source| MongoDaoError::write(&target, source))?
        .ok_or_else(|| StorageError::corrupted(&target, "counter missing after upsert"))?;

    let message = draft.into_entity(
        to_revision(counter.seq),
        counter.last_timestamp.to_system_time(),
    );
    database
        .collection::<MongoMessageDocument>(MESSAGE_COLLECTION)
        .insert_one(MongoMessageDocument::from(&message))
        .session(&mut *session)
        .await
        .map_err(|source| MongoDaoError::write(MESSAGE_COLLECTION, source))?;
    Ok(message)
}

impl DebateStore for MongoDebateStore {
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Versioned<Document>>>> {
        let store = self.clone();
        Box::pin(async move { store.get(key).await })
    }

    fn waiting_for_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<WaitingEntryEntity>>>> {
        let store = self.clone();
        Box::pin(async move { store.find_waiting(doc! {"topic": topic}).await })
    }

    fn waiting_for_user(
        &self,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<WaitingEntryEntity>>>> {
        let store = self.clone();
        Box::pin(async move { store.find_waiting(doc! {"user_id": user_id}).await })
    }

    fn list_waiting(&self) -> BoxFuture<'static, StorageResult<Vec<WaitingEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_waiting(doc! {})
                .await?
                .into_iter()
                .map(|versioned| versioned.value)
                .collect())
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(batch).await.map(|_| ()) })
    }

    fn append_message(&self, draft: MessageDraft) -> BoxFuture<'static, StorageResult<MessageEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let target = format!("{MESSAGE_COLLECTION}/{}", draft.session_id);
            let events = store
                .commit(WriteBatch {
                    preconditions: Vec::new(),
                    writes: vec![WriteOp::Append(draft)],
                })
                .await?;
            events
                .into_iter()
                .find_map(|event| match event {
                    ChangeEvent::Message(message) => Some(message),
                    _ => None,
                })
                .ok_or_else(|| StorageError::corrupted(target, "append produced no message"))
        })
    }

    fn list_messages(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_messages(session_id).await })
    }

    fn top_users(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.top_users(limit).await })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
