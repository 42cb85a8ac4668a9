use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{bson::doc, options::ReturnDocument};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::RoomDatabase,
    error::{MongoDaoError, MongoResult},
    models::{MongoMessageDocument, MongoRoomDocument, doc_id, to_i64},
};
use crate::{
    dao::{
        models::{MessageEntity, RoomEntity},
        room_store::RoomStore,
        storage::StorageResult,
    },
    state::room::RoomId,
};

const ROOM_COUNTER: &str = "rooms";

/// MongoDB-backed [`RoomStore`].
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<RoomDatabase>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .ping()
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database = RoomDatabase::open(&self.config).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Connect to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = RoomDatabase::open(&config).await?;
        database.ensure_indexes().await?;

        Ok(Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        })
    }

    async fn database(&self) -> RoomDatabase {
        self.inner.database.read().await.clone()
    }

    /// Atomically increment a named counter and return its new value.
    async fn next_sequence(&self, counter: String) -> MongoResult<i64> {
        let collection = self.database().await.counters();
        let updated = collection
            .find_one_and_update(doc! {"_id": counter.as_str()}, doc! {"$inc": {"seq": 1_i64}})
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::NextSequence {
                counter: counter.clone(),
                source,
            })?;

        updated
            .map(|doc| doc.seq)
            .ok_or(MongoDaoError::MissingSequence { counter })
    }

    async fn allocate_room_id(&self) -> MongoResult<RoomId> {
        let seq = self.next_sequence(ROOM_COUNTER.to_owned()).await?;
        Ok(seq.max(0) as RoomId)
    }

    async fn save_room(&self, room: RoomEntity) -> MongoResult<()> {
        let id = room.id;
        let document = MongoRoomDocument::try_from(room)?;
        let collection = self.database().await.rooms();
        collection
            .replace_one(doc_id(to_i64(id)?), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveRoom { id, source })?;
        Ok(())
    }

    async fn find_room(&self, id: RoomId) -> MongoResult<Option<RoomEntity>> {
        let collection = self.database().await.rooms();
        let document = collection
            .find_one(doc_id(to_i64(id)?))
            .await
            .map_err(|source| MongoDaoError::LoadRoom { id, source })?;

        document.map(RoomEntity::try_from).transpose()
    }

    async fn list_rooms(&self) -> MongoResult<Vec<RoomEntity>> {
        let collection = self.database().await.rooms();
        let documents: Vec<MongoRoomDocument> = collection
            .find(doc! {})
            .sort(doc! {"_id": 1})
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?;

        documents.into_iter().map(RoomEntity::try_from).collect()
    }

    async fn append_message(&self, message: MessageEntity) -> MongoResult<()> {
        let room_id = message.room_id;
        let seq = self.next_sequence(format!("messages:{room_id}")).await?;
        let document = MongoMessageDocument::new(seq, message)?;
        let collection = self.database().await.messages();
        collection
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::AppendMessage { room_id, source })?;
        Ok(())
    }

    async fn list_messages(&self, room_id: RoomId) -> MongoResult<Vec<MessageEntity>> {
        let collection = self.database().await.messages();
        let documents: Vec<MongoMessageDocument> = collection
            .find(doc! {"room_id": to_i64(room_id)?})
            .sort(doc! {"seq": 1})
            .await
            .map_err(|source| MongoDaoError::ListMessages { room_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListMessages { room_id, source })?;

        documents.into_iter().map(MessageEntity::try_from).collect()
    }
}

impl RoomStore for MongoRoomStore {
    fn allocate_room_id(&self) -> BoxFuture<'static, StorageResult<RoomId>> {
        let store = self.clone();
        Box::pin(async move { store.allocate_room_id().await.map_err(Into::into) })
    }

    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_room(room).await.map_err(Into::into) })
    }

    fn find_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room(id).await.map_err(Into::into) })
    }

    fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_rooms().await.map_err(Into::into) })
    }

    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_message(message).await.map_err(Into::into) })
    }

    fn list_messages(
        &self,
        room_id: RoomId,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_messages(room_id).await.map_err(Into::into) })
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
