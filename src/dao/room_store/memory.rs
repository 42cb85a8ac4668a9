use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::RoomStore;
use crate::{
    dao::{
        models::{MessageEntity, RoomEntity},
        storage::StorageResult,
    },
    state::room::RoomId,
};

/// Process-local store used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    last_room_id: AtomicU64,
    rooms: DashMap<RoomId, RoomEntity>,
    messages: DashMap<RoomId, Vec<MessageEntity>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryRoomStore {
    fn allocate_room_id(&self) -> BoxFuture<'static, StorageResult<RoomId>> {
        let id = self.inner.last_room_id.fetch_add(1, Ordering::Relaxed) + 1;
        Box::pin(async move { Ok(id) })
    }

    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.rooms.insert(room.id, room);
            Ok(())
        })
    }

    fn find_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.rooms.get(&id).map(|room| room.clone())) })
    }

    fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut rooms: Vec<RoomEntity> = store
                .inner
                .rooms
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            rooms.sort_by_key(|room| room.id);
            Ok(rooms)
        })
    }

    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .inner
                .messages
                .entry(message.room_id)
                .or_default()
                .push(message);
            Ok(())
        })
    }

    fn list_messages(
        &self,
        room_id: RoomId,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .messages
                .get(&room_id)
                .map(|log| log.clone())
                .unwrap_or_default())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::state::{
        message::{Message, SystemNotice},
        room::Role,
    };

    #[tokio::test]
    async fn messages_round_trip_in_append_order() {
        let store = MemoryRoomStore::new();
        let base = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        let written = vec![
            Message::participant(4, 12, Role::Proponent, "opening".into(), base),
            Message::system(
                4,
                SystemNotice::UserJoined {
                    user_id: 13,
                    role: Role::Observer,
                },
                base + Duration::milliseconds(5),
            ),
            Message::participant(4, 13, Role::Observer, "hello".into(), base + Duration::seconds(1)),
        ];
        for message in &written {
            store.append_message(message.into()).await.unwrap();
        }
        store
            .append_message((&Message::participant(5, 1, Role::Opponent, "elsewhere".into(), base)).into())
            .await
            .unwrap();

        let read: Vec<Message> = store
            .list_messages(4)
            .await
            .unwrap()
            .into_iter()
            .map(Message::from)
            .collect();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn room_ids_are_unique_and_increasing() {
        let store = MemoryRoomStore::new();
        let first = store.allocate_room_id().await.unwrap();
        let second = store.allocate_room_id().await.unwrap();
        assert!(second > first);
    }
}
