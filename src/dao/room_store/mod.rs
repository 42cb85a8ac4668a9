pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{RwLock, watch};

use crate::dao::{
    models::{MessageEntity, RoomEntity},
    storage::{StorageError, StorageResult},
};
use crate::state::room::RoomId;

pub use memory::MemoryRoomStore;

/// Durable store for rooms and their append-only message logs.
pub trait RoomStore: Send + Sync {
    /// Reserve a fresh room identifier.
    fn allocate_room_id(&self) -> BoxFuture<'static, StorageResult<RoomId>>;
    /// Insert or replace a room snapshot.
    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Every known room ordered by identifier.
    fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;
    /// Append to a room's log. Appended entries are never rewritten.
    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// A room's log in append order.
    fn list_messages(&self, room_id: RoomId)
    -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Holder of the currently installed store and of the degraded flag.
pub struct StoreSlot {
    store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
}

impl StoreSlot {
    /// Empty slot; the application starts degraded until a store is installed.
    pub fn degraded() -> Self {
        let (degraded, _rx) = watch::channel(true);
        Self {
            store: RwLock::new(None),
            degraded,
        }
    }

    /// Slot with a store already installed.
    pub fn with_store(store: Arc<dyn RoomStore>) -> Self {
        let (degraded, _rx) = watch::channel(false);
        Self {
            store: RwLock::new(Some(store)),
            degraded,
        }
    }

    /// Currently installed store, if any.
    pub async fn current(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Store to use for an operation, failing while degraded.
    pub async fn require(&self) -> StorageResult<Arc<dyn RoomStore>> {
        if self.is_degraded() {
            return Err(StorageError::Degraded);
        }
        self.current().await.ok_or(StorageError::Degraded)
    }

    /// Install a store and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the store and enter degraded mode.
    pub async fn clear(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update the degraded flag, notifying watchers only on change.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }
}
