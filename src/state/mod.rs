pub mod directory;
pub mod hub;
pub mod message;
pub mod registry;
pub mod room;
pub mod scheduler;
pub mod session;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::AppConfig,
    dao::{
        room_store::{RoomStore, StoreSlot},
        storage::StorageResult,
    },
};

pub use self::directory::SessionDirectory;
pub use self::hub::BroadcastHub;
pub use self::registry::ConnectionRegistry;
pub use self::session::{DebateSession, SessionContext, SessionError};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, store, live connections and room sessions.
///
/// Constructed once at process start and torn down at shutdown; every component receives it
/// explicitly.
pub struct AppState {
    config: AppConfig,
    store: Arc<StoreSlot>,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<SessionDirectory>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::build(config, StoreSlot::degraded())
    }

    /// Construct a state whose store is available from the start.
    pub fn with_store(config: AppConfig, store: Arc<dyn RoomStore>) -> SharedState {
        Self::build(config, StoreSlot::with_store(store))
    }

    fn build(config: AppConfig, slot: StoreSlot) -> SharedState {
        let store = Arc::new(slot);
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = BroadcastHub::new(registry.clone());
        let directory = SessionDirectory::new(SessionContext {
            store: store.clone(),
            hub,
            transition_timeout: Some(config.transition_timeout).filter(|limit| !limit.is_zero()),
            finished: None,
        });

        Arc::new(Self {
            config,
            store,
            registry,
            directory,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Live connections grouped by room.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Room sessions.
    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Store to use for an operation, failing while degraded.
    pub async fn require_store(&self) -> StorageResult<Arc<dyn RoomStore>> {
        self.store.require().await
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_room_store(&self, store: Arc<dyn RoomStore>) {
        self.store.install(store).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        self.store.clear().await;
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    /// Update the degraded flag, notifying watchers only on change.
    pub fn update_degraded(&self, value: bool) {
        self.store.set_degraded(value);
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.store.degraded_watcher()
    }
}
