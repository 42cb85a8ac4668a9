use std::{
    future::Future,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, info};

use crate::{
    dao::models::RoomEntity,
    state::{
        room::{RoomId, RoomSession, RoomSettings},
        session::{DebateSession, SessionContext, SessionError},
    },
};

type SessionSlot = Arc<OnceCell<Arc<DebateSession>>>;

/// Maps room identifiers to their live session, loading rooms from the store on first use.
pub struct SessionDirectory {
    ctx: SessionContext,
    sessions: DashMap<RoomId, SessionSlot>,
}

impl SessionDirectory {
    /// Build a directory and the task that releases rooms once they finish.
    pub fn new(ctx: SessionContext) -> Arc<Self> {
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
        let directory = Arc::new(Self {
            ctx: SessionContext {
                finished: Some(finished_tx),
                ..ctx
            },
            sessions: DashMap::new(),
        });

        let weak: Weak<Self> = Arc::downgrade(&directory);
        tokio::spawn(async move {
            while let Some(room_id) = finished_rx.recv().await {
                let Some(directory) = weak.upgrade() else {
                    break;
                };
                directory.release_if_idle(room_id).await;
            }
        });

        directory
    }

    /// Allocate an identifier, persist a fresh room and make its session live.
    pub async fn create_room(
        &self,
        settings: RoomSettings,
    ) -> Result<Arc<DebateSession>, SessionError> {
        let store = self.ctx.store.require().await?;
        let id = store.allocate_room_id().await?;
        let room = RoomSession::new(id, settings, OffsetDateTime::now_utc());
        store.save_room(RoomEntity::from(&room)).await?;

        let session = DebateSession::spawn(room, self.ctx.clone());
        self.sessions
            .insert(id, Arc::new(OnceCell::new_with(Some(session.clone()))));
        info!(room_id = id, "room created");
        Ok(session)
    }

    /// Live session of a room, loading it from the store when needed.
    pub async fn get(&self, room_id: RoomId) -> Result<Arc<DebateSession>, SessionError> {
        loop {
            let slot = self.sessions.entry(room_id).or_default().clone();
            let loaded = slot
                .get_or_try_init(|| async {
                    let store = self.ctx.store.require().await?;
                    let entity = store
                        .find_room(room_id)
                        .await?
                        .ok_or(SessionError::RoomNotFound(room_id))?;
                    debug!(room_id, "room loaded into directory");
                    Ok::<_, SessionError>(DebateSession::spawn(entity.into(), self.ctx.clone()))
                })
                .await;

            match loaded {
                // Released between the lookup and now; drop the stale slot and load again.
                Ok(session) if session.is_retired() => {
                    self.sessions.remove_if(&room_id, |_, slot| {
                        slot.get().is_some_and(|live| Arc::ptr_eq(live, session))
                    });
                }
                Ok(session) => return Ok(session.clone()),
                Err(err) => {
                    self.sessions
                        .remove_if(&room_id, |_, slot| slot.get().is_none());
                    return Err(err);
                }
            }
        }
    }

    /// Run `op` on the room's live session. When the session is released while `op` runs, it is
    /// run once more against a freshly loaded one.
    pub async fn with_session<T, F, Fut>(&self, room_id: RoomId, op: F) -> Result<T, SessionError>
    where
        F: Fn(Arc<DebateSession>) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        match op(self.get(room_id).await?).await {
            Err(SessionError::Retired(_)) => {
                debug!(room_id, "session released during the call; retrying on a fresh load");
                op(self.get(room_id).await?).await
            }
            outcome => outcome,
        }
    }

    /// Every stored room, ordered by identifier.
    pub async fn list_rooms(&self) -> Result<Vec<RoomSession>, SessionError> {
        let store = self.ctx.store.require().await?;
        let rooms = store.list_rooms().await?;
        Ok(rooms.into_iter().map(RoomSession::from).collect())
    }

    /// Drop the session of a finished room that no connection is attached to.
    pub async fn release_if_idle(&self, room_id: RoomId) -> bool {
        let Some(session) = self
            .sessions
            .get(&room_id)
            .and_then(|slot| slot.get().cloned())
        else {
            return false;
        };

        if !session.retire_if_idle().await {
            return false;
        }

        let removed = self
            .sessions
            .remove_if(&room_id, |_, slot| {
                slot.get().is_some_and(|live| Arc::ptr_eq(live, &session))
            })
            .is_some();
        if removed {
            debug!(room_id, "finished room released from directory");
        }
        removed
    }

    /// Number of rooms with a live session.
    pub fn live_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }
}
