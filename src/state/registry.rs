use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::{self, CloseFrame, Utf8Bytes};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::debug;
use uuid::Uuid;

use crate::state::room::{Role, RoomId, UserId};

/// Identifier of a single live connection.
pub type ConnectionId = Uuid;

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer went away or the handler finished normally.
    Normal,
    /// The user gave up their role in the room.
    LeftRoom,
    /// The outbound queue filled up or a write failed.
    Unresponsive,
    /// The process is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// WebSocket close code sent to the peer.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal | CloseReason::LeftRoom => 1000,
            CloseReason::Unresponsive => 1008,
            CloseReason::ServerShutdown => 1001,
        }
    }

    /// Human readable close reason.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Normal => "bye",
            CloseReason::LeftRoom => "left room",
            CloseReason::Unresponsive => "connection too slow",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }

    /// Close frame carrying this reason.
    pub fn frame(self) -> ws::Message {
        ws::Message::Close(Some(CloseFrame {
            code: self.code(),
            reason: Utf8Bytes::from_static(self.as_str()),
        }))
    }
}

/// Transport-level failure while handing a frame to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The bounded outbound queue is saturated.
    #[error("outbound queue is full")]
    QueueFull,
    /// The writer side is gone.
    #[error("connection lost")]
    ConnectionLost,
}

/// Registry-side handle of a live connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    /// Unique connection id.
    pub id: ConnectionId,
    /// Room the connection belongs to.
    pub room_id: RoomId,
    /// Connected user.
    pub user_id: UserId,
    /// Role resolved when the connection was accepted.
    pub role: Role,
    tx: mpsc::Sender<ws::Message>,
    shutdown: Arc<watch::Sender<Option<CloseReason>>>,
}

/// Task-side ends of a connection: the outbound queue and the close signal.
pub struct ConnectionChannels {
    /// Frames waiting to be written, in publish order.
    pub outbound: mpsc::Receiver<ws::Message>,
    /// Becomes `Some` once the server decides to close the connection.
    pub shutdown: watch::Receiver<Option<CloseReason>>,
}

impl ConnectionHandle {
    /// Create a handle with a bounded outbound queue of `capacity` frames.
    pub fn new(
        room_id: RoomId,
        user_id: UserId,
        role: Role,
        capacity: usize,
    ) -> (Self, ConnectionChannels) {
        let (tx, outbound) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown) = watch::channel(None);
        let handle = Self {
            id: Uuid::new_v4(),
            room_id,
            user_id,
            role,
            tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (handle, ConnectionChannels { outbound, shutdown })
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: ws::Message) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::ConnectionLost,
        })
    }

    /// Ask the connection tasks to send a close frame and stop. Only the first reason sticks.
    pub fn close(&self, reason: CloseReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Reason passed to [`ConnectionHandle::close`], if it was called.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.shutdown.borrow()
    }
}

/// Live connections grouped by room.
///
/// The map lock is held only while buckets are edited or copied; closing sockets and queueing
/// frames always happen after it is released.
#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under its room, creating the bucket when needed.
    pub fn register(&self, handle: ConnectionHandle) {
        debug!(
            room_id = handle.room_id,
            user_id = handle.user_id,
            connection_id = %handle.id,
            "connection registered"
        );
        self.rooms
            .entry(handle.room_id)
            .or_default()
            .insert(handle.id, handle);
    }

    /// Remove a connection; an emptied bucket is dropped. Returns whether it was present.
    pub fn unregister(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(&room_id) {
            Some(mut bucket) => bucket.remove(&connection_id).is_some(),
            None => false,
        };
        self.rooms.remove_if(&room_id, |_, bucket| bucket.is_empty());
        if removed {
            debug!(room_id, connection_id = %connection_id, "connection unregistered");
        }
        removed
    }

    /// Remove and close every connection `user_id` holds in `room_id`. Returns how many.
    pub fn force_disconnect(&self, room_id: RoomId, user_id: UserId, reason: CloseReason) -> usize {
        let mut evicted = Vec::new();
        if let Some(mut bucket) = self.rooms.get_mut(&room_id) {
            bucket.retain(|_, handle| {
                if handle.user_id == user_id {
                    evicted.push(handle.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.rooms.remove_if(&room_id, |_, bucket| bucket.is_empty());

        for handle in &evicted {
            handle.close(reason);
        }
        if !evicted.is_empty() {
            debug!(room_id, user_id, count = evicted.len(), ?reason, "connections force-closed");
        }
        evicted.len()
    }

    /// Number of live connections in a room.
    pub fn count_connections(&self, room_id: RoomId) -> usize {
        self.rooms.get(&room_id).map_or(0, |bucket| bucket.len())
    }

    /// Copy of the handles currently registered for a room.
    pub fn connections(&self, room_id: RoomId) -> Vec<ConnectionHandle> {
        self.rooms
            .get(&room_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and close every connection of every room. Returns how many.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let room_ids: Vec<RoomId> = self.rooms.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;
        for room_id in room_ids {
            if let Some((_, bucket)) = self.rooms.remove(&room_id) {
                for handle in bucket.into_values() {
                    handle.close(reason);
                    closed += 1;
                }
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bucket_is_dropped_on_unregister() {
        let registry = ConnectionRegistry::new();
        let (handle, _channels) = ConnectionHandle::new(1, 10, Role::Observer, 4);
        let id = handle.id;
        registry.register(handle);
        assert_eq!(registry.count_connections(1), 1);

        assert!(registry.unregister(1, id));
        assert!(!registry.unregister(1, id));
        assert_eq!(registry.count_connections(1), 0);
        assert!(registry.rooms.get(&1).is_none());
    }

    #[test]
    fn force_disconnect_only_touches_the_user_in_that_room() {
        let registry = ConnectionRegistry::new();
        let (first, first_channels) = ConnectionHandle::new(1, 10, Role::Proponent, 4);
        let (second, _second_channels) = ConnectionHandle::new(1, 10, Role::Proponent, 4);
        let (other, other_channels) = ConnectionHandle::new(1, 11, Role::Observer, 4);
        let (elsewhere, _elsewhere_channels) = ConnectionHandle::new(2, 10, Role::Observer, 4);
        for handle in [first, second, other, elsewhere] {
            registry.register(handle);
        }

        assert_eq!(registry.force_disconnect(1, 10, CloseReason::LeftRoom), 2);
        assert_eq!(registry.count_connections(1), 1);
        assert_eq!(registry.count_connections(2), 1);
        assert_eq!(*first_channels.shutdown.borrow(), Some(CloseReason::LeftRoom));
        assert_eq!(*other_channels.shutdown.borrow(), None);
    }

    #[test]
    fn first_close_reason_wins() {
        let (handle, channels) = ConnectionHandle::new(1, 10, Role::Observer, 4);
        handle.close(CloseReason::Unresponsive);
        handle.close(CloseReason::ServerShutdown);
        assert_eq!(*channels.shutdown.borrow(), Some(CloseReason::Unresponsive));
    }

    #[test]
    fn full_queue_is_reported() {
        let (handle, _channels) = ConnectionHandle::new(1, 10, Role::Observer, 1);
        handle.try_deliver(ws::Message::Text("a".into())).unwrap();
        assert_eq!(
            handle.try_deliver(ws::Message::Text("b".into())),
            Err(DeliveryError::QueueFull)
        );
    }

    #[test]
    fn closed_receiver_is_reported_as_lost() {
        let (handle, channels) = ConnectionHandle::new(1, 10, Role::Observer, 1);
        drop(channels);
        assert_eq!(
            handle.try_deliver(ws::Message::Text("a".into())),
            Err(DeliveryError::ConnectionLost)
        );
    }

    #[test]
    fn close_all_empties_the_registry() {
        let registry = ConnectionRegistry::new();
        let (a, a_channels) = ConnectionHandle::new(1, 10, Role::Observer, 4);
        let (b, _b_channels) = ConnectionHandle::new(2, 11, Role::Observer, 4);
        registry.register(a);
        registry.register(b);

        assert_eq!(registry.close_all(CloseReason::ServerShutdown), 2);
        assert_eq!(registry.count_connections(1) + registry.count_connections(2), 0);
        assert_eq!(*a_channels.shutdown.borrow(), Some(CloseReason::ServerShutdown));
    }
}
