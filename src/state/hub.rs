use std::sync::Arc;

use axum::extract::ws;
use tracing::warn;

use crate::{
    dto::ws::RoomEventPayload,
    state::{
        message::Message,
        registry::{CloseReason, ConnectionRegistry},
        room::RoomId,
    },
};

/// Fans room messages out to every connection registered for that room.
#[derive(Clone)]
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastHub {
    /// Build a hub publishing into `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Registry the hub publishes into.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Queue `message` on every connection of `room_id` and return how many accepted it.
    ///
    /// Never waits on a consumer: a connection whose queue is full or whose writer is gone is
    /// unregistered and closed instead.
    pub fn publish(&self, room_id: RoomId, message: &Message) -> usize {
        let payload = match serde_json::to_string(&RoomEventPayload::from(message)) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(room_id, error = %err, "failed to serialize room event; dropping it");
                return 0;
            }
        };
        let frame = ws::Message::Text(payload.into());

        let mut delivered = 0;
        for connection in self.registry.connections(room_id) {
            match connection.try_deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        room_id,
                        user_id = connection.user_id,
                        connection_id = %connection.id,
                        error = %err,
                        "evicting unresponsive connection"
                    );
                    self.registry.unregister(room_id, connection.id);
                    connection.close(CloseReason::Unresponsive);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::state::{
        message::SystemNotice,
        registry::ConnectionHandle,
        room::Role,
    };

    fn notice(room_id: RoomId, user_id: u64) -> Message {
        Message::system(
            room_id,
            SystemNotice::UserLeft { user_id },
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[tokio::test]
    async fn saturated_connection_is_evicted_and_others_keep_receiving() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = BroadcastHub::new(registry.clone());

        let (stuck, stuck_channels) = ConnectionHandle::new(1, 10, Role::Observer, 2);
        let (healthy, mut healthy_channels) = ConnectionHandle::new(1, 11, Role::Observer, 16);
        registry.register(stuck);
        registry.register(healthy);

        for user_id in 0..2 {
            assert_eq!(hub.publish(1, &notice(1, user_id)), 2);
        }
        assert_eq!(hub.publish(1, &notice(1, 2)), 1);
        assert_eq!(registry.count_connections(1), 1);
        assert_eq!(
            *stuck_channels.shutdown.borrow(),
            Some(CloseReason::Unresponsive)
        );

        assert_eq!(hub.publish(1, &notice(1, 3)), 1);
        let mut received = Vec::new();
        while let Ok(frame) = healthy_channels.outbound.try_recv() {
            received.push(frame);
        }
        assert_eq!(received.len(), 4);
    }

    #[tokio::test]
    async fn frames_match_the_wire_shape() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = BroadcastHub::new(registry.clone());
        let (handle, mut channels) = ConnectionHandle::new(5, 10, Role::Observer, 4);
        registry.register(handle);

        hub.publish(5, &notice(5, 10));

        let Some(ws::Message::Text(text)) = channels.outbound.recv().await else {
            panic!("expected a text frame");
        };
        let payload: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(payload["type"], "system_message");
        assert_eq!(payload["room_id"], 5);
        assert_eq!(payload["user_id"], 0);
        assert_eq!(payload["role"], "system");
        assert_eq!(payload["timestamp"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn publishing_to_an_empty_room_is_a_no_op() {
        let hub = BroadcastHub::new(Arc::new(ConnectionRegistry::new()));
        assert_eq!(hub.publish(9, &notice(9, 1)), 0);
    }
}
