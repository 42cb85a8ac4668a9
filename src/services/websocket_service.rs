use std::{fmt::Display, sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dto::ws::RoomInboundMessage,
    error::ServiceError,
    state::{
        DebateSession, SharedState,
        registry::{CloseReason, ConnectionChannels, ConnectionHandle},
        room::{Role, RoomId, UserId},
    },
};

/// Resolve the caller's role before accepting an upgrade.
pub async fn authorize(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Role, ServiceError> {
    let session = state.directory().get(room_id).await?;
    session.role_of(user_id).await.ok_or_else(|| {
        ServiceError::NotInRoom(format!("user {user_id} holds no role in room {room_id}"))
    })
}

/// Attach a connection to the room's current session, which checks the role again.
async fn attach(
    state: &SharedState,
    handle: &ConnectionHandle,
) -> Result<Arc<DebateSession>, ServiceError> {
    let session = state
        .directory()
        .with_session(handle.room_id, |session| {
            let handle = handle.clone();
            async move { session.attach(handle).await.map(|()| session) }
        })
        .await?;
    Ok(session)
}

/// Handle the full lifecycle of one room connection: register it, pump frames both ways and
/// clean up once either side gives up.
pub async fn handle_socket(
    state: SharedState,
    room_id: RoomId,
    user_id: UserId,
    role: Role,
    mut socket: WebSocket,
) {
    let config = state.config().clone();
    let (handle, channels) =
        ConnectionHandle::new(room_id, user_id, role, config.outbound_queue_capacity);

    let session = match attach(&state, &handle).await {
        Ok(session) => session,
        Err(err) => {
            info!(room_id, user_id, error = %err, "connection refused after upgrade");
            let _ = socket.send(CloseReason::LeftRoom.frame()).await;
            return;
        }
    };

    let ConnectionChannels { outbound, shutdown } = channels;
    let (sender, receiver) = socket.split();
    info!(room_id, user_id, %role, connection_id = %handle.id, "room connection opened");

    // Dedicated writer task keeps outbound frames flowing while the reader awaits inbound ones.
    let writer_task = tokio::spawn(write_loop(
        sender,
        outbound,
        shutdown.clone(),
        handle.clone(),
        config.ping_interval,
        config.write_timeout,
    ));

    read_loop(
        &session,
        receiver,
        shutdown,
        &handle,
        user_id,
        config.idle_timeout,
    )
    .await;

    state.registry().unregister(room_id, handle.id);
    handle.close(CloseReason::Normal);
    let _ = writer_task.await;
    info!(room_id, user_id, connection_id = %handle.id, "room connection closed");

    state.directory().release_if_idle(room_id).await;
}

/// Drain the outbound queue into the socket, ping on an independent timer and send a close frame
/// once the connection is told to stop. A failed or slow write closes the connection.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<Option<CloseReason>>,
    handle: ConnectionHandle,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            reason = wait_for_close(&mut shutdown) => {
                let _ = timeout(write_timeout, sink.send(reason.frame())).await;
                break;
            }
            next = outbound.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        match timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(connection_id = %handle.id, error = %err, "websocket write failed");
                handle.close(CloseReason::Unresponsive);
                break;
            }
            Err(_) => {
                warn!(connection_id = %handle.id, "websocket write timed out");
                handle.close(CloseReason::Unresponsive);
                break;
            }
        }
    }

    let _ = sink.close().await;
}

/// Forward chat frames into the session until the peer leaves, goes silent or the server closes
/// the connection.
async fn read_loop<R, E>(
    session: &DebateSession,
    mut stream: R,
    mut shutdown: watch::Receiver<Option<CloseReason>>,
    handle: &ConnectionHandle,
    user_id: UserId,
    idle_timeout: Duration,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let room_id = session.id();
    loop {
        let next = tokio::select! {
            reason = wait_for_close(&mut shutdown) => {
                debug!(room_id, user_id, ?reason, "connection closed by server");
                break;
            }
            next = timeout(idle_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => {
                info!(room_id, user_id, "connection idle for too long; dropping it");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(err))) => {
                debug!(room_id, user_id, error = %err, "websocket receive error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_text(session, user_id, text.as_str()).await;
            }
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = handle.try_deliver(Message::Pong(payload));
            }
            Ok(Some(Ok(Message::Pong(_) | Message::Binary(_)))) => {}
        }
    }
}

async fn handle_text(session: &DebateSession, user_id: UserId, text: &str) {
    let room_id = session.id();
    let input = match serde_json::from_str::<RoomInboundMessage>(text) {
        Ok(RoomInboundMessage::DebateMessage(input)) => input,
        Ok(RoomInboundMessage::Unknown) => {
            debug!(room_id, user_id, "ignoring unsupported frame type");
            return;
        }
        Err(err) => {
            warn!(room_id, user_id, error = %err, "failed to parse room frame");
            return;
        }
    };

    if let Err(err) = input.validate() {
        warn!(room_id, user_id, error = %err, "rejected invalid chat message");
        return;
    }

    if let Err(err) = session.submit_message(user_id, input.content).await {
        warn!(room_id, user_id, error = %err, "chat message not accepted");
    }
}

/// Resolves with the close reason once one is set; a dropped handle counts as a normal close.
async fn wait_for_close(shutdown: &mut watch::Receiver<Option<CloseReason>>) -> CloseReason {
    match shutdown.wait_for(Option::is_some).await {
        Ok(reason) => (*reason).unwrap_or(CloseReason::Normal),
        Err(_) => CloseReason::Normal,
    }
}
