//! Business logic behind the room REST routes: resolve the session, check the caller's role and
//! hand the operation to the room's state machine.

use tracing::debug;

use crate::{
    dto::{
        room::{CreateRoomRequest, RoomSnapshot, RoomSummary},
        ws::RoomEventPayload,
    },
    error::ServiceError,
    state::{
        DebateSession, SharedState,
        room::{Role, RoomId, RoomSession, UserId},
    },
};

fn snapshot(state: &SharedState, room: &RoomSession) -> RoomSnapshot {
    RoomSnapshot::new(room, state.registry().count_connections(room.id))
}

/// Open a new room and return its snapshot.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<RoomSnapshot, ServiceError> {
    let settings = request.into_settings(state.config().default_round_duration);
    let session = state.directory().create_room(settings).await?;
    Ok(snapshot(state, &session.snapshot().await))
}

/// Summaries of every stored room.
pub async fn list_rooms(state: &SharedState) -> Result<Vec<RoomSummary>, ServiceError> {
    let rooms = state.directory().list_rooms().await?;
    Ok(rooms
        .iter()
        .map(|room| RoomSummary::new(room, state.registry().count_connections(room.id)))
        .collect())
}

/// Current view of a room.
pub async fn get_room(state: &SharedState, room_id: RoomId) -> Result<RoomSnapshot, ServiceError> {
    let session = state.directory().get(room_id).await?;
    Ok(snapshot(state, &session.snapshot().await))
}

/// Give the caller a role in the room.
pub async fn join_room(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    role: Role,
) -> Result<RoomSnapshot, ServiceError> {
    let room = state
        .directory()
        .with_session(room_id, |session| async move { session.join(user_id, role).await })
        .await?;
    Ok(snapshot(state, &room))
}

/// Remove the caller from the room.
pub async fn leave_room(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
) -> Result<RoomSnapshot, ServiceError> {
    let room = state
        .directory()
        .with_session(room_id, |session| async move { session.leave(user_id).await })
        .await?;
    Ok(snapshot(state, &room))
}

/// Lifecycle commands a debater may issue.
#[derive(Debug, Clone, Copy)]
pub enum DebateCommand {
    /// Start round 1.
    Start,
    /// Move to the next round.
    NextRound,
    /// Finish the debate.
    End,
}

/// Run a lifecycle command on behalf of one of the room's debaters.
pub async fn run_command(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    command: DebateCommand,
) -> Result<RoomSnapshot, ServiceError> {
    let session = state.directory().get(room_id).await?;
    ensure_debater(&session, user_id).await?;
    debug!(room_id, user_id, ?command, "debate command issued");

    let room = state
        .directory()
        .with_session(room_id, |session| async move {
            match command {
                DebateCommand::Start => session.start_debate().await,
                DebateCommand::NextRound => session.next_round().await,
                DebateCommand::End => session.end_debate().await,
            }
        })
        .await?;
    Ok(snapshot(state, &room))
}

async fn ensure_debater(session: &DebateSession, user_id: UserId) -> Result<(), ServiceError> {
    match session.role_of(user_id).await {
        Some(role) if role.is_debater() => Ok(()),
        Some(_) => Err(ServiceError::Forbidden(
            "only debaters can drive the debate".into(),
        )),
        None => Err(ServiceError::NotInRoom(format!(
            "user {user_id} is not in room {}",
            session.id()
        ))),
    }
}

/// Post a chat message as the caller.
pub async fn post_message(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    content: String,
) -> Result<RoomEventPayload, ServiceError> {
    let message = state
        .directory()
        .with_session(room_id, |session| {
            let content = content.clone();
            async move { session.submit_message(user_id, content).await }
        })
        .await?;
    Ok(RoomEventPayload::from(&message))
}

/// Persisted log of a room, oldest first.
pub async fn list_messages(
    state: &SharedState,
    room_id: RoomId,
) -> Result<Vec<RoomEventPayload>, ServiceError> {
    let session = state.directory().get(room_id).await?;
    let messages = session.messages().await?;
    Ok(messages.iter().map(RoomEventPayload::from).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::MemoryRoomStore,
        state::{AppState, state_machine::DebatePhase},
    };

    fn state() -> SharedState {
        AppState::with_store(AppConfig::default(), Arc::new(MemoryRoomStore::new()))
    }

    fn request() -> CreateRoomRequest {
        CreateRoomRequest {
            name: "Motion".into(),
            description: String::new(),
            max_duration_minutes: 30,
            total_rounds: 2,
            round_duration_secs: None,
        }
    }

    #[tokio::test]
    async fn only_debaters_drive_the_debate() {
        let state = state();
        let room = create_room(&state, request()).await.unwrap();
        assert_eq!(room.round_duration_secs, 180);

        join_room(&state, room.id, 3, Role::Observer).await.unwrap();
        join_room(&state, room.id, 1, Role::Proponent).await.unwrap();
        join_room(&state, room.id, 2, Role::Opponent).await.unwrap();

        assert!(matches!(
            run_command(&state, room.id, 3, DebateCommand::Start).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            run_command(&state, room.id, 4, DebateCommand::Start).await,
            Err(ServiceError::NotInRoom(_))
        ));

        let started = run_command(&state, room.id, 2, DebateCommand::Start)
            .await
            .unwrap();
        assert_eq!(started.phase, DebatePhase::Ongoing);
        assert_eq!(started.current_speaker_id, Some(1));
    }

    #[tokio::test]
    async fn message_log_lists_notices_and_chat_in_order() {
        let state = state();
        let room = create_room(&state, request()).await.unwrap();
        join_room(&state, room.id, 1, Role::Proponent).await.unwrap();
        post_message(&state, room.id, 1, "opening".into())
            .await
            .unwrap();

        let log = list_messages(&state, room.id).await.unwrap();
        let kinds: Vec<&str> = log.iter().map(|entry| entry.kind.as_str()).collect();
        assert_eq!(kinds, ["system_message", "debate_message"]);
        assert_eq!(log[1].user_id, 1);
        assert_eq!(log[1].role, "proponent");
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let state = state();
        assert!(matches!(
            get_room(&state, 77).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(list_rooms(&state).await.unwrap().is_empty());
    }
}
