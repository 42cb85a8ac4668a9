use std::{sync::Arc, time::Duration};

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use debate_arena_back::{
    config::AppConfig,
    dao::room_store::MemoryRoomStore,
    dto::{room::CreateRoomRequest, ws::RoomEventPayload},
    services::room_service::{self, DebateCommand},
    state::{
        AppState, SharedState,
        registry::{CloseReason, ConnectionHandle},
        room::{Role, RoomId, UserId},
        state_machine::DebatePhase,
    },
};

fn app_state() -> SharedState {
    AppState::with_store(AppConfig::default(), Arc::new(MemoryRoomStore::new()))
}

async fn open_room(state: &SharedState, total_rounds: u32, round_secs: u64) -> RoomId {
    room_service::create_room(
        state,
        CreateRoomRequest {
            name: "This house would ban homework".into(),
            description: String::new(),
            max_duration_minutes: 30,
            total_rounds,
            round_duration_secs: Some(round_secs),
        },
    )
    .await
    .unwrap()
    .id
}

/// Attach a fake connection to the room and return its outbound queue.
fn connect(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    role: Role,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<Message>) {
    let (handle, channels) = ConnectionHandle::new(room_id, user_id, role, capacity);
    state.registry().register(handle.clone());
    (handle, channels.outbound)
}

fn drain(outbound: &mut mpsc::Receiver<Message>) -> Vec<RoomEventPayload> {
    let mut events = Vec::new();
    while let Ok(frame) = outbound.try_recv() {
        if let Message::Text(text) = frame {
            events.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    events
}

#[tokio::test(start_paused = true)]
async fn round_timers_carry_the_debate_to_its_end() {
    let state = app_state();
    let room_id = open_room(&state, 2, 1).await;

    room_service::join_room(&state, room_id, 1, Role::Proponent)
        .await
        .unwrap();
    let ready = room_service::join_room(&state, room_id, 2, Role::Opponent)
        .await
        .unwrap();
    assert_eq!(ready.phase, DebatePhase::Ready);

    let started = room_service::run_command(&state, room_id, 1, DebateCommand::Start)
        .await
        .unwrap();
    assert_eq!(started.phase, DebatePhase::Ongoing);
    assert_eq!(started.current_round, 1);
    assert_eq!(started.current_speaker_id, Some(1));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let second = room_service::get_room(&state, room_id).await.unwrap();
    assert_eq!(second.current_round, 2);
    assert_eq!(second.current_speaker_id, Some(2));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let finished = room_service::get_room(&state, room_id).await.unwrap();
    assert_eq!(finished.phase, DebatePhase::Finished);
    assert!(finished.end_time.is_some());
    assert_eq!(finished.current_speaker_id, None);
}

#[tokio::test]
async fn leaving_debater_ends_the_debate_and_is_announced_last() {
    let state = app_state();
    let room_id = open_room(&state, 3, 120).await;
    room_service::join_room(&state, room_id, 3, Role::Observer)
        .await
        .unwrap();
    room_service::join_room(&state, room_id, 1, Role::Proponent)
        .await
        .unwrap();
    room_service::join_room(&state, room_id, 2, Role::Opponent)
        .await
        .unwrap();
    room_service::run_command(&state, room_id, 1, DebateCommand::Start)
        .await
        .unwrap();

    let (observer, mut observer_rx) = connect(&state, room_id, 3, Role::Observer, 16);
    let (opponent, _opponent_rx) = connect(&state, room_id, 2, Role::Opponent, 16);

    let room = room_service::leave_room(&state, room_id, 2).await.unwrap();
    assert_eq!(room.phase, DebatePhase::Finished);
    assert!(room.end_time.is_some());

    let events = drain(&mut observer_rx);
    let last = events.last().expect("observer saw the departure");
    assert_eq!(last.kind, "system_message");
    assert!(last.content.contains('2'));

    assert_eq!(opponent.close_reason(), Some(CloseReason::LeftRoom));
    assert_eq!(observer.close_reason(), None);
    assert_eq!(state.registry().count_connections(room_id), 1);
}

#[tokio::test]
async fn saturated_connection_is_evicted_without_stalling_the_room() {
    let state = app_state();
    let room_id = open_room(&state, 2, 60).await;
    room_service::join_room(&state, room_id, 1, Role::Proponent)
        .await
        .unwrap();
    room_service::join_room(&state, room_id, 3, Role::Observer)
        .await
        .unwrap();

    let (stalled, _stalled_rx) = connect(&state, room_id, 3, Role::Observer, 1);
    let (healthy, mut healthy_rx) = connect(&state, room_id, 1, Role::Proponent, 16);

    for content in ["first", "second", "third"] {
        room_service::post_message(&state, room_id, 1, content.into())
            .await
            .unwrap();
    }

    assert_eq!(stalled.close_reason(), Some(CloseReason::Unresponsive));
    assert_eq!(healthy.close_reason(), None);
    assert_eq!(state.registry().count_connections(room_id), 1);

    let chat: Vec<String> = drain(&mut healthy_rx)
        .into_iter()
        .filter(|event| event.kind == "debate_message")
        .map(|event| event.content)
        .collect();
    assert_eq!(chat, ["first", "second", "third"]);
}

#[tokio::test]
async fn broadcast_and_message_log_agree() {
    let state = app_state();
    let room_id = open_room(&state, 2, 60).await;
    room_service::join_room(&state, room_id, 5, Role::Observer)
        .await
        .unwrap();
    let (_handle, mut rx) = connect(&state, room_id, 5, Role::Observer, 16);

    let posted = room_service::post_message(&state, room_id, 5, "  a fair point  ".into())
        .await
        .unwrap();
    assert_eq!(posted.role, "observer");

    let pushed = drain(&mut rx);
    let log = room_service::list_messages(&state, room_id).await.unwrap();
    assert_eq!(pushed.last(), log.last());
    assert_eq!(log.last(), Some(&posted));

    let rooms = room_service::list_rooms(&state).await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].connections, 1);
}
