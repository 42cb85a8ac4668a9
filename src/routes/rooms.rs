use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        room::{CreateRoomRequest, JoinRoomRequest, PostMessageRequest, RoomSnapshot, RoomSummary},
        ws::RoomEventPayload,
    },
    error::AppError,
    routes::identity::CallerId,
    services::room_service::{self, DebateCommand},
    state::{SharedState, room::RoomId},
};

/// Room lifecycle, membership and message log endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/join", post(join_room))
        .route("/rooms/{id}/leave", post(leave_room))
        .route("/rooms/{id}/start", post(start_debate))
        .route("/rooms/{id}/next", post(next_round))
        .route("/rooms/{id}/end", post(end_debate))
        .route("/rooms/{id}/messages", get(list_messages).post(post_message))
}

/// List every stored room.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    responses((status = 200, description = "Known rooms", body = [RoomSummary]))
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    Ok(Json(room_service::list_rooms(&state).await?))
}

/// Open a new room in the waiting phase.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    params(("X-User-Id" = u64, Header, description = "Caller's user id")),
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomSnapshot),
        (status = 400, description = "Invalid room settings")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    CallerId(_caller): CallerId,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<RoomSnapshot>), AppError> {
    let room = room_service::create_room(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// Current state of a room.
#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = u64, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room", body = RoomSnapshot),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::get_room(&state, id).await?))
}

/// Take a role in the room.
#[utoipa::path(
    post,
    path = "/rooms/{id}/join",
    tag = "rooms",
    params(
        ("id" = u64, Path, description = "Room identifier"),
        ("X-User-Id" = u64, Header, description = "Caller's user id")
    ),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined", body = RoomSnapshot),
        (status = 409, description = "Role taken, already a member or debate under way")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
    CallerId(user_id): CallerId,
    Json(payload): Json<JoinRoomRequest>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(
        room_service::join_room(&state, id, user_id, payload.role).await?,
    ))
}

/// Give up the caller's role in the room.
#[utoipa::path(
    post,
    path = "/rooms/{id}/leave",
    tag = "rooms",
    params(
        ("id" = u64, Path, description = "Room identifier"),
        ("X-User-Id" = u64, Header, description = "Caller's user id")
    ),
    responses(
        (status = 200, description = "Left", body = RoomSnapshot),
        (status = 403, description = "Caller is not in the room")
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
    CallerId(user_id): CallerId,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::leave_room(&state, id, user_id).await?))
}

/// Start round 1 once both debaters are seated.
#[utoipa::path(
    post,
    path = "/rooms/{id}/start",
    tag = "rooms",
    params(
        ("id" = u64, Path, description = "Room identifier"),
        ("X-User-Id" = u64, Header, description = "A debater of the room")
    ),
    responses(
        (status = 200, description = "Debate started", body = RoomSnapshot),
        (status = 403, description = "Caller is not a debater of the room"),
        (status = 409, description = "Room is not waiting or a debater is missing")
    )
)]
pub async fn start_debate(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
    CallerId(user_id): CallerId,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(
        room_service::run_command(&state, id, user_id, DebateCommand::Start).await?,
    ))
}

/// Hand the floor over to the next round.
#[utoipa::path(
    post,
    path = "/rooms/{id}/next",
    tag = "rooms",
    params(
        ("id" = u64, Path, description = "Room identifier"),
        ("X-User-Id" = u64, Header, description = "A debater of the room")
    ),
    responses(
        (status = 200, description = "Round advanced, or debate finished after the last round", body = RoomSnapshot),
        (status = 403, description = "Caller is not a debater of the room"),
        (status = 409, description = "Debate is not ongoing")
    )
)]
pub async fn next_round(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
    CallerId(user_id): CallerId,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(
        room_service::run_command(&state, id, user_id, DebateCommand::NextRound).await?,
    ))
}

/// Finish the debate.
#[utoipa::path(
    post,
    path = "/rooms/{id}/end",
    tag = "rooms",
    params(
        ("id" = u64, Path, description = "Room identifier"),
        ("X-User-Id" = u64, Header, description = "A debater of the room")
    ),
    responses(
        (status = 200, description = "Debate finished", body = RoomSnapshot),
        (status = 403, description = "Caller is not a debater of the room"),
        (status = 409, description = "Debate already finished")
    )
)]
pub async fn end_debate(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
    CallerId(user_id): CallerId,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(
        room_service::run_command(&state, id, user_id, DebateCommand::End).await?,
    ))
}

/// Persisted message log of a room, oldest first.
#[utoipa::path(
    get,
    path = "/rooms/{id}/messages",
    tag = "rooms",
    params(("id" = u64, Path, description = "Room identifier")),
    responses((status = 200, description = "Message log", body = [RoomEventPayload]))
)]
pub async fn list_messages(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
) -> Result<Json<Vec<RoomEventPayload>>, AppError> {
    Ok(Json(room_service::list_messages(&state, id).await?))
}

/// Post a chat message as the caller.
#[utoipa::path(
    post,
    path = "/rooms/{id}/messages",
    tag = "rooms",
    params(
        ("id" = u64, Path, description = "Room identifier"),
        ("X-User-Id" = u64, Header, description = "A member of the room")
    ),
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Message recorded and broadcast", body = RoomEventPayload),
        (status = 400, description = "Empty or oversized message"),
        (status = 403, description = "Caller is not in the room")
    )
)]
pub async fn post_message(
    State(state): State<SharedState>,
    Path(id): Path<RoomId>,
    CallerId(user_id): CallerId,
    Valid(Json(payload)): Valid<Json<PostMessageRequest>>,
) -> Result<(StatusCode, Json<RoomEventPayload>), AppError> {
    let message = room_service::post_message(&state, id, user_id, payload.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
