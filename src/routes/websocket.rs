use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{
    error::AppError,
    routes::identity::CallerId,
    services::websocket_service,
    state::{SharedState, room::RoomId},
};

#[utoipa::path(
    get,
    path = "/rooms/{id}/ws",
    tag = "websocket",
    params(
        ("id" = u64, Path, description = "Room to follow"),
        ("X-User-Id" = u64, Header, description = "Caller's user id; must hold a role in the room")
    ),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 403, description = "Caller holds no role in the room"),
        (status = 404, description = "Unknown room")
    )
)]
/// Upgrade the HTTP connection into a live room feed for one of its members.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(room_id): Path<RoomId>,
    CallerId(user_id): CallerId,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let role = websocket_service::authorize(&state, room_id, user_id).await?;
    let max_frame = state.config().max_frame_bytes;

    Ok(ws
        .max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| {
            websocket_service::handle_socket(state, room_id, user_id, role, socket)
        }))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{id}/ws", get(ws_handler))
}
