use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Debate Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::list_rooms,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::start_debate,
        crate::routes::rooms::next_round,
        crate::routes::rooms::end_debate,
        crate::routes::rooms::list_messages,
        crate::routes::rooms::post_message,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::PostMessageRequest,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::RoomSummary,
            crate::dto::ws::RoomEventPayload,
            crate::dto::ws::RoomInboundMessage,
            crate::dto::ws::ChatInput,
            crate::state::room::Role,
            crate::state::state_machine::DebatePhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Debate rooms, membership and message logs"),
        (name = "websocket", description = "Live room feeds over WebSocket"),
    )
)]
pub struct ApiDoc;
