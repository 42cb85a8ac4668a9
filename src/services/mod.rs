/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Room lifecycle, membership and chat operations behind the REST routes.
pub mod room_service;
/// Room store connection supervision and degraded mode handling.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
