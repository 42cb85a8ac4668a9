use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the room store is reachable, pinging it when one is installed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "room store health check failed");
                return HealthResponse::degraded(state.directory().live_sessions());
            }
        }
        Err(_) => warn!("room store unavailable (degraded mode)"),
    }

    let live_rooms = state.directory().live_sessions();
    if state.is_degraded() {
        HealthResponse::degraded(live_rooms)
    } else {
        HealthResponse::ok(live_rooms)
    }
}
