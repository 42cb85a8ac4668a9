use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{format_timestamp, validation::validate_not_blank},
    state::{
        room::{Role, RoomId, RoomSession, RoomSettings, UserId},
        state_machine::DebatePhase,
    },
};

/// Payload used to open a new debate room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: String,
    /// Upper bound for the whole debate, in minutes.
    #[validate(range(min = 1, max = 600))]
    pub max_duration_minutes: u64,
    #[validate(range(min = 1, max = 50))]
    pub total_rounds: u32,
    /// Length of each round in seconds; the server default applies when omitted.
    #[serde(default)]
    #[validate(range(min = 1, max = 3600))]
    pub round_duration_secs: Option<u64>,
}

impl CreateRoomRequest {
    /// Settings for the new room, using `default_round` when no round length was given.
    pub fn into_settings(self, default_round: Duration) -> RoomSettings {
        RoomSettings {
            name: self.name.trim().to_owned(),
            description: self.description,
            max_duration: Duration::from_secs(self.max_duration_minutes * 60),
            total_rounds: self.total_rounds,
            round_duration: self
                .round_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(default_round),
        }
    }
}

/// Role requested when joining a room.
#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinRoomRequest {
    pub role: Role,
}

/// Chat text posted over REST.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PostMessageRequest {
    #[validate(length(min = 1, max = 2000), custom(function = "validate_not_blank"))]
    pub content: String,
}

/// Full view of a room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub phase: DebatePhase,
    pub proponent_id: Option<UserId>,
    pub opponent_id: Option<UserId>,
    pub observer_ids: Vec<UserId>,
    pub current_round: u32,
    pub total_rounds: u32,
    pub round_duration_secs: u64,
    pub max_duration_minutes: u64,
    pub current_speaker_id: Option<UserId>,
    /// RFC 3339 timestamps.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub round_deadline: Option<String>,
    pub created_at: String,
    /// Live WebSocket connections attached to the room.
    pub connections: usize,
}

impl RoomSnapshot {
    /// Build the view of `room` with its current connection count.
    pub fn new(room: &RoomSession, connections: usize) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            description: room.description.clone(),
            phase: room.phase,
            proponent_id: room.proponent,
            opponent_id: room.opponent,
            observer_ids: room.observers.iter().copied().collect(),
            current_round: room.current_round,
            total_rounds: room.total_rounds,
            round_duration_secs: room.round_duration.as_secs(),
            max_duration_minutes: room.max_duration.as_secs() / 60,
            current_speaker_id: room.current_speaker,
            start_time: room.start_time.map(format_timestamp),
            end_time: room.end_time.map(format_timestamp),
            round_deadline: room.round_deadline.map(format_timestamp),
            created_at: format_timestamp(room.created_at),
            connections,
        }
    }
}

/// Entry of the room listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub phase: DebatePhase,
    pub participants: usize,
    pub total_rounds: u32,
    pub connections: usize,
}

impl RoomSummary {
    pub fn new(room: &RoomSession, connections: usize) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            phase: room.phase,
            participants: room.participant_count(),
            total_rounds: room.total_rounds,
            connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(round_duration_secs: Option<u64>) -> CreateRoomRequest {
        CreateRoomRequest {
            name: "  This house would abolish exams ".into(),
            description: String::new(),
            max_duration_minutes: 45,
            total_rounds: 4,
            round_duration_secs,
        }
    }

    #[test]
    fn create_request_is_validated() {
        assert!(request(Some(90)).validate().is_ok());

        let mut blank = request(None);
        blank.name = "   ".into();
        assert!(blank.validate().is_err());

        let mut endless = request(None);
        endless.total_rounds = 0;
        assert!(endless.validate().is_err());

        assert!(request(Some(0)).validate().is_err());
    }

    #[test]
    fn settings_fall_back_to_default_round_length() {
        let settings = request(None).into_settings(Duration::from_secs(180));
        assert_eq!(settings.name, "This house would abolish exams");
        assert_eq!(settings.round_duration, Duration::from_secs(180));
        assert_eq!(settings.max_duration, Duration::from_secs(45 * 60));

        let settings = request(Some(30)).into_settings(Duration::from_secs(180));
        assert_eq!(settings.round_duration, Duration::from_secs(30));
    }
}
