use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::state::{
    message::{Message, MessageKind, SYSTEM_AUTHOR, SystemNotice},
    room::{Role, RoomId, RoomSession, UserId},
    state_machine::DebatePhase,
};

/// Persisted snapshot of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Primary key of the room.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Lifecycle phase.
    pub phase: DebatePhase,
    /// Proponent slot.
    pub proponent_id: Option<UserId>,
    /// Opponent slot.
    pub opponent_id: Option<UserId>,
    /// Audience, in join order.
    pub observer_ids: Vec<UserId>,
    /// Debate start.
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    /// Planned or actual debate end.
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// 1-based round index (0 before start).
    pub current_round: u32,
    /// Number of rounds.
    pub total_rounds: u32,
    /// Round length in seconds.
    pub round_duration_secs: u64,
    /// Debate length bound in minutes.
    pub max_duration_minutes: u64,
    /// Deadline of the current round.
    #[serde(with = "time::serde::rfc3339::option")]
    pub round_deadline: Option<OffsetDateTime>,
    /// Debater holding the floor.
    pub current_speaker_id: Option<UserId>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Transition counter.
    pub version: u64,
}

impl From<&RoomSession> for RoomEntity {
    fn from(room: &RoomSession) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            description: room.description.clone(),
            phase: room.phase,
            proponent_id: room.proponent,
            opponent_id: room.opponent,
            observer_ids: room.observers.iter().copied().collect(),
            start_time: room.start_time,
            end_time: room.end_time,
            current_round: room.current_round,
            total_rounds: room.total_rounds,
            round_duration_secs: room.round_duration.as_secs(),
            max_duration_minutes: room.max_duration.as_secs() / 60,
            round_deadline: room.round_deadline,
            current_speaker_id: room.current_speaker,
            created_at: room.created_at,
            version: room.version,
        }
    }
}

impl From<RoomEntity> for RoomSession {
    fn from(entity: RoomEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            description: entity.description,
            phase: entity.phase,
            proponent: entity.proponent_id,
            opponent: entity.opponent_id,
            observers: entity.observer_ids.into_iter().collect::<IndexSet<_>>(),
            start_time: entity.start_time,
            end_time: entity.end_time,
            current_round: entity.current_round,
            total_rounds: entity.total_rounds,
            round_duration: Duration::from_secs(entity.round_duration_secs),
            max_duration: Duration::from_secs(entity.max_duration_minutes * 60),
            round_deadline: entity.round_deadline,
            current_speaker: entity.current_speaker_id,
            created_at: entity.created_at,
            version: entity.version,
        }
    }
}

/// Persisted entry of a room's message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEntity {
    /// Owning room.
    pub room_id: RoomId,
    /// Author, 0 for system notices.
    pub author_id: UserId,
    /// Author's role; absent for system notices.
    pub role: Option<Role>,
    /// Rendered text.
    pub content: String,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Structured notice for system messages.
    pub notice: Option<SystemNotice>,
}

impl From<&Message> for MessageEntity {
    fn from(message: &Message) -> Self {
        let (role, notice) = match &message.kind {
            MessageKind::Participant { role, .. } => (Some(*role), None),
            MessageKind::System(notice) => (None, Some(notice.clone())),
        };
        Self {
            room_id: message.room_id,
            author_id: message.author_id(),
            role,
            content: message.content.clone(),
            timestamp: message.timestamp,
            notice,
        }
    }
}

impl From<MessageEntity> for Message {
    fn from(entity: MessageEntity) -> Self {
        let kind = match entity.notice {
            Some(notice) if entity.author_id == SYSTEM_AUTHOR => MessageKind::System(notice),
            _ => MessageKind::Participant {
                user_id: entity.author_id,
                role: entity.role.unwrap_or(Role::Observer),
            },
        };
        Self {
            room_id: entity.room_id,
            kind,
            content: entity.content,
            timestamp: entity.timestamp,
        }
    }
}
