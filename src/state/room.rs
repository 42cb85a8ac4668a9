//! Authoritative runtime record of a single debate room.

use std::{fmt, time::Duration};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::state::state_machine::DebatePhase;

/// Identifier of a room, assigned by the repository.
pub type RoomId = u64;
/// Identifier of a user, vouched for by the identity collaborator.
pub type UserId = u64;

/// Role a user holds inside a room. A user holds at most one role per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Debater arguing for the motion; speaks first.
    Proponent,
    /// Debater arguing against the motion.
    Opponent,
    /// Audience member.
    #[serde(alias = "spectator")]
    Observer,
}

impl Role {
    /// Wire label of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Proponent => "proponent",
            Role::Opponent => "opponent",
            Role::Observer => "observer",
        }
    }

    /// Whether the role occupies one of the two debater slots.
    pub fn is_debater(self) -> bool {
        matches!(self, Role::Proponent | Role::Opponent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reading of "now", taken once at the start of a transition.
///
/// Wall-clock time feeds persisted timestamps while the monotonic instant arms timers, so both
/// derive from the same observation and never drift apart inside one transition.
#[derive(Debug, Clone, Copy)]
pub struct Moment {
    /// Wall-clock time (UTC).
    pub wall: OffsetDateTime,
    /// Monotonic instant on the tokio clock.
    pub mono: Instant,
}

impl Moment {
    /// Read both clocks.
    pub fn now() -> Self {
        Self {
            wall: OffsetDateTime::now_utc(),
            mono: Instant::now(),
        }
    }

    /// The same duration projected onto both clocks.
    pub fn after(&self, duration: Duration) -> (OffsetDateTime, Instant) {
        (self.wall + duration, self.mono + duration)
    }
}

/// Parameters supplied when creating a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    /// Display name.
    pub name: String,
    /// Free-form description of the motion.
    pub description: String,
    /// Upper bound for the whole debate.
    pub max_duration: Duration,
    /// Number of speaking rounds.
    pub total_rounds: u32,
    /// Length of each speaking round.
    pub round_duration: Duration,
}

/// Runtime state of a room. Only the owning session mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSession {
    /// Stable room identifier.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Lifecycle phase.
    pub phase: DebatePhase,
    /// User holding the proponent slot.
    pub proponent: Option<UserId>,
    /// User holding the opponent slot.
    pub opponent: Option<UserId>,
    /// Audience, in join order.
    pub observers: IndexSet<UserId>,
    /// When the debate started.
    pub start_time: Option<OffsetDateTime>,
    /// Planned end while ongoing, actual end once finished.
    pub end_time: Option<OffsetDateTime>,
    /// 1-based round index; 0 before the debate starts.
    pub current_round: u32,
    /// Number of rounds in the debate.
    pub total_rounds: u32,
    /// Length of each round.
    pub round_duration: Duration,
    /// Upper bound for the whole debate.
    pub max_duration: Duration,
    /// Deadline of the current round.
    pub round_deadline: Option<OffsetDateTime>,
    /// Debater currently holding the floor.
    pub current_speaker: Option<UserId>,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Incremented on every committed transition.
    pub version: u64,
}

impl RoomSession {
    /// Build a fresh room in the waiting phase.
    pub fn new(id: RoomId, settings: RoomSettings, created_at: OffsetDateTime) -> Self {
        let RoomSettings {
            name,
            description,
            max_duration,
            total_rounds,
            round_duration,
        } = settings;

        Self {
            id,
            name,
            description,
            phase: DebatePhase::Waiting,
            proponent: None,
            opponent: None,
            observers: IndexSet::new(),
            start_time: None,
            end_time: None,
            current_round: 0,
            total_rounds,
            round_duration,
            max_duration,
            round_deadline: None,
            current_speaker: None,
            created_at,
            version: 0,
        }
    }

    /// Canonical mapping from a user to the role they hold in this room.
    pub fn role_of(&self, user_id: UserId) -> Option<Role> {
        if self.proponent == Some(user_id) {
            Some(Role::Proponent)
        } else if self.opponent == Some(user_id) {
            Some(Role::Opponent)
        } else if self.observers.contains(&user_id) {
            Some(Role::Observer)
        } else {
            None
        }
    }

    /// Both debater slots are filled.
    pub fn debaters_assigned(&self) -> bool {
        self.proponent.is_some() && self.opponent.is_some()
    }

    /// Nobody holds any role in the room.
    pub fn is_empty(&self) -> bool {
        self.proponent.is_none() && self.opponent.is_none() && self.observers.is_empty()
    }

    /// Number of users holding a role.
    pub fn participant_count(&self) -> usize {
        usize::from(self.proponent.is_some())
            + usize::from(self.opponent.is_some())
            + self.observers.len()
    }
}
