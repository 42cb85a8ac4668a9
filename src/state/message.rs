//! Chat messages and system notices flowing through a room.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::state::{
    room::{Role, RoomId, UserId},
    state_machine::EndReason,
};

/// Author id used for server-generated messages.
pub const SYSTEM_AUTHOR: UserId = 0;

/// Server-generated notice describing something that happened in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum SystemNotice {
    /// A user took a role.
    UserJoined {
        /// Joining user.
        user_id: UserId,
        /// Role taken.
        role: Role,
    },
    /// Both debater slots are filled; the debate can start.
    RoomReady,
    /// A user gave up their role.
    UserLeft {
        /// Leaving user.
        user_id: UserId,
    },
    /// The first round began.
    DebateStarted {
        /// Number of rounds.
        total_rounds: u32,
        /// Proponent, who speaks first.
        speaker: UserId,
    },
    /// A subsequent round began.
    RoundStarted {
        /// 1-based round index.
        round: u32,
        /// Number of rounds.
        total_rounds: u32,
        /// Debater holding the floor.
        speaker: UserId,
        /// Side of the speaker.
        role: Role,
    },
    /// The debate is over.
    DebateEnded {
        /// Why it ended.
        reason: EndReason,
    },
    /// A live connection was attached to the room (never persisted).
    UserConnected {
        /// Connected user.
        user_id: UserId,
        /// Role resolved for the connection.
        role: Role,
    },
}

impl fmt::Display for SystemNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemNotice::UserJoined { user_id, role } => {
                write!(f, "user {user_id} joined as {role}")
            }
            SystemNotice::RoomReady => f.write_str("both debaters are present; the room is ready"),
            SystemNotice::UserLeft { user_id } => write!(f, "user {user_id} left the room"),
            SystemNotice::DebateStarted {
                total_rounds,
                speaker,
            } => write!(
                f,
                "debate started: round 1 of {total_rounds}, proponent (user {speaker}) speaks"
            ),
            SystemNotice::RoundStarted {
                round,
                total_rounds,
                speaker,
                role,
            } => write!(
                f,
                "round {round} of {total_rounds} started: {role} (user {speaker}) speaks"
            ),
            SystemNotice::DebateEnded { reason } => match reason {
                EndReason::Manual => f.write_str("debate ended"),
                EndReason::RoundsExhausted => f.write_str("debate ended: all rounds completed"),
                EndReason::DebaterLeft(user_id) => {
                    write!(f, "debate ended: debater (user {user_id}) left the room")
                }
            },
            SystemNotice::UserConnected { user_id, role } => {
                write!(f, "user {user_id} connected as {role}")
            }
        }
    }
}

/// Who produced a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Typed by a room member.
    Participant {
        /// Author.
        user_id: UserId,
        /// Role the author held when posting.
        role: Role,
    },
    /// Generated by the server.
    System(SystemNotice),
}

/// Entry of a room's append-only message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author and kind-specific payload.
    pub kind: MessageKind,
    /// Text shown to clients.
    pub content: String,
    /// Creation time.
    pub timestamp: OffsetDateTime,
}

impl Message {
    /// Chat message typed by a participant.
    pub fn participant(
        room_id: RoomId,
        user_id: UserId,
        role: Role,
        content: String,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            room_id,
            kind: MessageKind::Participant { user_id, role },
            content,
            timestamp,
        }
    }

    /// Server notice; the content is rendered from the notice.
    pub fn system(room_id: RoomId, notice: SystemNotice, timestamp: OffsetDateTime) -> Self {
        Self {
            room_id,
            content: notice.to_string(),
            kind: MessageKind::System(notice),
            timestamp,
        }
    }

    /// Author id, [`SYSTEM_AUTHOR`] for notices.
    pub fn author_id(&self) -> UserId {
        match &self.kind {
            MessageKind::Participant { user_id, .. } => *user_id,
            MessageKind::System(_) => SYSTEM_AUTHOR,
        }
    }

    /// Role label carried on the wire.
    pub fn role_label(&self) -> &'static str {
        match &self.kind {
            MessageKind::Participant { role, .. } => role.as_str(),
            MessageKind::System(_) => "system",
        }
    }

    /// Wire `type` discriminator.
    pub fn type_label(&self) -> &'static str {
        match &self.kind {
            MessageKind::Participant { .. } => "debate_message",
            MessageKind::System(_) => "system_message",
        }
    }

    /// The notice carried by a system message.
    pub fn notice(&self) -> Option<&SystemNotice> {
        match &self.kind {
            MessageKind::System(notice) => Some(notice),
            MessageKind::Participant { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_render_their_notice() {
        let message = Message::system(
            3,
            SystemNotice::DebateEnded {
                reason: EndReason::DebaterLeft(42),
            },
            OffsetDateTime::UNIX_EPOCH,
        );

        assert_eq!(message.author_id(), SYSTEM_AUTHOR);
        assert_eq!(message.role_label(), "system");
        assert_eq!(message.type_label(), "system_message");
        assert!(message.content.contains("42"));
    }
}
