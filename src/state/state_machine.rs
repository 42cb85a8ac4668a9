use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::state::{
    message::SystemNotice,
    room::{Moment, Role, RoomSession, UserId},
};

/// Lifecycle phases of a debate room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Waiting for both debater slots to be filled.
    Waiting,
    /// Both debaters are present; the debate can start.
    Ready,
    /// Rounds are running.
    Ongoing,
    /// Terminal phase.
    Finished,
}

/// Why an ongoing debate was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Somebody asked for the debate to end.
    Manual,
    /// The last round elapsed.
    RoundsExhausted,
    /// A debater left while the debate was running.
    DebaterLeft(UserId),
}

/// Events that can be applied to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebateEvent {
    /// A user asks for a role.
    Join {
        /// Requesting user.
        user_id: UserId,
        /// Requested role.
        role: Role,
    },
    /// A user gives up their role.
    Leave {
        /// Leaving user.
        user_id: UserId,
    },
    /// Start round 1.
    Start,
    /// Hand the floor to the other side, or finish after the last round.
    NextRound,
    /// Finish the debate.
    End(EndReason),
}

/// Business-rule violations raised while applying an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The event is not legal in the current phase.
    #[error("{event:?} cannot be applied while the room is {phase:?}")]
    InvalidPhase {
        /// Phase the room was in.
        phase: DebatePhase,
        /// Rejected event.
        event: DebateEvent,
    },
    /// The requested debater slot is occupied.
    #[error("the {role} slot is already taken")]
    RoleTaken {
        /// Requested slot.
        role: Role,
    },
    /// The user holds no role in the room.
    #[error("user {user_id} is not in this room")]
    UserNotInRoom {
        /// Unknown user.
        user_id: UserId,
    },
    /// The user already holds a role in the room.
    #[error("user {user_id} already holds the {role} role in this room")]
    AlreadyInRoom {
        /// Requesting user.
        user_id: UserId,
        /// Role already held.
        role: Role,
    },
}

/// What the round timer must do once a transition commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDirective {
    /// Leave any outstanding timer untouched.
    Keep,
    /// Replace any outstanding timer with one firing at `deadline`.
    Arm {
        /// Monotonic deadline of the new round.
        deadline: Instant,
    },
    /// Drop the outstanding timer.
    Cancel,
}

/// Side effects of an applied event, executed by the session after persistence succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the event.
    pub from: DebatePhase,
    /// Phase after the event.
    pub to: DebatePhase,
    /// Notices to append and broadcast, in order.
    pub notices: Vec<SystemNotice>,
    /// Round timer update.
    pub timer: TimerDirective,
    /// User whose live connections must be closed.
    pub disconnect: Option<UserId>,
}

impl Transition {
    fn new(from: DebatePhase, to: DebatePhase) -> Self {
        Self {
            from,
            to,
            notices: Vec::new(),
            timer: TimerDirective::Keep,
            disconnect: None,
        }
    }
}

impl RoomSession {
    /// Validate `event` against the current phase and mutate the record in place.
    ///
    /// Every derived timestamp comes from `now`; the clocks are never read again. On error the
    /// record is left untouched.
    pub fn apply(
        &mut self,
        event: &DebateEvent,
        now: &Moment,
    ) -> Result<Transition, TransitionError> {
        let from = self.phase;
        let mut transition = match *event {
            DebateEvent::Join { user_id, role } => self.join(user_id, role, event)?,
            DebateEvent::Leave { user_id } => self.leave(user_id, now)?,
            DebateEvent::Start => self.start(now, event)?,
            DebateEvent::NextRound => self.next_round(now, event)?,
            DebateEvent::End(reason) => self.finish(reason, now, event)?,
        };
        transition.from = from;
        transition.to = self.phase;
        self.version += 1;
        Ok(transition)
    }

    fn join(
        &mut self,
        user_id: UserId,
        role: Role,
        event: &DebateEvent,
    ) -> Result<Transition, TransitionError> {
        self.ensure_phase(DebatePhase::Waiting, event)?;
        if let Some(held) = self.role_of(user_id) {
            return Err(TransitionError::AlreadyInRoom {
                user_id,
                role: held,
            });
        }

        let mut transition = Transition::new(self.phase, self.phase);
        match role {
            Role::Proponent | Role::Opponent => {
                let slot = match role {
                    Role::Proponent => &mut self.proponent,
                    _ => &mut self.opponent,
                };
                if slot.is_some() {
                    return Err(TransitionError::RoleTaken { role });
                }
                *slot = Some(user_id);
                transition.notices.push(SystemNotice::UserJoined { user_id, role });

                if self.debaters_assigned() {
                    self.phase = DebatePhase::Ready;
                    transition.notices.push(SystemNotice::RoomReady);
                }
            }
            Role::Observer => {
                self.observers.insert(user_id);
                transition.notices.push(SystemNotice::UserJoined { user_id, role });
            }
        }

        Ok(transition)
    }

    fn leave(&mut self, user_id: UserId, now: &Moment) -> Result<Transition, TransitionError> {
        let role = self
            .role_of(user_id)
            .ok_or(TransitionError::UserNotInRoom { user_id })?;

        match role {
            Role::Proponent => self.proponent = None,
            Role::Opponent => self.opponent = None,
            Role::Observer => {
                self.observers.shift_remove(&user_id);
            }
        }

        let mut transition = Transition::new(self.phase, self.phase);
        transition.disconnect = Some(user_id);

        if role.is_debater() {
            match self.phase {
                DebatePhase::Ongoing => {
                    let reason = EndReason::DebaterLeft(user_id);
                    self.close_debate(now);
                    transition.timer = TimerDirective::Cancel;
                    transition.notices.push(SystemNotice::DebateEnded { reason });
                }
                DebatePhase::Ready => self.phase = DebatePhase::Waiting,
                DebatePhase::Waiting | DebatePhase::Finished => {}
            }
        }

        transition.notices.push(SystemNotice::UserLeft { user_id });
        Ok(transition)
    }

    fn start(&mut self, now: &Moment, event: &DebateEvent) -> Result<Transition, TransitionError> {
        self.ensure_phase(DebatePhase::Ready, event)?;
        let (Some(proponent), Some(_)) = (self.proponent, self.opponent) else {
            return Err(self.invalid_phase(event));
        };

        let (round_end, deadline) = now.after(self.round_duration);
        self.phase = DebatePhase::Ongoing;
        self.start_time = Some(now.wall);
        self.end_time = Some(now.wall + self.max_duration);
        self.current_round = 1;
        self.current_speaker = Some(proponent);
        self.round_deadline = Some(round_end);

        let mut transition = Transition::new(DebatePhase::Ready, self.phase);
        transition.timer = TimerDirective::Arm { deadline };
        transition.notices.push(SystemNotice::DebateStarted {
            total_rounds: self.total_rounds,
            speaker: proponent,
        });
        Ok(transition)
    }

    fn next_round(
        &mut self,
        now: &Moment,
        event: &DebateEvent,
    ) -> Result<Transition, TransitionError> {
        self.ensure_phase(DebatePhase::Ongoing, event)?;

        let round = self.current_round + 1;
        if round > self.total_rounds {
            return self.finish(EndReason::RoundsExhausted, now, event);
        }

        let (speaker, role) = if self.current_speaker == self.proponent {
            (self.opponent, Role::Opponent)
        } else {
            (self.proponent, Role::Proponent)
        };
        let Some(speaker) = speaker else {
            return Err(self.invalid_phase(event));
        };

        let (round_end, deadline) = now.after(self.round_duration);
        self.current_round = round;
        self.current_speaker = Some(speaker);
        self.round_deadline = Some(round_end);

        let mut transition = Transition::new(self.phase, self.phase);
        transition.timer = TimerDirective::Arm { deadline };
        transition.notices.push(SystemNotice::RoundStarted {
            round,
            total_rounds: self.total_rounds,
            speaker,
            role,
        });
        Ok(transition)
    }

    fn finish(
        &mut self,
        reason: EndReason,
        now: &Moment,
        event: &DebateEvent,
    ) -> Result<Transition, TransitionError> {
        self.ensure_phase(DebatePhase::Ongoing, event)?;
        self.close_debate(now);

        let mut transition = Transition::new(DebatePhase::Ongoing, self.phase);
        transition.timer = TimerDirective::Cancel;
        transition.notices.push(SystemNotice::DebateEnded { reason });
        Ok(transition)
    }

    fn close_debate(&mut self, now: &Moment) {
        self.phase = DebatePhase::Finished;
        self.end_time = Some(now.wall);
        self.round_deadline = None;
    }

    fn ensure_phase(
        &self,
        expected: DebatePhase,
        event: &DebateEvent,
    ) -> Result<(), TransitionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(self.invalid_phase(event))
        }
    }

    fn invalid_phase(&self, event: &DebateEvent) -> TransitionError {
        TransitionError::InvalidPhase {
            phase: self.phase,
            event: event.clone(),
        }
    }
}
