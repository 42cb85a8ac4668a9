//! Per-room runtime: serializes transitions, persists them, drives the round timer and
//! publishes the resulting notices.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    time::{Instant, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{MessageEntity, RoomEntity},
        room_store::StoreSlot,
        storage::{StorageError, StorageResult},
    },
    state::{
        hub::BroadcastHub,
        message::{Message, SystemNotice},
        registry::{CloseReason, ConnectionHandle},
        room::{Moment, Role, RoomId, RoomSession, UserId},
        scheduler::RoundScheduler,
        state_machine::{DebateEvent, DebatePhase, EndReason, TimerDirective, TransitionError},
    },
};

/// Delay before a round change that failed to persist is attempted again.
const ROUND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Failures surfaced by a debate session to its callers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A business rule rejected the operation.
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    /// No room with this identifier exists.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    /// A round timer fired after it had been replaced or cancelled.
    #[error("round timer epoch {fired} is stale (current epoch {current})")]
    StaleRound {
        /// Epoch carried by the fired timer.
        fired: u64,
        /// Epoch of the session's scheduler.
        current: u64,
    },
    /// The store rejected or could not serve the request.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The store did not answer within the transition timeout.
    #[error("storage did not answer in time")]
    Timeout,
    /// The session was released from the directory; a fresh load serves the room now.
    #[error("session of room {0} was released")]
    Retired(RoomId),
}

impl SessionError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Storage(_) | SessionError::Timeout)
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    /// Repository port.
    pub store: Arc<StoreSlot>,
    /// Fan-out into live connections.
    pub hub: BroadcastHub,
    /// Upper bound for each store call made inside a transition.
    pub transition_timeout: Option<Duration>,
    /// Told about every room that reaches `Finished`.
    pub finished: Option<mpsc::UnboundedSender<RoomId>>,
}

struct SessionInner {
    room: RoomSession,
    scheduler: RoundScheduler,
}

/// Sole owner and mutator of one room's runtime state.
pub struct DebateSession {
    id: RoomId,
    ctx: SessionContext,
    inner: Mutex<SessionInner>,
    elapsed_tx: mpsc::UnboundedSender<u64>,
    retired: AtomicBool,
}

impl DebateSession {
    /// Wrap `room` in a session and start the task that turns round timer firings into
    /// `NextRound` transitions. An ongoing room gets its timer re-armed for the time it has left.
    pub fn spawn(room: RoomSession, ctx: SessionContext) -> Arc<Self> {
        let (elapsed_tx, mut elapsed_rx) = mpsc::unbounded_channel::<u64>();

        let mut scheduler = RoundScheduler::new();
        if let Some(deadline) = remaining_round(&room, &Moment::now()) {
            info!(room_id = room.id, round = room.current_round, "resuming round timer");
            scheduler.arm(deadline, round_callback(elapsed_tx.clone()));
        }

        let session = Arc::new(Self {
            id: room.id,
            ctx,
            inner: Mutex::new(SessionInner { room, scheduler }),
            elapsed_tx,
            retired: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&session);
        tokio::spawn(async move {
            while let Some(epoch) = elapsed_rx.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                match session.round_elapsed(epoch).await {
                    Ok(_) => {}
                    Err(err @ SessionError::StaleRound { .. })
                    | Err(err @ SessionError::Retired(_))
                    | Err(err @ SessionError::Rejected(TransitionError::InvalidPhase { .. })) => {
                        debug!(room_id = session.id, epoch, error = %err, "discarding round timer");
                    }
                    Err(err) if err.is_transient() => {
                        warn!(room_id = session.id, epoch, error = %err, "round change failed; retrying");
                        session.retry_round(epoch).await;
                    }
                    Err(err) => {
                        warn!(room_id = session.id, epoch, error = %err, "round change rejected");
                    }
                }
            }
        });

        session
    }

    /// Identifier of the room.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Copy of the current room record.
    pub async fn snapshot(&self) -> RoomSession {
        self.inner.lock().await.room.clone()
    }

    /// Current phase.
    pub async fn phase(&self) -> DebatePhase {
        self.inner.lock().await.room.phase
    }

    /// Role `user_id` holds in the room.
    pub async fn role_of(&self, user_id: UserId) -> Option<Role> {
        self.inner.lock().await.room.role_of(user_id)
    }

    /// Give `user_id` the requested role.
    pub async fn join(&self, user_id: UserId, role: Role) -> Result<RoomSession, SessionError> {
        self.transition(DebateEvent::Join { user_id, role }).await
    }

    /// Remove `user_id` from the room and close their connections.
    pub async fn leave(&self, user_id: UserId) -> Result<RoomSession, SessionError> {
        self.transition(DebateEvent::Leave { user_id }).await
    }

    /// Start round 1.
    pub async fn start_debate(&self) -> Result<RoomSession, SessionError> {
        self.transition(DebateEvent::Start).await
    }

    /// Hand the floor over, or finish after the last round.
    pub async fn next_round(&self) -> Result<RoomSession, SessionError> {
        self.transition(DebateEvent::NextRound).await
    }

    /// Finish an ongoing debate.
    pub async fn end_debate(&self) -> Result<RoomSession, SessionError> {
        self.transition(DebateEvent::End(EndReason::Manual)).await
    }

    /// Append a chat message from a room member and publish it.
    ///
    /// The author's role is resolved from the room record; chat is allowed in every phase.
    pub async fn submit_message(
        &self,
        user_id: UserId,
        content: String,
    ) -> Result<Message, SessionError> {
        let inner = self.inner.lock().await;
        self.ensure_live()?;
        let role = inner
            .room
            .role_of(user_id)
            .ok_or(TransitionError::UserNotInRoom { user_id })?;

        let message = Message::participant(self.id, user_id, role, content, Moment::now().wall);
        self.append(&message).await?;
        self.ctx.hub.publish(self.id, &message);
        drop(inner);

        debug!(room_id = self.id, user_id, %role, "chat message accepted");
        Ok(message)
    }

    /// Persisted log of the room, oldest first.
    pub async fn messages(&self) -> Result<Vec<Message>, SessionError> {
        let store = self.ctx.store.require().await?;
        let entities = self.bounded(store.list_messages(self.id)).await?;
        Ok(entities.into_iter().map(Message::from).collect())
    }

    /// Register a live connection and announce it to the room.
    ///
    /// Membership is checked again under the room lock, so a user who left after the upgrade was
    /// authorized is refused instead of registered.
    pub async fn attach(&self, handle: ConnectionHandle) -> Result<(), SessionError> {
        let inner = self.inner.lock().await;
        self.ensure_live()?;
        let user_id = handle.user_id;
        if inner.room.role_of(user_id) != Some(handle.role) {
            return Err(TransitionError::UserNotInRoom { user_id }.into());
        }

        let role = handle.role;
        self.ctx.hub.registry().register(handle);
        let notice = Message::system(
            self.id,
            SystemNotice::UserConnected { user_id, role },
            Moment::now().wall,
        );
        self.ctx.hub.publish(self.id, &notice);
        drop(inner);

        debug!(room_id = self.id, user_id, %role, "connection attached");
        Ok(())
    }

    /// Whether the directory released this session.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Mark a finished room without connections as released. Every later mutation fails with
    /// [`SessionError::Retired`] so callers go back to the directory for the current session.
    pub(crate) async fn retire_if_idle(&self) -> bool {
        let inner = self.inner.lock().await;
        if self.is_retired() {
            return true;
        }
        if inner.room.phase != DebatePhase::Finished
            || self.ctx.hub.registry().count_connections(self.id) > 0
        {
            return false;
        }
        self.retired.store(true, Ordering::Release);
        true
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_retired() {
            return Err(SessionError::Retired(self.id));
        }
        Ok(())
    }

    /// Entry point of the round timer. Competes for the room lock like any other caller and is
    /// rejected when a newer arm or a cancel superseded it.
    pub async fn round_elapsed(&self, epoch: u64) -> Result<RoomSession, SessionError> {
        let mut inner = self.inner.lock().await;
        self.ensure_live()?;
        let current = inner.scheduler.epoch();
        if epoch != current {
            return Err(SessionError::StaleRound {
                fired: epoch,
                current,
            });
        }
        self.transition_locked(&mut inner, DebateEvent::NextRound)
            .await
    }

    async fn retry_round(&self, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.scheduler.epoch() != epoch || inner.room.phase != DebatePhase::Ongoing {
            return;
        }
        let deadline = Instant::now() + ROUND_RETRY_DELAY;
        inner
            .scheduler
            .arm(deadline, round_callback(self.elapsed_tx.clone()));
    }

    async fn transition(&self, event: DebateEvent) -> Result<RoomSession, SessionError> {
        let mut inner = self.inner.lock().await;
        self.ensure_live()?;
        self.transition_locked(&mut inner, event).await
    }

    /// Apply, persist, then commit and run side effects. Nothing is committed when the store
    /// fails, so the record and the timer stay as they were.
    async fn transition_locked(
        &self,
        inner: &mut SessionInner,
        event: DebateEvent,
    ) -> Result<RoomSession, SessionError> {
        let now = Moment::now();
        let mut next = inner.room.clone();
        let transition = next.apply(&event, &now)?;

        let store = self.ctx.store.require().await?;
        self.bounded(store.save_room(RoomEntity::from(&next)))
            .await?;
        inner.room = next;

        match transition.timer {
            TimerDirective::Keep => {}
            TimerDirective::Arm { deadline } => {
                inner
                    .scheduler
                    .arm(deadline, round_callback(self.elapsed_tx.clone()));
            }
            TimerDirective::Cancel => inner.scheduler.cancel(),
        }

        if let Some(user_id) = transition.disconnect {
            self.ctx
                .hub
                .registry()
                .force_disconnect(self.id, user_id, CloseReason::LeftRoom);
        }

        for notice in transition.notices {
            let message = Message::system(self.id, notice, now.wall);
            if let Err(err) = self.append(&message).await {
                warn!(room_id = self.id, error = %err, "failed to persist system notice");
            }
            self.ctx.hub.publish(self.id, &message);
        }

        info!(
            room_id = self.id,
            event = ?event,
            from = ?transition.from,
            to = ?transition.to,
            version = inner.room.version,
            "room transition applied"
        );

        if transition.to == DebatePhase::Finished && transition.from != DebatePhase::Finished {
            if let Some(finished) = &self.ctx.finished {
                let _ = finished.send(self.id);
            }
        }

        Ok(inner.room.clone())
    }

    async fn append(&self, message: &Message) -> Result<(), SessionError> {
        let store = self.ctx.store.require().await?;
        self.bounded(store.append_message(MessageEntity::from(message)))
            .await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = StorageResult<T>>,
    ) -> Result<T, SessionError> {
        match self.ctx.transition_timeout {
            Some(limit) => Ok(timeout(limit, call)
                .await
                .map_err(|_| SessionError::Timeout)??),
            None => Ok(call.await?),
        }
    }
}

fn round_callback(
    elapsed_tx: mpsc::UnboundedSender<u64>,
) -> impl FnOnce(u64) -> std::future::Ready<()> + Send + 'static {
    move |epoch| {
        let _ = elapsed_tx.send(epoch);
        std::future::ready(())
    }
}

/// Monotonic deadline matching the persisted wall-clock deadline of an ongoing round.
fn remaining_round(room: &RoomSession, now: &Moment) -> Option<Instant> {
    if room.phase != DebatePhase::Ongoing {
        return None;
    }
    let deadline = room.round_deadline?;
    let left = deadline - now.wall;
    let left = Duration::try_from(left).unwrap_or(Duration::ZERO);
    Some(now.mono + left)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::ws;
    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        dao::room_store::{MemoryRoomStore, RoomStore},
        state::{
            registry::{ConnectionChannels, ConnectionHandle, ConnectionRegistry},
            room::RoomSettings,
        },
    };

    #[derive(Clone, Default)]
    struct CountingStore {
        inner: MemoryRoomStore,
        saves: Arc<AtomicUsize>,
    }

    impl RoomStore for CountingStore {
        fn allocate_room_id(&self) -> BoxFuture<'static, StorageResult<RoomId>> {
            self.inner.allocate_room_id()
        }
        fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let save = self.inner.save_room(room);
            Box::pin(async move {
                // Give a competing caller the chance to reach the room lock mid-save.
                tokio::task::yield_now().await;
                save.await
            })
        }
        fn find_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
            self.inner.find_room(id)
        }
        fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
            self.inner.list_rooms()
        }
        fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.append_message(message)
        }
        fn list_messages(
            &self,
            room_id: RoomId,
        ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
            self.inner.list_messages(room_id)
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    struct Fixture {
        session: Arc<DebateSession>,
        store: CountingStore,
        registry: Arc<ConnectionRegistry>,
    }

    fn fixture(total_rounds: u32, round_duration: Duration) -> Fixture {
        let store = CountingStore::default();
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = SessionContext {
            store: Arc::new(StoreSlot::with_store(Arc::new(store.clone()))),
            hub: BroadcastHub::new(registry.clone()),
            transition_timeout: Some(Duration::from_secs(5)),
            finished: None,
        };
        let room = RoomSession::new(
            1,
            RoomSettings {
                name: "Motion".into(),
                description: String::new(),
                max_duration: Duration::from_secs(600),
                total_rounds,
                round_duration,
            },
            time::OffsetDateTime::UNIX_EPOCH,
        );
        Fixture {
            session: DebateSession::spawn(room, ctx),
            store,
            registry,
        }
    }

    fn listen(registry: &ConnectionRegistry, user_id: UserId) -> ConnectionChannels {
        let (handle, channels) = ConnectionHandle::new(1, user_id, Role::Observer, 64);
        registry.register(handle);
        channels
    }

    fn drain(channels: &mut ConnectionChannels) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(ws::Message::Text(text)) = channels.outbound.try_recv() {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
        frames
    }

    async fn seat_debaters(session: &DebateSession) {
        session.join(1, Role::Proponent).await.unwrap();
        session.join(2, Role::Opponent).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn round_timer_drives_the_debate_to_its_end() {
        let Fixture { session, .. } = fixture(2, Duration::from_secs(1));

        seat_debaters(&session).await;
        assert_eq!(session.phase().await, DebatePhase::Ready);

        let room = session.start_debate().await.unwrap();
        assert_eq!(room.phase, DebatePhase::Ongoing);
        assert_eq!((room.current_round, room.current_speaker), (1, Some(1)));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let room = session.snapshot().await;
        assert_eq!((room.current_round, room.current_speaker), (2, Some(2)));
        assert_eq!(room.phase, DebatePhase::Ongoing);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(session.phase().await, DebatePhase::Finished);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_claims_on_one_slot_yield_one_winner() {
        for _ in 0..20 {
            let Fixture { session, .. } = fixture(2, Duration::from_secs(60));

            let claims: Vec<_> = [10, 11]
                .into_iter()
                .map(|user_id| {
                    let session = session.clone();
                    tokio::spawn(async move { session.join(user_id, Role::Proponent).await })
                })
                .collect();
            let mut outcomes = Vec::new();
            for claim in claims {
                outcomes.push(claim.await.unwrap());
            }

            assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
            assert!(outcomes.iter().any(|o| matches!(
                o,
                Err(SessionError::Rejected(TransitionError::RoleTaken {
                    role: Role::Proponent
                }))
            )));
            let winner = session.snapshot().await.proponent;
            assert!(matches!(winner, Some(10) | Some(11)));
            assert_eq!(session.snapshot().await.observers.len(), 0);
        }
    }

    #[tokio::test]
    async fn attach_rechecks_membership_under_the_room_lock() {
        let Fixture {
            session, registry, ..
        } = fixture(2, Duration::from_secs(60));
        session.join(5, Role::Observer).await.unwrap();
        let mut listener = listen(&registry, 50);

        let (handle, _channels) = ConnectionHandle::new(1, 5, Role::Observer, 8);
        session.attach(handle).await.unwrap();
        assert_eq!(registry.count_connections(1), 2);
        let frames = drain(&mut listener);
        assert!(frames[0]["content"].as_str().unwrap().contains('5'));

        // The role resolved for a socket can go away before the socket attaches.
        session.leave(5).await.unwrap();
        let (late, _late_channels) = ConnectionHandle::new(1, 5, Role::Observer, 8);
        let err = session.attach(late).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionError::UserNotInRoom { user_id: 5 })
        ));
        assert_eq!(registry.count_connections(1), 1);
    }

    #[tokio::test]
    async fn ending_twice_writes_and_publishes_nothing_more() {
        let Fixture {
            session,
            store,
            registry,
        } = fixture(2, Duration::from_secs(60));
        seat_debaters(&session).await;
        session.start_debate().await.unwrap();
        session.end_debate().await.unwrap();

        let mut channels = listen(&registry, 50);
        let saves = store.saves.load(Ordering::SeqCst);
        let logged = session.messages().await.unwrap().len();

        let err = session.end_debate().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionError::InvalidPhase {
                phase: DebatePhase::Finished,
                ..
            })
        ));
        assert_eq!(store.saves.load(Ordering::SeqCst), saves);
        assert_eq!(session.messages().await.unwrap().len(), logged);
        assert!(drain(&mut channels).is_empty());
    }

    #[tokio::test]
    async fn debater_leaving_mid_debate_is_the_last_notice() {
        let Fixture {
            session, registry, ..
        } = fixture(3, Duration::from_secs(60));
        seat_debaters(&session).await;
        session.start_debate().await.unwrap();

        let (opponent_conn, opponent_channels) = ConnectionHandle::new(1, 2, Role::Opponent, 16);
        registry.register(opponent_conn);
        let mut audience = listen(&registry, 50);

        let room = session.leave(2).await.unwrap();
        assert_eq!(room.phase, DebatePhase::Finished);
        assert!(room.end_time.is_some());
        assert_eq!(
            *opponent_channels.shutdown.borrow(),
            Some(CloseReason::LeftRoom)
        );

        let frames = drain(&mut audience);
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "system_message");
        assert!(last["content"].as_str().unwrap().contains('2'));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_loses_to_manual_end() {
        let Fixture { session, .. } = fixture(3, Duration::from_secs(30));
        seat_debaters(&session).await;
        session.start_debate().await.unwrap();
        let armed = session.inner.lock().await.scheduler.epoch();

        session.end_debate().await.unwrap();
        let err = session.round_elapsed(armed).await.unwrap_err();
        assert!(matches!(err, SessionError::StaleRound { .. }));
        assert_eq!(session.phase().await, DebatePhase::Finished);
    }

    #[tokio::test]
    async fn chat_is_logged_and_requires_membership() {
        let Fixture {
            session, registry, ..
        } = fixture(2, Duration::from_secs(60));
        session.join(7, Role::Observer).await.unwrap();
        let mut channels = listen(&registry, 50);

        let message = session.submit_message(7, "first!".into()).await.unwrap();
        assert_eq!(message.role_label(), "observer");
        assert_eq!(session.messages().await.unwrap().last(), Some(&message));
        let frames = drain(&mut channels);
        assert_eq!(frames.last().unwrap()["type"], "debate_message");

        let err = session.submit_message(8, "hi".into()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionError::UserNotInRoom { user_id: 8 })
        ));
    }

    #[tokio::test]
    async fn degraded_store_leaves_state_untouched() {
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = SessionContext {
            store: Arc::new(StoreSlot::degraded()),
            hub: BroadcastHub::new(registry),
            transition_timeout: None,
            finished: None,
        };
        let room = RoomSession::new(
            3,
            RoomSettings {
                name: "Motion".into(),
                description: String::new(),
                max_duration: Duration::from_secs(600),
                total_rounds: 1,
                round_duration: Duration::from_secs(60),
            },
            time::OffsetDateTime::UNIX_EPOCH,
        );
        let session = DebateSession::spawn(room, ctx);

        let err = session.join(1, Role::Proponent).await.unwrap_err();
        assert!(matches!(err, SessionError::Storage(StorageError::Degraded)));
        assert_eq!(session.snapshot().await.proponent, None);
    }
}
