//! Authoritative room coordinator
//!
//! The host runs one coordinator per room. It owns the session registry,
//! validates every command against it, recomputes the ready aggregate and
//! declares the game started on the first false -> true edge. Everything it
//! wants sent comes back as `Outbound` items for the transport to deliver.
//!
//! Hooks and observers run after the registry lock is released, in the order
//! their operations committed. They may read the coordinator.

use super::aggregate::ReadyAggregator;
use super::command::{Command, Invoker};
use super::error::{CommandError, DenyReason};
use super::notify::{diff_session, ChangeNotice, ObserverSet, RoomObserver};
use super::session::{SessionHeader, SessionId, SessionState};
use super::slot::LocalPlayerSlot;
use crate::config::RoomConfig;
use crate::network::{ConnectionId, Message, Outbound};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, info};

/// Gameplay side of the room boundary
pub trait GameplayHooks: Send + Sync {
    /// Called exactly once, when every session first becomes ready.
    /// Sessions are frozen and ordered by client ordinal.
    fn on_all_ready(&self, sessions: &[SessionState]);

    fn on_session_joined(&self, _session: SessionId) {}

    fn on_session_left(&self, _session: SessionId) {}
}

/// Hooks that do nothing
pub struct NoopHooks;

impl GameplayHooks for NoopHooks {
    fn on_all_ready(&self, _sessions: &[SessionState]) {}
}

/// Result of an accepted operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Messages to deliver, in order
    pub outbound: Vec<Outbound>,
    /// Aggregate after the operation
    pub all_ready: bool,
    /// This operation started the game
    pub game_started: bool,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: BTreeMap<ConnectionId, SessionState>,
    all_ready: bool,
    started: bool,
    /// Effects of committed operations not yet delivered, oldest first
    pending: VecDeque<Effects>,
}

impl Registry {
    fn ordered(&self) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.client_ordinal);
        sessions
    }
}

/// Work collected under the registry lock and run after it is released
#[derive(Debug, Default)]
struct Effects {
    notices: Vec<ChangeNotice>,
    edge: Option<bool>,
    joined: Option<SessionId>,
    left: Option<SessionId>,
    started: Option<Vec<SessionState>>,
}

pub struct RoomCoordinator {
    config: RoomConfig,
    aggregator: ReadyAggregator,
    registry: Mutex<Registry>,
    /// Held by whichever thread is delivering effects
    delivery: Mutex<()>,
    hooks: Arc<dyn GameplayHooks>,
    observers: ObserverSet,
}

impl RoomCoordinator {
    pub fn new(config: RoomConfig, hooks: Arc<dyn GameplayHooks>) -> Self {
        Self {
            aggregator: ReadyAggregator::new(config.ready_mode),
            config,
            registry: Mutex::new(Registry::default()),
            delivery: Mutex::new(()),
            hooks,
            observers: ObserverSet::default(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn subscribe(&self, observer: Arc<dyn RoomObserver>) {
        self.observers.subscribe(observer);
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the session for a new connection.
    ///
    /// The session starts with `initial_local_players` slots. The newcomer
    /// gets a `Welcome`, everyone gets the snapshot.
    pub fn register_session(&self, connection: ConnectionId) -> Result<Applied, CommandError> {
        let mut fx = Effects::default();
        let mut outbound = Vec::new();

        let mut reg = self.lock();
        if reg.started {
            return Err(CommandError::denied(DenyReason::GameStarted));
        }
        if let Some(existing) = reg.sessions.get(&connection) {
            outbound.push(Outbound::Target(
                connection,
                Message::Welcome {
                    connection,
                    session: existing.clone(),
                },
            ));
            return Ok(Applied {
                outbound,
                all_ready: reg.all_ready,
                game_started: false,
            });
        }

        let ordinal = reg.sessions.len() as u32;
        let mut session = SessionState::new(
            SessionId::generate(),
            connection,
            ordinal,
            self.config.ready_mode,
        );
        for _ in 0..self.config.initial_local_players {
            session.add_local_player(self.config.max_local_players, self.config.max_name_len)?;
        }

        info!(%connection, session = %session.id, ordinal, slots = session.count(), "session joined");
        fx.notices = diff_session(None, Some(&session));
        fx.joined = Some(session.id);
        reg.sessions.insert(connection, session);

        let all_ready = self.settle(&mut reg, &mut fx);
        if let Some(session) = reg.sessions.get(&connection) {
            outbound.push(Outbound::Target(
                connection,
                Message::Welcome {
                    connection,
                    session: session.clone(),
                },
            ));
            outbound.push(Outbound::Broadcast(Message::SessionSnapshot {
                session: session.clone(),
                all_ready,
            }));
        }
        let game_started = push_game_start(&fx, &mut outbound);
        self.commit(reg, fx);
        Ok(Applied {
            outbound,
            all_ready,
            game_started,
        })
    }

    /// Tear down the session of a dropped connection.
    ///
    /// Later joiners shift down one ordinal so the room always has a host
    /// session at ordinal 0. The aggregate is recomputed immediately: a
    /// departed session can no longer hold the others back.
    pub fn deregister_session(&self, connection: ConnectionId) -> Result<Applied, CommandError> {
        let mut fx = Effects::default();
        let mut outbound = Vec::new();

        let mut reg = self.lock();
        let removed = reg
            .sessions
            .remove(&connection)
            .ok_or(CommandError::UnknownConnection { connection })?;
        info!(%connection, session = %removed.id, "session left");
        fx.notices = diff_session(Some(&removed), None);
        fx.left = Some(removed.id);

        let mut shifted = Vec::new();
        if !reg.started {
            for session in reg.sessions.values_mut() {
                if session.client_ordinal > removed.client_ordinal {
                    let before = session.clone();
                    session.set_ordinal(session.client_ordinal - 1);
                    fx.notices.extend(diff_session(Some(&before), Some(&*session)));
                    shifted.push(session.connection);
                }
            }
        }

        let all_ready = self.settle(&mut reg, &mut fx);
        outbound.push(Outbound::Broadcast(Message::SessionLeft {
            session: removed.id,
            all_ready,
        }));
        for conn in shifted {
            if let Some(session) = reg.sessions.get(&conn) {
                outbound.push(Outbound::Broadcast(Message::SessionSnapshot {
                    session: session.clone(),
                    all_ready,
                }));
            }
        }
        let game_started = push_game_start(&fx, &mut outbound);
        self.commit(reg, fx);
        Ok(Applied {
            outbound,
            all_ready,
            game_started,
        })
    }

    /// Validate and apply one command.
    ///
    /// A rejected command changes nothing (apart from an integrity repair)
    /// and produces no broadcast.
    pub fn apply(&self, invoker: Invoker, command: &Command) -> Result<Applied, CommandError> {
        let max = self.config.max_local_players;
        let name_len = self.config.max_name_len;
        match command {
            Command::Kick { target } => self.kick(invoker, *target),
            Command::AddLocalPlayer => self.mutate(invoker, command, |session| {
                session.add_local_player(max, name_len).map(|_| ())
            }),
            Command::RemoveLastLocalPlayer => self.mutate(invoker, command, |session| {
                session.remove_last_local_player().map(|_| ())
            }),
            Command::SetReady { slot, ready } => self.mutate(invoker, command, |session| {
                session.set_ready(*slot, *ready).map(|_| ())
            }),
            Command::Rename { slot, name } => self.mutate(invoker, command, |session| {
                session.rename(*slot, name, name_len).map(|_| ())
            }),
            Command::SetSessionReady { ready } => self.mutate(invoker, command, |session| {
                session.set_session_ready(*ready).map(|_| ())
            }),
        }
    }

    /// Run `op` against the invoker's session and replicate the result
    fn mutate<F>(&self, invoker: Invoker, command: &Command, op: F) -> Result<Applied, CommandError>
    where
        F: FnOnce(&mut SessionState) -> Result<(), CommandError>,
    {
        let Invoker::Connection(connection) = invoker else {
            return Err(CommandError::UnknownSession);
        };

        let mut fx = Effects::default();
        let mut outbound = Vec::new();

        let mut reg = self.lock();
        let session = reg
            .sessions
            .get_mut(&connection)
            .ok_or(CommandError::UnknownConnection { connection })?;
        let before = session.clone();

        if let Err(e) = op(session) {
            debug!(%connection, ?command, error = %e, "command rejected");
            return Err(e);
        }

        debug!(%connection, ?command, version = session.version, "command applied");
        fx.notices = diff_session(Some(&before), Some(&*session));

        let all_ready = if command.affects_readiness() {
            self.settle(&mut reg, &mut fx)
        } else {
            reg.all_ready
        };
        if let Some(session) = reg.sessions.get(&connection) {
            outbound.push(Outbound::Broadcast(Message::SessionSnapshot {
                session: session.clone(),
                all_ready,
            }));
        }
        let game_started = push_game_start(&fx, &mut outbound);
        self.commit(reg, fx);
        Ok(Applied {
            outbound,
            all_ready,
            game_started,
        })
    }

    /// Host-only: ask the transport to drop `target`.
    ///
    /// The session is torn down when the transport reports the disconnect.
    pub fn kick(&self, invoker: Invoker, target: ConnectionId) -> Result<Applied, CommandError> {
        let reg = self.lock();
        if let Invoker::Connection(connection) = invoker {
            let session = reg
                .sessions
                .get(&connection)
                .ok_or(CommandError::UnknownConnection { connection })?;
            if session.is_frozen() {
                return Err(CommandError::denied(DenyReason::SessionFrozen));
            }
            if session.client_ordinal != 0 {
                return Err(CommandError::denied(DenyReason::NotHost));
            }
            if connection == target {
                return Err(CommandError::denied(DenyReason::SelfKick));
            }
        }
        if !reg.sessions.contains_key(&target) {
            return Err(CommandError::UnknownConnection { connection: target });
        }

        info!(?invoker, %target, "kicking connection");
        Ok(Applied {
            outbound: vec![Outbound::Disconnect(target)],
            all_ready: reg.all_ready,
            game_started: false,
        })
    }

    /// Recompute the aggregate from the full registry.
    ///
    /// Repeating this with nothing changed is harmless: game start fires
    /// only on a false -> true edge.
    pub fn recalculate(&self) -> Applied {
        let mut fx = Effects::default();
        let mut outbound = Vec::new();

        let mut reg = self.lock();
        let all_ready = self.settle(&mut reg, &mut fx);
        let game_started = push_game_start(&fx, &mut outbound);
        self.commit(reg, fx);
        Applied {
            outbound,
            all_ready,
            game_started,
        }
    }

    /// One slot, for late-join pulls
    pub fn pull_slot(&self, session: SessionId, index: u32) -> Result<LocalPlayerSlot, CommandError> {
        let reg = self.lock();
        let state = reg
            .sessions
            .values()
            .find(|s| s.id == session)
            .ok_or(CommandError::UnknownSession)?;
        state
            .slot(index)
            .cloned()
            .ok_or(CommandError::IndexOutOfRange {
                index,
                count: state.count(),
            })
    }

    /// Headers of every session, by ordinal
    pub fn roster(&self) -> Vec<SessionHeader> {
        self.lock().ordered().iter().map(SessionState::header).collect()
    }

    /// Every session, by ordinal
    pub fn sessions(&self) -> Vec<SessionState> {
        self.lock().ordered()
    }

    pub fn session(&self, connection: ConnectionId) -> Option<SessionState> {
        self.lock().sessions.get(&connection).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn all_ready(&self) -> bool {
        self.lock().all_ready
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Recompute the aggregate; on the first edge to true, freeze everything
    fn settle(&self, reg: &mut Registry, fx: &mut Effects) -> bool {
        let now = self.aggregator.all_ready(reg.sessions.values());
        if now == reg.all_ready {
            return now;
        }
        reg.all_ready = now;
        fx.edge = Some(now);
        debug!(all_ready = now, "aggregate changed");

        if now && !reg.started {
            reg.started = true;
            for session in reg.sessions.values_mut() {
                let before = session.clone();
                session.freeze();
                fx.notices.extend(diff_session(Some(&before), Some(&*session)));
            }
            let sessions = reg.ordered();
            info!(sessions = sessions.len(), "all sessions ready, starting game");
            fx.started = Some(sessions);
        }
        now
    }

    /// Queue this operation's effects behind earlier ones, then deliver
    fn commit(&self, mut reg: MutexGuard<'_, Registry>, fx: Effects) {
        reg.pending.push_back(fx);
        drop(reg);
        self.flush();
    }

    /// Deliver queued effects, oldest first, one thread at a time.
    ///
    /// A caller that finds a delivery in progress leaves its effects to
    /// that thread.
    fn flush(&self) {
        loop {
            let turn = match self.delivery.try_lock() {
                Ok(turn) => turn,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(fx) = self.next_effects() {
                self.run_effects(fx);
            }
            drop(turn);

            // Something may have been queued between the last pop and the release
            let idle = self.lock().pending.is_empty();
            if idle {
                return;
            }
        }
    }

    fn next_effects(&self) -> Option<Effects> {
        self.lock().pending.pop_front()
    }

    fn run_effects(&self, fx: Effects) {
        self.observers.notify(&fx.notices);
        if let Some(all_ready) = fx.edge {
            self.observers.notify_all_ready(all_ready);
        }
        if let Some(id) = fx.joined {
            self.hooks.on_session_joined(id);
        }
        if let Some(id) = fx.left {
            self.hooks.on_session_left(id);
        }
        if let Some(sessions) = fx.started {
            self.hooks.on_all_ready(&sessions);
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_count(&self, connection: ConnectionId, count: u32) {
        if let Some(session) = self.lock().sessions.get_mut(&connection) {
            session.corrupt_count(count);
        }
    }
}

fn push_game_start(fx: &Effects, outbound: &mut Vec<Outbound>) -> bool {
    match &fx.started {
        Some(sessions) => {
            outbound.push(Outbound::Broadcast(Message::GameStarting {
                sessions: sessions.clone(),
            }));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadyMode;
    use crate::room::notify::tests::Recorder;
    use crate::room::notify::ChangeField;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::thread;

    #[derive(Default)]
    struct CountingHooks {
        all_ready: AtomicUsize,
        joined: AtomicUsize,
        left: AtomicUsize,
        started_with: Mutex<Vec<SessionState>>,
    }

    impl GameplayHooks for CountingHooks {
        fn on_all_ready(&self, sessions: &[SessionState]) {
            self.all_ready.fetch_add(1, Ordering::SeqCst);
            *self.started_with.lock().unwrap() = sessions.to_vec();
        }

        fn on_session_joined(&self, _session: SessionId) {
            self.joined.fetch_add(1, Ordering::SeqCst);
        }

        fn on_session_left(&self, _session: SessionId) {
            self.left.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(max: u32, initial: u32) -> RoomConfig {
        RoomConfig {
            max_local_players: max,
            initial_local_players: initial,
            ..RoomConfig::default()
        }
    }

    fn new_room(config: RoomConfig) -> (RoomCoordinator, Arc<CountingHooks>) {
        let hooks = Arc::new(CountingHooks::default());
        (RoomCoordinator::new(config, hooks.clone()), hooks)
    }

    fn conn(n: u64) -> Invoker {
        Invoker::Connection(ConnectionId(n))
    }

    fn ready(slot: u32) -> Command {
        Command::SetReady { slot, ready: true }
    }

    #[test]
    fn test_register_adds_initial_slot_and_welcomes() {
        let (room, hooks) = new_room(config(4, 1));
        let applied = room.register_session(ConnectionId(1)).unwrap();

        let session = room.session(ConnectionId(1)).unwrap();
        assert_eq!(session.count(), 1);
        assert_eq!(session.client_ordinal, 0);
        assert_eq!(session.slot(1).unwrap().name, "0 / local player 1");

        assert!(matches!(
            &applied.outbound[0],
            Outbound::Target(ConnectionId(1), Message::Welcome { .. })
        ));
        assert!(matches!(
            &applied.outbound[1],
            Outbound::Broadcast(Message::SessionSnapshot { all_ready: false, .. })
        ));
        assert_eq!(hooks.joined.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capacity_through_commands() {
        let (room, _) = new_room(config(2, 0));
        room.register_session(ConnectionId(1)).unwrap();

        room.apply(conn(1), &Command::AddLocalPlayer).unwrap();
        room.apply(conn(1), &Command::AddLocalPlayer).unwrap();
        assert_eq!(
            room.apply(conn(1), &Command::AddLocalPlayer),
            Err(CommandError::CapacityExceeded { max: 2 })
        );
        assert_eq!(room.session(ConnectionId(1)).unwrap().count(), 2);
    }

    #[test]
    fn test_underflow_through_commands() {
        let (room, _) = new_room(config(2, 0));
        room.register_session(ConnectionId(1)).unwrap();
        let before = room.session(ConnectionId(1)).unwrap();

        assert_eq!(
            room.apply(conn(1), &Command::RemoveLastLocalPlayer),
            Err(CommandError::Underflow)
        );
        assert_eq!(room.session(ConnectionId(1)).unwrap(), before);
    }

    #[test]
    fn test_successful_command_broadcasts_snapshot() {
        let (room, _) = new_room(config(4, 2));
        room.register_session(ConnectionId(1)).unwrap();

        let applied = room.apply(conn(1), &ready(1)).unwrap();
        assert!(!applied.all_ready);
        match &applied.outbound[..] {
            [Outbound::Broadcast(Message::SessionSnapshot { session, all_ready })] => {
                assert!(session.slot(1).unwrap().ready);
                assert!(!all_ready);
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[test]
    fn test_two_sessions_start_exactly_once() {
        let (room, hooks) = new_room(config(4, 2));
        room.register_session(ConnectionId(1)).unwrap();
        room.register_session(ConnectionId(2)).unwrap();

        room.apply(conn(1), &ready(1)).unwrap();
        room.apply(conn(1), &ready(2)).unwrap();
        let applied = room.apply(conn(2), &ready(1)).unwrap();
        assert!(!applied.all_ready);
        assert!(!room.all_ready());

        let applied = room.apply(conn(2), &ready(2)).unwrap();
        assert!(applied.all_ready);
        assert!(applied.game_started);
        assert!(matches!(
            applied.outbound.last(),
            Some(Outbound::Broadcast(Message::GameStarting { sessions })) if sessions.len() == 2
        ));

        for _ in 0..3 {
            let again = room.recalculate();
            assert!(again.all_ready);
            assert!(!again.game_started);
            assert!(again.outbound.is_empty());
        }
        assert_eq!(hooks.all_ready.load(Ordering::SeqCst), 1);

        let started = hooks.started_with.lock().unwrap().clone();
        assert_eq!(started[0].client_ordinal, 0);
        assert_eq!(started[1].client_ordinal, 1);
        assert!(started.iter().all(SessionState::is_frozen));
    }

    #[test]
    fn test_frozen_sessions_reject_commands() {
        let (room, _) = new_room(config(4, 1));
        room.register_session(ConnectionId(1)).unwrap();
        room.apply(conn(1), &ready(1)).unwrap();
        assert!(room.is_started());

        let frozen = Err(CommandError::denied(DenyReason::SessionFrozen));
        assert_eq!(room.apply(conn(1), &Command::AddLocalPlayer), frozen);
        assert_eq!(
            room.apply(conn(1), &Command::SetReady { slot: 1, ready: false }),
            frozen
        );
        assert!(room.session(ConnectionId(1)).unwrap().slot(1).unwrap().ready);
    }

    #[test]
    fn test_join_after_start_rejected() {
        let (room, _) = new_room(config(4, 1));
        room.register_session(ConnectionId(1)).unwrap();
        room.apply(conn(1), &ready(1)).unwrap();

        assert_eq!(
            room.register_session(ConnectionId(2)),
            Err(CommandError::denied(DenyReason::GameStarted))
        );
        assert_eq!(room.session_count(), 1);
    }

    #[test]
    fn test_empty_session_never_starts_game() {
        let (room, hooks) = new_room(config(4, 0));
        room.register_session(ConnectionId(1)).unwrap();
        assert!(!room.recalculate().all_ready);
        assert_eq!(hooks.all_ready.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_unblocks_readiness() {
        let (room, hooks) = new_room(config(4, 1));
        room.register_session(ConnectionId(1)).unwrap();
        room.register_session(ConnectionId(2)).unwrap();
        room.apply(conn(1), &ready(1)).unwrap();
        assert!(!room.all_ready());

        let applied = room.deregister_session(ConnectionId(2)).unwrap();
        assert!(applied.all_ready);
        assert!(applied.game_started);
        assert!(matches!(
            applied.outbound[0],
            Outbound::Broadcast(Message::SessionLeft { all_ready: true, .. })
        ));
        assert_eq!(hooks.all_ready.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.left.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ordinals_compact_on_leave() {
        let (room, _) = new_room(config(4, 1));
        for n in 1..=3 {
            room.register_session(ConnectionId(n)).unwrap();
        }

        let applied = room.deregister_session(ConnectionId(1)).unwrap();
        assert_eq!(room.session(ConnectionId(2)).unwrap().client_ordinal, 0);
        assert_eq!(room.session(ConnectionId(3)).unwrap().client_ordinal, 1);
        // SessionLeft plus one snapshot per shifted session
        assert_eq!(applied.outbound.len(), 3);

        // The new host may kick
        assert!(room.kick(conn(2), ConnectionId(3)).is_ok());
    }

    #[test]
    fn test_kick_permissions() {
        let (room, _) = new_room(config(4, 1));
        room.register_session(ConnectionId(1)).unwrap();
        room.register_session(ConnectionId(2)).unwrap();

        assert_eq!(
            room.apply(conn(2), &Command::Kick { target: ConnectionId(1) }),
            Err(CommandError::denied(DenyReason::NotHost))
        );
        assert_eq!(
            room.kick(conn(1), ConnectionId(1)),
            Err(CommandError::denied(DenyReason::SelfKick))
        );
        assert_eq!(
            room.kick(conn(1), ConnectionId(9)),
            Err(CommandError::UnknownConnection {
                connection: ConnectionId(9)
            })
        );

        let applied = room
            .apply(conn(1), &Command::Kick { target: ConnectionId(2) })
            .unwrap();
        assert_eq!(applied.outbound, vec![Outbound::Disconnect(ConnectionId(2))]);
        // Kick itself does not remove the session; the disconnect does
        assert_eq!(room.session_count(), 2);

        assert!(room.kick(Invoker::Server, ConnectionId(1)).is_ok());
    }

    #[test]
    fn test_integrity_error_repairs_and_rejects() {
        let (room, _) = new_room(config(4, 2));
        room.register_session(ConnectionId(1)).unwrap();
        room.corrupt_count(ConnectionId(1), 7);

        assert_eq!(
            room.apply(conn(1), &ready(1)),
            Err(CommandError::IntegrityError { count: 7, slots: 2 })
        );
        let session = room.session(ConnectionId(1)).unwrap();
        assert_eq!(session.count(), 2);
        assert!(!session.slot(1).unwrap().ready);

        assert!(room.apply(conn(1), &ready(1)).is_ok());
    }

    #[test]
    fn test_session_ready_mode() {
        let (room, _) = new_room(config(4, 1));
        room.register_session(ConnectionId(1)).unwrap();
        assert_eq!(
            room.apply(conn(1), &Command::SetSessionReady { ready: true }),
            Err(CommandError::ModeMismatch {
                mode: ReadyMode::SlotsOnly
            })
        );

        let (room, hooks) = new_room(RoomConfig {
            ready_mode: ReadyMode::SessionAndSlots,
            ..config(4, 1)
        });
        room.register_session(ConnectionId(1)).unwrap();
        assert!(!room.apply(conn(1), &ready(1)).unwrap().all_ready);

        let applied = room
            .apply(conn(1), &Command::SetSessionReady { ready: true })
            .unwrap();
        assert!(applied.game_started);
        assert_eq!(hooks.all_ready.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_invokers() {
        let (room, _) = new_room(config(4, 1));
        assert_eq!(
            room.apply(conn(5), &Command::AddLocalPlayer),
            Err(CommandError::UnknownConnection {
                connection: ConnectionId(5)
            })
        );
        assert_eq!(
            room.apply(Invoker::Server, &Command::AddLocalPlayer),
            Err(CommandError::UnknownSession)
        );
        assert!(room.deregister_session(ConnectionId(5)).is_err());
    }

    #[test]
    fn test_pull_slot() {
        let (room, _) = new_room(config(4, 2));
        room.register_session(ConnectionId(1)).unwrap();
        let id = room.session(ConnectionId(1)).unwrap().id;

        assert_eq!(room.pull_slot(id, 2).unwrap().index, 2);
        assert_eq!(
            room.pull_slot(id, 3),
            Err(CommandError::IndexOutOfRange { index: 3, count: 2 })
        );
        assert_eq!(room.pull_slot(SessionId(0), 1), Err(CommandError::UnknownSession));
    }

    #[test]
    fn test_observers_see_changes_and_edges() {
        let (room, _) = new_room(config(4, 1));
        let recorder = Arc::new(Recorder::default());
        room.subscribe(recorder.clone());

        room.register_session(ConnectionId(1)).unwrap();
        room.apply(
            conn(1),
            &Command::Rename {
                slot: 1,
                name: "Ada".to_string(),
            },
        )
        .unwrap();
        room.apply(conn(1), &ready(1)).unwrap();

        let fields: Vec<ChangeField> = recorder.notices().iter().map(|n| n.field).collect();
        assert_eq!(
            fields,
            vec![
                ChangeField::Joined,
                ChangeField::SlotAdded,
                ChangeField::Name,
                ChangeField::Ready,
                ChangeField::Phase,
            ]
        );
        assert_eq!(recorder.all_ready_edges(), vec![true]);
    }

    /// Holds its first all-ready edge until released
    struct GatedObserver {
        edges: Mutex<Vec<bool>>,
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    impl RoomObserver for GatedObserver {
        fn on_change(&self, _notice: &ChangeNotice) {}

        fn on_all_ready_changed(&self, all_ready: bool) {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.edges.lock().unwrap().push(all_ready);
        }
    }

    #[test]
    fn test_edges_delivered_in_commit_order() {
        let (room, _) = new_room(config(4, 1));
        let room = Arc::new(room);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let observer = Arc::new(GatedObserver {
            edges: Mutex::default(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        });
        room.subscribe(observer.clone());
        room.register_session(ConnectionId(1)).unwrap();

        let readier = {
            let room = Arc::clone(&room);
            thread::spawn(move || room.apply(conn(1), &ready(1)).unwrap())
        };
        entered_rx.recv().unwrap();

        // true is still being delivered when false commits
        let left = room.deregister_session(ConnectionId(1)).unwrap();
        assert!(!left.all_ready);
        release_tx.send(()).unwrap();
        assert!(readier.join().unwrap().all_ready);

        assert_eq!(*observer.edges.lock().unwrap(), vec![true, false]);
        assert_eq!(
            observer.edges.lock().unwrap().last().copied(),
            Some(room.all_ready())
        );
    }

    #[test]
    fn test_hooks_may_read_the_room() {
        struct Reader {
            room: Mutex<Option<Arc<RoomCoordinator>>>,
            seen: Mutex<Vec<usize>>,
        }

        impl GameplayHooks for Reader {
            fn on_all_ready(&self, _sessions: &[SessionState]) {}

            fn on_session_joined(&self, _session: SessionId) {
                if let Some(room) = self.room.lock().unwrap().as_ref() {
                    self.seen.lock().unwrap().push(room.session_count());
                }
            }
        }

        let hooks = Arc::new(Reader {
            room: Mutex::default(),
            seen: Mutex::default(),
        });
        let room = Arc::new(RoomCoordinator::new(config(4, 1), hooks.clone()));
        *hooks.room.lock().unwrap() = Some(Arc::clone(&room));

        room.register_session(ConnectionId(1)).unwrap();
        room.register_session(ConnectionId(2)).unwrap();

        assert_eq!(*hooks.seen.lock().unwrap(), vec![1, 2]);
        hooks.room.lock().unwrap().take();
    }

    #[test]
    fn test_concurrent_sessions_start_once() {
        let (room, hooks) = new_room(config(4, 0));
        let room = Arc::new(room);
        let sessions = 8u64;
        for n in 1..=sessions {
            room.register_session(ConnectionId(n)).unwrap();
        }

        let handles: Vec<_> = (1..=sessions)
            .map(|n| {
                let room = Arc::clone(&room);
                thread::spawn(move || {
                    let me = conn(n);
                    for _ in 0..3 {
                        room.apply(me, &Command::AddLocalPlayer).unwrap();
                    }
                    room.apply(me, &Command::RemoveLastLocalPlayer).unwrap();
                    for slot in 1..=2 {
                        room.apply(me, &ready(slot)).unwrap();
                        room.recalculate();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(room.all_ready());
        assert_eq!(hooks.all_ready.load(Ordering::SeqCst), 1);
        for session in room.sessions() {
            assert_eq!(session.count(), 2);
            assert_eq!(session.slots().len(), 2);
            assert!(session.is_frozen());
        }
    }
}
