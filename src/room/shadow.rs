//! Client-side shadow copies of room state
//!
//! A shadow room mirrors what the host broadcasts. Snapshots always replace
//! what is held (including optimistic local edits); stale ones, by version,
//! are dropped. A client that joins a populated room pulls each existing
//! slot in ascending order and never exposes a slot before its pull lands.

use super::command::Command;
use super::error::CommandError;
use super::notify::{diff_session, ChangeNotice, ObserverSet, RoomObserver};
use super::session::{SessionHeader, SessionId, SessionPhase, SessionState};
use super::slot::LocalPlayerSlot;
use crate::network::{ConnectionId, Message};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct SessionShadow {
    header: SessionHeader,
    /// Loaded prefix: always slots `1..=slots.len()`, never a gap
    slots: Vec<LocalPlayerSlot>,
    /// How many slots the host says exist
    expected: u32,
    /// Index of the outstanding pull, if any
    pending: Option<u32>,
    /// Confirmed values saved before the first unconfirmed local edit
    base: Option<(Vec<LocalPlayerSlot>, Option<bool>)>,
}

impl SessionShadow {
    fn from_snapshot(session: &SessionState) -> Self {
        Self {
            header: session.header(),
            slots: session.slots().to_vec(),
            expected: session.count(),
            pending: None,
            base: None,
        }
    }

    fn from_header(header: SessionHeader) -> Self {
        let expected = header.count;
        Self {
            header,
            slots: Vec::new(),
            expected,
            pending: (expected > 0).then_some(1),
            base: None,
        }
    }

    fn is_loaded(&self) -> bool {
        self.pending.is_none() && self.slots.len() as u32 == self.expected
    }

    fn view(&self) -> SessionState {
        let mut header = self.header.clone();
        header.count = self.slots.len() as u32;
        SessionState::from_parts(header, self.slots.clone())
    }

    fn save_base(&mut self) {
        if self.base.is_none() {
            self.base = Some((self.slots.clone(), self.header.session_ready));
        }
    }
}

/// What one client believes the room looks like
#[derive(Default)]
pub struct ShadowRoom {
    local: Option<ConnectionId>,
    sessions: BTreeMap<SessionId, SessionShadow>,
    all_ready: bool,
    started: bool,
    observers: ObserverSet,
}

impl ShadowRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn RoomObserver>) {
        self.observers.subscribe(observer);
    }

    /// Our own connection, once the host has welcomed us
    pub fn local_connection(&self) -> Option<ConnectionId> {
        self.local
    }

    /// Our own session, once known
    pub fn local_session(&self) -> Option<SessionState> {
        let local = self.local?;
        self.sessions
            .values()
            .find(|s| s.header.connection == local)
            .map(SessionShadow::view)
    }

    /// Aggregate as last reported by the host
    pub fn all_ready(&self) -> bool {
        self.all_ready
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<(u32, SessionId)> = self
            .sessions
            .values()
            .map(|s| (s.header.client_ordinal, s.header.id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Loaded slots of a session; a prefix of the real list while pulls run
    pub fn slots(&self, session: SessionId) -> Option<&[LocalPlayerSlot]> {
        self.sessions.get(&session).map(|s| s.slots.as_slice())
    }

    /// Full session state, only once every slot has been loaded
    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        self.sessions
            .get(&session)
            .filter(|s| s.is_loaded())
            .map(SessionShadow::view)
    }

    /// Every fully loaded session, by ordinal
    pub fn sessions(&self) -> Vec<SessionState> {
        self.session_ids()
            .into_iter()
            .filter_map(|id| self.session_state(id))
            .collect()
    }

    /// True when no pulls are outstanding and every session is complete
    pub fn is_reconciled(&self) -> bool {
        self.sessions.values().all(SessionShadow::is_loaded)
    }

    pub fn apply_welcome(&mut self, connection: ConnectionId, session: SessionState) {
        debug!(%connection, session = %session.id, "welcomed into room");
        self.local = Some(connection);
        self.apply_snapshot(session, self.all_ready);
    }

    /// Replace a session with the host's snapshot. Returns false if stale.
    pub fn apply_snapshot(&mut self, mut session: SessionState, all_ready: bool) -> bool {
        if let Some(existing) = self.sessions.get(&session.id) {
            if existing.header.version > session.version {
                trace!(session = %session.id, version = session.version, "stale snapshot dropped");
                return false;
            }
        }
        if let Err(e) = session.check_integrity() {
            debug!(session = %session.id, error = %e, "repaired inbound snapshot");
        }

        let before = self.sessions.get(&session.id).map(SessionShadow::view);
        self.sessions
            .insert(session.id, SessionShadow::from_snapshot(&session));
        self.notify(diff_session(before.as_ref(), Some(&session)));
        self.set_all_ready(all_ready);
        true
    }

    pub fn apply_left(&mut self, session: SessionId, all_ready: bool) {
        if let Some(removed) = self.sessions.remove(&session) {
            self.notify(diff_session(Some(&removed.view()), None));
        }
        self.set_all_ready(all_ready);
    }

    pub fn apply_game_starting(&mut self, sessions: Vec<SessionState>) {
        for session in sessions {
            self.apply_snapshot(session, true);
        }
        self.started = true;
    }

    /// Take in the room roster. Returns the first pull for every session
    /// whose slots still need loading.
    pub fn apply_roster(&mut self, headers: Vec<SessionHeader>) -> Vec<Message> {
        let listed: Vec<SessionId> = headers.iter().map(|h| h.id).collect();
        let gone: Vec<SessionId> = self
            .sessions
            .keys()
            .filter(|id| !listed.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(removed) = self.sessions.remove(&id) {
                self.notify(diff_session(Some(&removed.view()), None));
            }
        }

        let mut pulls = Vec::new();
        for header in headers {
            if let Some(existing) = self.sessions.get(&header.id) {
                if existing.is_loaded() && existing.header.version >= header.version {
                    continue;
                }
            }
            let id = header.id;
            let before = self.sessions.get(&id).map(SessionShadow::view);
            let shadow = SessionShadow::from_header(header);
            let after = shadow.view();
            if let Some(index) = shadow.pending {
                pulls.push(Message::PullSlot { session: id, slot: index });
            }
            self.sessions.insert(id, shadow);
            self.notify(diff_session(before.as_ref(), Some(&after)));
        }
        debug!(sessions = self.sessions.len(), pulls = pulls.len(), "roster received");
        pulls
    }

    /// Store a pulled slot. Returns the next pull for that session, if any.
    ///
    /// Replies that do not match the outstanding pull are ignored.
    pub fn apply_pulled(&mut self, slot: LocalPlayerSlot) -> Option<Message> {
        let shadow = self.sessions.get_mut(&slot.session)?;
        if shadow.pending != Some(slot.index) {
            trace!(session = %slot.session, index = slot.index, "unexpected slot reply ignored");
            return None;
        }

        let session = slot.session;
        let before = shadow.view();
        shadow.slots.push(slot);
        let loaded = shadow.slots.len() as u32;
        shadow.pending = (loaded < shadow.expected).then_some(loaded + 1);
        let next = shadow.pending;
        let after = shadow.view();

        self.notify(diff_session(Some(&before), Some(&after)));
        next.map(|index| Message::PullSlot {
            session,
            slot: index,
        })
    }

    /// The host no longer has the slot we asked for; the session shrank
    pub fn apply_pull_failed(&mut self, session: SessionId, slot: u32, reason: &CommandError) {
        if let Some(shadow) = self.sessions.get_mut(&session) {
            if shadow.pending == Some(slot) {
                debug!(%session, slot, error = %reason, "slot pull failed");
                shadow.expected = slot - 1;
                shadow.pending = None;
            }
        }
    }

    /// Every outstanding pull, to send again
    pub fn reissue_pulls(&self) -> Vec<Message> {
        self.sessions
            .values()
            .filter_map(|s| {
                s.pending.map(|index| Message::PullSlot {
                    session: s.header.id,
                    slot: index,
                })
            })
            .collect()
    }

    /// Apply a command locally ahead of the host's answer.
    ///
    /// Only field edits on loaded slots are mirrored; the next snapshot
    /// overwrites them either way. Returns whether anything changed.
    pub fn optimistic(&mut self, session: SessionId, command: &Command) -> bool {
        let Some(shadow) = self.sessions.get_mut(&session) else {
            return false;
        };
        if shadow.header.phase == SessionPhase::Frozen {
            return false;
        }

        let before = shadow.view();
        let changed = match command {
            Command::SetReady { slot, ready } => match slot_position(&shadow.slots, *slot) {
                Some(i) => {
                    shadow.save_base();
                    shadow.slots[i].ready = *ready;
                    true
                }
                None => false,
            },
            Command::Rename { slot, name } => match slot_position(&shadow.slots, *slot) {
                Some(i) => {
                    shadow.save_base();
                    shadow.slots[i].name = name.clone();
                    true
                }
                None => false,
            },
            Command::SetSessionReady { ready } if shadow.header.session_ready.is_some() => {
                shadow.save_base();
                shadow.header.session_ready = Some(*ready);
                true
            }
            _ => false,
        };
        if changed {
            let after = shadow.view();
            self.notify(diff_session(Some(&before), Some(&after)));
        }
        changed
    }

    /// Undo unconfirmed local edits after the host refused them
    pub fn revert_optimistic(&mut self, session: SessionId) {
        let Some(shadow) = self.sessions.get_mut(&session) else {
            return;
        };
        let Some((slots, session_ready)) = shadow.base.take() else {
            return;
        };
        let before = shadow.view();
        shadow.slots = slots;
        shadow.header.session_ready = session_ready;
        let after = shadow.view();
        self.notify(diff_session(Some(&before), Some(&after)));
    }

    fn set_all_ready(&mut self, all_ready: bool) {
        if self.all_ready != all_ready {
            self.all_ready = all_ready;
            self.observers.notify_all_ready(all_ready);
        }
    }

    fn notify(&self, notices: Vec<ChangeNotice>) {
        self.observers.notify(&notices);
    }
}

fn slot_position(slots: &[LocalPlayerSlot], index: u32) -> Option<usize> {
    let i = index.checked_sub(1)? as usize;
    (i < slots.len()).then_some(i)
}
