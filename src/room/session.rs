//! Per-connection session records

use super::error::{CommandError, DenyReason};
use super::slot::{default_slot_name, truncate_name, LocalPlayerSlot};
use crate::config::ReadyMode;
use crate::network::ConnectionId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Stable id of a session, assigned when its connection joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(rand::rng().random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Lifecycle of a session once it exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Active,
    /// Game has started; every command is refused
    Frozen,
}

/// Replicated state of one connection and its local players.
///
/// `count` is always re-derived from `slots`. Every accepted mutation bumps
/// `version` so shadow copies can tell stale snapshots from fresh ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub connection: ConnectionId,
    /// 0-based join order; 0 is the host session
    pub client_ordinal: u32,
    slots: Vec<LocalPlayerSlot>,
    count: u32,
    /// Present only in `session_and_slots` mode
    pub session_ready: Option<bool>,
    pub phase: SessionPhase,
    pub version: u64,
}

/// Everything about a session except its slots. Sent in roster summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub id: SessionId,
    pub connection: ConnectionId,
    pub client_ordinal: u32,
    pub count: u32,
    pub session_ready: Option<bool>,
    pub phase: SessionPhase,
    pub version: u64,
}

impl SessionState {
    pub fn new(id: SessionId, connection: ConnectionId, client_ordinal: u32, mode: ReadyMode) -> Self {
        Self {
            id,
            connection,
            client_ordinal,
            slots: Vec::new(),
            count: 0,
            session_ready: match mode {
                ReadyMode::SlotsOnly => None,
                ReadyMode::SessionAndSlots => Some(false),
            },
            phase: SessionPhase::Active,
            version: 0,
        }
    }

    /// Rebuild a session from a header and its slots, as pulled by a client
    pub fn from_parts(header: SessionHeader, slots: Vec<LocalPlayerSlot>) -> Self {
        let count = slots.len() as u32;
        Self {
            id: header.id,
            connection: header.connection,
            client_ordinal: header.client_ordinal,
            slots,
            count,
            session_ready: header.session_ready,
            phase: header.phase,
            version: header.version,
        }
    }

    pub fn header(&self) -> SessionHeader {
        SessionHeader {
            id: self.id,
            connection: self.connection,
            client_ordinal: self.client_ordinal,
            count: self.count,
            session_ready: self.session_ready,
            phase: self.phase,
            version: self.version,
        }
    }

    pub fn slots(&self) -> &[LocalPlayerSlot] {
        &self.slots
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Slot by 1-based index
    pub fn slot(&self, index: u32) -> Option<&LocalPlayerSlot> {
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get(i as usize))
    }

    pub fn is_frozen(&self) -> bool {
        self.phase == SessionPhase::Frozen
    }

    /// Verify `count` and slot numbering against the slot list.
    ///
    /// On mismatch the record is repaired from the list and the error is
    /// returned so the caller can refuse whatever it was about to do.
    pub fn check_integrity(&mut self) -> Result<(), CommandError> {
        let actual = self.slots.len() as u32;
        let numbered = self
            .slots
            .iter()
            .enumerate()
            .all(|(i, s)| s.index == i as u32 + 1 && s.session == self.id);
        if self.count == actual && numbered {
            return Ok(());
        }

        warn!(
            session = %self.id,
            count = self.count,
            slots = actual,
            "slot integrity mismatch, repairing"
        );
        let reported = self.count;
        self.count = actual;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.index = i as u32 + 1;
            slot.session = self.id;
        }
        Err(CommandError::IntegrityError {
            count: reported,
            slots: actual,
        })
    }

    /// Refuse mutation once frozen, then verify integrity
    pub fn ensure_mutable(&mut self) -> Result<(), CommandError> {
        if self.is_frozen() {
            return Err(CommandError::denied(DenyReason::SessionFrozen));
        }
        self.check_integrity()
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Append a not-ready slot with a default name
    pub fn add_local_player(&mut self, max: u32, max_name_len: usize) -> Result<&LocalPlayerSlot, CommandError> {
        self.ensure_mutable()?;
        if self.count >= max {
            return Err(CommandError::CapacityExceeded { max });
        }
        let index = self.count + 1;
        let name = truncate_name(&default_slot_name(self.client_ordinal, index), max_name_len);
        self.slots.push(LocalPlayerSlot::new(self.id, index, name));
        self.count = self.slots.len() as u32;
        self.bump();
        Ok(&self.slots[self.slots.len() - 1])
    }

    /// Remove the highest-index slot
    pub fn remove_last_local_player(&mut self) -> Result<LocalPlayerSlot, CommandError> {
        self.ensure_mutable()?;
        let removed = self.slots.pop().ok_or(CommandError::Underflow)?;
        self.count = self.slots.len() as u32;
        self.bump();
        Ok(removed)
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut LocalPlayerSlot, CommandError> {
        let count = self.count;
        if index < 1 || index > count {
            return Err(CommandError::IndexOutOfRange { index, count });
        }
        Ok(&mut self.slots[(index - 1) as usize])
    }

    /// Set a slot's ready flag; returns the previous value
    pub fn set_ready(&mut self, index: u32, ready: bool) -> Result<bool, CommandError> {
        self.ensure_mutable()?;
        let slot = self.slot_mut(index)?;
        let old = std::mem::replace(&mut slot.ready, ready);
        self.bump();
        Ok(old)
    }

    /// Rename a slot, truncating to `max_len` characters; returns the previous name
    pub fn rename(&mut self, index: u32, name: &str, max_len: usize) -> Result<String, CommandError> {
        self.ensure_mutable()?;
        let name = truncate_name(name, max_len);
        let slot = self.slot_mut(index)?;
        let old = std::mem::replace(&mut slot.name, name);
        self.bump();
        Ok(old)
    }

    /// Set the session-level flag; returns the previous value
    pub fn set_session_ready(&mut self, ready: bool) -> Result<bool, CommandError> {
        self.ensure_mutable()?;
        let old = self.session_ready.ok_or(CommandError::ModeMismatch {
            mode: ReadyMode::SlotsOnly,
        })?;
        self.session_ready = Some(ready);
        self.bump();
        Ok(old)
    }

    pub fn freeze(&mut self) {
        if !self.is_frozen() {
            self.phase = SessionPhase::Frozen;
            self.bump();
        }
    }

    /// Move to a new join position; returns whether anything changed
    pub fn set_ordinal(&mut self, ordinal: u32) -> bool {
        if self.client_ordinal == ordinal {
            return false;
        }
        self.client_ordinal = ordinal;
        self.bump();
        true
    }

    #[cfg(test)]
    pub(crate) fn corrupt_count(&mut self, count: u32) {
        self.count = count;
    }
}
