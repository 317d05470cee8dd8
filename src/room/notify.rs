//! Change notifications for read-only observers
//!
//! Presentation layers subscribe here instead of polling room state. Each
//! notice names one field of one session (or slot) with its old and new value.

use super::session::{SessionId, SessionPhase, SessionState};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeField {
    Joined,
    Left,
    SlotAdded,
    SlotRemoved,
    Name,
    Ready,
    SessionReady,
    Ordinal,
    Phase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    None,
    Flag(bool),
    Text(String),
    Number(u32),
    Phase(SessionPhase),
}

/// `(session, slot, field, old, new)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub session: SessionId,
    /// 1-based slot index, or `None` for session-level fields
    pub slot: Option<u32>,
    pub field: ChangeField,
    pub old: FieldValue,
    pub new: FieldValue,
}

impl ChangeNotice {
    fn session_level(session: SessionId, field: ChangeField, old: FieldValue, new: FieldValue) -> Self {
        Self {
            session,
            slot: None,
            field,
            old,
            new,
        }
    }

    fn slot_level(session: SessionId, slot: u32, field: ChangeField, old: FieldValue, new: FieldValue) -> Self {
        Self {
            session,
            slot: Some(slot),
            field,
            old,
            new,
        }
    }
}

/// Receives room changes in commit order.
///
/// Must not block. Notices may arrive on whichever thread is delivering at the
/// time, not necessarily the one whose operation produced them.
pub trait RoomObserver: Send + Sync {
    fn on_change(&self, notice: &ChangeNotice);

    fn on_all_ready_changed(&self, _all_ready: bool) {}
}

/// Describe how a session moved from `old` to `new`.
///
/// `None` on either side means the session did not exist (join / leave).
pub fn diff_session(old: Option<&SessionState>, new: Option<&SessionState>) -> Vec<ChangeNotice> {
    let mut notices = Vec::new();
    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => {
            notices.push(ChangeNotice::session_level(
                new.id,
                ChangeField::Joined,
                FieldValue::None,
                FieldValue::Number(new.client_ordinal),
            ));
            for slot in new.slots() {
                notices.push(ChangeNotice::slot_level(
                    new.id,
                    slot.index,
                    ChangeField::SlotAdded,
                    FieldValue::None,
                    FieldValue::Text(slot.name.clone()),
                ));
            }
        }
        (Some(old), None) => {
            notices.push(ChangeNotice::session_level(
                old.id,
                ChangeField::Left,
                FieldValue::Number(old.client_ordinal),
                FieldValue::None,
            ));
        }
        (Some(old), Some(new)) => diff_existing(old, new, &mut notices),
    }
    notices
}

fn diff_existing(old: &SessionState, new: &SessionState, notices: &mut Vec<ChangeNotice>) {
    let id = new.id;
    if old.client_ordinal != new.client_ordinal {
        notices.push(ChangeNotice::session_level(
            id,
            ChangeField::Ordinal,
            FieldValue::Number(old.client_ordinal),
            FieldValue::Number(new.client_ordinal),
        ));
    }
    if old.session_ready != new.session_ready {
        let flag = |v: Option<bool>| v.map_or(FieldValue::None, FieldValue::Flag);
        notices.push(ChangeNotice::session_level(
            id,
            ChangeField::SessionReady,
            flag(old.session_ready),
            flag(new.session_ready),
        ));
    }
    if old.phase != new.phase {
        notices.push(ChangeNotice::session_level(
            id,
            ChangeField::Phase,
            FieldValue::Phase(old.phase),
            FieldValue::Phase(new.phase),
        ));
    }

    for (before, after) in old.slots().iter().zip(new.slots()) {
        if before.name != after.name {
            notices.push(ChangeNotice::slot_level(
                id,
                after.index,
                ChangeField::Name,
                FieldValue::Text(before.name.clone()),
                FieldValue::Text(after.name.clone()),
            ));
        }
        if before.ready != after.ready {
            notices.push(ChangeNotice::slot_level(
                id,
                after.index,
                ChangeField::Ready,
                FieldValue::Flag(before.ready),
                FieldValue::Flag(after.ready),
            ));
        }
    }

    let common = old.slots().len().min(new.slots().len());
    for slot in &new.slots()[common..] {
        notices.push(ChangeNotice::slot_level(
            id,
            slot.index,
            ChangeField::SlotAdded,
            FieldValue::None,
            FieldValue::Text(slot.name.clone()),
        ));
    }
    // Highest index first, matching LIFO removal
    for slot in old.slots()[common..].iter().rev() {
        notices.push(ChangeNotice::slot_level(
            id,
            slot.index,
            ChangeField::SlotRemoved,
            FieldValue::Text(slot.name.clone()),
            FieldValue::None,
        ));
    }
}

/// Subscribers to one room or shadow room
#[derive(Default)]
pub struct ObserverSet {
    observers: Mutex<Vec<Arc<dyn RoomObserver>>>,
}

impl ObserverSet {
    pub fn subscribe(&self, observer: Arc<dyn RoomObserver>) {
        self.lock().push(observer);
    }

    pub fn notify(&self, notices: &[ChangeNotice]) {
        if notices.is_empty() {
            return;
        }
        for observer in self.snapshot() {
            for notice in notices {
                observer.on_change(notice);
            }
        }
    }

    pub fn notify_all_ready(&self, all_ready: bool) {
        for observer in self.snapshot() {
            observer.on_all_ready_changed(all_ready);
        }
    }

    // Observers run without the list locked so they may subscribe others
    fn snapshot(&self) -> Vec<Arc<dyn RoomObserver>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn RoomObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
