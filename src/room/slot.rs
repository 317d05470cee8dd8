//! Local player slots

use super::session::SessionId;
use serde::{Deserialize, Serialize};

/// One local player's name and ready flag within a session.
///
/// Addressed by `(session, index)`; indices are 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPlayerSlot {
    pub session: SessionId,
    pub index: u32,
    pub name: String,
    pub ready: bool,
}

impl LocalPlayerSlot {
    pub fn new(session: SessionId, index: u32, name: String) -> Self {
        Self {
            session,
            index,
            name,
            ready: false,
        }
    }
}

/// Default display name for a freshly added slot
pub fn default_slot_name(client_ordinal: u32, index: u32) -> String {
    format!("{} / local player {}", client_ordinal, index)
}

/// Cut a name down to `max_len` characters (not bytes)
pub fn truncate_name(name: &str, max_len: usize) -> String {
    name.chars().take(max_len).collect()
}
