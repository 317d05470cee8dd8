//! Command rejection reasons

use crate::config::ReadyMode;
use crate::network::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a command was refused. A rejected command changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandError {
    #[error("session already has the maximum of {max} local players")]
    CapacityExceeded { max: u32 },
    #[error("session has no local players to remove")]
    Underflow,
    #[error("slot {index} out of range (session has {count})")]
    IndexOutOfRange { index: u32, count: u32 },
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: DenyReason },
    #[error("slot count {count} disagreed with {slots} slots; repaired")]
    IntegrityError { count: u32, slots: u32 },
    #[error("no such session")]
    UnknownSession,
    #[error("no session for {connection}")]
    UnknownConnection { connection: ConnectionId },
    #[error("command not available in {mode:?} mode")]
    ModeMismatch { mode: ReadyMode },
}

impl CommandError {
    pub fn denied(reason: DenyReason) -> Self {
        CommandError::PermissionDenied { reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The game has started; sessions no longer change
    SessionFrozen,
    /// Only the host session or the server may do this
    NotHost,
    /// A connection cannot kick itself
    SelfKick,
    /// The room no longer accepts new sessions
    GameStarted,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::SessionFrozen => "session frozen",
            DenyReason::NotHost => "not the host",
            DenyReason::SelfKick => "cannot kick yourself",
            DenyReason::GameStarted => "game already started",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            CommandError::denied(DenyReason::SessionFrozen).to_string(),
            "permission denied: session frozen"
        );
        assert_eq!(
            CommandError::IndexOutOfRange { index: 3, count: 2 }.to_string(),
            "slot 3 out of range (session has 2)"
        );
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_string(&CommandError::denied(DenyReason::NotHost)).unwrap();
        assert_eq!(json, r#"{"kind":"permission_denied","reason":"not_host"}"#);
        let json = serde_json::to_string(&CommandError::Underflow).unwrap();
        assert_eq!(json, r#"{"kind":"underflow"}"#);
    }
}
