//! Commands: the only way room state changes

use crate::network::ConnectionId;
use serde::{Deserialize, Serialize};

/// A mutation request, validated and applied by the host.
///
/// Slot indices are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Append a slot at `count + 1`
    AddLocalPlayer,
    /// Remove the slot at `count`
    RemoveLastLocalPlayer,
    SetReady { slot: u32, ready: bool },
    Rename { slot: u32, name: String },
    /// Session-level flag; only valid in `session_and_slots` mode
    SetSessionReady { ready: bool },
    /// Host only: terminate another connection
    Kick { target: ConnectionId },
}

impl Command {
    /// Whether a successful apply can change the aggregate
    pub fn affects_readiness(&self) -> bool {
        !matches!(self, Command::Rename { .. } | Command::Kick { .. })
    }
}

/// Who issued a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoker {
    /// A connected session
    Connection(ConnectionId),
    /// The hosting process itself (no session of its own)
    Server,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_affecting_commands() {
        assert!(Command::AddLocalPlayer.affects_readiness());
        assert!(Command::SetReady { slot: 1, ready: true }.affects_readiness());
        assert!(!Command::Rename {
            slot: 1,
            name: "x".to_string()
        }
        .affects_readiness());
    }

    #[test]
    fn test_kick_wire_shape() {
        let json = serde_json::to_string(&Command::Kick {
            target: ConnectionId(3),
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"kick","target":3}"#);
    }
}
