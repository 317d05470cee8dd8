//! Lobby glue between transports and room state
//!
//! Handles:
//! - Hosting a room (`RoomHost`): transport events in, coordinator calls, outbound dispatch
//! - Joining a room (`JoinedRoom`): host messages in, shadow room updates, late-join pulls
//! - Room names

pub mod host;
pub mod joined;

pub use host::RoomHost;
pub use joined::JoinedRoom;

use crate::network::ConnectionId;
use crate::room::{Command, CommandError, SessionId, SessionState};
use rand::prelude::*;

/// Events from either side of the lobby
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// A session entered the room
    SessionJoined {
        connection: ConnectionId,
        session: SessionId,
    },
    /// A session left the room
    SessionLeft { session: SessionId },
    /// The host accepted a command
    CommandApplied {
        connection: ConnectionId,
        command: Command,
    },
    /// A command was refused. `connection` is the sender, when known.
    CommandRejected {
        connection: Option<ConnectionId>,
        command: Command,
        reason: CommandError,
    },
    /// The room-wide aggregate flipped
    AllReadyChanged(bool),
    /// Everyone is ready; play begins with these frozen sessions
    GameStarting { sessions: Vec<SessionState> },
    /// The host has acknowledged us
    Welcomed { connection: ConnectionId },
    /// Late-join pulls are done; every session is fully loaded
    Reconciled,
    /// Connection was lost
    Disconnected,
}

/// Generate a random room name like "COZY-COUCH"
pub fn generate_room_name() -> String {
    const ADJECTIVES: &[&str] = &[
        "COZY", "LOUD", "COMFY", "SNUG", "WILD", "LAZY", "FUZZY", "BUSY",
    ];
    const NOUNS: &[&str] = &[
        "COUCH", "SOFA", "FUTON", "DEN", "PARLOR", "LOUNGE", "CUSHION", "BEANBAG",
    ];

    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{}-{}", adj, noun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name_generation() {
        let name = generate_room_name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_uppercase())));
    }

    #[test]
    fn test_room_names_vary() {
        let names: std::collections::HashSet<String> =
            (0..50).map(|_| generate_room_name()).collect();
        assert!(names.len() > 1);
    }
}
