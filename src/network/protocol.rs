//! Network protocol message types
//!
//! Length-prefixed (u32 big-endian) JSON messages over a reliable stream.

use super::{ConnectionId, TransportError};
use crate::room::{Command, CommandError, LocalPlayerSlot, SessionHeader, SessionId, SessionState};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest frame body accepted from the wire
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Messages exchanged between a room host and its clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    /// Validated mutation request (client -> host)
    Command(Command),
    /// Ask for the list of sessions currently in the room (client -> host)
    PullRoster,
    /// Ask for one slot of one session (client -> host)
    PullSlot { session: SessionId, slot: u32 },

    /// Sent once to a connection after its session is registered (host -> one)
    Welcome {
        connection: ConnectionId,
        session: SessionState,
    },
    /// Answer to `PullRoster` (host -> one)
    RosterSummary { sessions: Vec<SessionHeader> },
    /// Answer to `PullSlot` (host -> one)
    SlotPulled { slot: LocalPlayerSlot },
    /// `PullSlot` named a slot that does not exist (host -> one)
    SlotPullFailed {
        session: SessionId,
        slot: u32,
        reason: CommandError,
    },
    /// A command was refused; nothing changed (host -> requester)
    CommandRejected { command: Command, reason: CommandError },

    /// Full snapshot of a session after a change, with the room aggregate (host -> all)
    SessionSnapshot { session: SessionState, all_ready: bool },
    /// A session left the room (host -> all)
    SessionLeft { session: SessionId, all_ready: bool },
    /// Everyone is ready; sessions are frozen as listed (host -> all)
    GameStarting { sessions: Vec<SessionState> },

    /// Ping to check connection
    Ping,
    /// Response to ping
    Pong,
}

impl Message {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Command(_) => "command",
            Message::PullRoster => "pull_roster",
            Message::PullSlot { .. } => "pull_slot",
            Message::Welcome { .. } => "welcome",
            Message::RosterSummary { .. } => "roster_summary",
            Message::SlotPulled { .. } => "slot_pulled",
            Message::SlotPullFailed { .. } => "slot_pull_failed",
            Message::CommandRejected { .. } => "command_rejected",
            Message::SessionSnapshot { .. } => "session_snapshot",
            Message::SessionLeft { .. } => "session_left",
            Message::GameStarting { .. } => "game_starting",
            Message::Ping => "ping",
            Message::Pong => "pong",
        }
    }

    /// Serialize message to bytes (length-prefixed JSON)
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(json.len()));
        }
        let len = json.len() as u32;
        let mut bytes = Vec::with_capacity(4 + json.len());
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    /// Deserialize message from bytes, returning how many bytes were consumed
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), TransportError> {
        if bytes.len() < 4 {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "need 4 bytes for length",
            )));
        }
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        if bytes.len() < 4 + len {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete message",
            )));
        }
        let msg = serde_json::from_slice(&bytes[4..4 + len])?;
        Ok((msg, 4 + len))
    }

    /// Write one frame to a stream
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), TransportError> {
        let bytes = self.to_bytes()?;
        stream.write_all(&bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Read one frame from a stream
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, TransportError> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body)?;
        Ok(serde_json::from_slice(&body)?)
    }
}
