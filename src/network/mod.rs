//! Networking: replication call shapes, wire protocol, TCP and loopback transports
//!
//! This module provides:
//! - The `ReplicationChannel` seam the room host drives (Broadcast / Target / disconnect)
//! - The `ClientLink` seam a joined room drives (Commands and pull requests)
//! - TCP server and client with per-peer reader/writer threads
//! - An in-memory loopback hub for embedded hosts and tests
//! - Length-prefixed JSON framing for every message

pub mod client;
pub mod loopback;
pub mod peer;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use loopback::{LoopbackClient, LoopbackServer};
pub use protocol::Message;
pub use server::Server;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use tracing::warn;

/// Identifies one transport connection. Assigned by the host when the peer connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors raised by transports and framing
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("no such peer: {0}")]
    UnknownPeer(ConnectionId),
    #[error("connection closed")]
    Closed,
}

/// Something the host's transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection entered the room
    Connected(ConnectionId),
    /// A connection dropped (remote close, error, or kick)
    Disconnected(ConnectionId),
    /// A message arrived on a connection
    Received { from: ConnectionId, message: Message },
}

/// A message the room core wants delivered, by call shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver to every registered observer, fire-and-forget
    Broadcast(Message),
    /// Deliver to exactly one observer
    Target(ConnectionId, Message),
    /// Terminate a connection; the transport reports the teardown on its next poll
    Disconnect(ConnectionId),
}

/// Server side of the replication transport.
///
/// Delivery is reliable and ordered within one connection; nothing is
/// promised across connections.
pub trait ReplicationChannel {
    /// Drain connection changes and inbound messages
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Send to every connected observer
    fn broadcast(&mut self, message: &Message);

    /// Send to one observer
    fn target(&mut self, connection: ConnectionId, message: &Message) -> Result<(), TransportError>;

    /// Drop a connection
    fn disconnect(&mut self, connection: ConnectionId);

    /// Deliver a batch produced by the room core, in order
    fn dispatch(&mut self, outbound: Vec<Outbound>) {
        for item in outbound {
            match item {
                Outbound::Broadcast(message) => self.broadcast(&message),
                Outbound::Target(connection, message) => {
                    if let Err(e) = self.target(connection, &message) {
                        warn!(%connection, error = %e, "target delivery failed");
                    }
                }
                Outbound::Disconnect(connection) => self.disconnect(connection),
            }
        }
    }
}

/// Client side of the replication transport
pub trait ClientLink {
    /// Send a message to the host
    fn send(&mut self, message: Message) -> Result<(), TransportError>;

    /// Drain messages received from the host
    fn poll(&mut self) -> Vec<Message>;

    /// Whether the host is still reachable
    fn is_connected(&self) -> bool;
}
