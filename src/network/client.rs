//! TCP client for joining rooms

use super::peer::Peer;
use super::protocol::Message;
use super::{ClientLink, ConnectionId, TransportError};
use crate::config::DEFAULT_PORT;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// A client connected to a room host
pub struct Client {
    /// Connection to the host
    peer: Peer,
}

impl Client {
    /// Connect to a host at the given address
    ///
    /// The address can be:
    /// - "IP:PORT" (e.g., "192.168.1.100:55333")
    /// - "IP" (uses default port 55333)
    /// - "hostname:PORT"
    /// - "hostname" (uses default port)
    pub fn connect(addr: &str) -> Result<Self, TransportError> {
        let socket_addr = parse_address(addr)?;
        Self::connect_addr(socket_addr)
    }

    /// Connect to a host at the given socket address
    pub fn connect_addr(addr: SocketAddr) -> Result<Self, TransportError> {
        // The host assigns the real id and reports it in `Welcome`
        let peer = Peer::connect(addr, ConnectionId(0))?;
        Ok(Client { peer })
    }

    /// Get the host's address
    pub fn host_addr(&self) -> SocketAddr {
        self.peer.addr
    }

    /// Close the connection
    pub fn leave(mut self) {
        self.peer.close();
    }
}

impl ClientLink for Client {
    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.peer.send(message)
    }

    fn poll(&mut self) -> Vec<Message> {
        self.peer.drain()
    }

    fn is_connected(&self) -> bool {
        self.peer.is_open()
    }
}

/// Parse an address string into a SocketAddr
///
/// Handles formats:
/// - "192.168.1.100:55333" -> parse directly
/// - "192.168.1.100" -> add default port
/// - "hostname:55333" -> resolve and use port
/// - "hostname" -> resolve and use default port
pub fn parse_address(addr: &str) -> io::Result<SocketAddr> {
    let with_port = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    };
    with_port
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not resolve address"))
}
