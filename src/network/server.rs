//! TCP server for hosting rooms

use super::peer::Peer;
use super::protocol::Message;
use super::{ConnectionId, ReplicationChannel, TransportError, TransportEvent};
use crate::config::DEFAULT_PORT;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many ports past the requested one to try before giving up
const PORT_SEARCH_SPAN: u16 = 100;

/// Acceptor sleep between polls of the non-blocking listener
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A room server that accepts peer connections.
///
/// Dropping the server stops the acceptor and closes every peer.
pub struct Server {
    /// Local address the server is bound to
    addr: SocketAddr,
    /// Peers set up by the acceptor, not yet reported
    accepted: Receiver<Peer>,
    /// Connected peers
    peers: Vec<Peer>,
    /// Teardowns requested by the host, reported on the next poll
    kicked: Vec<ConnectionId>,
    /// Cleared to stop the acceptor
    listening: Arc<AtomicBool>,
}

impl Server {
    /// Start a new server on the default port with auto-increment
    pub fn start() -> Result<Self, TransportError> {
        Self::start_on_port(DEFAULT_PORT)
    }

    /// Start a new server on a specific port with auto-increment fallback
    pub fn start_on_port(start_port: u16) -> Result<Self, TransportError> {
        let max_port = start_port.saturating_add(PORT_SEARCH_SPAN);
        let mut port = start_port;
        let listener = loop {
            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(l) => break l,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && port < max_port => {
                    port += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (accepted_tx, accepted) = channel();
        let listening = Arc::new(AtomicBool::new(true));

        // Spawn acceptor thread
        let flag = Arc::clone(&listening);
        thread::spawn(move || {
            accept_loop(listener, accepted_tx, flag);
        });

        info!(%addr, "room server listening");

        Ok(Server {
            addr,
            accepted,
            peers: Vec::new(),
            kicked: Vec::new(),
            listening,
        })
    }

    /// Get the address the server is listening on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the port the server is listening on
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Get the number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Get ids of all connected peers
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.peers.iter().map(|p| p.connection).collect()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.listening.store(false, Ordering::Release);
        for peer in &mut self.peers {
            peer.close();
        }
        debug!(addr = %self.addr, "room server stopped");
    }
}

impl ReplicationChannel for Server {
    /// Poll for new connections, messages and teardowns
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events: Vec<TransportEvent> = self
            .kicked
            .drain(..)
            .map(TransportEvent::Disconnected)
            .collect();

        while let Ok(peer) = self.accepted.try_recv() {
            debug!(connection = %peer.connection, addr = %peer.addr, "peer connected");
            events.push(TransportEvent::Connected(peer.connection));
            self.peers.push(peer);
        }

        // Collect messages from peers and track disconnections
        let mut disconnected = Vec::new();
        for (i, peer) in self.peers.iter_mut().enumerate() {
            for message in peer.drain() {
                events.push(TransportEvent::Received {
                    from: peer.connection,
                    message,
                });
            }
            if !peer.is_open() {
                disconnected.push(i);
            }
        }

        // Remove disconnected peers (in reverse order to preserve indices)
        for i in disconnected.into_iter().rev() {
            let peer = self.peers.remove(i);
            debug!(connection = %peer.connection, "peer disconnected");
            events.push(TransportEvent::Disconnected(peer.connection));
        }

        events
    }

    /// Broadcast a message to all connected peers
    fn broadcast(&mut self, message: &Message) {
        for peer in &self.peers {
            let _ = peer.send(message.clone());
        }
    }

    /// Send a message to a specific peer
    fn target(&mut self, connection: ConnectionId, message: &Message) -> Result<(), TransportError> {
        self.peers
            .iter()
            .find(|p| p.connection == connection)
            .ok_or(TransportError::UnknownPeer(connection))?
            .send(message.clone())
    }

    /// Close a peer; the teardown is reported by the next poll
    fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(i) = self.peers.iter().position(|p| p.connection == connection) {
            let mut peer = self.peers.remove(i);
            peer.close();
            self.kicked.push(connection);
            info!(%connection, "connection terminated by host");
        }
    }
}

fn accept_loop(listener: TcpListener, accepted: Sender<Peer>, listening: Arc<AtomicBool>) {
    let mut next_connection = 1;
    while listening.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let connection = ConnectionId(next_connection);
                next_connection += 1;
                match Peer::new(stream, connection) {
                    Ok(peer) => {
                        if accepted.send(peer).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%connection, error = %e, "failed to set up accepted stream"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(e) => {
                warn!(error = %e, "acceptor stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_auto_increment_port() {
        let server1 = Server::start_on_port(55600).unwrap();
        let port1 = server1.port();

        let server2 = Server::start_on_port(port1).unwrap();
        let port2 = server2.port();

        assert_ne!(port1, port2);
        assert!(port2 > port1);
    }

    #[test]
    fn test_server_accepts_connection() {
        let mut server = Server::start_on_port(55610).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], server.port()));

        let _client = Peer::connect(addr, ConnectionId(0)).unwrap();

        thread::sleep(Duration::from_millis(150));
        let events = server.poll();

        assert!(events.iter().any(|e| matches!(e, TransportEvent::Connected(_))));
        assert_eq!(server.peer_count(), 1);
    }

    #[test]
    fn test_disconnect_reports_teardown_once() {
        let mut server = Server::start_on_port(55620).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], server.port()));

        let _client = Peer::connect(addr, ConnectionId(0)).unwrap();
        thread::sleep(Duration::from_millis(150));
        server.poll();
        let connection = server.connections()[0];

        server.disconnect(connection);
        assert_eq!(server.peer_count(), 0);

        let events = server.poll();
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == TransportEvent::Disconnected(connection))
                .count(),
            1
        );
        assert!(server.poll().is_empty());
    }

    #[test]
    fn test_first_poll_sees_connect_and_early_frames() {
        let mut server = Server::start_on_port(55635).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], server.port()));

        let client = Peer::connect(addr, ConnectionId(0)).unwrap();
        client.send(Message::PullRoster).unwrap();
        thread::sleep(Duration::from_millis(200));

        let events = server.poll();
        let connection = match events.first() {
            Some(TransportEvent::Connected(connection)) => *connection,
            other => panic!("expected a connect first, got {:?}", other),
        };
        assert!(events.contains(&TransportEvent::Received {
            from: connection,
            message: Message::PullRoster,
        }));
    }

    #[test]
    fn test_drop_stops_listening_and_closes_peers() {
        let mut server = Server::start_on_port(55665).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], server.port()));
        let mut client = Peer::connect(addr, ConnectionId(0)).unwrap();
        thread::sleep(Duration::from_millis(150));
        server.poll();

        drop(server);
        thread::sleep(Duration::from_millis(200));

        client.drain();
        assert!(!client.is_open());
        assert!(std::net::TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_target_unknown_peer() {
        let mut server = Server::start_on_port(55630).unwrap();
        assert!(matches!(
            server.target(ConnectionId(42), &Message::Pong),
            Err(TransportError::UnknownPeer(_))
        ));
    }
}
