//! Loopback transport for in-process rooms.
//!
//! Keeps host and clients in the same process without touching the network
//! stack. Used by embedded hosts and by tests that drive several sessions
//! through the full replication path.

use super::protocol::Message;
use super::{ClientLink, ConnectionId, ReplicationChannel, TransportError, TransportEvent};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Shared by the server and every client. A connection is open exactly
/// while it has an inbox.
#[derive(Debug, Default)]
struct HubState {
    next_connection: u64,
    server_events: VecDeque<TransportEvent>,
    inboxes: BTreeMap<ConnectionId, VecDeque<Message>>,
}

impl HubState {
    /// Forget a connection and tell the host, once
    fn close(&mut self, connection: ConnectionId) -> bool {
        if self.inboxes.remove(&connection).is_none() {
            return false;
        }
        self.server_events
            .push_back(TransportEvent::Disconnected(connection));
        true
    }
}

#[derive(Debug, Default, Clone)]
struct Hub(Arc<Mutex<HubState>>);

impl Hub {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Host half of the loopback transport
#[derive(Debug, Default)]
pub struct LoopbackServer {
    hub: Hub,
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection; the host sees it on its next poll
    pub fn connect(&self) -> LoopbackClient {
        let mut state = self.hub.lock();
        state.next_connection += 1;
        let connection = ConnectionId(state.next_connection);
        state.inboxes.insert(connection, VecDeque::new());
        state
            .server_events
            .push_back(TransportEvent::Connected(connection));
        debug!(%connection, "loopback client connected");

        LoopbackClient {
            hub: self.hub.clone(),
            connection,
        }
    }
}

impl ReplicationChannel for LoopbackServer {
    fn poll(&mut self) -> Vec<TransportEvent> {
        self.hub.lock().server_events.drain(..).collect()
    }

    fn broadcast(&mut self, message: &Message) {
        let mut state = self.hub.lock();
        for inbox in state.inboxes.values_mut() {
            inbox.push_back(message.clone());
        }
    }

    fn target(&mut self, connection: ConnectionId, message: &Message) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        let inbox = state
            .inboxes
            .get_mut(&connection)
            .ok_or(TransportError::UnknownPeer(connection))?;
        inbox.push_back(message.clone());
        Ok(())
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if self.hub.lock().close(connection) {
            debug!(%connection, "loopback client dropped by host");
        }
    }
}

/// Client half of the loopback transport
#[derive(Debug)]
pub struct LoopbackClient {
    hub: Hub,
    connection: ConnectionId,
}

impl LoopbackClient {
    /// The id the host knows this client by
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Leave the room
    pub fn close(&mut self) {
        self.hub.lock().close(self.connection);
    }
}

impl ClientLink for LoopbackClient {
    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&self.connection) {
            return Err(TransportError::Closed);
        }
        trace!(connection = %self.connection, kind = message.kind(), "loopback send");
        state.server_events.push_back(TransportEvent::Received {
            from: self.connection,
            message,
        });
        Ok(())
    }

    fn poll(&mut self) -> Vec<Message> {
        let mut state = self.hub.lock();
        state
            .inboxes
            .get_mut(&self.connection)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    fn is_connected(&self) -> bool {
        self.hub.lock().inboxes.contains_key(&self.connection)
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.close();
    }
}
