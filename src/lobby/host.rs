//! Hosting side of a room

use super::{generate_room_name, LobbyEvent};
use crate::config::RoomConfig;
use crate::network::{
    ConnectionId, Message, Outbound, ReplicationChannel, Server, TransportError, TransportEvent,
};
use crate::room::{Applied, Command, CommandError, GameplayHooks, Invoker, RoomCoordinator};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A hosted room: drives the coordinator from transport events
pub struct RoomHost<C: ReplicationChannel = Server> {
    /// Room name (auto-generated)
    pub room_name: String,
    /// Transport to every joined connection
    channel: C,
    /// Authoritative room state
    coordinator: Arc<RoomCoordinator>,
    /// Aggregate as last reported to callers
    all_ready: bool,
}

impl RoomHost<Server> {
    /// Start hosting over TCP on the configured port (or the next free one)
    pub fn start(config: RoomConfig, hooks: Arc<dyn GameplayHooks>) -> Result<Self, TransportError> {
        let server = Server::start_on_port(config.port)?;
        Ok(Self::with_channel(server, config, hooks))
    }

    /// Get the port we're listening on
    pub fn port(&self) -> u16 {
        self.channel.port()
    }
}

impl<C: ReplicationChannel> RoomHost<C> {
    /// Host over an existing transport
    pub fn with_channel(channel: C, config: RoomConfig, hooks: Arc<dyn GameplayHooks>) -> Self {
        let room_name = generate_room_name();
        info!(room = %room_name, mode = ?config.ready_mode, max_local_players = config.max_local_players, "hosting room");
        Self {
            room_name,
            channel,
            coordinator: Arc::new(RoomCoordinator::new(config, hooks)),
            all_ready: false,
        }
    }

    pub fn coordinator(&self) -> &Arc<RoomCoordinator> {
        &self.coordinator
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Process pending transport events
    pub fn poll(&mut self) -> Vec<LobbyEvent> {
        let mut events = Vec::new();

        for event in self.channel.poll() {
            match event {
                TransportEvent::Connected(connection) => {
                    match self.coordinator.register_session(connection) {
                        Ok(applied) => {
                            if let Some(session) = self.coordinator.session(connection) {
                                events.push(LobbyEvent::SessionJoined {
                                    connection,
                                    session: session.id,
                                });
                            }
                            self.deliver(applied, &mut events);
                        }
                        Err(reason) => {
                            info!(%connection, error = %reason, "refusing connection");
                            self.channel.disconnect(connection);
                        }
                    }
                }
                TransportEvent::Disconnected(connection) => {
                    let session = self.coordinator.session(connection).map(|s| s.id);
                    match self.coordinator.deregister_session(connection) {
                        Ok(applied) => {
                            if let Some(session) = session {
                                events.push(LobbyEvent::SessionLeft { session });
                            }
                            self.deliver(applied, &mut events);
                        }
                        Err(e) => debug!(%connection, error = %e, "disconnect without a session"),
                    }
                }
                TransportEvent::Received { from, message } => {
                    self.handle_message(from, message, &mut events);
                }
            }
        }

        events
    }

    fn handle_message(&mut self, from: ConnectionId, message: Message, events: &mut Vec<LobbyEvent>) {
        match message {
            Message::Command(command) => {
                match self.coordinator.apply(Invoker::Connection(from), &command) {
                    Ok(applied) => {
                        events.push(LobbyEvent::CommandApplied {
                            connection: from,
                            command,
                        });
                        self.deliver(applied, events);
                    }
                    Err(reason) => {
                        debug!(connection = %from, ?command, error = %reason, "command rejected");
                        self.send_rejection(from, command.clone(), reason.clone());
                        events.push(LobbyEvent::CommandRejected {
                            connection: Some(from),
                            command,
                            reason,
                        });
                    }
                }
            }
            Message::PullRoster => {
                let sessions = self.coordinator.roster();
                self.target(from, Message::RosterSummary { sessions });
            }
            Message::PullSlot { session, slot } => {
                let reply = match self.coordinator.pull_slot(session, slot) {
                    Ok(slot) => Message::SlotPulled { slot },
                    Err(reason) => Message::SlotPullFailed {
                        session,
                        slot,
                        reason,
                    },
                };
                self.target(from, reply);
            }
            Message::Ping => self.target(from, Message::Pong),
            Message::Pong => {}
            other => {
                warn!(connection = %from, kind = other.kind(), "unexpected message from client");
            }
        }
    }

    /// Kick a connection as the hosting process
    pub fn kick(&mut self, target: ConnectionId) -> Result<(), CommandError> {
        let applied = self.coordinator.kick(Invoker::Server, target)?;
        self.channel.dispatch(applied.outbound);
        Ok(())
    }

    /// Recompute the aggregate and deliver whatever it produces
    pub fn recalculate(&mut self) -> Vec<LobbyEvent> {
        let mut events = Vec::new();
        let applied = self.coordinator.recalculate();
        self.deliver(applied, &mut events);
        events
    }

    fn deliver(&mut self, applied: Applied, events: &mut Vec<LobbyEvent>) {
        if applied.all_ready != self.all_ready {
            self.all_ready = applied.all_ready;
            events.push(LobbyEvent::AllReadyChanged(applied.all_ready));
        }
        for item in &applied.outbound {
            if let Outbound::Broadcast(Message::GameStarting { sessions }) = item {
                events.push(LobbyEvent::GameStarting {
                    sessions: sessions.clone(),
                });
            }
        }
        self.channel.dispatch(applied.outbound);
    }

    fn send_rejection(&mut self, to: ConnectionId, command: Command, reason: CommandError) {
        self.target(to, Message::CommandRejected { command, reason });
    }

    fn target(&mut self, to: ConnectionId, message: Message) {
        if let Err(e) = self.channel.target(to, &message) {
            warn!(connection = %to, kind = message.kind(), error = %e, "reply not delivered");
        }
    }
}
