//! Joined side of a room

use super::LobbyEvent;
use crate::network::{Client, ClientLink, ConnectionId, Message, TransportError};
use crate::room::{Command, ShadowRoom};
use tracing::{debug, info, warn};

/// A joined room: keeps a shadow copy in step with the host
pub struct JoinedRoom<L: ClientLink = Client> {
    /// Connection to the host
    link: L,
    /// What we believe the room looks like
    shadow: ShadowRoom,
    /// Roster received and pulls not yet finished
    reconciling: bool,
    /// Loss of the link already reported
    disconnected: bool,
}

impl JoinedRoom<Client> {
    /// Join a host over TCP
    pub fn join(addr: &str) -> Result<Self, TransportError> {
        let client = Client::connect(addr)?;
        info!(host = %client.host_addr(), "joined room");
        Ok(Self::with_link(client))
    }

    /// Leave the room
    pub fn leave(self) {
        self.link.leave();
    }
}

impl<L: ClientLink> JoinedRoom<L> {
    pub fn with_link(link: L) -> Self {
        Self {
            link,
            shadow: ShadowRoom::new(),
            reconciling: false,
            disconnected: false,
        }
    }

    pub fn shadow(&self) -> &ShadowRoom {
        &self.shadow
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Process messages from the host
    pub fn poll(&mut self) -> Vec<LobbyEvent> {
        let mut events = Vec::new();

        for msg in self.link.poll() {
            match msg {
                Message::Welcome {
                    connection,
                    session,
                } => {
                    self.shadow.apply_welcome(connection, session);
                    events.push(LobbyEvent::Welcomed { connection });
                    self.send_raw(Message::PullRoster);
                }
                Message::RosterSummary { sessions } => {
                    self.reconciling = true;
                    for pull in self.shadow.apply_roster(sessions) {
                        self.send_raw(pull);
                    }
                }
                Message::SlotPulled { slot } => {
                    if let Some(next) = self.shadow.apply_pulled(slot) {
                        self.send_raw(next);
                    }
                }
                Message::SlotPullFailed {
                    session,
                    slot,
                    reason,
                } => {
                    self.shadow.apply_pull_failed(session, slot, &reason);
                }
                Message::CommandRejected { command, reason } => {
                    debug!(?command, error = %reason, "host rejected command");
                    if let Some(session) = self.shadow.local_session() {
                        self.shadow.revert_optimistic(session.id);
                    }
                    events.push(LobbyEvent::CommandRejected {
                        connection: None,
                        command,
                        reason,
                    });
                }
                Message::SessionSnapshot { session, all_ready } => {
                    let before = self.shadow.all_ready();
                    self.shadow.apply_snapshot(session, all_ready);
                    if self.shadow.all_ready() != before {
                        events.push(LobbyEvent::AllReadyChanged(all_ready));
                    }
                }
                Message::SessionLeft { session, all_ready } => {
                    let before = self.shadow.all_ready();
                    self.shadow.apply_left(session, all_ready);
                    events.push(LobbyEvent::SessionLeft { session });
                    if self.shadow.all_ready() != before {
                        events.push(LobbyEvent::AllReadyChanged(all_ready));
                    }
                }
                Message::GameStarting { sessions } => {
                    info!(sessions = sessions.len(), "game starting");
                    self.shadow.apply_game_starting(sessions.clone());
                    events.push(LobbyEvent::GameStarting { sessions });
                }
                Message::Ping => self.send_raw(Message::Pong),
                Message::Pong => {}
                other => {
                    warn!(kind = other.kind(), "unexpected message from host");
                }
            }

            if self.reconciling && self.shadow.is_reconciled() {
                self.reconciling = false;
                events.push(LobbyEvent::Reconciled);
            }
        }

        if !self.disconnected && !self.link.is_connected() {
            self.disconnected = true;
            events.push(LobbyEvent::Disconnected);
        }

        events
    }

    /// Send a command, mirroring field edits locally until the host answers
    pub fn send(&mut self, command: Command) -> Result<(), TransportError> {
        if let Some(session) = self.shadow.local_session() {
            self.shadow.optimistic(session.id, &command);
        }
        self.link.send(Message::Command(command))
    }

    pub fn add_local_player(&mut self) -> Result<(), TransportError> {
        self.send(Command::AddLocalPlayer)
    }

    pub fn remove_last_local_player(&mut self) -> Result<(), TransportError> {
        self.send(Command::RemoveLastLocalPlayer)
    }

    pub fn set_ready(&mut self, slot: u32, ready: bool) -> Result<(), TransportError> {
        self.send(Command::SetReady { slot, ready })
    }

    pub fn rename(&mut self, slot: u32, name: &str) -> Result<(), TransportError> {
        self.send(Command::Rename {
            slot,
            name: name.to_string(),
        })
    }

    pub fn set_session_ready(&mut self, ready: bool) -> Result<(), TransportError> {
        self.send(Command::SetSessionReady { ready })
    }

    pub fn kick(&mut self, target: ConnectionId) -> Result<(), TransportError> {
        self.send(Command::Kick { target })
    }

    /// Send every outstanding slot pull again
    pub fn reissue_pulls(&mut self) -> Result<(), TransportError> {
        for pull in self.shadow.reissue_pulls() {
            self.link.send(pull)?;
        }
        Ok(())
    }

    fn send_raw(&mut self, message: Message) {
        if let Err(e) = self.link.send(message) {
            warn!(error = %e, "failed to send to host");
        }
    }
}
