//! One framed TCP connection
//!
//! A peer owns two worker threads. The writer drains the outbox onto the
//! socket, the reader decodes frames into the inbox. Closing shuts the socket
//! down, which ends both.

use super::protocol::Message;
use super::{ConnectionId, TransportError};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Peer {
    /// Id the owning side knows this connection by
    pub connection: ConnectionId,
    /// Remote address
    pub addr: SocketAddr,
    outbox: Sender<Message>,
    inbox: Receiver<Message>,
    socket: TcpStream,
    open: bool,
}

impl Peer {
    /// Wrap an established stream and start its worker threads
    pub fn new(stream: TcpStream, connection: ConnectionId) -> Result<Self, TransportError> {
        let addr = stream.peer_addr()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let (outbox, outgoing) = channel();
        let (incoming, inbox) = channel();
        spawn_writer(connection, stream.try_clone()?, outgoing);
        spawn_reader(connection, stream.try_clone()?, incoming);

        Ok(Peer {
            connection,
            addr,
            outbox,
            inbox,
            socket: stream,
            open: true,
        })
    }

    pub fn connect(addr: SocketAddr, connection: ConnectionId) -> Result<Self, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        Self::new(stream, connection)
    }

    /// Queue a message for the writer
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.outbox.send(message).map_err(|_| TransportError::Closed)
    }

    /// Everything decoded since the last call.
    ///
    /// Once the reader has stopped and its backlog is drained the peer
    /// reports itself closed.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    break;
                }
            }
        }
        messages
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn close(&mut self) {
        self.open = false;
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_writer(connection: ConnectionId, mut stream: TcpStream, outgoing: Receiver<Message>) {
    thread::spawn(move || {
        for message in outgoing {
            if let Err(e) = message.write_to(&mut stream) {
                debug!(%connection, error = %e, "writer stopped");
                break;
            }
        }
    });
}

fn spawn_reader(connection: ConnectionId, mut stream: TcpStream, incoming: Sender<Message>) {
    thread::spawn(move || loop {
        let message = match Message::read_from(&mut stream) {
            Ok(message) => message,
            Err(TransportError::Io(e)) => {
                debug!(%connection, error = %e, "reader stopped");
                break;
            }
            Err(e) => {
                warn!(%connection, error = %e, "dropping peer after bad frame");
                break;
            }
        };
        if incoming.send(message).is_err() {
            break;
        }
    });
}
