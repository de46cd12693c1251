/// Dispatcher queue, the only path by which anything reaches client state.
///
/// The accept loop, every read loop and every timer are producers; the
/// dispatcher task is the single consumer.
use std::net::SocketAddr;

use tokio::sync::mpsc;

use super::client::ClientId;
use super::command::Command;
use super::socket::{Lines, Socket};
use super::timer::Fired;

/// Unbounded so that a timer callback's send can never block.
pub type Queue = mpsc::UnboundedSender<Envelope>;

pub enum Envelope {
    /// A freshly accepted connection, to be turned into a client.
    Connect {
        socket: Socket,
        lines: Lines,
        addr: SocketAddr,
    },
    /// Something happened on behalf of an existing client.
    Client { id: ClientId, event: Event },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A command parsed from the peer's socket.
    Command(Command),
    /// One of the client's deferred timers went off.
    Timer(Fired),
    /// The client must be torn down with this reason.
    Disconnect(String),
}

impl Envelope {
    pub fn client(id: ClientId, event: Event) -> Self {
        Envelope::Client { id, event }
    }
}
