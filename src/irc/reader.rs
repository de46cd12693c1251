/// Per-connection read loop. Turns inbound lines into commands on the
/// dispatcher queue and answers argument-count errors itself.
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::client::ClientId;
use super::command::{Command, CommandError};
use super::queue::{Envelope, Event, Queue};
use super::reply::Reply;
use super::socket::{Lines, Socket};

/// Disconnect reason synthesized when the stream ends.
pub const CONNECTION_CLOSED: &str = "connection closed";

pub fn spawn(
    id: ClientId,
    lines: Lines,
    socket: Socket,
    queue: Queue,
    server_name: String,
    recipient: watch::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(read_loop(id, lines, socket, queue, server_name, recipient))
}

async fn read_loop(
    id: ClientId,
    mut lines: Lines,
    socket: Socket,
    queue: Queue,
    server_name: String,
    recipient: watch::Receiver<String>,
) {
    while let Some(line) = lines.next_line().await {
        match Command::parse(&line) {
            Ok(command) => {
                if queue.send(Envelope::client(id, Event::Command(command))).is_err() {
                    // Dispatcher is gone; nothing left to report to.
                    return;
                }
            }
            // Answered here so the reply goes out even while the dispatcher
            // is busy.
            Err(CommandError::NotEnoughArgs { command }) => {
                let to = recipient.borrow().clone();
                socket.write(Reply::NeedMoreParams { command }.format(&server_name, &to));
            }
            Err(e) => trace!(%id, "dropped line: {e}"),
        }
    }

    debug!(%id, "read loop finished");
    let _ = queue.send(Envelope::client(
        id,
        Event::Disconnect(CONNECTION_CLOSED.into()),
    ));
}
