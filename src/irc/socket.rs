/// Socket abstraction: a cloneable write/close surface plus the line source
/// the read loop consumes.
///
/// Writes never block: they go onto an unbounded queue drained by a writer
/// task. Closing is idempotent and is also how the read loop is stopped: once
/// the close flag flips, [`Lines::next_line`] returns `None`.
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::codec::{CodecError, LineCodec};
use super::message::Message;

/// Type-erased read half of a peer connection.
pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// Write side of one peer connection. Clones share the same queue and the
/// same close flag.
#[derive(Debug, Clone)]
pub struct Socket {
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<watch::Sender<bool>>,
}

impl Socket {
    /// Split `stream`, spawn its writer task and return both halves.
    pub fn open<S>(stream: S) -> (Socket, Lines)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (socket, rx) = Socket::detached();

        tokio::spawn(write_loop(
            FramedWrite::new(write_half, LineCodec::default()),
            rx,
            socket.closed.subscribe(),
        ));

        let lines = Lines {
            framed: FramedRead::new(Box::new(read_half), LineCodec::default()),
            closed: socket.closed.subscribe(),
        };
        (socket, lines)
    }

    /// A socket with no stream behind it; written messages arrive on the
    /// returned receiver.
    pub fn detached() -> (Socket, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let socket = Socket {
            tx,
            closed: Arc::new(closed),
        };
        (socket, rx)
    }

    /// Queue a message. Dropped silently once the socket is closed.
    pub fn write(&self, msg: Message) {
        if self.is_closed() {
            return;
        }
        let _ = self.tx.send(msg);
    }

    /// Close the socket. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// How long a closed socket may spend delivering what was queued before it.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

async fn write_loop<W>(
    mut sink: FramedWrite<W, LineCodec>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = closed_signal(&mut closed) => break,
        };
        let Some(msg) = msg else { break };
        // A peer that stops reading must not keep a closed socket alive.
        tokio::select! {
            sent = sink.send(msg) => {
                if let Err(e) = sent {
                    warn!("write failed: {e}");
                    return;
                }
            }
            _ = closed_signal(&mut closed) => break,
        }
    }

    let farewell = async {
        while let Ok(msg) = rx.try_recv() {
            sink.feed(msg).await?;
        }
        sink.flush().await?;
        sink.get_mut().shutdown().await?;
        Ok::<_, CodecError>(())
    };
    match tokio::time::timeout(CLOSE_GRACE, farewell).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("final flush failed: {e}"),
        Err(_) => debug!("peer not reading, dropped queued output"),
    }
}

/// Resolves once the socket is closed or every handle to it is gone.
async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Blocking line source for one peer connection.
pub struct Lines {
    framed: FramedRead<Reader, LineCodec>,
    closed: watch::Receiver<bool>,
}

impl Lines {
    /// Next line from the peer, or `None` once the peer hangs up, the read
    /// fails, or the socket is closed locally.
    pub async fn next_line(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = closed_signal(&mut self.closed) => None,
            frame = self.framed.next() => match frame {
                Some(Ok(line)) => Some(line),
                Some(Err(e)) => {
                    debug!("read failed: {e}");
                    None
                }
                None => None,
            },
        }
    }
}
