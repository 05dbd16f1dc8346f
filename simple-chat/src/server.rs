//! TCP accept loop and per-connection tasks for the relay.
//!
//! The listener knows nothing about chat. It hands every connection event to
//! a [`ConnectionHandler`]:
//!
//! - `on_connected` when a socket is accepted,
//! - `on_message` for every inbound line,
//! - `on_error` when reading or writing fails,
//! - `on_disconnected` exactly once when the connection task ends.
//!
//! Each connection runs in its own task. Outbound lines travel through a
//! bounded channel owned by that task, so handlers can send from synchronous
//! code without waiting on the socket. A peer that stops reading fills its
//! outbox and is dropped instead of holding lines for it forever.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{
        Notify, mpsc,
        mpsc::error::TrySendError,
        oneshot,
    },
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    protocol::{read_frame, write_line},
    session::{Session, SessionId},
};

/// Lines a connection may have queued before it counts as too slow.
pub const OUTBOX_CAPACITY: usize = 128;

/// How long a closing connection may spend delivering what was queued.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    Close,
}

/// Whether a connection should keep reading after a handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Cloneable send side of one live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: SessionId,
    peer: SocketAddr,
    outbox: mpsc::Sender<Outbound>,
    evicted: Arc<Notify>,
}

impl Connection {
    pub fn new(id: SessionId, peer: SocketAddr, outbox: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            peer,
            outbox,
            evicted: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a line for delivery without waiting.
    ///
    /// Fails once the connection task has ended. A full outbox means the peer
    /// stopped reading: the connection is dropped and the line is lost.
    pub fn send(&self, line: impl Into<String>) -> Result<(), TransportError> {
        match self.outbox.try_send(Outbound::Line(line.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    peer = %self.peer,
                    session = self.id,
                    "outbox full, dropping slow connection"
                );
                self.evicted.notify_one();
                Err(TransportError::Lagging)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Asks the connection task to flush pending lines and hang up.
    /// Closing a connection that is already gone does nothing.
    pub fn close(&self) {
        if let Err(TrySendError::Full(_)) = self.outbox.try_send(Outbound::Close) {
            self.evicted.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connected(&self, connection: &Connection);

    fn on_message(&self, session: &mut Session, connection: &Connection, line: &str) -> Flow;

    fn on_disconnected(&self, session: &Session);

    fn on_error(&self, session: &Session, error: &io::Error);
}

/// A running accept loop. Dropping the handle does not stop it; call
/// [`Listener::shutdown`].
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Binds `addr` and starts accepting connections for `handler`.
    pub async fn bind<H>(
        addr: &str,
        handler: Arc<H>,
        ids: Arc<AtomicU64>,
    ) -> Result<Self, TransportError>
    where
        H: ConnectionHandler,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_until(listener, handler, ids, async move {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits until the listening socket is closed.
    /// Connections that were already accepted keep running.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = self.task.await {
            warn!(?error, "accept loop ended abnormally");
        }
    }
}

async fn run_until<H, F>(listener: TcpListener, handler: Arc<H>, ids: Arc<AtomicU64>, shutdown: F)
where
    H: ConnectionHandler,
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = &mut shutdown => break,
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &handler, &ids);
            }
        }
    }

    debug!("accept loop stopped");
}

fn handle_accept_result<H>(
    result: io::Result<(TcpStream, SocketAddr)>,
    handler: &Arc<H>,
    ids: &AtomicU64,
) where
    H: ConnectionHandler,
{
    match result {
        Ok((stream, peer)) => {
            let id = ids.fetch_add(1, Ordering::Relaxed);
            spawn_connection(stream, peer, id, handler);
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection<H>(stream: TcpStream, peer: SocketAddr, id: SessionId, handler: &Arc<H>)
where
    H: ConnectionHandler,
{
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        serve_connection(stream, peer, id, handler).await;
    });
}

async fn serve_connection<H>(stream: TcpStream, peer: SocketAddr, id: SessionId, handler: Arc<H>)
where
    H: ConnectionHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let (outbox, mut inbox) = mpsc::channel(OUTBOX_CAPACITY);

    let connection = Connection::new(id, peer, outbox);
    let evicted = Arc::clone(&connection.evicted);
    let mut session = Session::new(id, peer);
    handler.on_connected(&connection);

    let mut dropped = false;
    loop {
        select! {
            _ = evicted.notified() => {
                dropped = true;
                break;
            }
            inbound = read_frame(&mut lines) => match inbound {
                Ok(Some(line)) => {
                    if handler.on_message(&mut session, &connection, &line) == Flow::Close {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    handler.on_error(&session, &err);
                    break;
                }
            },
            outbound = inbox.recv() => match outbound {
                Some(Outbound::Line(line)) => {
                    // A peer that never drains its socket parks this write;
                    // eviction has to be able to cut it short.
                    let written = select! {
                        written = write_line(&mut writer, &line) => written,
                        _ = evicted.notified() => {
                            dropped = true;
                            break;
                        }
                    };
                    if let Err(err) = written {
                        handler.on_error(&session, &err);
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            },
        }
    }

    session.terminate();
    inbox.close();
    if dropped {
        debug!(%peer, session = id, "discarding lines queued for a slow connection");
    } else if timeout(FLUSH_TIMEOUT, flush_pending(&mut inbox, &mut writer))
        .await
        .is_err()
    {
        debug!(%peer, session = id, "gave up delivering queued lines");
    }
    if let Err(error) = writer.shutdown().await {
        debug!(%peer, ?error, "connection already gone at shutdown");
    }

    handler.on_disconnected(&session);
    info!(%peer, session = id, "connection closed");
}

/// Best-effort delivery of whatever was queued before the close, such as a
/// protocol error reply.
async fn flush_pending<W>(inbox: &mut mpsc::Receiver<Outbound>, writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    while let Ok(outbound) = inbox.try_recv() {
        let Outbound::Line(line) = outbound else {
            continue;
        };
        if let Err(error) = write_line(writer, &line).await {
            debug!(?error, "dropping queued lines for closed connection");
            return;
        }
    }
}
