//! Connection handles and the per-connection I/O tasks.
//!
//! Each accepted or dialed TCP stream is split into a reader task and a
//! writer task. The writer drains an unbounded channel so [`Connection::send`]
//! never blocks the caller; the reader accumulates bytes in a [`BytesMut`]
//! buffer and hands every decoded message to the registered hook. Handlers
//! therefore run on the reader task and must never wait for a response that
//! the same task would deliver.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::protocol::error::{HubError, Result};
use crate::protocol::messages::Message;
use crate::transport::codec;

/// Stable identity of a connection for the lifetime of the process.
///
/// Maps that need to key on "which connection" use this id rather than the
/// peer address, which can repeat across reconnects.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

struct Inner {
    id: ConnId,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
    alive: AtomicBool,
}

/// Cheaply cloneable handle to one TCP connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn connected(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Encode `msg` and queue it for the writer task.
    ///
    /// Frames leave the socket in the order they were queued here.
    pub fn send(&self, msg: &Message) -> Result<()> {
        if !self.connected() {
            return Err(HubError::Disconnected);
        }
        let frame = codec::encode(msg)?;
        self.inner
            .tx
            .send(Outbound::Frame(frame))
            .map_err(|_| HubError::Disconnected)
    }

    /// Stop writing and close our end of the connection.
    pub fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::Release);
        let _ = self.inner.tx.send(Outbound::Shutdown);
    }

    fn mark_closed(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("alive", &self.connected())
            .finish()
    }
}

pub type MessageHook = Arc<dyn Fn(&Connection, Message) + Send + Sync>;
pub type ConnHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Callbacks a client or server registers against its connections.
#[derive(Clone)]
pub struct ConnHooks {
    pub(crate) on_message: MessageHook,
    pub(crate) on_close: ConnHook,
    pub(crate) on_connect: Option<ConnHook>,
}

impl ConnHooks {
    pub fn new(on_message: impl Fn(&Connection, Message) + Send + Sync + 'static) -> ConnHooks {
        ConnHooks {
            on_message: Arc::new(on_message),
            on_close: Arc::new(|_| {}),
            on_connect: None,
        }
    }

    /// Invoked once, after the reader task exits for any reason.
    pub fn on_close(mut self, hook: impl Fn(&Connection) + Send + Sync + 'static) -> ConnHooks {
        self.on_close = Arc::new(hook);
        self
    }

    /// Invoked when a connection is established.
    pub fn on_connect(mut self, hook: impl Fn(&Connection) + Send + Sync + 'static) -> ConnHooks {
        self.on_connect = Some(Arc::new(hook));
        self
    }
}

/// Split `stream` into reader and writer tasks and return the send handle.
pub(crate) fn spawn_io(stream: TcpStream, peer: SocketAddr, hooks: ConnHooks) -> Connection {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Connection {
        inner: Arc::new(Inner {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            tx,
            alive: AtomicBool::new(true),
        }),
    };

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, rx));
    tokio::spawn(read_loop(read_half, conn.clone(), hooks));

    conn
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(err) = writer.write_all(&frame).await {
                    tracing::debug!(%err, "write failed, stopping writer");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(mut reader: OwnedReadHalf, conn: Connection, hooks: ConnHooks) {
    let mut buf = BytesMut::with_capacity(4096);

    'io: loop {
        while codec::can_decode(&buf) {
            match codec::decode(&mut buf) {
                Ok(msg) => (hooks.on_message)(&conn, msg),
                Err(err) => {
                    tracing::error!(conn = conn.id(), %err, "undecodable frame, closing connection");
                    conn.shutdown();
                    break 'io;
                }
            }
        }

        if buf.len() > codec::MAX_BUFFERED {
            tracing::error!(
                conn = conn.id(),
                buffered = buf.len(),
                "inbound buffer exceeded the frame limit, closing connection"
            );
            conn.shutdown();
            break;
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!(conn = conn.id(), peer = %conn.peer_addr(), "connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(conn = conn.id(), %err, "read failed, closing connection");
                break;
            }
        }
    }

    conn.mark_closed();
    (hooks.on_close)(&conn);
}
