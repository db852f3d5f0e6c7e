use tokio::net::TcpStream;

use crate::protocol::error::{HubError, Result};
use crate::protocol::messages::Message;
use crate::transport::conn::{self, ConnHooks, Connection};

/// TCP client end of the framed protocol.
///
/// Construction completes only once the connection is established, so a
/// freshly built client is always ready to send.
#[derive(Debug)]
pub struct TcpClient {
    conn: Connection,
}

impl TcpClient {
    /// Dial `addr` and start the connection's I/O tasks.
    pub async fn connect(addr: &str, hooks: ConnHooks) -> Result<TcpClient> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| HubError::Connection(format!("failed to connect to {addr}: {e}")))?;
        let peer = stream.peer_addr()?;

        let on_connect = hooks.on_connect.clone();
        let conn = conn::spawn_io(stream, peer, hooks);
        tracing::debug!(conn = conn.id(), %peer, "connected");
        if let Some(on_connect) = on_connect {
            on_connect(&conn);
        }
        Ok(TcpClient { conn })
    }

    /// Handle to the underlying connection, shareable across tasks.
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }

    pub fn connected(&self) -> bool {
        self.conn.connected()
    }

    pub fn send(&self, msg: &Message) -> Result<()> {
        self.conn.send(msg)
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}
