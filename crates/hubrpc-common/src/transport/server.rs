use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::protocol::error::{HubError, Result};
use crate::transport::conn::{self, ConnHooks};

/// TCP listener that runs the framed-message loop for every connection.
///
/// Binding and serving are split so callers can bind to port 0 and learn the
/// chosen port through [`TcpServer::local_addr`] before serving.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Bind to `addr` (e.g. `"0.0.0.0:8080"`).
    pub async fn bind(addr: &str) -> Result<TcpServer> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HubError::Connection(format!("failed to bind to {addr}: {e}")))?;
        Ok(TcpServer { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, wiring `hooks` into each one.
    pub async fn serve(self, hooks: ConnHooks) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| HubError::Connection(format!("failed to accept connection: {e}")))?;
            tracing::info!(%peer, "connection established");

            let conn = conn::spawn_io(stream, peer, hooks.clone());
            if let Some(on_connect) = &hooks.on_connect {
                on_connect(&conn);
            }
        }
    }
}
