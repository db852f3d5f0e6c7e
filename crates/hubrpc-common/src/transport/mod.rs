//! TCP transport: length-prefixed framing plus connection handling.
//!
//! The transport knows nothing about RPC semantics. It turns a byte stream
//! into [`crate::protocol::messages::Message`] values (and back) and hands
//! them to hooks registered by the owning client or server. Protocol
//! violations (an undecodable frame, an unknown message type, or more than
//! [`codec::MAX_BUFFERED`] bytes that never form a frame) tear the
//! offending connection down.

pub mod client;
pub mod codec;
pub mod conn;
pub mod server;

pub use client::TcpClient;
pub use server::TcpServer;
