//! hubrpc Common Types and Transport
//!
//! This crate provides the protocol definitions, wire framing and TCP
//! transport layer shared by every hubrpc component.
//!
//! # Overview
//!
//! hubrpc carries three cooperating facilities on a single wire protocol:
//! remote procedure calls, a service registry with push notifications, and
//! topic-based publish/subscribe. This crate contains everything those
//! facilities have in common:
//!
//! - **Protocol layer**: the six message variants, response codes, operation
//!   enums and per-variant validation
//! - **Transport layer**: length-prefixed framing over TCP with
//!   connect/close/message hooks
//! - **Dispatch layer**: routing of decoded messages to per-type handlers
//!
//! # Wire format
//!
//! Every frame is laid out as big-endian 32-bit fields followed by raw bytes:
//!
//! ```text
//! | total_len | mtype | id_len | id bytes | JSON body |
//! ```
//!
//! where `total_len` covers everything after itself. See [`transport::codec`].

pub mod dispatcher;
pub mod protocol;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use protocol::error::{HubError, Result};
pub use protocol::fields::{MType, RCode, ServiceOp, TopicOp};
pub use protocol::messages::{Body, Host, Message};
pub use transport::conn::{ConnHooks, ConnId, Connection};
pub use transport::{TcpClient, TcpServer};
