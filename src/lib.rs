//! hubrpc: remote procedure call, service discovery and topic pub/sub over
//! one length-prefixed JSON wire protocol.
//!
//! This crate is a facade over the workspace members:
//!
//! - [`common`] - message model, frame codec, TCP transport and dispatcher
//! - [`client`] - request correlation, RPC calling, discovery and topic clients
//! - [`server`] - RPC router, registry hub and topic hub

pub use hubrpc_client as client;
pub use hubrpc_common as common;
pub use hubrpc_server as server;
