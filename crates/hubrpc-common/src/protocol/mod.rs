//! hubrpc Protocol Definitions
//!
//! This module defines the message model shared by clients and hubs: the
//! closed enums that appear on the wire, the six typed message bodies, and
//! the error type used throughout the system.
//!
//! # Message anatomy
//!
//! Every message carries a request id (unique within the producing process),
//! a message type drawn from [`fields::MType`], and a JSON body whose schema
//! depends on that type. Responses additionally carry a response code from
//! [`fields::RCode`].
//!
//! # Example
//!
//! ```
//! use hubrpc_common::protocol::messages::{Body, Message, RpcRequest};
//! use serde_json::json;
//!
//! let req = Message::request(Body::RpcRequest(RpcRequest {
//!     method: "Add".to_string(),
//!     parameters: json!({"num1": 10, "num2": 20}),
//! }));
//! assert!(req.check().is_ok());
//! ```

pub mod error;
pub mod fields;
pub mod messages;


pub use error::{HubError, Result};
pub use fields::{MType, RCode, ServiceOp, TopicOp};
pub use messages::{Body, Host, Message};
