//! Typed message bodies and the message envelope.
//!
//! Bodies are plain serde structs; the envelope pairs a body with the request
//! id that travels in the frame header. [`Body::from_json`] is the single
//! place the `MType` to concrete-body mapping lives.

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::fields::{MType, RCode, ServiceOp, TopicOp};

/// A provider endpoint as it appears in service bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub port: u16,
}

impl Host {
    pub fn new(ip: impl Into<String>, port: u16) -> Host {
        Host { ip: ip.into(), port }
    }

    /// `ip:port` form accepted by the TCP transport.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub rcode: RCode,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRequest {
    pub topic_key: String,
    pub optype: TopicOp,
    /// Payload, present exactly when `optype` is [`TopicOp::Publish`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResponse {
    pub rcode: RCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub method: String,
    pub optype: ServiceOp,
    /// Provider endpoint, required for every optype except discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Host>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub rcode: RCode,
    pub optype: ServiceOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Vec<Host>>,
}

/// The six message bodies, tagged by [`MType`] on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    RpcRequest(RpcRequest),
    RpcResponse(RpcResponse),
    TopicRequest(TopicRequest),
    TopicResponse(TopicResponse),
    ServiceRequest(ServiceRequest),
    ServiceResponse(ServiceResponse),
}

impl Body {
    pub fn mtype(&self) -> MType {
        match self {
            Body::RpcRequest(_) => MType::RpcRequest,
            Body::RpcResponse(_) => MType::RpcResponse,
            Body::TopicRequest(_) => MType::TopicRequest,
            Body::TopicResponse(_) => MType::TopicResponse,
            Body::ServiceRequest(_) => MType::ServiceRequest,
            Body::ServiceResponse(_) => MType::ServiceResponse,
        }
    }

    /// JSON-encode this body for the frame payload.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Body::RpcRequest(b) => serde_json::to_vec(b),
            Body::RpcResponse(b) => serde_json::to_vec(b),
            Body::TopicRequest(b) => serde_json::to_vec(b),
            Body::TopicResponse(b) => serde_json::to_vec(b),
            Body::ServiceRequest(b) => serde_json::to_vec(b),
            Body::ServiceResponse(b) => serde_json::to_vec(b),
        }
    }

    /// Build the concrete body for `mtype` from a raw JSON payload.
    pub fn from_json(mtype: MType, raw: &[u8]) -> serde_json::Result<Body> {
        Ok(match mtype {
            MType::RpcRequest => Body::RpcRequest(serde_json::from_slice(raw)?),
            MType::RpcResponse => Body::RpcResponse(serde_json::from_slice(raw)?),
            MType::TopicRequest => Body::TopicRequest(serde_json::from_slice(raw)?),
            MType::TopicResponse => Body::TopicResponse(serde_json::from_slice(raw)?),
            MType::ServiceRequest => Body::ServiceRequest(serde_json::from_slice(raw)?),
            MType::ServiceResponse => Body::ServiceResponse(serde_json::from_slice(raw)?),
        })
    }

    /// Validate the rules serde cannot express: conditional field presence
    /// and JSON shapes that depend on sibling fields.
    pub fn check(&self) -> std::result::Result<(), &'static str> {
        match self {
            Body::RpcRequest(b) => {
                if !b.parameters.is_object() {
                    return Err("rpc parameters must be a JSON object");
                }
            }
            Body::TopicRequest(b) => {
                if b.optype == TopicOp::Publish && b.topic_msg.is_none() {
                    return Err("publish request carries no payload");
                }
            }
            Body::ServiceRequest(b) => {
                if b.optype != ServiceOp::Discovery && b.host.is_none() {
                    return Err("service request carries no host");
                }
            }
            Body::ServiceResponse(b) => {
                if b.optype == ServiceOp::Discovery
                    && b.rcode == RCode::Ok
                    && (b.method.is_none() || b.host.is_none())
                {
                    return Err("discovery response misses method or hosts");
                }
            }
            Body::RpcResponse(_) | Body::TopicResponse(_) => {}
        }
        Ok(())
    }
}

/// One message on the wire: a process-unique request id plus a typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub body: Body,
}

impl Message {
    /// Wrap a body with a freshly generated request id.
    pub fn request(body: Body) -> Message {
        Message { id: request_id(), body }
    }

    /// Wrap a body echoing the id of the request it answers.
    pub fn reply(to: &str, body: Body) -> Message {
        Message { id: to.to_string(), body }
    }

    pub fn mtype(&self) -> MType {
        self.body.mtype()
    }

    pub fn check(&self) -> std::result::Result<(), &'static str> {
        if self.id.is_empty() {
            return Err("empty request id");
        }
        self.body.check()
    }
}

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique request id.
///
/// Sixteen bytes rendered as dash-separated hex: eight random bytes followed
/// by an eight-byte monotonic counter, so ids stay unique both across
/// restarts and within one runtime.
pub fn request_id() -> String {
    let noise: [u8; 8] = rand::random();
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed).to_be_bytes();

    let mut id = String::with_capacity(36);
    for (i, byte) in noise.iter().enumerate() {
        if i == 4 || i == 6 {
            id.push('-');
        }
        let _ = write!(id, "{byte:02x}");
    }
    id.push('-');
    for (i, byte) in seq.iter().enumerate() {
        if i == 2 {
            id.push('-');
        }
        let _ = write!(id, "{byte:02x}");
    }
    id
}
