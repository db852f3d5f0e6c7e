//! Closed enumerations that appear on the wire.
//!
//! The integer assignments here are part of the protocol and must never be
//! renumbered. `MType` travels in the frame header as a raw `u32`; the other
//! enums travel inside JSON bodies and bridge through `i32` via serde.

use serde::{Deserialize, Serialize};

/// Wire identifier of each message variant, carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MType {
    RpcRequest = 0,
    RpcResponse = 1,
    TopicRequest = 2,
    TopicResponse = 3,
    ServiceRequest = 4,
    ServiceResponse = 5,
}

impl MType {
    pub fn from_wire(value: u32) -> Option<MType> {
        match value {
            0 => Some(MType::RpcRequest),
            1 => Some(MType::RpcResponse),
            2 => Some(MType::TopicRequest),
            3 => Some(MType::TopicResponse),
            4 => Some(MType::ServiceRequest),
            5 => Some(MType::ServiceResponse),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Response status code carried by every response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum RCode {
    Ok = 0,
    ParseFailed = 1,
    BadMessageType = 2,
    InvalidMessage = 3,
    Disconnected = 4,
    InvalidParams = 5,
    ServiceNotFound = 6,
    InvalidOptype = 7,
    TopicNotFound = 8,
    InternalError = 9,
}

impl RCode {
    /// Human-readable reason for logs and error messages.
    pub fn reason(self) -> &'static str {
        match self {
            RCode::Ok => "ok",
            RCode::ParseFailed => "message parsing failed",
            RCode::BadMessageType => "bad message type",
            RCode::InvalidMessage => "invalid message",
            RCode::Disconnected => "connection closed",
            RCode::InvalidParams => "invalid rpc parameters",
            RCode::ServiceNotFound => "service not found",
            RCode::InvalidOptype => "invalid operation type",
            RCode::TopicNotFound => "topic not found",
            RCode::InternalError => "internal error",
        }
    }
}

impl From<RCode> for i32 {
    fn from(code: RCode) -> i32 {
        code as i32
    }
}

impl TryFrom<i32> for RCode {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<RCode, String> {
        match value {
            0 => Ok(RCode::Ok),
            1 => Ok(RCode::ParseFailed),
            2 => Ok(RCode::BadMessageType),
            3 => Ok(RCode::InvalidMessage),
            4 => Ok(RCode::Disconnected),
            5 => Ok(RCode::InvalidParams),
            6 => Ok(RCode::ServiceNotFound),
            7 => Ok(RCode::InvalidOptype),
            8 => Ok(RCode::TopicNotFound),
            9 => Ok(RCode::InternalError),
            other => Err(format!("unknown response code {other}")),
        }
    }
}

/// Topic operation selector.
///
/// Unknown wire values decode to [`TopicOp::Unknown`] so the hub can answer
/// them with an invalid-optype response instead of failing the whole frame.
/// `Unknown` is never produced by the client API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum TopicOp {
    Create,
    Remove,
    Subscribe,
    Cancel,
    Publish,
    Unknown,
}

impl From<i32> for TopicOp {
    fn from(value: i32) -> TopicOp {
        match value {
            0 => TopicOp::Create,
            1 => TopicOp::Remove,
            2 => TopicOp::Subscribe,
            3 => TopicOp::Cancel,
            4 => TopicOp::Publish,
            _ => TopicOp::Unknown,
        }
    }
}

impl From<TopicOp> for i32 {
    fn from(op: TopicOp) -> i32 {
        match op {
            TopicOp::Create => 0,
            TopicOp::Remove => 1,
            TopicOp::Subscribe => 2,
            TopicOp::Cancel => 3,
            TopicOp::Publish => 4,
            TopicOp::Unknown => -1,
        }
    }
}

/// Service registry operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ServiceOp {
    Registry,
    Discovery,
    Online,
    Offline,
    Unknown,
}

impl From<i32> for ServiceOp {
    fn from(value: i32) -> ServiceOp {
        match value {
            0 => ServiceOp::Registry,
            1 => ServiceOp::Discovery,
            2 => ServiceOp::Online,
            3 => ServiceOp::Offline,
            _ => ServiceOp::Unknown,
        }
    }
}

impl From<ServiceOp> for i32 {
    fn from(op: ServiceOp) -> i32 {
        match op {
            ServiceOp::Registry => 0,
            ServiceOp::Discovery => 1,
            ServiceOp::Online => 2,
            ServiceOp::Offline => 3,
            ServiceOp::Unknown => 4,
        }
    }
}
