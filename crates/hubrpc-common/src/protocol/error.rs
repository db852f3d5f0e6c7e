use thiserror::Error;

use crate::protocol::fields::RCode;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection closed")]
    Disconnected,

    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("request rejected: {}", .0.reason())]
    Rejected(RCode),
}

impl HubError {
    /// The response code carried by a peer rejection, if that is what this is.
    pub fn rejection(&self) -> Option<RCode> {
        match self {
            HubError::Rejected(rcode) => Some(*rcode),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
