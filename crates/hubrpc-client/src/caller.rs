//! The RPC invocation surface.
//!
//! Builds `RpcRequest` messages, hands them to the shared [`Requestor`] and
//! converts each `RpcResponse` into its `result` value, surfacing non-ok
//! response codes as errors.

use std::sync::Arc;

use serde_json::Value;

use hubrpc_common::protocol::fields::RCode;
use hubrpc_common::protocol::messages::{Body, Message, RpcRequest};
use hubrpc_common::{Connection, HubError, Result};

use crate::requestor::{PendingReply, Requestor};

/// An RPC result that has been requested but not yet delivered.
pub struct RpcReply {
    inner: PendingReply,
}

impl RpcReply {
    pub async fn wait(self) -> Result<Value> {
        extract(self.inner.wait().await?)
    }
}

/// Client-side method invocation in the three requestor modes.
///
/// Multiple callers may share one requestor; there is no per-call state here.
pub struct RpcCaller {
    requestor: Arc<Requestor>,
}

impl RpcCaller {
    pub fn new(requestor: Arc<Requestor>) -> RpcCaller {
        RpcCaller { requestor }
    }

    /// Invoke `method` and wait for its result.
    pub async fn call(&self, conn: &Connection, method: &str, params: Value) -> Result<Value> {
        let reply = self.requestor.send_wait(conn, request(method, params)).await?;
        extract(reply)
    }

    /// Invoke `method` and return a future for its result.
    pub fn call_pending(&self, conn: &Connection, method: &str, params: Value) -> Result<RpcReply> {
        let inner = self.requestor.send_pending(conn, request(method, params))?;
        Ok(RpcReply { inner })
    }

    /// Invoke `method`; `callback` receives the result on the delivering task.
    pub fn call_with(
        &self,
        conn: &Connection,
        method: &str,
        params: Value,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        self.requestor
            .send_callback(conn, request(method, params), move |reply| {
                callback(extract(reply));
            })
    }
}

fn request(method: &str, params: Value) -> Message {
    Message::request(Body::RpcRequest(RpcRequest {
        method: method.to_string(),
        parameters: params,
    }))
}

fn extract(reply: Message) -> Result<Value> {
    match reply.body {
        Body::RpcResponse(rsp) if rsp.rcode == RCode::Ok => Ok(rsp.result),
        Body::RpcResponse(rsp) => Err(HubError::Rejected(rsp.rcode)),
        _ => Err(HubError::InvalidMessage("expected an rpc response")),
    }
}
