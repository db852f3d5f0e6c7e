//! Correlation of outbound requests with their responses.
//!
//! A plain `send` gives no way to tell which response belongs to which
//! request once several are in flight, so every outbound request is recorded
//! in an id-keyed map before its frame is queued. When a response arrives the
//! descriptor decides how it is delivered:
//!
//! 1. **awaited** - the caller blocks on the reply future internally
//! 2. **future** - the caller gets a [`PendingReply`] to await later
//! 3. **callback** - a closure runs on the delivering task
//!
//! If the connection a request was sent on closes first, its descriptor is
//! drained and completed with a synthesized `Disconnected` response, so
//! blocked callers never hang. The map entry is removed by whichever side
//! completes first; the loser finds nothing and the late response is logged
//! and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use hubrpc_common::protocol::fields::{MType, RCode, ServiceOp};
use hubrpc_common::protocol::messages::{
    Body, Message, RpcResponse, ServiceResponse, TopicResponse,
};
use hubrpc_common::{ConnId, Connection, HubError, Result};

enum ReplyMode {
    Promise(oneshot::Sender<Message>),
    Callback(Box<dyn FnOnce(Message) + Send>),
}

impl ReplyMode {
    fn complete(self, msg: Message) {
        match self {
            ReplyMode::Promise(tx) => {
                let _ = tx.send(msg);
            }
            ReplyMode::Callback(cb) => cb(msg),
        }
    }
}

struct RequestDesc {
    conn: ConnId,
    expect: MType,
    mode: ReplyMode,
}

/// A response that has been requested but not yet delivered.
pub struct PendingReply {
    rx: oneshot::Receiver<Message>,
}

impl PendingReply {
    pub async fn wait(self) -> Result<Message> {
        self.rx.await.map_err(|_| HubError::Disconnected)
    }
}

/// The id-keyed map of in-flight requests, shared by every facility that
/// sends requests over a connection.
#[derive(Default)]
pub struct Requestor {
    pending: Mutex<HashMap<String, RequestDesc>>,
}

impl Requestor {
    pub fn new() -> Requestor {
        Requestor::default()
    }

    /// Send `msg` and return a future for its response.
    pub fn send_pending(&self, conn: &Connection, msg: Message) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        self.record(conn, &msg, ReplyMode::Promise(tx));
        if let Err(err) = conn.send(&msg) {
            self.pending.lock().unwrap().remove(&msg.id);
            return Err(err);
        }
        Ok(PendingReply { rx })
    }

    /// Send `msg` and wait for its response before returning.
    pub async fn send_wait(&self, conn: &Connection, msg: Message) -> Result<Message> {
        self.send_pending(conn, msg)?.wait().await
    }

    /// Send `msg` and have `callback` handle the response when it arrives.
    pub fn send_callback(
        &self,
        conn: &Connection,
        msg: Message,
        callback: impl FnOnce(Message) + Send + 'static,
    ) -> Result<()> {
        self.record(conn, &msg, ReplyMode::Callback(Box::new(callback)));
        if let Err(err) = conn.send(&msg) {
            self.pending.lock().unwrap().remove(&msg.id);
            return Err(err);
        }
        Ok(())
    }

    /// Dispatcher target for every response type.
    pub fn on_response(&self, _conn: &Connection, msg: Message) {
        let desc = self.pending.lock().unwrap().remove(&msg.id);
        match desc {
            Some(desc) => desc.mode.complete(msg),
            None => {
                tracing::warn!(id = %msg.id, "response matches no pending request, dropping");
            }
        }
    }

    /// Fail every request that was sent on `conn` with a `Disconnected`
    /// response. Invoked from the connection's close hook.
    pub fn fail_pending(&self, conn: ConnId) {
        let drained: Vec<(String, RequestDesc)> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, desc)| desc.conn == conn)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|desc| (id, desc)))
                .collect()
        };

        for (id, desc) in drained {
            tracing::debug!(%id, conn, "failing pending request after disconnect");
            desc.mode.complete(disconnected_reply(&id, desc.expect));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    // The descriptor goes in before the frame goes out, so a response can
    // never race past its own recording.
    fn record(&self, conn: &Connection, msg: &Message, mode: ReplyMode) {
        let desc = RequestDesc {
            conn: conn.id(),
            expect: response_kind(msg.mtype()),
            mode,
        };
        self.pending.lock().unwrap().insert(msg.id.clone(), desc);
    }
}

fn response_kind(request: MType) -> MType {
    match request {
        MType::RpcRequest | MType::RpcResponse => MType::RpcResponse,
        MType::TopicRequest | MType::TopicResponse => MType::TopicResponse,
        MType::ServiceRequest | MType::ServiceResponse => MType::ServiceResponse,
    }
}

fn disconnected_reply(id: &str, expect: MType) -> Message {
    let body = match expect {
        MType::RpcResponse => Body::RpcResponse(RpcResponse {
            rcode: RCode::Disconnected,
            result: Value::Null,
        }),
        MType::ServiceResponse => Body::ServiceResponse(ServiceResponse {
            rcode: RCode::Disconnected,
            optype: ServiceOp::Unknown,
            method: None,
            host: None,
        }),
        _ => Body::TopicResponse(TopicResponse {
            rcode: RCode::Disconnected,
        }),
    };
    Message::reply(id, body)
}

/// Convenience: wire this requestor into a dispatcher as the handler for all
/// three response types.
pub fn register_responses(dispatcher: &hubrpc_common::Dispatcher, requestor: &Arc<Requestor>) {
    for mtype in [MType::RpcResponse, MType::TopicResponse, MType::ServiceResponse] {
        let requestor = requestor.clone();
        dispatcher.register_raw(mtype, move |conn, msg| requestor.on_response(conn, msg));
    }
}
