//! Routes decoded messages to the handler registered for their type.
//!
//! Handlers are registered with the concrete body type they expect; the
//! dispatcher extracts that variant from the tagged [`Body`] enum and fails
//! fast (tearing the connection down) if the variant does not match. A
//! message whose type has no registered handler also tears the connection
//! down: both ends register every type they are prepared to receive at
//! wiring time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::protocol::fields::MType;
use crate::protocol::messages::{
    Body, Message, RpcRequest, RpcResponse, ServiceRequest, ServiceResponse, TopicRequest,
    TopicResponse,
};
use crate::transport::conn::Connection;

/// Extraction of a concrete body type from the tagged enum.
pub trait FromBody: Sized {
    const MTYPE: MType;

    fn from_body(body: Body) -> Option<Self>;
}

macro_rules! impl_from_body {
    ($($ty:ident),+) => {
        $(impl FromBody for $ty {
            const MTYPE: MType = MType::$ty;

            fn from_body(body: Body) -> Option<Self> {
                match body {
                    Body::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        })+
    };
}

impl_from_body!(
    RpcRequest,
    RpcResponse,
    TopicRequest,
    TopicResponse,
    ServiceRequest,
    ServiceResponse
);

type RawHandler = Arc<dyn Fn(&Connection, Message) + Send + Sync>;

/// Per-type handler table shared by one client or server endpoint.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<MType, RawHandler>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher::default()
    }

    /// Register a handler for the body type `T`.
    ///
    /// The handler receives the request id from the envelope alongside the
    /// extracted body.
    pub fn register<T: FromBody + 'static>(
        &self,
        handler: impl Fn(&Connection, &str, T) + Send + Sync + 'static,
    ) {
        let raw: RawHandler = Arc::new(move |conn, msg| {
            let Message { id, body } = msg;
            match T::from_body(body) {
                Some(typed) => handler(conn, &id, typed),
                None => {
                    tracing::error!(
                        conn = conn.id(),
                        "message body does not match its wire type, closing connection"
                    );
                    conn.shutdown();
                }
            }
        });
        self.handlers.lock().unwrap().insert(T::MTYPE, raw);
    }

    /// Register a handler that wants the whole envelope, id included.
    ///
    /// Used for the response types, whose single consumer is the requestor.
    pub fn register_raw(
        &self,
        mtype: MType,
        handler: impl Fn(&Connection, Message) + Send + Sync + 'static,
    ) {
        self.handlers.lock().unwrap().insert(mtype, Arc::new(handler));
    }

    /// Route one decoded message. Unknown types tear the connection down.
    pub fn dispatch(&self, conn: &Connection, msg: Message) {
        let handler = self.handlers.lock().unwrap().get(&msg.mtype()).cloned();
        match handler {
            Some(handler) => handler(conn, msg),
            None => {
                tracing::error!(
                    conn = conn.id(),
                    mtype = ?msg.mtype(),
                    "no handler for message type, closing connection"
                );
                conn.shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fields::{RCode, TopicOp};
    use crate::transport::conn::ConnHooks;
    use crate::transport::{TcpClient, TcpServer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn endpoint_pair(dispatcher: Arc<Dispatcher>) -> TcpClient {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let hooks = ConnHooks::new(move |conn: &Connection, msg: Message| {
            dispatcher.dispatch(conn, msg)
        });
        tokio::spawn(server.serve(hooks));
        TcpClient::connect(&addr, ConnHooks::new(|_, _| {})).await.unwrap()
    }

    #[tokio::test]
    async fn test_typed_handler_receives_its_variant() {
        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dispatcher.register::<RpcRequest>(move |_conn, id, req| {
            assert!(!id.is_empty());
            assert_eq!(req.method, "Add");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let client = endpoint_pair(dispatcher).await;
        let msg = Message::request(Body::RpcRequest(RpcRequest {
            method: "Add".to_string(),
            parameters: json!({}),
        }));
        client.send(&msg).unwrap();

        for _ in 0..50 {
            if hits.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("handler never ran");
    }

    #[tokio::test]
    async fn test_unregistered_type_closes_the_connection() {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register::<RpcRequest>(|_, _, _| {});

        let client = endpoint_pair(dispatcher).await;
        let msg = Message::request(Body::TopicRequest(TopicRequest {
            topic_key: "news".to_string(),
            optype: TopicOp::Create,
            topic_msg: None,
        }));
        client.send(&msg).unwrap();

        for _ in 0..50 {
            if !client.connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection survived an unregistered message type");
    }

    #[test]
    fn test_from_body_rejects_mismatched_variant() {
        let body = Body::TopicResponse(TopicResponse { rcode: RCode::Ok });
        assert!(RpcResponse::from_body(body).is_none());
    }
}
