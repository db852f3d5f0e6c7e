//! Topic operations and local delivery of published messages.
//!
//! Every operation is a blocking request through the shared requestor; the
//! returned response code decides success. Subscribing also records a local
//! callback which [`TopicManager::on_publish`] invokes whenever the hub fans
//! a published message out to this connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hubrpc_common::protocol::fields::{RCode, TopicOp};
use hubrpc_common::protocol::messages::{Body, Message, TopicRequest};
use hubrpc_common::{Connection, HubError, Result};

use crate::requestor::Requestor;

/// Receives `(topic, payload)` for messages published to a subscribed topic.
pub type SubscribeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

pub struct TopicManager {
    requestor: Arc<Requestor>,
    callbacks: Mutex<HashMap<String, SubscribeCallback>>,
}

impl TopicManager {
    pub fn new(requestor: Arc<Requestor>) -> TopicManager {
        TopicManager {
            requestor,
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Create `topic` on the hub. Creating an existing topic is a no-op.
    pub async fn create(&self, conn: &Connection, topic: &str) -> Result<()> {
        self.request(conn, topic, TopicOp::Create, None).await
    }

    /// Remove `topic`; its subscribers stay connected but stop receiving.
    pub async fn remove(&self, conn: &Connection, topic: &str) -> Result<()> {
        self.request(conn, topic, TopicOp::Remove, None).await
    }

    /// Subscribe to `topic`, delivering each published message to `callback`.
    pub async fn subscribe(
        &self,
        conn: &Connection,
        topic: &str,
        callback: SubscribeCallback,
    ) -> Result<()> {
        // Record the callback first: a publish can race in right behind the
        // subscription response.
        self.callbacks
            .lock()
            .unwrap()
            .insert(topic.to_string(), callback);
        let outcome = self.request(conn, topic, TopicOp::Subscribe, None).await;
        if outcome.is_err() {
            self.callbacks.lock().unwrap().remove(topic);
        }
        outcome
    }

    pub async fn cancel(&self, conn: &Connection, topic: &str) -> Result<()> {
        self.callbacks.lock().unwrap().remove(topic);
        self.request(conn, topic, TopicOp::Cancel, None).await
    }

    pub async fn publish(&self, conn: &Connection, topic: &str, payload: &str) -> Result<()> {
        self.request(conn, topic, TopicOp::Publish, Some(payload))
            .await
    }

    /// Dispatcher target for `TopicRequest` pushes on the hub connection.
    pub fn on_publish(&self, _conn: &Connection, _id: &str, req: TopicRequest) {
        if req.optype != TopicOp::Publish {
            tracing::warn!(optype = ?req.optype, "unexpected topic operation pushed by hub, ignoring");
            return;
        }
        let Some(payload) = req.topic_msg else {
            tracing::warn!(topic = %req.topic_key, "published message without payload, dropping");
            return;
        };
        let callback = self.callbacks.lock().unwrap().get(&req.topic_key).cloned();
        match callback {
            Some(callback) => callback(&req.topic_key, &payload),
            None => {
                tracing::warn!(topic = %req.topic_key, "published message for a topic with no local callback, dropping");
            }
        }
    }

    async fn request(
        &self,
        conn: &Connection,
        topic: &str,
        optype: TopicOp,
        payload: Option<&str>,
    ) -> Result<()> {
        let msg = Message::request(Body::TopicRequest(TopicRequest {
            topic_key: topic.to_string(),
            optype,
            topic_msg: payload.map(str::to_string),
        }));
        let reply = self.requestor.send_wait(conn, msg).await?;
        match reply.body {
            Body::TopicResponse(rsp) if rsp.rcode == RCode::Ok => Ok(()),
            Body::TopicResponse(rsp) => Err(HubError::Rejected(rsp.rcode)),
            _ => Err(HubError::InvalidMessage("expected a topic response")),
        }
    }
}
