//! Topics, subscriptions and publish fanout.
//!
//! One lock guards the two maps (`name -> Topic`, `conn -> Subscriber`);
//! each topic and each subscriber protects its own membership set so fanout
//! can snapshot recipients without holding the service-wide lock. Invariant:
//! a subscriber sits in a topic's set exactly when that topic's name sits in
//! the subscriber's set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use hubrpc_common::protocol::fields::{RCode, TopicOp};
use hubrpc_common::protocol::messages::{Body, Message, TopicRequest, TopicResponse};
use hubrpc_common::{ConnId, Connection};

struct Subscriber {
    conn: Connection,
    topics: Mutex<HashSet<String>>,
}

struct Topic {
    name: String,
    subscribers: Mutex<HashMap<ConnId, Arc<Subscriber>>>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Arc<Topic>>,
    subscribers: HashMap<ConnId, Arc<Subscriber>>,
}

/// Dispatcher target for `TopicRequest` on the hub.
#[derive(Default)]
pub struct TopicService {
    state: Mutex<State>,
}

impl TopicService {
    pub fn new() -> TopicService {
        TopicService::default()
    }

    pub fn on_topic_request(&self, conn: &Connection, id: &str, req: TopicRequest) {
        let rcode = match req.optype {
            TopicOp::Create => {
                self.create(&req.topic_key);
                RCode::Ok
            }
            TopicOp::Remove => {
                if self.remove(&req.topic_key) {
                    RCode::Ok
                } else {
                    RCode::TopicNotFound
                }
            }
            TopicOp::Subscribe => {
                if self.subscribe(conn, &req.topic_key) {
                    RCode::Ok
                } else {
                    RCode::TopicNotFound
                }
            }
            TopicOp::Cancel => {
                self.cancel(conn.id(), &req.topic_key);
                RCode::Ok
            }
            TopicOp::Publish => match &req.topic_msg {
                Some(payload) => {
                    if self.publish(&req.topic_key, payload) {
                        RCode::Ok
                    } else {
                        RCode::TopicNotFound
                    }
                }
                None => RCode::InvalidMessage,
            },
            TopicOp::Unknown => {
                tracing::error!(conn = conn.id(), "invalid topic operation");
                RCode::InvalidOptype
            }
        };

        let reply = Message::reply(id, Body::TopicResponse(TopicResponse { rcode }));
        if let Err(err) = conn.send(&reply) {
            tracing::debug!(conn = conn.id(), %err, "failed to send topic response");
        }
    }

    /// Close hook: detach a lost subscriber from every topic it followed.
    pub fn on_disconnect(&self, conn: &Connection) {
        let topics: Vec<Arc<Topic>> = {
            let mut state = self.state.lock().unwrap();
            let Some(subscriber) = state.subscribers.remove(&conn.id()) else {
                return;
            };
            let names = subscriber.topics.lock().unwrap().clone();
            names
                .iter()
                .filter_map(|name| state.topics.get(name).cloned())
                .collect()
        };

        for topic in topics {
            topic.subscribers.lock().unwrap().remove(&conn.id());
            tracing::debug!(conn = conn.id(), topic = %topic.name, "subscriber detached");
        }
    }

    /// Idempotent: an existing topic is left untouched.
    fn create(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.topics.entry(name.to_string()).or_insert_with(|| {
            tracing::info!(topic = %name, "topic created");
            Arc::new(Topic {
                name: name.to_string(),
                subscribers: Mutex::new(HashMap::new()),
            })
        });
    }

    /// Drop a topic; subscribers survive but forget it.
    fn remove(&self, name: &str) -> bool {
        let (topic, followers) = {
            let mut state = self.state.lock().unwrap();
            let Some(topic) = state.topics.remove(name) else {
                return false;
            };
            let followers: Vec<Arc<Subscriber>> =
                topic.subscribers.lock().unwrap().values().cloned().collect();
            (topic, followers)
        };

        for subscriber in followers {
            subscriber.topics.lock().unwrap().remove(name);
        }
        tracing::info!(topic = %topic.name, "topic removed");
        true
    }

    fn subscribe(&self, conn: &Connection, name: &str) -> bool {
        let (topic, subscriber) = {
            let mut state = self.state.lock().unwrap();
            let Some(topic) = state.topics.get(name).cloned() else {
                tracing::error!(conn = conn.id(), topic = %name, "subscribe to unknown topic");
                return false;
            };
            let subscriber = state
                .subscribers
                .entry(conn.id())
                .or_insert_with(|| {
                    Arc::new(Subscriber {
                        conn: conn.clone(),
                        topics: Mutex::new(HashSet::new()),
                    })
                })
                .clone();
            (topic, subscriber)
        };

        subscriber.topics.lock().unwrap().insert(name.to_string());
        topic
            .subscribers
            .lock()
            .unwrap()
            .insert(conn.id(), subscriber);
        true
    }

    /// Best-effort: a missing topic or subscriber is silently fine.
    fn cancel(&self, conn: ConnId, name: &str) {
        let (topic, subscriber) = {
            let state = self.state.lock().unwrap();
            (
                state.topics.get(name).cloned(),
                state.subscribers.get(&conn).cloned(),
            )
        };

        if let Some(subscriber) = &subscriber {
            subscriber.topics.lock().unwrap().remove(name);
        }
        if let Some(topic) = topic {
            topic.subscribers.lock().unwrap().remove(&conn);
        }
    }

    /// Forward `payload` to every subscriber, the publisher included if it
    /// subscribed. Each delivery is an independent frame with a fresh id.
    fn publish(&self, name: &str, payload: &str) -> bool {
        let topic = self.state.lock().unwrap().topics.get(name).cloned();
        let Some(topic) = topic else {
            tracing::error!(topic = %name, "publish to unknown topic");
            return false;
        };

        let recipients: Vec<Arc<Subscriber>> =
            topic.subscribers.lock().unwrap().values().cloned().collect();
        for subscriber in recipients {
            let msg = Message::request(Body::TopicRequest(TopicRequest {
                topic_key: name.to_string(),
                optype: TopicOp::Publish,
                topic_msg: Some(payload.to_string()),
            }));
            if let Err(err) = subscriber.conn.send(&msg) {
                tracing::debug!(conn = subscriber.conn.id(), %err, "publish not delivered");
            }
        }
        true
    }

    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        let state = self.state.lock().unwrap();
        for topic in state.topics.values() {
            for (conn, subscriber) in topic.subscribers.lock().unwrap().iter() {
                if !subscriber.topics.lock().unwrap().contains(&topic.name) {
                    return false;
                }
                if !state.subscribers.contains_key(conn) {
                    return false;
                }
            }
        }
        for subscriber in state.subscribers.values() {
            for name in subscriber.topics.lock().unwrap().iter() {
                let Some(topic) = state.topics.get(name) else {
                    return false;
                };
                if !topic
                    .subscribers
                    .lock()
                    .unwrap()
                    .contains_key(&subscriber.conn.id())
                {
                    return false;
                }
            }
        }
        true
    }
}
