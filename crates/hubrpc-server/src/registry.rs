//! The hub's provider and discoverer bookkeeping.
//!
//! Providers are tracked per connection and per method; discoverers are the
//! connections that have asked about a method and therefore want to hear
//! when providers of it appear or disappear. One connection can be both.
//!
//! Notifications are best-effort: the recipient list is snapshotted under
//! the book's lock and frames are sent after it is released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use hubrpc_common::protocol::fields::{RCode, ServiceOp};
use hubrpc_common::protocol::messages::{
    Body, Host, Message, ServiceRequest, ServiceResponse,
};
use hubrpc_common::{ConnId, Connection};

/// One provider process: the connection it registered over, the address it
/// advertises, and the methods it serves.
pub struct Provider {
    pub conn: Connection,
    pub host: Host,
    methods: Mutex<Vec<String>>,
}

impl Provider {
    fn add_method(&self, method: &str) {
        let mut methods = self.methods.lock().unwrap();
        if !methods.iter().any(|m| m == method) {
            methods.push(method.to_string());
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct ProviderBook {
    by_conn: HashMap<ConnId, Arc<Provider>>,
    by_method: HashMap<String, HashMap<ConnId, Arc<Provider>>>,
}

/// One discoverer process and the methods it has asked about.
struct Discoverer {
    conn: Connection,
    methods: Mutex<HashSet<String>>,
}

#[derive(Default)]
struct DiscovererBook {
    by_conn: HashMap<ConnId, Arc<Discoverer>>,
    by_method: HashMap<String, HashMap<ConnId, Arc<Discoverer>>>,
}

/// Dispatcher target for `ServiceRequest` on the hub.
#[derive(Default)]
pub struct Registry {
    providers: Mutex<ProviderBook>,
    discoverers: Mutex<DiscovererBook>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn on_service_request(&self, conn: &Connection, id: &str, req: ServiceRequest) {
        match req.optype {
            ServiceOp::Registry => {
                let Some(host) = req.host else {
                    // check() already rejects hostless registrations
                    return self.respond(conn, id, registry_reply(RCode::InvalidMessage));
                };
                tracing::info!(%host, method = %req.method, "service registered");
                self.add_provider(conn, &host, &req.method);
                self.notify(ServiceOp::Online, &req.method, &host);
                self.respond(conn, id, registry_reply(RCode::Ok));
            }
            ServiceOp::Discovery => {
                tracing::info!(conn = conn.id(), method = %req.method, "service discovery");
                self.add_discoverer(conn, &req.method);
                let hosts = self.method_hosts(&req.method);
                let reply = if hosts.is_empty() {
                    ServiceResponse {
                        rcode: RCode::ServiceNotFound,
                        optype: ServiceOp::Discovery,
                        method: None,
                        host: None,
                    }
                } else {
                    ServiceResponse {
                        rcode: RCode::Ok,
                        optype: ServiceOp::Discovery,
                        method: Some(req.method.clone()),
                        host: Some(hosts),
                    }
                };
                self.respond(conn, id, reply);
            }
            _ => {
                tracing::error!(conn = conn.id(), optype = ?req.optype, "invalid service operation");
                self.respond(
                    conn,
                    id,
                    ServiceResponse {
                        rcode: RCode::InvalidOptype,
                        optype: ServiceOp::Unknown,
                        method: None,
                        host: None,
                    },
                );
            }
        }
    }

    /// Close hook: a lost provider goes offline for each of its methods, and
    /// any discoverer record for the connection is dropped.
    pub fn on_disconnect(&self, conn: &Connection) {
        if let Some(provider) = self.remove_provider(conn.id()) {
            tracing::info!(host = %provider.host, "provider offline");
            for method in provider.methods() {
                self.notify(ServiceOp::Offline, &method, &provider.host);
            }
        }
        self.remove_discoverer(conn.id());
    }

    /// All hosts currently providing `method`.
    pub fn method_hosts(&self, method: &str) -> Vec<Host> {
        let book = self.providers.lock().unwrap();
        book.by_method
            .get(method)
            .map(|providers| providers.values().map(|p| p.host.clone()).collect())
            .unwrap_or_default()
    }

    fn add_provider(&self, conn: &Connection, host: &Host, method: &str) {
        let provider = {
            let mut book = self.providers.lock().unwrap();
            let provider = book
                .by_conn
                .entry(conn.id())
                .or_insert_with(|| {
                    Arc::new(Provider {
                        conn: conn.clone(),
                        host: host.clone(),
                        methods: Mutex::new(Vec::new()),
                    })
                })
                .clone();
            book.by_method
                .entry(method.to_string())
                .or_default()
                .insert(conn.id(), provider.clone());
            provider
        };
        provider.add_method(method);
    }

    fn remove_provider(&self, conn: ConnId) -> Option<Arc<Provider>> {
        let mut book = self.providers.lock().unwrap();
        let provider = book.by_conn.remove(&conn)?;
        for method in provider.methods() {
            if let Some(providers) = book.by_method.get_mut(&method) {
                providers.remove(&conn);
                if providers.is_empty() {
                    book.by_method.remove(&method);
                }
            }
        }
        Some(provider)
    }

    fn add_discoverer(&self, conn: &Connection, method: &str) {
        let discoverer = {
            let mut book = self.discoverers.lock().unwrap();
            let discoverer = book
                .by_conn
                .entry(conn.id())
                .or_insert_with(|| {
                    Arc::new(Discoverer {
                        conn: conn.clone(),
                        methods: Mutex::new(HashSet::new()),
                    })
                })
                .clone();
            book.by_method
                .entry(method.to_string())
                .or_default()
                .insert(conn.id(), discoverer.clone());
            discoverer
        };
        discoverer.methods.lock().unwrap().insert(method.to_string());
    }

    fn remove_discoverer(&self, conn: ConnId) {
        let mut book = self.discoverers.lock().unwrap();
        let Some(discoverer) = book.by_conn.remove(&conn) else {
            return;
        };
        let methods = discoverer.methods.lock().unwrap().clone();
        for method in methods {
            if let Some(watchers) = book.by_method.get_mut(&method) {
                watchers.remove(&conn);
                if watchers.is_empty() {
                    book.by_method.remove(&method);
                }
            }
        }
    }

    /// Push an online/offline notice to every discoverer of `method`.
    /// Each recipient gets its own frame with a fresh id; no response is
    /// expected and failures only get logged.
    fn notify(&self, optype: ServiceOp, method: &str, host: &Host) {
        let watchers: Vec<Arc<Discoverer>> = {
            let book = self.discoverers.lock().unwrap();
            book.by_method
                .get(method)
                .map(|watchers| watchers.values().cloned().collect())
                .unwrap_or_default()
        };

        for watcher in watchers {
            let msg = Message::request(Body::ServiceRequest(ServiceRequest {
                method: method.to_string(),
                optype,
                host: Some(host.clone()),
            }));
            if let Err(err) = watcher.conn.send(&msg) {
                tracing::debug!(conn = watcher.conn.id(), %err, "notification not delivered");
            }
        }
    }

    fn respond(&self, conn: &Connection, id: &str, body: ServiceResponse) {
        let reply = Message::reply(id, Body::ServiceResponse(body));
        if let Err(err) = conn.send(&reply) {
            tracing::debug!(conn = conn.id(), %err, "failed to send service response");
        }
    }
}

fn registry_reply(rcode: RCode) -> ServiceResponse {
    ServiceResponse {
        rcode,
        optype: ServiceOp::Registry,
        method: None,
        host: None,
    }
}
