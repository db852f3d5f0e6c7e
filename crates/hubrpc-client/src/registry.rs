//! Client half of the service registry: registration, discovery and the
//! round-robin host cache.
//!
//! A provider process registers each method it serves together with its
//! externally reachable address. A consumer process discovers a method once,
//! caches the returned hosts, and from then on rotates through them locally;
//! online/offline notifications pushed by the hub keep the cache current
//! without further round trips.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hubrpc_common::protocol::fields::{RCode, ServiceOp};
use hubrpc_common::protocol::messages::{Body, Host, Message, ServiceRequest};
use hubrpc_common::{Connection, HubError, Result};

use crate::requestor::Requestor;

/// Registers methods with the hub on behalf of a provider.
pub struct Provider {
    requestor: Arc<Requestor>,
}

impl Provider {
    pub fn new(requestor: Arc<Requestor>) -> Provider {
        Provider { requestor }
    }

    /// Announce that `host` serves `method`. Waits for the hub's answer.
    pub async fn register(&self, conn: &Connection, method: &str, host: Host) -> Result<()> {
        let msg = Message::request(Body::ServiceRequest(ServiceRequest {
            method: method.to_string(),
            optype: ServiceOp::Registry,
            host: Some(host),
        }));
        let reply = self.requestor.send_wait(conn, msg).await?;
        match reply.body {
            Body::ServiceResponse(rsp) if rsp.rcode == RCode::Ok => Ok(()),
            Body::ServiceResponse(rsp) => Err(HubError::Rejected(rsp.rcode)),
            _ => Err(HubError::InvalidMessage("expected a service response")),
        }
    }
}

/// The hosts currently known to serve one method, with a rotating cursor so
/// consecutive selections spread across providers.
pub struct MethodHosts {
    ring: Mutex<Ring>,
}

struct Ring {
    hosts: Vec<Host>,
    cursor: usize,
}

impl MethodHosts {
    pub fn new(hosts: Vec<Host>) -> MethodHosts {
        MethodHosts {
            ring: Mutex::new(Ring { hosts, cursor: 0 }),
        }
    }

    /// Append `host` unless an equal one is already present. Duplicate
    /// online notifications after a provider reconnect are absorbed here.
    pub fn add(&self, host: Host) {
        let mut ring = self.ring.lock().unwrap();
        if !ring.hosts.contains(&host) {
            ring.hosts.push(host);
        }
    }

    pub fn remove(&self, host: &Host) {
        let mut ring = self.ring.lock().unwrap();
        if let Some(pos) = ring.hosts.iter().position(|h| h == host) {
            ring.hosts.remove(pos);
        }
    }

    /// Next host in rotation, or `None` when the ring is empty.
    pub fn choose(&self) -> Option<Host> {
        let mut ring = self.ring.lock().unwrap();
        if ring.hosts.is_empty() {
            return None;
        }
        let pos = ring.cursor % ring.hosts.len();
        ring.cursor = ring.cursor.wrapping_add(1) % ring.hosts.len();
        Some(ring.hosts[pos].clone())
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().unwrap().hosts.is_empty()
    }
}

/// Invoked when the hub reports a provider host offline, so the owner can
/// drop any pooled connection to it.
pub type OfflineCallback = Arc<dyn Fn(&Host) + Send + Sync>;

/// Discovers method endpoints and keeps the per-method cache current.
pub struct Discoverer {
    requestor: Arc<Requestor>,
    hosts: Mutex<HashMap<String, Arc<MethodHosts>>>,
    on_offline: OfflineCallback,
}

impl Discoverer {
    pub fn new(requestor: Arc<Requestor>, on_offline: OfflineCallback) -> Discoverer {
        Discoverer {
            requestor,
            hosts: Mutex::new(HashMap::new()),
            on_offline,
        }
    }

    /// Resolve `method` to a provider host.
    ///
    /// Serves from the cache when it has entries; otherwise asks the hub,
    /// installs the returned hosts and starts the rotation on them.
    pub async fn discover(&self, conn: &Connection, method: &str) -> Result<Host> {
        if let Some(entry) = self.hosts.lock().unwrap().get(method).cloned() {
            if let Some(host) = entry.choose() {
                return Ok(host);
            }
        }

        let msg = Message::request(Body::ServiceRequest(ServiceRequest {
            method: method.to_string(),
            optype: ServiceOp::Discovery,
            host: None,
        }));
        let reply = self.requestor.send_wait(conn, msg).await?;
        let rsp = match reply.body {
            Body::ServiceResponse(rsp) => rsp,
            _ => return Err(HubError::InvalidMessage("expected a service response")),
        };
        if rsp.rcode != RCode::Ok {
            return Err(HubError::Rejected(rsp.rcode));
        }

        let entry = Arc::new(MethodHosts::new(rsp.host.unwrap_or_default()));
        let host = entry
            .choose()
            .ok_or(HubError::Rejected(RCode::ServiceNotFound))?;
        self.hosts
            .lock()
            .unwrap()
            .insert(method.to_string(), entry);
        Ok(host)
    }

    /// Dispatcher target for `ServiceRequest` pushes on the hub connection.
    /// Only online/offline notifications are meaningful here.
    pub fn on_notice(&self, _conn: &Connection, _id: &str, req: ServiceRequest) {
        let Some(host) = req.host else {
            tracing::warn!(method = %req.method, "service notification without a host, ignoring");
            return;
        };
        match req.optype {
            ServiceOp::Online => {
                tracing::info!(method = %req.method, %host, "provider online");
                let entry = self
                    .hosts
                    .lock()
                    .unwrap()
                    .entry(req.method.clone())
                    .or_insert_with(|| Arc::new(MethodHosts::new(Vec::new())))
                    .clone();
                entry.add(host);
            }
            ServiceOp::Offline => {
                tracing::info!(method = %req.method, %host, "provider offline");
                let entry = self.hosts.lock().unwrap().get(&req.method).cloned();
                if let Some(entry) = entry {
                    entry.remove(&host);
                    (self.on_offline)(&host);
                }
            }
            _ => {}
        }
    }
}
