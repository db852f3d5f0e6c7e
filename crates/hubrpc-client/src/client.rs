//! Ready-wired clients.
//!
//! Each client owns its TCP connection(s) and the dispatcher/requestor
//! plumbing behind them, so application code only sees domain operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use hubrpc_common::protocol::messages::{Host, ServiceRequest, TopicRequest};
use hubrpc_common::transport::conn::ConnHooks;
use hubrpc_common::{Connection, Dispatcher, Result, TcpClient};

use crate::caller::{RpcCaller, RpcReply};
use crate::registry::{Discoverer, OfflineCallback, Provider};
use crate::requestor::{register_responses, Requestor};
use crate::topic::{SubscribeCallback, TopicManager};

fn response_hooks(requestor: &Arc<Requestor>, dispatcher: &Arc<Dispatcher>) -> ConnHooks {
    let on_message = {
        let dispatcher = dispatcher.clone();
        move |conn: &Connection, msg| dispatcher.dispatch(conn, msg)
    };
    let on_close = {
        let requestor = requestor.clone();
        move |conn: &Connection| requestor.fail_pending(conn.id())
    };
    ConnHooks::new(on_message).on_close(on_close)
}

/// Connection to the hub for announcing provided methods.
pub struct RegistryClient {
    provider: Provider,
    client: TcpClient,
}

impl RegistryClient {
    pub async fn connect(hub_addr: &str) -> Result<RegistryClient> {
        let requestor = Arc::new(Requestor::new());
        let dispatcher = Arc::new(Dispatcher::new());
        register_responses(&dispatcher, &requestor);

        let client = TcpClient::connect(hub_addr, response_hooks(&requestor, &dispatcher)).await?;
        Ok(RegistryClient {
            provider: Provider::new(requestor),
            client,
        })
    }

    /// Announce that `host` serves `method`.
    pub async fn register_method(&self, method: &str, host: Host) -> Result<()> {
        self.provider
            .register(&self.client.connection(), method, host)
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

/// Connection to the hub for resolving methods to provider hosts.
pub struct DiscoveryClient {
    discoverer: Arc<Discoverer>,
    client: TcpClient,
}

impl DiscoveryClient {
    pub async fn connect(hub_addr: &str, on_offline: OfflineCallback) -> Result<DiscoveryClient> {
        let requestor = Arc::new(Requestor::new());
        let discoverer = Arc::new(Discoverer::new(requestor.clone(), on_offline));
        let dispatcher = Arc::new(Dispatcher::new());
        register_responses(&dispatcher, &requestor);
        {
            let discoverer = discoverer.clone();
            dispatcher.register::<ServiceRequest>(move |conn, id, req| {
                discoverer.on_notice(conn, id, req)
            });
        }

        let client = TcpClient::connect(hub_addr, response_hooks(&requestor, &dispatcher)).await?;
        Ok(DiscoveryClient { discoverer, client })
    }

    /// Resolve `method` to a provider host, round-robin across providers.
    pub async fn discover(&self, method: &str) -> Result<Host> {
        self.discoverer
            .discover(&self.client.connection(), method)
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

enum CallTarget {
    /// Fixed provider connection; no discovery involved.
    Direct(TcpClient),
    /// Hosts come from discovery; provider connections are pooled per host.
    Discovered {
        discovery: DiscoveryClient,
        pool: Arc<Mutex<HashMap<Host, Arc<TcpClient>>>>,
    },
}

/// RPC invocation client.
///
/// Built either against a fixed provider address or against the hub, in
/// which case every call first resolves its provider through discovery and
/// reuses a pooled connection to that host. Hosts reported offline are
/// evicted from the pool.
pub struct RpcClient {
    requestor: Arc<Requestor>,
    dispatcher: Arc<Dispatcher>,
    caller: RpcCaller,
    target: CallTarget,
}

impl RpcClient {
    /// Connect straight to one provider at `addr`.
    pub async fn direct(addr: &str) -> Result<RpcClient> {
        let requestor = Arc::new(Requestor::new());
        let dispatcher = Arc::new(Dispatcher::new());
        register_responses(&dispatcher, &requestor);

        let client = TcpClient::connect(addr, response_hooks(&requestor, &dispatcher)).await?;
        Ok(RpcClient {
            caller: RpcCaller::new(requestor.clone()),
            requestor,
            dispatcher,
            target: CallTarget::Direct(client),
        })
    }

    /// Resolve providers through the hub at `hub_addr`.
    pub async fn with_discovery(hub_addr: &str) -> Result<RpcClient> {
        let requestor = Arc::new(Requestor::new());
        let dispatcher = Arc::new(Dispatcher::new());
        register_responses(&dispatcher, &requestor);

        let pool: Arc<Mutex<HashMap<Host, Arc<TcpClient>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let on_offline: OfflineCallback = {
            let pool = pool.clone();
            Arc::new(move |host: &Host| {
                if let Some(stale) = pool.lock().unwrap().remove(host) {
                    tracing::info!(%host, "dropping pooled connection to offline provider");
                    stale.shutdown();
                }
            })
        };
        let discovery = DiscoveryClient::connect(hub_addr, on_offline).await?;

        Ok(RpcClient {
            caller: RpcCaller::new(requestor.clone()),
            requestor,
            dispatcher,
            target: CallTarget::Discovered { discovery, pool },
        })
    }

    /// Invoke `method` and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let conn = self.provider_conn(method).await?;
        self.caller.call(&conn, method, params).await
    }

    /// Invoke `method` and return a future for its result.
    pub async fn call_pending(&self, method: &str, params: Value) -> Result<RpcReply> {
        let conn = self.provider_conn(method).await?;
        self.caller.call_pending(&conn, method, params)
    }

    /// Invoke `method`; `callback` receives the result when it arrives.
    pub async fn call_with(
        &self,
        method: &str,
        params: Value,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        let conn = self.provider_conn(method).await?;
        self.caller.call_with(&conn, method, params, callback)
    }

    async fn provider_conn(&self, method: &str) -> Result<Connection> {
        match &self.target {
            CallTarget::Direct(client) => Ok(client.connection()),
            CallTarget::Discovered { discovery, pool } => {
                let host = discovery.discover(method).await?;

                if let Some(pooled) = pool.lock().unwrap().get(&host).cloned() {
                    if pooled.connected() {
                        return Ok(pooled.connection());
                    }
                }

                let hooks = response_hooks(&self.requestor, &self.dispatcher);
                let client = Arc::new(TcpClient::connect(&host.addr(), hooks).await?);
                let conn = client.connection();
                pool.lock().unwrap().insert(host, client);
                Ok(conn)
            }
        }
    }
}

/// Topic publish/subscribe client with its own hub connection.
pub struct TopicClient {
    topics: Arc<TopicManager>,
    client: TcpClient,
}

impl TopicClient {
    pub async fn connect(hub_addr: &str) -> Result<TopicClient> {
        let requestor = Arc::new(Requestor::new());
        let topics = Arc::new(TopicManager::new(requestor.clone()));
        let dispatcher = Arc::new(Dispatcher::new());
        register_responses(&dispatcher, &requestor);
        {
            let topics = topics.clone();
            dispatcher.register::<TopicRequest>(move |conn, id, req| {
                topics.on_publish(conn, id, req)
            });
        }

        let client = TcpClient::connect(hub_addr, response_hooks(&requestor, &dispatcher)).await?;
        Ok(TopicClient { topics, client })
    }

    pub async fn create(&self, topic: &str) -> Result<()> {
        self.topics.create(&self.client.connection(), topic).await
    }

    pub async fn remove(&self, topic: &str) -> Result<()> {
        self.topics.remove(&self.client.connection(), topic).await
    }

    pub async fn subscribe(&self, topic: &str, callback: SubscribeCallback) -> Result<()> {
        self.topics
            .subscribe(&self.client.connection(), topic, callback)
            .await
    }

    pub async fn cancel(&self, topic: &str) -> Result<()> {
        self.topics.cancel(&self.client.connection(), topic).await
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.topics
            .publish(&self.client.connection(), topic, payload)
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}
