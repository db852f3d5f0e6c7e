//! Bind-and-serve wiring for the three server roles.
//!
//! Each server builds its dispatcher at construction time and exposes
//! `local_addr` before `serve`, so tests (and supervisors) can bind to port
//! 0 and learn the chosen port.

use std::net::SocketAddr;
use std::sync::Arc;

use hubrpc_client::client::RegistryClient;
use hubrpc_common::protocol::messages::{Host, RpcRequest, ServiceRequest, TopicRequest};
use hubrpc_common::transport::conn::ConnHooks;
use hubrpc_common::{Connection, Dispatcher, Message, Result, TcpServer};

use crate::registry::Registry;
use crate::router::{RpcRouter, ServiceDescribe};
use crate::topic::TopicService;

fn dispatch_hooks(dispatcher: Arc<Dispatcher>) -> ConnHooks {
    ConnHooks::new(move |conn: &Connection, msg: Message| dispatcher.dispatch(conn, msg))
}

/// The registry hub: tracks providers, answers discovery, pushes
/// online/offline notices.
pub struct RegistryServer {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    listener: TcpServer,
}

impl RegistryServer {
    pub async fn bind(addr: &str) -> Result<RegistryServer> {
        let registry = Arc::new(Registry::new());
        let dispatcher = Arc::new(Dispatcher::new());
        {
            let registry = registry.clone();
            dispatcher.register::<ServiceRequest>(move |conn, id, req| {
                registry.on_service_request(conn, id, req)
            });
        }

        Ok(RegistryServer {
            registry,
            dispatcher,
            listener: TcpServer::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Result<()> {
        let registry = self.registry;
        let hooks = dispatch_hooks(self.dispatcher)
            .on_close(move |conn: &Connection| registry.on_disconnect(conn));
        self.listener.serve(hooks).await
    }
}

/// The topic hub: topic set, subscription graph and publish fanout.
pub struct TopicServer {
    topics: Arc<TopicService>,
    dispatcher: Arc<Dispatcher>,
    listener: TcpServer,
}

impl TopicServer {
    pub async fn bind(addr: &str) -> Result<TopicServer> {
        let topics = Arc::new(TopicService::new());
        let dispatcher = Arc::new(Dispatcher::new());
        {
            let topics = topics.clone();
            dispatcher.register::<TopicRequest>(move |conn, id, req| {
                topics.on_topic_request(conn, id, req)
            });
        }

        Ok(TopicServer {
            topics,
            dispatcher,
            listener: TcpServer::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Result<()> {
        let topics = self.topics;
        let hooks = dispatch_hooks(self.dispatcher)
            .on_close(move |conn: &Connection| topics.on_disconnect(conn));
        self.listener.serve(hooks).await
    }
}

/// One provider process: serves RPC requests, optionally announcing each
/// method to the registry hub first.
pub struct RpcServer {
    router: Arc<RpcRouter>,
    dispatcher: Arc<Dispatcher>,
    listener: TcpServer,
    access: Host,
    registry: Option<RegistryClient>,
}

impl RpcServer {
    /// Bind on `access` (the externally reachable address; with port 0 the
    /// chosen port is advertised instead). With `registry_hub` set, every
    /// registered method is also announced to the hub.
    pub async fn bind(access: Host, registry_hub: Option<&str>) -> Result<RpcServer> {
        let router = Arc::new(RpcRouter::new());
        let dispatcher = Arc::new(Dispatcher::new());
        {
            let router = router.clone();
            dispatcher.register::<RpcRequest>(move |conn, id, req| {
                router.on_rpc_request(conn, id, req)
            });
        }

        let listener = TcpServer::bind(&access.addr()).await?;
        let mut access = access;
        if access.port == 0 {
            access.port = listener.local_addr()?.port();
        }

        let registry = match registry_hub {
            Some(addr) => Some(RegistryClient::connect(addr).await?),
            None => None,
        };

        Ok(RpcServer {
            router,
            dispatcher,
            listener,
            access,
            registry,
        })
    }

    /// The address advertised to the registry hub.
    pub fn advertised_host(&self) -> &Host {
        &self.access
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Install a method, announcing it to the hub when one is configured.
    pub async fn register_method(&self, desc: ServiceDescribe) -> Result<()> {
        if let Some(registry) = &self.registry {
            registry
                .register_method(desc.method(), self.access.clone())
                .await?;
        }
        self.router.register(desc);
        Ok(())
    }

    pub async fn serve(self) -> Result<()> {
        self.listener.serve(dispatch_hooks(self.dispatcher)).await
    }
}
