//! hubrpc Server
//!
//! The three server roles of the system:
//!
//! - [`router`] - dispatches RPC requests to registered native handlers with
//!   parameter and return-shape validation
//! - [`registry`] - the hub's provider/discoverer bookkeeping with
//!   online/offline push notifications
//! - [`topic`] - topics, subscriptions and publish fanout
//! - [`server`] - bind-and-serve wiring for each role:
//!   [`server::RpcServer`], [`server::RegistryServer`], [`server::TopicServer`]
//!
//! A single process may host any combination by serving several roles on
//! separate listeners; the original deployment runs the registry and topic
//! hubs standalone and one RPC server per provider process.

pub mod registry;
pub mod router;
pub mod server;
pub mod topic;

pub use registry::Registry;
pub use router::{RpcRouter, ServiceDescribe, VType};
pub use server::{RegistryServer, RpcServer, TopicServer};
pub use topic::TopicService;
