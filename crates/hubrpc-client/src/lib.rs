//! hubrpc Client
//!
//! Everything a process needs to talk to hubrpc peers:
//!
//! - [`requestor`] - correlation of in-flight requests with their responses,
//!   in three delivery modes (awaited, future, callback)
//! - [`caller`] - the typed RPC invocation surface built on the requestor
//! - [`registry`] - method registration, discovery with a round-robin host
//!   cache, and absorption of online/offline push notifications
//! - [`topic`] - topic operations plus local delivery of published messages
//! - [`client`] - ready-wired clients: [`client::RegistryClient`],
//!   [`client::DiscoveryClient`], [`client::RpcClient`], [`client::TopicClient`]

pub mod caller;
pub mod client;
pub mod registry;
pub mod requestor;
pub mod topic;

pub use caller::{RpcCaller, RpcReply};
pub use client::{DiscoveryClient, RegistryClient, RpcClient, TopicClient};
pub use registry::{Discoverer, MethodHosts, OfflineCallback, Provider};
pub use requestor::{PendingReply, Requestor};
pub use topic::{SubscribeCallback, TopicManager};
