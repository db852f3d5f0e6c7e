//! # hubrpc CLI Entry Point
//!
//! Runs the hubs and offers one-shot commands for poking at a running
//! deployment.
//!
//! ## Usage
//!
//! ```bash
//! # Run the registry hub
//! hubrpc hub -b 0.0.0.0:7080
//!
//! # Run the topic hub
//! hubrpc topics -b 0.0.0.0:7081
//!
//! # Discover and invoke a method through the hub (params are raw JSON)
//! hubrpc call 127.0.0.1:7080 Add '{"num1": 10, "num2": 20}'
//!
//! # Publish one message to a topic (the topic is created if missing)
//! hubrpc publish 127.0.0.1:7081 news "hello"
//!
//! # Subscribe and print deliveries until interrupted
//! hubrpc subscribe 127.0.0.1:7081 news
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;

use hubrpc_client::{RpcClient, TopicClient};
use hubrpc_server::{RegistryServer, TopicServer};

/// hubrpc: RPC, service discovery and pub/sub on one wire.
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Hub(HubCmd),
    Topics(TopicsCmd),
    Call(CallCmd),
    Publish(PublishCmd),
    Subscribe(SubscribeCmd),
}

/// run the service registry hub
#[derive(FromArgs)]
#[argh(subcommand, name = "hub")]
struct HubCmd {
    /// address to bind (e.g. 0.0.0.0:7080)
    #[argh(option, short = 'b', default = "String::from(\"0.0.0.0:7080\")")]
    bind: String,
}

/// run the topic hub
#[derive(FromArgs)]
#[argh(subcommand, name = "topics")]
struct TopicsCmd {
    /// address to bind (e.g. 0.0.0.0:7081)
    #[argh(option, short = 'b', default = "String::from(\"0.0.0.0:7081\")")]
    bind: String,
}

/// discover a method through the hub and invoke it once
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
struct CallCmd {
    /// registry hub address
    #[argh(positional)]
    hub: String,
    /// method name
    #[argh(positional)]
    method: String,
    /// parameters as a JSON object
    #[argh(positional)]
    params: String,
}

/// publish one message to a topic
#[derive(FromArgs)]
#[argh(subcommand, name = "publish")]
struct PublishCmd {
    /// topic hub address
    #[argh(positional)]
    hub: String,
    /// topic name
    #[argh(positional)]
    topic: String,
    /// message payload
    #[argh(positional)]
    message: String,
}

/// subscribe to a topic and print deliveries until interrupted
#[derive(FromArgs)]
#[argh(subcommand, name = "subscribe")]
struct SubscribeCmd {
    /// topic hub address
    #[argh(positional)]
    hub: String,
    /// topic name
    #[argh(positional)]
    topic: String,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli: Cli = argh::from_env();

    match cli.command {
        Command::Hub(cmd) => {
            let server = RegistryServer::bind(&cmd.bind).await?;
            tracing::info!(addr = %server.local_addr()?, "registry hub listening");
            server.serve().await?;
        }
        Command::Topics(cmd) => {
            let server = TopicServer::bind(&cmd.bind).await?;
            tracing::info!(addr = %server.local_addr()?, "topic hub listening");
            server.serve().await?;
        }
        Command::Call(cmd) => {
            let params: serde_json::Value = serde_json::from_str(&cmd.params)
                .context("parameters must be valid JSON")?;
            let client = RpcClient::with_discovery(&cmd.hub).await?;
            let result = client.call(&cmd.method, params).await?;
            println!("{result}");
        }
        Command::Publish(cmd) => {
            let client = TopicClient::connect(&cmd.hub).await?;
            client.create(&cmd.topic).await?;
            client.publish(&cmd.topic, &cmd.message).await?;
        }
        Command::Subscribe(cmd) => {
            let client = TopicClient::connect(&cmd.hub).await?;
            client.create(&cmd.topic).await?;
            client
                .subscribe(
                    &cmd.topic,
                    Arc::new(|topic, payload| println!("[{topic}] {payload}")),
                )
                .await?;
            tracing::info!(topic = %cmd.topic, "subscribed, waiting for messages");
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
