//! End-to-end tests over real sockets.
//!
//! Every scenario binds its servers to port 0 on localhost, wires real
//! clients against the chosen ports and drives the full path: caller →
//! requestor → frame codec → TCP → dispatcher → domain handler and back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use hubrpc::client::{DiscoveryClient, RegistryClient, RpcClient, TopicClient};
use hubrpc::common::protocol::fields::RCode;
use hubrpc::common::protocol::messages::Host;
use hubrpc::server::{RegistryServer, RpcServer, ServiceDescribe, TopicServer, VType};

/// Spawn an RPC server with the canonical `Add` method and return its address.
async fn spawn_add_server() -> String {
    let server = RpcServer::bind(Host::new("127.0.0.1", 0), None).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    server
        .register_method(add_method())
        .await
        .unwrap();
    tokio::spawn(server.serve());
    addr
}

fn add_method() -> ServiceDescribe {
    ServiceDescribe::builder("Add")
        .param("num1", VType::Integral)
        .param("num2", VType::Integral)
        .returns(VType::Integral)
        .serve(|params| {
            let sum = params["num1"].as_i64().unwrap_or(0) + params["num2"].as_i64().unwrap_or(0);
            json!(sum)
        })
}

async fn spawn_registry_hub() -> String {
    let hub = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    let addr = hub.local_addr().unwrap().to_string();
    tokio::spawn(hub.serve());
    addr
}

async fn spawn_topic_hub() -> String {
    let hub = TopicServer::bind("127.0.0.1:0").await.unwrap();
    let addr = hub.local_addr().unwrap().to_string();
    tokio::spawn(hub.serve());
    addr
}

// ============================================================================
// RPC round trip
// ============================================================================

#[tokio::test]
async fn test_rpc_round_trip() {
    let addr = spawn_add_server().await;
    let client = RpcClient::direct(&addr).await.unwrap();

    let result = client
        .call("Add", json!({"num1": 10, "num2": 20}))
        .await
        .unwrap();
    assert_eq!(result, json!(30));

    let err = client.call("Add", json!({"num1": 10})).await.unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::InvalidParams));

    let err = client
        .call("Sub", json!({"num1": 1, "num2": 2}))
        .await
        .unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::ServiceNotFound));
}

#[tokio::test]
async fn test_mistyped_parameter_is_rejected() {
    let addr = spawn_add_server().await;
    let client = RpcClient::direct(&addr).await.unwrap();

    let err = client
        .call("Add", json!({"num1": 10, "num2": "twenty"}))
        .await
        .unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::InvalidParams));
}

#[tokio::test]
async fn test_handler_return_type_violation_is_internal_error() {
    let server = RpcServer::bind(Host::new("127.0.0.1", 0), None).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    server
        .register_method(
            ServiceDescribe::builder("Lie")
                .returns(VType::Integral)
                .serve(|_| json!("not a number")),
        )
        .await
        .unwrap();
    tokio::spawn(server.serve());

    let client = RpcClient::direct(&addr).await.unwrap();
    let err = client.call("Lie", json!({})).await.unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::InternalError));
}

// ============================================================================
// The three call modes
// ============================================================================

#[tokio::test]
async fn test_three_call_modes() {
    let addr = spawn_add_server().await;
    let client = RpcClient::direct(&addr).await.unwrap();
    let params = json!({"num1": 10, "num2": 20});

    // Awaited.
    assert_eq!(client.call("Add", params.clone()).await.unwrap(), json!(30));

    // Future: returns before the result is in, resolves on await.
    let reply = client.call_pending("Add", params.clone()).await.unwrap();
    assert_eq!(reply.wait().await.unwrap(), json!(30));

    // Callback: invoked exactly once with the result.
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = calls.clone();
    client
        .call_with("Add", params, move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(result.unwrap()).unwrap();
        })
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback never ran")
        .unwrap();
    assert_eq!(delivered, json!(30));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Framing: coalesced writes
// ============================================================================

#[tokio::test]
async fn test_coalesced_frames_are_served_in_order() {
    use bytes::BytesMut;
    use hubrpc::common::protocol::messages::{Body, Message, RpcRequest};
    use hubrpc::common::transport::codec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = spawn_add_server().await;
    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();

    let first = Message::request(Body::RpcRequest(RpcRequest {
        method: "Add".to_string(),
        parameters: json!({"num1": 1, "num2": 2}),
    }));
    let second = Message::request(Body::RpcRequest(RpcRequest {
        method: "Add".to_string(),
        parameters: json!({"num1": 3, "num2": 4}),
    }));

    // One write carrying both frames back to back.
    let mut batch = Vec::new();
    batch.extend_from_slice(&codec::encode(&first).unwrap());
    batch.extend_from_slice(&codec::encode(&second).unwrap());
    stream.write_all(&batch).await.unwrap();

    let mut buf = BytesMut::new();
    let mut replies = Vec::new();
    while replies.len() < 2 {
        while codec::can_decode(&buf) {
            replies.push(codec::decode(&mut buf).unwrap());
        }
        if replies.len() < 2 && stream.read_buf(&mut buf).await.unwrap() == 0 {
            panic!("server closed before both responses arrived");
        }
    }

    assert_eq!(replies[0].id, first.id);
    assert_eq!(replies[1].id, second.id);
    for (reply, expected) in replies.into_iter().zip([json!(3), json!(7)]) {
        match reply.body {
            Body::RpcResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::Ok);
                assert_eq!(rsp.result, expected);
            }
            other => panic!("unexpected reply body: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_oversized_garbage_tears_the_connection_down() {
    use tokio::io::AsyncWriteExt;

    let addr = spawn_add_server().await;
    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();

    // A length prefix promising far more than the inbound cap, then silence:
    // the server must hang up rather than wait forever.
    let mut garbage = Vec::new();
    garbage.extend_from_slice(&u32::MAX.to_be_bytes());
    garbage.resize(garbage.len() + (1 << 17), 0);
    stream.write_all(&garbage).await.unwrap();

    let mut probe = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), async {
        use tokio::io::AsyncReadExt;
        stream.read(&mut probe).await
    })
    .await
    .expect("server never closed the connection");
    assert_eq!(read.unwrap(), 0);
}

// ============================================================================
// Registry lifecycle
// ============================================================================

#[tokio::test]
async fn test_registry_lifecycle_with_notifications() {
    let hub = spawn_registry_hub().await;

    // P1 provides foo at 9000.
    let p1 = RegistryClient::connect(&hub).await.unwrap();
    p1.register_method("foo", Host::new("1.2.3.4", 9000))
        .await
        .unwrap();

    // D1 discovers foo.
    let (offline_tx, mut offline_rx) = mpsc::unbounded_channel();
    let d1 = DiscoveryClient::connect(
        &hub,
        Arc::new(move |host: &Host| {
            let _ = offline_tx.send(host.clone());
        }),
    )
    .await
    .unwrap();
    assert_eq!(d1.discover("foo").await.unwrap(), Host::new("1.2.3.4", 9000));

    // P2 appears; D1 absorbs the online notification into its cache. The
    // rotation keeps serving 9000 until the notice lands, so poll until
    // 9001 shows up.
    let p2 = RegistryClient::connect(&hub).await.unwrap();
    p2.register_method("foo", Host::new("1.2.3.4", 9001))
        .await
        .unwrap();

    let mut saw_new_provider = false;
    for _ in 0..100 {
        if d1.discover("foo").await.unwrap().port == 9001 {
            saw_new_provider = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(saw_new_provider, "online notification never reached the cache");

    // P1 goes away; D1 hears the offline notice and the rotation shrinks.
    p1.shutdown();
    let offline = tokio::time::timeout(Duration::from_secs(2), offline_rx.recv())
        .await
        .expect("offline notification never arrived")
        .unwrap();
    assert_eq!(offline, Host::new("1.2.3.4", 9000));

    for _ in 0..3 {
        assert_eq!(d1.discover("foo").await.unwrap().port, 9001);
    }
}

#[tokio::test]
async fn test_discovery_of_unknown_method_is_rejected() {
    let hub = spawn_registry_hub().await;
    let d = DiscoveryClient::connect(&hub, Arc::new(|_| {})).await.unwrap();

    let err = d.discover("nothing").await.unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::ServiceNotFound));
}

// ============================================================================
// Round robin across providers
// ============================================================================

#[tokio::test]
async fn test_round_robin_across_three_providers() {
    let hub = spawn_registry_hub().await;

    let mut providers = Vec::new();
    for port in [9000u16, 9001, 9002] {
        let p = RegistryClient::connect(&hub).await.unwrap();
        p.register_method("foo", Host::new("1.2.3.4", port))
            .await
            .unwrap();
        providers.push(p);
    }

    let d = DiscoveryClient::connect(&hub, Arc::new(|_| {})).await.unwrap();

    let first_cycle: std::collections::HashSet<u16> = {
        let mut ports = std::collections::HashSet::new();
        for _ in 0..3 {
            ports.insert(d.discover("foo").await.unwrap().port);
        }
        ports
    };
    assert_eq!(
        first_cycle,
        std::collections::HashSet::from([9000, 9001, 9002]),
        "each provider must be returned exactly once per cycle"
    );

    // The rotation repeats with the same fixed order.
    let mut second_cycle = Vec::new();
    for _ in 0..3 {
        second_cycle.push(d.discover("foo").await.unwrap().port);
    }
    assert_eq!(
        second_cycle.iter().collect::<std::collections::HashSet<_>>().len(),
        3
    );
}

// ============================================================================
// Discovery-driven RPC end to end
// ============================================================================

#[tokio::test]
async fn test_rpc_through_discovery() {
    let hub = spawn_registry_hub().await;

    // A provider that binds an ephemeral port and registers it with the hub.
    let server = RpcServer::bind(Host::new("127.0.0.1", 0), Some(hub.as_str()))
        .await
        .unwrap();
    server.register_method(add_method()).await.unwrap();
    tokio::spawn(server.serve());

    let client = RpcClient::with_discovery(&hub).await.unwrap();
    let result = client
        .call("Add", json!({"num1": 4, "num2": 5}))
        .await
        .unwrap();
    assert_eq!(result, json!(9));
}

// ============================================================================
// Pub/sub
// ============================================================================

#[tokio::test]
async fn test_pubsub_fanout_and_disconnect() {
    let hub = spawn_topic_hub().await;

    // A creates and subscribes.
    let a = TopicClient::connect(&hub).await.unwrap();
    a.create("t").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    a.subscribe(
        "t",
        Arc::new(move |topic: &str, payload: &str| {
            let _ = tx.send((topic.to_string(), payload.to_string()));
        }),
    )
    .await
    .unwrap();

    // B re-creates (a no-op) and publishes.
    let b = TopicClient::connect(&hub).await.unwrap();
    b.create("t").await.unwrap();
    b.publish("t", "m1").await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("publish never reached the subscriber")
        .unwrap();
    assert_eq!(delivered, ("t".to_string(), "m1".to_string()));

    // A disconnects; publishing still succeeds and delivers to no one.
    a.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    b.publish("t", "m2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_to_unknown_topic_is_rejected() {
    let hub = spawn_topic_hub().await;
    let client = TopicClient::connect(&hub).await.unwrap();

    let err = client.publish("ghost", "m").await.unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::TopicNotFound));

    let err = client.subscribe("ghost", Arc::new(|_, _| {})).await.unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::TopicNotFound));
}

#[tokio::test]
async fn test_remove_stops_fanout() {
    let hub = spawn_topic_hub().await;

    let a = TopicClient::connect(&hub).await.unwrap();
    a.create("t").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    a.subscribe(
        "t",
        Arc::new(move |_: &str, payload: &str| {
            let _ = tx.send(payload.to_string());
        }),
    )
    .await
    .unwrap();

    let b = TopicClient::connect(&hub).await.unwrap();
    b.remove("t").await.unwrap();

    let err = b.publish("t", "m").await.unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::TopicNotFound));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

// ============================================================================
// Disconnect semantics
// ============================================================================

#[tokio::test]
async fn test_pending_call_fails_when_the_server_vanishes() {
    // A server that accepts, reads nothing, and hangs up after a moment.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(stream);
        }
    });

    let client = RpcClient::direct(&addr).await.unwrap();
    let err = client
        .call("Add", json!({"num1": 1, "num2": 2}))
        .await
        .unwrap_err();
    assert_eq!(err.rejection(), Some(RCode::Disconnected));
}
