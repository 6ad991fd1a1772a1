//! End-to-end integration tests driving the peer engine over real TCP
//! loopback connections (as opposed to the in-process `tokio::io::duplex`
//! unit tests inside `src/peer.rs`).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use peer_rpc::crypto::{NullCrypto, RsaAesCrypto};
use peer_rpc::handlers::HandlerRegistry;
use peer_rpc::logging::TracingLogger;
use peer_rpc::pending::Outcome;
use peer_rpc::transport::{dial, Server};

async fn bind_loopback(inherited: HandlerRegistry) -> Server {
    Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        inherited,
        Arc::new(TracingLogger),
        Arc::new(NullCrypto),
        2,
    )
    .await
    .expect("bind loopback")
}

#[tokio::test]
async fn client_pings_server_over_real_tcp() {
    let server = bind_loopback(HandlerRegistry::new()).await;
    let addr = server.local_addr();

    tokio::spawn(async move {
        let _peer = server.accept().await.expect("accept");
        // Built-in PING handler answers without further wiring.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = dial(addr, Arc::new(TracingLogger), Arc::new(NullCrypto), 2)
        .await
        .expect("dial");

    let outcome = client.request("PING", Some(json!(["over-the-wire"]))).await;
    match outcome {
        Outcome::Result(v) => assert_eq!(v, json!(["over-the-wire"])),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn accepted_peers_inherit_server_handlers() {
    let mut inherited = HandlerRegistry::new();
    inherited.requests.register(
        "ECHO_ID",
        Arc::new(|id, _params, _peer| Box::pin(async move { Some(Ok(json!(id))) }))
            as peer_rpc::handlers::RequestHandler,
    );

    let server = bind_loopback(inherited).await;
    let addr = server.local_addr();

    tokio::spawn(async move {
        let _peer = server.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = dial(addr, Arc::new(TracingLogger), Arc::new(NullCrypto), 2)
        .await
        .expect("dial");
    let outcome = client.request("ECHO_ID", None).await;
    assert!(matches!(outcome, Outcome::Result(_)));
}

#[tokio::test]
async fn server_broadcasts_to_every_connected_peer() {
    let server = bind_loopback(HandlerRegistry::new()).await;
    let addr = server.local_addr();
    let group = server.group();

    tokio::spawn(async move {
        loop {
            match server.accept().await {
                Ok(_peer) => {}
                Err(_) => break,
            }
        }
    });

    let mut watchers = Vec::new();
    for _ in 0..3 {
        let client = dial(addr, Arc::new(TracingLogger), Arc::new(NullCrypto), 2)
            .await
            .expect("dial");
        client
            .on_notification(
                "NEWS",
                Arc::new(|_params, _peer| Box::pin(async move {})),
            )
            .await;
        watchers.push(client);
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(group.len().await, 3);

    group.broadcast("NEWS", Some(json!({"headline": "it works"}))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for watcher in &watchers {
        assert_eq!(watcher.counters().await.notif_recv, 1);
    }
}

#[tokio::test]
async fn encrypted_handshake_survives_real_tcp_round_trip() {
    let server = bind_loopback(HandlerRegistry::new()).await;
    let addr = server.local_addr();

    tokio::spawn(async move {
        let peer = server.accept().await.expect("accept");
        // Keep the accepted peer (and its secure channel) alive for the
        // duration of the test.
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(peer);
    });

    let client = dial(addr, Arc::new(TracingLogger), Arc::new(RsaAesCrypto), 2)
        .await
        .expect("dial");

    let activated = client.enable_encryption().await.expect("handshake");
    assert!(activated);
    assert!(client.secure().is_active().await);

    let outcome = client.request("PING", Some(json!(["secret over tcp"]))).await;
    match outcome {
        Outcome::Result(v) => assert_eq!(v, json!(["secret over tcp"])),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn terminate_closes_both_sides() {
    let server = bind_loopback(HandlerRegistry::new()).await;
    let addr = server.local_addr();

    let accepted = tokio::spawn(async move { server.accept().await.expect("accept") });

    let client = dial(addr, Arc::new(TracingLogger), Arc::new(NullCrypto), 2)
        .await
        .expect("dial");
    let server_peer = accepted.await.expect("accept task");

    client.terminate(Some("done".into())).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(!client.is_open());
    assert!(!server_peer.is_open());
}
