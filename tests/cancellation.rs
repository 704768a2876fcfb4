//! Early-termination and shutdown propagation tests.

use std::time::Duration;

use hyper::StatusCode;
use serveloop::{CloseReason, SequenceItem, Server};

mod common;

#[tokio::test]
async fn dropping_the_sequence_stops_the_server() {
    let server = Server::bind(&common::test_config()).await.expect("bind server");
    let addr = server.local_addr().unwrap();

    // Consume exactly one request, then break out of the loop.
    let consumer = tokio::spawn(async move {
        let mut incoming = server.start();
        if let Some(SequenceItem::Pair(pair)) = incoming.next().await {
            let _ = pair.end(StatusCode::OK, "first");
        }
        // incoming dropped here
    });

    let first = common::client()
        .get(format!("http://{}/first", addr))
        .send()
        .await
        .expect("server reachable");
    assert_eq!(first.status(), 200);

    consumer.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The listener is gone; a fresh connection cannot be made.
    let second = common::client()
        .get(format!("http://{}/second", addr))
        .send()
        .await;
    assert!(second.is_err(), "server accepted a connection after cancellation");
}

#[tokio::test]
async fn request_on_a_live_connection_after_close_gets_503() {
    let server = Server::bind(&common::test_config()).await.expect("bind server");
    let addr = server.local_addr().unwrap();

    let consumer = tokio::spawn(async move {
        let mut incoming = server.start();
        if let Some(SequenceItem::Pair(pair)) = incoming.next().await {
            let _ = pair.end(StatusCode::OK, "first");
        }
        incoming.close();
        // Keep the task alive so nothing else tears the runtime down early.
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    // One pooled client so the second request rides the same connection.
    let client = common::client();
    let first = client
        .get(format!("http://{}/first", addr))
        .send()
        .await
        .expect("server reachable");
    assert_eq!(first.status(), 200);

    tokio::time::sleep(Duration::from_millis(50)).await;

    match client.get(format!("http://{}/second", addr)).send().await {
        // The kept-alive connection is still served; the push is rejected.
        Ok(response) => assert_eq!(response.status(), 503),
        // The pool discarded the connection and a new one was refused.
        Err(_) => {}
    }

    consumer.abort();
}

#[tokio::test]
async fn transport_stop_drains_then_ends_the_sequence() {
    let server = Server::bind(&common::test_config()).await.expect("bind server");
    let addr = server.local_addr().unwrap();
    let handle = server.handle();

    let consumer = tokio::spawn(async move {
        let mut incoming = server.start();
        let mut served = 0u32;
        while let Some(item) = incoming.next().await {
            if let SequenceItem::Pair(pair) = item {
                let path = pair.path().to_string();
                let _ = pair.end(StatusCode::OK, path);
                served += 1;
            }
        }
        (served, incoming.close_reason())
    });

    let client = common::client();
    let response = client
        .get(format!("http://{}/only", addr))
        .send()
        .await
        .expect("server reachable");
    assert_eq!(response.status(), 200);

    handle.stop();

    let (served, reason) = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("sequence ended after transport stop")
        .unwrap();
    assert_eq!(served, 1);
    assert_eq!(reason, Some(CloseReason::TransportClosed));
}
