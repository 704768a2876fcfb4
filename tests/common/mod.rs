//! Shared utilities for integration tests.

use std::net::SocketAddr;

use hyper::StatusCode;
use serveloop::{SequenceItem, Server, ServerConfig};
use tokio::task::JoinHandle;

/// Config bound to an ephemeral loopback port.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config
}

/// Start a server whose consumer loop answers each request with its own
/// path. Returns the bound address and the consumer task.
#[allow(dead_code)]
pub async fn start_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let server = Server::bind(&test_config()).await.expect("bind server");
    let addr = server.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let mut incoming = server.start();
        while let Some(item) = incoming.next().await {
            if let SequenceItem::Pair(pair) = item {
                let path = pair.path().to_string();
                let _ = pair.end(StatusCode::OK, path);
            }
        }
    });

    (addr, handle)
}

#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("build client")
}
