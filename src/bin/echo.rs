//! Sequential echo server: answers every request with its own path.

use std::path::Path;
use std::time::Instant;

use hyper::StatusCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use serveloop::{load_config, SequenceItem, Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "serveloop=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => ServerConfig::default(),
    };

    let started = Instant::now();
    let server = Server::bind(&config).await?;
    tracing::info!(
        address = %server.local_addr()?,
        startup_ms = started.elapsed().as_secs_f64() * 1000.0,
        "server ready"
    );

    let mut incoming = server.start();
    while let Some(item) = incoming.next().await {
        match item {
            SequenceItem::Pair(pair) => {
                let path = pair.path().to_string();
                if let Err(error) = pair.end(StatusCode::OK, path) {
                    tracing::warn!(%error, "client went away before the response");
                }
            }
            SequenceItem::Fault(fault) => {
                tracing::warn!(error = %fault, "request fault");
            }
        }
    }

    if let Some(reason) = incoming.close_reason() {
        tracing::info!(%reason, "server stopped");
    }
    Ok(())
}
