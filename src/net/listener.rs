//! Bounded TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured bind address is not a valid socket address.
    #[error("invalid bind address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },
    /// Failed to bind to the address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to accept a connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// A TCP listener that caps concurrent connections.
///
/// A semaphore permit is acquired before each accept and held for the
/// connection's lifetime, so accepting pauses once `max_connections` are
/// live and resumes as connections finish.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr =
            config
                .bind_address
                .parse()
                .map_err(|source| ListenerError::InvalidAddress {
                    address: config.bind_address.clone(),
                    source,
                })?;

        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                address: addr,
                source,
            })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| ListenerError::Bind {
                address: addr,
                source,
            })?;

        // Semaphore::new panics past MAX_PERMITS; validation reports this
        // for loaded configs, programmatic ones get clamped here.
        let max_connections = config.max_connections.min(Semaphore::MAX_PERMITS);
        if max_connections < config.max_connections {
            tracing::warn!(
                configured = config.max_connections,
                effective = max_connections,
                "max_connections clamped to the supported maximum"
            );
        }

        tracing::info!(
            address = %local_addr,
            max_connections,
            "listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        })
    }

    /// Accept the next connection, waiting first for a free connection slot.
    pub async fn accept(
        &self,
    ) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Semaphore::acquire only fails if the semaphore is closed, which
        // this listener never does.
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| {
                ListenerError::Accept(std::io::Error::other("connection limit closed"))
            })?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// The local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// Holds one connection slot; the slot is released when dropped, even if
/// the connection task panicked.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
