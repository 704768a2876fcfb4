//! Configuration validation.
//!
//! Semantic checks only; serde handles the syntactic ones. Pure function,
//! returns all errors rather than stopping at the first.

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::schema::ServerConfig;

/// A single semantic configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a valid socket address")]
    InvalidBindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error(
        "listener.max_connections {0} exceeds the supported maximum of {max}",
        max = Semaphore::MAX_PERMITS
    )]
    MaxConnectionsTooLarge(usize),

    #[error("queue.warn_depth must be greater than zero")]
    ZeroWarnDepth,
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config
        .listener
        .bind_address
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    } else if config.listener.max_connections > Semaphore::MAX_PERMITS {
        // The listener backs the cap with a semaphore, which panics on
        // construction past this limit.
        errors.push(ValidationError::MaxConnectionsTooLarge(
            config.listener.max_connections,
        ));
    }
    if config.queue.warn_depth == 0 {
        errors.push(ValidationError::ZeroWarnDepth);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
