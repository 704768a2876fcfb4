//! Shutdown coordination between the sequence and its transport.

use std::sync::Arc;
use tokio::sync::watch;

use crate::sequence::CloseReason;

/// Coordinator for sequence shutdown.
///
/// Holds a watch channel whose value is the close reason once shutdown has
/// been triggered. The accept loop subscribes so that a consumer-initiated
/// close reaches the transport within one scheduling step.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown with the given reason. The first trigger wins.
    pub fn trigger(&self, reason: CloseReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// The reason shutdown was triggered, if it has been.
    pub fn reason(&self) -> Option<CloseReason> {
        self.tx.borrow().clone()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription to the shutdown signal.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<CloseReason>>,
}

impl ShutdownSignal {
    /// Wait until shutdown has been triggered and return the reason.
    pub async fn triggered(&mut self) -> CloseReason {
        loop {
            if let Some(reason) = self.rx.borrow_and_update().clone() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                // Coordinator dropped without a trigger; the transport is gone.
                return CloseReason::TransportClosed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_resolves_subscribers() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        shutdown.trigger(CloseReason::TransportClosed);
        assert_eq!(signal.triggered().await, CloseReason::TransportClosed);
    }

    #[tokio::test]
    async fn first_trigger_wins() {
        let shutdown = Shutdown::new();
        shutdown.trigger(CloseReason::ConsumerCancelled);
        shutdown.trigger(CloseReason::TransportClosed);
        assert_eq!(shutdown.reason(), Some(CloseReason::ConsumerCancelled));
    }

    #[tokio::test]
    async fn late_subscriber_observes_reason() {
        let shutdown = Shutdown::new();
        shutdown.trigger(CloseReason::TransportFailed("accept failed".into()));
        let mut signal = shutdown.subscribe();
        assert_eq!(
            signal.triggered().await,
            CloseReason::TransportFailed("accept failed".into())
        );
    }
}
