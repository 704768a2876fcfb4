//! Sequence lifecycle state.

/// Lifecycle state of a request sequence.
///
/// Transitions are one-way: `Open → Closing → Closed`. `Closing` means the
/// transport has stopped producing but queued requests are still being
/// drained; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Accepting pushes and advances.
    Open,
    /// No new pushes accepted; queued pairs still drained by the consumer.
    Closing,
    /// Queue empty and shutdown acknowledged. Terminal.
    Closed,
}

/// Why a sequence was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport stopped listening normally.
    TransportClosed,
    /// The transport failed mid-operation (e.g. the accept loop died).
    TransportFailed(String),
    /// The consumer stopped iterating before the sequence ended.
    ConsumerCancelled,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TransportClosed => write!(f, "transport closed"),
            CloseReason::TransportFailed(e) => write!(f, "transport failed: {}", e),
            CloseReason::ConsumerCancelled => write!(f, "consumer cancelled"),
        }
    }
}
