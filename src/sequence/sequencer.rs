//! The push/pull adapter between the transport and the consumer.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use hyper::StatusCode;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::QueueConfig;
use crate::http::RequestPair;
use crate::lifecycle::Shutdown;
use crate::sequence::state::{CloseReason, SequenceState};

/// One item delivered by the sequence.
#[derive(Debug)]
pub enum SequenceItem {
    /// A request and its response capability.
    Pair(RequestPair),
    /// A failure local to one request or connection. The sequence continues;
    /// the consumer decides whether to keep iterating.
    Fault(SequenceFault),
}

/// A failure reported in-band through the sequence.
#[derive(Debug, Error)]
pub enum SequenceFault {
    /// A connection failed before or between requests (e.g. a parse error).
    #[error("connection error: {0}")]
    Connection(String),
    /// The transport itself failed; end of sequence follows this item.
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Error pushing a pair into the sequence.
#[derive(Debug, Error)]
pub enum PushError {
    /// The sequence no longer accepts requests. The pair is handed back so
    /// the transport can reject it instead of dropping it silently.
    #[error("sequence closed, no longer accepting requests")]
    SequenceClosed { pair: RequestPair },
}

/// Error advancing the sequence.
#[derive(Debug, Error)]
pub enum AdvanceError {
    /// A second `advance` was issued while one is outstanding. The sequence
    /// is single-consumer; this is a usage error.
    #[error("advance called while another advance is outstanding")]
    ConcurrentAdvance,
}

struct Inner {
    state: SequenceState,
    queue: VecDeque<SequenceItem>,
    /// Single-slot registration for a consumer waiting on an empty queue.
    waiter: Option<oneshot::Sender<Option<SequenceItem>>>,
    close_reason: Option<CloseReason>,
}

/// Turns per-request transport events into a pull-based FIFO sequence.
///
/// Exactly one producer role (the transport, possibly from many connection
/// tasks) and one consumer role. `push` and `close` never suspend and are
/// safe to call from transport context; `advance` is the only suspension
/// point.
pub struct RequestSequencer {
    inner: Mutex<Inner>,
    warn_depth: usize,
    shutdown: Shutdown,
}

impl RequestSequencer {
    pub fn new(config: &QueueConfig, shutdown: Shutdown) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SequenceState::Open,
                queue: VecDeque::new(),
                waiter: None,
                close_reason: None,
            }),
            warn_depth: config.warn_depth,
            shutdown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand one arrived pair to the sequence: directly to a waiting
    /// consumer if one is registered, otherwise onto the queue.
    ///
    /// Never suspends. Fails once the sequence is closing or closed.
    pub fn push(&self, pair: RequestPair) -> Result<(), PushError> {
        let mut inner = self.lock();
        match inner.state {
            SequenceState::Open => {}
            SequenceState::Closing | SequenceState::Closed => {
                return Err(PushError::SequenceClosed { pair });
            }
        }
        // Liveness check and delivery happen under one lock acquisition so
        // no other push or advance can slip in between and reorder arrivals.
        // A closed waiter belongs to a cancelled advance; discard it and
        // queue normally. Sending a oneshot only schedules a wake, it never
        // runs consumer code synchronously, so resolving under the lock
        // cannot re-enter the sequencer.
        match inner.waiter.take() {
            Some(waiter) if !waiter.is_closed() => {
                if let Err(Some(item)) = waiter.send(Some(SequenceItem::Pair(pair))) {
                    // The receiver went away between the check and the send.
                    // The queue is empty whenever a waiter was registered, so
                    // the pair stays the oldest undelivered item.
                    inner.queue.push_front(item);
                }
            }
            _ => {
                tracing::trace!(request_id = %pair.id(), depth = inner.queue.len() + 1, "request queued");
                inner.queue.push_back(SequenceItem::Pair(pair));
                if inner.queue.len() == self.warn_depth {
                    tracing::warn!(
                        depth = inner.queue.len(),
                        "pending request queue growing; consumer is falling behind"
                    );
                }
            }
        }
        Ok(())
    }

    /// Report a failure local to one connection as an in-band item.
    ///
    /// Dropped with a trace once the sequence is no longer open; a closing
    /// sequence has nothing left to report to.
    pub(crate) fn report_fault(&self, fault: SequenceFault) {
        let mut inner = self.lock();
        if inner.state != SequenceState::Open {
            tracing::trace!(error = %fault, "fault after close discarded");
            return;
        }
        // Same single-acquisition delivery as push: stale waiters are
        // discarded, and a send that fails anyway leaves the fault at the
        // front of the (empty) queue.
        match inner.waiter.take() {
            Some(waiter) if !waiter.is_closed() => {
                if let Err(Some(item)) = waiter.send(Some(SequenceItem::Fault(fault))) {
                    inner.queue.push_front(item);
                }
            }
            _ => {
                inner.queue.push_back(SequenceItem::Fault(fault));
            }
        }
    }

    /// Obtain the next item, suspending until one is available.
    ///
    /// Returns `Ok(None)` once the sequence has ended and the queue is
    /// drained. At most one `advance` may be outstanding at a time.
    pub async fn advance(&self) -> Result<Option<SequenceItem>, AdvanceError> {
        let rx = {
            let mut inner = self.lock();
            if let Some(item) = inner.queue.pop_front() {
                if inner.queue.is_empty() && inner.state == SequenceState::Closing {
                    inner.state = SequenceState::Closed;
                    tracing::debug!("queue drained, sequence closed");
                }
                return Ok(Some(item));
            }
            match inner.state {
                SequenceState::Closing => {
                    inner.state = SequenceState::Closed;
                    return Ok(None);
                }
                SequenceState::Closed => return Ok(None),
                SequenceState::Open => {}
            }
            if let Some(waiter) = &inner.waiter {
                // A closed waiter belongs to a cancelled advance future;
                // its slot is free to reclaim.
                if !waiter.is_closed() {
                    return Err(AdvanceError::ConcurrentAdvance);
                }
            }
            let (tx, rx) = oneshot::channel();
            inner.waiter = Some(tx);
            rx
        };
        match rx.await {
            Ok(item) => Ok(item),
            // Sequencer dropped while we were waiting.
            Err(_) => Ok(None),
        }
    }

    /// Close the sequence. Idempotent.
    ///
    /// Transport-initiated reasons move to `Closing` and let the consumer
    /// drain the queue. `ConsumerCancelled` means no further advances will
    /// come: queued undelivered pairs are answered 503 immediately. Either
    /// way the shutdown signal is triggered so the transport stops.
    pub fn close(&self, reason: CloseReason) {
        let (waiter, waiter_item, abandoned) = {
            let mut inner = self.lock();
            if inner.close_reason.is_some() {
                return;
            }
            inner.close_reason = Some(reason.clone());
            if let CloseReason::TransportFailed(cause) = &reason {
                // Surfaced once, ahead of end-of-sequence.
                inner
                    .queue
                    .push_back(SequenceItem::Fault(SequenceFault::Transport(cause.clone())));
            }
            let mut abandoned = Vec::new();
            if reason == CloseReason::ConsumerCancelled {
                // No further advances will come; terminate what is queued.
                inner.state = SequenceState::Closed;
                abandoned = inner.queue.drain(..).collect();
            } else if inner.queue.is_empty() {
                inner.state = SequenceState::Closed;
            } else {
                inner.state = SequenceState::Closing;
            }
            // A registered waiter means the queue was empty when it asked;
            // resolve it with whatever close left behind (the transport
            // fault, or end-of-sequence).
            let waiter = inner.waiter.take();
            let waiter_item = match &waiter {
                Some(_) => {
                    let item = inner.queue.pop_front();
                    if inner.queue.is_empty() && inner.state == SequenceState::Closing {
                        inner.state = SequenceState::Closed;
                    }
                    item
                }
                None => None,
            };
            (waiter, waiter_item, abandoned)
        };
        if let Some(waiter) = waiter {
            if let Err(unsent) = waiter.send(waiter_item) {
                if let Some(item) = unsent {
                    self.lock().queue.push_front(item);
                }
            }
        }
        let rejected = abandoned.len();
        for item in abandoned {
            if let SequenceItem::Pair(pair) = item {
                pair.reject(StatusCode::SERVICE_UNAVAILABLE);
            }
        }
        if rejected > 0 {
            tracing::info!(count = rejected, "undelivered queued requests rejected");
        }
        tracing::info!(reason = %reason, "request sequence closing");
        self.shutdown.trigger(reason);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SequenceState {
        self.lock().state
    }

    /// Why the sequence was closed, once it has been.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock().close_reason.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hyper::Method;

    fn sequencer() -> Arc<RequestSequencer> {
        Arc::new(RequestSequencer::new(&QueueConfig::default(), Shutdown::new()))
    }

    fn pair(path: &str) -> (RequestPair, tokio::sync::oneshot::Receiver<hyper::Response<crate::http::ResponseBody>>) {
        RequestPair::fake(Method::GET, path)
    }

    fn expect_pair(item: SequenceItem) -> RequestPair {
        match item {
            SequenceItem::Pair(pair) => pair,
            SequenceItem::Fault(fault) => panic!("expected a pair, got fault: {fault}"),
        }
    }

    #[tokio::test]
    async fn queued_before_ask_returns_immediately() {
        let seq = sequencer();
        let (p1, _rx) = pair("/one");
        seq.push(p1).unwrap();

        let item = seq.advance().await.unwrap().unwrap();
        assert_eq!(expect_pair(item).path(), "/one");
    }

    #[tokio::test]
    async fn ask_before_available_resumes_on_push() {
        let seq = sequencer();
        let waiting = tokio::spawn({
            let seq = seq.clone();
            async move { seq.advance().await }
        });
        // Let the advance register its waiter.
        tokio::task::yield_now().await;

        let (p1, _rx) = pair("/one");
        let id = p1.id();
        seq.push(p1).unwrap();

        let item = waiting.await.unwrap().unwrap().unwrap();
        assert_eq!(expect_pair(item).id(), id);
    }

    #[tokio::test]
    async fn pairs_delivered_in_arrival_order() {
        let seq = sequencer();
        for path in ["/a", "/b", "/c"] {
            let (p, _rx) = pair(path);
            seq.push(p).unwrap();
        }
        for expected in ["/a", "/b", "/c"] {
            let item = seq.advance().await.unwrap().unwrap();
            assert_eq!(expect_pair(item).path(), expected);
        }
    }

    #[tokio::test]
    async fn interleaved_pushes_preserve_order() {
        let seq = sequencer();
        let mut receivers = Vec::new();
        let mut seen = Vec::new();

        for i in 0..4 {
            let (p, rx) = pair(&format!("/req/{i}"));
            receivers.push(rx);
            seq.push(p).unwrap();
        }
        for _ in 0..2 {
            seen.push(expect_pair(seq.advance().await.unwrap().unwrap()).path().to_string());
        }
        for i in 4..8 {
            let (p, rx) = pair(&format!("/req/{i}"));
            receivers.push(rx);
            seq.push(p).unwrap();
        }
        for _ in 0..6 {
            seen.push(expect_pair(seq.advance().await.unwrap().unwrap()).path().to_string());
        }

        let expected: Vec<String> = (0..8).map(|i| format!("/req/{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn close_on_empty_idle_ends_immediately() {
        let seq = sequencer();
        seq.close(CloseReason::TransportClosed);
        assert_eq!(seq.state(), SequenceState::Closed);
        assert!(seq.advance().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_advance_resolves_on_close() {
        let seq = sequencer();
        let waiting = tokio::spawn({
            let seq = seq.clone();
            async move { seq.advance().await }
        });
        tokio::task::yield_now().await;

        seq.close(CloseReason::TransportClosed);
        assert!(waiting.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_advance_is_an_error() {
        let seq = sequencer();
        let waiting = tokio::spawn({
            let seq = seq.clone();
            async move { seq.advance().await }
        });
        tokio::task::yield_now().await;

        let second = seq.advance().await;
        assert!(matches!(second, Err(AdvanceError::ConcurrentAdvance)));

        // The first advance is still intact.
        let (p1, _rx) = pair("/one");
        seq.push(p1).unwrap();
        assert!(waiting.await.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn push_after_close_hands_the_pair_back() {
        let seq = sequencer();
        seq.close(CloseReason::TransportClosed);

        let (p1, _rx) = pair("/late");
        match seq.push(p1) {
            Err(PushError::SequenceClosed { pair }) => assert_eq!(pair.path(), "/late"),
            Ok(()) => panic!("push accepted after close"),
        }
    }

    #[tokio::test]
    async fn consumer_cancel_rejects_queued_pairs() {
        let seq = sequencer();
        let (p1, rx1) = pair("/one");
        let (p2, rx2) = pair("/two");
        seq.push(p1).unwrap();
        seq.push(p2).unwrap();

        seq.close(CloseReason::ConsumerCancelled);
        assert_eq!(seq.state(), SequenceState::Closed);

        let r1 = rx1.await.expect("abandoned pair answered");
        let r2 = rx2.await.expect("abandoned pair answered");
        assert_eq!(r1.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(r2.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn transport_close_lets_consumer_drain() {
        let seq = sequencer();
        let (p1, _rx1) = pair("/one");
        let (p2, _rx2) = pair("/two");
        seq.push(p1).unwrap();
        seq.push(p2).unwrap();

        seq.close(CloseReason::TransportClosed);
        assert_eq!(seq.state(), SequenceState::Closing);

        assert_eq!(expect_pair(seq.advance().await.unwrap().unwrap()).path(), "/one");
        assert_eq!(expect_pair(seq.advance().await.unwrap().unwrap()).path(), "/two");
        assert_eq!(seq.state(), SequenceState::Closed);
        assert!(seq.advance().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_once_then_ends() {
        let seq = sequencer();
        let waiting = tokio::spawn({
            let seq = seq.clone();
            async move { seq.advance().await }
        });
        tokio::task::yield_now().await;

        seq.close(CloseReason::TransportFailed("accept failed".into()));

        let item = waiting.await.unwrap().unwrap().expect("fault surfaced");
        assert!(matches!(item, SequenceItem::Fault(SequenceFault::Transport(_))));
        assert!(seq.advance().await.unwrap().is_none());
        assert_eq!(
            seq.close_reason(),
            Some(CloseReason::TransportFailed("accept failed".into()))
        );
    }

    #[tokio::test]
    async fn connection_fault_does_not_end_the_sequence() {
        let seq = sequencer();
        seq.report_fault(SequenceFault::Connection("bad request line".into()));
        let (p1, _rx) = pair("/after");
        seq.push(p1).unwrap();

        let first = seq.advance().await.unwrap().unwrap();
        assert!(matches!(first, SequenceItem::Fault(SequenceFault::Connection(_))));
        let second = seq.advance().await.unwrap().unwrap();
        assert_eq!(expect_pair(second).path(), "/after");
        assert_eq!(seq.state(), SequenceState::Open);
    }

    #[tokio::test]
    async fn cancelled_advance_does_not_lose_the_next_pair() {
        let seq = sequencer();
        let waiting = tokio::spawn({
            let seq = seq.clone();
            async move { seq.advance().await }
        });
        tokio::task::yield_now().await;
        // Consumer gave up on this advance before anything arrived.
        waiting.abort();
        let _ = waiting.await;

        let (p1, _rx) = pair("/kept");
        seq.push(p1).unwrap();

        // The next advance reclaims the slot and still sees the pair.
        let item = seq.advance().await.unwrap().unwrap();
        assert_eq!(expect_pair(item).path(), "/kept");
    }

    #[tokio::test]
    async fn pushes_after_a_cancelled_advance_keep_arrival_order() {
        let seq = sequencer();
        let waiting = tokio::spawn({
            let seq = seq.clone();
            async move { seq.advance().await }
        });
        tokio::task::yield_now().await;
        // Leave a stale waiter behind, then race two arrivals past it.
        waiting.abort();
        let _ = waiting.await;

        let (p1, _rx1) = pair("/first");
        let (p2, _rx2) = pair("/second");
        seq.push(p1).unwrap();
        seq.push(p2).unwrap();

        // The stale waiter must not divert the first pair onto a slower
        // path; both queue normally and come back in arrival order.
        assert_eq!(expect_pair(seq.advance().await.unwrap().unwrap()).path(), "/first");
        assert_eq!(expect_pair(seq.advance().await.unwrap().unwrap()).path(), "/second");
    }
}
