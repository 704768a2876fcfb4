//! The consumer-facing lazy sequence.
//!
//! # Responsibilities
//! - Single-owner pull handle over the sequencer: `next().await` or the
//!   `futures_util::Stream` protocol
//! - Close-on-drop so breaking out of the consuming loop shuts the
//!   transport down
//!
//! # Design Decisions
//! - Not reusable after the sequence ends; `next` keeps returning `None`
//! - Dropping a half-polled stream future is safe: the sequencer reclaims
//!   the stale waiter slot on the next advance

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;

use crate::sequence::sequencer::{AdvanceError, RequestSequencer, SequenceItem};
use crate::sequence::state::CloseReason;

type AdvanceFuture =
    Pin<Box<dyn Future<Output = Result<Option<SequenceItem>, AdvanceError>> + Send>>;

/// Lazy sequence of inbound request/response pairs.
///
/// Obtained from [`Server::start`](crate::http::Server::start). Consume with
/// a plain loop:
///
/// ```ignore
/// while let Some(item) = incoming.next().await {
///     // handle the pair or fault
/// }
/// ```
///
/// Dropping or [`close`](Incoming::close)-ing the sequence before it ends
/// stops the transport and rejects queued undelivered requests.
pub struct Incoming {
    sequencer: Arc<RequestSequencer>,
    in_flight: Option<AdvanceFuture>,
    done: bool,
}

impl Incoming {
    pub(crate) fn new(sequencer: Arc<RequestSequencer>) -> Self {
        Self {
            sequencer,
            in_flight: None,
            done: false,
        }
    }

    /// The next item, suspending until one arrives. `None` once the
    /// sequence has ended.
    pub async fn next(&mut self) -> Option<SequenceItem> {
        if self.done {
            return None;
        }
        // Discard any half-polled stream future; the sequencer reclaims its
        // waiter slot.
        self.in_flight = None;
        match self.sequencer.advance().await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error @ AdvanceError::ConcurrentAdvance) => {
                // Only reachable when a second handle advances the same
                // sequencer, which the single-consumer contract forbids.
                tracing::error!(%error, "request sequence misuse, ending iteration");
                self.done = true;
                None
            }
        }
    }

    /// Stop consuming early. Queued undelivered requests are rejected and
    /// the transport is told to stop. Subsequent `next` calls return `None`.
    pub fn close(&mut self) {
        self.done = true;
        self.in_flight = None;
        self.sequencer.close(CloseReason::ConsumerCancelled);
    }

    /// Why the sequence ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.sequencer.close_reason()
    }
}

impl Stream for Incoming {
    type Item = SequenceItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SequenceItem>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let fut = this.in_flight.get_or_insert_with(|| {
            let sequencer = Arc::clone(&this.sequencer);
            Box::pin(async move { sequencer.advance().await })
        });
        match fut.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.in_flight = None;
                match result {
                    Ok(Some(item)) => Poll::Ready(Some(item)),
                    Ok(None) => {
                        this.done = true;
                        Poll::Ready(None)
                    }
                    Err(error) => {
                        tracing::error!(%error, "request sequence misuse, ending iteration");
                        this.done = true;
                        Poll::Ready(None)
                    }
                }
            }
        }
    }
}

impl Drop for Incoming {
    fn drop(&mut self) {
        // No-op if the sequence already ended for another reason.
        self.sequencer.close(CloseReason::ConsumerCancelled);
    }
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
