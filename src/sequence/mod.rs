//! Push-to-pull request sequencing. The core of the crate.
//!
//! # Data Flow
//! ```text
//! transport service (one call per request)
//!     → RequestSequencer::push(pair)
//!         → pending consumer waiting?  resolve it directly
//!         → otherwise                  append to the FIFO queue
//! consumer loop
//!     → Incoming::next() → RequestSequencer::advance()
//!         → queue non-empty            pop front, return immediately
//!         → closing/closed and empty   end of sequence
//!         → otherwise                  register waiter, suspend
//! ```
//!
//! # Design Decisions
//! - One mutex guards queue, waiter, and state; nothing awaits while
//!   holding it
//! - A waiter's liveness check and its resolution happen under one lock
//!   acquisition, so arrivals cannot be reordered around a cancelled
//!   advance; resolving a oneshot only schedules a wake and never runs
//!   consumer code synchronously (resolve-then-return, never
//!   resolve-and-recurse)
//! - Consumer-initiated close rejects queued undelivered pairs with 503;
//!   transport-initiated close lets the consumer drain them

pub mod sequencer;
pub mod state;
pub mod stream;

pub use sequencer::{AdvanceError, PushError, RequestSequencer, SequenceFault, SequenceItem};
pub use state::{CloseReason, SequenceState};
pub use stream::Incoming;
