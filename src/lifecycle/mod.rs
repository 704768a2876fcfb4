//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Consumer drops/closes the sequence → Shutdown::trigger(reason)
//!     → accept loop observes signal → stops accepting
//!     → sequencer closed → remaining pairs drained or rejected
//! Transport stops on its own → accept loop exits → sequencer closed
//! ```
//!
//! # Design Decisions
//! - One watch channel per server; the stored value carries the close reason
//!   so late subscribers still observe why the sequence ended
//! - First trigger wins; later triggers are no-ops

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};
