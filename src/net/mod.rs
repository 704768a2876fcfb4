//! TCP acceptance.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept connections under a concurrency cap (semaphore)
//! - Hold one permit per live connection so the cap survives task panics

pub mod listener;

pub use listener::{ConnectionPermit, Listener, ListenerError};
