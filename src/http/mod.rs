//! HTTP transport glue and the request/response pair surface.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (hyper connection serving, per-request service)
//!     → pair.rs (RequestPair built, pushed into the sequencer)
//!     → consumer responds via Responder / BodyWriter (writer.rs)
//!     → service resolves, hyper writes the response
//! ```
//!
//! # Design Decisions
//! - The transport owns HTTP parsing and keep-alive (hyper); this crate only
//!   carries parsed requests across the push/pull boundary
//! - A request whose pair is dropped unanswered gets 500; a request pushed
//!   after shutdown gets 503 — never a silent drop

pub mod pair;
pub mod server;
pub mod writer;

pub use pair::{RequestId, RequestPair, RespondError, Responder};
pub use server::{Server, ServerHandle};
pub use writer::{BodyWriter, ResponseBody, WriteError};
