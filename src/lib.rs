//! serveloop — pull-based sequential request handling over an
//! event-driven HTTP transport.
//!
//! hyper delivers requests as callbacks, one service invocation per
//! request. This crate turns that into a sequence the application pulls
//! from, so request handling is a plain loop:
//!
//! ```ignore
//! let server = Server::bind(&ServerConfig::default()).await?;
//! let mut incoming = server.start();
//! while let Some(item) = incoming.next().await {
//!     if let SequenceItem::Pair(pair) = item {
//!         let path = pair.path().to_string();
//!         pair.end(StatusCode::OK, path)?;
//!     }
//! }
//! ```
//!
//! # Architecture Overview
//!
//! ```text
//!  Client ──TCP──▶ net::Listener ──▶ http::server (hyper) ─┐ push(pair)
//!                                                          ▼
//!                                            sequence::RequestSequencer
//!                                            FIFO queue + waiting-consumer
//!                                                          │ advance()
//!                                                          ▼
//!  Client ◀──response── Responder / BodyWriter ◀── sequence::Incoming
//!                                                    (consumer loop)
//! ```
//!
//! Requests arriving faster than they are consumed queue up in arrival
//! order; a consumer asking before anything has arrived suspends until the
//! next request. Dropping the sequence mid-iteration shuts the transport
//! down and rejects whatever was still queued.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod sequence;

pub use config::{load_config, ServerConfig};
pub use http::{BodyWriter, RequestPair, Responder, Server, ServerHandle};
pub use sequence::{CloseReason, Incoming, SequenceFault, SequenceItem, SequenceState};
