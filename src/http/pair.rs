//! One inbound request and its response capability.
//!
//! # Responsibilities
//! - Carry request metadata (method, target, headers) and the request body
//!   across the push/pull boundary, opaque to the sequencer
//! - Expose the response capability: one-shot, full-control, or streaming
//! - Generate a unique request ID for tracing correlation
//!
//! # Design Decisions
//! - The responder is a oneshot the transport service awaits; responding is
//!   a plain send, so it is safe from any task
//! - A pair abandoned before delivery is rejected with a status rather than
//!   left for the peer to time out

use std::time::Instant;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming as IncomingBody;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::http::writer::{self, BodyWriter, ResponseBody};

/// Unique identifier for one request, used in log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error responding to a request.
#[derive(Debug, Error)]
pub enum RespondError {
    /// The connection went away before the response could be sent.
    #[error("connection closed before the response could be sent")]
    ConnectionClosed,
}

/// One inbound request plus the capability to answer it.
///
/// Created by the transport when a request arrives, delivered to the
/// consumer through the sequence. The consumer must eventually respond;
/// a pair dropped unanswered makes the transport send 500 for it.
pub struct RequestPair {
    id: RequestId,
    received_at: Instant,
    head: Parts,
    body: Option<IncomingBody>,
    responder: Responder,
}

impl RequestPair {
    /// Build a pair from a transport request. Returns the receiver the
    /// transport service awaits for the response.
    pub(crate) fn new(
        request: Request<IncomingBody>,
    ) -> (Self, oneshot::Receiver<Response<ResponseBody>>) {
        let id = RequestId::new();
        let (responder, rx) = Responder::channel(id);
        let (head, body) = request.into_parts();
        let pair = Self {
            id,
            received_at: Instant::now(),
            head,
            body: Some(body),
            responder,
        };
        (pair, rx)
    }

    /// This request's unique ID.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// When the transport handed this request over.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// The request target path.
    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Take the request body stream. Returns `None` once taken.
    pub fn take_body(&mut self) -> Option<IncomingBody> {
        self.body.take()
    }

    /// Read the whole request body into one buffer. Empty if the body was
    /// already taken.
    pub async fn collect_body(&mut self) -> Result<Bytes, hyper::Error> {
        match self.body.take() {
            Some(body) => Ok(body.collect().await?.to_bytes()),
            None => Ok(Bytes::new()),
        }
    }

    /// Split into request head, body, and the response capability.
    pub fn into_parts(self) -> (Parts, Option<IncomingBody>, Responder) {
        (self.head, self.body, self.responder)
    }

    /// Respond with a complete response.
    pub fn respond(self, response: Response<ResponseBody>) -> Result<(), RespondError> {
        self.responder.respond(response)
    }

    /// Respond with a status and a complete body.
    pub fn end(self, status: StatusCode, body: impl Into<Bytes>) -> Result<(), RespondError> {
        self.responder.end(status, body)
    }

    /// Terminate an undelivered pair with the given status.
    pub(crate) fn reject(self, status: StatusCode) {
        tracing::debug!(request_id = %self.id, status = %status, "rejecting undelivered request");
        self.responder.reject(status);
    }
}

impl std::fmt::Debug for RequestPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPair")
            .field("id", &self.id)
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .finish_non_exhaustive()
    }
}

/// Capability to answer one request. Consumed on use.
#[derive(Debug)]
pub struct Responder {
    id: RequestId,
    tx: oneshot::Sender<Response<ResponseBody>>,
}

impl Responder {
    fn channel(id: RequestId) -> (Self, oneshot::Receiver<Response<ResponseBody>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, tx }, rx)
    }

    /// Send a complete response.
    pub fn respond(self, response: Response<ResponseBody>) -> Result<(), RespondError> {
        self.tx
            .send(response)
            .map_err(|_| RespondError::ConnectionClosed)
    }

    /// Send a status with a complete body.
    pub fn end(self, status: StatusCode, body: impl Into<Bytes>) -> Result<(), RespondError> {
        let mut response = Response::new(writer::full(body));
        *response.status_mut() = status;
        self.respond(response)
    }

    /// Send the status line and begin a streamed body.
    pub fn start(self, status: StatusCode) -> Result<BodyWriter, RespondError> {
        self.start_with(status, HeaderMap::new())
    }

    /// Send the status line and headers, then begin a streamed body.
    pub fn start_with(
        self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<BodyWriter, RespondError> {
        let (body_writer, body) = writer::channel(self.id);
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        self.respond(response)?;
        Ok(body_writer)
    }

    pub(crate) fn reject(self, status: StatusCode) {
        let mut response = Response::new(writer::empty());
        *response.status_mut() = status;
        let _ = self.tx.send(response);
    }
}

#[cfg(test)]
impl RequestPair {
    /// Build a detached pair for sequencer tests: no transport, no body.
    pub(crate) fn fake(
        method: Method,
        path: &str,
    ) -> (Self, oneshot::Receiver<Response<ResponseBody>>) {
        let id = RequestId::new();
        let (responder, rx) = Responder::channel(id);
        let (head, ()) = Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .expect("valid request")
            .into_parts();
        let pair = Self {
            id,
            received_at: Instant::now(),
            head,
            body: None,
            responder,
        };
        (pair, rx)
    }
}
