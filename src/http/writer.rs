//! Response body construction.
//!
//! # Responsibilities
//! - Provide the boxed body type used for all responses
//! - One-shot bodies (`full`, `empty`) for simple handlers
//! - Chunked bodies fed through a channel for streaming handlers
//!
//! # Design Decisions
//! - Bodies are infallible: a handler that cannot produce its body closes
//!   the channel, which ends the response stream
//! - The body channel is bounded; writers await when hyper has not yet
//!   consumed earlier chunks

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::http::pair::RequestId;

/// Body type carried by every response this crate sends.
pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Chunks buffered between a `BodyWriter` and hyper before the writer waits.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// A complete body from a single buffer.
pub fn full(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into()).boxed()
}

/// An empty body.
pub fn empty() -> ResponseBody {
    Empty::new().boxed()
}

/// A channel-fed body plus the writer that feeds it.
pub(crate) fn channel(id: RequestId) -> (BodyWriter, ResponseBody) {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    (BodyWriter { id, tx }, ChannelBody { rx }.boxed())
}

/// Error writing a streamed response body.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The connection went away before the body was fully written.
    #[error("connection closed before the body was fully written")]
    ConnectionClosed,
}

/// Streaming writer for a response body.
///
/// Obtained from [`Responder::start`](crate::http::Responder::start) after
/// the status and headers have been sent. Dropping the writer ends the body.
#[derive(Debug)]
pub struct BodyWriter {
    id: RequestId,
    tx: mpsc::Sender<Frame<Bytes>>,
}

impl BodyWriter {
    /// Write one body chunk, waiting if the connection has not consumed
    /// earlier chunks yet.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), WriteError> {
        self.tx
            .send(Frame::data(chunk.into()))
            .await
            .map_err(|_| WriteError::ConnectionClosed)
    }

    /// Write an optional final chunk and end the body.
    pub async fn end(self, chunk: Option<Bytes>) -> Result<(), WriteError> {
        if let Some(chunk) = chunk {
            self.write(chunk).await?;
        }
        tracing::trace!(request_id = %self.id, "response body ended");
        Ok(())
    }
}

/// Body implementation backed by the writer's channel.
struct ChannelBody {
    rx: mpsc::Receiver<Frame<Bytes>>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.get_mut().rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}
