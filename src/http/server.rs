//! Server setup and the accept loop.
//!
//! # Responsibilities
//! - Bind the bounded listener and accept connections
//! - Serve each connection with hyper (HTTP/1.1 and HTTP/2)
//! - Build a `RequestPair` per request and push it into the sequencer
//! - Close the sequencer when the transport stops, propagate consumer
//!   cancellation back into the accept loop
//!
//! # Design Decisions
//! - Requests pushed after shutdown are answered 503 here, never dropped
//! - Connection-level errors are reported in-band as sequence faults;
//!   an accept failure closes the whole transport
//! - Live connections are left to finish on their own after shutdown;
//!   their late requests get 503

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming as IncomingBody;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::http::pair::RequestPair;
use crate::http::writer::{self, ResponseBody};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{ConnectionPermit, Listener, ListenerError};
use crate::sequence::{CloseReason, Incoming, PushError, RequestSequencer, SequenceFault};

/// An HTTP server whose requests are consumed as a pull-based sequence.
pub struct Server {
    listener: Listener,
    sequencer: Arc<RequestSequencer>,
    shutdown: Shutdown,
}

impl Server {
    /// Bind the listener. No connections are accepted until
    /// [`start`](Server::start).
    pub async fn bind(config: &ServerConfig) -> Result<Self, ListenerError> {
        let listener = Listener::bind(&config.listener).await?;
        let shutdown = Shutdown::new();
        let sequencer = Arc::new(RequestSequencer::new(&config.queue, shutdown.clone()));
        Ok(Self {
            listener,
            sequencer,
            shutdown,
        })
    }

    /// The local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// A handle for stopping the server from outside the consuming loop.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Start accepting connections and return the request sequence.
    pub fn start(self) -> Incoming {
        let signal = self.shutdown.subscribe();
        tokio::spawn(accept_loop(
            self.listener,
            Arc::clone(&self.sequencer),
            signal,
        ));
        Incoming::new(self.sequencer)
    }
}

/// Stops the server's transport; the sequence then drains and ends.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Shutdown,
}

impl ServerHandle {
    /// Stop accepting connections. Queued requests remain available to the
    /// consumer until drained.
    pub fn stop(&self) {
        self.shutdown.trigger(CloseReason::TransportClosed);
    }
}

async fn accept_loop(
    listener: Listener,
    sequencer: Arc<RequestSequencer>,
    mut signal: ShutdownSignal,
) {
    loop {
        tokio::select! {
            reason = signal.triggered() => {
                tracing::info!(reason = %reason, "accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr, permit)) => {
                    tokio::spawn(serve_connection(
                        stream,
                        peer_addr,
                        permit,
                        Arc::clone(&sequencer),
                    ));
                }
                Err(error) => {
                    tracing::error!(%error, "accept failed, stopping transport");
                    sequencer.close(CloseReason::TransportFailed(error.to_string()));
                    return;
                }
            },
        }
    }
    sequencer.close(CloseReason::TransportClosed);
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    permit: ConnectionPermit,
    sequencer: Arc<RequestSequencer>,
) {
    let io = TokioIo::new(stream);
    let service = service_fn({
        let sequencer = Arc::clone(&sequencer);
        move |request: Request<IncomingBody>| {
            let sequencer = Arc::clone(&sequencer);
            async move { Ok::<_, Infallible>(handle_request(sequencer, request).await) }
        }
    });

    if let Err(error) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        tracing::debug!(peer_addr = %peer_addr, error = %error, "connection ended with error");
        sequencer.report_fault(SequenceFault::Connection(error.to_string()));
    }
    drop(permit);
}

/// One transport event: build the pair, push it, await the consumer's
/// response.
async fn handle_request(
    sequencer: Arc<RequestSequencer>,
    request: Request<IncomingBody>,
) -> Response<ResponseBody> {
    let (pair, response_rx) = RequestPair::new(request);
    let request_id = pair.id();

    match sequencer.push(pair) {
        Ok(()) => match response_rx.await {
            Ok(response) => {
                tracing::trace!(request_id = %request_id, status = %response.status(), "response ready");
                response
            }
            Err(_) => {
                // The consumer dropped the pair without answering it.
                tracing::warn!(request_id = %request_id, "request dropped without a response");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        Err(PushError::SequenceClosed { pair }) => {
            tracing::debug!(request_id = %pair.id(), "request arrived after shutdown, rejecting");
            status_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn status_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(writer::empty());
    *response.status_mut() = status;
    response
}
