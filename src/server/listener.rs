//! TCP listener serving broker requests over length-prefixed JSON frames

use crate::broker::{BrokerService, CallContext};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::message::{Request, RequestEnvelope, Response};

/// Largest frame accepted from a client
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// 4-byte big-endian length prefix, then the JSON payload
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Request server in front of a `BrokerService`
pub struct BrokerServer {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
}

struct RequestHandler {
    service: Arc<BrokerService>,
    api_key: String,
    request_timeout: Duration,
}

impl BrokerServer {
    /// Bind to the configured listen address
    pub async fn bind(config: &BrokerConfig, service: Arc<BrokerService>) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.listen_addr)
            .await
            .map_err(|e| BrokerError::NetworkConnection(e.to_string()))?;

        let handler = RequestHandler {
            service,
            api_key: config.auth.api_key.clone(),
            request_timeout: config.server.request_timeout(),
        };

        Ok(Self {
            listener,
            handler: Arc::new(handler),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| BrokerError::NetworkConnection(e.to_string()))
    }

    /// Run the server on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("Listening on {}", addr),
            Err(e) => tracing::warn!("Listening on unknown address: {}", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("New connection from {}", addr);
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handler.serve_connection(stream, addr).await {
                            tracing::debug!("Connection {} ended: {}", addr, e);
                        }
                        handler.release(addr).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

impl RequestHandler {
    async fn serve_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut framed = Framed::new(stream, frame_codec());
        let connection = addr.to_string();

        while let Some(frame) = framed.next().await {
            let frame = frame.map_err(|e| BrokerError::NetworkConnection(e.to_string()))?;
            tracing::debug!("Received {} bytes from {}", frame.len(), addr);

            let response = self.respond(&frame, &connection).await;
            let payload = serde_json::to_vec(&response)?;

            framed
                .send(Bytes::from(payload))
                .await
                .map_err(|e| BrokerError::NetworkConnection(e.to_string()))?;
        }

        Ok(())
    }

    async fn respond(&self, frame: &[u8], connection: &str) -> Response {
        let envelope: RequestEnvelope = match serde_json::from_slice(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Malformed frame from {}: {}", connection, e);
                return BrokerError::MalformedFrame(e.to_string()).into();
            }
        };

        if envelope.request.requires_auth() && envelope.api_key != self.api_key {
            tracing::warn!(
                "Rejected {} from {}: bad api key",
                envelope.request.op(),
                connection
            );
            return BrokerError::Unauthorized.into();
        }

        let op = envelope.request.op();
        let ctx = CallContext::new(envelope.call_id, connection);
        match self.dispatch(ctx, envelope.request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("{} from {} failed: {}", op, connection, e);
                e.into()
            }
        }
    }

    /// Untokened calls live as long as their connection
    async fn release(&self, addr: SocketAddr) {
        let service = self.service.clone();
        let connection = addr.to_string();
        if let Err(e) =
            tokio::task::spawn_blocking(move || service.release_connection(&connection)).await
        {
            tracing::warn!("Releasing calls of {} failed: {}", addr, e);
        }
    }

    /// Run the request off the async workers, bounded by the request timeout.
    ///
    /// A request that times out is not cancelled: its work still completes, so
    /// a negotiation round may be applied even though the caller saw a 504.
    async fn dispatch(&self, ctx: CallContext, request: Request) -> Result<Response> {
        let service = self.service.clone();
        let work = tokio::task::spawn_blocking(move || handle(&service, &ctx, request));

        match tokio::time::timeout(self.request_timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(BrokerError::Internal(join_error.to_string())),
            Err(_) => Err(BrokerError::Timeout(self.request_timeout.as_millis() as u64)),
        }
    }
}

fn handle(service: &BrokerService, ctx: &CallContext, request: Request) -> Result<Response> {
    let response = match request {
        Request::NegotiateRound(req) => Response::ok(&service.negotiate_round(ctx, &req)?),
        Request::EndCall(req) => Response::ok(&service.end_call(ctx, &req)),
        Request::CallSummary(req) => Response::ok(&service.record_summary(&req)),
        Request::GetLoad { load_id } => Response::ok(&service.load(&load_id)?),
        Request::SearchLoads(query) => {
            let results = service.search_loads(&query)?;
            Response::ok(&serde_json::json!({ "count": results.len(), "results": results }))
        }
        Request::SuggestLoads(query) => {
            let results = service.suggest_loads(&query)?;
            Response::ok(&serde_json::json!({ "count": results.len(), "results": results }))
        }
        Request::Health => Response::ok(&serde_json::json!({
            "ok": true,
            "loads": service.catalog().len(),
            "active_sessions": service.engine().active_sessions(),
        })),
    };
    Ok(response)
}
