//! Client side of the broker wire protocol

use crate::broker::{EndCallReply, EndCallRequest, NegotiateRequest};
use crate::error::{BrokerError, Result};
use crate::negotiation::Decision;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::listener::frame_codec;
use super::message::{Request, RequestEnvelope, Response};

/// One connection to a broker server
pub struct BrokerClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    api_key: String,
    call_id: Option<String>,
}

impl BrokerClient {
    pub async fn connect(addr: &str, api_key: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BrokerError::NetworkConnection(e.to_string()))?;

        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
            api_key: api_key.into(),
            call_id: None,
        })
    }

    /// Tag every following request with a voice-platform call ID
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Send a request and wait for its reply body
    pub async fn call(&mut self, request: Request) -> Result<serde_json::Value> {
        let envelope = RequestEnvelope {
            api_key: self.api_key.clone(),
            call_id: self.call_id.clone(),
            request,
        };
        let payload = serde_json::to_vec(&envelope)?;
        self.send_raw(payload).await?;

        match self.recv_response().await? {
            Response::Ok { body } => Ok(body),
            Response::Error { code, detail } => Err(BrokerError::Remote { code, detail }),
        }
    }

    pub async fn call_as<T: DeserializeOwned>(&mut self, request: Request) -> Result<T> {
        let body = self.call(request).await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn negotiate_round(&mut self, request: NegotiateRequest) -> Result<Decision> {
        self.call_as(Request::NegotiateRound(request)).await
    }

    pub async fn end_call(&mut self, request: EndCallRequest) -> Result<EndCallReply> {
        self.call_as(Request::EndCall(request)).await
    }

    /// Write an arbitrary frame; used to probe server error handling
    pub async fn send_raw(&mut self, payload: Vec<u8>) -> Result<()> {
        self.framed
            .send(Bytes::from(payload))
            .await
            .map_err(|e| BrokerError::NetworkConnection(e.to_string()))
    }

    /// Read the next reply without interpreting it
    pub async fn recv_response(&mut self) -> Result<Response> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or_else(|| BrokerError::NetworkConnection("connection closed".to_string()))?
            .map_err(|e| BrokerError::NetworkConnection(e.to_string()))?;
        Ok(serde_json::from_slice(&frame)?)
    }
}
