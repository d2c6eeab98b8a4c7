//! Envelope delivery to peers.
//!
//! The coordinator only needs "send envelope to endpoint, get ack or
//! failure"; `HttpTransport` implements that as a JSON POST.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use mesh_protocol::AgentMessage;

use crate::{NetworkError, TransportError};

/// Delivers a single envelope to a peer's exchange URL.
///
/// One attempt per call; retries are not the transport's concern.
pub trait PeerTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        url: &'a str,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;
}

/// JSON-over-HTTP transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NetworkError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl PeerTransport for HttpTransport {
    fn send<'a>(
        &'a self,
        url: &'a str,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(url)
                .json(message)
                .send()
                .await?
                .error_for_status()?;
            // The ack body is informational; a 2xx status is what counts.
            Ok(response.json::<Value>().await.unwrap_or(Value::Null))
        })
    }
}
