//! Outbound transport for target dispatch and reply forwarding.
//!
//! The [`Transport`] seam hides the HTTP client from the delivery engine and
//! reports whether a response carried a reply as a tagged [`Reply`], so the
//! engine never inspects response headers itself.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cebroker_core::{Encoding, Message, Transformer};
use http::StatusCode;

use crate::config::{TransportConfig, DEFAULT_MAX_RESPONSE_BYTES};
use crate::error::TransportError;

/// Reply embedded in a dispatch response.
#[derive(Debug)]
pub enum Reply {
    /// The response carried no CloudEvents encoding.
    None,
    /// The response is itself an event, in its original wire form.
    Message(Message),
}

/// Outcome of a single send.
#[derive(Debug)]
pub struct DispatchResponse {
    pub status: StatusCode,
    /// Only populated for 2xx responses.
    pub reply: Reply,
}

/// Sends an event message to an address.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POSTs `message` to `address`, applying `transformers` at send time.
    ///
    /// Any HTTP status is returned as `Ok`; only failures to obtain a response
    /// are errors.
    async fn send(
        &self,
        address: &str,
        message: Message,
        transformers: &[&dyn Transformer],
    ) -> Result<DispatchResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// [`Transport`] over a shared `reqwest` client.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::default())
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the TLS backend cannot be initialized.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self::new(client).with_max_response_bytes(config.max_response_bytes))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        address: &str,
        message: Message,
        transformers: &[&dyn Transformer],
    ) -> Result<DispatchResponse, TransportError> {
        let url = reqwest::Url::parse(address).map_err(|_| TransportError::InvalidAddress {
            address: address.to_string(),
        })?;
        let (headers, body) = message.transformed(transformers)?.into_parts();

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(address, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        // The body is read in full so the connection returns to the pool.
        let body = self.read_body(address, response).await?;

        let reply = if status.is_success() {
            let message = Message::new(headers, body);
            match message.read_encoding() {
                Encoding::Unknown => Reply::None,
                _ => Reply::Message(message),
            }
        } else {
            Reply::None
        };

        Ok(DispatchResponse { status, reply })
    }
}

impl HttpTransport {
    async fn read_body(&self, address: &str, mut response: reqwest::Response) -> Result<Bytes, TransportError> {
        let too_large = || TransportError::ResponseTooLarge {
            address: address.to_string(),
            limit: self.max_response_bytes,
        };
        let declared = response.content_length().unwrap_or(0);
        if usize::try_from(declared).map_or(true, |len| len > self.max_response_bytes) {
            return Err(too_large());
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(address, e))? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

fn classify(address: &str, err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::Connect {
            address: address.to_string(),
            reason: err.to_string(),
        }
    } else if err.is_timeout() {
        TransportError::Timeout {
            address: address.to_string(),
        }
    } else {
        TransportError::Request {
            address: address.to_string(),
            cause: err,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
