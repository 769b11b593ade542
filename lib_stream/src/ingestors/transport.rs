//! # Stream Transport
//!
//! Abstraction over "open the filtered stream and hand me the body as byte chunks".
//! The production implementation issues a bearer-authenticated HTTP GET with
//! `reqwest`; tests plug in scripted transports.
//!
//! Errors are classified here so the session can tell a connection that dropped
//! mid-body (`ConnectionReset`, recoverable, ends the session normally) from a
//! failure to get a usable response at all.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

/// Body of one open stream: byte chunks in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Failures of the streaming transport. All of them are recoverable from the
/// controller's point of view.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream endpoint answered with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connection reset while reading the stream: {0}")]
    ConnectionReset(String),

    #[error("stream read timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// `true` when the body terminated unexpectedly after the response started.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, StreamError::ConnectionReset(_))
    }

    /// Maps an error raised while sending the request.
    pub fn from_request(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StreamError::Timeout(e.to_string())
        } else if e.is_connect() {
            StreamError::Connect(e.to_string())
        } else {
            StreamError::Transport(e.to_string())
        }
    }

    /// Maps an error raised while reading the response body.
    pub fn from_body(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StreamError::Timeout(e.to_string())
        } else {
            StreamError::ConnectionReset(e.to_string())
        }
    }
}

/// Opens one streaming connection.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Human-readable endpoint, used in logs.
    fn endpoint(&self) -> &str;

    /// Connects and returns the response body. Non-2xx answers are errors.
    async fn open(&self) -> Result<ByteStream, StreamError>;
}

/// Timeouts applied to the HTTP streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    /// Upper bound on establishing the TCP/TLS connection.
    pub connect: Duration,
    /// Upper bound on a single body read. The server sends heartbeats well within
    /// this, so hitting it means the connection is dead.
    pub read: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
        }
    }
}

/// # HTTP Stream Transport
///
/// `GET <url>` with `Authorization: Bearer <token>`, body streamed chunk by chunk.
/// The underlying `reqwest::Client` is reused across reconnects.
pub struct HttpStreamTransport {
    client: reqwest::Client,
    url: String,
    bearer: String,
}

impl HttpStreamTransport {
    pub fn new(
        url: impl Into<String>,
        bearer: impl Into<String>,
        timeouts: TransportTimeouts,
    ) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lib_stream/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            bearer: bearer.into(),
        })
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<ByteStream, StreamError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.bearer)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(StreamError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StreamError::from_body))
            .boxed())
    }
}
