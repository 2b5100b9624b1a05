//! Encrypted upstream transports.
//!
//! The forwarder talks to its upstream resolvers over one of two encrypted
//! channels, selected once at construction time: DNS over TLS (a fresh TLS
//! connection per exchange, with an optional plaintext UDP fallback) or DNS
//! over HTTPS (wire-format POST requests). Both are driven through the
//! [`Exchanger`] trait so the request handler and the DNSSEC chain populator
//! stay transport agnostic.

pub mod dial;
pub mod doh;
pub mod exchange;

use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::provider::Provider;

/// Upstream servers one forwarding server instance is allowed to use.
///
/// The provider sequence is non-empty and fixed for the lifetime of the
/// server instance; the fallback sequence may be empty, which disables the
/// plaintext escape hatch entirely.
#[derive(Debug, Clone)]
pub struct UpstreamSelection {
    pub providers: Vec<&'static Provider>,
    pub fallback: Vec<&'static Provider>,
    pub ipv6: bool,
    pub timeout: Duration,
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Failures of the upstream transports.
#[derive(Debug)]
pub enum UpstreamError {
    /// No upstream connection could be established, including fallback.
    Dial(String),
    Io(std::io::Error),
    Proto(hickory_proto::ProtoError),
    /// DoH endpoint answered with a non-200 status.
    HttpStatus(reqwest::StatusCode),
    Http(reqwest::Error),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dial(msg) => write!(f, "cannot dial upstream: {}", msg),
            Self::Io(err) => write!(f, "upstream I/O error: {}", err),
            Self::Proto(err) => write!(f, "DNS wire format error: {}", err),
            Self::HttpStatus(status) => write!(f, "bad HTTP status from DoH endpoint: {}", status),
            Self::Http(err) => write!(f, "DoH request failed: {}", err),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<std::io::Error> for UpstreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<hickory_proto::ProtoError> for UpstreamError {
    fn from(err: hickory_proto::ProtoError) -> Self {
        Self::Proto(err)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

/// One round trip to an upstream resolver.
///
/// Implementations own connection management: a call acquires whatever
/// transport resources it needs and releases them before returning, on
/// success and on failure alike.
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(&self, query: Message) -> Result<Message>;
}

/// The transport picked at server construction time.
pub enum Transport {
    Dot(dial::Dialer),
    Doh(doh::DohClient),
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dot(_) => "DoT",
            Self::Doh(_) => "DoH",
        }
    }
}

#[async_trait]
impl Exchanger for Transport {
    async fn exchange(&self, query: Message) -> Result<Message> {
        match self {
            Self::Dot(dialer) => {
                let mut connection = dialer.dial().await?;
                let response = connection.exchange(&query).await;
                // One connection per exchange, closed right away.
                drop(connection);
                response
            }
            Self::Doh(client) => client.exchange(&query).await,
        }
    }
}
