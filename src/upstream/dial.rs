//! DNS over TLS connection dialing.
//!
//! Each call picks one provider and one of its addresses uniformly at
//! random, so load spreads across equally configured upstreams and no single
//! address is a stable blocking target. A TCP connect failure falls back to
//! plaintext UDP on port 53 against the configured fallback providers; a TLS
//! handshake failure does not, since a tampered TLS path must never degrade
//! the channel silently.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::exchange::Connection;
use super::{UpstreamError, UpstreamSelection};
use crate::provider::Provider;

const PLAIN_DNS_PORT: u16 = 53;

/// Produces one encrypted upstream connection per call.
pub struct Dialer {
    selection: UpstreamSelection,
    tls_config: Arc<ClientConfig>,
}

impl Dialer {
    pub fn new(selection: UpstreamSelection) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        // rustls refuses anything below TLS 1.2 with this configuration.
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            selection,
            tls_config: Arc::new(tls_config),
        }
    }

    pub fn selection(&self) -> &UpstreamSelection {
        &self.selection
    }

    /// Opens one upstream connection.
    ///
    /// TCP connect and TLS handshake are each bounded by the configured
    /// timeout. Only the TCP step may divert to the plaintext fallback.
    pub async fn dial(&self) -> super::Result<Connection> {
        let provider = pick(&self.selection.providers)?;
        let ip = pick_ip(provider, self.selection.ipv6)?;
        let addr = SocketAddr::new(ip, provider.dot_port);

        let tcp = match timeout(self.selection.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return self.dial_fallback(&err.to_string()).await,
            Err(_) => return self.dial_fallback("TCP connect timed out").await,
        };

        let server_name = ServerName::try_from(provider.tls_name)
            .map_err(|err| UpstreamError::Dial(format!("invalid TLS name: {}", err)))?;
        let connector = TlsConnector::from(Arc::clone(&self.tls_config));
        match timeout(self.selection.timeout, connector.connect(server_name, tcp)).await {
            Ok(Ok(stream)) => Ok(Connection::Tls(Box::new(stream))),
            Ok(Err(err)) => Err(UpstreamError::Dial(format!(
                "TLS handshake with {} failed: {}",
                provider.name, err
            ))),
            Err(_) => Err(UpstreamError::Dial(format!(
                "TLS handshake with {} timed out",
                provider.name
            ))),
        }
    }

    async fn dial_fallback(&self, reason: &str) -> super::Result<Connection> {
        if self.selection.fallback.is_empty() {
            return Err(UpstreamError::Dial(format!(
                "TCP connect failed ({}) and no plaintext fallback is configured",
                reason
            )));
        }
        log::warn!(
            "DoT TCP connect failed ({}), falling back to plaintext DNS",
            reason
        );

        let provider = pick(&self.selection.fallback)?;
        let ip = pick_ip(provider, self.selection.ipv6)?;
        let local: SocketAddr = if ip.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await.map_err(|err| {
            UpstreamError::Dial(format!("cannot bind UDP fallback socket: {}", err))
        })?;
        socket
            .connect(SocketAddr::new(ip, PLAIN_DNS_PORT))
            .await
            .map_err(|err| UpstreamError::Dial(format!("UDP fallback connect failed: {}", err)))?;
        Ok(Connection::Udp(socket))
    }
}

fn pick(providers: &[&'static Provider]) -> super::Result<&'static Provider> {
    providers
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| UpstreamError::Dial("no upstream provider configured".to_string()))
}

fn pick_ip(provider: &'static Provider, ipv6: bool) -> super::Result<IpAddr> {
    let pool = candidate_ips(provider, ipv6);
    pool.choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| {
            UpstreamError::Dial(format!("provider {} has no usable address", provider.id))
        })
}

/// Address pool for one provider: IPv4 always, IPv6 only when allowed.
fn candidate_ips(provider: &'static Provider, ipv6: bool) -> Vec<IpAddr> {
    let mut pool: Vec<IpAddr> = provider.ipv4.iter().copied().map(IpAddr::V4).collect();
    if ipv6 {
        pool.extend(provider.ipv6.iter().copied().map(IpAddr::V6));
    }
    pool
}
