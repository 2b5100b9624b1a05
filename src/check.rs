//! Connectivity self test against the loopback listener.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::TokioResolver;

const CHECK_HOSTNAME: &str = "github.com.";
const ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum CheckError {
    Resolve(String),
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve(msg) => write!(f, "cannot resolve {}: {}", CHECK_HOSTNAME, msg),
        }
    }
}

impl std::error::Error for CheckError {}

/// Resolves a well known hostname through the server at `addr`, retrying a
/// few times while the listener warms up. Used as a gate before a freshly
/// started server is considered healthy.
pub async fn wait_for_dns(addr: SocketAddr) -> Result<(), CheckError> {
    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
    let resolver =
        TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build();

    let mut attempt = 1;
    loop {
        match resolver.lookup_ip(CHECK_HOSTNAME).await {
            Ok(_) => {
                log::info!("DNS self check succeeded after {} attempt(s)", attempt);
                return Ok(());
            }
            Err(err) if attempt < ATTEMPTS => {
                log::debug!("DNS self check attempt {} failed: {}", attempt, err);
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => return Err(CheckError::Resolve(err.to_string())),
        }
    }
}
