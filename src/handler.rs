//! The forwarding core, one call per client query.
//!
//! A query runs through four strictly sequential phases: dial and exchange
//! with the upstream resolver, extraction of the answer signature, DNSSEC
//! chain validation, and the block list check on the answered addresses.
//! The connection used for the exchange is owned by the transport and is
//! closed before the exchange returns, on every path.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use hickory_proto::op::Message;
use hickory_proto::rr::RData;

use crate::blocklist::Snapshot;
use crate::dnssec::{self, AuthenticationChain, DnssecError};
use crate::upstream::{Exchanger, UpstreamError};

/// What the server should send back to the client.
#[derive(Debug)]
pub enum Outcome {
    /// Forward the upstream response unchanged.
    Answer(Message),
    /// The question or the answer hit the block list; refuse with NXDOMAIN.
    Blocked,
}

#[derive(Debug)]
pub enum ForwardError {
    Upstream(UpstreamError),
    Dnssec(DnssecError),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream(err) => write!(f, "{}", err),
            Self::Dnssec(err) => write!(f, "DNSSEC validation failed: {}", err),
        }
    }
}

impl std::error::Error for ForwardError {}

impl From<UpstreamError> for ForwardError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}

impl From<DnssecError> for ForwardError {
    fn from(err: DnssecError) -> Self {
        Self::Dnssec(err)
    }
}

pub struct Forwarder {
    exchanger: Arc<dyn Exchanger>,
    blocklist: Arc<Snapshot>,
    now: fn() -> SystemTime,
}

impl Forwarder {
    pub fn new(exchanger: Arc<dyn Exchanger>, blocklist: Arc<Snapshot>) -> Self {
        Self {
            exchanger,
            blocklist,
            now: SystemTime::now,
        }
    }

    /// Clock override for the RRSIG validity windows.
    pub fn with_time_source(mut self, now: fn() -> SystemTime) -> Self {
        self.now = now;
        self
    }

    /// Resolves one client query against the upstream.
    ///
    /// Unsigned answers are forwarded as they arrived. Signed answers are
    /// forwarded only after the whole chain of trust has been populated and
    /// verified; any failure along the way surfaces as an error which the
    /// server front-end turns into SERVFAIL.
    pub async fn forward(&self, mut query: Message) -> Result<Outcome, ForwardError> {
        if let Some(question) = query.queries().first() {
            let name = question.name().to_string();
            if self.blocklist.blocks_hostname(&name) {
                log::info!("refusing query for blocked hostname {}", name);
                return Ok(Outcome::Blocked);
            }
        }

        dnssec::with_dnssec(&mut query);
        let response = self.exchanger.exchange(query).await?;

        let (rrsig, rrset) = dnssec::extract_rrsig(&response)?;
        match rrsig {
            None => {
                // Not signed with DNSSEC, forwarded as is.
                // TODO strict mode: refuse unsigned answers once the
                // BADSIG-style response path is settled.
            }
            Some(rrsig) => {
                let signer = rrsig.signer_name().clone();
                let mut chain = AuthenticationChain::new(Arc::clone(&self.exchanger))
                    .with_time_source(self.now);
                chain.populate(&signer).await?;
                chain.verify(&rrsig, &rrset)?;
            }
        }

        if let Some(blocked) = self.blocked_answer_address(&response) {
            log::info!("refusing response carrying blocked address {}", blocked);
            return Ok(Outcome::Blocked);
        }
        Ok(Outcome::Answer(response))
    }

    fn blocked_answer_address(&self, response: &Message) -> Option<IpAddr> {
        response.answers().iter().find_map(|record| {
            let ip = match record.data() {
                RData::A(a) => IpAddr::V4(a.0),
                RData::AAAA(aaaa) => IpAddr::V6(aaaa.0),
                _ => return None,
            };
            self.blocklist.blocks_ip(ip).then_some(ip)
        })
    }
}
