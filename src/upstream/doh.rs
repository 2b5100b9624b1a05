//! DNS over HTTPS transport.
//!
//! Queries are POSTed in DNS wire format (RFC 8484) to the provider's HTTPS
//! endpoint. The endpoint hostnames are pinned to the catalog addresses at
//! client construction time, so no plaintext bootstrap lookup ever happens.
//! Request serialization runs through a pool of fixed 512 byte buffers, the
//! DNS wire packet maximum, released again on every exit path.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use rand::seq::SliceRandom;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};

use super::UpstreamError;
use crate::provider::Provider;

const DOH_CONTENT_TYPE: &str = "application/dns-udpwireformat";
const DNS_PACKET_MAX_SIZE: usize = 512;
const HTTPS_PORT: u16 = 443;

pub struct DohClient {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    buffer_pool: BufferPool,
}

impl DohClient {
    pub fn new(providers: &[&'static Provider], timeout: Duration) -> super::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        let mut endpoints = Vec::with_capacity(providers.len());

        for provider in providers {
            let url = Url::parse(provider.doh_url).map_err(|err| {
                UpstreamError::Dial(format!("invalid DoH URL {}: {}", provider.doh_url, err))
            })?;
            let host = url.host_str().ok_or_else(|| {
                UpstreamError::Dial(format!("DoH URL {} has no host", provider.doh_url))
            })?;

            let mut addrs: Vec<SocketAddr> = provider
                .ipv4
                .iter()
                .map(|ip| SocketAddr::new((*ip).into(), HTTPS_PORT))
                .collect();
            addrs.extend(
                provider
                    .ipv6
                    .iter()
                    .map(|ip| SocketAddr::new((*ip).into(), HTTPS_PORT)),
            );
            builder = builder.resolve_to_addrs(host, &addrs);
            endpoints.push(url);
        }

        Ok(Self {
            client: builder.build()?,
            endpoints,
            buffer_pool: BufferPool::new(),
        })
    }

    pub async fn exchange(&self, query: &Message) -> super::Result<Message> {
        let url = self
            .endpoints
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| UpstreamError::Dial("no DoH provider configured".to_string()))?;

        let mut buffer = self.buffer_pool.acquire();
        {
            let mut encoder = BinEncoder::new(&mut buffer);
            query.emit(&mut encoder)?;
        }

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, DOH_CONTENT_TYPE)
            .body(buffer.to_vec())
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(UpstreamError::HttpStatus(response.status()));
        }

        let body = response.bytes().await?;
        Ok(Message::from_vec(&body)?)
    }
}

/// Pool of reusable wire buffers for request bodies.
struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> PooledBuffer<'_> {
        let mut buffer = self
            .buffers
            .lock()
            .expect("buffer pool lock poisoned")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(DNS_PACKET_MAX_SIZE));
        buffer.clear();
        PooledBuffer { pool: self, buffer }
    }

    fn release(&self, buffer: Vec<u8>) {
        self.buffers
            .lock()
            .expect("buffer pool lock poisoned")
            .push(buffer);
    }
}

/// Scoped pool loan, returned on drop so every exit path gives it back.
struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Vec<u8>,
}

impl std::ops::Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::resolve;

    #[test]
    fn pooled_buffers_are_reused() {
        let pool = BufferPool::new();
        {
            let mut buffer = pool.acquire();
            buffer.extend_from_slice(b"query bytes");
        }
        assert_eq!(pool.buffers.lock().unwrap().len(), 1);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= DNS_PACKET_MAX_SIZE);
        drop(buffer);
        assert_eq!(pool.buffers.lock().unwrap().len(), 1);
    }

    #[test]
    fn client_accepts_catalog_providers() {
        let providers = [resolve("cloudflare").unwrap(), resolve("quad9").unwrap()];
        let client = DohClient::new(&providers, Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoints.len(), 2);
        assert_eq!(client.endpoints[0].scheme(), "https");
    }
}
