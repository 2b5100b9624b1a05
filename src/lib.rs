//! Local recursive forwarding DNS server.
//!
//! Listens on loopback UDP and TCP, forwards every query to upstream
//! resolvers over an encrypted channel (DNS over TLS or DNS over HTTPS),
//! validates signed answers against the DNSSEC chain of trust, and refuses
//! names and addresses on the configured block lists. A supervisor
//! periodically rebuilds the block list snapshot and rolls the server.

/// Block list building and matching.
pub mod blocklist;
/// Loopback connectivity self test.
pub mod check;
/// Command line and environment configuration.
pub mod config;
/// Server lifecycle supervision and periodic rebuilds.
pub mod controller;
/// DNSSEC authentication chain validation.
pub mod dnssec;
/// The per-query forwarding pipeline.
pub mod handler;
/// Static upstream provider catalog.
pub mod provider;
/// The DNS server front-end.
pub mod server;
/// Encrypted upstream transports and dialing.
pub mod upstream;
