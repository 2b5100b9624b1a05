//! DNSSEC chain of trust validation.
//!
//! An answer carrying an RRSIG is only forwarded to the client after the
//! whole authentication chain, from the signing zone up to the root, has
//! been fetched and verified: the answer signature, each zone's DNSKEY
//! self-signature, the DS signature checked against the parent zone's keys,
//! and the DS to DNSKEY digest binding at every delegation.

pub mod chain;
pub mod errors;
pub mod request;
pub mod response;
mod signed_zone;

pub use chain::AuthenticationChain;
pub use errors::{DnssecError, Result};
pub use request::with_dnssec;
pub use response::extract_rrsig;

#[cfg(test)]
pub(crate) use signed_zone::test_support;
