use std::sync::Arc;
use std::time::SystemTime;

use hickory_proto::dnssec::rdata::RRSIG;
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};

use super::errors::{DnssecError, Result};
use super::response::extract_rrsig;
use super::signed_zone::SignedZone;
use crate::upstream::Exchanger;

/// The DNSSEC chain of trust from a queried zone up to the root zone.
///
/// The chain is stored as a contiguous sequence: index 0 is the signing
/// zone of the answer under validation, each following entry is one label
/// closer to the root, and the last entry is the root itself. The parent of
/// `chain[i]` is `chain[i + 1]`; the chain is linear, so no back pointers
/// are needed.
///
/// Validation happens in two phases. [`populate`](Self::populate) walks the
/// signer name label by label and fetches the DNSKEY and DS RRsets of every
/// zone on the way to the root. [`verify`](Self::verify) then checks, per
/// zone, the DNSKEY self-signature, the DS signature against the parent
/// zone's keys, and the DS to DNSKEY digest binding, in addition to the
/// answer signature itself.
///
/// https://www.ietf.org/rfc/rfc4033.txt
pub struct AuthenticationChain {
    exchanger: Arc<dyn Exchanger>,
    chain: Vec<SignedZone>,
    now: fn() -> SystemTime,
}

impl AuthenticationChain {
    pub fn new(exchanger: Arc<dyn Exchanger>) -> Self {
        Self {
            exchanger,
            chain: Vec::new(),
            now: SystemTime::now,
        }
    }

    /// Replaces the clock used for RRSIG validity windows, letting callers
    /// pin the present to a fixed instant.
    pub fn with_time_source(mut self, now: fn() -> SystemTime) -> Self {
        self.now = now;
        self
    }

    /// Number of zones fetched so far.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Zone names in chain order, starting at the signer.
    pub fn zones(&self) -> impl Iterator<Item = &Name> {
        self.chain.iter().map(SignedZone::zone)
    }

    /// Fetches the RRs required for validation, starting at the `signer`
    /// zone and walking up the delegation tree to the root.
    ///
    /// DNSKEY and DS are queried concurrently for each zone. Both must
    /// succeed, with one exception: the root has no parent, so a failed or
    /// empty DS answer there is tolerated.
    pub async fn populate(&mut self, signer: &Name) -> Result<()> {
        let label_count = signer.num_labels() as usize;
        self.chain = Vec::with_capacity(label_count + 1);

        for labels_kept in (0..=label_count).rev() {
            let zone = if labels_kept == 0 {
                Name::root()
            } else {
                signer.trim_to(labels_kept)
            };
            let node = self.query_delegation(zone, labels_kept == 0).await?;
            self.chain.push(node);
        }
        Ok(())
    }

    /// Fetches the DS and DNSKEY records of one zone.
    async fn query_delegation(&self, zone: Name, is_root: bool) -> Result<SignedZone> {
        let (dnskey, ds) = tokio::join!(
            self.query_rrset(&zone, RecordType::DNSKEY),
            self.query_rrset(&zone, RecordType::DS),
        );

        let (dnskey_rrsig, dnskey_rrset) = dnskey?;
        let (ds_rrsig, ds_rrset) = match ds {
            Ok(pair) => pair,
            Err(err) if is_root => {
                log::debug!("ignoring DS lookup failure at the root: {}", err);
                (None, Vec::new())
            }
            Err(err) => return Err(err),
        };

        Ok(SignedZone::new(
            zone,
            dnskey_rrsig,
            ds_rrsig,
            dnskey_rrset,
            ds_rrset,
        ))
    }

    async fn query_rrset(
        &self,
        zone: &Name,
        record_type: RecordType,
    ) -> Result<(Option<RRSIG>, Vec<Record>)> {
        let mut message = Message::new();
        message.set_id(rand::random());
        message.set_message_type(MessageType::Query);
        message.add_query(Query::query(zone.clone(), record_type));
        super::request::with_dnssec(&mut message);

        let response = self
            .exchanger
            .exchange(message)
            .await
            .map_err(|source| DnssecError::Populate {
                zone: zone.clone(),
                source,
            })?;

        match response.response_code() {
            ResponseCode::NoError => {}
            ResponseCode::NXDomain => return Err(DnssecError::NoResult(zone.clone())),
            rcode => {
                return Err(DnssecError::BadRcode {
                    zone: zone.clone(),
                    rcode,
                })
            }
        }

        extract_rrsig(&response)
    }

    /// Validates the populated chain of trust against the answer signature.
    ///
    /// Starts with the RRSIG supplied as parameter, verified with the keys
    /// of the signing zone, then walks the whole chain: every zone must
    /// publish DNSKEYs, the DNSKEY RRset must verify against its own RRSIG,
    /// and every non-root zone must bind to its parent through a DS record
    /// whose signature verifies under the parent keys and whose digest
    /// matches one of the zone's DNSKEYs.
    pub fn verify(&self, rrsig: &RRSIG, rrset: &[Record]) -> Result<()> {
        let now = (self.now)();

        let signer_zone = self
            .chain
            .first()
            .ok_or_else(|| DnssecError::NoDnsKey(Name::root()))?;
        if !signer_zone.has_dnskeys() {
            return Err(DnssecError::NoDnsKey(signer_zone.zone().clone()));
        }
        signer_zone.verify_rrsig(rrsig, rrset, now)?;

        for (index, zone) in self.chain.iter().enumerate() {
            if !zone.has_dnskeys() {
                return Err(DnssecError::NoDnsKey(zone.zone().clone()));
            }
            let dnskey_rrsig = zone
                .dnskey_rrsig()
                .ok_or_else(|| DnssecError::DnskeyNotAvailable(zone.zone().clone()))?;
            zone.verify_rrsig(dnskey_rrsig, zone.dnskey_rrset(), now)?;

            let Some(parent) = self.chain.get(index + 1) else {
                // Terminal node, nothing to delegate from.
                continue;
            };

            if zone.ds_rrset().is_empty() {
                return Err(DnssecError::DsNotAvailable(zone.zone().clone()));
            }
            let ds_rrsig = zone
                .ds_rrsig()
                .ok_or_else(|| DnssecError::DsNotAvailable(zone.zone().clone()))?;
            parent
                .verify_rrsig(ds_rrsig, zone.ds_rrset(), now)
                .map_err(|_| DnssecError::RrsigValidation {
                    zone: zone.zone().clone(),
                    key_tag: ds_rrsig.key_tag(),
                })?;

            zone.verify_ds()?;
        }
        Ok(())
    }
}
