use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hickory_proto::dnssec::rdata::{DNSSECRData, DNSKEY, DS, RRSIG};
use hickory_proto::dnssec::{DigestType, Verifier};
use hickory_proto::rr::{DNSClass, Name, RData, Record};

use super::errors::{DnssecError, Result};

/// One node of the authentication chain: a zone together with the records
/// needed to validate it and to bind it to its parent.
pub(crate) struct SignedZone {
    zone: Name,
    dnskey_rrsig: Option<RRSIG>,
    dnskey_rrset: Vec<Record>,
    ds_rrsig: Option<RRSIG>,
    ds_rrset: Vec<Record>,
    /// DNSKEY by key tag; on a tag collision the first key seen wins.
    pub_keys: HashMap<u16, DNSKEY>,
}

impl SignedZone {
    pub fn new(
        zone: Name,
        dnskey_rrsig: Option<RRSIG>,
        ds_rrsig: Option<RRSIG>,
        dnskey_rrset: Vec<Record>,
        ds_rrset: Vec<Record>,
    ) -> Self {
        let mut pub_keys = HashMap::with_capacity(dnskey_rrset.len());
        for record in &dnskey_rrset {
            if let RData::DNSSEC(DNSSECRData::DNSKEY(key)) = record.data() {
                if let Ok(tag) = key.calculate_key_tag() {
                    pub_keys.entry(tag).or_insert_with(|| key.clone());
                }
            }
        }
        Self {
            zone,
            dnskey_rrsig,
            dnskey_rrset,
            ds_rrsig,
            ds_rrset,
            pub_keys,
        }
    }

    pub fn zone(&self) -> &Name {
        &self.zone
    }

    pub fn has_dnskeys(&self) -> bool {
        !self.dnskey_rrset.is_empty()
    }

    pub fn dnskey_rrsig(&self) -> Option<&RRSIG> {
        self.dnskey_rrsig.as_ref()
    }

    pub fn dnskey_rrset(&self) -> &[Record] {
        &self.dnskey_rrset
    }

    pub fn ds_rrsig(&self) -> Option<&RRSIG> {
        self.ds_rrsig.as_ref()
    }

    pub fn ds_rrset(&self) -> &[Record] {
        &self.ds_rrset
    }

    /// Validates `rrsig` over `rrset` with this zone's keys: the key tag must
    /// resolve to a known DNSKEY, the signature window must include `now`,
    /// and the cryptographic check must pass.
    pub fn verify_rrsig(&self, rrsig: &RRSIG, rrset: &[Record], now: SystemTime) -> Result<()> {
        let key_tag = rrsig.key_tag();
        let key = self
            .pub_keys
            .get(&key_tag)
            .ok_or(DnssecError::PublicKeyNotFound {
                zone: self.zone.clone(),
                key_tag,
            })?;

        if !within_validity(
            rrsig.sig_inception().get(),
            rrsig.sig_expiration().get(),
            now,
        ) {
            return Err(DnssecError::RrsigExpired {
                zone: self.zone.clone(),
                key_tag,
            });
        }

        let name = rrset.first().map(Record::name).unwrap_or(&self.zone);
        key.verify_rrsig(name, DNSClass::IN, rrsig, rrset.iter())
            .map_err(|err| DnssecError::Verification {
                zone: self.zone.clone(),
                detail: err.to_string(),
            })
    }

    /// Validates the DS to DNSKEY binding for this delegation.
    ///
    /// Each DS record is tried in turn: compute the digest of the DNSKEY the
    /// DS names and compare it with the stored digest. The first match
    /// accepts the delegation. Records with an unsupported digest algorithm
    /// are skipped; only when every DS record was skipped for that reason is
    /// the distinct unknown-digest error raised.
    pub fn verify_ds(&self) -> Result<()> {
        let ds_records: Vec<&DS> = self
            .ds_rrset
            .iter()
            .filter_map(|record| match record.data() {
                RData::DNSSEC(DNSSECRData::DS(ds)) => Some(ds),
                _ => None,
            })
            .collect();

        let mut unsupported = 0;
        for ds in &ds_records {
            if !digest_supported(ds.digest_type()) {
                unsupported += 1;
                continue;
            }
            let Some(key) = self.pub_keys.get(&ds.key_tag()) else {
                continue;
            };
            match key.to_digest(&self.zone, ds.digest_type()) {
                Ok(digest) if digest.as_ref() == ds.digest() => return Ok(()),
                Ok(_) => {}
                Err(_) => unsupported += 1,
            }
        }

        if !ds_records.is_empty() && unsupported == ds_records.len() {
            Err(DnssecError::UnknownDsDigestType(self.zone.clone()))
        } else {
            Err(DnssecError::InvalidDs(self.zone.clone()))
        }
    }
}

fn digest_supported(digest_type: DigestType) -> bool {
    matches!(
        digest_type,
        DigestType::SHA1 | DigestType::SHA256 | DigestType::SHA384
    )
}

/// RFC 4034 section 3.1.5: signature timestamps are 32 bit serial numbers,
/// compared with RFC 1982 serial arithmetic.
fn within_validity(inception: u32, expiration: u32, now: SystemTime) -> bool {
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0) as u32;
    serial_le(inception, now) && serial_le(now, expiration)
}

fn serial_le(a: u32, b: u32) -> bool {
    a == b || b.wrapping_sub(a) < (1 << 31)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::time::Duration;

    use hickory_proto::dnssec::crypto::Ed25519SigningKey;
    use hickory_proto::dnssec::rdata::{DNSSECRData, DNSKEY, RRSIG};
    use hickory_proto::dnssec::tbs::TBS;
    use hickory_proto::dnssec::{Algorithm, PublicKey, PublicKeyBuf, SigSigner, SigningKey};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordSet};
    use time::{Duration as TimeDelta, OffsetDateTime};

    /// One zone signing key plus its DNSKEY record, ready for test signing.
    pub(crate) struct TestZoneKey {
        pub signer: SigSigner,
        pub dnskey: DNSKEY,
        pub dnskey_record: Record,
        pub zone: Name,
    }

    pub(crate) fn zone_key(zone: &str) -> TestZoneKey {
        let zone = Name::from_str(zone).unwrap();
        let pkcs8 = Ed25519SigningKey::generate_pkcs8().unwrap();
        let signing_key = Ed25519SigningKey::from_pkcs8(&pkcs8).unwrap();
        let public_bytes = signing_key.to_public_key().unwrap().public_bytes().to_vec();

        let dnskey = DNSKEY::with_flags(256, PublicKeyBuf::new(public_bytes, Algorithm::ED25519));
        let dnskey_record = Record::from_rdata(
            zone.clone(),
            3600,
            RData::DNSSEC(DNSSECRData::DNSKEY(dnskey.clone())),
        );
        let signer = SigSigner::dnssec(
            dnskey.clone(),
            Box::new(signing_key),
            zone.clone(),
            Duration::from_secs(7200),
        );
        TestZoneKey {
            signer,
            dnskey,
            dnskey_record,
            zone,
        }
    }

    pub(crate) fn sign_records(
        key: &TestZoneKey,
        records: &[Record],
        inception: OffsetDateTime,
    ) -> RRSIG {
        let first = records.first().expect("records to sign");
        let mut rrset = RecordSet::new(first.name().clone(), first.record_type(), 0);
        for record in records {
            rrset.insert(record.clone(), 0);
        }
        let expiration = inception + TimeDelta::seconds(key.signer.sig_duration().as_secs() as i64);
        let tbs = TBS::from_rrset(&rrset, DNSClass::IN, inception, expiration, &key.signer).unwrap();
        let signature = key.signer.sign(&tbs).unwrap();
        RRSIG::new(
            rrset.record_type(),
            key.signer.key().algorithm(),
            rrset.name().num_labels(),
            rrset.ttl(),
            expiration.unix_timestamp() as u32,
            inception.unix_timestamp() as u32,
            key.signer.calculate_key_tag().unwrap(),
            key.signer.signer_name().clone(),
            signature,
        )
    }

    /// A freshly signed A RRset for `zone`: the key, the covered records and
    /// the RRSIG record.
    pub(crate) fn signed_a_rrset(zone: &str) -> (TestZoneKey, Vec<Record>, Record) {
        let key = zone_key(zone);
        let records = vec![Record::from_rdata(
            key.zone.clone(),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 2))),
        )];
        let inception = OffsetDateTime::now_utc() - TimeDelta::minutes(5);
        let rrsig = sign_records(&key, &records, inception);
        let rrsig_record = Record::from_rdata(
            key.zone.clone(),
            300,
            RData::DNSSEC(DNSSECRData::RRSIG(rrsig)),
        );
        (key, records, rrsig_record)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use hickory_proto::dnssec::rdata::DS;
    use hickory_proto::dnssec::Algorithm;
    use time::{Duration as TimeDelta, OffsetDateTime};

    use super::test_support::{self, sign_records, zone_key};
    use super::*;

    fn zone_name(name: &str) -> Name {
        Name::from_str(name).unwrap()
    }

    fn signed_zone_for(key: &test_support::TestZoneKey, inception: OffsetDateTime) -> SignedZone {
        let dnskey_rrset = vec![key.dnskey_record.clone()];
        let dnskey_rrsig = sign_records(key, &dnskey_rrset, inception);
        SignedZone::new(
            key.zone.clone(),
            Some(dnskey_rrsig),
            None,
            dnskey_rrset,
            Vec::new(),
        )
    }

    #[test]
    fn key_tag_collisions_keep_the_first_key() {
        let key = zone_key("example.test.");
        let duplicated = vec![key.dnskey_record.clone(), key.dnskey_record.clone()];
        let zone = SignedZone::new(key.zone.clone(), None, None, duplicated, Vec::new());
        assert_eq!(zone.pub_keys.len(), 1);
    }

    #[test]
    fn fresh_dnskey_signature_verifies() {
        let key = zone_key("example.test.");
        let inception = OffsetDateTime::now_utc() - TimeDelta::minutes(5);
        let zone = signed_zone_for(&key, inception);

        let rrsig = zone.dnskey_rrsig().unwrap().clone();
        zone.verify_rrsig(&rrsig, zone.dnskey_rrset(), SystemTime::now())
            .unwrap();
    }

    #[test]
    fn expired_signature_is_rejected_before_crypto() {
        let key = zone_key("example.test.");
        // Inception three hours ago with a two hour validity window.
        let inception = OffsetDateTime::now_utc() - TimeDelta::hours(3);
        let zone = signed_zone_for(&key, inception);

        let rrsig = zone.dnskey_rrsig().unwrap().clone();
        let err = zone
            .verify_rrsig(&rrsig, zone.dnskey_rrset(), SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, DnssecError::RrsigExpired { .. }));
    }

    #[test]
    fn not_yet_valid_signature_is_rejected() {
        let key = zone_key("example.test.");
        let inception = OffsetDateTime::now_utc() + TimeDelta::hours(1);
        let zone = signed_zone_for(&key, inception);

        let rrsig = zone.dnskey_rrsig().unwrap().clone();
        let err = zone
            .verify_rrsig(&rrsig, zone.dnskey_rrset(), SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, DnssecError::RrsigExpired { .. }));
    }

    #[test]
    fn unknown_key_tag_is_reported() {
        let signing = zone_key("example.test.");
        let inception = OffsetDateTime::now_utc() - TimeDelta::minutes(5);
        let rrsig = sign_records(&signing, &[signing.dnskey_record.clone()], inception);

        // A zone populated with a different key cannot resolve the tag.
        let other = zone_key("example.test.");
        let zone = SignedZone::new(
            other.zone.clone(),
            None,
            None,
            vec![other.dnskey_record.clone()],
            Vec::new(),
        );
        let err = zone
            .verify_rrsig(&rrsig, &[signing.dnskey_record.clone()], SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, DnssecError::PublicKeyNotFound { .. }));
    }

    #[test]
    fn tampered_rrset_fails_verification() {
        let key = zone_key("example.test.");
        let inception = OffsetDateTime::now_utc() - TimeDelta::minutes(5);
        let zone = signed_zone_for(&key, inception);

        let rrsig = zone.dnskey_rrsig().unwrap().clone();
        // Swap the covered records for a different record set.
        let other = zone_key("example.test.");
        let err = zone
            .verify_rrsig(&rrsig, &[other.dnskey_record.clone()], SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, DnssecError::Verification { .. }));
    }

    #[test]
    fn matching_ds_digest_accepts_the_delegation() {
        let key = zone_key("child.test.");
        let digest = key
            .dnskey
            .to_digest(&key.zone, DigestType::SHA256)
            .unwrap()
            .as_ref()
            .to_vec();
        let ds = DS::new(
            key.dnskey.calculate_key_tag().unwrap(),
            Algorithm::ED25519,
            DigestType::SHA256,
            digest,
        );
        let ds_record = Record::from_rdata(
            zone_name("child.test."),
            3600,
            RData::DNSSEC(DNSSECRData::DS(ds)),
        );
        let zone = SignedZone::new(
            key.zone.clone(),
            None,
            None,
            vec![key.dnskey_record.clone()],
            vec![ds_record],
        );
        zone.verify_ds().unwrap();
    }

    #[test]
    fn mismatched_ds_digest_is_invalid() {
        let key = zone_key("child.test.");
        let mut digest = key
            .dnskey
            .to_digest(&key.zone, DigestType::SHA256)
            .unwrap()
            .as_ref()
            .to_vec();
        digest[0] ^= 0xff;
        let ds = DS::new(
            key.dnskey.calculate_key_tag().unwrap(),
            Algorithm::ED25519,
            DigestType::SHA256,
            digest,
        );
        let ds_record = Record::from_rdata(
            zone_name("child.test."),
            3600,
            RData::DNSSEC(DNSSECRData::DS(ds)),
        );
        let zone = SignedZone::new(
            key.zone.clone(),
            None,
            None,
            vec![key.dnskey_record.clone()],
            vec![ds_record],
        );
        let err = zone.verify_ds().unwrap_err();
        assert!(matches!(err, DnssecError::InvalidDs(_)));
    }

    #[test]
    fn serial_comparison_wraps() {
        assert!(serial_le(0xffff_fff0, 0x10));
        assert!(!serial_le(0x10, 0xffff_fff0));
        assert!(serial_le(5, 5));
    }
}
