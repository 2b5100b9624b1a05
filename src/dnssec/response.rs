use hickory_proto::dnssec::rdata::{DNSSECRData, RRSIG};
use hickory_proto::op::Message;
use hickory_proto::rr::{RData, Record, RecordType};

use super::errors::{DnssecError, Result};

/// Splits a response's answer section into the first RRSIG record and the
/// remaining records it covers.
///
/// A record whose header type is RRSIG but whose payload decodes to
/// something else is wire corruption and fails the whole response.
pub fn extract_rrsig(response: &Message) -> Result<(Option<RRSIG>, Vec<Record>)> {
    let mut rrsig = None;
    let mut rrset = Vec::with_capacity(response.answers().len());

    for record in response.answers() {
        if rrsig.is_none() && record.record_type() == RecordType::RRSIG {
            match record.data() {
                RData::DNSSEC(DNSSECRData::RRSIG(sig)) => {
                    rrsig = Some(sig.clone());
                    continue;
                }
                _ => return Err(DnssecError::UnexpectedRrsigType(record.name().clone())),
            }
        }
        rrset.push(record.clone());
    }

    Ok((rrsig, rrset))
}
