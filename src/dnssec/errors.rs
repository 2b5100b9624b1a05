use hickory_proto::op::ResponseCode;
use hickory_proto::rr::Name;

use crate::upstream::UpstreamError;

pub type Result<T> = std::result::Result<T, DnssecError>;

/// Failures raised while populating or verifying the authentication chain.
#[derive(Debug)]
pub enum DnssecError {
    /// A per-zone DNSKEY or DS query could not be completed.
    Populate { zone: Name, source: UpstreamError },
    /// The queried name does not exist upstream (NXDOMAIN).
    NoResult(Name),
    /// Upstream answered a chain query with an unexpected response code.
    BadRcode { zone: Name, rcode: ResponseCode },
    /// A record announced RRSIG in its header but carried other data.
    UnexpectedRrsigType(Name),
    /// The zone returned no DNSKEY records at all.
    NoDnsKey(Name),
    /// The zone's DNSKEY RRset is present but unsigned.
    DnskeyNotAvailable(Name),
    /// A delegated zone is missing its DS RRset or the DS signature.
    DsNotAvailable(Name),
    /// No DNSKEY matches the key tag referenced by a signature.
    PublicKeyNotFound { zone: Name, key_tag: u16 },
    /// The signature's inception/expiration window excludes the present.
    RrsigExpired { zone: Name, key_tag: u16 },
    /// Cryptographic signature verification failed.
    Verification { zone: Name, detail: String },
    /// The DS RRset signature did not verify against the parent zone keys.
    RrsigValidation { zone: Name, key_tag: u16 },
    /// No DS record digest matches any DNSKEY of the zone.
    InvalidDs(Name),
    /// Every DS record uses a digest algorithm this resolver cannot compute.
    UnknownDsDigestType(Name),
}

impl std::fmt::Display for DnssecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Populate { zone, source } => {
                write!(f, "cannot populate chain at zone {}: {}", zone, source)
            }
            Self::NoResult(name) => write!(f, "requested RR not found: {}", name),
            Self::BadRcode { zone, rcode } => {
                write!(f, "bad response code for zone {}: {}", zone, rcode)
            }
            Self::UnexpectedRrsigType(name) => {
                write!(f, "unexpected RRSIG record content for {}", name)
            }
            Self::NoDnsKey(zone) => write!(f, "no DNS key for zone {}", zone),
            Self::DnskeyNotAvailable(zone) => {
                write!(f, "DNSKEY RRSIG does not exist for zone {}", zone)
            }
            Self::DsNotAvailable(zone) => write!(f, "DS RR does not exist for zone {}", zone),
            Self::PublicKeyNotFound { zone, key_tag } => {
                write!(f, "public key not found: zone {} key tag {}", zone, key_tag)
            }
            Self::RrsigExpired { zone, key_tag } => {
                write!(f, "RRSIG has expired: zone {} key tag {}", zone, key_tag)
            }
            Self::Verification { zone, detail } => {
                write!(f, "failed verification for zone {}: {}", zone, detail)
            }
            Self::RrsigValidation { zone, key_tag } => write!(
                f,
                "failed validating DS RRset against RRSIG: zone {} key tag {}",
                zone, key_tag
            ),
            Self::InvalidDs(zone) => {
                write!(f, "no DS record matches a DNS key of zone {}", zone)
            }
            Self::UnknownDsDigestType(zone) => {
                write!(f, "unknown DS digest type on every DS record of zone {}", zone)
            }
        }
    }
}

impl std::error::Error for DnssecError {}
