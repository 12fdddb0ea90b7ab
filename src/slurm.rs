//! Local exceptions per RFC 8416, aka SLURM.
//!
//! A SLURM file is a filter/assertion pair layered on top of the VRP
//! store after validation: `validationOutputFilters` drop VRPs the
//! operator doesn't trust, `locallyAddedAssertions` inject VRPs the
//! operator asserts without any certificate backing them at all.
//! BGPsec filters and assertions are part of the format but out of
//! scope here -- this tool doesn't handle BGPsec -- so they're parsed
//! and discarded.

use std::fs::File;
use std::io::{self, Read};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use crate::resources::{addr_to_ip, Afi};
use crate::store::{Vrp, VrpKey, VrpStore};

/// The trust anchor name recorded for assertions, since they don't come
/// from any TAL.
const ASSERTION_TAL: &str = "slurm";

//------------ LocalExceptions -------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct LocalExceptions {
    filters: Vec<PrefixFilter>,
    assertions: Vec<VrpKey>,
}

impl LocalExceptions {
    pub fn empty() -> Self {
        LocalExceptions::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Self::from_json(&buf)
    }

    pub fn from_json(data: &str) -> Result<Self, LoadError> {
        let doc: SlurmDocument = serde_json::from_str(data)?;
        if doc.slurm_version != 1 {
            return Err(LoadError::BadVersion(doc.slurm_version));
        }
        let mut filters = Vec::new();
        for raw in doc.validation_output_filters.prefix_filters {
            filters.push(PrefixFilter::from_raw(raw)?);
        }
        let mut assertions = Vec::new();
        for raw in doc.locally_added_assertions.prefix_assertions {
            assertions.push(raw.into_key()?);
        }
        Ok(LocalExceptions { filters, assertions })
    }

    /// Drops filtered VRPs from `store` and adds asserted ones, with
    /// the far-future expiry the source format implies for entries
    /// that aren't backed by any certificate's validity period.
    pub fn apply(&self, store: &mut VrpStore) {
        store.retain(|vrp| !self.filters.iter().any(|f| f.matches(vrp)));
        let never = Utc.timestamp(253_402_300_799, 0); // 9999-12-31T23:59:59Z
        for key in &self.assertions {
            store.insert(*key, ASSERTION_TAL, never);
        }
    }
}

//------------ PrefixFilter -----------------------------------------------------

#[derive(Clone, Debug)]
struct PrefixFilter {
    prefix: Option<(Afi, [u8; 16], u8)>,
    asn: Option<u32>,
}

impl PrefixFilter {
    fn from_raw(raw: RawPrefixFilter) -> Result<Self, LoadError> {
        if raw.prefix.is_none() && raw.asn.is_none() {
            return Err(LoadError::Malformed("filter has neither prefix nor asn"));
        }
        let prefix = raw.prefix.as_deref().map(parse_cidr).transpose()?;
        Ok(PrefixFilter { prefix, asn: raw.asn })
    }

    fn matches(&self, vrp: &Vrp) -> bool {
        let prefix_matches = match self.prefix {
            Some((afi, addr, len)) => {
                afi == vrp.key.afi && covers(addr, len, vrp.key.addr, vrp.key.prefix_len)
            }
            None => true,
        };
        let asn_matches = match self.asn {
            Some(asn) => asn == vrp.key.as_id,
            None => true,
        };
        prefix_matches && asn_matches
    }
}

/// True if the `(addr, len)` filter prefix covers the `(other, other_len)`
/// VRP prefix, treating both as the widest of the two address families'
/// representations (both already zero-padded to 16 bytes).
fn covers(addr: [u8; 16], len: u8, other: [u8; 16], other_len: u8) -> bool {
    if len > other_len {
        return false;
    }
    let full_bytes = (len / 8) as usize;
    if addr[..full_bytes] != other[..full_bytes] {
        return false;
    }
    let rem = len % 8;
    if rem == 0 {
        return true;
    }
    let mask = !0u8 << (8 - rem);
    addr[full_bytes] & mask == other[full_bytes] & mask
}

fn parse_cidr(value: &str) -> Result<(Afi, [u8; 16], u8), LoadError> {
    let (addr, len) = value
        .split_once('/')
        .ok_or(LoadError::Malformed("prefix missing length"))?;
    let len: u8 = len
        .parse()
        .map_err(|_| LoadError::Malformed("prefix length is not a number"))?;
    let addr: IpAddr = IpAddr::from_str(addr)
        .map_err(|_| LoadError::Malformed("prefix address is invalid"))?;
    let mut bytes = [0u8; 16];
    let afi = match addr {
        IpAddr::V4(v4) => {
            bytes[..4].copy_from_slice(&v4.octets());
            Afi::Ipv4
        }
        IpAddr::V6(v6) => {
            bytes.copy_from_slice(&v6.octets());
            Afi::Ipv6
        }
    };
    Ok((afi, bytes, len))
}

//------------ wire format ------------------------------------------------------

#[derive(Deserialize)]
struct SlurmDocument {
    #[serde(rename = "slurmVersion")]
    slurm_version: u8,
    #[serde(rename = "validationOutputFilters")]
    validation_output_filters: ValidationOutputFilters,
    #[serde(rename = "locallyAddedAssertions")]
    locally_added_assertions: LocallyAddedAssertions,
}

#[derive(Deserialize, Default)]
struct ValidationOutputFilters {
    #[serde(rename = "prefixFilters", default)]
    prefix_filters: Vec<RawPrefixFilter>,
    #[serde(rename = "bgpsecFilters", default)]
    #[allow(dead_code)]
    bgpsec_filters: Vec<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct LocallyAddedAssertions {
    #[serde(rename = "prefixAssertions", default)]
    prefix_assertions: Vec<RawPrefixAssertion>,
    #[serde(rename = "bgpsecAssertions", default)]
    #[allow(dead_code)]
    bgpsec_assertions: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawPrefixFilter {
    prefix: Option<String>,
    asn: Option<u32>,
    #[serde(default)]
    #[allow(dead_code)]
    comment: Option<String>,
}

#[derive(Deserialize)]
struct RawPrefixAssertion {
    prefix: String,
    asn: u32,
    #[serde(rename = "maxPrefixLength")]
    max_prefix_length: Option<u8>,
    #[serde(default)]
    #[allow(dead_code)]
    comment: Option<String>,
}

impl RawPrefixAssertion {
    fn into_key(self) -> Result<VrpKey, LoadError> {
        let (afi, addr, prefix_len) = parse_cidr(&self.prefix)?;
        let max_length = self.max_prefix_length.unwrap_or(prefix_len);
        if max_length < prefix_len {
            return Err(LoadError::Malformed("maxPrefixLength shorter than prefix length"));
        }
        Ok(VrpKey { afi, addr, prefix_len, max_length, as_id: self.asn })
    }
}

/// Renders a `VrpKey`'s prefix back to `addr/len` text, used by callers
/// that want to log an asserted or filtered entry.
pub fn format_prefix(key: &VrpKey) -> String {
    format!("{}/{}", addr_to_ip(key.afi, key.addr), key.prefix_len)
}

//------------ LoadError --------------------------------------------------------

#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Json(serde_json::Error),
    BadVersion(u8),
    Malformed(&'static str),
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> Self {
        LoadError::Io(err)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::Json(err)
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "{}", err),
            LoadError::Json(err) => write!(f, "{}", err),
            LoadError::BadVersion(v) => write!(f, "unsupported slurmVersion {}", v),
            LoadError::Malformed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for LoadError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(a: Ipv4Addr) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&a.octets());
        out
    }

    const DOC: &str = r#"{
        "slurmVersion": 1,
        "validationOutputFilters": {
            "prefixFilters": [
                { "prefix": "10.0.0.0/8", "comment": "drop this origin" }
            ],
            "bgpsecFilters": []
        },
        "locallyAddedAssertions": {
            "prefixAssertions": [
                { "asn": 64501, "prefix": "192.0.2.0/24", "maxPrefixLength": 32 }
            ],
            "bgpsecAssertions": []
        }
    }"#;

    #[test]
    fn parses_filters_and_assertions() {
        let exceptions = LocalExceptions::from_json(DOC).unwrap();
        assert_eq!(exceptions.filters.len(), 1);
        assert_eq!(exceptions.assertions.len(), 1);
        assert_eq!(exceptions.assertions[0].as_id, 64501);
        assert_eq!(exceptions.assertions[0].max_length, 32);
    }

    #[test]
    fn rejects_unsupported_version() {
        let doc = DOC.replace("\"slurmVersion\": 1", "\"slurmVersion\": 2");
        assert!(matches!(
            LocalExceptions::from_json(&doc),
            Err(LoadError::BadVersion(2))
        ));
    }

    #[test]
    fn apply_drops_filtered_and_adds_asserted() {
        let exceptions = LocalExceptions::from_json(DOC).unwrap();
        let mut store = VrpStore::new();
        let mut total = 0;
        let mut unique = 0;
        store.roa_insert_vrps(
            64500,
            [(Afi::Ipv4, addr(Ipv4Addr::new(10, 1, 0, 0)), 16, 24)],
            "example",
            Utc.timestamp(2_000_000_000, 0),
            &mut total,
            &mut unique,
        );
        exceptions.apply(&mut store);
        assert!(store.iter().all(|v| v.key.as_id != 64500));
        assert!(store.iter().any(|v| v.key.as_id == 64501 && v.tal == ASSERTION_TAL));
    }

    #[test]
    fn covers_respects_partial_byte_prefix_lengths() {
        let filter_addr = addr(Ipv4Addr::new(10, 0, 0, 0));
        let covered = addr(Ipv4Addr::new(10, 1, 2, 3));
        let not_covered = addr(Ipv4Addr::new(11, 0, 0, 0));
        assert!(covers(filter_addr, 8, covered, 24));
        assert!(!covers(filter_addr, 8, not_covered, 24));
    }
}
