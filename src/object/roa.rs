//! Route Origin Authorizations (RFC 6482).

use chrono::{DateTime, TimeZone, Utc};
use rpki::repository::crypto::keys::KeyIdentifier;
use rpki::repository::roa::RouteOriginAttestation;
use crate::ipc::messages::RoaMsg;
use crate::resources::{Afi, Prefix};
use crate::uri::Uri;

//------------ RoaEntry --------------------------------------------------------

/// One `(AFI, prefix, maxlength)` entry of a ROA.
#[derive(Clone, Copy, Debug)]
pub struct RoaEntry {
    pub prefix: Prefix,
    pub max_length: u8,
}

//------------ Roa -------------------------------------------------------------

pub struct Roa {
    /// The authorized origin AS; `0` means "disavow" -- no AS may
    /// originate these prefixes.
    pub as_id: u32,

    pub entries: Vec<RoaEntry>,

    pub aia: Option<Uri>,
    pub aki: KeyIdentifier,
    pub ski: KeyIdentifier,

    /// The TAL this ROA's chain ultimately traces back to.
    pub tal: String,

    /// The minimum `notAfter` across every certificate on the chain.
    pub expires: DateTime<Utc>,
}

impl Roa {
    /// Builds the domain record from a CMS-signature-and-EE-chain
    /// verified ROA content (see `crypto::process_roa`, called by the
    /// parser worker before this constructor runs). `expires` is the
    /// minimum `notAfter` across the signing EE certificate and every
    /// certificate on its chain up to the trust anchor, computed by the
    /// worker from its per-chain validation cache.
    pub fn build(
        content: &RouteOriginAttestation,
        aia: Option<Uri>,
        aki: KeyIdentifier,
        ski: KeyIdentifier,
        tal: &str,
        expires: DateTime<Utc>,
    ) -> Roa {
        let entries = content.iter()
            .map(|addr| RoaEntry {
                prefix: addr.prefix(),
                max_length: addr.max_length(),
            })
            .collect();

        Roa {
            as_id: content.as_id(),
            entries,
            aia,
            aki,
            ski,
            tal: tal.to_string(),
            expires,
        }
    }

    /// Checks the boundary case the specification calls out: `maxlength`
    /// equal to `prefixlen` is valid, strictly less is invalid.
    pub fn entry_length_valid(entry: &RoaEntry) -> bool {
        entry.max_length >= entry.prefix.prefix_len
            && entry.max_length <= afi_max_len(entry.prefix.afi)
    }

    /// Rebuilds the domain record from the parser worker's flattened
    /// reply. `tal` is supplied by the caller rather than carried on the
    /// wire -- the validation engine already knows which TAL this ROA's
    /// entity came from, since it's the one that asked the worker to
    /// validate it.
    pub fn from_msg(msg: RoaMsg, tal: &str) -> Roa {
        let entries = msg.entries.into_iter()
            .map(|e| RoaEntry {
                prefix: Prefix { afi: e.afi, addr: e.addr, prefix_len: e.prefix_len },
                max_length: e.max_length,
            })
            .collect();
        Roa {
            as_id: msg.as_id,
            entries,
            aia: None,
            aki: KeyIdentifier::from(msg.aki),
            ski: KeyIdentifier::from(msg.ski),
            tal: tal.to_string(),
            expires: Utc.timestamp(msg.expires, 0),
        }
    }
}

fn afi_max_len(afi: Afi) -> u8 {
    afi.max_len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn maxlength_equal_to_prefixlen_is_valid() {
        let entry = RoaEntry {
            prefix: Prefix::new_v4(Ipv4Addr::new(10, 1, 0, 0), 16),
            max_length: 16,
        };
        assert!(Roa::entry_length_valid(&entry));
    }

    #[test]
    fn maxlength_less_than_prefixlen_is_invalid() {
        let entry = RoaEntry {
            prefix: Prefix::new_v4(Ipv4Addr::new(10, 1, 0, 0), 16),
            max_length: 15,
        };
        assert!(!Roa::entry_length_valid(&entry));
    }

    #[test]
    fn maxlength_above_family_max_is_invalid() {
        let entry = RoaEntry {
            prefix: Prefix::new_v4(Ipv4Addr::new(10, 1, 0, 0), 16),
            max_length: 33,
        };
        assert!(!Roa::entry_length_valid(&entry));
    }
}
