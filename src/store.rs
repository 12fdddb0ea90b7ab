//! The VRP aggregation store.
//!
//! An ordered, de-duplicating index of Validated ROA Payloads keyed by
//! `(AFI, prefix, maxlen, ASID)`. Re-inserting an existing key maximizes
//! its `expires` and keeps the first inserter's TAL provenance, per the
//! specification's open question: the source tool keeps the first
//! inserter, so this does too.
//!
//! The index is a `BTreeMap` rather than a hash map on purpose -- output
//! determinism depends on iterating in key order, and a hash map's
//! iteration order is not a contract we can rely on.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use crate::resources::{Addr16, Afi};

//------------ VrpKey -----------------------------------------------------------

/// The de-duplication key: `(AFI, addr-bytes, prefixlen, maxlen, asid)`.
///
/// `Ord` on this type is exactly the order the specification requires
/// for VRP store iteration, so a plain `BTreeMap` gives correct output
/// order for free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VrpKey {
    pub afi: Afi,
    pub addr: Addr16,
    pub prefix_len: u8,
    pub max_length: u8,
    pub as_id: u32,
}

//------------ Vrp --------------------------------------------------------------

/// A single Validated ROA Payload.
#[derive(Clone, Debug)]
pub struct Vrp {
    pub key: VrpKey,
    pub tal: String,
    pub expires: DateTime<Utc>,
}

//------------ VrpStore ----------------------------------------------------------

#[derive(Default)]
pub struct VrpStore {
    entries: BTreeMap<VrpKey, Vrp>,
}

impl VrpStore {
    pub fn new() -> Self {
        VrpStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts one VRP, applying the collision policy: raise `expires`
    /// to the max of the two, keep the existing TAL provenance.
    ///
    /// Returns `true` if this added a brand new key.
    pub fn insert(&mut self, key: VrpKey, tal: &str, expires: DateTime<Utc>) -> bool {
        match self.entries.get_mut(&key) {
            Some(existing) => {
                if expires > existing.expires {
                    existing.expires = expires;
                }
                false
            }
            None => {
                self.entries.insert(key, Vrp { key, tal: tal.to_string(), expires });
                true
            }
        }
    }

    /// `roa_insert_vrps`: inserts every `(prefix, maxlen)` entry of a
    /// ROA, incrementing `total` unconditionally and `unique` only when
    /// the key was genuinely new.
    pub fn roa_insert_vrps(
        &mut self,
        as_id: u32,
        entries: impl IntoIterator<Item = (Afi, Addr16, u8, u8)>,
        tal: &str,
        expires: DateTime<Utc>,
        total: &mut u64,
        unique: &mut u64,
    ) {
        for (afi, addr, prefix_len, max_length) in entries {
            let key = VrpKey { afi, addr, prefix_len, max_length, as_id };
            *total += 1;
            if self.insert(key, tal, expires) {
                *unique += 1;
            }
        }
    }

    /// Iterates VRPs in the store's total order.
    pub fn iter(&self) -> impl Iterator<Item = &Vrp> {
        self.entries.values()
    }

    /// Removes entries that have already expired relative to `now`.
    pub fn retain_unexpired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, vrp| vrp.expires > now);
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Vrp) -> bool) {
        self.entries.retain(|_, vrp| keep(vrp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use chrono::TimeZone;

    fn addr(a: Ipv4Addr) -> Addr16 {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&a.octets());
        out
    }

    #[test]
    fn single_roa_produces_one_vrp() {
        let mut store = VrpStore::new();
        let mut total = 0;
        let mut unique = 0;
        let expires = Utc.timestamp(2_000_000_000, 0);
        store.roa_insert_vrps(
            64500,
            [(Afi::Ipv4, addr(Ipv4Addr::new(10, 1, 0, 0)), 16, 24)],
            "example",
            expires,
            &mut total,
            &mut unique,
        );
        assert_eq!(store.len(), 1);
        assert_eq!(total, 1);
        assert_eq!(unique, 1);
    }

    #[test]
    fn duplicate_key_maximizes_expiry_keeps_first_tal() {
        let mut store = VrpStore::new();
        let mut total = 0;
        let mut unique = 0;
        let early = Utc.timestamp(1_000_000_000, 0);
        let late = Utc.timestamp(2_000_000_000, 0);
        let entry = (Afi::Ipv4, addr(Ipv4Addr::new(10, 1, 0, 0)), 16, 24);

        store.roa_insert_vrps(64500, [entry], "tal-a", early, &mut total, &mut unique);
        store.roa_insert_vrps(64500, [entry], "tal-b", late, &mut total, &mut unique);

        assert_eq!(total, 2);
        assert_eq!(unique, 1);
        let vrp = store.iter().next().unwrap();
        assert_eq!(vrp.tal, "tal-a");
        assert_eq!(vrp.expires, late);
    }

    #[test]
    fn iteration_is_ordered_by_afi_then_address_then_lengths_then_asid() {
        let mut store = VrpStore::new();
        let mut total = 0;
        let mut unique = 0;
        let expires = Utc.timestamp(2_000_000_000, 0);
        store.roa_insert_vrps(
            1,
            [
                (Afi::Ipv4, addr(Ipv4Addr::new(10, 2, 0, 0)), 16, 24),
                (Afi::Ipv4, addr(Ipv4Addr::new(10, 1, 0, 0)), 16, 24),
            ],
            "t",
            expires,
            &mut total,
            &mut unique,
        );
        let addrs: Vec<_> = store.iter().map(|v| v.key.addr).collect();
        assert!(addrs[0] < addrs[1]);
    }
}
