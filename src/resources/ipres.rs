//! IP address resources (RFC 3779 §2, RFC 6487 §4.8.10).
//!
//! Every element -- prefix, range, or the two are treated identically
//! once canonicalized -- is normalized to a `[min, max]` pair of 16-byte,
//! zero-padded addresses so that IPv4 and IPv6 share one comparison and
//! containment implementation. The family tag travels separately since
//! two elements from different families are never compared against each
//! other.

use std::cmp::Ordering;
use std::net::{Ipv4Addr, Ipv6Addr};
use super::Coverage;

//------------ Afi ------------------------------------------------------------

/// Address Family Identifier, as assigned by IANA for RFC 3779 use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

impl Afi {
    pub fn max_len(self) -> u8 {
        match self {
            Afi::Ipv4 => 32,
            Afi::Ipv6 => 128,
        }
    }
}

/// Renders an `Addr16` back to a real address for display, per `afi`.
pub fn addr_to_ip(afi: Afi, addr: Addr16) -> std::net::IpAddr {
    match afi {
        Afi::Ipv4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&addr[..4]);
            std::net::IpAddr::V4(Ipv4Addr::from(octets))
        }
        Afi::Ipv6 => std::net::IpAddr::V6(Ipv6Addr::from(addr)),
    }
}

//------------ Addr16 ---------------------------------------------------------

/// A 16-byte, zero-padded address used for cross-family-agnostic
/// comparisons. Unsigned lexicographic order on this type is the
/// ordering the specification requires for VRP store iteration.
pub type Addr16 = [u8; 16];

fn pad(bytes: &[u8]) -> Addr16 {
    let mut out = [0u8; 16];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

//------------ Prefix ---------------------------------------------------------

/// A single address prefix within one address family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prefix {
    pub afi: Afi,
    pub addr: Addr16,
    pub prefix_len: u8,
}

impl Prefix {
    pub fn new_v4(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Prefix { afi: Afi::Ipv4, addr: pad(&addr.octets()), prefix_len }
    }

    pub fn new_v6(addr: Ipv6Addr, prefix_len: u8) -> Self {
        Prefix { afi: Afi::Ipv6, addr: pad(&addr.octets()), prefix_len }
    }

    /// Canonicalizes this prefix to its inclusive `[min, max]` range.
    ///
    /// `min` is the prefix address as given (the network address once
    /// host bits are masked off); `max` sets every bit beyond
    /// `prefix_len` to one.
    pub fn to_range(self) -> IpBlock {
        let width = if self.afi == Afi::Ipv4 { 4 } else { 16 };
        let mut min = self.addr;
        let mut max = self.addr;
        for i in 0..width {
            let bit_offset = i as u32 * 8;
            let keep = if self.prefix_len as u32 > bit_offset {
                let bits = (self.prefix_len as u32 - bit_offset).min(8);
                (!0u8) << (8 - bits)
            } else {
                0
            };
            min[i] &= keep;
            max[i] |= !keep;
        }
        IpBlock { afi: self.afi, min, max }
    }
}

//------------ IpBlock --------------------------------------------------------

/// A single element of an IP resource set, already canonicalized to its
/// `[min, max]` byte range. This is the "`ip_cert_compose_ranges`" form
/// the specification describes: a prefix becomes a range, an explicit
/// range is kept as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpBlock {
    pub afi: Afi,
    pub min: Addr16,
    pub max: Addr16,
}

impl IpBlock {
    pub fn from_range(afi: Afi, min: Addr16, max: Addr16) -> Self {
        IpBlock { afi, min, max }
    }

    fn overlaps(&self, other: &IpBlock) -> bool {
        self.afi == other.afi && self.min <= other.max && other.min <= self.max
    }

    fn covers(&self, other: &IpBlock) -> bool {
        self.afi == other.afi && self.min <= other.min && other.max <= self.max
    }

    /// Orders by `(addr-bytes, prefixlen-implied-by-range-width)`.
    ///
    /// Ties are broken by the narrower (shorter) range sorting first,
    /// matching "ties are broken by prefix length (shorter = smaller)".
    pub fn cmp_key(&self) -> (Addr16, Addr16) {
        (self.min, self.max)
    }
}

impl PartialOrd for IpBlock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IpBlock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.afi.cmp(&other.afi)
            .then(self.min.cmp(&other.min))
            .then(self.max.cmp(&other.max))
    }
}

//------------ IpResources -----------------------------------------------------

/// The IP resources carried by a certificate for a single address
/// family, or `INHERIT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpResources {
    Inherit,
    Blocks(Vec<IpBlock>),
}

impl IpResources {
    /// Builds a block set for one family, checking disjointness.
    pub fn from_blocks(mut blocks: Vec<IpBlock>) -> Result<Self, OverlapError> {
        blocks.sort();
        for pair in blocks.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(OverlapError);
            }
        }
        Ok(IpResources::Blocks(blocks))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, IpResources::Blocks(blocks) if blocks.is_empty())
    }

    /// Checks whether `[min, max]` is covered by this set.
    ///
    /// Returns `Coverage::Inherited` when this set itself inherits --
    /// per the specification, the caller must then recurse to the
    /// grandparent for this family.
    pub fn check_covered(&self, candidate: &IpBlock) -> Coverage {
        match self {
            IpResources::Inherit => Coverage::Inherited,
            IpResources::Blocks(blocks) => {
                if blocks.iter().any(|b| b.covers(candidate)) {
                    Coverage::Covered
                } else {
                    Coverage::NotCovered
                }
            }
        }
    }

    pub fn overlaps_any(&self, candidate: &IpBlock) -> bool {
        match self {
            IpResources::Inherit => false,
            IpResources::Blocks(blocks) => {
                blocks.iter().any(|b| b.overlaps(candidate))
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OverlapError;

impl std::fmt::Display for OverlapError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("overlapping or unsorted IP resource blocks")
    }
}

impl std::error::Error for OverlapError { }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_default_route_covers_everything() {
        let default_route = Prefix::new_v4(Ipv4Addr::new(0, 0, 0, 0), 0).to_range();
        let candidate = Prefix::new_v4(Ipv4Addr::new(10, 1, 0, 0), 16).to_range();
        assert_eq!(
            IpResources::Blocks(vec![default_route]).check_covered(&candidate),
            Coverage::Covered
        );
    }

    #[test]
    fn not_covered_when_outside_parent_block() {
        let parent = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 16).to_range();
        let child = Prefix::new_v4(Ipv4Addr::new(10, 1, 0, 0), 16).to_range();
        assert_eq!(
            IpResources::Blocks(vec![parent]).check_covered(&child),
            Coverage::NotCovered
        );
    }

    #[test]
    fn inherit_defers_to_grandparent() {
        assert_eq!(
            IpResources::Inherit.check_covered(
                &Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).to_range()
            ),
            Coverage::Inherited
        );
    }

    #[test]
    fn ordering_is_bytewise_then_by_range_width() {
        let a = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).to_range();
        let b = Prefix::new_v4(Ipv4Addr::new(10, 1, 0, 0), 16).to_range();
        assert!(a < b);
    }
}
