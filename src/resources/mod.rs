//! Resource-set arithmetic.
//!
//! The types here implement the containment arithmetic RFC 3779 requires:
//! given a certificate's resources and its issuer's, decide whether every
//! element the certificate claims is actually backed by the issuer, with
//! `INHERIT` deferring the question to the next ancestor up.
//!
//! Addresses of both families are normalized to a common 16-byte,
//! zero-padded `[min, max]` representation so the comparison and
//! ordering code does not need to know which family it's looking at; the
//! family tag is carried alongside for callers that do.

pub mod asres;
pub mod ipres;

pub use self::asres::{AsBlock, AsId, AsResources};
pub use self::ipres::{addr_to_ip, Addr16, Afi, IpBlock, IpResources, Prefix};

/// The outcome of a coverage check against a set that may itself inherit.
///
/// This is the tri-state the specification calls for: `Covered` and
/// `NotCovered` are final answers, `Inherited` means the caller must walk
/// up to the grandparent because this ancestor deferred the question.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coverage {
    Covered,
    NotCovered,
    Inherited,
}

impl Coverage {
    pub fn is_covered(self) -> bool {
        matches!(self, Coverage::Covered)
    }
}
