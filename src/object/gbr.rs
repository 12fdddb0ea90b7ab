//! Ghostbuster records (RFC 6493).
//!
//! A GBR is an opaque vCard payload. It is validated -- signature chain,
//! CMS structure -- like every other signed object, but contributes
//! nothing to the VRP store; the validation engine parses it only to
//! keep its statistics and manifest accounting honest.

use rpki::repository::crypto::keys::KeyIdentifier;
use crate::uri::Uri;

pub struct Gbr {
    pub vcard: Vec<u8>,
    pub aia: Option<Uri>,
    pub aki: KeyIdentifier,
    pub ski: KeyIdentifier,
}

impl Gbr {
    /// Builds the domain record from a CMS-signature-and-EE-chain
    /// verified signed object's content (see `crypto::process_signed_object`,
    /// called by the parser worker before this constructor runs). The
    /// vCard payload itself is kept verbatim and never interpreted.
    pub fn build(vcard: Vec<u8>, aia: Option<Uri>, aki: KeyIdentifier, ski: KeyIdentifier) -> Gbr {
        Gbr { vcard, aia, aki, ski }
    }
}
