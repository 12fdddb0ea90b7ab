//! The boundary to the cryptographic library.
//!
//! ASN.1 decoding, CMS signature verification, and X.509 certificate path
//! validation are explicitly out of scope for this crate: they are
//! delegated wholesale to the `rpki` crate, which is treated as a black
//! box referenced only through the handful of entry points below. Nothing
//! outside this module touches `rpki`'s decoder types directly, so a
//! different crypto backend could be dropped in by reimplementing this
//! file alone.
//!
//! Only the parser worker (`crate::workers::parser`) calls into this
//! module at runtime; the orchestrator process never does.

use std::collections::HashMap;
use bytes::Bytes;
use rpki::repository::cert::{Cert as RpkiCert, ResourceCert};
use rpki::repository::crl::Crl as RpkiCrl;
use rpki::repository::crypto::keys::KeyIdentifier;
use rpki::repository::crypto::DigestAlgorithm;
use rpki::repository::manifest::{Manifest as RpkiManifest, ManifestContent};
use rpki::repository::roa::{Roa as RpkiRoa, RouteOriginAttestation};
use rpki::repository::sigobj::SignedObject;
use rpki::repository::tal::TalInfo;
use rpki::repository::x509::{Serial, Time, Validity, ValidationError};

/// A minimal DER tag/length frame, used only to peel a single
/// tag/length pair off the front of a value for version checks, per the
/// specification's `ASN1_frame`.
pub struct Asn1Frame {
    pub tag: u8,
    pub length: usize,
    pub header_len: usize,
}

/// Decodes one DER tag/length header from the front of `data`.
pub fn asn1_frame(data: &[u8]) -> Result<Asn1Frame, CryptoError> {
    if data.is_empty() {
        return Err(CryptoError::Truncated);
    }
    let tag = data[0];
    let first_len = *data.get(1).ok_or(CryptoError::Truncated)?;
    if first_len & 0x80 == 0 {
        return Ok(Asn1Frame { tag, length: first_len as usize, header_len: 2 });
    }
    let n = (first_len & 0x7f) as usize;
    if n == 0 || n > 4 {
        return Err(CryptoError::Malformed);
    }
    let bytes = data.get(2..2 + n).ok_or(CryptoError::Truncated)?;
    let mut length = 0usize;
    for b in bytes {
        length = (length << 8) | (*b as usize);
    }
    Ok(Asn1Frame { tag, length, header_len: 2 + n })
}

/// Validates that a CMS `eContent`'s ASN.1 `version` field is exactly 0.
///
/// Any other value is a parse failure -- RPKI signed objects are always
/// version 0 (RFC 6488 §2.1.3.1) and a validator that accepted other
/// versions would be accepting content it doesn't understand.
pub fn cms_econtent_version(content: &[u8]) -> Result<(), CryptoError> {
    let frame = asn1_frame(content)?;
    if frame.tag != 0x30 {
        return Err(CryptoError::Malformed);
    }
    let body = content.get(frame.header_len..).ok_or(CryptoError::Truncated)?;
    let version_frame = asn1_frame(body)?;
    // An explicit INTEGER version; absence means the DEFAULT of 0 applies.
    if version_frame.tag == 0x02 {
        let value = body
            .get(version_frame.header_len..version_frame.header_len + version_frame.length)
            .ok_or(CryptoError::Truncated)?;
        if value != [0] {
            return Err(CryptoError::UnsupportedVersion);
        }
    }
    Ok(())
}

/// SHA-256 of `data`, used for manifest entry and RRDP object hashes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = DigestAlgorithm::Sha256.digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

/// Constant-time comparison of two digests, per the specification's
/// `valid_filehash`.
pub fn digest_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// The subset of an X.509 certificate the rest of the crate needs, after
/// `rpki` has done the ASN.1 decoding and structural checking.
pub struct DecodedCert {
    pub inner: RpkiCert,
    pub validity: Validity,
}

/// Decodes a DER-encoded certificate, delegating ASN.1 parsing and RFC
/// 3779/6487 structural checks (sorted, non-overlapping, no mixed
/// `INHERIT`) to the crypto library.
pub fn decode_cert(der: &[u8]) -> Result<DecodedCert, CryptoError> {
    let cert = RpkiCert::take_from(Bytes::copy_from_slice(der))
        .map_err(|_| CryptoError::Malformed)?;
    let validity = cert.validity();
    Ok(DecodedCert { inner: cert, validity })
}

/// Validates a trust anchor certificate against the TAL's expected
/// subject public key, returning its resource-certified form.
pub fn validate_ta(cert: RpkiCert, tal_name: &str, strict: bool) -> Result<ResourceCert, CryptoError> {
    let tal_info = TalInfo::from_name(tal_name.to_string()).into_arc();
    cert.validate_ta(tal_info, strict).map_err(|_| CryptoError::BadSignature)
}

/// Validates a CA certificate's signature against its issuer and checks
/// its resource set is covered by it, returning its resource-certified
/// form.
pub fn validate_ca(cert: RpkiCert, issuer: &ResourceCert, strict: bool) -> Result<ResourceCert, CryptoError> {
    cert.validate_ca(issuer, strict).map_err(|_| CryptoError::BadSignature)
}

/// Validates an EE (router) certificate's signature against its issuer.
pub fn validate_router(cert: RpkiCert, issuer: &ResourceCert, strict: bool) -> Result<(), CryptoError> {
    cert.validate_router(issuer, strict).map_err(|_| CryptoError::BadSignature)
}

/// Decodes a ROA's CMS structure without yet verifying its signature.
pub fn decode_roa(der: &[u8], strict: bool) -> Result<RpkiRoa, CryptoError> {
    RpkiRoa::decode(Bytes::copy_from_slice(der), strict).map_err(|_| CryptoError::Malformed)
}

/// Verifies a decoded ROA's CMS signature and embedded EE certificate's
/// signature against `issuer`, calling `is_revoked` with the EE
/// certificate's serial before accepting it. Returns the validated
/// content alongside the EE certificate's own `notAfter` and subject key
/// identifier, which the caller folds into the chain's minimum expiry
/// and the domain record respectively.
pub fn process_roa(
    roa: RpkiRoa,
    issuer: &ResourceCert,
    strict: bool,
    mut is_revoked: impl FnMut(Serial) -> bool,
) -> Result<(RouteOriginAttestation, Time, KeyIdentifier), CryptoError> {
    let mut ee_not_after = None;
    let mut ee_ski = None;
    let route = roa.process(issuer, strict, |cert| {
        ee_not_after = Some(cert.validity().not_after());
        ee_ski = Some(cert.subject_key_identifier());
        if is_revoked(cert.serial_number()) {
            Err(ValidationError)
        } else {
            Ok(())
        }
    }).map_err(|_| CryptoError::BadSignature)?;
    Ok((route, ee_not_after.unwrap_or_else(Time::now), ee_ski.unwrap_or_default()))
}

/// Decodes a manifest's CMS structure without yet verifying its
/// signature.
pub fn decode_manifest(der: &[u8], strict: bool) -> Result<RpkiManifest, CryptoError> {
    RpkiManifest::decode(Bytes::copy_from_slice(der), strict).map_err(|_| CryptoError::Malformed)
}

/// Verifies a decoded manifest's CMS signature and embedded EE
/// certificate's signature against `issuer`. Unlike ROA/GBR processing,
/// manifest validation hands the EE certificate back directly instead of
/// taking a CRL closure -- the caller is expected to check
/// `ee_cert.serial_number()` against the CRL itself before trusting the
/// content, exactly as it checks any other CA or EE certificate.
pub fn process_manifest(
    mft: RpkiManifest,
    issuer: &ResourceCert,
    strict: bool,
) -> Result<(ResourceCert, ManifestContent), CryptoError> {
    mft.validate(issuer, strict).map_err(|_| CryptoError::BadSignature)
}

/// Decodes a generic CMS-signed object (used for Ghostbuster records)
/// without yet verifying its signature.
pub fn decode_signed_object(der: &[u8], strict: bool) -> Result<SignedObject, CryptoError> {
    SignedObject::decode(Bytes::copy_from_slice(der), strict).map_err(|_| CryptoError::Malformed)
}

/// Verifies a decoded signed object's CMS signature and embedded EE
/// certificate's signature against `issuer`, checking revocation the
/// same way [`process_roa`] does. Returns the raw content alongside the
/// EE certificate's `notAfter` and subject key identifier.
pub fn process_signed_object(
    signed: SignedObject,
    issuer: &ResourceCert,
    strict: bool,
    mut is_revoked: impl FnMut(Serial) -> bool,
) -> Result<(Bytes, Time, KeyIdentifier), CryptoError> {
    let mut ee_not_after = None;
    let mut ee_ski = None;
    let content = signed.process(issuer, strict, |cert| {
        ee_not_after = Some(cert.validity().not_after());
        ee_ski = Some(cert.subject_key_identifier());
        if is_revoked(cert.serial_number()) {
            Err(ValidationError)
        } else {
            Ok(())
        }
    }).map_err(|_| CryptoError::BadSignature)?;
    Ok((content, ee_not_after.unwrap_or_else(Time::now), ee_ski.unwrap_or_default()))
}

pub fn decode_crl(der: &[u8]) -> Result<RpkiCrl, CryptoError> {
    RpkiCrl::take_from(Bytes::copy_from_slice(der)).map_err(|_| CryptoError::Malformed)
}

pub fn now() -> Time {
    Time::now()
}

//------------ ValidationCache --------------------------------------------------

/// The parser worker's memory of every CA it has already validated this
/// run, keyed by subject key identifier.
///
/// A child certificate validates against its parent's [`ResourceCert`],
/// never against raw DER, so this cache is what lets a chain be walked
/// one certificate at a time across separate IPC requests instead of
/// re-validating the whole chain for every leaf. Alongside each entry it
/// keeps the minimum `notAfter` seen on the chain so far, which is how
/// [`process_roa`]'s caller computes "the minimum `notAfter` of every
/// certificate on the chain" without re-walking ancestors.
#[derive(Default)]
pub struct ValidationCache {
    entries: HashMap<KeyIdentifier, CacheEntry>,
}

struct CacheEntry {
    resource_cert: ResourceCert,
    chain_not_after: Time,
}

impl ValidationCache {
    pub fn new() -> Self {
        ValidationCache::default()
    }

    pub fn insert(&mut self, ski: KeyIdentifier, resource_cert: ResourceCert, chain_not_after: Time) {
        self.entries.insert(ski, CacheEntry { resource_cert, chain_not_after });
    }

    pub fn get(&self, ski: &KeyIdentifier) -> Option<(&ResourceCert, Time)> {
        self.entries.get(ski).map(|entry| (&entry.resource_cert, entry.chain_not_after))
    }
}

//------------ CryptoError -----------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoError {
    Truncated,
    Malformed,
    UnsupportedVersion,
    BadSignature,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            CryptoError::Truncated => "truncated DER value",
            CryptoError::Malformed => "malformed ASN.1 structure",
            CryptoError::UnsupportedVersion => "unsupported CMS eContent version",
            CryptoError::BadSignature => "signature verification failed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for CryptoError { }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_length_frame() {
        let data = [0x30, 0x03, 1, 2, 3];
        let frame = asn1_frame(&data).unwrap();
        assert_eq!(frame.tag, 0x30);
        assert_eq!(frame.length, 3);
        assert_eq!(frame.header_len, 2);
    }

    #[test]
    fn econtent_version_zero_accepted() {
        // SEQUENCE { INTEGER 0 }
        let content = [0x30, 0x03, 0x02, 0x01, 0x00];
        assert!(cms_econtent_version(&content).is_ok());
    }

    #[test]
    fn econtent_version_nonzero_rejected() {
        let content = [0x30, 0x03, 0x02, 0x01, 0x01];
        assert_eq!(
            cms_econtent_version(&content),
            Err(CryptoError::UnsupportedVersion)
        );
    }

    #[test]
    fn digest_eq_is_constant_time_correct() {
        let a = sha256(b"hello");
        let b = sha256(b"hello");
        let c = sha256(b"world");
        assert!(digest_eq(&a, &b));
        assert!(!digest_eq(&a, &c));
    }

    #[test]
    fn validation_cache_round_trips_lookup() {
        // `ResourceCert` has no public test constructor outside a real
        // DER fixture; the cache's own bookkeeping (miss before insert)
        // is exercised here, full chain behavior in the parser worker's
        // integration tests.
        let cache = ValidationCache::new();
        assert!(cache.get(&KeyIdentifier::default()).is_none());
    }
}
