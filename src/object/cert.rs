//! RPKI certificates (RFC 6487).

use rpki::repository::crypto::keys::KeyIdentifier;
use crate::crypto::{self, CryptoError, DecodedCert};
use crate::ipc::messages::CertMsg;
use crate::resources::{AsResources, IpResources};
use crate::uri::Uri;

//------------ Cert -----------------------------------------------------------

/// A parsed certificate, as produced by [`cert_parse`] or [`ta_parse`].
pub struct Cert {
    /// AS number resources (RFC 3779).
    pub as_resources: AsResources,

    /// IPv4 address resources.
    pub ip_v4: IpResources,

    /// IPv6 address resources.
    pub ip_v6: IpResources,

    /// The issuing CA's publication point (SIA `caRepository`), absent
    /// only on an EE certificate that has no children.
    pub repo: Option<Uri>,

    /// The issuing CA's manifest (SIA `signedObject`), CA certs only.
    pub mft: Option<Uri>,

    /// The RRDP notification URI (SIA `rpkiNotify`), if offered.
    pub notify: Option<Uri>,

    /// The URI of the CRL covering this certificate (CRL DP), absent
    /// only for a trust anchor certificate.
    pub crl: Option<Uri>,

    /// The issuer access URI (AIA), absent only for a trust anchor.
    pub aia: Option<Uri>,

    /// The issuer's subject key identifier, absent only for a trust
    /// anchor.
    pub aki: Option<KeyIdentifier>,

    /// This certificate's own subject key identifier.
    pub ski: KeyIdentifier,

    /// Whether `valid_cert` has confirmed resource containment yet.
    pub valid: bool,

    /// Whether this is a CA certificate (as opposed to an EE cert).
    pub is_ca: bool,

    /// The opaque parsed X.509 handle, used only for signature
    /// verification -- nothing else in the crate inspects it.
    pub handle: DecodedCert,
}

impl Cert {
    /// `cert_parse`: decodes a CA/EE certificate and its RFC 3779
    /// extensions. Returns a certificate with `valid = false`; resource
    /// containment is established later by the validation engine.
    pub fn cert_parse(der: &[u8]) -> Result<Cert, CryptoError> {
        let handle = crypto::decode_cert(der)?;
        build_cert(handle, false)
    }

    /// `ta_parse`: like `cert_parse`, but additionally requires the
    /// certificate's public key to equal the TAL's expected key. The
    /// result carries no AIA/AKI, matching a self-signed trust anchor.
    pub fn ta_parse(der: &[u8], expected_key: &[u8]) -> Result<Cert, CryptoError> {
        let handle = crypto::decode_cert(der)?;
        if handle.inner.subject_public_key_info().to_info_bytes().as_ref() != expected_key {
            return Err(CryptoError::BadSignature);
        }
        let mut cert = build_cert(handle, true)?;
        cert.aia = None;
        cert.aki = None;
        Ok(cert)
    }
}

fn build_cert(handle: DecodedCert, is_ta: bool) -> Result<Cert, CryptoError> {
    let inner = &handle.inner;
    // Field extraction delegates structural sorted/non-overlapping/
    // no-mixed-INHERIT checks to the crypto library; here we only
    // translate its already-checked representation into our own types.
    let as_resources = convert_as_resources(inner.as_resources());
    let ip_v4 = convert_ip_resources(crate::resources::Afi::Ipv4, inner.v4_resources());
    let ip_v6 = convert_ip_resources(crate::resources::Afi::Ipv6, inner.v6_resources());
    let ski = inner.subject_key_identifier();
    let aki = if is_ta { None } else { inner.authority_key_identifier() };
    Ok(Cert {
        as_resources,
        ip_v4,
        ip_v6,
        repo: inner.ca_repository().map(Into::into),
        mft: inner.rpki_manifest().map(Into::into),
        notify: inner.rpki_notify().map(Into::into),
        crl: if is_ta { None } else { inner.crl_uri().map(Into::into) },
        aia: if is_ta { None } else { inner.ca_issuer().map(Into::into) },
        aki,
        ski,
        valid: false,
        is_ca: inner.is_ca(),
        handle,
    })
}

/// Translates the crypto library's AS resources representation into our
/// own, which drops its ASN.1 backing entirely in favor of plain blocks.
fn convert_as_resources(
    res: &rpki::repository::resources::AsResources
) -> AsResources {
    use rpki::repository::resources::AsResources as RpkiAsResources;
    use crate::resources::AsBlock;
    match res {
        RpkiAsResources::Inherit => AsResources::Inherit,
        RpkiAsResources::Blocks(blocks) => {
            let converted = blocks.iter()
                .map(|b| AsBlock::range(b.min().into(), b.max().into()))
                .collect();
            AsResources::from_blocks(converted)
                .unwrap_or(AsResources::Blocks(Vec::new()))
        }
    }
}

/// Translates one address family's worth of the crypto library's IP
/// resources representation into our own canonical `[min, max]` blocks.
fn convert_ip_resources(
    afi: crate::resources::Afi,
    res: &rpki::repository::resources::IpResources,
) -> IpResources {
    use rpki::repository::resources::IpResources as RpkiIpResources;
    use crate::resources::IpBlock;
    match res {
        RpkiIpResources::Inherit => IpResources::Inherit,
        RpkiIpResources::Blocks(blocks) => {
            let converted = blocks.iter()
                .map(|b| {
                    let range = b.range();
                    IpBlock::from_range(
                        afi,
                        pad16(range.min().as_ref()),
                        pad16(range.max().as_ref()),
                    )
                })
                .collect();
            IpResources::from_blocks(converted)
                .unwrap_or(IpResources::Blocks(Vec::new()))
        }
    }
}

fn pad16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

//------------ CertRecord ------------------------------------------------------

/// The auth tree's own copy of a certificate's structural fields.
///
/// `Cert` carries a raw [`DecodedCert`] handle so the parser worker can
/// hand it to `crypto::validate_ca`/`validate_ta`/`validate_router`; the
/// validation engine, which runs in a different process from the
/// worker, never holds one of those. `CertRecord` is the flattened
/// record the engine installs into the auth tree instead, rebuilt from
/// the parser worker's [`CertMsg`] reply.
pub struct CertRecord {
    pub as_resources: AsResources,
    pub ip_v4: IpResources,
    pub ip_v6: IpResources,
    pub repo: Option<Uri>,
    pub mft: Option<Uri>,
    pub notify: Option<Uri>,
    pub crl: Option<Uri>,
    pub aia: Option<Uri>,
    pub aki: Option<KeyIdentifier>,
    pub ski: KeyIdentifier,
    pub is_ca: bool,
}

impl CertRecord {
    pub fn from_msg(msg: CertMsg) -> CertRecord {
        CertRecord {
            as_resources: msg.as_resources,
            ip_v4: msg.ip_v4,
            ip_v6: msg.ip_v6,
            repo: msg.repo,
            mft: msg.mft,
            notify: msg.notify,
            crl: msg.crl,
            aia: msg.aia,
            aki: msg.aki.map(KeyIdentifier::from),
            ski: KeyIdentifier::from(msg.ski),
            is_ca: msg.is_ca,
        }
    }
}

#[cfg(test)]
mod tests {
    // `build_cert` depends entirely on the crypto library's decoded
    // representation; exercising it end-to-end needs a real DER
    // fixture, which lives in the validation engine's integration
    // tests alongside a matching auth tree.
}
