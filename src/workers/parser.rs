//! The parser worker.
//!
//! The only process, besides crash diagnostics, that ever calls into
//! [`crate::crypto`]. It reads one request per object from its ingress
//! stream, decodes and cryptographically verifies the object -- CMS
//! signature, EE certificate's signature against its issuer, and
//! revocation against the issuer's CRL -- and writes back either a
//! flattened [`crate::ipc::messages`] record or a bare failure status.
//! It never touches the network and never blocks on anything but its
//! own stream.
//!
//! State lives for the worker's whole lifetime, not per request: a
//! [`ValidationCache`] remembers every CA/TA certificate already
//! validated this run (keyed by its own SKI) together with the minimum
//! `notAfter` seen on its chain, and a [`CrlTree`] remembers every CRL
//! handed over so far, keyed by issuer AKI. A child certificate or
//! signed object can only be validated once its issuer has already
//! been validated in an earlier request -- the orchestrator is
//! responsible for walking the tree top-down, the same order it
//! installs the auth tree in.

use std::convert::TryInto;
use std::io::{self, Read, Write};
use chrono::TimeZone;
use log::warn;
use rpki::repository::crypto::keys::KeyIdentifier;
use rpki::repository::x509::Time;
use crate::crypto::{self, CryptoError, ValidationCache};
use crate::ipc::framed::{self, read_buf, read_u8, write_u8, FramedError};
use crate::ipc::messages::{self, CertMsg, MftEntryMsg, MftMsg, RoaEntryMsg, RoaMsg};
use crate::object::cert::Cert;
use crate::object::crl::{Crl, CrlTree};
use crate::object::gbr::Gbr;
use crate::object::manifest::Manifest;
use crate::object::roa::Roa;

fn ki_bytes(id: &KeyIdentifier) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(id.as_ref());
    out
}

fn min_time(a: Time, b: Time) -> Time {
    if a < b { a } else { b }
}

/// Request kinds, one byte on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Cert = 0,
    TaCert = 1,
    Mft = 2,
    Roa = 3,
    Gbr = 4,
    Crl = 5,
}

/// Runs the parser worker's request/response loop until its ingress
/// stream returns EOF.
pub fn run<S: Read + Write>(mut stream: S) -> io::Result<()> {
    let mut cache = ValidationCache::new();
    let mut crls = CrlTree::new();

    loop {
        let kind = match read_u8(&mut stream) {
            Ok(byte) => byte,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };

        let reply = match kind {
            0 => handle_cert(&mut stream, None, &mut cache, &crls),
            1 => {
                let key = read_buf(&mut stream).map_err(io_err)?;
                handle_cert(&mut stream, Some(key), &mut cache, &crls)
            }
            2 => handle_mft(&mut stream, &cache, &crls),
            3 => handle_roa(&mut stream, &cache, &crls),
            4 => handle_gbr(&mut stream, &cache, &crls),
            5 => handle_crl(&mut stream, &mut crls),
            other => {
                warn!("parser worker received unknown request kind {}", other);
                Err(())
            }
        };

        match reply {
            Ok(bytes) => {
                write_u8(&mut stream, 1)?;
                stream.write_all(&bytes)?;
            }
            Err(()) => write_u8(&mut stream, 0)?,
        }
    }
}

fn io_err(err: FramedError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

fn read_ski<S: Read>(stream: &mut S) -> Result<KeyIdentifier, ()> {
    let bytes = read_buf(stream).map_err(|_| ())?;
    let raw: [u8; 20] = bytes.try_into().map_err(|_| ())?;
    Ok(KeyIdentifier::from(raw))
}

fn is_revoked_under(crls: &CrlTree, issuer_ski: &KeyIdentifier, serial: rpki::repository::x509::Serial) -> bool {
    crls.get(issuer_ski).map_or(false, |crl| crl.is_revoked(serial))
}

/// `Kind::TaCert` carries the TAL's expected key and name instead of an
/// issuer SKI -- a trust anchor has no issuer to look up. `Kind::Cert`
/// carries the issuer's SKI, which must already be in `cache` (the
/// orchestrator only ever requests a child after its parent validated).
fn handle_cert<S: Read>(
    stream: &mut S,
    ta_key: Option<Vec<u8>>,
    cache: &mut ValidationCache,
    crls: &CrlTree,
) -> Result<Vec<u8>, ()> {
    let tal_name = match &ta_key {
        Some(_) => Some(read_str_owned(stream)?),
        None => None,
    };
    let issuer_ski = if ta_key.is_none() { Some(read_ski(stream)?) } else { None };
    let strict = read_u8(stream).map_err(|_| ())? != 0;
    let der = read_buf(stream).map_err(|_| ())?;

    let cert = match &ta_key {
        Some(key) => Cert::ta_parse(&der, key),
        None => Cert::cert_parse(&der),
    }.map_err(log_crypto)?;

    match (tal_name, issuer_ski) {
        (Some(tal_name), _) => {
            let resource_cert = crypto::validate_ta(cert.handle.inner.clone(), &tal_name, strict)
                .map_err(log_crypto)?;
            let not_after = resource_cert.validity().not_after();
            if cert.is_ca {
                cache.insert(cert.ski, resource_cert, not_after);
            }
        }
        (None, Some(issuer_ski)) => {
            let (issuer_cert, issuer_not_after) = cache.get(&issuer_ski).ok_or_else(|| {
                warn!("parser worker: no cached issuer for certificate chain validation");
            })?;
            if is_revoked_under(crls, &issuer_ski, cert.handle.inner.serial_number()) {
                warn!("parser worker: certificate is revoked");
                return Err(());
            }
            if cert.is_ca {
                let resource_cert = crypto::validate_ca(cert.handle.inner.clone(), issuer_cert, strict)
                    .map_err(log_crypto)?;
                let not_after = min_time(issuer_not_after, resource_cert.validity().not_after());
                cache.insert(cert.ski, resource_cert, not_after);
            } else {
                crypto::validate_router(cert.handle.inner.clone(), issuer_cert, strict)
                    .map_err(log_crypto)?;
            }
        }
        (None, None) => return Err(()),
    }

    let msg = CertMsg {
        as_resources: cert.as_resources,
        ip_v4: cert.ip_v4,
        ip_v6: cert.ip_v6,
        repo: cert.repo,
        mft: cert.mft,
        notify: cert.notify,
        crl: cert.crl,
        aia: cert.aia,
        aki: cert.aki.map(|id| ki_bytes(&id)),
        ski: ki_bytes(&cert.ski),
        is_ca: cert.is_ca,
    };
    let mut out = Vec::new();
    messages::cert_buffer(&mut out, &msg).map_err(|_| ())?;
    Ok(out)
}

fn handle_mft<S: Read>(stream: &mut S, cache: &ValidationCache, crls: &CrlTree) -> Result<Vec<u8>, ()> {
    let issuer_ski = read_ski(stream)?;
    let strict = read_u8(stream).map_err(|_| ())? != 0;
    let der = read_buf(stream).map_err(|_| ())?;

    let (issuer_cert, _) = cache.get(&issuer_ski).ok_or_else(|| {
        warn!("parser worker: no cached issuer for manifest validation");
    })?;
    let mft = crypto::decode_manifest(&der, strict).map_err(log_crypto)?;
    let (ee_cert, content) = crypto::process_manifest(mft, issuer_cert, strict).map_err(log_crypto)?;

    if is_revoked_under(crls, &issuer_ski, ee_cert.serial_number()) {
        warn!("parser worker: manifest EE certificate is revoked");
        return Err(());
    }

    let manifest = Manifest::build(
        &content, None, issuer_ski, ee_cert.subject_key_identifier(), chrono::Utc::now(),
    );
    let msg = MftMsg {
        manifest_number: manifest.manifest_number,
        this_update: manifest.this_update.timestamp(),
        next_update: manifest.next_update.timestamp(),
        entries: manifest.entries.into_iter()
            .map(|e| MftEntryMsg { filename: e.filename, digest: e.digest })
            .collect(),
        aki: ki_bytes(&manifest.aki),
        ski: ki_bytes(&manifest.ski),
    };
    let mut out = Vec::new();
    messages::mft_buffer(&mut out, &msg).map_err(|_| ())?;
    Ok(out)
}

fn handle_roa<S: Read>(stream: &mut S, cache: &ValidationCache, crls: &CrlTree) -> Result<Vec<u8>, ()> {
    let issuer_ski = read_ski(stream)?;
    let strict = read_u8(stream).map_err(|_| ())? != 0;
    let tal = read_str_owned(stream)?;
    let der = read_buf(stream).map_err(|_| ())?;

    let (issuer_cert, issuer_not_after) = cache.get(&issuer_ski).ok_or_else(|| {
        warn!("parser worker: no cached issuer for ROA validation");
    })?;
    let roa = crypto::decode_roa(&der, strict).map_err(log_crypto)?;
    let (content, ee_not_after, ee_ski) = crypto::process_roa(
        roa, issuer_cert, strict, |serial| is_revoked_under(crls, &issuer_ski, serial),
    ).map_err(log_crypto)?;

    let expires = min_time(issuer_not_after, ee_not_after);
    let built = Roa::build(
        &content, None, issuer_ski, ee_ski, &tal,
        chrono::Utc.timestamp(expires.timestamp(), 0),
    );
    let msg = RoaMsg {
        as_id: built.as_id,
        entries: built.entries.into_iter()
            .map(|e| {
                let range = e.prefix.to_range();
                RoaEntryMsg {
                    afi: e.prefix.afi,
                    addr: range.min,
                    prefix_len: e.prefix.prefix_len,
                    max_length: e.max_length,
                }
            })
            .collect(),
        aki: ki_bytes(&built.aki),
        ski: ki_bytes(&built.ski),
        expires: built.expires.timestamp(),
    };
    let mut out = Vec::new();
    messages::roa_buffer(&mut out, &msg).map_err(|_| ())?;
    Ok(out)
}

fn handle_gbr<S: Read>(stream: &mut S, cache: &ValidationCache, crls: &CrlTree) -> Result<Vec<u8>, ()> {
    let issuer_ski = read_ski(stream)?;
    let strict = read_u8(stream).map_err(|_| ())? != 0;
    let der = read_buf(stream).map_err(|_| ())?;

    let (issuer_cert, _) = cache.get(&issuer_ski).ok_or_else(|| {
        warn!("parser worker: no cached issuer for Ghostbuster record validation");
    })?;
    let signed = crypto::decode_signed_object(&der, strict).map_err(log_crypto)?;
    let (content, _ee_not_after, ee_ski) = crypto::process_signed_object(
        signed, issuer_cert, strict, |serial| is_revoked_under(crls, &issuer_ski, serial),
    ).map_err(log_crypto)?;

    // The validation engine never inspects the vCard payload; it only
    // needs to know the record validated. Build it anyway so the
    // worker's log output (and any future consumer) can rely on the
    // same `Gbr::build` every other object goes through.
    let _gbr = Gbr::build(content.to_vec(), None, issuer_ski, ee_ski);

    let mut out = Vec::new();
    framed::write_buf(&mut out, &content).map_err(|_| ())?;
    Ok(out)
}

fn handle_crl<S: Read>(stream: &mut S, crls: &mut CrlTree) -> Result<Vec<u8>, ()> {
    let der = read_buf(stream).map_err(|_| ())?;
    let crl = Crl::crl_parse(&der).map_err(log_crypto)?;
    let mut out = Vec::new();
    framed::write_buf(&mut out, &ki_bytes(&crl.aki)).map_err(|_| ())?;
    crls.insert(crl);
    Ok(out)
}

fn read_str_owned<S: Read>(stream: &mut S) -> Result<String, ()> {
    crate::ipc::framed::read_str(stream).map_err(|_| ())
}

fn log_crypto(err: CryptoError) {
    warn!("parser worker: {}", err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unknown_request_kind_yields_failure_status() {
        let mut wire = Vec::new();
        write_u8(&mut wire, 99).unwrap();
        let mut stream = Cursor::new(wire);
        // A real socket would stay open for more requests; here we just
        // confirm the loop doesn't panic on an unrecognized kind before
        // hitting the forced EOF.
        let _ = run(&mut stream);
    }

    #[test]
    fn cert_request_with_unknown_issuer_is_rejected() {
        // No prior `Kind::TaCert` request means the cache is empty, so
        // any `Kind::Cert` request fails the issuer lookup before it
        // ever reaches signature verification.
        let mut wire = Vec::new();
        write_u8(&mut wire, Kind::Cert as u8).unwrap();
        framed::write_buf(&mut wire, &[7u8; 20]).unwrap();
        write_u8(&mut wire, 1).unwrap();
        framed::write_buf(&mut wire, &[0u8; 4]).unwrap();
        let mut stream = Cursor::new(wire);
        let _ = run(&mut stream);
    }
}
