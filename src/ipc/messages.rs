//! Per-object `*_buffer`/`*_read` pairs.
//!
//! The parser worker is the only process that ever touches
//! [`crate::crypto`] or the `rpki` crate's decoder types directly; what
//! crosses the wire back to the orchestrator is a flat, owned
//! restatement of the fields the validation engine actually needs.
//! Serialization is exhaustive -- every field the orchestrator consults
//! is reproduced end-to-end, nothing is reconstructed by re-parsing.

use std::convert::TryInto;
use std::io::{Read, Write};
use crate::ipc::framed::{
    self, read_buf, read_i64, read_str, read_u32, read_u8, write_buf, write_i64, write_str,
    write_u32, write_u8, FramedError,
};
use crate::resources::{Afi, AsBlock, AsResources, IpBlock, IpResources};
use crate::uri::{Scheme, Uri};

fn write_opt_str<W: Write>(w: &mut W, s: Option<&str>) -> Result<(), FramedError> {
    match s {
        Some(s) => { write_u8(w, 1)?; write_str(w, s)?; }
        None => write_u8(w, 0)?,
    }
    Ok(())
}

fn read_opt_str<R: Read>(r: &mut R) -> Result<Option<String>, FramedError> {
    Ok(if read_u8(r)? == 1 { Some(read_str(r)?) } else { None })
}

fn write_uri<W: Write>(w: &mut W, uri: &Uri) -> Result<(), FramedError> {
    write_u8(w, match uri.scheme() { Scheme::Rsync => 0, Scheme::Https => 1 })?;
    write_str(w, uri.as_str())
}

fn read_uri<R: Read>(r: &mut R) -> Result<Uri, FramedError> {
    let scheme = match read_u8(r)? { 0 => Scheme::Rsync, 1 => Scheme::Https, _ => return Err(FramedError::Malformed) };
    let value = read_str(r)?;
    Uri::parse(scheme, &value).map_err(|_| FramedError::Malformed)
}

fn write_opt_uri<W: Write>(w: &mut W, uri: Option<&Uri>) -> Result<(), FramedError> {
    match uri {
        Some(uri) => { write_u8(w, 1)?; write_uri(w, uri)?; }
        None => write_u8(w, 0)?,
    }
    Ok(())
}

fn read_opt_uri<R: Read>(r: &mut R) -> Result<Option<Uri>, FramedError> {
    Ok(if read_u8(r)? == 1 { Some(read_uri(r)?) } else { None })
}

fn write_as_resources<W: Write>(w: &mut W, res: &AsResources) -> Result<(), FramedError> {
    match res {
        AsResources::Inherit => write_u8(w, 0),
        AsResources::Blocks(blocks) => {
            write_u8(w, 1)?;
            write_u32(w, blocks.len() as u32)?;
            for block in blocks {
                write_u32(w, block.min)?;
                write_u32(w, block.max)?;
            }
            Ok(())
        }
    }
}

fn read_as_resources<R: Read>(r: &mut R) -> Result<AsResources, FramedError> {
    match read_u8(r)? {
        0 => Ok(AsResources::Inherit),
        1 => {
            let count = read_u32(r)?;
            let mut blocks = Vec::with_capacity(count as usize);
            for _ in 0..count {
                blocks.push(AsBlock::range(read_u32(r)?, read_u32(r)?));
            }
            Ok(AsResources::Blocks(blocks))
        }
        _ => Err(FramedError::Malformed),
    }
}

fn write_ip_resources<W: Write>(w: &mut W, afi: Afi, res: &IpResources) -> Result<(), FramedError> {
    match res {
        IpResources::Inherit => write_u8(w, 0),
        IpResources::Blocks(blocks) => {
            write_u8(w, 1)?;
            write_u32(w, blocks.len() as u32)?;
            for block in blocks {
                write_buf(w, &block.min)?;
                write_buf(w, &block.max)?;
            }
            let _ = afi; // family is implied by which field this call serializes
            Ok(())
        }
    }
}

fn read_ip_resources<R: Read>(r: &mut R, afi: Afi) -> Result<IpResources, FramedError> {
    match read_u8(r)? {
        0 => Ok(IpResources::Inherit),
        1 => {
            let count = read_u32(r)?;
            let mut blocks = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let min = to_addr16(read_buf(r)?)?;
                let max = to_addr16(read_buf(r)?)?;
                blocks.push(IpBlock::from_range(afi, min, max));
            }
            Ok(IpResources::Blocks(blocks))
        }
        _ => Err(FramedError::Malformed),
    }
}

fn to_addr16(bytes: Vec<u8>) -> Result<[u8; 16], FramedError> {
    bytes.try_into().map_err(|_| FramedError::Malformed)
}

//------------ TalMsg -------------------------------------------------------------

/// The flattened form of a [`crate::tal::Tal`] sent to the parser
/// worker so it knows which key to check a trust anchor certificate
/// against.
pub struct TalMsg {
    pub name: String,
    pub uris: Vec<Uri>,
    pub key_info: Vec<u8>,
}

pub fn tal_buffer<W: Write>(w: &mut W, tal: &TalMsg) -> Result<(), FramedError> {
    write_str(w, &tal.name)?;
    write_u32(w, tal.uris.len() as u32)?;
    for uri in &tal.uris {
        write_uri(w, uri)?;
    }
    write_buf(w, &tal.key_info)
}

pub fn tal_read<R: Read>(r: &mut R) -> Result<TalMsg, FramedError> {
    let name = read_str(r)?;
    let count = read_u32(r)?;
    let mut uris = Vec::with_capacity(count as usize);
    for _ in 0..count {
        uris.push(read_uri(r)?);
    }
    let key_info = read_buf(r)?;
    Ok(TalMsg { name, uris, key_info })
}

//------------ CertMsg -------------------------------------------------------------

/// The flattened form of a [`crate::object::cert::Cert`] sent back from
/// the parser worker.
pub struct CertMsg {
    pub as_resources: AsResources,
    pub ip_v4: IpResources,
    pub ip_v6: IpResources,
    pub repo: Option<Uri>,
    pub mft: Option<Uri>,
    pub notify: Option<Uri>,
    pub crl: Option<Uri>,
    pub aia: Option<Uri>,
    pub aki: Option<[u8; 20]>,
    pub ski: [u8; 20],
    pub is_ca: bool,
}

pub fn cert_buffer<W: Write>(w: &mut W, cert: &CertMsg) -> Result<(), FramedError> {
    write_as_resources(w, &cert.as_resources)?;
    write_ip_resources(w, Afi::Ipv4, &cert.ip_v4)?;
    write_ip_resources(w, Afi::Ipv6, &cert.ip_v6)?;
    write_opt_uri(w, cert.repo.as_ref())?;
    write_opt_uri(w, cert.mft.as_ref())?;
    write_opt_uri(w, cert.notify.as_ref())?;
    write_opt_uri(w, cert.crl.as_ref())?;
    write_opt_uri(w, cert.aia.as_ref())?;
    match cert.aki {
        Some(aki) => { write_u8(w, 1)?; write_buf(w, &aki)?; }
        None => write_u8(w, 0)?,
    }
    write_buf(w, &cert.ski)?;
    write_u8(w, cert.is_ca as u8)
}

pub fn cert_read<R: Read>(r: &mut R) -> Result<CertMsg, FramedError> {
    let as_resources = read_as_resources(r)?;
    let ip_v4 = read_ip_resources(r, Afi::Ipv4)?;
    let ip_v6 = read_ip_resources(r, Afi::Ipv6)?;
    let repo = read_opt_uri(r)?;
    let mft = read_opt_uri(r)?;
    let notify = read_opt_uri(r)?;
    let crl = read_opt_uri(r)?;
    let aia = read_opt_uri(r)?;
    let aki = if read_u8(r)? == 1 {
        Some(read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?)
    } else {
        None
    };
    let ski = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
    let is_ca = read_u8(r)? != 0;
    Ok(CertMsg { as_resources, ip_v4, ip_v6, repo, mft, notify, crl, aia, aki, ski, is_ca })
}

//------------ MftMsg -------------------------------------------------------------

pub struct MftEntryMsg {
    pub filename: String,
    pub digest: [u8; 32],
}

pub struct MftMsg {
    pub manifest_number: u64,
    pub this_update: i64,
    pub next_update: i64,
    pub entries: Vec<MftEntryMsg>,
    pub aki: [u8; 20],
    pub ski: [u8; 20],
}

pub fn mft_buffer<W: Write>(w: &mut W, mft: &MftMsg) -> Result<(), FramedError> {
    framed::write_u64(w, mft.manifest_number)?;
    write_i64(w, mft.this_update)?;
    write_i64(w, mft.next_update)?;
    write_u32(w, mft.entries.len() as u32)?;
    for entry in &mft.entries {
        write_str(w, &entry.filename)?;
        write_buf(w, &entry.digest)?;
    }
    write_buf(w, &mft.aki)?;
    write_buf(w, &mft.ski)
}

pub fn mft_read<R: Read>(r: &mut R) -> Result<MftMsg, FramedError> {
    let manifest_number = framed::read_u64(r)?;
    let this_update = read_i64(r)?;
    let next_update = read_i64(r)?;
    let count = read_u32(r)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let filename = read_str(r)?;
        let digest = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
        entries.push(MftEntryMsg { filename, digest });
    }
    let aki = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
    let ski = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
    Ok(MftMsg { manifest_number, this_update, next_update, entries, aki, ski })
}

//------------ RoaMsg -------------------------------------------------------------

pub struct RoaEntryMsg {
    pub afi: Afi,
    pub addr: [u8; 16],
    pub prefix_len: u8,
    pub max_length: u8,
}

pub struct RoaMsg {
    pub as_id: u32,
    pub entries: Vec<RoaEntryMsg>,
    pub aki: [u8; 20],
    pub ski: [u8; 20],

    /// The minimum `notAfter` across the signing EE certificate and
    /// every certificate on its chain up to the trust anchor, as Unix
    /// seconds.
    pub expires: i64,
}

pub fn roa_buffer<W: Write>(w: &mut W, roa: &RoaMsg) -> Result<(), FramedError> {
    write_u32(w, roa.as_id)?;
    write_u32(w, roa.entries.len() as u32)?;
    for entry in &roa.entries {
        write_u8(w, match entry.afi { Afi::Ipv4 => 1, Afi::Ipv6 => 2 })?;
        write_buf(w, &entry.addr)?;
        write_u8(w, entry.prefix_len)?;
        write_u8(w, entry.max_length)?;
    }
    write_buf(w, &roa.aki)?;
    write_buf(w, &roa.ski)?;
    write_i64(w, roa.expires)
}

pub fn roa_read<R: Read>(r: &mut R) -> Result<RoaMsg, FramedError> {
    let as_id = read_u32(r)?;
    let count = read_u32(r)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let afi = match read_u8(r)? { 1 => Afi::Ipv4, 2 => Afi::Ipv6, _ => return Err(FramedError::Malformed) };
        let addr = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
        let prefix_len = read_u8(r)?;
        let max_length = read_u8(r)?;
        entries.push(RoaEntryMsg { afi, addr, prefix_len, max_length });
    }
    let aki = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
    let ski = read_buf(r)?.try_into().map_err(|_| FramedError::Malformed)?;
    let expires = read_i64(r)?;
    Ok(RoaMsg { as_id, entries, aki, ski, expires })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::Ipv4Addr;
    use crate::resources::Prefix;

    #[test]
    fn roa_message_round_trips() {
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 16).to_range();
        let msg = RoaMsg {
            as_id: 64500,
            entries: vec![RoaEntryMsg { afi: Afi::Ipv4, addr: prefix.min, prefix_len: 16, max_length: 24 }],
            aki: [1; 20],
            ski: [2; 20],
            expires: 1_700_000_000,
        };
        let mut wire = Vec::new();
        roa_buffer(&mut wire, &msg).unwrap();
        let mut cursor = Cursor::new(wire);
        let decoded = roa_read(&mut cursor).unwrap();
        assert_eq!(decoded.as_id, 64500);
        assert_eq!(decoded.entries[0].prefix_len, 16);
        assert_eq!(decoded.entries[0].max_length, 24);
        assert_eq!(decoded.aki, [1; 20]);
        assert_eq!(decoded.expires, 1_700_000_000);
    }

    #[test]
    fn cert_message_round_trips_inherit() {
        let msg = CertMsg {
            as_resources: AsResources::Inherit,
            ip_v4: IpResources::Inherit,
            ip_v6: IpResources::Inherit,
            repo: None,
            mft: None,
            notify: None,
            crl: None,
            aia: None,
            aki: None,
            ski: [9; 20],
            is_ca: true,
        };
        let mut wire = Vec::new();
        cert_buffer(&mut wire, &msg).unwrap();
        let mut cursor = Cursor::new(wire);
        let decoded = cert_read(&mut cursor).unwrap();
        assert_eq!(decoded.as_resources, AsResources::Inherit);
        assert!(decoded.is_ca);
        assert_eq!(decoded.ski, [9; 20]);
    }

    #[test]
    fn tal_message_round_trips() {
        let msg = TalMsg {
            name: "example".into(),
            uris: vec![Uri::parse(Scheme::Rsync, "rsync://host/ta.cer").unwrap()],
            key_info: vec![1, 2, 3, 4],
        };
        let mut wire = Vec::new();
        tal_buffer(&mut wire, &msg).unwrap();
        let mut cursor = Cursor::new(wire);
        let decoded = tal_read(&mut cursor).unwrap();
        assert_eq!(decoded.name, "example");
        assert_eq!(decoded.key_info, vec![1, 2, 3, 4]);
    }
}
