//! Client side of the parser worker's request/response protocol.
//!
//! The validation engine never decodes DER or touches the `rpki` crate
//! directly -- it hands the raw bytes to a parser worker over this
//! client and gets back a flattened record, or a bare failure status if
//! the worker rejected the object for any reason (malformed structure,
//! bad signature, revocation, whatever). The client deliberately throws
//! away *why* a request failed; the worker already logged it.

use std::io::{Read, Write};
use rpki::repository::crypto::keys::KeyIdentifier;
use crate::ipc::framed::{read_buf, read_u8, write_buf, write_str, write_u8, FramedError};
use crate::ipc::messages::{self, CertMsg, MftMsg, RoaMsg};
use crate::object::cert::CertRecord;
use crate::object::manifest::Manifest;
use crate::object::roa::Roa;
use crate::workers::parser::Kind;

fn ski_bytes(id: &KeyIdentifier) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(id.as_ref());
    out
}

/// A handle onto one parser worker's ingress/egress stream.
///
/// Borrows the stream rather than owning it so the orchestrator can
/// keep using the underlying `UnixStream` (readiness polling, EOF
/// detection) between validation passes.
pub struct ParserClient<'a, S> {
    stream: &'a mut S,
}

impl<'a, S: Read + Write> ParserClient<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        ParserClient { stream }
    }

    pub fn parse_ta_cert(
        &mut self, der: &[u8], ta_key: &[u8], tal_name: &str, strict: bool,
    ) -> Result<CertRecord, ()> {
        self.request(|s| {
            write_u8(s, Kind::TaCert as u8)?;
            write_buf(s, ta_key)?;
            write_str(s, tal_name)?;
            write_u8(s, strict as u8)?;
            write_buf(s, der)
        }).and_then(|()| self.reply(messages::cert_read))
            .map(CertRecord::from_msg)
    }

    pub fn parse_ca_cert(
        &mut self, der: &[u8], issuer_ski: &KeyIdentifier, strict: bool,
    ) -> Result<CertRecord, ()> {
        self.request(|s| {
            write_u8(s, Kind::Cert as u8)?;
            write_buf(s, &ski_bytes(issuer_ski))?;
            write_u8(s, strict as u8)?;
            write_buf(s, der)
        }).and_then(|()| self.reply(messages::cert_read))
            .map(CertRecord::from_msg)
    }

    pub fn parse_manifest(
        &mut self, der: &[u8], issuer_ski: &KeyIdentifier, strict: bool, now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Manifest, ()> {
        self.request(|s| {
            write_u8(s, Kind::Mft as u8)?;
            write_buf(s, &ski_bytes(issuer_ski))?;
            write_u8(s, strict as u8)?;
            write_buf(s, der)
        }).and_then(|()| self.reply(messages::mft_read))
            .map(|msg: MftMsg| Manifest::from_msg(msg, now))
    }

    pub fn parse_roa(
        &mut self, der: &[u8], issuer_ski: &KeyIdentifier, tal: &str, strict: bool,
    ) -> Result<Roa, ()> {
        self.request(|s| {
            write_u8(s, Kind::Roa as u8)?;
            write_buf(s, &ski_bytes(issuer_ski))?;
            write_u8(s, strict as u8)?;
            write_str(s, tal)?;
            write_buf(s, der)
        }).and_then(|()| self.reply(messages::roa_read))
            .map(|msg: RoaMsg| Roa::from_msg(msg, tal))
    }

    /// Validates a Ghostbuster record. The engine only needs to know
    /// whether it validated, never the vCard payload itself.
    pub fn parse_gbr(
        &mut self, der: &[u8], issuer_ski: &KeyIdentifier, strict: bool,
    ) -> Result<(), ()> {
        self.request(|s| {
            write_u8(s, Kind::Gbr as u8)?;
            write_buf(s, &ski_bytes(issuer_ski))?;
            write_u8(s, strict as u8)?;
            write_buf(s, der)
        })?;
        let status = read_u8(self.stream).map_err(|_| ())?;
        if status == 1 {
            read_buf(self.stream).map_err(|_| ())?;
            Ok(())
        } else {
            Err(())
        }
    }

    /// Hands a CRL to the worker so it can be cached there for
    /// revocation checks on later requests. The engine doesn't need the
    /// parsed content back, only confirmation that it was well-formed.
    pub fn parse_crl(&mut self, der: &[u8]) -> Result<(), ()> {
        self.request(|s| {
            write_u8(s, Kind::Crl as u8)?;
            write_buf(s, der)
        })?;
        let status = read_u8(self.stream).map_err(|_| ())?;
        if status == 1 {
            read_buf(self.stream).map_err(|_| ())?;
            Ok(())
        } else {
            Err(())
        }
    }

    fn request(&mut self, write: impl FnOnce(&mut S) -> Result<(), FramedError>) -> Result<(), ()> {
        write(self.stream).map_err(|_| ())
    }

    fn reply<T>(&mut self, decode: impl FnOnce(&mut S) -> Result<T, FramedError>) -> Result<T, ()> {
        let status = read_u8(self.stream).map_err(|_| ())?;
        if status != 1 {
            return Err(());
        }
        decode(self.stream).map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use crate::ipc::messages::{cert_buffer, mft_buffer, roa_buffer, CertMsg, MftEntryMsg, RoaEntryMsg};
    use crate::resources::{AsResources, IpResources};

    /// A duplex in-memory stream standing in for a `UnixStream` in
    /// tests: writes go to `out` (so a test can assert on the request
    /// the client sent), reads come from `inbox` (a canned worker
    /// reply the test fills in beforehand).
    struct MockStream {
        out: Vec<u8>,
        inbox: io::Cursor<Vec<u8>>,
    }

    impl MockStream {
        fn with_reply(inbox: Vec<u8>) -> Self {
            MockStream { out: Vec::new(), inbox: io::Cursor::new(inbox) }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inbox.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.out.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn ski(byte: u8) -> KeyIdentifier {
        KeyIdentifier::from([byte; 20])
    }

    #[test]
    fn parse_ca_cert_decodes_an_accepted_reply() {
        let msg = CertMsg {
            as_resources: AsResources::Inherit,
            ip_v4: IpResources::Inherit,
            ip_v6: IpResources::Inherit,
            repo: None,
            mft: None,
            notify: None,
            crl: None,
            aia: None,
            aki: Some([1; 20]),
            ski: [2; 20],
            is_ca: true,
        };
        let mut reply = vec![1u8];
        cert_buffer(&mut reply, &msg).unwrap();
        let mut stream = MockStream::with_reply(reply);
        let mut client = ParserClient::new(&mut stream);

        let cert = client.parse_ca_cert(b"der bytes", &ski(9), true).unwrap();
        assert!(cert.is_ca);
        assert_eq!(cert.ski, [2; 20]);

        // the request framed a Cert-kind header, the issuer SKI, the
        // strict flag, and the DER payload, in that order
        assert_eq!(stream.out[0], Kind::Cert as u8);
    }

    #[test]
    fn parse_ca_cert_propagates_a_rejected_reply() {
        let mut stream = MockStream::with_reply(vec![0u8]);
        let mut client = ParserClient::new(&mut stream);
        assert!(client.parse_ca_cert(b"der bytes", &ski(9), true).is_err());
    }

    #[test]
    fn parse_roa_decodes_an_accepted_reply() {
        let msg = RoaMsg {
            as_id: 64500,
            entries: vec![RoaEntryMsg { afi: crate::resources::Afi::Ipv4, addr: [10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], prefix_len: 16, max_length: 24 }],
            aki: [3; 20],
            ski: [4; 20],
            expires: 1_700_000_000,
        };
        let mut reply = vec![1u8];
        roa_buffer(&mut reply, &msg).unwrap();
        let mut stream = MockStream::with_reply(reply);
        let mut client = ParserClient::new(&mut stream);

        let roa = client.parse_roa(b"der bytes", &ski(5), "example", true).unwrap();
        assert_eq!(roa.as_id, 64500);
        assert_eq!(roa.entries.len(), 1);
    }

    #[test]
    fn parse_manifest_decodes_an_accepted_reply() {
        let msg = MftMsg {
            manifest_number: 42,
            this_update: 1_700_000_000,
            next_update: 1_700_086_400,
            entries: vec![MftEntryMsg { filename: "ca.crl".into(), digest: [7; 32] }],
            aki: [5; 20],
            ski: [6; 20],
        };
        let mut reply = vec![1u8];
        mft_buffer(&mut reply, &msg).unwrap();
        let mut stream = MockStream::with_reply(reply);
        let mut client = ParserClient::new(&mut stream);

        let now = chrono::Utc::now();
        let mft = client.parse_manifest(b"der bytes", &ski(7), true, now).unwrap();
        assert_eq!(mft.manifest_number, 42);
        assert_eq!(mft.entries.len(), 1);
    }

    #[test]
    fn parse_gbr_reads_the_status_byte_and_trailing_buf() {
        let mut reply = vec![1u8];
        write_buf(&mut reply, &[]).unwrap();
        let mut stream = MockStream::with_reply(reply);
        let mut client = ParserClient::new(&mut stream);
        assert!(client.parse_gbr(b"der bytes", &ski(6), true).is_ok());
    }

    #[test]
    fn parse_crl_rejects_a_failure_status() {
        let mut stream = MockStream::with_reply(vec![0u8]);
        let mut client = ParserClient::new(&mut stream);
        assert!(client.parse_crl(b"der bytes").is_err());
    }
}
