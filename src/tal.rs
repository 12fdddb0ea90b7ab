//! Trust Anchor Locators (RFC 8630).
//!
//! A TAL file is comment lines, one or more candidate URIs (one per
//! line), a blank line, then the base64-encoded DER `SubjectPublicKeyInfo`
//! of the trust anchor certificate. [`Tal::read`] parses that text format;
//! [`Tal::read_dir`] walks a directory of `.tal` files the way the
//! validator's startup does.

use std::fs::{read_dir, DirEntry, File, ReadDir};
use std::io::{self, Read};
use std::path::Path;
use log::{debug, error};
use crate::uri::{Scheme, Uri, UriError};

//------------ Tal -----------------------------------------------------------

/// A parsed trust anchor locator.
#[derive(Clone, Debug)]
pub struct Tal {
    /// Human-readable provenance, used on every VRP derived from this TA.
    name: String,

    /// Candidate URIs for the trust anchor certificate, tried in order.
    uris: Vec<Uri>,

    /// The DER-encoded expected `SubjectPublicKeyInfo`.
    key_info: Vec<u8>,
}

impl Tal {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uris(&self) -> &[Uri] {
        &self.uris
    }

    pub fn key_info(&self) -> &[u8] {
        &self.key_info
    }

    /// Reads and parses a single TAL from `reader`, naming it `name`.
    pub fn read_named<R: Read>(name: String, reader: &mut R) -> Result<Self, ReadError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let mut uris = Vec::new();
        let mut lines = text.lines();
        let mut key_lines = Vec::new();
        let mut seen_blank = false;

        for line in &mut lines {
            if seen_blank {
                key_lines.push(line);
                continue;
            }
            if line.trim().is_empty() {
                seen_blank = true;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            let scheme = if line.starts_with("https://") {
                Scheme::Https
            } else {
                Scheme::Rsync
            };
            uris.push(Uri::parse(scheme, line.trim())?);
        }

        if uris.is_empty() {
            return Err(ReadError::NoUris);
        }

        let key_b64: String = key_lines.concat();
        let key_info = base64::decode(key_b64.trim()).map_err(ReadError::BadKeyInfoEncoding)?;
        validate_spki(&key_info)?;

        Ok(Tal { name, uris, key_info })
    }

    /// Walks `dir` for `.tal` files, naming each TAL after its file stem.
    pub fn read_dir<P: AsRef<Path>>(path: P) -> Result<TalIter, io::Error> {
        read_dir(path).map(TalIter)
    }
}

/// The DER tag for a `SEQUENCE`, which every `SubjectPublicKeyInfo` is.
const SEQUENCE_TAG: u8 = 0x30;

/// A minimal structural check that `key_info` at least starts a
/// `SubjectPublicKeyInfo` SEQUENCE; full ASN.1 decoding of the key
/// itself is left to the crypto library when the trust anchor
/// certificate is actually validated against it.
fn validate_spki(key_info: &[u8]) -> Result<(), ReadError> {
    if key_info.first() != Some(&SEQUENCE_TAG) {
        return Err(ReadError::BadKeyInfo);
    }
    Ok(())
}

//------------ TalIter --------------------------------------------------------

pub struct TalIter(ReadDir);

impl Iterator for TalIter {
    type Item = Result<Tal, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.0.next() {
                Some(Ok(entry)) => match next_entry(entry) {
                    Ok(Some(tal)) => return Some(Ok(tal)),
                    Ok(None) => continue,
                    Err(err) => {
                        error!("Bad trust anchor locator: {}", err);
                        return Some(Err(err));
                    }
                },
                Some(Err(err)) => return Some(Err(err.into())),
                None => return None,
            }
        }
    }
}

fn next_entry(entry: DirEntry) -> Result<Option<Tal>, ReadError> {
    if !entry.file_type()?.is_file() {
        return Ok(None);
    }
    let path = entry.path();
    if path.extension().map(|ext| ext != "tal").unwrap_or(true) {
        return Ok(None);
    }
    let name = path.file_stem().unwrap().to_string_lossy().into_owned();
    debug!("Loading TAL {}", path.display());
    Tal::read_named(name, &mut File::open(&path)?).map(Some)
}

//------------ ReadError ------------------------------------------------------

#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    NoUris,
    BadUri(UriError),
    BadKeyInfoEncoding(base64::DecodeError),
    BadKeyInfo,
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "{}", err),
            ReadError::NoUris => f.write_str("no URIs in TAL"),
            ReadError::BadUri(err) => write!(f, "bad trust anchor URI: {}", err),
            ReadError::BadKeyInfoEncoding(err) => {
                write!(f, "bad key info encoding: {}", err)
            }
            ReadError::BadKeyInfo => f.write_str("bad key info"),
        }
    }
}

impl std::error::Error for ReadError { }

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        ReadError::Io(err)
    }
}

impl From<UriError> for ReadError {
    fn from(err: UriError) -> Self {
        ReadError::BadUri(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_KEY_B64: &str = "MAA="; // minimal (invalid but well-formed) SEQUENCE

    #[test]
    fn parses_uris_and_key() {
        let text = format!(
            "# comment\nrsync://rpki.example/ta/ta.cer\n\n{}\n", GOOD_KEY_B64
        );
        let tal = Tal::read_named("example".into(), &mut text.as_bytes()).unwrap();
        assert_eq!(tal.name(), "example");
        assert_eq!(tal.uris().len(), 1);
    }

    #[test]
    fn rejects_tal_with_no_uris() {
        let text = format!("\n{}\n", GOOD_KEY_B64);
        assert!(matches!(
            Tal::read_named("x".into(), &mut text.as_bytes()),
            Err(ReadError::NoUris)
        ));
    }
}
