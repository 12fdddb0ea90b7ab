//! The RRDP worker.
//!
//! Parses a notification file and drains either a full snapshot or a
//! run of deltas into the local cache, following RFC 8182 §3.5.2: a
//! snapshot's objects always mean "write this file"; a delta's entries
//! mean "write" (no prior hash), "replace" (hash must match the
//! existing file), or "delete".

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use log::warn;
use rpki::rrdp::{self, NotificationFile, ProcessDelta, ProcessSnapshot};
use rpki::uri::Rsync as RpkiRsyncUri;
use serde::{Deserialize, Serialize};

/// Parses a notification file response body.
pub fn parse_notification(body: &[u8]) -> Result<NotificationFile, RrdpError> {
    NotificationFile::parse(body).map_err(|_| RrdpError::Xml)
}

/// Persisted session state, written by [`save_state`] and consulted on
/// the next run to decide whether a delta chain can be applied or a
/// full snapshot is required.
#[derive(Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub serial: u64,
}

pub fn save_state(path: &Path, state: &SessionState) -> io::Result<()> {
    let json = serde_json::to_vec(state).map_err(io::Error::other)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(tmp, path)
}

pub fn load_state(path: &Path) -> Option<SessionState> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

//------------ SnapshotWalk --------------------------------------------------------

/// Applies a full RRDP snapshot into `cache_root`, recording every path
/// it wrote so the caller can merge them into the repository's
/// filepath tree for cleanup accounting.
pub struct SnapshotWalk<'a> {
    pub cache_root: &'a Path,
    pub written: Vec<PathBuf>,
}

impl<'a> ProcessSnapshot for SnapshotWalk<'a> {
    type Err = RrdpError;

    fn meta(&mut self, _session_id: uuid::Uuid, _serial: u64) -> Result<(), Self::Err> {
        Ok(())
    }

    fn publish(&mut self, uri: RpkiRsyncUri, data: &mut rrdp::ObjectReader) -> Result<(), Self::Err> {
        let path = self.cache_root.join(rsync_relpath(&uri));
        write_object(&path, data)?;
        self.written.push(path);
        Ok(())
    }
}

//------------ DeltaWalk -------------------------------------------------------------

/// Applies one RRDP delta into `cache_root`. `written` and `deleted`
/// let the caller keep the repository's filepath tree accurate.
pub struct DeltaWalk<'a> {
    pub cache_root: &'a Path,
    pub written: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl<'a> ProcessDelta for DeltaWalk<'a> {
    type Err = RrdpError;

    fn meta(&mut self, _session_id: uuid::Uuid, _serial: u64) -> Result<(), Self::Err> {
        Ok(())
    }

    fn publish(
        &mut self,
        uri: RpkiRsyncUri,
        hash: Option<rrdp::Hash>,
        data: &mut rrdp::ObjectReader,
    ) -> Result<(), Self::Err> {
        let path = self.cache_root.join(rsync_relpath(&uri));
        publish_checked(&path, hash, data)?;
        self.written.push(path);
        Ok(())
    }

    fn withdraw(&mut self, uri: RpkiRsyncUri, hash: rrdp::Hash) -> Result<(), Self::Err> {
        let path = self.cache_root.join(rsync_relpath(&uri));
        let existing = fs::read(&path).map_err(|_| RrdpError::MissingObject)?;
        if rrdp::Hash::from_data(&existing) != hash {
            return Err(RrdpError::HashMismatch);
        }
        fs::remove_file(&path).map_err(|_| RrdpError::MissingObject)?;
        self.deleted.push(path);
        Ok(())
    }
}

/// Validates a delta publish entry against the object already on disk
/// before writing: a present `hash` asserts the prior content (an
/// "UPD"), its absence asserts the object is new (an "ADD").
fn publish_checked(path: &Path, hash: Option<rrdp::Hash>, data: &mut impl Read) -> Result<(), RrdpError> {
    match hash {
        Some(expected) => {
            let existing = fs::read(path).map_err(|_| RrdpError::MissingObject)?;
            if rrdp::Hash::from_data(&existing) != expected {
                return Err(RrdpError::HashMismatch);
            }
        }
        None => {
            if path.exists() {
                return Err(RrdpError::DuplicateObject);
            }
        }
    }
    write_object(path, data)
}

fn write_object(path: &Path, data: &mut impl Read) -> Result<(), RrdpError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| RrdpError::Io)?;
    }
    let mut buf = Vec::new();
    data.read_to_end(&mut buf).map_err(|_| RrdpError::Io)?;
    fs::write(path, &buf).map_err(|_| RrdpError::Io)
}

fn rsync_relpath(uri: &RpkiRsyncUri) -> PathBuf {
    let s = uri.to_string();
    let rest = s.splitn(2, "://").nth(1).unwrap_or(&s);
    PathBuf::from(rest)
}

//------------ RrdpError --------------------------------------------------------

#[derive(Debug)]
pub enum RrdpError {
    Xml,
    Io,
    HashMismatch,
    MissingObject,
    DuplicateObject,
}

impl From<rrdp::ProcessError> for RrdpError {
    fn from(err: rrdp::ProcessError) -> Self {
        match err {
            rrdp::ProcessError::Io(_) => RrdpError::Io,
            rrdp::ProcessError::Xml(_) => RrdpError::Xml,
        }
    }
}

impl std::fmt::Display for RrdpError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            RrdpError::Xml => "malformed RRDP XML",
            RrdpError::Io => "I/O error applying RRDP update",
            RrdpError::HashMismatch => "RRDP object hash mismatch",
            RrdpError::MissingObject => "RRDP delta referenced a missing object",
            RrdpError::DuplicateObject => "RRDP delta tried to add an existing object",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for RrdpError { }

/// Runs the RRDP worker loop. The actual notification fetch and HTTP
/// plumbing live in [`crate::workers::http`]; this loop only receives
/// already-downloaded snapshot/delta bodies over its ingress stream and
/// applies them, per the process-isolation design (the RRDP worker
/// never talks to the network directly -- it hands requests to the
/// HTTP worker over `HTTP_REQ`/`HTTP_INI`/`HTTP_FIN`).
pub fn run<S: Read + Write>(mut stream: S, cache_root: &Path) -> io::Result<()> {
    use crate::ipc::framed::{read_buf, read_u8, write_u32, write_u8};
    loop {
        let kind = match read_u8(&mut stream) {
            Ok(byte) => byte,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };
        match kind {
            // SNAPSHOT
            0 => {
                let body = read_buf(&mut stream).map_err(io::Error::other)?;
                let ok = apply_snapshot(&body, cache_root).is_ok();
                write_u8(&mut stream, ok as u8)?;
            }
            // DELTA
            1 => {
                let body = read_buf(&mut stream).map_err(io::Error::other)?;
                let (written, deleted) = match apply_delta(&body, cache_root) {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("rrdp delta: {}", err);
                        write_u8(&mut stream, 0)?;
                        continue;
                    }
                };
                write_u8(&mut stream, 1)?;
                write_u32(&mut stream, written as u32)?;
                write_u32(&mut stream, deleted as u32)?;
            }
            other => {
                warn!("rrdp worker received unknown request kind {}", other);
                write_u8(&mut stream, 0)?;
            }
        }
    }
}

fn apply_snapshot(body: &[u8], cache_root: &Path) -> Result<(), RrdpError> {
    let mut walk = SnapshotWalk { cache_root, written: Vec::new() };
    walk.process(&mut io::Cursor::new(body))
}

fn apply_delta(body: &[u8], cache_root: &Path) -> Result<(usize, usize), RrdpError> {
    let mut walk = DeltaWalk { cache_root, written: Vec::new(), deleted: Vec::new() };
    walk.process(&mut io::Cursor::new(body))?;
    Ok((walk.written.len(), walk.deleted.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const VALID_NOTIFICATION: &[u8] = br#"<notification xmlns="http://www.ripe.net/rpki/rrdp" version="1"
        session_id="9df4b597-af9e-4dca-bdda-719cce2c4e28" serial="1">
        <snapshot uri="https://example.org/rrdp/snapshot.xml"
            hash="0000000000000000000000000000000000000000000000000000000000000000"/>
    </notification>"#;

    #[test]
    fn parses_well_formed_notification() {
        let notification = parse_notification(VALID_NOTIFICATION).unwrap();
        assert_eq!(notification.serial(), 1);
    }

    #[test]
    fn rejects_malformed_notification() {
        assert!(matches!(parse_notification(b"not xml"), Err(RrdpError::Xml)));
    }

    #[test]
    fn session_state_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = SessionState { session_id: "abc-123".into(), serial: 42 };
        save_state(&path, &state).unwrap();
        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded.session_id, "abc-123");
        assert_eq!(loaded.serial, 42);
    }

    #[test]
    fn load_state_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_state(&dir.path().join("absent.json")).is_none());
    }

    #[test]
    fn rsync_relpath_strips_scheme() {
        let uri = RpkiRsyncUri::from_str("rsync://host/module/ca.cer").unwrap();
        assert_eq!(rsync_relpath(&uri), PathBuf::from("host/module/ca.cer"));
    }

    #[test]
    fn write_object_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host/module/ca.cer");
        let mut data: &[u8] = b"der-bytes";
        write_object(&path, &mut data).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"der-bytes");
    }

    #[test]
    fn delta_withdraw_rejects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let uri = RpkiRsyncUri::from_str("rsync://host/module/ca.cer").unwrap();
        let path = dir.path().join(rsync_relpath(&uri));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"actual-content").unwrap();

        let mut walk = DeltaWalk { cache_root: dir.path(), written: Vec::new(), deleted: Vec::new() };
        let bogus_hash = rrdp::Hash::from_data(b"different-content");
        assert!(matches!(
            walk.withdraw(uri, bogus_hash),
            Err(RrdpError::HashMismatch)
        ));
        assert!(path.exists());
    }

    #[test]
    fn publish_checked_rejects_existing_object_when_adding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host/module/ca.cer");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"already here").unwrap();

        let mut data: &[u8] = b"new-bytes";
        assert!(matches!(
            publish_checked(&path, None, &mut data),
            Err(RrdpError::DuplicateObject)
        ));
    }

    #[test]
    fn publish_checked_rejects_hash_mismatch_on_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host/module/ca.cer");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"actual-content").unwrap();

        let bogus_hash = rrdp::Hash::from_data(b"different-content");
        let mut data: &[u8] = b"new-bytes";
        assert!(matches!(
            publish_checked(&path, Some(bogus_hash), &mut data),
            Err(RrdpError::HashMismatch)
        ));
        assert_eq!(fs::read(&path).unwrap(), b"actual-content");
    }

    #[test]
    fn publish_checked_allows_new_object_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host/module/ca.cer");
        let mut data: &[u8] = b"new-bytes";
        publish_checked(&path, None, &mut data).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new-bytes");
    }
}
