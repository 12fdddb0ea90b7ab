//! Manifests (RFC 6486).

use chrono::{DateTime, TimeZone, Utc};
use rpki::repository::crypto::keys::KeyIdentifier;
use rpki::repository::manifest::ManifestContent;
use crate::ipc::messages::MftMsg;
use crate::uri::Uri;

//------------ ManifestEntry ---------------------------------------------------

/// One `(filename, SHA-256 digest)` pair listed on a manifest.
///
/// `filename` is always a basename -- the crypto library rejects any
/// manifest entry containing a path separator as malformed, so by the
/// time we see one here it is safe to join directly onto the
/// repository's local directory.
#[derive(Clone, Debug)]
pub struct ManifestEntry {
    pub filename: String,
    pub digest: [u8; 32],
}

//------------ Manifest --------------------------------------------------------

pub struct Manifest {
    pub manifest_number: u64,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
    pub aki: KeyIdentifier,
    pub ski: KeyIdentifier,
    pub aia: Option<Uri>,

    /// Set when the wall clock is past `next_update`.
    pub stale: bool,
}

impl Manifest {
    /// Builds the domain record from a CMS-signature-and-EE-chain
    /// verified manifest content (see `crypto::process_manifest`, called
    /// by the parser worker before this constructor runs). Marks `stale`
    /// based on the current time, per the staleness policy -- a stale
    /// manifest is still returned and consumed, never rejected outright.
    pub fn build(
        content: &ManifestContent,
        aia: Option<Uri>,
        aki: KeyIdentifier,
        ski: KeyIdentifier,
        now: DateTime<Utc>,
    ) -> Manifest {
        let entries = content.iter()
            .map(|file| ManifestEntry {
                filename: file.file_name().to_string(),
                digest: file.digest_sha256(),
            })
            .collect();

        let next_update = content.next_update();
        Manifest {
            manifest_number: content.manifest_number(),
            this_update: content.this_update(),
            next_update,
            entries,
            aki,
            ski,
            aia,
            stale: now > next_update,
        }
    }

    pub fn find(&self, filename: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.filename == filename)
    }

    /// Rebuilds the domain record from the parser worker's flattened
    /// reply. The worker verifies the manifest's signature chain and
    /// revocation status before ever sending this back; the validation
    /// engine just restates it in its own types.
    pub fn from_msg(msg: MftMsg, now: DateTime<Utc>) -> Manifest {
        let this_update = Utc.timestamp(msg.this_update, 0);
        let next_update = Utc.timestamp(msg.next_update, 0);
        let entries = msg.entries.into_iter()
            .map(|e| ManifestEntry { filename: e.filename, digest: e.digest })
            .collect();
        Manifest {
            manifest_number: msg.manifest_number,
            this_update,
            next_update,
            entries,
            aki: KeyIdentifier::from(msg.aki),
            ski: KeyIdentifier::from(msg.ski),
            aia: None,
            stale: now > next_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_locates_by_basename() {
        let manifest = Manifest {
            manifest_number: 1,
            this_update: Utc::now(),
            next_update: Utc::now(),
            entries: vec![ManifestEntry { filename: "child.cer".into(), digest: [0; 32] }],
            aki: KeyIdentifier::default(),
            ski: KeyIdentifier::default(),
            aia: None,
            stale: false,
        };
        assert!(manifest.find("child.cer").is_some());
        assert!(manifest.find("other.cer").is_none());
    }
}
