//! The validation engine.
//!
//! This is the object-graph walker: it enforces RFC 6487 resource
//! containment and RFC 6486 manifest freshness while driving entities
//! from the work queue through the parser worker, and it is where ROAs
//! become VRPs. Every cryptographic operation -- CMS/X.509 signature
//! verification and revocation checking -- happens on the other side of
//! [`ParserClient`], in the parser worker process; nothing in this
//! module touches `rpki` or `crate::crypto` directly. Fetching is also
//! out of this module's hands -- when a publication point isn't synced
//! yet, its walk is simply skipped for this pass and picked back up
//! once the repository becomes ready.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use chrono::Utc;
use log::{debug, warn};
use rpki::repository::crypto::keys::KeyIdentifier;
use crate::authtree::{AuthTree, InstallError};
use crate::ipc::ParserClient;
use crate::metrics::Metrics;
use crate::object::cert::CertRecord;
use crate::object::EntityKind;
use crate::queue::{Entity, EntityQueue};
use crate::repo::RepoTable;
use crate::resources::{Afi, AsResources, Coverage, IpResources};
use crate::store::VrpStore;
use crate::uri::Uri;

//------------ ValidationEngine --------------------------------------------------

/// Owns every store the walk touches: the auth tree, the VRP store, the
/// repository table, and the work queue.
pub struct ValidationEngine {
    pub auth: AuthTree,
    pub vrps: VrpStore,
    pub repos: RepoTable,
    pub queue: EntityQueue,
}

impl ValidationEngine {
    pub fn new() -> Self {
        ValidationEngine {
            auth: AuthTree::new(),
            vrps: VrpStore::new(),
            repos: RepoTable::new(),
            queue: EntityQueue::new(),
        }
    }

    /// Drains the work queue, dispatching each entity to the parser
    /// worker behind `client` for decoding and signature/revocation
    /// verification. This is the outer loop the orchestrator drives; it
    /// returns once the ready queue is empty, leaving anything still
    /// deferred on a syncing repository for a later call after that
    /// repository's fetch completes.
    pub fn drain_ready<S: Read + Write>(
        &mut self, client: &mut ParserClient<S>, strict: bool, metrics: &mut Metrics,
    ) {
        while let Some(entity) = self.queue.pop_ready() {
            self.process_entity(entity, client, strict, metrics);
        }
    }

    fn process_entity<S: Read + Write>(
        &mut self, entity: Entity, client: &mut ParserClient<S>, strict: bool, metrics: &mut Metrics,
    ) {
        match entity.kind {
            EntityKind::Cer => self.process_cert_entity(entity, client, strict, metrics),
            EntityKind::Roa => self.process_roa_entity(entity, client, strict, metrics),
            EntityKind::Gbr => self.process_gbr_entity(entity, client, strict, metrics),
            // CRLs and manifests are fetched and consumed as part of a
            // CA's own walk, never queued as standalone entities.
            EntityKind::Crl | EntityKind::Mft | EntityKind::Tal => {}
        }
    }

    fn process_cert_entity<S: Read + Write>(
        &mut self, entity: Entity, client: &mut ParserClient<S>, strict: bool, metrics: &mut Metrics,
    ) {
        let der = match fs::read(&entity.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to read {}: {}", entity.path.display(), err);
                metrics.certs_fail += 1;
                return;
            }
        };

        let parsed = match (&entity.ta_key, &entity.issuer_ski) {
            (Some(key), _) => client.parse_ta_cert(&der, key, &entity.tal, strict),
            (None, Some(issuer_ski)) => client.parse_ca_cert(&der, issuer_ski, strict),
            (None, None) => {
                warn!("certificate {} has no issuer to validate against", entity.path.display());
                metrics.certs_invalid += 1;
                return;
            }
        };
        let cert = match parsed {
            Ok(cert) => cert,
            Err(()) => {
                debug!("certificate {} failed to validate", entity.path.display());
                metrics.certs_invalid += 1;
                return;
            }
        };
        metrics.certs += 1;

        let is_ta = entity.ta_key.is_some();
        let install = if is_ta {
            Ok(None)
        } else {
            let aki = match cert.aki {
                Some(aki) => aki,
                None => {
                    warn!("non-TA certificate {} has no AKI", entity.path.display());
                    metrics.certs_invalid += 1;
                    return;
                }
            };
            self.auth.valid_ski_aki(&cert.ski, &aki)
                .map_err(ValidError::Install)
                .and_then(|parent| self.valid_cert(&cert, &parent).map(|_| Some(parent)))
        };

        let parent = match install {
            Ok(parent) => parent,
            Err(err) => {
                debug!("certificate {} failed containment: {}", entity.path.display(), err);
                metrics.certs_invalid += 1;
                return;
            }
        };

        let own_ski = cert.ski;
        let repo_for_walk = cert.repo.clone();
        let mft_uri = cert.mft.clone();
        let notify = cert.notify.clone();
        let tal = entity.tal.clone();

        let install_result = match parent {
            Some(parent) => self.auth.install(cert, parent),
            None => self.auth.install_root(cert),
        };
        if let Err(err) = install_result {
            warn!("failed to install {}: {}", entity.path.display(), err);
            metrics.certs_invalid += 1;
            return;
        }

        if let (Some(repo_uri), Some(mft_uri)) = (repo_for_walk, mft_uri) {
            self.walk_publication_point(&repo_uri, notify.as_ref(), &mft_uri, &tal, &own_ski, client, strict, metrics);
        }
    }

    /// Steps 1-5 of the manifest-driven walk: resolve the repository,
    /// fetch its CRL, validate and classify each manifest entry, and
    /// enqueue the children for their own pass.
    fn walk_publication_point<S: Read + Write>(
        &mut self,
        repo_uri: &Uri,
        notify: Option<&Uri>,
        mft_uri: &Uri,
        tal: &str,
        issuer_ski: &KeyIdentifier,
        client: &mut ParserClient<S>,
        strict: bool,
        metrics: &mut Metrics,
    ) {
        let repo_id = self.repos.repo_lookup(repo_uri, notify);
        if !self.repos.get(repo_id).map(|r| r.is_ready()).unwrap_or(false) {
            debug!("repository {} not yet synced, deferring walk", repo_uri);
            return;
        }

        let mft_path = cache_path(mft_uri);
        let der = match fs::read(&mft_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to read manifest {}: {}", mft_path.display(), err);
                metrics.mfts_fail += 1;
                return;
            }
        };
        let manifest = match client.parse_manifest(&der, issuer_ski, strict, Utc::now()) {
            Ok(manifest) => manifest,
            Err(()) => {
                warn!("failed to validate manifest {}", mft_path.display());
                metrics.mfts_fail += 1;
                return;
            }
        };

        // The monotonic-manifest law: a manifest naming a number no
        // higher than the last one accepted for this publication point
        // is a replay or rollback and must be rejected outright, even
        // if it otherwise validates cleanly.
        let last_number = self.repos.get(repo_id).and_then(|r| r.last_manifest_number());
        if let Some(last) = last_number {
            if manifest.manifest_number <= last {
                warn!(
                    "manifest {} number {} is not higher than the last accepted {}, rejecting",
                    mft_path.display(), manifest.manifest_number, last,
                );
                metrics.mfts_fail += 1;
                return;
            }
        }
        if let Some(repo) = self.repos.get_mut(repo_id) {
            repo.accept_manifest_number(manifest.manifest_number);
        }

        metrics.mfts += 1;
        if manifest.stale {
            metrics.mfts_stale += 1;
        }

        let dir = cache_dir(repo_uri);

        // The CRL is a manifest entry like any other, just never
        // enqueued as a work item -- it's handed to the parser worker
        // directly here so the worker can start checking revocation for
        // every object under this publication point.
        if let Some(entry) = manifest.entries.iter()
            .find(|e| EntityKind::from_file_name(&e.filename) == Some(EntityKind::Crl))
        {
            let crl_path = dir.join(&entry.filename);
            let crl_ok = fs::read(&crl_path).ok()
                .filter(|bytes| crate::crypto::digest_eq(&crate::crypto::sha256(bytes), &entry.digest))
                .map(|bytes| client.parse_crl(&bytes).is_ok())
                .unwrap_or(false);
            if crl_ok {
                metrics.crls += 1;
            } else {
                metrics.crls_fail += 1;
            }
        }

        for entry in &manifest.entries {
            let kind = match EntityKind::from_file_name(&entry.filename) {
                Some(EntityKind::Crl) => continue,
                Some(kind) => kind,
                None => continue, // unknown suffix, ignored per step 4
            };
            let path = dir.join(&entry.filename);
            if !self.valid_filehash(&path, &entry.digest) {
                count_fail(kind, metrics);
                continue;
            }
            self.queue.push_ready(Entity {
                kind,
                path,
                ta_key: None,
                issuer_ski: Some(*issuer_ski),
                tal: tal.to_string(),
                repo: Some(repo_id),
            });
        }
    }

    /// `valid_filehash`: reads a local file, computes SHA-256, and
    /// constant-time-compares it to `expected` -- the manifest-entry
    /// binding.
    pub fn valid_filehash(&self, path: &std::path::Path, expected: &[u8; 32]) -> bool {
        match fs::read(path) {
            Ok(bytes) => crate::crypto::digest_eq(&crate::crypto::sha256(&bytes), expected),
            Err(_) => false,
        }
    }

    /// `valid_cert`: walks the parent chain and enforces RFC 3779 set
    /// containment for each resource family, grounding each `INHERIT`
    /// at the nearest ancestor that does not itself inherit.
    pub fn valid_cert(&self, cert: &CertRecord, parent_ski: &KeyIdentifier) -> Result<(), ValidError> {
        let parent = self.auth.get(parent_ski).ok_or(ValidError::UnknownParent)?;

        check_as(&cert.as_resources, parent, &self.auth)?;
        check_ip_family(&cert.ip_v4, parent, &self.auth, |c| &c.ip_v4)?;
        check_ip_family(&cert.ip_v6, parent, &self.auth, |c| &c.ip_v6)?;
        Ok(())
    }

    /// `valid_roa`: requires the issuing CA's resources to cover every
    /// prefix in the ROA, with `maxlength` bounds per the boundary
    /// cases the RFC 6482 profile describes.
    pub fn valid_roa(&self, roa: &crate::object::roa::Roa, issuer: &CertRecord) -> Result<(), ValidError> {
        for entry in &roa.entries {
            if !crate::object::roa::Roa::entry_length_valid(entry) {
                return Err(ValidError::BadMaxLength);
            }
            let range = entry.prefix.to_range();
            let select = match entry.prefix.afi {
                Afi::Ipv4 => (|c: &CertRecord| &c.ip_v4) as fn(&CertRecord) -> &IpResources,
                Afi::Ipv6 => (|c: &CertRecord| &c.ip_v6) as fn(&CertRecord) -> &IpResources,
            };
            walk_coverage(|cert| select(cert).check_covered(&range), issuer, &self.auth)?;
        }
        Ok(())
    }

    fn process_roa_entity<S: Read + Write>(
        &mut self, entity: Entity, client: &mut ParserClient<S>, strict: bool, metrics: &mut Metrics,
    ) {
        let der = match fs::read(&entity.path) {
            Ok(bytes) => bytes,
            Err(_) => { metrics.roas_fail += 1; return; }
        };
        let issuer_ski = match &entity.issuer_ski {
            Some(ski) => ski,
            None => { metrics.roas_fail += 1; return; }
        };
        let roa = match client.parse_roa(&der, issuer_ski, &entity.tal, strict) {
            Ok(roa) => roa,
            Err(()) => { metrics.roas_fail += 1; return; }
        };
        metrics.roas += 1;

        let issuer = match self.auth.get(&roa.aki) {
            Some(issuer) => issuer,
            None => { metrics.roas_invalid += 1; return; }
        };

        if let Err(err) = self.valid_roa(&roa, issuer) {
            debug!("ROA {} invalid: {}", entity.path.display(), err);
            metrics.roas_invalid += 1;
            return;
        }

        let entries = roa.entries.iter().map(|entry| {
            let range = entry.prefix.to_range();
            (entry.prefix.afi, range.min, entry.prefix.prefix_len, entry.max_length)
        });
        self.vrps.roa_insert_vrps(
            roa.as_id, entries, &roa.tal, roa.expires, &mut metrics.vrps, &mut metrics.uniqs,
        );
    }

    fn process_gbr_entity<S: Read + Write>(
        &mut self, entity: Entity, client: &mut ParserClient<S>, strict: bool, metrics: &mut Metrics,
    ) {
        let der = match fs::read(&entity.path) {
            Ok(bytes) => bytes,
            Err(_) => { metrics.gbrs_fail += 1; return; }
        };
        let result = match &entity.issuer_ski {
            Some(issuer_ski) => client.parse_gbr(&der, issuer_ski, strict),
            None => Err(()),
        };
        match result {
            Ok(()) => metrics.gbrs += 1,
            Err(()) => metrics.gbrs_fail += 1,
        }
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn count_fail(kind: EntityKind, metrics: &mut Metrics) {
    match kind {
        EntityKind::Cer => metrics.certs_fail += 1,
        EntityKind::Roa => metrics.roas_fail += 1,
        EntityKind::Gbr => metrics.gbrs_fail += 1,
        EntityKind::Crl => metrics.crls_fail += 1,
        EntityKind::Mft => metrics.mfts_fail += 1,
        EntityKind::Tal => {}
    }
}

/// The orchestrator is responsible for rooting these paths under the
/// configured cache directory before any of them are opened; this walk
/// only ever sees paths relative to that root.
fn cache_path(uri: &Uri) -> PathBuf {
    uri.cache_relpath()
}

fn cache_dir(repo_uri: &Uri) -> PathBuf {
    repo_uri.cache_relpath()
}

/// Grounds an `INHERIT` chain for a single AS resource set, walking up
/// through ancestors until a non-inheriting one answers definitively.
fn check_as(child: &AsResources, parent: &CertRecord, auth: &AuthTree) -> Result<(), ValidError> {
    match child {
        AsResources::Inherit => Ok(()),
        AsResources::Blocks(_) => {
            walk_coverage(|cert| cert.as_resources.check_set_covered(child), parent, auth)
        }
    }
}

fn check_ip_family(
    child: &IpResources,
    parent: &CertRecord,
    auth: &AuthTree,
    select: impl Fn(&CertRecord) -> &IpResources,
) -> Result<(), ValidError> {
    match child {
        IpResources::Inherit => Ok(()),
        IpResources::Blocks(blocks) => {
            for block in blocks {
                walk_coverage(|cert| select(cert).check_covered(block), parent, auth)?;
            }
            Ok(())
        }
    }
}

fn walk_coverage(
    check: impl Fn(&CertRecord) -> Coverage,
    start: &CertRecord,
    auth: &AuthTree,
) -> Result<(), ValidError> {
    match check(start) {
        Coverage::Covered => Ok(()),
        Coverage::NotCovered => Err(ValidError::NotCovered),
        Coverage::Inherited => {
            for ancestor in auth.ancestors(&start.ski) {
                match check(ancestor) {
                    Coverage::Covered => return Ok(()),
                    Coverage::NotCovered => return Err(ValidError::NotCovered),
                    Coverage::Inherited => continue,
                }
            }
            Err(ValidError::UngroundedInherit)
        }
    }
}

//------------ ValidError --------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidError {
    Install(InstallError),
    UnknownParent,
    NotCovered,
    UngroundedInherit,
    BadMaxLength,
}

impl std::fmt::Display for ValidError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ValidError::Install(err) => write!(f, "{}", err),
            ValidError::UnknownParent => f.write_str("issuing certificate not found"),
            ValidError::NotCovered => f.write_str("resources not covered by issuer"),
            ValidError::UngroundedInherit => f.write_str("INHERIT chain never grounds"),
            ValidError::BadMaxLength => f.write_str("maxlength out of bounds"),
        }
    }
}

impl std::error::Error for ValidError { }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::AsBlock;

    #[test]
    fn as_singleton_equals_range_under_coverage() {
        let parent = AsResources::from_blocks(vec![AsBlock::range(64496, 64496)]).unwrap();
        assert_eq!(parent.check_covered(64496), Coverage::Covered);
    }

    #[test]
    fn cache_path_strips_scheme_and_authority() {
        let uri = Uri::parse(crate::uri::Scheme::Rsync, "rsync://host/module/ca/repo.mft").unwrap();
        assert_eq!(cache_path(&uri), PathBuf::from("host/module/ca/repo.mft"));
    }
}
