//! The repository table and its fetch state machine.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use log::{debug, warn};
use crate::uri::Uri;

//------------ RepoId -----------------------------------------------------------

/// A repository's identity within the table, also the tag carried on
/// every in-flight fetch request so asynchronous completions can be
/// matched back to the repository that asked for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(pub u64);

//------------ RepoState ---------------------------------------------------------

/// The repository fetch state machine.
///
/// ```text
///                  NEW  --fetch_start-->  SYNCING
///                                            |  rrdp_finish / rsync_finish / http_finish
///                                            v
///                        FALLBACK <------  FAIL
///                           |  rsync_finish ok
///                           v
///                         READY
/// ```
///
/// `Fallback` applies only when RRDP is attempted first; a direct rsync
/// failure goes straight to `Fail`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepoState {
    New,
    Syncing,
    Fail,
    Fallback,
    Ready,
}

/// Which protocol finally provided a repository's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Rrdp,
    Rsync,
    Http,
}

//------------ Repo --------------------------------------------------------------

pub struct Repo {
    pub id: RepoId,
    pub point: Uri,
    pub notify: Option<Uri>,
    state: RepoState,
    protocol: Option<Protocol>,
    attempted_rrdp: bool,

    /// Every file path claimed or written under this repository's local
    /// prefix, used by the post-run cleanup pass.
    filepath_tree: HashSet<PathBuf>,

    /// The highest manifest number ever accepted for this repository's
    /// publication point, per the monotonic-manifest law -- a later
    /// manifest naming a lower number is replay/rollback and must be
    /// rejected.
    last_manifest_number: Option<u64>,
}

impl Repo {
    fn new(id: RepoId, point: Uri, notify: Option<Uri>) -> Self {
        Repo {
            id, point, notify,
            state: RepoState::New,
            protocol: None,
            attempted_rrdp: false,
            filepath_tree: HashSet::new(),
            last_manifest_number: None,
        }
    }

    pub fn state(&self) -> RepoState {
        self.state
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn is_ready(&self) -> bool {
        self.state == RepoState::Ready
    }

    pub fn claim_path(&mut self, path: PathBuf) {
        self.filepath_tree.insert(path);
    }

    pub fn claimed_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.filepath_tree.iter()
    }

    pub fn last_manifest_number(&self) -> Option<u64> {
        self.last_manifest_number
    }

    /// Accepts `number` as the repository's new high-water mark. The
    /// caller is expected to have already rejected any `number` lower
    /// than the current one.
    pub fn accept_manifest_number(&mut self, number: u64) {
        self.last_manifest_number = Some(number);
    }

    pub fn fetch_start(&mut self) {
        if self.state == RepoState::New {
            self.state = RepoState::Syncing;
        }
    }

    /// Records an RRDP completion. On success the repository becomes
    /// `READY`; on failure it moves to `FALLBACK` so a subsequent rsync
    /// attempt can still rescue the sync.
    pub fn rrdp_finish(&mut self, ok: bool) {
        self.attempted_rrdp = true;
        if ok {
            self.protocol = Some(Protocol::Rrdp);
            self.state = RepoState::Ready;
        } else {
            warn!("RRDP sync of {} failed, falling back to rsync", self.point);
            self.state = RepoState::Fallback;
        }
    }

    /// Records an rsync completion. A direct failure (no RRDP attempted
    /// first) goes straight to `FAIL`; a failure after `FALLBACK` stays
    /// in `FAIL` since rsync was the last resort.
    pub fn rsync_finish(&mut self, ok: bool) {
        if ok {
            self.protocol = Some(Protocol::Rsync);
            self.state = RepoState::Ready;
        } else {
            self.state = RepoState::Fail;
        }
    }

    pub fn http_finish(&mut self, ok: bool) {
        if ok {
            self.protocol = Some(Protocol::Http);
            self.state = RepoState::Ready;
        } else {
            self.state = RepoState::Fail;
        }
    }

    /// A watchdog timeout discards any later completion for this id by
    /// forcing the state directly to `FAIL`.
    pub fn timeout(&mut self) {
        debug!("Repository {} timed out", self.point);
        self.state = RepoState::Fail;
    }
}

//------------ RepoTable ----------------------------------------------------------

/// The repository table, keyed by publication point.
#[derive(Default)]
pub struct RepoTable {
    next_id: u64,
    by_point: HashMap<String, RepoId>,
    repos: HashMap<RepoId, Repo>,
}

impl RepoTable {
    pub fn new() -> Self {
        RepoTable::default()
    }

    /// `ta_lookup`: returns the synthetic repository for a trust
    /// anchor's own URIs -- a TA has no parent to fetch a manifest or
    /// CRL from, but still needs a `RepoId` to gate cleanup accounting.
    pub fn ta_lookup(&mut self, ta_uri: &Uri) -> RepoId {
        self.repo_lookup(ta_uri, None)
    }

    /// `repo_lookup`: returns or creates the repository for
    /// `point`. If `notify` is set, RRDP is preferred for this
    /// repository and rsync is only tried on RRDP failure.
    pub fn repo_lookup(&mut self, point: &Uri, notify: Option<&Uri>) -> RepoId {
        let key = point.as_str().to_string();
        if let Some(id) = self.by_point.get(&key) {
            return *id;
        }
        let id = RepoId(self.next_id);
        self.next_id += 1;
        self.repos.insert(id, Repo::new(id, point.clone(), notify.cloned()));
        self.by_point.insert(key, id);
        id
    }

    pub fn get(&self, id: RepoId) -> Option<&Repo> {
        self.repos.get(&id)
    }

    pub fn get_mut(&mut self, id: RepoId) -> Option<&mut Repo> {
        self.repos.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repo> {
        self.repos.values()
    }

    pub fn count_by_protocol(&self, protocol: Protocol) -> usize {
        self.repos.values().filter(|r| r.protocol() == Some(protocol)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Scheme;

    fn uri(s: &str) -> Uri {
        Uri::parse(Scheme::Rsync, s).unwrap()
    }

    #[test]
    fn repo_lookup_is_idempotent_on_point() {
        let mut table = RepoTable::new();
        let a = table.repo_lookup(&uri("rsync://host/repo"), None);
        let b = table.repo_lookup(&uri("rsync://host/repo"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn rrdp_failure_falls_back_then_rsync_succeeds() {
        let mut table = RepoTable::new();
        let id = table.repo_lookup(&uri("rsync://host/repo"), None);
        let repo = table.get_mut(id).unwrap();
        repo.fetch_start();
        repo.rrdp_finish(false);
        assert_eq!(repo.state(), RepoState::Fallback);
        repo.rsync_finish(true);
        assert_eq!(repo.state(), RepoState::Ready);
        assert_eq!(repo.protocol(), Some(Protocol::Rsync));
    }

    #[test]
    fn manifest_number_high_water_mark_is_tracked() {
        let mut table = RepoTable::new();
        let id = table.repo_lookup(&uri("rsync://host/repo"), None);
        let repo = table.get_mut(id).unwrap();
        assert_eq!(repo.last_manifest_number(), None);
        repo.accept_manifest_number(5);
        assert_eq!(repo.last_manifest_number(), Some(5));
    }

    #[test]
    fn direct_rsync_failure_goes_straight_to_fail() {
        let mut table = RepoTable::new();
        let id = table.repo_lookup(&uri("rsync://host/repo"), None);
        let repo = table.get_mut(id).unwrap();
        repo.fetch_start();
        repo.rsync_finish(false);
        assert_eq!(repo.state(), RepoState::Fail);
    }
}
