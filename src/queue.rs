//! The entity and work queue.

use std::collections::VecDeque;
use std::path::PathBuf;
use rpki::repository::crypto::keys::KeyIdentifier;
use crate::object::EntityKind;
use crate::repo::RepoId;

//------------ Entity -----------------------------------------------------------

/// One item of work: an object waiting to be parsed and validated.
#[derive(Clone, Debug)]
pub struct Entity {
    pub kind: EntityKind,
    pub path: PathBuf,

    /// Overrides the issuer's public key for a trust anchor certificate;
    /// `None` for every other entity kind.
    pub ta_key: Option<Vec<u8>>,

    /// The SKI of the CA whose manifest named this entity -- the parser
    /// worker validates every object's signature against its issuer's
    /// already-cached certificate, so this is how the engine tells it
    /// which one. `None` only for a trust anchor certificate, which has
    /// no issuer.
    pub issuer_ski: Option<KeyIdentifier>,

    /// The TAL this entity's chain traces back to, used as VRP
    /// provenance and as the display name in diagnostics.
    pub tal: String,

    /// The repository this entity's file lives under, if it is gated on
    /// that repository's sync completing.
    pub repo: Option<RepoId>,
}

//------------ EntityQueue -------------------------------------------------------

/// A FIFO of entities pending parse/validate.
///
/// Items whose repository is still syncing are held in `deferred` rather
/// than dropped; [`EntityQueue::flush_repo`] moves them back onto the
/// ready queue once that repository transitions to `READY`.
#[derive(Default)]
pub struct EntityQueue {
    ready: VecDeque<Entity>,
    deferred: Vec<Entity>,
}

impl EntityQueue {
    pub fn new() -> Self {
        EntityQueue::default()
    }

    pub fn push_ready(&mut self, entity: Entity) {
        self.ready.push_back(entity);
    }

    pub fn defer(&mut self, entity: Entity) {
        self.deferred.push(entity);
    }

    pub fn pop_ready(&mut self) -> Option<Entity> {
        self.ready.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.deferred.is_empty()
    }

    /// `entityq_flush`: moves every entity deferred on `repo` back onto
    /// the ready queue, in the order they were deferred.
    pub fn flush_repo(&mut self, repo: RepoId) {
        let (matching, rest): (Vec<_>, Vec<_>) = self.deferred.drain(..)
            .partition(|entity| entity.repo == Some(repo));
        self.deferred = rest;
        for entity in matching {
            self.ready.push_back(entity);
        }
    }

    /// Drops every entity deferred on `repo`, counting them as failed --
    /// used when a repository sync definitively fails.
    pub fn drop_repo(&mut self, repo: RepoId) -> usize {
        let before = self.deferred.len();
        self.deferred.retain(|entity| entity.repo != Some(repo));
        before - self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(repo: Option<RepoId>) -> Entity {
        Entity {
            kind: EntityKind::Cer,
            path: PathBuf::from("/tmp/x.cer"),
            ta_key: None,
            issuer_ski: None,
            tal: "example".into(),
            repo,
        }
    }

    #[test]
    fn deferred_entities_are_not_dropped_on_flush() {
        let mut queue = EntityQueue::new();
        queue.defer(entity(Some(RepoId(1))));
        queue.flush_repo(RepoId(1));
        assert!(queue.pop_ready().is_some());
    }

    #[test]
    fn drop_repo_counts_dropped_entities() {
        let mut queue = EntityQueue::new();
        queue.defer(entity(Some(RepoId(1))));
        queue.defer(entity(Some(RepoId(2))));
        assert_eq!(queue.drop_repo(RepoId(1)), 1);
        assert!(!queue.is_empty());
    }
}
