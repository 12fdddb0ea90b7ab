//! The orchestrator.
//!
//! Owns the validation engine and drives one validation run end to end:
//! spawn the worker processes, walk every TAL, fetch each publication
//! point through the appropriate transport worker, drain the entity
//! queue through the parser workers, then clean up cache files nothing
//! referenced this run. Nothing here decodes ASN.1 or touches the
//! network directly -- that's the workers' job, reached only through
//! the framed channels opened at startup.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::{fork, ForkResult, Pid};

use crate::config::Config;
use crate::error::Fatal;
use crate::ipc::framed::{read_buf, read_u32, read_u8, write_buf, write_str, write_u8};
use crate::ipc::ParserClient;
use crate::metrics::Metrics;
use crate::queue::Entity;
use crate::repo::RepoId;
use crate::tal::Tal;
use crate::uri::Uri;
use crate::validation::ValidationEngine;
use crate::workers::{http, parser, rrdp, rsync};

//------------ Worker -------------------------------------------------------------

/// One forked worker process and the orchestrator's end of its socket.
struct Worker {
    pid: Pid,
    stream: UnixStream,
}

impl Worker {
    fn spawn<F>(body: F) -> Result<Worker, Fatal>
    where
        F: FnOnce(UnixStream) -> io::Result<()>,
    {
        let (parent_fd, child_fd) = socketpair(
            AddressFamily::Unix, SockType::Stream, None, SockFlag::empty(),
        ).map_err(|err| {
            warn!("failed to create worker socket pair: {}", err);
            Fatal::WorkerGone
        })?;

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                let _ = nix::unistd::close(child_fd);
                let stream = unsafe { UnixStream::from_raw_fd(parent_fd) };
                Ok(Worker { pid: child, stream })
            }
            Ok(ForkResult::Child) => {
                let _ = nix::unistd::close(parent_fd);
                let stream = unsafe { UnixStream::from_raw_fd(child_fd) };
                let code = if body(stream).is_ok() { 0 } else { 1 };
                std::process::exit(code);
            }
            Err(err) => {
                warn!("failed to fork worker: {}", err);
                Err(Fatal::WorkerGone)
            }
        }
    }

    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = nix::sys::wait::waitpid(self.pid, Some(nix::sys::wait::WaitPidFlag::WNOHANG));
    }
}

//------------ Orchestrator -------------------------------------------------------

pub struct Orchestrator {
    config: Config,
    engine: ValidationEngine,
    parser: Vec<Worker>,
    rsync: Worker,
    http: Worker,
    rrdp: Worker,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self, Fatal> {
        let parser_count = config.parser_workers.max(1);
        let mut parser_workers = Vec::with_capacity(parser_count);
        for _ in 0..parser_count {
            parser_workers.push(Worker::spawn(|stream| parser::run(stream))?);
        }

        let rsync_cmd = config.rsync_command.display().to_string();
        let rsync_timeout = Some(config.repository_timeout);
        let rsync_worker = Worker::spawn(move |stream| {
            rsync::run(stream, &rsync_cmd, rsync_timeout)
        })?;

        let http_worker = Worker::spawn(|stream| {
            let client = http::build_client("rpki-client-rs", Some(Duration::from_secs(30)))
                .map_err(io::Error::other)?;
            http::run(stream, &client)
        })?;

        let cache_dir = config.cache_dir.clone();
        let rrdp_worker = Worker::spawn(move |stream| rrdp::run(stream, &cache_dir))?;

        Ok(Orchestrator {
            config,
            engine: ValidationEngine::new(),
            parser: parser_workers,
            rsync: rsync_worker,
            http: http_worker,
            rrdp: rrdp_worker,
        })
    }

    /// Runs one full validation pass: load TALs, fetch every publication
    /// point reachable from them, validate everything the fetch turned
    /// up, and clean stale cache entries.
    pub fn run(&mut self) -> Result<Metrics, Fatal> {
        let mut metrics = Metrics::new();
        metrics.mark_start();

        let tals = self.load_tals(&mut metrics)?;
        for tal in &tals {
            metrics.tals.push(tal.name().to_string());
            self.seed_ta(tal);
        }

        // A trust anchor's own certificate doesn't live behind a fetch;
        // everything it points to, from here on, does. Each pass over
        // the queue may turn up new repositories via certificates it
        // just installed, so keep alternating sync and drain until a
        // round changes nothing.
        let strict = self.config.strict;
        loop {
            let synced = self.sync_pending_repos(&mut metrics);
            {
                let mut client = ParserClient::new(&mut self.parser[0].stream);
                self.engine.drain_ready(&mut client, strict, &mut metrics);
            }
            if !synced {
                break;
            }
        }

        if !self.config.dirty {
            self.cleanup(&mut metrics);
        }

        metrics.mark_done();
        info!(
            "validation run complete: {} VRPs ({} unique) from {} TALs in {:?}",
            metrics.vrps, metrics.uniqs, metrics.tals.len(), metrics.wall_time,
        );
        Ok(metrics)
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    /// Number of parser worker processes standing by.
    ///
    /// Only `self.parser[0]` is currently handed to the validation engine
    /// as its dispatch target; the rest of the pool stands by unused.
    /// Load-balancing validation requests across the whole pool would
    /// need per-object work stealing the engine doesn't do yet -- see
    /// `DESIGN.md`.
    pub fn parser_pool_size(&self) -> usize {
        self.parser.len()
    }

    fn load_tals(&self, metrics: &mut Metrics) -> Result<Vec<Tal>, Fatal> {
        let mut tals = Vec::new();
        let entries = Tal::read_dir(&self.config.tal_dir).map_err(|err| {
            warn!("cannot read TAL directory {}: {}", self.config.tal_dir.display(), err);
            Fatal::Config
        })?;
        for entry in entries {
            match entry {
                Ok(tal) => tals.push(tal),
                Err(err) => {
                    warn!("skipping bad TAL: {}", err);
                    metrics.certs_invalid += 1;
                }
            }
        }
        if tals.is_empty() {
            warn!("no usable TALs found in {}", self.config.tal_dir.display());
        }
        Ok(tals)
    }

    /// Queues a trust anchor certificate for every candidate URI a TAL
    /// lists, in order; only the first one that actually fetches and
    /// parses matters, but all of them need their repository entries.
    fn seed_ta(&mut self, tal: &Tal) {
        for uri in tal.uris() {
            let repo_id = self.engine.repos.ta_lookup(uri);
            self.engine.queue.push_ready(Entity {
                kind: crate::object::EntityKind::Cer,
                path: self.config.cache_dir.join(uri.cache_relpath()),
                ta_key: Some(tal.key_info().to_vec()),
                issuer_ski: None,
                tal: tal.name().to_string(),
                repo: Some(repo_id),
            });
        }
    }

    /// Fetches every repository still in its initial state, returning
    /// whether any work was actually done this round.
    fn sync_pending_repos(&mut self, metrics: &mut Metrics) -> bool {
        let pending: Vec<RepoId> = self.engine.repos.iter()
            .filter(|r| matches!(r.state(), crate::repo::RepoState::New))
            .map(|r| r.id)
            .collect();
        if pending.is_empty() {
            return false;
        }
        for id in pending {
            self.sync_one_repo(id, metrics);
        }
        true
    }

    fn sync_one_repo(&mut self, id: RepoId, metrics: &mut Metrics) {
        let (point, notify) = match self.engine.repos.get_mut(id) {
            Some(repo) => {
                repo.fetch_start();
                (repo.point.clone(), repo.notify.clone())
            }
            None => return,
        };

        let mut ok = false;
        if let Some(notify_uri) = &notify {
            ok = self.fetch_rrdp(notify_uri);
            if let Some(repo) = self.engine.repos.get_mut(id) {
                repo.rrdp_finish(ok);
            }
            if ok {
                metrics.rrdp_repos += 1;
            } else {
                metrics.rrdp_fails += 1;
            }
        }

        if !ok {
            let dest = self.config.cache_dir.join(point.cache_relpath());
            let outcome = self.fetch_rsync(&point, &dest);
            if let Some(repo) = self.engine.repos.get_mut(id) {
                match outcome {
                    FetchOutcome::Ok => repo.rsync_finish(true),
                    FetchOutcome::Failed => repo.rsync_finish(false),
                    FetchOutcome::TimedOut => repo.timeout(),
                }
            }
            ok = matches!(outcome, FetchOutcome::Ok);
            if ok {
                metrics.rsync_repos += 1;
            } else {
                metrics.rsync_fails += 1;
            }
        }

        if ok {
            self.engine.queue.flush_repo(id);
        } else {
            let dropped = self.engine.queue.drop_repo(id);
            if dropped > 0 {
                debug!("dropped {} entities pending on failed repository {}", dropped, point);
            }
        }
    }

    /// Fetches an RRDP notification file and applies its snapshot
    /// through the RRDP worker. A malformed notification, a hash
    /// mismatch, or a transport failure are all reported back as a
    /// plain fetch failure -- the caller falls back to rsync either way.
    ///
    /// Always fetches the full snapshot rather than walking the delta
    /// chain: the delta chain is a bandwidth optimization RFC 8182
    /// allows, not a correctness requirement, and always landing on the
    /// snapshot keeps this path simple.
    fn fetch_rrdp(&mut self, notify: &Uri) -> bool {
        let timeout = self.config.repository_timeout;
        let body = match http_fetch(&mut self.http.stream, self.http.fd(), notify.as_str(), timeout) {
            Some(body) => body,
            None => return false,
        };
        let notification = match rrdp::parse_notification(&body) {
            Ok(notification) => notification,
            Err(err) => {
                warn!("RRDP notification at {} malformed: {}", notify, err);
                return false;
            }
        };
        let snapshot = notification.snapshot();
        let snapshot_body = match http_fetch(
            &mut self.http.stream, self.http.fd(), &snapshot.uri().to_string(), timeout,
        ) {
            Some(body) => body,
            None => return false,
        };
        if rpki::rrdp::Hash::from_data(&snapshot_body) != *snapshot.hash() {
            warn!("RRDP snapshot at {} failed hash check", snapshot.uri());
            return false;
        }
        self.apply_rrdp_snapshot(&snapshot_body)
    }

    /// Hands a fetched snapshot body to the RRDP worker for application
    /// and waits for its status, bounded by the repository watchdog.
    fn apply_rrdp_snapshot(&mut self, body: &[u8]) -> bool {
        if write_u8(&mut self.rrdp.stream, 0).is_err()
            || write_buf(&mut self.rrdp.stream, body).is_err()
        {
            return false;
        }
        if !wait_readable(self.rrdp.fd(), self.config.repository_timeout) {
            warn!("rrdp snapshot application timed out");
            return false;
        }
        matches!(read_u8(&mut self.rrdp.stream), Ok(1))
    }

    /// Sends one fetch request to the rsync worker and waits, bounded by
    /// the configured repository timeout, for its completion status.
    /// The watchdog never waits for the rsync process itself to die --
    /// it just stops trusting this round's answer and moves on, exactly
    /// like a direct rsync failure.
    fn fetch_rsync(&mut self, module: &Uri, destination: &Path) -> FetchOutcome {
        if write_str(&mut self.rsync.stream, module.as_str()).is_err()
            || write_str(&mut self.rsync.stream, &destination.display().to_string()).is_err()
        {
            return FetchOutcome::Failed;
        }
        if !wait_readable(self.rsync.fd(), self.config.repository_timeout) {
            warn!("rsync of {} timed out", module);
            return FetchOutcome::TimedOut;
        }
        match read_u8(&mut self.rsync.stream) {
            Ok(byte) if byte != 0 => FetchOutcome::Ok,
            _ => FetchOutcome::Failed,
        }
    }

    /// Removes every cache file and directory that no repository
    /// claimed during this run, counting what it removes.
    fn cleanup(&mut self, metrics: &mut Metrics) {
        let mut claimed: HashSet<PathBuf> = HashSet::new();
        for repo in self.engine.repos.iter() {
            for path in repo.claimed_paths() {
                claimed.insert(path.clone());
            }
        }
        walk_and_prune(&self.config.cache_dir, &claimed, metrics);
    }
}

/// The three ways a transport fetch can end: success, an ordinary
/// failure (bad exit status, malformed response), or a watchdog
/// timeout -- the repository state machine treats the last one
/// specially, discarding any later completion outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FetchOutcome {
    Ok,
    Failed,
    TimedOut,
}

/// Blocks until `fd` has data to read or `timeout` elapses, returning
/// whether it became readable in time.
fn wait_readable(fd: RawFd, timeout: Duration) -> bool {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
    matches!(poll(&mut fds, millis), Ok(n) if n > 0)
}

fn walk_and_prune(dir: &Path, claimed: &HashSet<PathBuf>, metrics: &mut Metrics) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            walk_and_prune(&path, claimed, metrics);
            if fs::read_dir(&path).map(|mut d| d.next().is_none()).unwrap_or(false) {
                if fs::remove_dir(&path).is_ok() {
                    metrics.del_dirs += 1;
                }
            }
        } else if !claimed.contains(&path) {
            if fs::remove_file(&path).is_ok() {
                metrics.del_files += 1;
            }
        }
    }
}

/// Sends a plain `GET` request to the HTTP worker and waits for the
/// body, bounded by the repository watchdog timeout. Used for RRDP
/// notification/snapshot/delta fetches that have no prior ETag on file
/// yet.
fn http_fetch<S: Read + Write>(stream: &mut S, fd: RawFd, uri: &str, timeout: Duration) -> Option<Vec<u8>> {
    crate::ipc::framed::write_buf(stream, uri.as_bytes()).ok()?;
    write_u8(stream, 0).ok()?; // no ETag on file
    if !wait_readable(fd, timeout) {
        warn!("http fetch of {} timed out", uri);
        return None;
    }
    let ok = read_u8(stream).ok()? != 0;
    if !ok {
        return None;
    }
    let _not_modified = read_u8(stream).ok()?;
    let has_etag = read_u8(stream).ok()? != 0;
    if has_etag {
        let _ = read_buf(stream).ok()?;
    }
    let len = read_u32(stream).ok()?;
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).ok()?;
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_and_prune_removes_unclaimed_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stale.cer");
        fs::write(&file, b"x").unwrap();
        let mut metrics = Metrics::new();
        walk_and_prune(dir.path(), &HashSet::new(), &mut metrics);
        assert!(!file.exists());
        assert_eq!(metrics.del_files, 1);
    }

    #[test]
    fn walk_and_prune_keeps_claimed_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keep.cer");
        fs::write(&file, b"x").unwrap();
        let mut claimed = HashSet::new();
        claimed.insert(file.clone());
        let mut metrics = Metrics::new();
        walk_and_prune(dir.path(), &claimed, &mut metrics);
        assert!(file.exists());
        assert_eq!(metrics.del_files, 0);
    }
}
