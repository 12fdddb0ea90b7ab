//! Run statistics.
//!
//! One [`Metrics`] value accumulates the counts the specification's
//! "Outputs" section calls for: per-category object and failure counts,
//! repository counts per protocol, unique vs. total VRPs, deleted
//! files/dirs, and timing. It is threaded through a single validation
//! run and serialized at the end alongside the VRP dump.

use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct Metrics {
    pub tals: Vec<String>,

    pub certs: u64,
    pub certs_fail: u64,
    pub certs_invalid: u64,

    pub mfts: u64,
    pub mfts_fail: u64,
    pub mfts_stale: u64,

    pub crls: u64,
    pub crls_fail: u64,

    pub roas: u64,
    pub roas_fail: u64,
    pub roas_invalid: u64,

    pub gbrs: u64,
    pub gbrs_fail: u64,

    pub rsync_repos: u64,
    pub rrdp_repos: u64,
    pub http_repos: u64,
    pub rrdp_fails: u64,
    pub rsync_fails: u64,

    pub vrps: u64,
    pub uniqs: u64,

    pub del_files: u64,
    pub del_dirs: u64,

    #[serde(skip)]
    started: Option<Instant>,

    pub wall_time: Duration,

    pub timestamp: Option<DateTime<Utc>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics { timestamp: Some(Utc::now()), ..Metrics::default() }
    }

    pub fn mark_start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn mark_done(&mut self) {
        if let Some(started) = self.started {
            self.wall_time = started.elapsed();
        }
    }

    /// The run's exit-code rule: zero iff at least one TA produced at
    /// least one VRP.
    pub fn produced_any_vrps(&self) -> bool {
        self.vrps > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_vrps_means_unsuccessful_run() {
        let metrics = Metrics::new();
        assert!(!metrics.produced_any_vrps());
    }
}
