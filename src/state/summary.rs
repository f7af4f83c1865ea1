//! Multi-path outcome classification.
//!
//! Each traced path ends either at the destination or at the last router that
//! still answered. Grouping failed paths by that router points at common
//! failure points across the probed paths.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::state::hop::{Hop, SILENT};

/// Identifies one trace of a multi-path run: (local ip, local port, remote ip, remote port)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
}

impl PathKey {
    pub fn new(local_ip: Ipv4Addr, local_port: u16, remote_ip: Ipv4Addr, remote_port: u16) -> Self {
        Self {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
        }
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}:{}",
            self.local_ip, self.local_port, self.remote_ip, self.remote_port
        )
    }
}

impl Serialize for PathKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Last router a failed path reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LastRouter {
    /// No hop of the path ever answered
    Silent,
    Router(Ipv4Addr),
}

impl fmt::Display for LastRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Silent => f.write_str(SILENT),
            Self::Router(ip) => write!(f, "{}", ip),
        }
    }
}

impl Serialize for LastRouter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How one path ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOutcome {
    Reached,
    FailedAfter(LastRouter),
}

/// Address of the last hop that answered, if any.
///
/// A reply from the destination is itself a successful reply, so this is the
/// boundary between the reachable and unreachable part of the path.
pub fn find_boundary(hops: &[Hop]) -> Option<Ipv4Addr> {
    hops.iter().rev().find_map(|hop| hop.address)
}

/// Classify a finished path by its boundary hop
pub fn classify_path(remote_ip: Ipv4Addr, hops: &[Hop]) -> PathOutcome {
    match find_boundary(hops) {
        Some(ip) if ip == remote_ip => PathOutcome::Reached,
        Some(ip) => PathOutcome::FailedAfter(LastRouter::Router(ip)),
        None => PathOutcome::FailedAfter(LastRouter::Silent),
    }
}

/// Outcome of a multi-path run. Built once after every trace has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    /// Last reachable router => number of paths that failed beyond it
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub last_success_routers: BTreeMap<LastRouter, usize>,
    /// Last reachable router => the paths that failed beyond it
    #[serde(rename = "failed_pair", skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_pairs: BTreeMap<LastRouter, Vec<PathKey>>,
    #[serde(skip_serializing_if = "is_zero")]
    pub failed: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub success: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl AggregateResult {
    /// Number of paths that returned a hop list
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    fn record(&mut self, key: PathKey, outcome: PathOutcome) {
        match outcome {
            PathOutcome::Reached => self.success += 1,
            PathOutcome::FailedAfter(router) => {
                self.failed += 1;
                *self.last_success_routers.entry(router).or_default() += 1;
                self.failed_pairs.entry(router).or_default().push(key);
            }
        }
    }
}

/// Aggregate per-path hop lists into success/failure counts and failure points
pub fn aggregate<'a, I>(remote_ip: Ipv4Addr, paths: I) -> AggregateResult
where
    I: IntoIterator<Item = (&'a PathKey, &'a Vec<Hop>)>,
{
    let mut result = AggregateResult::default();
    for (key, hops) in paths {
        result.record(*key, classify_path(remote_ip, hops));
    }
    result
}
