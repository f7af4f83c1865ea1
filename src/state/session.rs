use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::config::MultiTraceConfig;
use crate::state::hop::Hop;
use crate::state::summary::{AggregateResult, PathKey, aggregate};

/// Everything one multi-path run produced, ready for export
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub started_at: DateTime<Utc>,
    pub local_ip: Ipv4Addr,
    pub remote_ip: Ipv4Addr,
    pub config: MultiTraceConfig,
    /// Hop list per path; paths whose trace failed are absent
    pub paths: BTreeMap<PathKey, Vec<Hop>>,
    pub summary: AggregateResult,
}

impl Session {
    /// Build a session from collected paths, computing the summary
    pub fn new(
        started_at: DateTime<Utc>,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        config: MultiTraceConfig,
        paths: BTreeMap<PathKey, Vec<Hop>>,
    ) -> Self {
        let summary = aggregate(remote_ip, &paths);
        Self {
            started_at,
            local_ip,
            remote_ip,
            config,
            paths,
            summary,
        }
    }

    /// Number of paths that reached the destination
    pub fn reached(&self) -> usize {
        self.summary.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_summary_matches_paths() {
        let local = Ipv4Addr::new(10, 0, 0, 1);
        let remote = Ipv4Addr::new(10, 9, 9, 9);
        let mut paths = BTreeMap::new();
        paths.insert(
            PathKey::new(local, 1, remote, 2),
            vec![Hop::reply(1, remote, Duration::from_millis(1))],
        );
        paths.insert(
            PathKey::new(local, 1, remote, 3),
            vec![Hop::timeout(1, Duration::ZERO)],
        );

        let session = Session::new(Utc::now(), local, remote, MultiTraceConfig::default(), paths);
        assert_eq!(session.reached(), 1);
        assert_eq!(session.summary.failed, 1);

        let json = serde_json::to_value(&session).unwrap();
        assert!(json["paths"]["10.0.0.1:1->10.9.9.9:2"].is_array());
        assert_eq!(json["summary"]["success"], 1);
    }
}
