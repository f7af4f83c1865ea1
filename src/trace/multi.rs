//! Concurrent traces over several port pairs toward one destination.
//!
//! Routers that balance flows by port send each pair down a possibly
//! different path. Every pair gets its own trace and its own deadline; the
//! results are only compared after all of them have finished.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::MultiTraceConfig;
use crate::probe::socket::{RawSockets, SocketProvider};
use crate::state::{AggregateResult, Hop, PathKey, aggregate};
use crate::trace::engine::Trace;

/// Run one trace per `(local_ports[i], remote_ports[i])` pair over raw sockets
/// and return the hop list of every trace that did not fail.
///
/// Extra entries on the longer port list are ignored.
pub async fn collect_paths(
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    local_ports: &[u16],
    remote_ports: &[u16],
    config: &MultiTraceConfig,
) -> BTreeMap<PathKey, Vec<Hop>> {
    collect_paths_with(RawSockets, local_ip, remote_ip, local_ports, remote_ports, config).await
}

/// [`collect_paths`] with the given sockets
pub async fn collect_paths_with<P>(
    provider: P,
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    local_ports: &[u16],
    remote_ports: &[u16],
    config: &MultiTraceConfig,
) -> BTreeMap<PathKey, Vec<Hop>>
where
    P: SocketProvider + Clone + 'static,
{
    let mut tasks = JoinSet::new();

    for (&local_port, &remote_port) in local_ports.iter().zip(remote_ports) {
        let trace = Trace::new(
            local_ip,
            remote_ip,
            local_port,
            remote_port,
            None,
            Some(config.trace),
        );
        let provider = provider.clone();
        let deadline = config.deadline;
        tasks.spawn(async move {
            let result = trace.run_for(&provider, deadline).await;
            (trace.key(), result)
        });
    }

    let mut paths = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, Ok(hops))) => {
                debug!(path = %key, hops = hops.len(), "collected path");
                paths.insert(key, hops);
            }
            Ok((key, Err(e))) => warn!(path = %key, error = %e, "trace failed, path omitted"),
            Err(e) => warn!(error = %e, "trace task aborted"),
        }
    }
    paths
}

/// Trace every port pair over raw sockets with default settings and classify
/// where each path ended
pub async fn multi_trace(
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    local_ports: &[u16],
    remote_ports: &[u16],
) -> AggregateResult {
    multi_trace_with(
        RawSockets,
        local_ip,
        remote_ip,
        local_ports,
        remote_ports,
        &MultiTraceConfig::default(),
    )
    .await
}

/// [`multi_trace`] with the given sockets and configuration
pub async fn multi_trace_with<P>(
    provider: P,
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    local_ports: &[u16],
    remote_ports: &[u16],
    config: &MultiTraceConfig,
) -> AggregateResult
where
    P: SocketProvider + Clone + 'static,
{
    let paths = collect_paths_with(
        provider,
        local_ip,
        remote_ip,
        local_ports,
        remote_ports,
        config,
    )
    .await;
    aggregate(remote_ip, &paths)
}
