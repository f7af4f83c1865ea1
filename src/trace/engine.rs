use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TraceConfig;
use crate::error::{Result, TraceError};
use crate::probe::codec::{DEFAULT_PAYLOAD, encode_probe};
use crate::probe::socket::{ProbeSender, RawSockets, ReplySource, SocketProvider, SourceCloser};
use crate::state::{Hop, PathKey};
use crate::trace::listener::{Reply, ReplyListener, spawn_listener};
use crate::trace::signatures::SentSignatures;

/// What ended the wait for a probe's reply
enum Wake {
    Reply(Reply),
    /// Deadline fired or the listener went away
    Stop,
}

/// One UDP traceroute between a fixed pair of endpoints.
///
/// Probes go out one TTL at a time; the next one is sent only after the
/// previous one got a reply or timed out, so any matching reply belongs to
/// the probe in flight.
#[derive(Debug, Clone)]
pub struct Trace {
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    local_port: u16,
    remote_port: u16,
    payload: Vec<u8>,
    config: TraceConfig,
}

impl Trace {
    pub fn new(
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        local_port: u16,
        remote_port: u16,
        payload: Option<Vec<u8>>,
        config: Option<TraceConfig>,
    ) -> Self {
        Self {
            local_ip,
            remote_ip,
            local_port,
            remote_port,
            payload: payload.unwrap_or_else(|| DEFAULT_PAYLOAD.to_vec()),
            config: config.unwrap_or_default(),
        }
    }

    pub fn key(&self) -> PathKey {
        PathKey::new(
            self.local_ip,
            self.local_port,
            self.remote_ip,
            self.remote_port,
        )
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Trace over raw sockets, giving up after `deadline`
    pub async fn run(&self, deadline: Duration) -> Result<Vec<Hop>> {
        self.run_for(&RawSockets, deadline).await
    }

    /// Trace with the given sockets, giving up after `deadline`
    pub async fn run_for<P: SocketProvider>(
        &self,
        provider: &P,
        deadline: Duration,
    ) -> Result<Vec<Hop>> {
        let cancel = cancel_after(&CancellationToken::new(), deadline);
        let result = self.run_with(provider, &cancel).await;
        // Stops the deadline timer
        cancel.cancel();
        result
    }

    /// Trace with the given sockets until done or until `cancel` fires.
    ///
    /// Fails only when a socket cannot be opened; everything after that ends
    /// up in the returned hop list.
    pub async fn run_with<P: SocketProvider>(
        &self,
        provider: &P,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hop>> {
        let key = self.key();
        let sender = provider
            .open_sender(self.local_ip, self.remote_ip, self.config.tos)
            .map_err(TraceError::Socket)?;
        let source = provider
            .open_source(self.config.timeout)
            .map_err(TraceError::Socket)?;
        let closer = source.closer().map_err(TraceError::Socket)?;

        let signatures = SentSignatures::new();
        let (tx, mut replies) = mpsc::channel(1);
        let listener_cancel = cancel.child_token();
        let listener = ReplyListener::new(
            source,
            self.local_ip,
            self.remote_ip,
            signatures.clone(),
            tx,
            listener_cancel.clone(),
        );
        let listener = spawn_listener(listener).map_err(TraceError::Socket)?;

        let mut hops: Vec<Hop> = Vec::new();

        for ttl in 1..=self.config.max_ttl {
            let probe = match self.probe(&sender, ttl) {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(path = %key, ttl, error = %e, "skipping ttl");
                    continue;
                }
            };
            signatures.record(&probe);

            // A reply that arrived after its probe was given up on
            while let Ok(stale) = replies.try_recv() {
                debug!(path = %key, ttl, ?stale, "dropping stale reply");
            }

            let sent_at = Instant::now();
            if let Err(source) = sender.send(&probe) {
                let e = TraceError::Send { ttl, source };
                warn!(path = %key, ttl, error = %e, "skipping ttl");
                continue;
            }

            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Stop,
                reply = replies.recv() => match reply {
                    Some(reply) => Wake::Reply(reply),
                    None => Wake::Stop,
                },
            };
            let rtt = sent_at.elapsed();
            let last_timed_out = hops.last().is_some_and(Hop::is_timeout);

            let hop = match wake {
                Wake::Reply(Reply::Router(ip)) => Hop::reply(ttl, ip, rtt),
                Wake::Reply(Reply::Unmatched) => Hop::timeout(ttl, rtt),
                Wake::Stop => {
                    if !last_timed_out {
                        hops.push(Hop::timeout(ttl, rtt));
                    }
                    debug!(path = %key, ttl, "trace stopped before a reply");
                    break;
                }
            };
            debug!(path = %key, %hop, "hop");

            // Two silent hops in a row: the path is dead from here on
            if hop.is_timeout() && last_timed_out {
                break;
            }

            let reached = hop.reached(self.remote_ip);
            hops.push(hop);
            if reached {
                break;
            }
        }

        listener_cancel.cancel();
        closer.close();
        // The listener may be parked on a full channel
        drop(replies);
        match tokio::task::spawn_blocking(move || listener.join()).await {
            Ok(Ok(())) => {}
            _ => warn!(path = %key, "reply listener did not stop cleanly"),
        }

        info!(path = %key, hops = hops.len(), "trace finished");
        Ok(hops)
    }

    /// Arm the TTL and build the probe for it
    fn probe<S: ProbeSender>(&self, sender: &S, ttl: u8) -> Result<Vec<u8>> {
        sender
            .set_ttl(ttl)
            .map_err(|source| TraceError::Send { ttl, source })?;
        encode_probe(
            self.local_ip,
            self.remote_ip,
            self.local_port,
            self.remote_port,
            self.config.tos,
            &self.payload,
        )
    }
}

/// Child of `parent` that is cancelled once `deadline` has passed
pub fn cancel_after(parent: &CancellationToken, deadline: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    token
}
