use std::io;
use std::net::Ipv4Addr;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::probe::correlate::{IcmpMessage, parse_icmp_message};
use crate::probe::socket::{ReplySource, is_closed, is_timeout};
use crate::trace::signatures::SentSignatures;

/// Largest datagram read from the ICMP socket
const RECV_BUFFER_SIZE: usize = 1500;

/// What the listener hands to its trace for one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// A router answered one of the trace's probes
    Router(Ipv4Addr),
    /// The read timed out, returned nothing, or did not parse
    Unmatched,
}

/// Reads ICMP replies for one trace and forwards the ones that quote its probes.
///
/// The socket sees every ICMP message arriving at the host, including replies
/// to other traces running at the same time, so filtering happens here.
pub struct ReplyListener<S> {
    source: S,
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    signatures: SentSignatures,
    replies: mpsc::Sender<Reply>,
    cancel: CancellationToken,
}

impl<S: ReplySource> ReplyListener<S> {
    pub fn new(
        source: S,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        signatures: SentSignatures,
        replies: mpsc::Sender<Reply>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            local_ip,
            remote_ip,
            signatures,
            replies,
            cancel,
        }
    }

    /// Read loop. Blocks on the socket, bounded by its read deadline.
    ///
    /// Returns once the trace is cancelled, the trace dropped its end of the
    /// channel, or the socket reports it is closed.
    pub fn run_blocking(mut self) {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            if self.cancel.is_cancelled() || self.replies.is_closed() {
                break;
            }

            let reply = match self.source.recv(&mut buffer) {
                Ok((0, _)) => Some(Reply::Unmatched),
                Ok((len, peer)) => self.classify(&buffer[..len], peer),
                Err(e) if is_closed(&e) => {
                    debug!(error = %e, "reply source closed");
                    break;
                }
                Err(e) if is_timeout(&e) => Some(Reply::Unmatched),
                Err(e) => {
                    debug!(error = %e, "icmp read failed");
                    Some(Reply::Unmatched)
                }
            };

            if let Some(reply) = reply
                && self.replies.blocking_send(reply).is_err()
            {
                break;
            }
        }

        trace!(local = %self.local_ip, remote = %self.remote_ip, "listener stopped");
    }

    fn classify(&self, data: &[u8], peer: Ipv4Addr) -> Option<Reply> {
        classify(data, peer, self.local_ip, self.remote_ip, &self.signatures)
    }
}

/// Decide what one inbound datagram means for the trace `local_ip -> remote_ip`.
///
/// `None` means the datagram is not ours and is dropped silently.
pub fn classify(
    data: &[u8],
    peer: Ipv4Addr,
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    signatures: &SentSignatures,
) -> Option<Reply> {
    let message = match parse_icmp_message(data) {
        Ok(message) => message,
        Err(e) => {
            trace!(error = %e, %peer, "unparseable icmp datagram");
            return Some(Reply::Unmatched);
        }
    };

    let IcmpMessage::Error {
        quote: Some(quote), ..
    } = message
    else {
        return None;
    };

    if quote.source != local_ip || quote.destination != remote_ip {
        return None;
    }
    if !signatures.contains(&quote.udp_header) {
        return None;
    }

    Some(Reply::Router(peer))
}

/// Spawn the listener on a dedicated OS thread
pub fn spawn_listener<S: ReplySource>(listener: ReplyListener<S>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("icmp-listener".into())
        .spawn(move || listener.run_blocking())
}
