//! Shared fixtures for unit tests: synthetic ICMP datagrams and an in-memory
//! network that answers probes like a scripted path of routers.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use crate::probe::socket::{ProbeSender, ReplySource, SocketProvider, SourceCloser};

pub const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const REMOTE: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

/// Build the datagram a raw ICMP socket would return for an ICMP error sent by
/// `router`, quoting a probe from `local` to `remote` whose UDP header is `udp_header`.
pub fn icmp_error_reply(
    icmp_type: u8,
    router: Ipv4Addr,
    local: Ipv4Addr,
    remote: Ipv4Addr,
    udp_header: &[u8],
) -> Vec<u8> {
    let mut packet = vec![0u8; 48 + udp_header.len()];

    // Outer IPv4: router -> local, protocol ICMP
    packet[0] = 0x45;
    let total = packet.len() as u16;
    packet[2..4].copy_from_slice(&total.to_be_bytes());
    packet[8] = 64;
    packet[9] = 1;
    packet[12..16].copy_from_slice(&router.octets());
    packet[16..20].copy_from_slice(&local.octets());

    // ICMP header
    packet[20] = icmp_type;
    packet[21] = if icmp_type == 3 { 3 } else { 0 };

    // Quoted IPv4: local -> remote, protocol UDP
    packet[28] = 0x45;
    let quoted_total = (20 + udp_header.len()) as u16;
    packet[30..32].copy_from_slice(&quoted_total.to_be_bytes());
    packet[36] = 1;
    packet[37] = 17;
    packet[40..44].copy_from_slice(&local.octets());
    packet[44..48].copy_from_slice(&remote.octets());

    packet[48..].copy_from_slice(udp_header);
    packet
}

/// Scripted network shared by every socket a [`MockNetwork`] opens.
///
/// A probe sent with TTL `t` toward remote port `p` is answered by hop `t - 1`
/// of the route configured for `p` (or the default route). `None` entries and
/// TTLs past the end of the route stay silent. Replies are broadcast to every
/// open reply source, like a wildcard raw ICMP socket sees all traffic.
#[derive(Default)]
struct Network {
    default_route: Vec<Option<Ipv4Addr>>,
    routes: HashMap<u16, Vec<Option<Ipv4Addr>>>,
    /// Datagrams delivered before every scripted reply
    noise: Vec<Vec<u8>>,
    fail_send_at: HashSet<u8>,
    /// `set_ttl(ttl)` sleeps this long before returning
    pause_at: HashMap<u8, Duration>,
    /// Router answering `ttl` only after the given delay
    late_at: HashMap<u8, (Ipv4Addr, Duration)>,
    fail_open_sender: bool,
    fail_open_source: bool,
    listeners: Vec<mpsc::Sender<Vec<u8>>>,
}

#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Mutex<Network>>,
    sent: Arc<AtomicUsize>,
    open_sources: Arc<AtomicUsize>,
}

impl MockNetwork {
    pub fn new(route: Vec<Option<Ipv4Addr>>) -> Self {
        let network = Self::default();
        network.inner.lock().default_route = route;
        network
    }

    /// Route used for probes toward `remote_port`
    pub fn with_route(self, remote_port: u16, route: Vec<Option<Ipv4Addr>>) -> Self {
        self.inner.lock().routes.insert(remote_port, route);
        self
    }

    pub fn with_noise(self, datagram: Vec<u8>) -> Self {
        self.inner.lock().noise.push(datagram);
        self
    }

    pub fn failing_send_at(self, ttl: u8) -> Self {
        self.inner.lock().fail_send_at.insert(ttl);
        self
    }

    pub fn pausing_at(self, ttl: u8, pause: Duration) -> Self {
        self.inner.lock().pause_at.insert(ttl, pause);
        self
    }

    /// `router` answers probes with `ttl` after `delay` instead of at once
    pub fn with_late_reply(self, ttl: u8, router: Ipv4Addr, delay: Duration) -> Self {
        self.inner.lock().late_at.insert(ttl, (router, delay));
        self
    }

    pub fn failing_sender(self) -> Self {
        self.inner.lock().fail_open_sender = true;
        self
    }

    pub fn failing_source(self) -> Self {
        self.inner.lock().fail_open_source = true;
        self
    }

    /// Number of probes transmitted so far
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Reply sources opened and not yet dropped
    pub fn open_sources(&self) -> usize {
        self.open_sources.load(Ordering::SeqCst)
    }

    fn broadcast(&self, deliveries: &[Vec<u8>]) {
        self.inner
            .lock()
            .listeners
            .retain(|tx| deliveries.iter().all(|d| tx.send(d.clone()).is_ok()));
    }
}

impl SocketProvider for MockNetwork {
    type Sender = MockSender;
    type Source = MockSource;

    fn open_sender(
        &self,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        _tos: u8,
    ) -> io::Result<MockSender> {
        if self.inner.lock().fail_open_sender {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(MockSender {
            network: self.clone(),
            local_ip,
            remote_ip,
            ttl: AtomicU8::new(64),
        })
    }

    fn open_source(&self, read_timeout: Duration) -> io::Result<MockSource> {
        let mut inner = self.inner.lock();
        if inner.fail_open_source {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        let (tx, rx) = mpsc::channel();
        inner.listeners.push(tx.clone());
        self.open_sources.fetch_add(1, Ordering::SeqCst);
        Ok(MockSource {
            rx,
            read_timeout,
            wake: tx,
            closed: Arc::new(AtomicBool::new(false)),
            open_sources: Arc::clone(&self.open_sources),
        })
    }
}

pub struct MockSender {
    network: MockNetwork,
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    ttl: AtomicU8,
}

impl ProbeSender for MockSender {
    fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        self.ttl.store(ttl, Ordering::SeqCst);
        let pause = self.network.inner.lock().pause_at.get(&ttl).copied();
        if let Some(pause) = pause {
            thread::sleep(pause);
        }
        Ok(())
    }

    fn send(&self, probe: &[u8]) -> io::Result<usize> {
        let ttl = self.ttl.load(Ordering::SeqCst);
        let mut inner = self.network.inner.lock();
        if inner.fail_send_at.contains(&ttl) {
            return Err(io::Error::from(io::ErrorKind::NetworkUnreachable));
        }
        self.network.sent.fetch_add(1, Ordering::SeqCst);

        let remote_port = u16::from_be_bytes([probe[2], probe[3]]);
        let route = inner
            .routes
            .get(&remote_port)
            .unwrap_or(&inner.default_route);
        let router = route.get(ttl as usize - 1).copied().flatten();

        if let Some(&(late, delay)) = inner.late_at.get(&ttl) {
            let reply = icmp_error_reply(11, late, self.local_ip, self.remote_ip, &probe[..8]);
            let network = self.network.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                network.broadcast(&[reply]);
            });
        }

        let mut deliveries = inner.noise.clone();
        if let Some(router) = router {
            let icmp_type = if router == self.remote_ip { 3 } else { 11 };
            deliveries.push(icmp_error_reply(
                icmp_type,
                router,
                self.local_ip,
                self.remote_ip,
                &probe[..8],
            ));
        }
        inner
            .listeners
            .retain(|tx| deliveries.iter().all(|d| tx.send(d.clone()).is_ok()));

        Ok(probe.len())
    }
}

pub struct MockSource {
    rx: mpsc::Receiver<Vec<u8>>,
    read_timeout: Duration,
    /// Own end of the channel, used to wake a blocked `recv` on close
    wake: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
    open_sources: Arc<AtomicUsize>,
}

impl ReplySource for MockSource {
    type Closer = MockCloser;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        let result = self.rx.recv_timeout(self.read_timeout);
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        match result {
            Ok(datagram) => Ok(deliver(&datagram, buf)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(io::Error::from(io::ErrorKind::TimedOut)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(io::Error::from(io::ErrorKind::UnexpectedEof))
            }
        }
    }

    fn closer(&self) -> io::Result<MockCloser> {
        Ok(MockCloser {
            wake: self.wake.clone(),
            closed: Arc::clone(&self.closed),
        })
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.open_sources.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockCloser {
    wake: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl SourceCloser for MockCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.wake.send(Vec::new());
    }
}

/// Closer for sources that never block
pub struct NoopCloser;

impl SourceCloser for NoopCloser {
    fn close(&self) {}
}

/// Copy a datagram into a read buffer, reporting its outer IPv4 source as the peer
fn deliver(datagram: &[u8], buf: &mut [u8]) -> (usize, Ipv4Addr) {
    let len = datagram.len().min(buf.len());
    buf[..len].copy_from_slice(&datagram[..len]);
    let peer = if datagram.len() >= 16 {
        Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15])
    } else {
        Ipv4Addr::UNSPECIFIED
    };
    (len, peer)
}

/// Reply source replaying a fixed list of read results, then reporting closed
pub struct ScriptedSource {
    reads: VecDeque<io::Result<Vec<u8>>>,
}

impl ScriptedSource {
    pub fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
        Self {
            reads: reads.into(),
        }
    }
}

impl ReplySource for ScriptedSource {
    type Closer = NoopCloser;

    fn closer(&self) -> io::Result<NoopCloser> {
        Ok(NoopCloser)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        match self.reads.pop_front() {
            Some(Ok(datagram)) => Ok(deliver(&datagram, buf)),
            Some(Err(e)) => Err(e),
            None => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        }
    }
}
