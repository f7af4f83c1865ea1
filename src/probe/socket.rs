use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Send/receive buffer size for the probe socket
pub const PROBE_SOCKET_BUFFER: usize = 20 * 1024 * 1024;

/// Sending half of a trace: one socket, fixed source and destination.
pub trait ProbeSender: Send {
    /// Set the TTL used for subsequent probes
    fn set_ttl(&self, ttl: u8) -> io::Result<()>;

    /// Transmit an encoded probe (UDP header + payload)
    fn send(&self, probe: &[u8]) -> io::Result<usize>;
}

/// Receiving half of a trace: a blocking ICMP reader bounded by a read deadline.
///
/// `recv` returns the number of bytes written into `buf` (a full IPv4 datagram)
/// and the address of the peer that sent it. An expired deadline surfaces as
/// `TimedOut` or `WouldBlock`; see [`is_closed`] for the end-of-stream kinds.
pub trait ReplySource: Send + 'static {
    type Closer: SourceCloser;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)>;

    /// Handle that closes this source from another thread
    fn closer(&self) -> io::Result<Self::Closer>;
}

/// Closes a [`ReplySource`] while its reader may be blocked in `recv`.
///
/// After `close`, a pending or later `recv` fails with an error
/// [`is_closed`] accepts.
pub trait SourceCloser: Send + 'static {
    fn close(&self);
}

/// Opens the sockets a trace needs.
pub trait SocketProvider: Send + Sync {
    type Sender: ProbeSender;
    type Source: ReplySource;

    /// Open the probe socket, bound to `local_ip`, sending to `remote_ip`
    fn open_sender(&self, local_ip: Ipv4Addr, remote_ip: Ipv4Addr, tos: u8)
    -> io::Result<Self::Sender>;

    /// Open an ICMP listener on the wildcard address with the given read deadline
    fn open_source(&self, read_timeout: Duration) -> io::Result<Self::Source>;
}

/// Whether a read error means the transport is gone for good
pub fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
    )
}

/// Whether a read error is an expired read deadline
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Raw socket provider. Needs root or CAP_NET_RAW.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSockets;

impl SocketProvider for RawSockets {
    type Sender = RawProbeSocket;
    type Source = RawIcmpSocket;

    fn open_sender(
        &self,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        tos: u8,
    ) -> io::Result<RawProbeSocket> {
        RawProbeSocket::open(local_ip, remote_ip, tos)
    }

    fn open_source(&self, read_timeout: Duration) -> io::Result<RawIcmpSocket> {
        RawIcmpSocket::open(read_timeout)
    }
}

/// Raw `IPPROTO_UDP` socket: we write the UDP header, the kernel writes IPv4
#[derive(Debug)]
pub struct RawProbeSocket {
    socket: Socket,
    target: SockAddr,
}

impl RawProbeSocket {
    pub fn open(local_ip: Ipv4Addr, remote_ip: Ipv4Addr, tos: u8) -> io::Result<Self> {
        let socket = create_udp_send_socket()?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(local_ip, 0)))?;

        // Best effort, the kernel caps these at rmem_max/wmem_max
        if let Err(e) = socket.set_send_buffer_size(PROBE_SOCKET_BUFFER) {
            debug!(error = %e, "could not enlarge send buffer");
        }
        if let Err(e) = socket.set_recv_buffer_size(PROBE_SOCKET_BUFFER) {
            debug!(error = %e, "could not enlarge receive buffer");
        }
        if tos != 0 {
            socket.set_tos(tos as u32)?;
        }

        Ok(Self {
            socket,
            // Raw sockets ignore the port
            target: SockAddr::from(SocketAddrV4::new(remote_ip, 0)),
        })
    }
}

impl ProbeSender for RawProbeSocket {
    fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        self.socket.set_ttl(ttl as u32)
    }

    fn send(&self, probe: &[u8]) -> io::Result<usize> {
        self.socket.send_to(probe, &self.target)
    }
}

/// Raw ICMPv4 socket bound to the wildcard address.
///
/// Every raw ICMP socket on the host sees every inbound ICMP message, so
/// replies must be filtered by the reader.
#[derive(Debug)]
pub struct RawIcmpSocket {
    socket: Socket,
    closed: Arc<AtomicBool>,
}

impl RawIcmpSocket {
    pub fn open(read_timeout: Duration) -> io::Result<Self> {
        let socket = create_raw_icmp_socket()?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))?;
        // SO_RCVTIMEO applies to each recv call
        socket.set_read_timeout(Some(read_timeout))?;
        let _ = socket.set_recv_buffer_size(1024 * 1024);
        Ok(Self {
            socket,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl ReplySource for RawIcmpSocket {
    type Closer = IcmpSocketCloser;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        // SAFETY: `recv_from` never writes uninitialized bytes into the slice and
        // `u8` and `MaybeUninit<u8>` share a layout.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let result = self.socket.recv_from(uninit);
        // A shutdown wakes the reader with an empty read
        if self.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let (len, addr) = result?;
        let peer = addr
            .as_socket_ipv4()
            .map(|a| *a.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IPv4 peer address"))?;
        Ok((len, peer))
    }

    fn closer(&self) -> io::Result<IcmpSocketCloser> {
        Ok(IcmpSocketCloser {
            socket: self.socket.try_clone()?,
            closed: Arc::clone(&self.closed),
        })
    }
}

/// Shuts down the read side of a [`RawIcmpSocket`]
#[derive(Debug)]
pub struct IcmpSocketCloser {
    socket: Socket,
    closed: Arc<AtomicBool>,
}

impl SourceCloser for IcmpSocketCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Unconnected sockets report ENOTCONN but still wake blocked readers
        if let Err(e) = self.socket.shutdown(Shutdown::Read) {
            trace!(error = %e, "icmp socket shutdown");
        }
    }
}

/// Create a raw UDP socket for sending probes
///
/// SOCK_RAW with IPPROTO_UDP gives us control over the UDP header while the
/// kernel still builds the IPv4 header (honouring IP_TTL and IP_TOS).
pub fn create_udp_send_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Create a raw ICMPv4 socket
pub fn create_raw_icmp_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Check that raw sockets can be opened at all
pub fn check_permissions() -> io::Result<()> {
    create_raw_icmp_socket()?;
    create_udp_send_socket()?;
    Ok(())
}

/// Detect the local source IP the kernel would use to reach `target`.
/// Connects a throwaway UDP socket (nothing is sent) and reads back the
/// source address via getsockname.
pub fn detect_source_ip(target: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.connect(&SockAddr::from(SocketAddrV4::new(target, 80)))?;
    match socket.local_addr()?.as_socket() {
        Some(SocketAddr::V4(local)) => Ok(*local.ip()),
        _ => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "failed to get local IPv4 socket address",
        )),
    }
}

/// Resolve this host's own name and return its first non-loopback IPv4 address
pub fn local_ip_by_hostname() -> io::Result<Ipv4Addr> {
    let mut buf = [0u8; 256];
    // SAFETY: the pointer is valid for `buf.len()` bytes for the duration of the call
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = std::str::from_utf8(&buf[..end])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    (name, 0)
        .to_socket_addrs()?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("local address is not configured for host {}", name),
            )
        })
}

/// Local IP for probing `target`: hostname resolution first, routing table second
pub fn resolve_local_ip(target: Ipv4Addr) -> io::Result<Ipv4Addr> {
    match local_ip_by_hostname() {
        Ok(ip) => Ok(ip),
        Err(e) => {
            debug!(error = %e, "hostname lookup failed, asking the routing table");
            detect_source_ip(target)
        }
    }
}
