//! UDP probe encoding.
//!
//! Probes are sent through a raw `IPPROTO_UDP` socket, so the kernel writes the
//! IPv4 header (and the per-packet TTL set on the socket). We only serialize the
//! UDP header and payload, but still need the IPv4 addresses to compute the UDP
//! checksum over the pseudo-header.

use pnet::packet::Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{self, MutableUdpPacket};
use std::net::Ipv4Addr;

use crate::error::{Result, TraceError};

/// UDP header size (fixed)
pub const UDP_HEADER_SIZE: usize = 8;
/// IPv4 header size without options
pub const IPV4_HEADER_SIZE: usize = 20;
/// Largest payload whose length still fits the 16-bit UDP length field
pub const MAX_UDP_PAYLOAD: usize = u16::MAX as usize - UDP_HEADER_SIZE;
/// Default probe payload
pub const DEFAULT_PAYLOAD: &[u8] = b"hello, this a msg from mtrace";

/// TTL written into the checksum-only IPv4 header. The socket's IP_TTL wins on the wire.
const PLACEHOLDER_TTL: u8 = 128;

/// Build the IPv4 header the probe would travel in.
///
/// It is never transmitted; it carries the addresses and protocol the UDP
/// pseudo-header checksum is computed against.
fn build_ipv4_header(
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    tos: u8,
    udp_len: u16,
) -> Result<[u8; IPV4_HEADER_SIZE]> {
    let total_len = udp_len
        .checked_add(IPV4_HEADER_SIZE as u16)
        .ok_or_else(|| TraceError::Encoding(format!("datagram of {} bytes exceeds IPv4 limit", udp_len)))?;

    let mut buffer = [0u8; IPV4_HEADER_SIZE];
    let mut header = MutableIpv4Packet::new(&mut buffer)
        .ok_or_else(|| TraceError::Encoding("IPv4 header buffer too small".into()))?;

    header.set_version(4);
    header.set_header_length(5);
    // ToS byte = DSCP (upper 6 bits) + ECN (lower 2 bits)
    header.set_dscp(tos >> 2);
    header.set_ecn(tos & 0x03);
    header.set_total_length(total_len);
    header.set_ttl(PLACEHOLDER_TTL);
    header.set_next_level_protocol(IpNextHeaderProtocols::Udp);
    header.set_source(local_ip);
    header.set_destination(remote_ip);
    let cksum = ipv4::checksum(&header.to_immutable());
    header.set_checksum(cksum);

    Ok(buffer)
}

/// Encode a UDP probe: UDP header (ports, length, checksum) followed by `payload`.
///
/// Length and checksum are always computed. The output is a pure function of
/// the inputs, so every probe of one trace carries identical header bytes.
pub fn encode_probe(
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    local_port: u16,
    remote_port: u16,
    tos: u8,
    payload: &[u8],
) -> Result<Vec<u8>> {
    if payload.len() > MAX_UDP_PAYLOAD {
        return Err(TraceError::Encoding(format!(
            "payload of {} bytes does not fit the UDP length field",
            payload.len()
        )));
    }
    let udp_len = (UDP_HEADER_SIZE + payload.len()) as u16;

    let ip_buffer = build_ipv4_header(local_ip, remote_ip, tos, udp_len)?;
    let ip_header = Ipv4Packet::new(&ip_buffer)
        .ok_or_else(|| TraceError::Encoding("IPv4 header truncated".into()))?;

    let mut buffer = vec![0u8; udp_len as usize];
    let mut packet = MutableUdpPacket::new(&mut buffer)
        .ok_or_else(|| TraceError::Encoding("UDP buffer too small".into()))?;

    packet.set_source(local_port);
    packet.set_destination(remote_port);
    packet.set_length(udp_len);
    packet.set_payload(payload);

    let cksum = udp::ipv4_checksum(
        &packet.to_immutable(),
        &ip_header.get_source(),
        &ip_header.get_destination(),
    );
    // RFC 768: a computed zero is transmitted as all ones
    packet.set_checksum(if cksum == 0 { 0xFFFF } else { cksum });

    debug_assert_eq!(packet.packet().len(), udp_len as usize);
    Ok(buffer)
}
