//! ICMP reply parsing.
//!
//! A raw ICMPv4 socket delivers the whole IP datagram: outer IPv4 header,
//! ICMP header, and for error messages the quoted original datagram (its IPv4
//! header plus at least the first 8 bytes of its payload, which for our probes
//! is the UDP header).

use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use std::net::Ipv4Addr;

use crate::error::{Result, TraceError};
use crate::probe::codec::UDP_HEADER_SIZE;

/// ICMP header size (type, code, checksum, 4 bytes rest-of-header)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMP error kinds that quote one of our probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpErrorKind {
    /// Type 11, probe TTL ran out at an intermediate router
    TimeExceeded(u8),
    /// Type 3, usually port unreachable from the destination itself
    DestUnreachable(u8),
}

/// The original datagram quoted inside an ICMP error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedProbe {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// First 8 bytes after the quoted IPv4 header
    pub udp_header: [u8; UDP_HEADER_SIZE],
}

/// A parsed inbound ICMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpMessage {
    /// Time Exceeded / Destination Unreachable. `quote` is `None` when the
    /// embedded datagram is truncated or not IPv4.
    Error {
        kind: IcmpErrorKind,
        quote: Option<QuotedProbe>,
    },
    /// Any other ICMP type (echo, redirect, ...)
    Other(u8),
}

/// Parse a raw ICMPv4 datagram as read from a `SOCK_RAW` socket.
///
/// Fails with [`TraceError::Parse`] when the outer datagram is not an ICMP
/// message at all. A malformed quote inside a well-formed error is not a
/// parse failure; it comes back as `quote: None`.
pub fn parse_icmp_message(data: &[u8]) -> Result<IcmpMessage> {
    if data.is_empty() {
        return Err(TraceError::Parse("empty datagram".into()));
    }

    let ip_packet =
        Ipv4Packet::new(data).ok_or_else(|| TraceError::Parse("truncated IPv4 header".into()))?;
    if ip_packet.get_version() != 4 {
        return Err(TraceError::Parse(format!(
            "unexpected IP version {}",
            ip_packet.get_version()
        )));
    }
    if ip_packet.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return Err(TraceError::Parse(format!(
            "not ICMP (protocol {})",
            ip_packet.get_next_level_protocol().0
        )));
    }

    let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
    if ip_header_len < 20 || data.len() < ip_header_len + ICMP_HEADER_SIZE {
        return Err(TraceError::Parse("truncated ICMP header".into()));
    }

    let icmp_data = &data[ip_header_len..];
    let icmp_packet = IcmpPacket::new(icmp_data)
        .ok_or_else(|| TraceError::Parse("truncated ICMP header".into()))?;
    let code = icmp_packet.get_icmp_code().0;

    let kind = match icmp_packet.get_icmp_type() {
        IcmpTypes::TimeExceeded => IcmpErrorKind::TimeExceeded(code),
        IcmpTypes::DestinationUnreachable => IcmpErrorKind::DestUnreachable(code),
        other => return Ok(IcmpMessage::Other(other.0)),
    };

    Ok(IcmpMessage::Error {
        kind,
        quote: parse_quote(&icmp_data[ICMP_HEADER_SIZE..]),
    })
}

/// Parse the original datagram fragment carried by an ICMP error
fn parse_quote(original: &[u8]) -> Option<QuotedProbe> {
    let original_ip = Ipv4Packet::new(original)?;
    if original_ip.get_version() != 4 {
        return None;
    }

    let orig_ihl = (original_ip.get_header_length() as usize) * 4;
    if orig_ihl < 20 || original.len() < orig_ihl + UDP_HEADER_SIZE {
        return None;
    }

    let mut udp_header = [0u8; UDP_HEADER_SIZE];
    udp_header.copy_from_slice(&original[orig_ihl..orig_ihl + UDP_HEADER_SIZE]);

    Some(QuotedProbe {
        source: original_ip.get_source(),
        destination: original_ip.get_destination(),
        udp_header,
    })
}
