use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::duration_serde;

/// Marker printed for a hop without a reply
pub const SILENT: &str = "*";

/// One TTL step of a trace: the router that answered, or nothing.
///
/// Serializes with a derived `success` flag; it is ignored on input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Hop {
    pub ttl: u8,
    /// Responding router, `None` for a timeout or an unmatched reply
    pub address: Option<Ipv4Addr>,
    /// Time from send to reply (or to the timeout verdict)
    #[serde(with = "duration_serde")]
    pub rtt: Duration,
}

impl Hop {
    pub fn reply(ttl: u8, address: Ipv4Addr, rtt: Duration) -> Self {
        Self {
            ttl,
            address: Some(address),
            rtt,
        }
    }

    pub fn timeout(ttl: u8, rtt: Duration) -> Self {
        Self {
            ttl,
            address: None,
            rtt,
        }
    }

    /// Whether a router answered at this TTL
    pub fn is_success(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_timeout(&self) -> bool {
        self.address.is_none()
    }

    /// Whether this hop is the trace destination
    pub fn reached(&self, remote_ip: Ipv4Addr) -> bool {
        self.address == Some(remote_ip)
    }

    /// Address as printed: dotted quad or `*`
    pub fn address_str(&self) -> String {
        self.address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| SILENT.to_string())
    }
}

#[derive(Serialize)]
struct HopRecord {
    ttl: u8,
    address: Option<Ipv4Addr>,
    success: bool,
    #[serde(with = "duration_serde")]
    rtt: Duration,
}

impl Serialize for Hop {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        HopRecord {
            ttl: self.ttl,
            address: self.address,
            success: self.is_success(),
            rtt: self.rtt,
        }
        .serialize(serializer)
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.ttl, self.address_str(), self.rtt)
    }
}
